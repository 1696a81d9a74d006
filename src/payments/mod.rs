pub mod plan;
pub mod refund;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::User;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::fees::{validate_notes, Fee};
use crate::types::{FeeId, PaymentId, PaymentMethod, PaymentStatus, UserId};

pub use plan::{Installment, NewPaymentPlan, PaymentPlan};
pub use refund::{Refund, RefundRequest};

/// a monetary transaction applied against a fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub fee_id: FeeId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub processed_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

/// payment input
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub fee_id: FeeId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    /// pending or completed
    pub status: PaymentStatus,
}

impl NewPayment {
    pub fn new(fee_id: FeeId, amount: Money, method: PaymentMethod) -> Self {
        Self {
            fee_id,
            amount,
            method,
            transaction_id: None,
            notes: None,
            status: PaymentStatus::Pending,
        }
    }

    pub fn transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn completed(mut self) -> Self {
        self.status = PaymentStatus::Completed;
        self
    }

    /// blank transaction ids are treated as absent
    pub fn normalized_transaction_id(&self) -> Option<&str> {
        self.transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// field checks that need no ledger lookups
    pub fn validate_fields(&self, actor: &User, config: &LedgerConfig) -> Result<()> {
        match self.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Completed => {
                if !crate::accounts::can_process_payments(actor) {
                    return Err(LedgerError::denied(
                        actor.id,
                        "only staff can record completed payments",
                    ));
                }
            }
            other => {
                return Err(LedgerError::validation(
                    "status",
                    format!("payments are created pending or completed, not {}", other),
                ))
            }
        }
        if self.amount > config.limits.max_payment_amount {
            return Err(LedgerError::invalid_amount(
                self.amount,
                format!("payment cannot exceed {}", config.limits.max_payment_amount),
            ));
        }
        if let Some(transaction_id) = self.normalized_transaction_id() {
            validate_transaction_id(transaction_id)?;
        }
        validate_notes(self.notes.as_deref(), config)
    }
}

/// transaction references are limited to `[A-Za-z0-9._-]`, at most 100 chars
pub fn validate_transaction_id(transaction_id: &str) -> Result<()> {
    if transaction_id.len() > 100 {
        return Err(LedgerError::validation(
            "transaction_id",
            "transaction id cannot exceed 100 characters",
        ));
    }
    let valid = transaction_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(LedgerError::validation(
            "transaction_id",
            "transaction id contains invalid characters",
        ));
    }
    Ok(())
}

impl Payment {
    /// build the record; admission must already have passed
    pub fn from_request(request: NewPayment, processed_by: Option<UserId>, now: DateTime<Utc>) -> Self {
        let transaction_id = request.normalized_transaction_id().map(str::to_string);
        Self {
            id: Uuid::new_v4(),
            fee_id: request.fee_id,
            amount: request.amount,
            payment_method: request.method,
            transaction_id,
            status: request.status,
            payment_date: now,
            notes: request.notes,
            processed_by,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// move through the status machine; refunds use `mark_refunded`
    pub fn transition_to(
        &mut self,
        next: PaymentStatus,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatus> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        if matches!(next, PaymentStatus::Completed | PaymentStatus::Failed)
            && !crate::accounts::can_process_payments(actor)
        {
            return Err(LedgerError::denied(
                actor.id,
                format!("only staff can mark payments {}", next),
            ));
        }
        let old = self.status;
        self.status = next;
        self.updated_at = now;
        if next == PaymentStatus::Completed {
            self.processed_by = Some(actor.id);
        }
        Ok(old)
    }

    pub(crate) fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Completed {
            return Err(LedgerError::PaymentNotRefundable {
                payment_id: self.id,
                status: self.status,
            });
        }
        self.status = PaymentStatus::Refunded;
        self.updated_at = now;
        Ok(())
    }
}

/// re-run admission for a payment being completed after creation
pub fn admit_completion(fee: &Fee, payment: &Payment, actor: &User, payments: &[Payment]) -> Result<()> {
    let others: Vec<&Payment> = payments.iter().filter(|p| p.id != payment.id).collect();
    fee.admit_payment(payment.amount, actor, others)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_transaction_id_charset() {
        assert!(validate_transaction_id("UPI-2024.01_abc").is_ok());
        assert!(validate_transaction_id("bad id").is_err());
        assert!(validate_transaction_id("drop;table").is_err());
        assert!(validate_transaction_id("caf\u{e9}").is_err());
        assert!(validate_transaction_id(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_blank_transaction_id_is_absent() {
        let request = NewPayment::new(Uuid::new_v4(), Money::from_major(10), PaymentMethod::Upi)
            .transaction_id("   ");
        assert!(request.normalized_transaction_id().is_none());
        let payment = Payment::from_request(request, None, now());
        assert!(payment.transaction_id.is_none());
    }

    #[test]
    fn test_students_cannot_create_completed_payments() {
        let config = LedgerConfig::standard();
        let request = NewPayment::new(Uuid::new_v4(), Money::from_major(10), PaymentMethod::Cash).completed();

        assert!(matches!(
            request.validate_fields(&User::student("s"), &config),
            Err(LedgerError::PermissionDenied { .. })
        ));
        assert!(request.validate_fields(&User::teacher("t"), &config).is_ok());
    }

    #[test]
    fn test_initial_status_restricted() {
        let config = LedgerConfig::standard();
        let mut request = NewPayment::new(Uuid::new_v4(), Money::from_major(10), PaymentMethod::Cash);
        request.status = PaymentStatus::Refunded;
        assert!(matches!(
            request.validate_fields(&User::principal("p"), &config),
            Err(LedgerError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_transition_rules() {
        let teacher = User::teacher("t");
        let student = User::student("s");
        let request = NewPayment::new(Uuid::new_v4(), Money::from_major(10), PaymentMethod::Cash);
        let mut payment = Payment::from_request(request, None, now());

        assert!(matches!(
            payment.transition_to(PaymentStatus::Completed, &student, now()),
            Err(LedgerError::PermissionDenied { .. })
        ));
        assert_eq!(
            payment.transition_to(PaymentStatus::Processing, &student, now()).unwrap(),
            PaymentStatus::Pending
        );
        payment.transition_to(PaymentStatus::Completed, &teacher, now()).unwrap();
        assert_eq!(payment.processed_by, Some(teacher.id));

        assert!(matches!(
            payment.transition_to(PaymentStatus::Refunded, &teacher, now()),
            Err(LedgerError::InvalidStatusTransition { .. })
        ));
        payment.mark_refunded(now()).unwrap();
        assert!(matches!(
            payment.mark_refunded(now()),
            Err(LedgerError::PaymentNotRefundable { .. })
        ));
    }
}
