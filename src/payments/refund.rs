use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::{can_process_refunds, User};
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{PaymentId, PaymentStatus, RefundId, RefundStatus, UserId};

use super::Payment;

/// refund input
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub amount: Money,
    pub reason: String,
}

impl RefundRequest {
    pub fn new(amount: Money, reason: impl Into<String>) -> Self {
        Self {
            amount,
            reason: reason.into(),
        }
    }

    /// amount and reason checks against the refunded payment
    fn validate_against(&self, payment: &Payment) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::invalid_amount(
                self.amount,
                "refund amount must be greater than zero",
            ));
        }
        if self.amount > payment.amount {
            return Err(LedgerError::invalid_amount(
                self.amount,
                format!("refund cannot exceed payment amount {}", payment.amount),
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(LedgerError::MissingReason);
        }
        Ok(())
    }
}

/// reversal of a completed payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub requested_by: UserId,
    pub processed_by: Option<UserId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn ensure_refundable(payment: &Payment) -> Result<()> {
    if payment.status != PaymentStatus::Completed {
        return Err(LedgerError::PaymentNotRefundable {
            payment_id: payment.id,
            status: payment.status,
        });
    }
    Ok(())
}

fn ensure_refund_staff(actor: &User) -> Result<()> {
    if !can_process_refunds(actor) {
        return Err(LedgerError::denied(
            actor.id,
            "only principals and teachers can process refunds",
        ));
    }
    Ok(())
}

/// refund a completed payment in one step
pub fn process_refund(
    payment: &mut Payment,
    request: &RefundRequest,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<Refund> {
    ensure_refundable(payment)?;
    ensure_refund_staff(actor)?;
    request.validate_against(payment)?;

    payment.mark_refunded(now)?;

    Ok(Refund {
        id: Uuid::new_v4(),
        payment_id: payment.id,
        amount: request.amount,
        reason: request.reason.trim().to_string(),
        status: RefundStatus::Processed,
        requested_by: actor.id,
        processed_by: Some(actor.id),
        processed_at: Some(now),
        rejection_reason: None,
        created_at: now,
    })
}

/// open a pending refund for staff review
pub fn request_refund(
    payment: &Payment,
    request: &RefundRequest,
    existing: &[Refund],
    actor: &User,
    now: DateTime<Utc>,
) -> Result<Refund> {
    ensure_refundable(payment)?;
    request.validate_against(payment)?;
    let open = existing
        .iter()
        .any(|r| r.payment_id == payment.id && r.status == RefundStatus::Pending);
    if open {
        return Err(LedgerError::InvalidState {
            current: "refund pending".to_string(),
            expected: "no open refund request".to_string(),
        });
    }

    Ok(Refund {
        id: Uuid::new_v4(),
        payment_id: payment.id,
        amount: request.amount,
        reason: request.reason.trim().to_string(),
        status: RefundStatus::Pending,
        requested_by: actor.id,
        processed_by: None,
        processed_at: None,
        rejection_reason: None,
        created_at: now,
    })
}

impl Refund {
    fn ensure_pending(&self) -> Result<()> {
        if self.status != RefundStatus::Pending {
            return Err(LedgerError::InvalidState {
                current: format!("{:?}", self.status),
                expected: format!("{:?}", RefundStatus::Pending),
            });
        }
        Ok(())
    }

    /// process a pending request, refunding the payment
    pub fn approve(&mut self, payment: &mut Payment, actor: &User, now: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        ensure_refundable(payment)?;
        ensure_refund_staff(actor)?;

        payment.mark_refunded(now)?;
        self.status = RefundStatus::Processed;
        self.processed_by = Some(actor.id);
        self.processed_at = Some(now);
        Ok(())
    }

    /// decline a pending request; the payment stays completed
    pub fn reject(&mut self, reason: &str, actor: &User, now: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        ensure_refund_staff(actor)?;
        if reason.trim().is_empty() {
            return Err(LedgerError::MissingReason);
        }
        self.status = RefundStatus::Rejected;
        self.processed_by = Some(actor.id);
        self.processed_at = Some(now);
        self.rejection_reason = Some(reason.trim().to_string());
        Ok(())
    }
}
