pub mod discount;
pub mod late_fee;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::User;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::payments::Payment;
use crate::types::{
    ClassId, FeeCategory, FeeId, FeeStatus, FeeTypeId, PaymentStatus, Role, StudentId, UserId,
};

pub use discount::{Discount, DiscountRequest};
pub use late_fee::LateFee;

/// a billing obligation assigned to a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: FeeId,
    pub student_id: StudentId,
    /// account of the billed student, used for ownership checks
    pub student_user_id: UserId,
    pub fee_type_id: Option<FeeTypeId>,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    pub waived_amount: Money,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// sum of completed payments recorded against `fee_id`
pub fn completed_total<'a, I>(fee_id: FeeId, payments: I) -> Money
where
    I: IntoIterator<Item = &'a Payment>,
{
    payments
        .into_iter()
        .filter(|p| p.fee_id == fee_id && p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum()
}

impl Fee {
    pub fn new(
        student_id: StudentId,
        student_user_id: UserId,
        amount: Money,
        due_date: NaiveDate,
        notes: Option<String>,
        fee_type_id: Option<FeeTypeId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            student_user_id,
            fee_type_id,
            amount,
            due_date,
            status: FeeStatus::Unpaid,
            waived_amount: Money::ZERO,
            notes,
            created_at: now,
            updated_at: now,
        }
    }

    /// outstanding balance, never negative
    pub fn outstanding<'a, I>(&self, payments: I) -> Money
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        let paid = completed_total(self.id, payments);
        self.amount.saturating_sub(self.waived_amount + paid)
    }

    /// past due and not fully settled
    pub fn is_overdue<'a, I>(&self, today: NaiveDate, payments: I) -> bool
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        self.due_date < today && self.outstanding(payments).is_positive()
    }

    /// status implied by the current payments and waivers
    pub fn derive_status<'a, I>(&self, payments: I) -> FeeStatus
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        let paid = completed_total(self.id, payments);
        if paid >= self.amount - self.waived_amount {
            FeeStatus::Paid
        } else if paid.is_positive() {
            FeeStatus::Partial
        } else {
            FeeStatus::Unpaid
        }
    }

    /// recompute and store the status; returns (old, new)
    pub fn reconcile<'a, I>(&mut self, payments: I, now: DateTime<Utc>) -> (FeeStatus, FeeStatus)
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        let old = self.status;
        let new = self.derive_status(payments);
        if new != old {
            self.status = new;
            self.updated_at = now;
        }
        (old, new)
    }

    /// amount and waiver invariants
    pub fn check_invariants(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::invalid_amount(
                self.amount,
                "fee amount must be greater than zero",
            ));
        }
        if self.waived_amount.is_negative() {
            return Err(LedgerError::invalid_amount(
                self.waived_amount,
                "waived amount cannot be negative",
            ));
        }
        if self.waived_amount > self.amount {
            return Err(LedgerError::invalid_amount(
                self.waived_amount,
                format!("waived amount cannot exceed fee amount {}", self.amount),
            ));
        }
        Ok(())
    }

    /// whether `actor` may pay `amount` against this fee; never mutates
    pub fn admit_payment<'a, I>(&self, amount: Money, actor: &User, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        if self.status == FeeStatus::Paid {
            return Err(LedgerError::FeeAlreadyPaid { fee_id: self.id });
        }
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(
                amount,
                "payment amount must be greater than zero",
            ));
        }
        let outstanding = self.outstanding(payments);
        if amount > outstanding {
            return Err(LedgerError::invalid_amount(
                amount,
                format!("payment exceeds outstanding balance {}", outstanding),
            ));
        }
        if actor.role == Role::Student && self.student_user_id != actor.id {
            return Err(LedgerError::denied(actor.id, "students can only pay their own fees"));
        }
        Ok(())
    }

    /// waive part of the outstanding balance and reconcile
    pub fn waive(&mut self, amount: Money, payments: &[Payment], now: DateTime<Utc>) -> Result<()> {
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(
                amount,
                "waiver amount must be greater than zero",
            ));
        }
        let outstanding = self.outstanding(payments);
        if amount > outstanding {
            return Err(LedgerError::invalid_amount(
                amount,
                format!("waiver exceeds outstanding balance {}", outstanding),
            ));
        }
        self.add_waiver(amount, payments, now)
    }

    /// raise the waived amount, keeping it within the fee amount
    pub(crate) fn add_waiver(&mut self, amount: Money, payments: &[Payment], now: DateTime<Utc>) -> Result<()> {
        let waived = self.waived_amount + amount;
        if waived > self.amount {
            return Err(LedgerError::invalid_amount(
                amount,
                format!("total waived {} would exceed fee amount {}", waived, self.amount),
            ));
        }
        self.waived_amount = waived;
        self.updated_at = now;
        self.reconcile(payments, now);
        Ok(())
    }
}

/// catalogue entry for a kind of fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeType {
    pub id: FeeTypeId,
    pub name: String,
    pub description: String,
    pub amount: Money,
    pub category: FeeCategory,
}

impl FeeType {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        amount: Money,
        category: FeeCategory,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LedgerError::validation("name", "fee type name is required"));
        }
        if name.chars().count() > 100 {
            return Err(LedgerError::validation("name", "fee type name cannot exceed 100 characters"));
        }
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(amount, "fee type amount must be greater than zero"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            description: description.into(),
            amount,
            category,
        })
    }
}

/// input for billing a single student
#[derive(Debug, Clone, PartialEq)]
pub struct NewFee {
    pub student_id: StudentId,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub fee_type_id: Option<FeeTypeId>,
}

impl NewFee {
    pub fn new(student_id: StudentId, amount: Money, due_date: NaiveDate) -> Self {
        Self {
            student_id,
            amount,
            due_date,
            notes: None,
            fee_type_id: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn fee_type(mut self, fee_type_id: FeeTypeId) -> Self {
        self.fee_type_id = Some(fee_type_id);
        self
    }
}

/// input for billing every student in a class
///
/// the amount defaults to the fee type's catalogue amount when only a fee
/// type is given; an explicit amount overrides it for this class.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClassFee {
    pub class_id: ClassId,
    pub amount: Option<Money>,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub fee_type_id: Option<FeeTypeId>,
}

impl NewClassFee {
    pub fn new(class_id: ClassId, due_date: NaiveDate) -> Self {
        Self {
            class_id,
            amount: None,
            due_date,
            notes: None,
            fee_type_id: None,
        }
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn fee_type(mut self, fee_type_id: FeeTypeId) -> Self {
        self.fee_type_id = Some(fee_type_id);
        self
    }

    /// explicit amount, else the fee type's amount
    pub fn resolve_amount(&self, fee_type: Option<&FeeType>) -> Result<Money> {
        self.amount
            .or_else(|| fee_type.map(|t| t.amount))
            .ok_or_else(|| LedgerError::validation("amount", "an amount or a fee type is required"))
    }
}

/// checks shared by single and class-wide billing
pub fn validate_billing(
    amount: Money,
    due_date: NaiveDate,
    notes: Option<&str>,
    today: NaiveDate,
    config: &LedgerConfig,
) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::invalid_amount(amount, "fee amount must be greater than zero"));
    }
    if amount > config.limits.max_fee_amount {
        return Err(LedgerError::invalid_amount(
            amount,
            format!("fee amount cannot exceed {}", config.limits.max_fee_amount),
        ));
    }
    validate_due_date(due_date, today, config)?;
    validate_notes(notes, config)
}

pub fn validate_due_date(due_date: NaiveDate, today: NaiveDate, config: &LedgerConfig) -> Result<()> {
    if !config.validation.allow_past_due_dates && due_date < today {
        return Err(LedgerError::validation("due_date", "due date cannot be in the past"));
    }
    let horizon = today + Duration::days(config.validation.max_due_date_horizon_days as i64);
    if due_date > horizon {
        return Err(LedgerError::validation(
            "due_date",
            format!(
                "due date cannot be more than {} days in the future",
                config.validation.max_due_date_horizon_days
            ),
        ));
    }
    Ok(())
}

pub fn validate_notes(notes: Option<&str>, config: &LedgerConfig) -> Result<()> {
    if let Some(notes) = notes {
        if notes.chars().count() > config.validation.max_notes_len {
            return Err(LedgerError::validation(
                "notes",
                format!("notes cannot exceed {} characters", config.validation.max_notes_len),
            ));
        }
    }
    Ok(())
}

/// administrative edit of a fee
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeAdjustment {
    pub amount: Option<Money>,
    pub waived_amount: Option<Money>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl FeeAdjustment {
    /// apply to a copy of `fee`, check invariants, then reconcile
    pub fn apply(
        &self,
        fee: &Fee,
        payments: &[Payment],
        config: &LedgerConfig,
        now: DateTime<Utc>,
    ) -> Result<Fee> {
        let mut updated = fee.clone();
        if let Some(amount) = self.amount {
            if amount > config.limits.max_fee_amount {
                return Err(LedgerError::invalid_amount(
                    amount,
                    format!("fee amount cannot exceed {}", config.limits.max_fee_amount),
                ));
            }
            updated.amount = amount;
        }
        if let Some(waived) = self.waived_amount {
            updated.waived_amount = waived;
        }
        if let Some(due_date) = self.due_date {
            updated.due_date = due_date;
        }
        if let Some(notes) = &self.notes {
            validate_notes(Some(notes), config)?;
            updated.notes = Some(notes.clone());
        }
        updated.check_invariants()?;
        updated.updated_at = now;
        updated.reconcile(payments, now);
        Ok(updated)
    }
}
