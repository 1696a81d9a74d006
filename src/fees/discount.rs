use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Percentage};
use crate::errors::{LedgerError, Result};
use crate::payments::Payment;
use crate::types::{DiscountId, DiscountType, FeeId, StudentId, UserId};

use super::Fee;

/// discount request as submitted by staff
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountRequest {
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub reason: String,
}

impl DiscountRequest {
    pub fn percentage(value: Decimal, reason: impl Into<String>) -> Self {
        Self {
            discount_type: DiscountType::Percentage,
            value,
            reason: reason.into(),
        }
    }

    pub fn amount(value: Decimal, reason: impl Into<String>) -> Self {
        Self {
            discount_type: DiscountType::Amount,
            value,
            reason: reason.into(),
        }
    }

    /// monetary value of this discount against `fee`
    pub fn resolve(&self, fee: &Fee, payments: &[Payment]) -> Result<Money> {
        match self.discount_type {
            DiscountType::Percentage => {
                let pct = Percentage::new(self.value).ok_or_else(|| {
                    LedgerError::invalid_amount(
                        Money::from_decimal(self.value),
                        "percentage discount must be greater than 0 and at most 100",
                    )
                })?;
                Ok(fee.amount.percentage(pct))
            }
            DiscountType::Amount => {
                let amount = Money::from_decimal(self.value);
                if !amount.is_positive() {
                    return Err(LedgerError::invalid_amount(
                        amount,
                        "discount amount must be greater than zero",
                    ));
                }
                let outstanding = fee.outstanding(payments);
                if amount > outstanding {
                    return Err(LedgerError::invalid_amount(
                        amount,
                        format!("discount exceeds outstanding balance {}", outstanding),
                    ));
                }
                Ok(amount)
            }
        }
    }
}

/// applied discount record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub fee_id: FeeId,
    pub student_id: StudentId,
    pub discount_type: DiscountType,
    pub value: Decimal,
    /// money taken off the fee when applied
    pub resolved_amount: Money,
    pub reason: String,
    pub applied_by: UserId,
    pub applied_at: DateTime<Utc>,
}

/// resolve the discount, raise the fee's waiver and reconcile
pub fn apply_discount(
    fee: &mut Fee,
    request: &DiscountRequest,
    payments: &[Payment],
    applied_by: UserId,
    now: DateTime<Utc>,
) -> Result<Discount> {
    let resolved = request.resolve(fee, payments)?;
    if resolved.is_zero() {
        return Err(LedgerError::invalid_amount(resolved, "discount resolves to nothing"));
    }
    if request.reason.trim().is_empty() {
        return Err(LedgerError::MissingReason);
    }
    fee.add_waiver(resolved, payments, now)?;

    Ok(Discount {
        id: Uuid::new_v4(),
        fee_id: fee.id,
        student_id: fee.student_id,
        discount_type: request.discount_type,
        value: request.value,
        resolved_amount: resolved,
        reason: request.reason.trim().to_string(),
        applied_by,
        applied_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeStatus;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    fn fee(amount: i64) -> Fee {
        Fee::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_major(amount),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            None,
            None,
            now(),
        )
    }

    #[test]
    fn test_percentage_discount() {
        let mut fee = fee(4_000);
        let request = DiscountRequest::percentage(dec!(10), "sibling");

        let discount = apply_discount(&mut fee, &request, &[], Uuid::new_v4(), now()).unwrap();

        assert_eq!(discount.resolved_amount, Money::from_major(400));
        assert_eq!(fee.waived_amount, Money::from_major(400));
        assert_eq!(fee.outstanding(&[]), Money::from_major(3_600));
        assert_eq!(fee.status, FeeStatus::Unpaid);
    }

    #[test]
    fn test_percentage_above_hundred_rejected() {
        let mut fee = fee(4_000);
        let request = DiscountRequest::percentage(dec!(150), "typo");

        let result = apply_discount(&mut fee, &request, &[], Uuid::new_v4(), now());
        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
        assert_eq!(fee.waived_amount, Money::ZERO);
    }

    #[test]
    fn test_amount_discount_capped_by_outstanding() {
        let mut fee = fee(1_000);
        let too_much = DiscountRequest::amount(dec!(1000.01), "scholarship");
        assert!(apply_discount(&mut fee, &too_much, &[], Uuid::new_v4(), now()).is_err());

        let negative = DiscountRequest::amount(dec!(-5), "bad");
        assert!(apply_discount(&mut fee, &negative, &[], Uuid::new_v4(), now()).is_err());
    }

    #[test]
    fn test_full_discount_settles_fee() {
        let mut fee = fee(1_000);
        let request = DiscountRequest::percentage(dec!(100), "full scholarship");

        apply_discount(&mut fee, &request, &[], Uuid::new_v4(), now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Paid);
        assert_eq!(fee.outstanding(&[]), Money::ZERO);
    }

    #[test]
    fn test_stacked_percentages_cannot_exceed_amount() {
        let mut fee = fee(1_000);
        let sixty = DiscountRequest::percentage(dec!(60), "merit");

        apply_discount(&mut fee, &sixty, &[], Uuid::new_v4(), now()).unwrap();
        let result = apply_discount(&mut fee, &sixty, &[], Uuid::new_v4(), now());
        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
        assert_eq!(fee.waived_amount, Money::from_major(600));
    }

    #[test]
    fn test_discount_needs_reason() {
        let mut fee = fee(1_000);
        let request = DiscountRequest::amount(dec!(100), "   ");
        assert!(matches!(
            apply_discount(&mut fee, &request, &[], Uuid::new_v4(), now()),
            Err(LedgerError::MissingReason)
        ));
        assert_eq!(fee.waived_amount, Money::ZERO);
    }
}
