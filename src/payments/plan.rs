use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{FeeId, PaymentPlanId};

/// plan input
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentPlan {
    pub total_installments: u32,
    pub installment_amount: Money,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewPaymentPlan {
    /// spread `outstanding` evenly, rounding each installment up to the cent
    pub fn even_split(
        outstanding: Money,
        total_installments: u32,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            total_installments,
            installment_amount: outstanding.split_ceil(total_installments),
            start_date,
            end_date,
        }
    }

    pub fn validate(&self, outstanding: Money, config: &LedgerConfig) -> Result<()> {
        if self.total_installments == 0 {
            return Err(LedgerError::validation(
                "total_installments",
                "a plan needs at least one installment",
            ));
        }
        if self.total_installments > config.validation.max_installments {
            return Err(LedgerError::validation(
                "total_installments",
                format!("a plan can have at most {} installments", config.validation.max_installments),
            ));
        }
        if !self.installment_amount.is_positive() {
            return Err(LedgerError::invalid_amount(
                self.installment_amount,
                "installment amount must be greater than zero",
            ));
        }
        if self.installment_amount > config.limits.max_payment_amount {
            return Err(LedgerError::invalid_amount(
                self.installment_amount,
                format!("installment exceeds maximum payment {}", config.limits.max_payment_amount),
            ));
        }
        if self.end_date < self.start_date {
            return Err(LedgerError::validation("end_date", "end date cannot precede start date"));
        }
        let covered = self
            .installment_amount
            .checked_times(self.total_installments)
            .ok_or_else(|| LedgerError::invalid_amount(self.installment_amount, "installment total overflows"))?;
        if covered < outstanding {
            return Err(LedgerError::invalid_amount(
                covered,
                format!("installments do not cover outstanding balance {}", outstanding),
            ));
        }
        Ok(())
    }
}

/// one advisory installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
}

/// installment schedule attached to a fee; advisory only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: PaymentPlanId,
    pub fee_id: FeeId,
    pub total_installments: u32,
    pub installment_amount: Money,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// outstanding balance when the plan was agreed
    pub covered_amount: Money,
    pub created_at: DateTime<Utc>,
}

impl PaymentPlan {
    pub fn create(
        fee_id: FeeId,
        request: &NewPaymentPlan,
        outstanding: Money,
        config: &LedgerConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        request.validate(outstanding, config)?;
        Ok(Self {
            id: Uuid::new_v4(),
            fee_id,
            total_installments: request.total_installments,
            installment_amount: request.installment_amount,
            start_date: request.start_date,
            end_date: request.end_date,
            covered_amount: outstanding,
            created_at: now,
        })
    }

    /// installments spread evenly from start to end; the last absorbs rounding
    pub fn schedule(&self) -> Vec<Installment> {
        let count = self.total_installments;
        if count == 0 {
            return Vec::new();
        }
        let span_days = (self.end_date - self.start_date).num_days();
        let mut remaining = self.covered_amount;
        let mut installments = Vec::with_capacity(count as usize);

        for i in 0..count {
            let due_date = if count == 1 {
                self.end_date
            } else {
                let offset = span_days * i as i64 / (count as i64 - 1);
                self.start_date + Duration::days(offset)
            };
            let amount = if i + 1 == count {
                remaining
            } else {
                self.installment_amount.min(remaining)
            };
            remaining = remaining.saturating_sub(amount);
            installments.push(Installment {
                number: i + 1,
                due_date,
                amount,
            });
        }

        installments
    }

    /// next installment due on or after `today`
    pub fn next_installment(&self, today: NaiveDate) -> Option<Installment> {
        self.schedule().into_iter().find(|i| i.due_date >= today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_even_split_schedule_sums_to_balance() {
        let outstanding = Money::from_major(1_000);
        let request = NewPaymentPlan::even_split(outstanding, 3, date(2024, 1, 1), date(2024, 3, 1));
        assert_eq!(request.installment_amount, Money::from_str_exact("333.34").unwrap());

        let plan = PaymentPlan::create(Uuid::new_v4(), &request, outstanding, &LedgerConfig::standard(), now()).unwrap();
        let schedule = plan.schedule();

        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[0].due_date, date(2024, 1, 1));
        assert_eq!(schedule[1].due_date, date(2024, 1, 31));
        assert_eq!(schedule[2].due_date, date(2024, 3, 1));
        assert_eq!(schedule[2].amount, Money::from_str_exact("333.32").unwrap());
        let total: Money = schedule.iter().map(|i| i.amount).sum();
        assert_eq!(total, outstanding);
    }

    #[test]
    fn test_single_installment_due_at_end() {
        let outstanding = Money::from_major(500);
        let request = NewPaymentPlan::even_split(outstanding, 1, date(2024, 1, 1), date(2024, 2, 1));
        let plan = PaymentPlan::create(Uuid::new_v4(), &request, outstanding, &LedgerConfig::standard(), now()).unwrap();

        let schedule = plan.schedule();
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].due_date, date(2024, 2, 1));
        assert_eq!(schedule[0].amount, outstanding);
        assert_eq!(plan.next_installment(date(2024, 1, 15)).map(|i| i.number), Some(1));
        assert!(plan.next_installment(date(2024, 2, 2)).is_none());
    }

    #[test]
    fn test_plan_must_cover_balance() {
        let config = LedgerConfig::standard();
        let request = NewPaymentPlan {
            total_installments: 4,
            installment_amount: Money::from_major(100),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 4, 1),
        };
        assert!(matches!(
            request.validate(Money::from_major(401), &config),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(request.validate(Money::from_major(400), &config).is_ok());
    }

    #[test]
    fn test_plan_field_checks() {
        let config = LedgerConfig::standard();
        let mut request = NewPaymentPlan::even_split(Money::from_major(100), 2, date(2024, 2, 1), date(2024, 1, 1));
        assert!(request.validate(Money::from_major(100), &config).is_err());

        request.end_date = date(2024, 3, 1);
        request.total_installments = 0;
        assert!(request.validate(Money::from_major(100), &config).is_err());
    }

    #[test]
    fn test_plan_size_is_capped() {
        let config = LedgerConfig::standard();
        let mut request = NewPaymentPlan::even_split(Money::from_major(100), 2, date(2024, 1, 1), date(2024, 3, 1));

        request.total_installments = config.validation.max_installments + 1;
        assert!(matches!(
            request.validate(Money::from_major(100), &config),
            Err(LedgerError::ValidationError { .. })
        ));

        request.total_installments = u32::MAX;
        request.installment_amount = Money::from_decimal(Decimal::MAX);
        assert!(request.validate(Money::from_major(100), &config).is_err());

        request.total_installments = 2;
        request.installment_amount = config.limits.max_payment_amount + Money::CENT;
        assert!(matches!(
            request.validate(Money::from_major(100), &config),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}
