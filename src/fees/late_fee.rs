use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LateFeePolicy;
use crate::decimal::{Money, Percentage};
use crate::errors::{LedgerError, Result};
use crate::payments::Payment;
use crate::types::{FeeId, LateFeeId};

use super::Fee;

/// penalty line recorded against an overdue fee; kept apart from the fee amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFee {
    pub id: LateFeeId,
    pub fee_id: FeeId,
    pub penalty_amount: Option<Money>,
    pub penalty_percentage: Option<Percentage>,
    /// money owed for this line
    pub assessed_amount: Money,
    /// outstanding balance the penalty was computed on
    pub overdue_base: Money,
    pub days_overdue: u32,
    pub due_date: NaiveDate,
    pub calculated_at: DateTime<Utc>,
}

impl LateFee {
    /// assess a penalty on `fee` as of `today`
    pub fn assess(
        fee: &Fee,
        payments: &[Payment],
        policy: &LateFeePolicy,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !fee.is_overdue(today, payments) {
            return Err(LedgerError::validation(
                "due_date",
                format!("fee {} is not overdue", fee.id),
            ));
        }

        let overdue_base = fee.outstanding(payments);
        let days_overdue = (today - fee.due_date).num_days().max(0) as u32;

        let (penalty_amount, penalty_percentage, assessed) =
            match (policy.fixed_penalty, policy.penalty_percentage) {
                (Some(fixed), _) => (Some(fixed), None, fixed),
                (None, Some(pct)) => (None, Some(pct), overdue_base.percentage(pct).max(Money::CENT)),
                (None, None) => {
                    return Err(LedgerError::InvalidConfiguration {
                        message: "late fee policy has no penalty".to_string(),
                    })
                }
            };

        Ok(Self {
            id: Uuid::new_v4(),
            fee_id: fee.id,
            penalty_amount,
            penalty_percentage,
            assessed_amount: assessed,
            overdue_base,
            days_overdue,
            due_date: today + Duration::days(policy.grace_days as i64),
            calculated_at: now,
        })
    }
}
