use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Percentage};
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub limits: AmountLimits,
    pub validation: ValidationRules,
    pub late_fee: LateFeePolicy,
}

/// hard caps on single amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountLimits {
    pub max_fee_amount: Money,
    pub max_payment_amount: Money,
}

/// field-level validation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// maximum length of free-text notes, in characters
    pub max_notes_len: usize,
    /// how far in the future a due date may be
    pub max_due_date_horizon_days: u32,
    /// whether new fees may carry a due date before today
    pub allow_past_due_dates: bool,
    /// most installments a payment plan may have
    #[serde(default = "default_max_installments")]
    pub max_installments: u32,
}

fn default_max_installments() -> u32 {
    120
}

/// penalty assessed on overdue fees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeePolicy {
    /// fixed penalty (takes precedence over the percentage)
    pub fixed_penalty: Option<Money>,
    /// percentage of the outstanding balance
    pub penalty_percentage: Option<Percentage>,
    /// days after assessment until the late-fee line is due
    pub grace_days: u32,
}

impl LedgerConfig {
    /// the defaults used by the school office
    pub fn standard() -> Self {
        Self {
            limits: AmountLimits {
                max_fee_amount: Money::from_major(1_000_000),
                max_payment_amount: Money::from_major(1_000_000),
            },
            validation: ValidationRules {
                max_notes_len: 1000,
                max_due_date_horizon_days: 365 * 2,
                allow_past_due_dates: false,
                max_installments: default_max_installments(),
            },
            late_fee: LateFeePolicy {
                fixed_penalty: None,
                penalty_percentage: Percentage::new(dec!(5)),
                grace_days: 15,
            },
        }
    }

    /// flat late fee instead of a percentage
    pub fn with_fixed_late_fee(mut self, penalty: Money) -> Self {
        self.late_fee.fixed_penalty = Some(penalty);
        self
    }

    /// permit back-dated fees, used when importing historical records
    pub fn allowing_past_due_dates(mut self) -> Self {
        self.validation.allow_past_due_dates = true;
        self
    }

    /// parse and validate a json configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.limits.max_fee_amount.is_positive() {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_fee_amount must be positive".to_string(),
            });
        }
        if !self.limits.max_payment_amount.is_positive() {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_payment_amount must be positive".to_string(),
            });
        }
        if self.validation.max_notes_len == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_notes_len must be at least 1".to_string(),
            });
        }
        if self.validation.max_installments == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "max_installments must be at least 1".to_string(),
            });
        }
        match (self.late_fee.fixed_penalty, self.late_fee.penalty_percentage) {
            (None, None) => Err(LedgerError::InvalidConfiguration {
                message: "late fee policy needs a fixed penalty or a percentage".to_string(),
            }),
            (Some(fixed), _) if !fixed.is_positive() => Err(LedgerError::InvalidConfiguration {
                message: format!("fixed late fee must be positive, got {}", fixed),
            }),
            (_, Some(pct)) if Percentage::new(pct.as_decimal()).is_none() => {
                Err(LedgerError::InvalidConfiguration {
                    message: format!("late fee percentage out of range: {}", pct),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::standard()
    }
}
