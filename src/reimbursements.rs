//! staff expense claims

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::{can_mark_reimbursement_paid, can_review_reimbursements, User};
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{ReimbursementId, ReimbursementStatus, ReimbursementTypeId, Role, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReimbursementType {
    pub id: ReimbursementTypeId,
    pub name: String,
    pub description: String,
    pub max_amount: Option<Money>,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
}

impl ReimbursementType {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        max_amount: Option<Money>,
        requires_approval: bool,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LedgerError::validation("name", "reimbursement type name is required"));
        }
        if let Some(max) = max_amount {
            if !max.is_positive() {
                return Err(LedgerError::invalid_amount(max, "maximum amount must be greater than zero"));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            description: description.into(),
            max_amount,
            requires_approval,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reimbursement {
    pub id: ReimbursementId,
    pub teacher_id: UserId,
    pub reimbursement_type_id: ReimbursementTypeId,
    pub amount: Money,
    pub description: String,
    pub status: ReimbursementStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<UserId>,
    pub review_notes: String,
}

impl Reimbursement {
    /// file a claim; types without approval start out approved
    pub fn submit(
        kind: &ReimbursementType,
        amount: Money,
        description: impl Into<String>,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if actor.role != Role::Teacher {
            return Err(LedgerError::denied(actor.id, "only teachers can submit reimbursements"));
        }
        if !amount.is_positive() {
            return Err(LedgerError::invalid_amount(amount, "reimbursement amount must be greater than zero"));
        }
        if let Some(max) = kind.max_amount {
            if amount > max {
                return Err(LedgerError::invalid_amount(
                    amount,
                    format!("{} claims are capped at {}", kind.name, max),
                ));
            }
        }
        let description = description.into();
        if description.trim().is_empty() {
            return Err(LedgerError::validation("description", "a description is required"));
        }

        let status = if kind.requires_approval {
            ReimbursementStatus::Pending
        } else {
            ReimbursementStatus::Approved
        };

        Ok(Self {
            id: Uuid::new_v4(),
            teacher_id: actor.id,
            reimbursement_type_id: kind.id,
            amount,
            description,
            status,
            submitted_at: now,
            reviewed_at: None,
            reviewed_by: None,
            review_notes: String::new(),
        })
    }

    fn expect_status(&self, expected: ReimbursementStatus) -> Result<()> {
        if self.status != expected {
            return Err(LedgerError::InvalidState {
                current: format!("{:?}", self.status),
                expected: format!("{:?}", expected),
            });
        }
        Ok(())
    }

    /// approve or reject a pending claim
    pub fn review(
        &mut self,
        approve: bool,
        notes: impl Into<String>,
        actor: &User,
        now: DateTime<Utc>,
    ) -> Result<ReimbursementStatus> {
        if !can_review_reimbursements(actor) {
            return Err(LedgerError::denied(actor.id, "only staff can review reimbursements"));
        }
        self.expect_status(ReimbursementStatus::Pending)?;
        let old = self.status;
        self.status = if approve {
            ReimbursementStatus::Approved
        } else {
            ReimbursementStatus::Rejected
        };
        self.reviewed_at = Some(now);
        self.reviewed_by = Some(actor.id);
        self.review_notes = notes.into();
        Ok(old)
    }

    pub fn mark_paid(&mut self, actor: &User) -> Result<()> {
        if !can_mark_reimbursement_paid(actor) {
            return Err(LedgerError::denied(actor.id, "only principals can mark reimbursements as paid"));
        }
        self.expect_status(ReimbursementStatus::Approved)?;
        self.status = ReimbursementStatus::Paid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    fn travel() -> ReimbursementType {
        ReimbursementType::new("Travel", "field trips", Some(Money::from_major(500)), true, now()).unwrap()
    }

    #[test]
    fn test_submit_review_pay() {
        let teacher = User::teacher("t");
        let principal = User::principal("p");
        let mut claim = Reimbursement::submit(&travel(), Money::from_major(120), "bus fare", &teacher, now()).unwrap();
        assert_eq!(claim.status, ReimbursementStatus::Pending);

        assert!(claim.mark_paid(&principal).is_err());
        claim.review(true, "ok", &principal, now()).unwrap();
        assert_eq!(claim.reviewed_by, Some(principal.id));

        assert!(matches!(claim.mark_paid(&teacher), Err(LedgerError::PermissionDenied { .. })));
        claim.mark_paid(&principal).unwrap();
        assert_eq!(claim.status, ReimbursementStatus::Paid);
    }

    #[test]
    fn test_submit_checks() {
        let teacher = User::teacher("t");
        assert!(Reimbursement::submit(&travel(), Money::from_major(501), "too much", &teacher, now()).is_err());
        assert!(Reimbursement::submit(&travel(), Money::from_major(10), "  ", &teacher, now()).is_err());
        assert!(matches!(
            Reimbursement::submit(&travel(), Money::from_major(10), "x", &User::student("s"), now()),
            Err(LedgerError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_auto_approved_type() {
        let supplies = ReimbursementType::new("Supplies", "", None, false, now()).unwrap();
        let claim = Reimbursement::submit(&supplies, Money::from_major(40), "chalk", &User::teacher("t"), now()).unwrap();
        assert_eq!(claim.status, ReimbursementStatus::Approved);
    }

    #[test]
    fn test_rejected_claim_is_final() {
        let teacher = User::teacher("t");
        let mut claim = Reimbursement::submit(&travel(), Money::from_major(50), "taxi", &teacher, now()).unwrap();
        claim.review(false, "no receipt", &teacher, now()).unwrap();
        assert_eq!(claim.status, ReimbursementStatus::Rejected);
        assert!(claim.review(true, "", &teacher, now()).is_err());
    }
}
