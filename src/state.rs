use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::accounts::{SchoolClass, Student, User};
use crate::errors::{LedgerError, Result};
use crate::events::AuditEntry;
use crate::fees::{Discount, Fee, FeeType, LateFee};
use crate::payments::{Payment, PaymentPlan, Refund};
use crate::reimbursements::{Reimbursement, ReimbursementType};
use crate::types::{
    ClassId, FeeId, FeeTypeId, PaymentId, RefundId, ReimbursementId, ReimbursementTypeId,
    StudentId, UserId,
};

/// every record the ledger owns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub users: HashMap<UserId, User>,
    pub classes: HashMap<ClassId, SchoolClass>,
    pub students: HashMap<StudentId, Student>,
    pub fee_types: HashMap<FeeTypeId, FeeType>,
    pub fees: HashMap<FeeId, Fee>,
    pub payments: HashMap<PaymentId, Payment>,
    pub discounts: Vec<Discount>,
    pub refunds: HashMap<RefundId, Refund>,
    pub late_fees: Vec<LateFee>,
    pub payment_plans: HashMap<FeeId, PaymentPlan>,
    pub reimbursement_types: HashMap<ReimbursementTypeId, ReimbursementType>,
    pub reimbursements: HashMap<ReimbursementId, Reimbursement>,
    pub audit: Vec<AuditEntry>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, id: UserId) -> Result<&User> {
        self.users.get(&id).ok_or(LedgerError::UserNotFound { id })
    }

    pub fn class(&self, id: ClassId) -> Result<&SchoolClass> {
        self.classes.get(&id).ok_or(LedgerError::ClassNotFound { id })
    }

    pub fn student(&self, id: StudentId) -> Result<&Student> {
        self.students.get(&id).ok_or(LedgerError::StudentNotFound { id })
    }

    pub fn fee_type(&self, id: FeeTypeId) -> Result<&FeeType> {
        self.fee_types.get(&id).ok_or(LedgerError::FeeTypeNotFound { id })
    }

    pub fn fee(&self, id: FeeId) -> Result<&Fee> {
        self.fees.get(&id).ok_or(LedgerError::FeeNotFound { id })
    }

    pub fn payment(&self, id: PaymentId) -> Result<&Payment> {
        self.payments.get(&id).ok_or(LedgerError::PaymentNotFound { id })
    }

    pub fn refund(&self, id: RefundId) -> Result<&Refund> {
        self.refunds.get(&id).ok_or(LedgerError::RefundNotFound { id })
    }

    pub fn reimbursement_type(&self, id: ReimbursementTypeId) -> Result<&ReimbursementType> {
        self.reimbursement_types
            .get(&id)
            .ok_or(LedgerError::ReimbursementTypeNotFound { id })
    }

    pub fn reimbursement_mut(&mut self, id: ReimbursementId) -> Result<&mut Reimbursement> {
        self.reimbursements
            .get_mut(&id)
            .ok_or(LedgerError::ReimbursementNotFound { id })
    }

    /// payments for a fee, oldest first
    pub fn payments_for(&self, fee_id: FeeId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.fee_id == fee_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.payment_date);
        payments
    }

    pub fn discounts_for(&self, fee_id: FeeId) -> Vec<Discount> {
        self.discounts.iter().filter(|d| d.fee_id == fee_id).cloned().collect()
    }

    pub fn late_fees_for(&self, fee_id: FeeId) -> Vec<LateFee> {
        self.late_fees.iter().filter(|l| l.fee_id == fee_id).cloned().collect()
    }

    pub fn refunds_for(&self, payment_id: PaymentId) -> Vec<Refund> {
        let mut refunds: Vec<Refund> = self
            .refunds
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        refunds
    }

    pub fn plan_for(&self, fee_id: FeeId) -> Option<&PaymentPlan> {
        self.payment_plans.get(&fee_id)
    }

    pub fn fees_for_student(&self, student_id: StudentId) -> Vec<&Fee> {
        let mut fees: Vec<&Fee> = self.fees.values().filter(|f| f.student_id == student_id).collect();
        fees.sort_by_key(|f| f.due_date);
        fees
    }

    pub fn students_in(&self, class_id: ClassId) -> Vec<&Student> {
        let mut students: Vec<&Student> = self
            .students
            .values()
            .filter(|s| s.class_id == Some(class_id))
            .collect();
        students.sort_by_key(|s| s.id);
        students
    }

    /// exact, case-sensitive match
    pub fn transaction_id_in_use(&self, transaction_id: &str) -> bool {
        self.payments
            .values()
            .any(|p| p.transaction_id.as_deref() == Some(transaction_id))
    }

    /// hard delete of a fee and everything hanging off it; returns removed payment count
    pub fn remove_fee(&mut self, fee_id: FeeId) -> Result<usize> {
        self.fees.remove(&fee_id).ok_or(LedgerError::FeeNotFound { id: fee_id })?;

        let payment_ids: Vec<PaymentId> = self
            .payments
            .values()
            .filter(|p| p.fee_id == fee_id)
            .map(|p| p.id)
            .collect();
        for id in &payment_ids {
            self.payments.remove(id);
        }
        self.refunds.retain(|_, r| !payment_ids.contains(&r.payment_id));
        self.discounts.retain(|d| d.fee_id != fee_id);
        self.late_fees.retain(|l| l.fee_id != fee_id);
        self.payment_plans.remove(&fee_id);

        Ok(payment_ids.len())
    }
}
