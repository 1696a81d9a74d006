//! user accounts and the role-based permission predicates that gate every
//! fee and payment operation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fees::Fee;
use crate::payments::Payment;
use crate::types::{ClassId, Role, StudentId, UserId};

/// an account acting on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

impl User {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role,
        }
    }

    pub fn principal(username: impl Into<String>) -> Self {
        Self::new(username, Role::Principal)
    }

    pub fn teacher(username: impl Into<String>) -> Self {
        Self::new(username, Role::Teacher)
    }

    pub fn student(username: impl Into<String>) -> Self {
        Self::new(username, Role::Student)
    }
}

/// student record linking a user account to a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub user_id: UserId,
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolClass {
    pub id: ClassId,
    pub name: String,
}

impl SchoolClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// staff may touch any fee, students only their own
pub fn can_view_or_modify_fee(actor: &User, fee: &Fee) -> bool {
    match actor.role {
        Role::Principal | Role::Teacher => true,
        Role::Student => fee.student_user_id == actor.id,
    }
}

/// same rule as fees, evaluated through the payment's parent fee
pub fn can_view_or_modify_payment(actor: &User, payment: &Payment, fee: &Fee) -> bool {
    payment.fee_id == fee.id && can_view_or_modify_fee(actor, fee)
}

pub fn can_manage_fees(actor: &User) -> bool {
    actor.role.is_staff()
}

pub fn can_process_payments(actor: &User) -> bool {
    actor.role.is_staff()
}

pub fn can_process_refunds(actor: &User) -> bool {
    actor.role.is_staff()
}

pub fn can_delete_fees(actor: &User) -> bool {
    actor.role == Role::Principal
}

pub fn can_review_reimbursements(actor: &User) -> bool {
    actor.role.is_staff()
}

pub fn can_mark_reimbursement_paid(actor: &User) -> bool {
    actor.role == Role::Principal
}

/// principals assign any role; teachers may only open student accounts
pub fn can_register(actor: &User, role: Role) -> bool {
    match actor.role {
        Role::Principal => true,
        Role::Teacher => role == Role::Student,
        Role::Student => false,
    }
}
