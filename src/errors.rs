use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{FeeId, PaymentId, PaymentStatus, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        amount: Money,
        reason: String,
    },

    #[error("fee {fee_id} is already fully paid")]
    FeeAlreadyPaid {
        fee_id: FeeId,
    },

    #[error("payment {payment_id} is not refundable: status is {status}")]
    PaymentNotRefundable {
        payment_id: PaymentId,
        status: PaymentStatus,
    },

    #[error("permission denied for user {actor}: {action}")]
    PermissionDenied {
        actor: UserId,
        action: String,
    },

    #[error("transaction id already used: {transaction_id}")]
    DuplicateTransactionId {
        transaction_id: String,
    },

    #[error("a non-blank reason is required")]
    MissingReason,

    #[error("validation failed on {field}: {message}")]
    ValidationError {
        field: String,
        message: String,
    },

    #[error("invalid payment status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("invalid state: current {current}, expected {expected}")]
    InvalidState {
        current: String,
        expected: String,
    },

    #[error("fee not found: {id}")]
    FeeNotFound {
        id: Uuid,
    },

    #[error("fee type not found: {id}")]
    FeeTypeNotFound {
        id: Uuid,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: Uuid,
    },

    #[error("refund not found: {id}")]
    RefundNotFound {
        id: Uuid,
    },

    #[error("student not found: {id}")]
    StudentNotFound {
        id: Uuid,
    },

    #[error("class not found: {id}")]
    ClassNotFound {
        id: Uuid,
    },

    #[error("user not found: {id}")]
    UserNotFound {
        id: Uuid,
    },

    #[error("reimbursement not found: {id}")]
    ReimbursementNotFound {
        id: Uuid,
    },

    #[error("reimbursement type not found: {id}")]
    ReimbursementTypeNotFound {
        id: Uuid,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("storage error: {message}")]
    StorageError {
        message: String,
    },
}

impl LedgerError {
    pub(crate) fn invalid_amount(amount: Money, reason: impl Into<String>) -> Self {
        LedgerError::InvalidAmount {
            amount,
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn denied(actor: UserId, action: impl Into<String>) -> Self {
        LedgerError::PermissionDenied {
            actor,
            action: action.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
