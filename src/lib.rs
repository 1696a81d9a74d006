pub mod accounts;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod payments;
pub mod reimbursements;
pub mod serialization;
pub mod state;
pub mod store;
pub mod types;

// re-export key types
pub use accounts::{SchoolClass, Student, User};
pub use config::{AmountLimits, LateFeePolicy, LedgerConfig, ValidationRules};
pub use decimal::{Money, Percentage};
pub use errors::{LedgerError, Result};
pub use events::{AuditEntry, Event, EventStore};
pub use fees::{
    Discount, DiscountRequest, Fee, FeeAdjustment, FeeType, LateFee, NewClassFee, NewFee,
};
pub use ledger::FeeLedger;
pub use payments::{Installment, NewPayment, NewPaymentPlan, Payment, PaymentPlan, Refund, RefundRequest};
pub use reimbursements::{Reimbursement, ReimbursementType};
pub use serialization::{FeeView, StudentBalance};
pub use state::LedgerState;
pub use store::{InMemoryStore, LedgerStore};
pub use types::{
    ClassId, DiscountType, FeeCategory, FeeId, FeeStatus, FeeTypeId, PaymentId, PaymentMethod,
    PaymentStatus, RefundId, RefundStatus, ReimbursementId, ReimbursementStatus,
    ReimbursementTypeId, Role, StudentId, UserId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
