use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{
    ClassId, DiscountId, DiscountType, FeeId, FeeStatus, FeeTypeId, LateFeeId, PaymentId, PaymentPlanId,
    PaymentStatus, RefundId, ReimbursementId, ReimbursementStatus, StudentId, UserId,
};

/// audit-relevant transitions emitted by ledger operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // billing
    FeeCreated {
        fee_id: FeeId,
        student_id: StudentId,
        amount: Money,
        due_date: NaiveDate,
    },
    ClassBilled {
        class_id: ClassId,
        fee_type_id: Option<FeeTypeId>,
        fee_count: usize,
        amount: Money,
    },
    FeeAdjusted {
        fee_id: FeeId,
        old_amount: Money,
        new_amount: Money,
        old_waived: Money,
        new_waived: Money,
    },
    FeeDeleted {
        fee_id: FeeId,
        payments_removed: usize,
    },
    FeeStatusChanged {
        fee_id: FeeId,
        old_status: FeeStatus,
        new_status: FeeStatus,
    },

    // waivers
    AmountWaived {
        fee_id: FeeId,
        amount: Money,
        old_waived: Money,
        new_waived: Money,
    },
    DiscountApplied {
        fee_id: FeeId,
        discount_id: DiscountId,
        discount_type: DiscountType,
        resolved_amount: Money,
    },

    // payments
    PaymentRecorded {
        fee_id: FeeId,
        payment_id: PaymentId,
        amount: Money,
        status: PaymentStatus,
    },
    PaymentStatusChanged {
        fee_id: FeeId,
        payment_id: PaymentId,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },

    // refunds
    RefundRequested {
        fee_id: FeeId,
        payment_id: PaymentId,
        refund_id: RefundId,
        amount: Money,
    },
    RefundProcessed {
        fee_id: FeeId,
        payment_id: PaymentId,
        refund_id: RefundId,
        amount: Money,
    },
    RefundRejected {
        fee_id: FeeId,
        payment_id: PaymentId,
        refund_id: RefundId,
    },

    // ledger lines
    LateFeeAssessed {
        fee_id: FeeId,
        late_fee_id: LateFeeId,
        amount: Money,
        days_overdue: u32,
    },
    PaymentPlanCreated {
        fee_id: FeeId,
        plan_id: PaymentPlanId,
        total_installments: u32,
        installment_amount: Money,
    },

    // reimbursements
    ReimbursementSubmitted {
        reimbursement_id: ReimbursementId,
        amount: Money,
    },
    ReimbursementStatusChanged {
        reimbursement_id: ReimbursementId,
        old_status: ReimbursementStatus,
        new_status: ReimbursementStatus,
    },
}

impl Event {
    /// short action name used in logs
    pub fn action(&self) -> &'static str {
        match self {
            Event::FeeCreated { .. } => "fee_created",
            Event::ClassBilled { .. } => "class_billed",
            Event::FeeAdjusted { .. } => "fee_adjusted",
            Event::FeeDeleted { .. } => "fee_deleted",
            Event::FeeStatusChanged { .. } => "fee_status_changed",
            Event::AmountWaived { .. } => "amount_waived",
            Event::DiscountApplied { .. } => "discount_applied",
            Event::PaymentRecorded { .. } => "payment_recorded",
            Event::PaymentStatusChanged { .. } => "payment_status_changed",
            Event::RefundRequested { .. } => "refund_requested",
            Event::RefundProcessed { .. } => "refund_processed",
            Event::RefundRejected { .. } => "refund_rejected",
            Event::LateFeeAssessed { .. } => "late_fee_assessed",
            Event::PaymentPlanCreated { .. } => "payment_plan_created",
            Event::ReimbursementSubmitted { .. } => "reimbursement_submitted",
            Event::ReimbursementStatusChanged { .. } => "reimbursement_status_changed",
        }
    }

    /// fee the event concerns, when there is one
    pub fn fee_id(&self) -> Option<FeeId> {
        match self {
            Event::FeeCreated { fee_id, .. }
            | Event::FeeAdjusted { fee_id, .. }
            | Event::FeeDeleted { fee_id, .. }
            | Event::FeeStatusChanged { fee_id, .. }
            | Event::AmountWaived { fee_id, .. }
            | Event::DiscountApplied { fee_id, .. }
            | Event::PaymentRecorded { fee_id, .. }
            | Event::PaymentStatusChanged { fee_id, .. }
            | Event::RefundRequested { fee_id, .. }
            | Event::RefundProcessed { fee_id, .. }
            | Event::RefundRejected { fee_id, .. }
            | Event::LateFeeAssessed { fee_id, .. }
            | Event::PaymentPlanCreated { fee_id, .. } => Some(*fee_id),
            _ => None,
        }
    }

    /// payment the event concerns, when there is one
    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            Event::PaymentRecorded { payment_id, .. }
            | Event::PaymentStatusChanged { payment_id, .. }
            | Event::RefundRequested { payment_id, .. }
            | Event::RefundProcessed { payment_id, .. }
            | Event::RefundRejected { payment_id, .. } => Some(*payment_id),
            _ => None,
        }
    }
}

/// committed audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: UserId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// event store for collecting events during a unit of work
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// emit a status change only when the status moved
    pub fn emit_fee_status(&mut self, fee_id: FeeId, (old_status, new_status): (FeeStatus, FeeStatus)) {
        if old_status != new_status {
            self.emit(Event::FeeStatusChanged {
                fee_id,
                old_status,
                new_status,
            });
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
