use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::accounts::{
    can_delete_fees, can_manage_fees, can_process_payments, can_register, can_view_or_modify_fee,
    can_view_or_modify_payment, SchoolClass, Student, User,
};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{AuditEntry, Event};
use crate::fees::discount::apply_discount as discount_fee;
use crate::fees::{
    validate_billing, Discount, DiscountRequest, Fee, FeeAdjustment, FeeType, LateFee, NewClassFee,
    NewFee,
};
use crate::payments::refund::{process_refund as refund_payment, request_refund as open_refund};
use crate::payments::{
    admit_completion, NewPayment, NewPaymentPlan, Payment, PaymentPlan, Refund, RefundRequest,
};
use crate::reimbursements::{Reimbursement, ReimbursementType};
use crate::serialization::{FeeView, StudentBalance};
use crate::state::LedgerState;
use crate::store::{InMemoryStore, LedgerStore};
use crate::types::{
    ClassId, FeeCategory, FeeId, FeeStatus, FeeTypeId, PaymentId, PaymentStatus, RefundId,
    ReimbursementId, ReimbursementStatus, ReimbursementTypeId, Role, StudentId, UserId,
};

fn today(time_provider: &SafeTimeProvider) -> NaiveDate {
    time_provider.now().date_naive()
}

/// log a failed operation; denials are worth a warning
fn observe<T>(operation: &'static str, actor: &User, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        match err {
            LedgerError::PermissionDenied { .. } => {
                warn!(operation, actor = %actor.id, role = ?actor.role, error = %err, "access denied");
            }
            _ => debug!(operation, actor = %actor.id, error = %err, "operation rejected"),
        }
    }
    result
}

fn insert_user(state: &mut LedgerState, user: User) -> Result<User> {
    if user.username.trim().is_empty() {
        return Err(LedgerError::validation("username", "username is required"));
    }
    if state.users.values().any(|u| u.username == user.username) {
        return Err(LedgerError::validation(
            "username",
            format!("username {} is taken", user.username),
        ));
    }
    state.users.insert(user.id, user.clone());
    Ok(user)
}

/// school fee ledger
///
/// every mutating operation runs as one unit of work in the store: the
/// child record write and the fee reconciliation commit together or not at all.
pub struct FeeLedger<S: LedgerStore = InMemoryStore> {
    config: LedgerConfig,
    store: S,
}

impl FeeLedger<InMemoryStore> {
    /// create a ledger backed by the in-memory store
    pub fn new(config: LedgerConfig) -> Result<Self> {
        Self::with_store(config, InMemoryStore::new())
    }
}

impl<S: LedgerStore> FeeLedger<S> {
    pub fn with_store(config: LedgerConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // accounts

    /// create the first principal of an empty ledger
    pub fn bootstrap_principal(&self, user: User, time_provider: &SafeTimeProvider) -> Result<User> {
        let now = time_provider.now();
        let registering = user.clone();
        let result = self.store.atomically(user.id, now, |state, _| {
            if user.role != Role::Principal {
                return Err(LedgerError::denied(user.id, "the first account must be a principal"));
            }
            if !state.users.is_empty() {
                return Err(LedgerError::denied(user.id, "ledger already has accounts"));
            }
            insert_user(state, user)
        });
        let user = observe("bootstrap_principal", &registering, result)?;

        info!(user_id = %user.id, "principal bootstrapped");
        Ok(user)
    }

    /// add a user account on behalf of a registered staff member
    pub fn register_user(
        &self,
        user: User,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<User> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, _| {
            let registrar = state.user(actor.id)?;
            if !can_register(registrar, user.role) {
                return Err(LedgerError::denied(
                    actor.id,
                    format!("cannot create {:?} accounts", user.role),
                ));
            }
            insert_user(state, user)
        });
        let user = observe("register_user", actor, result)?;

        info!(user_id = %user.id, role = ?user.role, actor = %actor.id, "user registered");
        Ok(user)
    }

    pub fn register_class(
        &self,
        name: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<SchoolClass> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, _| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can register classes"));
            }
            if name.trim().is_empty() {
                return Err(LedgerError::validation("name", "class name is required"));
            }
            let class = SchoolClass::new(name.trim());
            state.classes.insert(class.id, class.clone());
            Ok(class)
        });
        let class = observe("register_class", actor, result)?;

        info!(class_id = %class.id, name = %class.name, actor = %actor.id, "class registered");
        Ok(class)
    }

    /// link a student account to an optional class
    pub fn enroll_student(
        &self,
        user_id: UserId,
        class_id: Option<ClassId>,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Student> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, _| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can enroll students"));
            }
            let user = state.user(user_id)?;
            if user.role != Role::Student {
                return Err(LedgerError::validation(
                    "user_id",
                    format!("user {} is not a student account", user.username),
                ));
            }
            if let Some(class_id) = class_id {
                state.class(class_id)?;
            }
            if state.students.values().any(|s| s.user_id == user_id) {
                return Err(LedgerError::validation("user_id", "user is already enrolled"));
            }

            let student = Student {
                id: uuid::Uuid::new_v4(),
                user_id,
                class_id,
            };
            state.students.insert(student.id, student.clone());
            Ok(student)
        });
        let student = observe("enroll_student", actor, result)?;

        info!(student_id = %student.id, user_id = %user_id, actor = %actor.id, "student enrolled");
        Ok(student)
    }

    // billing

    pub fn create_fee_type(
        &self,
        name: &str,
        description: &str,
        amount: Money,
        category: FeeCategory,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<FeeType> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, _| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can manage fee types"));
            }
            let fee_type = FeeType::new(name, description, amount, category)?;
            let taken = state
                .fee_types
                .values()
                .any(|t| t.name.to_lowercase() == fee_type.name.to_lowercase());
            if taken {
                return Err(LedgerError::validation(
                    "name",
                    format!("fee type {} already exists", fee_type.name),
                ));
            }
            state.fee_types.insert(fee_type.id, fee_type.clone());
            Ok(fee_type)
        });
        let fee_type = observe("create_fee_type", actor, result)?;

        info!(fee_type_id = %fee_type.id, name = %fee_type.name, amount = %fee_type.amount, "fee type created");
        Ok(fee_type)
    }

    /// bill a single student
    pub fn create_fee(
        &self,
        request: NewFee,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Fee> {
        let now = time_provider.now();
        let today = today(time_provider);
        let config = &self.config;

        let result = self.store.atomically(actor.id, now, |state, events| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can create fees"));
            }
            validate_billing(request.amount, request.due_date, request.notes.as_deref(), today, config)?;
            let student_user_id = state.student(request.student_id)?.user_id;
            if let Some(fee_type_id) = request.fee_type_id {
                state.fee_type(fee_type_id)?;
            }

            let fee = Fee::new(
                request.student_id,
                student_user_id,
                request.amount,
                request.due_date,
                request.notes,
                request.fee_type_id,
                now,
            );
            events.emit(Event::FeeCreated {
                fee_id: fee.id,
                student_id: fee.student_id,
                amount: fee.amount,
                due_date: fee.due_date,
            });
            state.fees.insert(fee.id, fee.clone());
            Ok(fee)
        });
        let fee = observe("create_fee", actor, result)?;

        info!(
            fee_id = %fee.id,
            student_id = %fee.student_id,
            amount = %fee.amount,
            due_date = %fee.due_date,
            actor = %actor.id,
            "fee created"
        );
        Ok(fee)
    }

    /// bill every student in a class in one unit of work
    pub fn create_class_fees(
        &self,
        request: NewClassFee,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Vec<Fee>> {
        let now = time_provider.now();
        let today = today(time_provider);
        let config = &self.config;
        let class_id = request.class_id;

        let result = self.store.atomically(actor.id, now, |state, events| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can create fees"));
            }
            state.class(class_id)?;
            let fee_type = request.fee_type_id.map(|id| state.fee_type(id)).transpose()?;
            let amount = request.resolve_amount(fee_type)?;
            validate_billing(amount, request.due_date, request.notes.as_deref(), today, config)?;

            let fees: Vec<Fee> = state
                .students_in(class_id)
                .into_iter()
                .map(|student| {
                    Fee::new(
                        student.id,
                        student.user_id,
                        amount,
                        request.due_date,
                        request.notes.clone(),
                        request.fee_type_id,
                        now,
                    )
                })
                .collect();

            for fee in &fees {
                events.emit(Event::FeeCreated {
                    fee_id: fee.id,
                    student_id: fee.student_id,
                    amount: fee.amount,
                    due_date: fee.due_date,
                });
                state.fees.insert(fee.id, fee.clone());
            }
            events.emit(Event::ClassBilled {
                class_id,
                fee_type_id: request.fee_type_id,
                fee_count: fees.len(),
                amount,
            });
            Ok((fees, amount))
        });
        let (fees, amount) = observe("create_class_fees", actor, result)?;

        info!(class_id = %class_id, fee_count = fees.len(), amount = %amount, actor = %actor.id, "class billed");
        Ok(fees)
    }

    /// administrative edit; the only path that can move a fee's status backward
    pub fn adjust_fee(
        &self,
        fee_id: FeeId,
        adjustment: FeeAdjustment,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Fee> {
        let now = time_provider.now();
        let config = &self.config;

        let result = self.store.atomically(actor.id, now, |state, events| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can adjust fees"));
            }
            let fee = state.fee(fee_id)?.clone();
            let payments = state.payments_for(fee_id);
            let updated = adjustment.apply(&fee, &payments, config, now)?;

            events.emit(Event::FeeAdjusted {
                fee_id,
                old_amount: fee.amount,
                new_amount: updated.amount,
                old_waived: fee.waived_amount,
                new_waived: updated.waived_amount,
            });
            events.emit_fee_status(fee_id, (fee.status, updated.status));
            state.fees.insert(fee_id, updated.clone());
            Ok((fee.status, updated))
        });
        let (old_status, fee) = observe("adjust_fee", actor, result)?;

        info!(
            fee_id = %fee_id,
            amount = %fee.amount,
            waived_amount = %fee.waived_amount,
            old_status = ?old_status,
            new_status = ?fee.status,
            actor = %actor.id,
            "fee adjusted"
        );
        Ok(fee)
    }

    /// hard delete of a fee and everything recorded against it
    pub fn delete_fee(
        &self,
        fee_id: FeeId,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<usize> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            if !can_delete_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only principals can delete fees"));
            }
            let payments_removed = state.remove_fee(fee_id)?;
            events.emit(Event::FeeDeleted {
                fee_id,
                payments_removed,
            });
            Ok(payments_removed)
        });
        let payments_removed = observe("delete_fee", actor, result)?;

        warn!(fee_id = %fee_id, payments_removed, actor = %actor.id, "fee deleted");
        Ok(payments_removed)
    }

    // payments

    /// admit and record a payment, reconciling the fee in the same unit of work
    pub fn create_payment(
        &self,
        request: NewPayment,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Payment> {
        let now = time_provider.now();
        let config = &self.config;

        let result = self.store.atomically(actor.id, now, |state, events| {
            // outstanding is read under the store lock, after any earlier writer committed
            let mut fee = state.fee(request.fee_id)?.clone();
            let payments = state.payments_for(fee.id);
            fee.admit_payment(request.amount, actor, &payments)?;
            request.validate_fields(actor, config)?;
            if let Some(transaction_id) = request.normalized_transaction_id() {
                if state.transaction_id_in_use(transaction_id) {
                    return Err(LedgerError::DuplicateTransactionId {
                        transaction_id: transaction_id.to_string(),
                    });
                }
            }

            let processed_by = (request.status == PaymentStatus::Completed).then_some(actor.id);
            let payment = Payment::from_request(request, processed_by, now);
            events.emit(Event::PaymentRecorded {
                fee_id: fee.id,
                payment_id: payment.id,
                amount: payment.amount,
                status: payment.status,
            });
            state.payments.insert(payment.id, payment.clone());

            let statuses = fee.reconcile(&state.payments_for(fee.id), now);
            events.emit_fee_status(fee.id, statuses);
            state.fees.insert(fee.id, fee);
            Ok((payment, statuses))
        });
        let (payment, (old_status, new_status)) = observe("create_payment", actor, result)?;

        info!(
            fee_id = %payment.fee_id,
            payment_id = %payment.id,
            amount = %payment.amount,
            method = ?payment.payment_method,
            status = %payment.status,
            fee_status_before = ?old_status,
            fee_status_after = ?new_status,
            actor = %actor.id,
            "payment recorded"
        );
        Ok(payment)
    }

    /// move a payment through its lifecycle; completion re-runs admission
    pub fn update_payment_status(
        &self,
        payment_id: PaymentId,
        next: PaymentStatus,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Payment> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut payment = state.payment(payment_id)?.clone();
            let mut fee = state.fee(payment.fee_id)?.clone();
            if !can_view_or_modify_payment(actor, &payment, &fee) {
                return Err(LedgerError::denied(actor.id, "cannot modify this payment"));
            }

            let old = payment.transition_to(next, actor, now)?;
            if next == PaymentStatus::Completed {
                admit_completion(&fee, &payment, actor, &state.payments_for(fee.id))?;
            }
            events.emit(Event::PaymentStatusChanged {
                fee_id: fee.id,
                payment_id,
                old_status: old,
                new_status: next,
            });
            state.payments.insert(payment_id, payment.clone());

            let statuses = fee.reconcile(&state.payments_for(fee.id), now);
            events.emit_fee_status(fee.id, statuses);
            state.fees.insert(fee.id, fee);
            Ok((payment, old, statuses))
        });
        let (payment, old, (fee_before, fee_after)) = observe("update_payment_status", actor, result)?;

        info!(
            payment_id = %payment_id,
            fee_id = %payment.fee_id,
            amount = %payment.amount,
            old_status = %old,
            new_status = %payment.status,
            fee_status_before = ?fee_before,
            fee_status_after = ?fee_after,
            actor = %actor.id,
            "payment status changed"
        );
        Ok(payment)
    }

    // waivers

    pub fn apply_discount(
        &self,
        fee_id: FeeId,
        request: DiscountRequest,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Discount> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut fee = state.fee(fee_id)?.clone();
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can apply discounts"));
            }
            let payments = state.payments_for(fee_id);
            let outstanding = fee.outstanding(&payments);
            if outstanding.is_zero() {
                return Err(LedgerError::invalid_amount(outstanding, "fee has no outstanding balance"));
            }

            let old_status = fee.status;
            let old_waived = fee.waived_amount;
            let discount = discount_fee(&mut fee, &request, &payments, actor.id, now)?;
            events.emit(Event::DiscountApplied {
                fee_id,
                discount_id: discount.id,
                discount_type: discount.discount_type,
                resolved_amount: discount.resolved_amount,
            });
            events.emit_fee_status(fee_id, (old_status, fee.status));
            state.discounts.push(discount.clone());
            let statuses = (old_status, fee.status);
            state.fees.insert(fee_id, fee);
            Ok((discount, old_waived, statuses))
        });
        let (discount, old_waived, (old_status, new_status)) = observe("apply_discount", actor, result)?;

        info!(
            fee_id = %fee_id,
            discount_id = %discount.id,
            discount_type = ?discount.discount_type,
            value = %discount.value,
            amount = %discount.resolved_amount,
            old_waived = %old_waived,
            old_status = ?old_status,
            new_status = ?new_status,
            actor = %actor.id,
            "discount applied"
        );
        Ok(discount)
    }

    /// waive part of a fee's outstanding balance
    pub fn waive_amount(
        &self,
        fee_id: FeeId,
        amount: Money,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Fee> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut fee = state.fee(fee_id)?.clone();
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can waive fees"));
            }
            let old_status = fee.status;
            let old_waived = fee.waived_amount;
            fee.waive(amount, &state.payments_for(fee_id), now)?;

            events.emit(Event::AmountWaived {
                fee_id,
                amount,
                old_waived,
                new_waived: fee.waived_amount,
            });
            events.emit_fee_status(fee_id, (old_status, fee.status));
            state.fees.insert(fee_id, fee.clone());
            Ok((fee, old_status))
        });
        let (fee, old_status) = observe("waive_amount", actor, result)?;

        info!(
            fee_id = %fee_id,
            amount = %amount,
            waived_amount = %fee.waived_amount,
            old_status = ?old_status,
            new_status = ?fee.status,
            actor = %actor.id,
            "amount waived"
        );
        Ok(fee)
    }

    // refunds

    /// refund a completed payment immediately; the fee keeps its status
    pub fn process_refund(
        &self,
        payment_id: PaymentId,
        request: RefundRequest,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Refund> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut payment = state.payment(payment_id)?.clone();
            let refund = refund_payment(&mut payment, &request, actor, now)?;

            events.emit(Event::RefundProcessed {
                fee_id: payment.fee_id,
                payment_id,
                refund_id: refund.id,
                amount: refund.amount,
            });
            events.emit(Event::PaymentStatusChanged {
                fee_id: payment.fee_id,
                payment_id,
                old_status: PaymentStatus::Completed,
                new_status: payment.status,
            });
            state.payments.insert(payment_id, payment);
            state.refunds.insert(refund.id, refund.clone());
            Ok(refund)
        });
        let refund = observe("process_refund", actor, result)?;

        warn!(
            payment_id = %payment_id,
            refund_id = %refund.id,
            amount = %refund.amount,
            reason = %refund.reason,
            actor = %actor.id,
            "payment refunded"
        );
        Ok(refund)
    }

    /// open a refund request for staff review
    pub fn request_refund(
        &self,
        payment_id: PaymentId,
        request: RefundRequest,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Refund> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let payment = state.payment(payment_id)?;
            let fee = state.fee(payment.fee_id)?;
            if !can_view_or_modify_payment(actor, payment, fee) {
                return Err(LedgerError::denied(actor.id, "cannot request a refund for this payment"));
            }
            let refund = open_refund(payment, &request, &state.refunds_for(payment_id), actor, now)?;

            events.emit(Event::RefundRequested {
                fee_id: fee.id,
                payment_id,
                refund_id: refund.id,
                amount: refund.amount,
            });
            state.refunds.insert(refund.id, refund.clone());
            Ok(refund)
        });
        let refund = observe("request_refund", actor, result)?;

        info!(payment_id = %payment_id, refund_id = %refund.id, amount = %refund.amount, actor = %actor.id, "refund requested");
        Ok(refund)
    }

    pub fn approve_refund(
        &self,
        refund_id: RefundId,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Refund> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut refund = state.refund(refund_id)?.clone();
            let mut payment = state.payment(refund.payment_id)?.clone();
            let old_status = payment.status;
            refund.approve(&mut payment, actor, now)?;

            events.emit(Event::RefundProcessed {
                fee_id: payment.fee_id,
                payment_id: payment.id,
                refund_id,
                amount: refund.amount,
            });
            events.emit(Event::PaymentStatusChanged {
                fee_id: payment.fee_id,
                payment_id: payment.id,
                old_status,
                new_status: payment.status,
            });
            state.payments.insert(payment.id, payment);
            state.refunds.insert(refund_id, refund.clone());
            Ok(refund)
        });
        let refund = observe("approve_refund", actor, result)?;

        warn!(
            payment_id = %refund.payment_id,
            refund_id = %refund_id,
            amount = %refund.amount,
            actor = %actor.id,
            "refund approved"
        );
        Ok(refund)
    }

    pub fn reject_refund(
        &self,
        refund_id: RefundId,
        reason: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Refund> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let mut refund = state.refund(refund_id)?.clone();
            let fee_id = state.payment(refund.payment_id)?.fee_id;
            refund.reject(reason, actor, now)?;

            events.emit(Event::RefundRejected {
                fee_id,
                payment_id: refund.payment_id,
                refund_id,
            });
            state.refunds.insert(refund_id, refund.clone());
            Ok(refund)
        });
        let refund = observe("reject_refund", actor, result)?;

        warn!(payment_id = %refund.payment_id, refund_id = %refund_id, reason, actor = %actor.id, "refund rejected");
        Ok(refund)
    }

    // late fees and plans

    /// record a penalty line against an overdue fee
    pub fn assess_late_fee(
        &self,
        fee_id: FeeId,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<LateFee> {
        let now = time_provider.now();
        let today = today(time_provider);
        let policy = &self.config.late_fee;

        let result = self.store.atomically(actor.id, now, |state, events| {
            if !can_manage_fees(actor) {
                return Err(LedgerError::denied(actor.id, "only staff can assess late fees"));
            }
            let fee = state.fee(fee_id)?;
            let late_fee = LateFee::assess(fee, &state.payments_for(fee_id), policy, today, now)?;

            events.emit(Event::LateFeeAssessed {
                fee_id,
                late_fee_id: late_fee.id,
                amount: late_fee.assessed_amount,
                days_overdue: late_fee.days_overdue,
            });
            state.late_fees.push(late_fee.clone());
            Ok(late_fee)
        });
        let late_fee = observe("assess_late_fee", actor, result)?;

        info!(
            fee_id = %fee_id,
            late_fee_id = %late_fee.id,
            amount = %late_fee.assessed_amount,
            days_overdue = late_fee.days_overdue,
            actor = %actor.id,
            "late fee assessed"
        );
        Ok(late_fee)
    }

    /// sum of the penalty lines on a fee; never part of its outstanding balance
    pub fn late_fee_total(&self, fee_id: FeeId) -> Result<Money> {
        self.store.read(|state| -> Result<Money> {
            state.fee(fee_id)?;
            Ok(state.late_fees_for(fee_id).iter().map(|l| l.assessed_amount).sum())
        })?
    }

    pub fn create_payment_plan(
        &self,
        fee_id: FeeId,
        request: NewPaymentPlan,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentPlan> {
        let now = time_provider.now();
        let config = &self.config;
        let result = self.store.atomically(actor.id, now, |state, events| {
            let fee = state.fee(fee_id)?;
            if !can_view_or_modify_fee(actor, fee) {
                return Err(LedgerError::denied(actor.id, "cannot create a plan for this fee"));
            }
            if fee.status == FeeStatus::Paid {
                return Err(LedgerError::FeeAlreadyPaid { fee_id });
            }
            if state.plan_for(fee_id).is_some() {
                return Err(LedgerError::validation("fee_id", "fee already has a payment plan"));
            }
            let outstanding = fee.outstanding(&state.payments_for(fee_id));
            let plan = PaymentPlan::create(fee_id, &request, outstanding, config, now)?;

            events.emit(Event::PaymentPlanCreated {
                fee_id,
                plan_id: plan.id,
                total_installments: plan.total_installments,
                installment_amount: plan.installment_amount,
            });
            state.payment_plans.insert(fee_id, plan.clone());
            Ok(plan)
        });
        let plan = observe("create_payment_plan", actor, result)?;

        info!(
            fee_id = %fee_id,
            plan_id = %plan.id,
            installments = plan.total_installments,
            installment_amount = %plan.installment_amount,
            actor = %actor.id,
            "payment plan created"
        );
        Ok(plan)
    }

    // reimbursements

    pub fn create_reimbursement_type(
        &self,
        name: &str,
        description: &str,
        max_amount: Option<Money>,
        requires_approval: bool,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<ReimbursementType> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, _| {
            if actor.role != Role::Principal {
                return Err(LedgerError::denied(actor.id, "only principals can manage reimbursement types"));
            }
            let kind = ReimbursementType::new(name, description, max_amount, requires_approval, now)?;
            state.reimbursement_types.insert(kind.id, kind.clone());
            Ok(kind)
        });
        let kind = observe("create_reimbursement_type", actor, result)?;

        info!(reimbursement_type_id = %kind.id, name = %kind.name, actor = %actor.id, "reimbursement type created");
        Ok(kind)
    }

    pub fn submit_reimbursement(
        &self,
        reimbursement_type_id: ReimbursementTypeId,
        amount: Money,
        description: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Reimbursement> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let kind = state.reimbursement_type(reimbursement_type_id)?;
            let claim = Reimbursement::submit(kind, amount, description, actor, now)?;

            events.emit(Event::ReimbursementSubmitted {
                reimbursement_id: claim.id,
                amount,
            });
            state.reimbursements.insert(claim.id, claim.clone());
            Ok(claim)
        });
        let claim = observe("submit_reimbursement", actor, result)?;

        info!(
            reimbursement_id = %claim.id,
            amount = %claim.amount,
            status = ?claim.status,
            actor = %actor.id,
            "reimbursement submitted"
        );
        Ok(claim)
    }

    pub fn approve_reimbursement(
        &self,
        reimbursement_id: ReimbursementId,
        notes: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Reimbursement> {
        self.review_reimbursement(reimbursement_id, true, notes, actor, time_provider)
    }

    pub fn reject_reimbursement(
        &self,
        reimbursement_id: ReimbursementId,
        notes: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Reimbursement> {
        self.review_reimbursement(reimbursement_id, false, notes, actor, time_provider)
    }

    fn review_reimbursement(
        &self,
        reimbursement_id: ReimbursementId,
        approve: bool,
        notes: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Reimbursement> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let claim = state.reimbursement_mut(reimbursement_id)?;
            let old_status = claim.review(approve, notes, actor, now)?;
            events.emit(Event::ReimbursementStatusChanged {
                reimbursement_id,
                old_status,
                new_status: claim.status,
            });
            Ok(claim.clone())
        });
        let claim = observe("review_reimbursement", actor, result)?;

        info!(
            reimbursement_id = %reimbursement_id,
            status = ?claim.status,
            actor = %actor.id,
            "reimbursement reviewed"
        );
        Ok(claim)
    }

    pub fn mark_reimbursement_paid(
        &self,
        reimbursement_id: ReimbursementId,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Reimbursement> {
        let now = time_provider.now();
        let result = self.store.atomically(actor.id, now, |state, events| {
            let claim = state.reimbursement_mut(reimbursement_id)?;
            claim.mark_paid(actor)?;
            events.emit(Event::ReimbursementStatusChanged {
                reimbursement_id,
                old_status: ReimbursementStatus::Approved,
                new_status: ReimbursementStatus::Paid,
            });
            Ok(claim.clone())
        });
        let claim = observe("mark_reimbursement_paid", actor, result)?;

        info!(reimbursement_id = %reimbursement_id, amount = %claim.amount, actor = %actor.id, "reimbursement paid");
        Ok(claim)
    }

    // queries

    pub fn get_fee(&self, fee_id: FeeId, actor: &User) -> Result<Fee> {
        let result = self.store.read(|state| -> Result<Fee> {
            let fee = state.fee(fee_id)?;
            if !can_view_or_modify_fee(actor, fee) {
                return Err(LedgerError::denied(actor.id, "cannot view this fee"));
            }
            Ok(fee.clone())
        });
        observe("get_fee", actor, result?)
    }

    pub fn get_payment(&self, payment_id: PaymentId, actor: &User) -> Result<Payment> {
        let result = self.store.read(|state| -> Result<Payment> {
            let payment = state.payment(payment_id)?;
            let fee = state.fee(payment.fee_id)?;
            if !can_view_or_modify_payment(actor, payment, fee) {
                return Err(LedgerError::denied(actor.id, "cannot view this payment"));
            }
            Ok(payment.clone())
        });
        observe("get_payment", actor, result?)
    }

    pub fn payments_for_fee(&self, fee_id: FeeId, actor: &User) -> Result<Vec<Payment>> {
        let result = self.store.read(|state| -> Result<Vec<Payment>> {
            let fee = state.fee(fee_id)?;
            if !can_view_or_modify_fee(actor, fee) {
                return Err(LedgerError::denied(actor.id, "cannot view this fee"));
            }
            Ok(state.payments_for(fee_id))
        });
        observe("payments_for_fee", actor, result?)
    }

    pub fn refunds_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Refund>> {
        self.store.read(|state| -> Result<Vec<Refund>> {
            state.payment(payment_id)?;
            Ok(state.refunds_for(payment_id))
        })?
    }

    /// outstanding balance, recomputed from the current payments
    pub fn get_outstanding(&self, fee_id: FeeId) -> Result<Money> {
        self.store.read(|state| -> Result<Money> {
            let fee = state.fee(fee_id)?;
            Ok(fee.outstanding(&state.payments_for(fee_id)))
        })?
    }

    pub fn is_overdue(&self, fee_id: FeeId, time_provider: &SafeTimeProvider) -> Result<bool> {
        let today = today(time_provider);
        self.store.read(|state| -> Result<bool> {
            let fee = state.fee(fee_id)?;
            Ok(fee.is_overdue(today, &state.payments_for(fee_id)))
        })?
    }

    /// every overdue fee, earliest due date first
    pub fn overdue_fees(&self, time_provider: &SafeTimeProvider) -> Result<Vec<Fee>> {
        let today = today(time_provider);
        self.store.read(|state| {
            let mut fees: Vec<Fee> = state
                .fees
                .values()
                .filter(|fee| fee.is_overdue(today, &state.payments_for(fee.id)))
                .cloned()
                .collect();
            fees.sort_by_key(|fee| (fee.due_date, fee.created_at));
            fees
        })
    }

    pub fn student_balance(
        &self,
        student_id: StudentId,
        time_provider: &SafeTimeProvider,
    ) -> Result<StudentBalance> {
        let today = today(time_provider);
        self.store.read(|state| -> Result<StudentBalance> {
            state.student(student_id)?;
            Ok(StudentBalance::from_state(state, student_id, today))
        })?
    }

    pub fn fee_view(
        &self,
        fee_id: FeeId,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<FeeView> {
        let today = today(time_provider);
        let result = self.store.read(|state| -> Result<FeeView> {
            let fee = state.fee(fee_id)?;
            if !can_view_or_modify_fee(actor, fee) {
                return Err(LedgerError::denied(actor.id, "cannot view this fee"));
            }
            Ok(FeeView::from_state(state, fee, today))
        });
        observe("fee_view", actor, result?)
    }

    pub fn get_fee_type(&self, fee_type_id: FeeTypeId) -> Result<FeeType> {
        self.store.read(|state| state.fee_type(fee_type_id).cloned())?
    }

    pub fn payment_plan(&self, fee_id: FeeId) -> Result<Option<PaymentPlan>> {
        self.store.read(|state| state.plan_for(fee_id).cloned())
    }

    /// committed audit entries, oldest first
    pub fn audit_trail(&self) -> Result<Vec<AuditEntry>> {
        self.store.read(|state| state.audit.clone())
    }

    /// audit entries touching one fee
    pub fn fee_history(&self, fee_id: FeeId) -> Result<Vec<AuditEntry>> {
        self.store.read(|state| {
            state
                .audit
                .iter()
                .filter(|entry| entry.event.fee_id() == Some(fee_id))
                .cloned()
                .collect()
        })
    }

    /// audit entries touching one payment, its refunds included
    pub fn payment_history(&self, payment_id: PaymentId) -> Result<Vec<AuditEntry>> {
        self.store.read(|state| -> Result<Vec<AuditEntry>> {
            state.payment(payment_id)?;
            Ok(state
                .audit
                .iter()
                .filter(|entry| entry.event.payment_id() == Some(payment_id))
                .cloned()
                .collect())
        })?
    }

    /// staff can see everything; a student only their own fees
    pub fn fees_visible_to(&self, actor: &User) -> Result<Vec<Fee>> {
        self.store.read(|state| {
            let mut fees: Vec<Fee> = state
                .fees
                .values()
                .filter(|fee| can_view_or_modify_fee(actor, fee))
                .cloned()
                .collect();
            fees.sort_by_key(|fee| (fee.due_date, fee.created_at));
            fees
        })
    }

    /// total completed payments recorded by the ledger
    pub fn total_collected(&self, actor: &User) -> Result<Money> {
        if !can_process_payments(actor) {
            return observe(
                "total_collected",
                actor,
                Err(LedgerError::denied(actor.id, "only staff can view collections")),
            );
        }
        self.store.read(|state| {
            state
                .payments
                .values()
                .filter(|p| p.is_completed())
                .map(|p| p.amount)
                .sum()
        })
    }

    /// percentage discount shorthand
    pub fn apply_percentage_discount(
        &self,
        fee_id: FeeId,
        percentage: Decimal,
        reason: &str,
        actor: &User,
        time_provider: &SafeTimeProvider,
    ) -> Result<Discount> {
        self.apply_discount(fee_id, DiscountRequest::percentage(percentage, reason), actor, time_provider)
    }
}
