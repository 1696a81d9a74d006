use std::sync::Barrier;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use school_fees_rs::{
    DiscountRequest, Event, Fee, FeeLedger, FeeStatus, LedgerConfig, LedgerError, Money, NewFee,
    NewPayment, PaymentMethod, PaymentStatus, RefundRequest, RefundStatus, SafeTimeProvider,
    Student, TimeSource, User,
};

fn clock() -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
    ))
}

struct Office {
    ledger: FeeLedger,
    time: SafeTimeProvider,
    principal: User,
    teacher: User,
    pupil: User,
    student: Student,
}

fn office(config: LedgerConfig) -> Office {
    let time = clock();
    let ledger = FeeLedger::new(config).unwrap();
    let principal = ledger.bootstrap_principal(User::principal("principal"), &time).unwrap();
    let teacher = ledger.register_user(User::teacher("class-teacher"), &principal, &time).unwrap();
    let pupil = ledger.register_user(User::student("pupil"), &teacher, &time).unwrap();
    let student = ledger.enroll_student(pupil.id, None, &teacher, &time).unwrap();
    Office {
        ledger,
        time,
        principal,
        teacher,
        pupil,
        student,
    }
}

fn bill(office: &Office, amount: i64, due_date: NaiveDate) -> Fee {
    office
        .ledger
        .create_fee(
            NewFee::new(office.student.id, Money::from_major(amount), due_date).notes("term 1"),
            &office.principal,
            &office.time,
        )
        .unwrap()
}

fn next_month() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
}

fn completed(fee: &Fee, amount: i64) -> NewPayment {
    NewPayment::new(fee.id, Money::from_major(amount), PaymentMethod::Cash).completed()
}

#[test]
fn partial_payment_leaves_balance() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 5_000, next_month());

    office.ledger.create_payment(completed(&fee, 3_000), &office.teacher, &office.time).unwrap();

    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::from_major(2_000));
    assert_eq!(office.ledger.get_fee(fee.id, &office.pupil).unwrap().status, FeeStatus::Partial);
}

#[test]
fn second_payment_settles_fee() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 5_000, next_month());

    office.ledger.create_payment(completed(&fee, 3_000), &office.teacher, &office.time).unwrap();
    office.ledger.create_payment(completed(&fee, 2_000), &office.teacher, &office.time).unwrap();

    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::ZERO);
    assert_eq!(office.ledger.get_fee(fee.id, &office.pupil).unwrap().status, FeeStatus::Paid);

    let audit = office.ledger.fee_history(fee.id).unwrap();
    let transitions: Vec<(FeeStatus, FeeStatus)> = audit
        .iter()
        .filter_map(|entry| match entry.event {
            Event::FeeStatusChanged { old_status, new_status, .. } => Some((old_status, new_status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![(FeeStatus::Unpaid, FeeStatus::Partial), (FeeStatus::Partial, FeeStatus::Paid)]
    );
}

#[test]
fn percentage_discount_reduces_balance() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 4_000, next_month());

    office
        .ledger
        .apply_discount(fee.id, DiscountRequest::percentage(dec!(10), "sibling"), &office.teacher, &office.time)
        .unwrap();

    let fee = office.ledger.get_fee(fee.id, &office.teacher).unwrap();
    assert_eq!(fee.waived_amount, Money::from_major(400));
    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::from_major(3_600));
}

#[test]
fn waiver_clears_overdue_fee() {
    let office = office(LedgerConfig::standard().allowing_past_due_dates());
    let yesterday = office.time.now().date_naive() - Duration::days(1);
    let fee = bill(&office, 2_000, yesterday);

    assert!(office.ledger.is_overdue(fee.id, &office.time).unwrap());

    office
        .ledger
        .waive_amount(fee.id, Money::from_major(2_000), &office.principal, &office.time)
        .unwrap();

    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::ZERO);
    assert!(!office.ledger.is_overdue(fee.id, &office.time).unwrap());
    assert!(office.ledger.overdue_fees(&office.time).unwrap().is_empty());
}

#[test]
fn refund_marks_payment_refunded() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 3_000, next_month());
    let payment = office.ledger.create_payment(completed(&fee, 3_000), &office.teacher, &office.time).unwrap();

    let refund = office
        .ledger
        .process_refund(payment.id, RefundRequest::new(Money::from_major(1_000), "dup"), &office.teacher, &office.time)
        .unwrap();

    assert_eq!(refund.status, RefundStatus::Processed);
    assert_eq!(
        office.ledger.get_payment(payment.id, &office.pupil).unwrap().status,
        PaymentStatus::Refunded
    );
    // fee status is not rolled back by a refund
    assert_eq!(office.ledger.get_fee(fee.id, &office.pupil).unwrap().status, FeeStatus::Paid);
    assert!(office.ledger.fee_history(fee.id).unwrap().iter().any(|entry| matches!(
        entry.event,
        Event::RefundProcessed { refund_id, .. } if refund_id == refund.id
    )));

    assert!(matches!(
        office.ledger.process_refund(
            payment.id,
            RefundRequest::new(Money::from_major(1), "again"),
            &office.teacher,
            &office.time
        ),
        Err(LedgerError::PaymentNotRefundable { .. })
    ));
}

#[test]
fn concurrent_payments_cannot_overpay() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 5_000, next_month());
    let fee_id = fee.id;
    let barrier = Barrier::new(2);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = [&office.teacher, &office.principal]
            .into_iter()
            .map(|staff| {
                let ledger = &office.ledger;
                let barrier = &barrier;
                scope.spawn(move || {
                    let time = clock();
                    barrier.wait();
                    ledger.create_payment(
                        NewPayment::new(fee_id, Money::from_major(3_000), PaymentMethod::Upi).completed(),
                        staff,
                        &time,
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // the second writer sees the first one's payment and only 2000 left
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InvalidAmount { .. }))));
    assert_eq!(office.ledger.get_outstanding(fee_id).unwrap(), Money::from_major(2_000));
    assert_eq!(office.ledger.get_fee(fee_id, &office.pupil).unwrap().status, FeeStatus::Partial);
}

#[test]
fn concurrent_completed_payments_settle_once() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 3_000, next_month());
    let barrier = Barrier::new(2);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = [&office.teacher, &office.principal]
            .into_iter()
            .map(|staff| {
                let ledger = &office.ledger;
                let barrier = &barrier;
                let fee = &fee;
                scope.spawn(move || {
                    let time = clock();
                    barrier.wait();
                    ledger.create_payment(completed(fee, 3_000), staff, &time)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LedgerError::FeeAlreadyPaid { .. }) | Err(LedgerError::InvalidAmount { .. })
    )));
    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::ZERO);
    assert_eq!(office.ledger.payments_for_fee(fee.id, &office.teacher).unwrap().len(), 1);
}

#[test]
fn rejected_operations_leave_no_audit_entries() {
    let office = office(LedgerConfig::standard());
    let fee = bill(&office, 1_000, next_month());
    let before = office.ledger.audit_trail().unwrap();

    assert!(office
        .ledger
        .create_payment(completed(&fee, 1_001), &office.teacher, &office.time)
        .is_err());
    assert!(office
        .ledger
        .apply_discount(fee.id, DiscountRequest::percentage(dec!(150), "typo"), &office.teacher, &office.time)
        .is_err());
    assert!(office
        .ledger
        .waive_amount(fee.id, Money::from_major(5), &office.pupil, &office.time)
        .is_err());

    assert_eq!(office.ledger.audit_trail().unwrap(), before);
    assert_eq!(office.ledger.get_outstanding(fee.id).unwrap(), Money::from_major(1_000));
}

#[test]
fn late_fee_then_plan_view() {
    let office = office(LedgerConfig::standard().with_fixed_late_fee(Money::from_major(50)));
    let fee = bill(&office, 1_200, next_month());

    office.time.test_control().unwrap().advance(Duration::days(45));
    let late_fee = office.ledger.assess_late_fee(fee.id, &office.teacher, &office.time).unwrap();
    assert_eq!(late_fee.assessed_amount, Money::from_major(50));

    let today = office.time.now().date_naive();
    let plan_request = school_fees_rs::NewPaymentPlan::even_split(
        Money::from_major(1_200),
        4,
        today,
        today + Duration::days(90),
    );
    office
        .ledger
        .create_payment_plan(fee.id, plan_request, &office.pupil, &office.time)
        .unwrap();

    let view = office.ledger.fee_view(fee.id, &office.pupil, &office.time).unwrap();
    assert!(view.balance.is_overdue);
    assert_eq!(view.balance.outstanding_balance, Money::from_major(1_200));
    assert_eq!(view.balance.late_fee_total, Money::from_major(50));
    let plan = view.payment_plan.as_ref().unwrap();
    assert_eq!(plan.schedule.len(), 4);
    assert_eq!(plan.next_installment.as_ref().map(|i| i.due_date), Some(today));

    let json = view.to_json_pretty().unwrap();
    assert!(json.contains("\"late_fees\""));
}
