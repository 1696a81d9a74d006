/// serialization support for fees
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::fees::{completed_total, Discount, Fee, LateFee};
use crate::payments::{Installment, Payment, PaymentPlan};
use crate::state::LedgerState;
use crate::types::{FeeId, FeeStatus, FeeTypeId, StudentId};

/// serializable view of a fee with its derived balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeView {
    pub id: FeeId,
    pub student_id: StudentId,
    pub fee_type_id: Option<FeeTypeId>,
    pub status: FeeStatus,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub balance: BalanceView,
    pub payments: Vec<Payment>,
    pub discounts: Vec<Discount>,
    pub late_fees: Vec<LateFee>,
    pub payment_plan: Option<PlanView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub amount: Money,
    pub waived_amount: Money,
    pub total_paid: Money,
    pub outstanding_balance: Money,
    pub late_fee_total: Money,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanView {
    pub plan: PaymentPlan,
    pub schedule: Vec<Installment>,
    pub next_installment: Option<Installment>,
}

impl FeeView {
    pub fn from_state(state: &LedgerState, fee: &Fee, today: NaiveDate) -> Self {
        let payments = state.payments_for(fee.id);
        let late_fees = state.late_fees_for(fee.id);

        let balance = BalanceView {
            amount: fee.amount,
            waived_amount: fee.waived_amount,
            total_paid: completed_total(fee.id, &payments),
            outstanding_balance: fee.outstanding(&payments),
            late_fee_total: late_fees.iter().map(|l| l.assessed_amount).sum(),
            is_overdue: fee.is_overdue(today, &payments),
        };

        let payment_plan = state.plan_for(fee.id).map(|plan| PlanView {
            plan: plan.clone(),
            schedule: plan.schedule(),
            next_installment: plan.next_installment(today),
        });

        FeeView {
            id: fee.id,
            student_id: fee.student_id,
            fee_type_id: fee.fee_type_id,
            status: fee.status,
            due_date: fee.due_date,
            notes: fee.notes.clone(),
            created_at: fee.created_at,
            balance,
            payments,
            discounts: state.discounts_for(fee.id),
            late_fees,
            payment_plan,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// per-student totals across every fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentBalance {
    pub student_id: StudentId,
    pub fee_count: usize,
    pub total_billed: Money,
    pub total_waived: Money,
    pub total_paid: Money,
    pub outstanding: Money,
    pub overdue_count: usize,
}

impl StudentBalance {
    pub fn from_state(state: &LedgerState, student_id: StudentId, today: NaiveDate) -> Self {
        let mut balance = StudentBalance {
            student_id,
            fee_count: 0,
            total_billed: Money::ZERO,
            total_waived: Money::ZERO,
            total_paid: Money::ZERO,
            outstanding: Money::ZERO,
            overdue_count: 0,
        };

        for fee in state.fees_for_student(student_id) {
            let payments = state.payments_for(fee.id);
            balance.fee_count += 1;
            balance.total_billed += fee.amount;
            balance.total_waived += fee.waived_amount;
            balance.total_paid += completed_total(fee.id, &payments);
            balance.outstanding += fee.outstanding(&payments);
            if fee.is_overdue(today, &payments) {
                balance.overdue_count += 1;
            }
        }

        balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{NewPayment, NewPaymentPlan};
    use crate::types::PaymentMethod;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fee_view_json() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut state = LedgerState::new();
        let mut fee = Fee::new(Uuid::new_v4(), Uuid::new_v4(), Money::from_major(900), date(2024, 2, 1), None, None, now);

        let payment = Payment::from_request(
            NewPayment::new(fee.id, Money::from_major(300), PaymentMethod::Upi).completed(),
            None,
            now,
        );
        state.payments.insert(payment.id, payment);
        fee.reconcile(&state.payments_for(fee.id), now);

        let request = NewPaymentPlan::even_split(Money::from_major(600), 2, date(2024, 2, 1), date(2024, 3, 1));
        let plan = PaymentPlan::create(fee.id, &request, Money::from_major(600), &crate::config::LedgerConfig::standard(), now).unwrap();
        state.payment_plans.insert(fee.id, plan);
        state.fees.insert(fee.id, fee.clone());

        let view = FeeView::from_state(&state, &fee, date(2024, 2, 15));
        assert_eq!(view.balance.total_paid, Money::from_major(300));
        assert_eq!(view.balance.outstanding_balance, Money::from_major(600));
        assert!(view.balance.is_overdue);
        assert_eq!(view.status, FeeStatus::Partial);
        let plan = view.payment_plan.as_ref().unwrap();
        assert_eq!(plan.next_installment.as_ref().map(|i| i.number), Some(2));

        let json = view.to_json_pretty().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let outstanding: Money = serde_json::from_value(parsed["balance"]["outstanding_balance"].clone()).unwrap();
        assert_eq!(outstanding, Money::from_major(600));
        assert_eq!(parsed["payments"].as_array().map(|p| p.len()), Some(1));
    }
}
