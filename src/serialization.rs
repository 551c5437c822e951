/// serialization support for schedules
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::Booking;
use crate::decimal::{Money, Rate};
use crate::payments::Payment;
use crate::schedule::{sort_by_due_date, Installment, PaymentSchedule};
use crate::types::{
    BookingId, BookingStatus, InstallmentId, InstallmentStatus, InstallmentType, PaymentCategory,
    PaymentId, PaymentMethod, PaymentStatus, PlanId, ScheduleId, ScheduleStatus,
};

/// reply to a manual payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub schedule_id: ScheduleId,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub pending_amount: Money,
    /// completed payments, refunds included
    pub payment_count: usize,
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl ScheduleSummary {
    pub fn from_schedule(schedule: &PaymentSchedule, payments: &[Payment]) -> Self {
        let completed: Vec<&Payment> = payments
            .iter()
            .filter(|p| p.schedule_id == schedule.id && p.is_completed())
            .collect();

        ScheduleSummary {
            schedule_id: schedule.id,
            total_amount: schedule.total_amount,
            paid_amount: schedule.paid_amount,
            pending_amount: schedule.pending_amount,
            payment_count: completed.len(),
            last_payment_date: completed.iter().map(|p| p.payment_date).max(),
        }
    }
}

/// serializable view of a schedule with its obligations and payments
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleView {
    pub id: ScheduleId,
    pub plan_id: Option<PlanId>,
    pub status: ScheduleStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub booking: BookingView,
    pub balances: BalanceView,
    pub installments: Vec<InstallmentView>,
    pub payments: Vec<PaymentView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookingView {
    pub id: BookingId,
    pub status: BookingStatus,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub pending_amount: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceView {
    pub total_amount: Money,
    pub down_payment: Money,
    pub required_down_payment: Money,
    pub paid_amount: Money,
    pub pending_amount: Money,
    pub overdue_amount: Money,
    pub total_late_fees: Money,
    pub late_fee_rate: Rate,
    pub next_due_date: Option<NaiveDate>,
    pub next_due_amount: Option<Money>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstallmentView {
    pub id: InstallmentId,
    pub sequence: u32,
    pub installment_type: InstallmentType,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub late_fee: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub category: PaymentCategory,
    pub payment_date: DateTime<Utc>,
    pub reference_number: Option<String>,
    pub refund_of: Option<PaymentId>,
}

impl ScheduleView {
    pub fn build(
        booking: &Booking,
        schedule: &PaymentSchedule,
        installments: &[Installment],
        payments: &[Payment],
    ) -> Self {
        let mut owned: Vec<Installment> = installments
            .iter()
            .filter(|i| i.schedule_id == schedule.id)
            .cloned()
            .collect();
        sort_by_due_date(&mut owned);

        let overdue_amount = owned
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .map(|i| i.amount)
            .sum();
        let next_open = owned.iter().find(|i| i.is_open());

        ScheduleView {
            id: schedule.id,
            plan_id: schedule.plan_id,
            status: schedule.status,
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            booking: BookingView {
                id: booking.id,
                status: booking.status,
                total_amount: booking.total_amount,
                paid_amount: booking.paid_amount,
                pending_amount: booking.pending_amount,
            },
            balances: BalanceView {
                total_amount: schedule.total_amount,
                down_payment: schedule.down_payment,
                required_down_payment: schedule.required_down_payment,
                paid_amount: schedule.paid_amount,
                pending_amount: schedule.pending_amount,
                overdue_amount,
                total_late_fees: schedule.total_late_fees,
                late_fee_rate: schedule.late_fee_rate,
                next_due_date: next_open.map(|i| i.due_date),
                next_due_amount: next_open.map(|i| i.amount),
            },
            installments: owned
                .iter()
                .map(|i| InstallmentView {
                    id: i.id,
                    sequence: i.sequence,
                    installment_type: i.installment_type,
                    amount: i.amount,
                    due_date: i.due_date,
                    status: i.status,
                    paid_date: i.paid_date,
                    late_fee: i.late_fee,
                })
                .collect(),
            payments: payments
                .iter()
                .filter(|p| p.schedule_id == schedule.id)
                .map(|p| PaymentView {
                    id: p.id,
                    amount: p.amount,
                    method: p.method,
                    status: p.status,
                    category: p.category,
                    payment_date: p.payment_date,
                    reference_number: p.details.reference_number.clone(),
                    refund_of: p.refund_of,
                })
                .collect(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
