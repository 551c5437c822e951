pub mod builder;

pub use builder::{BuiltSchedule, ScheduleBuilder, ScheduleRequest, ScheduleTerms};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::{
    BookingId, InstallmentId, InstallmentStatus, InstallmentType, PlanId, ScheduleId,
    ScheduleStatus,
};

/// the dated obligations of one booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSchedule {
    pub id: ScheduleId,
    pub booking_id: BookingId,
    pub plan_id: Option<PlanId>,
    pub total_amount: Money,
    /// down payment collected at sale time
    pub down_payment: Money,
    /// down payment the terms asked for
    pub required_down_payment: Money,
    pub paid_amount: Money,
    pub pending_amount: Money,
    pub installment_count: u32,
    pub installment_amount: Money,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ScheduleStatus,
    pub total_late_fees: Money,
    pub late_fee_rate: Rate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSchedule {
    pub fn is_active(&self) -> bool {
        self.status == ScheduleStatus::Active
    }

    /// add a settled amount, completing the schedule once nothing is owed
    pub fn record_paid(&mut self, amount: Money, now: DateTime<Utc>) -> bool {
        self.paid_amount += amount;
        self.pending_amount = self.total_amount - self.paid_amount;
        self.updated_at = now;

        if !self.pending_amount.is_positive() && self.status == ScheduleStatus::Active {
            self.status = ScheduleStatus::Completed;
            return true;
        }
        false
    }

    /// take back a refunded amount, reactivating a completed schedule
    pub fn reverse_paid(&mut self, amount: Money, now: DateTime<Utc>) -> bool {
        self.paid_amount -= amount;
        self.pending_amount = self.total_amount - self.paid_amount;
        self.updated_at = now;

        if self.pending_amount.is_positive() && self.status == ScheduleStatus::Completed {
            self.status = ScheduleStatus::Active;
            return true;
        }
        false
    }
}

/// one dated obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    /// position in due-date order at creation
    pub sequence: u32,
    pub installment_type: InstallmentType,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub late_fee: Money,
    /// installment this one was split off from
    pub split_from: Option<InstallmentId>,
}

impl Installment {
    pub fn new(
        schedule_id: ScheduleId,
        booking_id: BookingId,
        installment_type: InstallmentType,
        amount: Money,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            booking_id,
            sequence: 0,
            installment_type,
            amount,
            due_date,
            status: InstallmentStatus::Pending,
            paid_date: None,
            late_fee: Money::ZERO,
            split_from: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) {
        self.status = InstallmentStatus::Paid;
        self.paid_date = Some(now);
    }

    /// shrink to `keep` and return a new sibling holding the rest
    pub fn split_off(&mut self, keep: Money) -> Installment {
        let remainder = Installment {
            id: Uuid::new_v4(),
            amount: self.amount - keep,
            paid_date: None,
            late_fee: Money::ZERO,
            split_from: Some(self.id),
            ..self.clone()
        };
        self.amount = keep;
        remainder
    }

    /// status an unpaid installment should carry as of `today`
    pub fn open_status_as_of(&self, today: NaiveDate) -> InstallmentStatus {
        if self.due_date < today {
            InstallmentStatus::Overdue
        } else {
            InstallmentStatus::Pending
        }
    }
}

/// installments ordered by due date, oldest first
pub fn sort_by_due_date(installments: &mut [Installment]) {
    installments.sort_by_key(|i| (i.due_date, i.sequence));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn installment(amount: i64) -> Installment {
        Installment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            InstallmentType::Monthly,
            Money::from_major(amount),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
    }

    #[test]
    fn test_split_preserves_amount() {
        let mut original = installment(50_000);
        original.status = InstallmentStatus::Overdue;
        original.late_fee = Money::from_major(500);

        let remainder = original.split_off(Money::from_major(20_000));

        assert_eq!(original.amount, Money::from_major(20_000));
        assert_eq!(remainder.amount, Money::from_major(30_000));
        assert_eq!(original.amount + remainder.amount, Money::from_major(50_000));
        assert_eq!(remainder.due_date, original.due_date);
        assert_eq!(remainder.status, InstallmentStatus::Overdue);
        assert_eq!(remainder.split_from, Some(original.id));
        assert_eq!(remainder.late_fee, Money::ZERO);
        assert_eq!(original.late_fee, Money::from_major(500));
        assert_ne!(remainder.id, original.id);
    }

    #[test]
    fn test_open_status_as_of() {
        let i = installment(1_000);
        assert_eq!(
            i.open_status_as_of(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
            InstallmentStatus::Pending
        );
        assert_eq!(
            i.open_status_as_of(NaiveDate::from_ymd_opt(2024, 2, 2).unwrap()),
            InstallmentStatus::Overdue
        );
    }

    #[test]
    fn test_mark_paid() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let mut i = installment(1_000);
        i.mark_paid(now);
        assert_eq!(i.status, InstallmentStatus::Paid);
        assert_eq!(i.paid_date, Some(now));
        assert!(!i.is_open());
    }
}
