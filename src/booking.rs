use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{BookingId, BookingStatus};

/// one sale and its aggregate running balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub total_amount: Money,
    /// down payment required before the booking is confirmed
    pub down_payment: Money,
    pub paid_amount: Money,
    pub pending_amount: Money,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(id: BookingId, total_amount: Money, down_payment: Money, now: DateTime<Utc>) -> Self {
        Self {
            id,
            total_amount,
            down_payment,
            paid_amount: Money::ZERO,
            pending_amount: total_amount,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// re-base totals onto a new schedule, keeping what was already paid
    pub fn rebase(&mut self, total_amount: Money, down_payment: Money, now: DateTime<Utc>) -> Option<(BookingStatus, BookingStatus)> {
        self.total_amount = total_amount;
        self.down_payment = down_payment;
        self.pending_amount = total_amount - self.paid_amount;
        self.updated_at = now;
        self.refresh_status()
    }

    /// apply a signed paid delta, returning the status transition if any
    pub fn apply_paid_delta(&mut self, delta: Money, now: DateTime<Utc>) -> Option<(BookingStatus, BookingStatus)> {
        self.paid_amount += delta;
        self.pending_amount = self.total_amount - self.paid_amount;
        self.updated_at = now;
        self.refresh_status()
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Option<(BookingStatus, BookingStatus)> {
        if self.status == BookingStatus::Cancelled {
            return None;
        }
        let old = self.status;
        self.status = BookingStatus::Cancelled;
        self.updated_at = now;
        Some((old, BookingStatus::Cancelled))
    }

    fn refresh_status(&mut self) -> Option<(BookingStatus, BookingStatus)> {
        if self.status == BookingStatus::Cancelled {
            return None;
        }

        let next = if !self.pending_amount.is_positive() {
            BookingStatus::Completed
        } else if self.paid_amount >= self.down_payment {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };

        if next == self.status {
            return None;
        }
        let old = self.status;
        self.status = next;
        Some((old, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn booking() -> Booking {
        Booking::new(Uuid::new_v4(), Money::from_major(1_000), Money::from_major(200), now())
    }

    #[test]
    fn test_confirmed_once_down_payment_covered() {
        let mut b = booking();

        assert_eq!(b.apply_paid_delta(Money::from_major(150), now()), None);
        assert_eq!(b.status, BookingStatus::Pending);

        let change = b.apply_paid_delta(Money::from_major(50), now());
        assert_eq!(change, Some((BookingStatus::Pending, BookingStatus::Confirmed)));
        assert_eq!(b.paid_amount + b.pending_amount, b.total_amount);
    }

    #[test]
    fn test_completed_when_nothing_pending() {
        let mut b = booking();
        b.apply_paid_delta(Money::from_major(200), now());

        let change = b.apply_paid_delta(Money::from_major(800), now());
        assert_eq!(change, Some((BookingStatus::Confirmed, BookingStatus::Completed)));
        assert_eq!(b.pending_amount, Money::ZERO);
    }

    #[test]
    fn test_refund_reverts_completion() {
        let mut b = booking();
        b.apply_paid_delta(Money::from_major(1_000), now());
        assert_eq!(b.status, BookingStatus::Completed);

        let change = b.apply_paid_delta(-Money::from_major(100), now());
        assert_eq!(change, Some((BookingStatus::Completed, BookingStatus::Confirmed)));
        assert_eq!(b.pending_amount, Money::from_major(100));
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut b = booking();
        assert!(b.cancel(now()).is_some());
        assert_eq!(b.apply_paid_delta(Money::from_major(1_000), now()), None);
        assert_eq!(b.status, BookingStatus::Cancelled);
    }

    #[test]
    fn test_rebase_keeps_paid() {
        let mut b = booking();
        b.apply_paid_delta(Money::from_major(200), now());

        b.rebase(Money::from_major(1_050), Money::from_major(200), now());
        assert_eq!(b.pending_amount, Money::from_major(850));
        assert_eq!(b.status, BookingStatus::Confirmed);
    }
}
