use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::booking::Booking;
use crate::decimal::Money;
use crate::errors::{EngineError, InvariantViolation, ReconciliationError, Result};
use crate::events::{Event, EventStore};
use crate::schedule::{Installment, PaymentSchedule};
use crate::types::{BookingStatus, InstallmentId, PaymentId};

/// a partial payment that split one installment in two
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSplit {
    pub original_id: InstallmentId,
    pub remainder_id: InstallmentId,
    pub paid_amount: Money,
    pub remainder_amount: Money,
}

/// result of applying one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub amount: Money,
    /// installments settled, in settlement order
    pub paid_installments: Vec<InstallmentId>,
    pub split: Option<InstallmentSplit>,
    pub schedule_completed: bool,
    pub booking_status_change: Option<(BookingStatus, BookingStatus)>,
    pub applied_at: DateTime<Utc>,
}

/// applies payments to open installments, oldest due date first
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentAllocator;

impl PaymentAllocator {
    pub fn new() -> Self {
        Self
    }

    /// apply `amount` to the schedule, splitting the last installment touched on a partial payment
    ///
    /// Nothing is mutated when an error is returned. The caller deduplicates
    /// submissions; every call consumes the full amount.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        &self,
        booking: &mut Booking,
        schedule: &mut PaymentSchedule,
        installments: &mut Vec<Installment>,
        amount: Money,
        payment_id: Option<PaymentId>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Allocation> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount { amount });
        }
        if !schedule.is_active() {
            return Err(EngineError::ScheduleNotActive {
                id: schedule.id,
                status: schedule.status,
            });
        }
        if amount > schedule.pending_amount {
            return Err(EngineError::Overpayment {
                pending: schedule.pending_amount,
                requested: amount,
            });
        }

        let mut open: Vec<usize> = installments
            .iter()
            .enumerate()
            .filter(|(_, i)| i.schedule_id == schedule.id && i.is_open())
            .map(|(idx, _)| idx)
            .collect();
        open.sort_by_key(|&idx| (installments[idx].due_date, installments[idx].sequence));

        let open_total: Money = open.iter().map(|&idx| installments[idx].amount).sum();
        if open_total < amount {
            return Err(ReconciliationError {
                booking_id: booking.id,
                violations: vec![InvariantViolation::UnallocatedPayment { amount, open_total }],
            }
            .into());
        }

        let now = time_provider.now();
        let mut remaining = amount;
        let mut paid_installments = Vec::new();
        let mut split = None;

        for idx in open {
            if remaining.is_zero() {
                break;
            }

            let installment = &mut installments[idx];
            if remaining >= installment.amount {
                remaining -= installment.amount;
                installment.mark_paid(now);
                paid_installments.push(installment.id);
                events.emit(Event::InstallmentPaid {
                    installment_id: installment.id,
                    amount: installment.amount,
                    due_date: installment.due_date,
                    timestamp: now,
                });
            } else {
                let remainder = installment.split_off(remaining);
                installment.mark_paid(now);
                paid_installments.push(installment.id);

                let record = InstallmentSplit {
                    original_id: installment.id,
                    remainder_id: remainder.id,
                    paid_amount: installment.amount,
                    remainder_amount: remainder.amount,
                };
                events.emit(Event::InstallmentSplit {
                    installment_id: record.original_id,
                    remainder_id: record.remainder_id,
                    paid_amount: record.paid_amount,
                    remainder_amount: record.remainder_amount,
                    timestamp: now,
                });
                debug!(
                    installment_id = %record.original_id,
                    paid = %record.paid_amount,
                    remainder = %record.remainder_amount,
                    "installment split on partial payment"
                );

                split = Some(record);
                installments.push(remainder);
                remaining = Money::ZERO;
            }
        }

        let schedule_completed = schedule.record_paid(amount, now);
        let booking_status_change = booking.apply_paid_delta(amount, now);

        if let Some(payment_id) = payment_id {
            events.emit(Event::PaymentApplied {
                payment_id,
                schedule_id: schedule.id,
                amount,
                installments_paid: paid_installments.len(),
                new_paid: schedule.paid_amount,
                new_pending: schedule.pending_amount,
                timestamp: now,
            });
        }
        if schedule_completed {
            events.emit(Event::ScheduleCompleted {
                schedule_id: schedule.id,
                final_payment: amount,
                timestamp: now,
            });
        }
        if let Some((old_status, new_status)) = booking_status_change {
            events.emit(Event::BookingStatusChanged {
                booking_id: booking.id,
                old_status,
                new_status,
                timestamp: now,
            });
        }

        Ok(Allocation {
            amount,
            paid_installments,
            split,
            schedule_completed,
            booking_status_change,
            applied_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleBuilder, ScheduleRequest, ScheduleTerms};
    use crate::types::{InstallmentStatus, PaymentType, ScheduleStatus};
    use chrono::{NaiveDate, TimeZone};
    use hourglass_rs::TimeSource;
    use uuid::Uuid;

    struct Fixture {
        booking: Booking,
        schedule: PaymentSchedule,
        installments: Vec<Installment>,
        time: SafeTimeProvider,
        events: EventStore,
    }

    impl Fixture {
        /// 100 down, then four monthly installments of 250
        fn new() -> Self {
            let time = SafeTimeProvider::new(TimeSource::Test(
                Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            ));
            let booking_id = Uuid::new_v4();
            let request = ScheduleRequest {
                booking_id,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                down_payment_paid: Money::from_major(100),
                terms: ScheduleTerms::AdHoc {
                    total_amount: Money::from_major(1_100),
                    down_payment: Money::from_major(100),
                    payment_type: PaymentType::Installments,
                    installment_count: 4,
                },
            };
            let built = ScheduleBuilder::default().build(&request, &time).unwrap();
            let mut booking = Booking::new(booking_id, Money::from_major(1_100), Money::from_major(100), time.now());
            booking.apply_paid_delta(Money::from_major(100), time.now());

            Self {
                booking,
                schedule: built.schedule,
                installments: built.installments,
                time,
                events: EventStore::new(),
            }
        }

        fn allocate(&mut self, amount: Money) -> Result<Allocation> {
            PaymentAllocator::new().allocate(
                &mut self.booking,
                &mut self.schedule,
                &mut self.installments,
                amount,
                Some(Uuid::new_v4()),
                &self.time,
                &mut self.events,
            )
        }

        fn statuses(&self) -> Vec<(Money, InstallmentStatus)> {
            let mut sorted = self.installments.clone();
            crate::schedule::sort_by_due_date(&mut sorted);
            sorted.iter().map(|i| (i.amount, i.status)).collect()
        }
    }

    #[test]
    fn test_exact_installment_payment() {
        let mut f = Fixture::new();
        let allocation = f.allocate(Money::from_major(250)).unwrap();

        assert_eq!(allocation.paid_installments.len(), 1);
        assert!(allocation.split.is_none());
        assert_eq!(f.schedule.paid_amount, Money::from_major(350));
        assert_eq!(f.schedule.pending_amount, Money::from_major(750));
        assert_eq!(f.installments[0].status, InstallmentStatus::Paid);
        assert_eq!(f.installments[0].paid_date, Some(f.time.now()));
    }

    #[test]
    fn test_partial_payment_splits_earliest() {
        let mut f = Fixture::new();
        let original_id = f.installments[0].id;

        let allocation = f.allocate(Money::from_major(100)).unwrap();
        let split = allocation.split.unwrap();

        assert_eq!(split.original_id, original_id);
        assert_eq!(split.paid_amount, Money::from_major(100));
        assert_eq!(split.remainder_amount, Money::from_major(150));
        assert_eq!(split.paid_amount + split.remainder_amount, Money::from_major(250));
        assert_eq!(f.installments.len(), 5);

        let remainder = f.installments.iter().find(|i| i.id == split.remainder_id).unwrap();
        assert_eq!(remainder.status, InstallmentStatus::Pending);
        assert_eq!(remainder.due_date, f.installments[0].due_date);
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| matches!(e, Event::InstallmentSplit { .. })));
    }

    #[test]
    fn test_spanning_payment_pays_then_splits() {
        let mut f = Fixture::new();
        f.allocate(Money::from_major(600)).unwrap();

        assert_eq!(
            f.statuses(),
            vec![
                (Money::from_major(250), InstallmentStatus::Paid),
                (Money::from_major(250), InstallmentStatus::Paid),
                (Money::from_major(100), InstallmentStatus::Paid),
                (Money::from_major(150), InstallmentStatus::Pending),
                (Money::from_major(250), InstallmentStatus::Pending),
            ]
        );
    }

    #[test]
    fn test_remainder_paid_before_later_installments() {
        let mut f = Fixture::new();
        f.allocate(Money::from_major(100)).unwrap();
        let allocation = f.allocate(Money::from_major(150)).unwrap();

        assert!(allocation.split.is_none());
        let paid: Vec<_> = f
            .installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Paid)
            .collect();
        assert_eq!(paid.len(), 2);
        assert!(paid.iter().all(|i| i.due_date == NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn test_overdue_installments_are_allocated() {
        let mut f = Fixture::new();
        f.installments[0].status = InstallmentStatus::Overdue;

        f.allocate(Money::from_major(50)).unwrap();
        let remainder = f.installments.last().unwrap();
        assert_eq!(remainder.status, InstallmentStatus::Overdue);
        assert_eq!(remainder.amount, Money::from_major(200));
        assert_eq!(f.installments[0].status, InstallmentStatus::Paid);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let mut f = Fixture::new();
        assert!(matches!(f.allocate(Money::ZERO), Err(EngineError::InvalidAmount { .. })));
        assert!(matches!(
            f.allocate(-Money::from_major(5)),
            Err(EngineError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_overpayment_leaves_state_unchanged() {
        let mut f = Fixture::new();
        let before = (f.schedule.clone(), f.installments.clone(), f.booking.clone());

        let result = f.allocate(Money::from_str_exact("1000.01").unwrap());
        assert!(matches!(result, Err(EngineError::Overpayment { .. })));
        assert_eq!((f.schedule.clone(), f.installments.clone(), f.booking.clone()), before);
        assert!(f.events.is_empty());
    }

    #[test]
    fn test_full_settlement_completes_schedule_and_booking() {
        let mut f = Fixture::new();
        let allocation = f.allocate(Money::from_major(1_000)).unwrap();

        assert!(allocation.schedule_completed);
        assert_eq!(f.schedule.status, ScheduleStatus::Completed);
        assert_eq!(f.schedule.pending_amount, Money::ZERO);
        assert_eq!(f.booking.status, BookingStatus::Completed);
        assert_eq!(
            allocation.booking_status_change,
            Some((BookingStatus::Confirmed, BookingStatus::Completed))
        );
        assert!(f.installments.iter().all(|i| i.status == InstallmentStatus::Paid));

        // completed schedules accept nothing further
        assert!(matches!(
            f.allocate(Money::from_major(1)),
            Err(EngineError::ScheduleNotActive { .. })
        ));
    }

    #[test]
    fn test_drifted_installments_rejected() {
        let mut f = Fixture::new();
        f.installments[3].status = InstallmentStatus::Cancelled;

        let result = f.allocate(Money::from_major(1_000));
        assert!(matches!(result, Err(EngineError::Reconciliation(_))));
        assert_eq!(f.schedule.paid_amount, Money::from_major(100));
    }
}
