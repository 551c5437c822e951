use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::booking::Booking;
use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventStore};
use crate::schedule::{Installment, PaymentSchedule};
use crate::types::{BookingStatus, InstallmentId, InstallmentStatus, ScheduleStatus};

use super::InstallmentSplit;

/// result of reversing a refunded amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reversal {
    pub amount: Money,
    /// installments returned to open, most recently due first
    pub reopened: Vec<InstallmentId>,
    pub split: Option<InstallmentSplit>,
    pub schedule_reactivated: bool,
    pub booking_status_change: Option<(BookingStatus, BookingStatus)>,
}

/// re-opens settled installments for a refund, latest due date first
#[derive(Debug, Clone, Copy, Default)]
pub struct RefundReversal;

impl RefundReversal {
    pub fn new() -> Self {
        Self
    }

    pub fn reverse(
        &self,
        booking: &mut Booking,
        schedule: &mut PaymentSchedule,
        installments: &mut Vec<Installment>,
        amount: Money,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Reversal> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount { amount });
        }
        if !matches!(schedule.status, ScheduleStatus::Active | ScheduleStatus::Completed) {
            return Err(EngineError::ScheduleNotActive {
                id: schedule.id,
                status: schedule.status,
            });
        }

        let mut settled: Vec<usize> = installments
            .iter()
            .enumerate()
            .filter(|(_, i)| i.schedule_id == schedule.id && i.status == InstallmentStatus::Paid)
            .map(|(idx, _)| idx)
            .collect();
        settled.sort_by_key(|&idx| std::cmp::Reverse((installments[idx].due_date, installments[idx].sequence)));

        let refundable: Money = settled.iter().map(|&idx| installments[idx].amount).sum();
        if amount > refundable {
            return Err(EngineError::RefundExceedsPaid {
                refundable,
                requested: amount,
            });
        }

        let now = time_provider.now();
        let today = now.date_naive();
        let mut remaining = amount;
        let mut reopened = Vec::new();
        let mut split = None;

        for idx in settled {
            if remaining.is_zero() {
                break;
            }

            let installment = &mut installments[idx];
            if remaining >= installment.amount {
                remaining -= installment.amount;
                installment.status = installment.open_status_as_of(today);
                installment.paid_date = None;
                reopened.push(installment.id);
                events.emit(Event::InstallmentReopened {
                    installment_id: installment.id,
                    amount: installment.amount,
                    timestamp: now,
                });
            } else {
                let mut reopened_part = installment.split_off(installment.amount - remaining);
                reopened_part.status = reopened_part.open_status_as_of(today);
                reopened.push(reopened_part.id);

                let record = InstallmentSplit {
                    original_id: installment.id,
                    remainder_id: reopened_part.id,
                    paid_amount: installment.amount,
                    remainder_amount: reopened_part.amount,
                };
                events.emit(Event::InstallmentSplit {
                    installment_id: record.original_id,
                    remainder_id: record.remainder_id,
                    paid_amount: record.paid_amount,
                    remainder_amount: record.remainder_amount,
                    timestamp: now,
                });
                events.emit(Event::InstallmentReopened {
                    installment_id: reopened_part.id,
                    amount: reopened_part.amount,
                    timestamp: now,
                });

                split = Some(record);
                installments.push(reopened_part);
                remaining = Money::ZERO;
            }
        }

        let schedule_reactivated = schedule.reverse_paid(amount, now);
        let booking_status_change = booking.apply_paid_delta(-amount, now);

        if schedule_reactivated {
            events.emit(Event::ScheduleStatusChanged {
                schedule_id: schedule.id,
                old_status: ScheduleStatus::Completed,
                new_status: ScheduleStatus::Active,
                reason: "refund".to_string(),
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

        debug!(
            schedule_id = %schedule.id,
            %amount,
            reopened = reopened.len(),
            "refund reversed"
        );

        Ok(Reversal {
            amount,
            reopened,
            split,
            schedule_reactivated,
            booking_status_change,
        })
    }
}
