use crate::booking::Booking;
use crate::config::{EngineConfig, ToleranceConfig};
use crate::decimal::Money;
use crate::errors::{InvariantViolation, ReconciliationError};
use crate::payments::{completed_total, Payment};
use crate::schedule::{Installment, PaymentSchedule};
use crate::types::{InstallmentStatus, ScheduleStatus};

/// cross-entity money invariants for one booking
#[derive(Debug, Clone)]
pub struct ReconciliationGuard {
    tolerance_minor: i64,
}

impl Default for ReconciliationGuard {
    fn default() -> Self {
        Self::new(&EngineConfig::default().tolerances)
    }
}

impl ReconciliationGuard {
    pub fn new(tolerances: &ToleranceConfig) -> Self {
        Self {
            tolerance_minor: tolerances.reconciliation_tolerance_minor,
        }
    }

    /// check every invariant, reporting all failures together
    pub fn check_invariants(
        &self,
        booking: &Booking,
        schedules: &[PaymentSchedule],
        installments: &[Installment],
        payments: &[Payment],
    ) -> Result<(), ReconciliationError> {
        let mut violations = Vec::new();

        if !(booking.paid_amount + booking.pending_amount).within(booking.total_amount, self.tolerance_minor) {
            violations.push(InvariantViolation::BookingBalance {
                paid: booking.paid_amount,
                pending: booking.pending_amount,
                total: booking.total_amount,
            });
        }

        for schedule in schedules.iter().filter(|s| s.booking_id == booking.id) {
            let payments_total = completed_total(payments, schedule.id);
            if schedule.paid_amount != payments_total {
                violations.push(InvariantViolation::PaymentsMismatch {
                    schedule_paid: schedule.paid_amount,
                    payments_total,
                });
            }

            if schedule.pending_amount.is_negative() {
                violations.push(InvariantViolation::NegativePending {
                    pending: schedule.pending_amount,
                });
            } else if schedule.pending_amount != schedule.total_amount - schedule.paid_amount {
                violations.push(InvariantViolation::PendingDrift {
                    total: schedule.total_amount,
                    paid: schedule.paid_amount,
                    pending: schedule.pending_amount,
                });
            }

            // cancelled schedules no longer carry obligations
            if schedule.status != ScheduleStatus::Cancelled {
                let installments_total: Money = installments
                    .iter()
                    .filter(|i| i.schedule_id == schedule.id && i.status != InstallmentStatus::Cancelled)
                    .map(|i| i.amount)
                    .sum();
                if !(installments_total + schedule.down_payment).within(schedule.total_amount, self.tolerance_minor) {
                    violations.push(InvariantViolation::InstallmentSumMismatch {
                        installments_total,
                        down_payment: schedule.down_payment,
                        schedule_total: schedule.total_amount,
                    });
                }
            }
        }

        for installment in installments.iter().filter(|i| i.amount.is_negative()) {
            violations.push(InvariantViolation::NegativeInstallment {
                installment_id: installment.id,
                amount: installment.amount,
            });
        }

        let active = schedules
            .iter()
            .filter(|s| s.booking_id == booking.id && s.is_active())
            .count();
        if active > 1 {
            violations.push(InvariantViolation::MultipleActiveSchedules {
                booking_id: booking.id,
                count: active,
            });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ReconciliationError {
                booking_id: booking.id,
                violations,
            })
        }
    }
}
