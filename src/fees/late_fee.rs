use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EngineConfig, LateFeeConfig};
use crate::decimal::{Money, Rate};
use crate::events::{Event, EventStore};
use crate::schedule::{Installment, PaymentSchedule};
use crate::types::InstallmentStatus;

/// late fee for one overdue installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeeCalculation {
    pub fee: Money,
    pub days_overdue: u32,
    pub monthly_rate: Rate,
    pub overdue_base: Money,
}

/// outcome of one accrual pass over a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeeSummary {
    pub overdue_installments: usize,
    /// fees across every non-cancelled installment of the schedule
    pub total_late_fees: Money,
    /// change against the previous total
    pub accrued_delta: Money,
}

/// accrues simple late fees on overdue installments
///
/// Fees are recomputed from scratch on each pass, so running the accrual
/// twice for the same date leaves the same amounts in place. Fees already
/// attached to paid installments stay frozen.
#[derive(Debug, Clone)]
pub struct LateFeeAccrual {
    days_per_month: u32,
}

impl Default for LateFeeAccrual {
    fn default() -> Self {
        Self::new(&EngineConfig::default().late_fee)
    }
}

impl LateFeeAccrual {
    pub fn new(config: &LateFeeConfig) -> Self {
        Self {
            days_per_month: config.days_per_month.max(1),
        }
    }

    /// fee = amount * monthly rate * days overdue / days per month
    pub fn calculate(&self, overdue_amount: Money, monthly_rate: Rate, days_overdue: u32) -> LateFeeCalculation {
        let fee = overdue_amount.as_decimal() * monthly_rate.as_decimal() * Decimal::from(days_overdue)
            / Decimal::from(self.days_per_month);

        LateFeeCalculation {
            fee: Money::from_decimal(fee),
            days_overdue,
            monthly_rate,
            overdue_base: overdue_amount,
        }
    }

    /// move pending installments whose due date has passed to overdue
    pub fn mark_overdue(
        &self,
        schedule: &PaymentSchedule,
        installments: &mut [Installment],
        as_of: NaiveDate,
        events: &mut EventStore,
    ) -> usize {
        let mut count = 0;
        for installment in installments
            .iter_mut()
            .filter(|i| i.schedule_id == schedule.id && i.status == InstallmentStatus::Pending)
        {
            if installment.due_date < as_of {
                installment.status = InstallmentStatus::Overdue;
                count += 1;
            }
        }

        if count > 0 {
            events.emit(Event::InstallmentsMarkedOverdue {
                schedule_id: schedule.id,
                count,
                as_of,
            });
        }
        count
    }

    /// recompute fees on every overdue installment and refresh the schedule total
    pub fn accrue(
        &self,
        schedule: &mut PaymentSchedule,
        installments: &mut [Installment],
        as_of: NaiveDate,
        events: &mut EventStore,
    ) -> LateFeeSummary {
        let mut overdue_installments = 0;
        for installment in installments
            .iter_mut()
            .filter(|i| i.schedule_id == schedule.id && i.status == InstallmentStatus::Overdue)
        {
            let days_overdue = (as_of - installment.due_date).num_days().max(0) as u32;
            let calculation = self.calculate(installment.amount, schedule.late_fee_rate, days_overdue);
            installment.late_fee = calculation.fee;
            overdue_installments += 1;
        }

        let previous = schedule.total_late_fees;
        schedule.total_late_fees = installments
            .iter()
            .filter(|i| i.schedule_id == schedule.id && i.status != InstallmentStatus::Cancelled)
            .map(|i| i.late_fee)
            .sum();

        let summary = LateFeeSummary {
            overdue_installments,
            total_late_fees: schedule.total_late_fees,
            accrued_delta: schedule.total_late_fees - previous,
        };

        if overdue_installments > 0 {
            events.emit(Event::LateFeesAccrued {
                schedule_id: schedule.id,
                overdue_installments,
                total_late_fees: summary.total_late_fees,
                as_of,
            });
        }
        debug!(
            schedule_id = %schedule.id,
            overdue = overdue_installments,
            total = %summary.total_late_fees,
            "late fees accrued"
        );

        summary
    }
}
