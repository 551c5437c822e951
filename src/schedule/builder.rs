use chrono::{Months, NaiveDate};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, Result};
use crate::plans::ValidatedPlan;
use crate::types::{BookingId, InstallmentType, PaymentType, PlanId, ScheduleStatus};

use super::{sort_by_due_date, Installment, PaymentSchedule};

/// how the obligations of a schedule are derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScheduleTerms {
    /// expand a validated plan
    FromPlan {
        plan_id: Option<PlanId>,
        plan: ValidatedPlan,
    },
    /// equal monthly installments over an explicit total
    AdHoc {
        total_amount: Money,
        down_payment: Money,
        payment_type: PaymentType,
        installment_count: u32,
    },
}

/// schedule creation request for one booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub booking_id: BookingId,
    pub start_date: NaiveDate,
    /// down payment actually collected at sale time
    pub down_payment_paid: Money,
    pub terms: ScheduleTerms,
}

/// a new schedule and its installments, ordered by due date
#[derive(Debug, Clone)]
pub struct BuiltSchedule {
    pub schedule: PaymentSchedule,
    pub installments: Vec<Installment>,
}

impl ScheduleTerms {
    /// months between the start date and the last regular installment
    pub fn tenure_months(&self) -> u32 {
        match self {
            ScheduleTerms::FromPlan { plan, .. } => plan.tenure_months(),
            ScheduleTerms::AdHoc {
                payment_type: PaymentType::Lumpsum,
                ..
            } => 1,
            ScheduleTerms::AdHoc { installment_count, .. } => *installment_count,
        }
    }
}

/// builds schedules from plans or ad-hoc terms
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    late_fee_rate: Rate,
    max_tenure_months: u32,
}

impl Default for ScheduleBuilder {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

struct Expansion {
    total_amount: Money,
    required_down_payment: Money,
    installment_amount: Money,
    plan_id: Option<PlanId>,
    obligations: Vec<(InstallmentType, Money, u32)>,
}

impl ScheduleBuilder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            late_fee_rate: config.late_fee.monthly_rate,
            max_tenure_months: config.max_tenure_months,
        }
    }

    pub fn with_late_fee_rate(mut self, rate: Rate) -> Self {
        self.late_fee_rate = rate;
        self
    }

    pub fn build(&self, request: &ScheduleRequest, time_provider: &SafeTimeProvider) -> Result<BuiltSchedule> {
        let paid = request.down_payment_paid;
        if paid.is_negative() {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("down payment paid {} is negative", paid),
            });
        }

        // bound the term before expanding any obligations
        let tenure = request.terms.tenure_months();
        if tenure > self.max_tenure_months {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("tenure of {} months exceeds the maximum of {}", tenure, self.max_tenure_months),
            });
        }
        let end_date = add_months(request.start_date, tenure)?;

        let expansion = match &request.terms {
            ScheduleTerms::FromPlan { plan_id, plan } => Self::expand_plan(*plan_id, plan, paid)?,
            ScheduleTerms::AdHoc {
                total_amount,
                down_payment,
                payment_type,
                installment_count,
            } => Self::expand_ad_hoc(*total_amount, *down_payment, *payment_type, *installment_count, paid)?,
        };

        let now = time_provider.now();
        let schedule_id = Uuid::new_v4();
        let mut installments = Vec::with_capacity(expansion.obligations.len());
        for (installment_type, amount, month) in &expansion.obligations {
            let due_date = add_months(request.start_date, *month)?;
            installments.push(Installment::new(
                schedule_id,
                request.booking_id,
                *installment_type,
                *amount,
                due_date,
            ));
        }

        // allocation walks this order
        for (i, installment) in installments.iter_mut().enumerate() {
            installment.sequence = i as u32;
        }
        sort_by_due_date(&mut installments);
        for (i, installment) in installments.iter_mut().enumerate() {
            installment.sequence = i as u32 + 1;
        }

        let schedule = PaymentSchedule {
            id: schedule_id,
            booking_id: request.booking_id,
            plan_id: expansion.plan_id,
            total_amount: expansion.total_amount,
            down_payment: paid,
            required_down_payment: expansion.required_down_payment,
            paid_amount: paid,
            pending_amount: expansion.total_amount - paid,
            installment_count: installments.len() as u32,
            installment_amount: expansion.installment_amount,
            start_date: request.start_date,
            end_date,
            status: ScheduleStatus::Active,
            total_late_fees: Money::ZERO,
            late_fee_rate: self.late_fee_rate,
            created_at: now,
            updated_at: now,
        };

        info!(
            schedule_id = %schedule.id,
            booking_id = %schedule.booking_id,
            total = %schedule.total_amount,
            installments = schedule.installment_count,
            "payment schedule built"
        );

        Ok(BuiltSchedule { schedule, installments })
    }

    fn expand_plan(plan_id: Option<PlanId>, plan: &ValidatedPlan, paid: Money) -> Result<Expansion> {
        let required = plan.down_payment();
        let mut obligations = Vec::new();
        let offset = Self::push_down_payment_balance(&mut obligations, required, paid)?;

        let tenure = plan.tenure_months();
        for month in 1..=tenure {
            obligations.push((InstallmentType::Monthly, plan.monthly_payment(), month + offset));
        }
        if let Some(extra) = plan.extra() {
            let period = extra.cadence.period_months();
            for k in 1..=extra.cadence.occurrences(tenure) {
                obligations.push((extra.cadence.installment_type(), extra.amount, k * period));
            }
        }

        Ok(Expansion {
            total_amount: plan.scheduled_total(),
            required_down_payment: required,
            installment_amount: plan.monthly_payment(),
            plan_id,
            obligations,
        })
    }

    fn expand_ad_hoc(
        total: Money,
        requested: Money,
        payment_type: PaymentType,
        count: u32,
        paid: Money,
    ) -> Result<Expansion> {
        if !total.is_positive() {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("total amount {} must be positive", total),
            });
        }
        if requested.is_negative() || requested >= total {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("down payment {} outside [0, {})", requested, total),
            });
        }

        let mut obligations = Vec::new();
        let offset = Self::push_down_payment_balance(&mut obligations, requested, paid)?;
        let financed = total - requested;

        let installment_amount = match payment_type {
            PaymentType::Lumpsum => {
                obligations.push((InstallmentType::Monthly, financed, 1 + offset));
                financed
            }
            PaymentType::Installments => {
                if count == 0 {
                    return Err(EngineError::InvalidBookingTerms {
                        message: "installment count must be positive".to_string(),
                    });
                }
                let share = financed.split_even(count);
                for month in 1..count {
                    obligations.push((InstallmentType::Monthly, share, month + offset));
                }
                // last installment absorbs the rounding remainder
                let last = financed - share * (count - 1);
                obligations.push((InstallmentType::Monthly, last, count + offset));
                share
            }
        };

        Ok(Expansion {
            total_amount: total,
            required_down_payment: requested,
            installment_amount,
            plan_id: None,
            obligations,
        })
    }

    /// queue the unpaid part of the down payment; returns the month shift for regular installments
    fn push_down_payment_balance(
        obligations: &mut Vec<(InstallmentType, Money, u32)>,
        required: Money,
        paid: Money,
    ) -> Result<u32> {
        if paid > required {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("down payment paid {} exceeds required {}", paid, required),
            });
        }
        let shortfall = required - paid;
        if shortfall.is_positive() {
            obligations.push((InstallmentType::DownPaymentBalance, shortfall, 1));
            return Ok(1);
        }
        Ok(0)
    }
}

pub(crate) fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| EngineError::InvalidDate {
            message: format!("{} + {} months is out of range", date, months),
        })
}
