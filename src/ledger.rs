use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::booking::Booking;
use crate::config::EngineConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, ReconciliationError, Result};
use crate::events::{Event, EventStore};
use crate::fees::{LateFeeAccrual, LateFeeSummary};
use crate::payments::{Payment, PaymentAllocator, PaymentRequest, RefundReversal};
use crate::plans::{PaymentPlan, PlanDraft, PlanValidator};
use crate::reconciliation::ReconciliationGuard;
use crate::schedule::{
    sort_by_due_date, BuiltSchedule, Installment, PaymentSchedule, ScheduleBuilder, ScheduleRequest,
    ScheduleTerms,
};
use crate::serialization::{ScheduleSummary, ScheduleView};
use crate::types::{
    BookingId, BookingStatus, InstallmentStatus, PaymentCategory, PaymentId, PaymentStatus,
    PaymentType, PlanId, PlanStatus, ScheduleId, ScheduleStatus,
};

/// receives consistency failures the ledger refused to commit
pub trait AuditSink: Send + Sync {
    fn reconciliation_failed(&self, operation: &str, error: &ReconciliationError);
}

/// audit sink that reports through tracing
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn reconciliation_failed(&self, operation: &str, error: &ReconciliationError) {
        error!(
            booking_id = %error.booking_id,
            operation,
            violations = error.violations.len(),
            "reconciliation failed, transaction rolled back: {}",
            error
        );
    }
}

/// everything stored for one booking: its schedules, installments and payments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingAccount {
    pub booking: Booking,
    pub schedules: Vec<PaymentSchedule>,
    pub installments: Vec<Installment>,
    pub payments: Vec<Payment>,
    /// bumped on every committed transaction
    pub version: u64,
}

impl BookingAccount {
    pub fn new(booking: Booking) -> Self {
        Self {
            booking,
            schedules: Vec::new(),
            installments: Vec::new(),
            payments: Vec::new(),
            version: 0,
        }
    }

    fn active_index(&self) -> Option<usize> {
        self.schedules.iter().position(|s| s.is_active())
    }

    pub fn active_schedule(&self) -> Option<&PaymentSchedule> {
        self.active_index().map(|idx| &self.schedules[idx])
    }

    fn schedule_index(&self, schedule_id: ScheduleId) -> Result<usize> {
        self.schedules
            .iter()
            .position(|s| s.id == schedule_id)
            .ok_or(EngineError::ScheduleNotFound { id: schedule_id })
    }

    fn payment_index(&self, payment_id: PaymentId) -> Result<usize> {
        self.payments
            .iter()
            .position(|p| p.id == payment_id)
            .ok_or(EngineError::PaymentNotFound { id: payment_id })
    }
}

/// how the obligations of a new booking are defined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookingTerms {
    Plan {
        plan_id: PlanId,
    },
    AdHoc {
        payment_type: PaymentType,
        installment_count: u32,
    },
}

/// booking creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub booking_id: BookingId,
    pub total_amount: Money,
    pub down_payment_requested: Money,
    pub down_payment_paid: Money,
    /// defaults to the current date
    pub start_date: Option<NaiveDate>,
    pub terms: BookingTerms,
}

/// outcome of an overdue sweep across all bookings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LateFeeSweep {
    pub schedules_processed: usize,
    pub installments_marked_overdue: usize,
    /// fees currently accrued across all active schedules
    pub total_late_fees_accrued: Money,
    /// change produced by this sweep
    pub accrued_this_run: Money,
    /// bookings the sweep could not update; the rest were still swept
    pub failures: Vec<SweepFailure>,
}

/// a booking skipped by an overdue sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub booking_id: BookingId,
    pub error: String,
}

/// embedded store for plans and booking accounts
///
/// Each booking account sits behind its own mutex. A mutation clones the
/// account, applies the change to the copy, runs the reconciliation guard
/// and only then swaps the copy in, so a rejected or inconsistent change
/// leaves the stored account untouched. Bookings never share a lock.
pub struct Ledger {
    config: EngineConfig,
    validator: PlanValidator,
    builder: ScheduleBuilder,
    allocator: PaymentAllocator,
    refunds: RefundReversal,
    late_fees: LateFeeAccrual,
    guard: ReconciliationGuard,
    plans: DashMap<PlanId, PaymentPlan>,
    accounts: DashMap<BookingId, Arc<Mutex<BookingAccount>>>,
    schedule_index: DashMap<ScheduleId, BookingId>,
    payment_index: DashMap<PaymentId, BookingId>,
    events: Mutex<EventStore>,
    audit: Arc<dyn AuditSink>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl Ledger {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: EngineConfig) -> Self {
        Self {
            validator: PlanValidator::from_config(&config),
            builder: ScheduleBuilder::from_config(&config),
            allocator: PaymentAllocator::new(),
            refunds: RefundReversal::new(),
            late_fees: LateFeeAccrual::new(&config.late_fee),
            guard: ReconciliationGuard::new(&config.tolerances),
            config,
            plans: DashMap::new(),
            accounts: DashMap::new(),
            schedule_index: DashMap::new(),
            payment_index: DashMap::new(),
            events: Mutex::new(EventStore::new()),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // plan administration

    pub fn create_plan(&self, draft: PlanDraft, time_provider: &SafeTimeProvider) -> Result<PaymentPlan> {
        let validated = self.validator.validate(&draft)?;
        let now = time_provider.now();
        let plan = PaymentPlan::new(draft, validated, now);

        self.plans.insert(plan.id, plan.clone());
        self.publish(vec![Event::PlanCreated {
            plan_id: plan.id,
            plot_price: plan.validated.plot_price(),
            down_payment: plan.validated.down_payment(),
            scheduled_total: plan.validated.scheduled_total(),
            timestamp: now,
        }])?;
        info!(plan_id = %plan.id, plot_size_class = %plan.terms.plot_size_class, "payment plan created");
        Ok(plan)
    }

    /// replace a plan's terms, revalidating when anything payment-related changed
    ///
    /// Plans referenced by an active schedule only accept payment-affecting
    /// edits as an administrative correction; existing schedules keep the
    /// obligations they were built with.
    pub fn update_plan(
        &self,
        plan_id: PlanId,
        draft: PlanDraft,
        administrative: bool,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentPlan> {
        let existing = self.plan(plan_id)?;
        let revalidate = existing.terms.affects_payments(&draft);

        if revalidate && !administrative && self.plan_in_use(plan_id)? {
            warn!(plan_id = %plan_id, "refusing edit of plan referenced by an active schedule");
            return Err(EngineError::PlanInUse { id: plan_id });
        }

        let validated = if revalidate {
            self.validator.validate(&draft)?
        } else {
            existing.validated.clone()
        };

        let now = time_provider.now();
        let updated = {
            let mut entry = self
                .plans
                .get_mut(&plan_id)
                .ok_or(EngineError::PlanNotFound { id: plan_id })?;
            entry.terms = draft;
            entry.validated = validated;
            entry.updated_at = now;
            entry.value().clone()
        };

        self.publish(vec![Event::PlanUpdated {
            plan_id,
            revalidated: revalidate,
            administrative,
            timestamp: now,
        }])?;
        info!(plan_id = %plan_id, revalidated = revalidate, administrative, "payment plan updated");
        Ok(updated)
    }

    pub fn set_plan_status(
        &self,
        plan_id: PlanId,
        status: PlanStatus,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentPlan> {
        let mut entry = self
            .plans
            .get_mut(&plan_id)
            .ok_or(EngineError::PlanNotFound { id: plan_id })?;
        entry.status = status;
        entry.updated_at = time_provider.now();
        Ok(entry.value().clone())
    }

    pub fn plan(&self, plan_id: PlanId) -> Result<PaymentPlan> {
        self.plans
            .get(&plan_id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::PlanNotFound { id: plan_id })
    }

    pub fn plans(&self) -> Vec<PaymentPlan> {
        self.plans.iter().map(|p| p.value().clone()).collect()
    }

    fn plan_in_use(&self, plan_id: PlanId) -> Result<bool> {
        let cells: Vec<(BookingId, Arc<Mutex<BookingAccount>>)> = self
            .accounts
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        for (booking_id, cell) in cells {
            let account = cell.lock().map_err(|_| poisoned(booking_id))?;
            if account
                .schedules
                .iter()
                .any(|s| s.is_active() && s.plan_id == Some(plan_id))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // schedule creation

    /// create the schedule for a booking, opening the booking on first use
    pub fn create_booking(&self, request: BookingRequest, time_provider: &SafeTimeProvider) -> Result<BuiltSchedule> {
        let booking_id = request.booking_id;
        let schedule_request = self.schedule_request(&request, time_provider)?;

        let attach = |account: &mut BookingAccount, events: &mut EventStore| {
            self.attach_schedule(account, &schedule_request, time_provider, events)
        };

        if let Some(cell) = self.accounts.get(&booking_id).map(|e| Arc::clone(e.value())) {
            let built = self.transact_cell(&cell, booking_id, "create_schedule", time_provider, attach)?;
            self.index(&built, booking_id);
            return Ok(built);
        }

        let mut account = BookingAccount::new(Booking::new(
            booking_id,
            request.total_amount,
            request.down_payment_requested,
            time_provider.now(),
        ));
        let mut staged = EventStore::new();
        let built = attach(&mut account, &mut staged)
            .inspect_err(|err| warn!(booking_id = %booking_id, error = %err, "booking rejected"))?;
        self.verify(&account, "create_booking", time_provider)?;

        match self.accounts.entry(booking_id) {
            Entry::Vacant(slot) => {
                account.version = 1;
                slot.insert(Arc::new(Mutex::new(account)));
            }
            Entry::Occupied(_) => return Err(EngineError::BookingExists { id: booking_id }),
        }
        self.index(&built, booking_id);
        self.publish(staged.take_events())?;
        info!(booking_id = %booking_id, schedule_id = %built.schedule.id, "booking opened");
        Ok(built)
    }

    fn schedule_request(&self, request: &BookingRequest, time_provider: &SafeTimeProvider) -> Result<ScheduleRequest> {
        let terms = match &request.terms {
            BookingTerms::Plan { plan_id } => {
                let plan = self.plan(*plan_id)?;
                if !plan.is_active() {
                    return Err(EngineError::PlanInactive { id: *plan_id });
                }
                if plan.validated.scheduled_total() != request.total_amount {
                    debug!(
                        plan_id = %plan_id,
                        requested = %request.total_amount,
                        scheduled = %plan.validated.scheduled_total(),
                        "booking total re-based to plan schedule total"
                    );
                }
                ScheduleTerms::FromPlan {
                    plan_id: Some(*plan_id),
                    plan: plan.validated,
                }
            }
            BookingTerms::AdHoc {
                payment_type,
                installment_count,
            } => ScheduleTerms::AdHoc {
                total_amount: request.total_amount,
                down_payment: request.down_payment_requested,
                payment_type: *payment_type,
                installment_count: *installment_count,
            },
        };

        Ok(ScheduleRequest {
            booking_id: request.booking_id,
            start_date: request
                .start_date
                .unwrap_or_else(|| time_provider.now().date_naive()),
            down_payment_paid: request.down_payment_paid,
            terms,
        })
    }

    fn attach_schedule(
        &self,
        account: &mut BookingAccount,
        request: &ScheduleRequest,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<BuiltSchedule> {
        if let Some(active) = account.active_schedule() {
            return Err(EngineError::ActiveScheduleExists {
                booking_id: account.booking.id,
                schedule_id: active.id,
            });
        }
        if account.booking.status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidBookingTerms {
                message: format!("booking {} is cancelled", account.booking.id),
            });
        }

        let built = self.builder.build(request, time_provider)?;
        let now = time_provider.now();
        let schedule = &built.schedule;

        // earlier schedules keep what they collected; the new one adds its own total
        let prior_paid = account.booking.paid_amount;
        let mut change = account
            .booking
            .rebase(prior_paid + schedule.total_amount, schedule.required_down_payment, now);
        if schedule.down_payment.is_positive() {
            account.payments.push(Payment::down_payment(
                schedule.id,
                account.booking.id,
                schedule.down_payment,
                now,
            ));
            change = account.booking.apply_paid_delta(schedule.down_payment, now).or(change);
        }

        events.emit(Event::ScheduleCreated {
            schedule_id: schedule.id,
            booking_id: schedule.booking_id,
            plan_id: schedule.plan_id,
            total_amount: schedule.total_amount,
            down_payment: schedule.down_payment,
            installment_count: schedule.installment_count,
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            timestamp: now,
        });
        if let Some((old_status, new_status)) = change {
            events.emit(Event::BookingStatusChanged {
                booking_id: account.booking.id,
                old_status,
                new_status,
                timestamp: now,
            });
        }

        account.schedules.push(built.schedule.clone());
        account.installments.extend(built.installments.iter().cloned());
        Ok(built)
    }

    fn index(&self, built: &BuiltSchedule, booking_id: BookingId) {
        self.schedule_index.insert(built.schedule.id, booking_id);
    }

    /// cancel the active schedule and its open installments
    pub fn cancel_schedule(
        &self,
        booking_id: BookingId,
        reason: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentSchedule> {
        self.transact(booking_id, "cancel_schedule", time_provider, |account, events| {
            let idx = account
                .active_index()
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;
            Ok(cancel_at(account, idx, reason, time_provider, events))
        })
    }

    /// cancel the booking together with its active schedule
    pub fn cancel_booking(&self, booking_id: BookingId, time_provider: &SafeTimeProvider) -> Result<Booking> {
        self.transact(booking_id, "cancel_booking", time_provider, |account, events| {
            if let Some(idx) = account.active_index() {
                cancel_at(account, idx, "booking cancelled", time_provider, events);
            }
            let now = time_provider.now();
            if let Some((old_status, new_status)) = account.booking.cancel(now) {
                events.emit(Event::BookingStatusChanged {
                    booking_id,
                    old_status,
                    new_status,
                    timestamp: now,
                });
            }
            Ok(account.booking.clone())
        })
    }

    /// freeze or unfreeze the booking's current schedule
    pub fn set_schedule_suspended(
        &self,
        booking_id: BookingId,
        suspended: bool,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentSchedule> {
        let (from, to) = if suspended {
            (ScheduleStatus::Active, ScheduleStatus::Suspended)
        } else {
            (ScheduleStatus::Suspended, ScheduleStatus::Active)
        };

        self.transact(booking_id, "set_schedule_suspended", time_provider, |account, events| {
            if to == ScheduleStatus::Active {
                if let Some(active) = account.active_schedule() {
                    return Err(EngineError::ActiveScheduleExists {
                        booking_id,
                        schedule_id: active.id,
                    });
                }
            }
            let idx = account
                .schedules
                .iter()
                .rposition(|s| s.status == from)
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;

            let now = time_provider.now();
            let schedule = &mut account.schedules[idx];
            schedule.status = to;
            schedule.updated_at = now;
            events.emit(Event::ScheduleStatusChanged {
                schedule_id: schedule.id,
                old_status: from,
                new_status: to,
                reason: if suspended { "suspended" } else { "resumed" }.to_string(),
                timestamp: now,
            });
            Ok(schedule.clone())
        })
    }

    /// override the late fee rate of the active schedule
    pub fn set_late_fee_rate(
        &self,
        booking_id: BookingId,
        rate: Rate,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentSchedule> {
        if rate < Rate::ZERO {
            return Err(EngineError::InvalidConfiguration {
                message: format!("late fee rate {} is negative", rate),
            });
        }
        self.transact(booking_id, "set_late_fee_rate", time_provider, |account, _| {
            let idx = account
                .active_index()
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;
            let schedule = &mut account.schedules[idx];
            schedule.late_fee_rate = rate;
            schedule.updated_at = time_provider.now();
            Ok(schedule.clone())
        })
    }

    // payments

    /// record a cleared manual payment against the booking's active schedule
    pub fn record_payment(
        &self,
        booking_id: BookingId,
        request: PaymentRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<ScheduleSummary> {
        request.validate_details()?;

        let (summary, payment_id) = self.transact(booking_id, "record_payment", time_provider, |account, events| {
            let idx = account
                .active_index()
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;
            let schedule_id = account.schedules[idx].id;
            let payment = Payment::completed(schedule_id, booking_id, &request, time_provider.now());

            let BookingAccount {
                booking,
                schedules,
                installments,
                payments,
                ..
            } = account;
            self.allocator.allocate(
                booking,
                &mut schedules[idx],
                installments,
                request.amount,
                Some(payment.id),
                time_provider,
                events,
            )?;

            let payment_id = payment.id;
            payments.push(payment);
            Ok((ScheduleSummary::from_schedule(&schedules[idx], payments), payment_id))
        })?;

        self.payment_index.insert(payment_id, booking_id);
        Ok(summary)
    }

    /// hold an uncleared payment without allocating it
    pub fn register_pending_payment(
        &self,
        booking_id: BookingId,
        request: PaymentRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<Payment> {
        request.validate_details()?;
        if !request.amount.is_positive() {
            return Err(EngineError::InvalidAmount { amount: request.amount });
        }

        let payment = self.transact(booking_id, "register_pending_payment", time_provider, |account, events| {
            let schedule = account
                .active_schedule()
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;
            if request.amount > schedule.pending_amount {
                return Err(EngineError::Overpayment {
                    pending: schedule.pending_amount,
                    requested: request.amount,
                });
            }

            let now = time_provider.now();
            let payment = Payment::pending(schedule.id, booking_id, &request, now);
            events.emit(Event::PaymentRegistered {
                payment_id: payment.id,
                schedule_id: payment.schedule_id,
                amount: payment.amount,
                method: payment.method,
                timestamp: now,
            });
            account.payments.push(payment.clone());
            Ok(payment)
        })?;

        self.payment_index.insert(payment.id, booking_id);
        Ok(payment)
    }

    /// clear a pending payment and allocate it
    pub fn settle_pending_payment(
        &self,
        payment_id: PaymentId,
        time_provider: &SafeTimeProvider,
    ) -> Result<ScheduleSummary> {
        let booking_id = self.booking_for_payment(payment_id)?;

        self.transact(booking_id, "settle_pending_payment", time_provider, |account, events| {
            let p_idx = account.payment_index(payment_id)?;
            let payment = &account.payments[p_idx];
            if payment.status != PaymentStatus::Pending {
                return Err(EngineError::InvalidPaymentState {
                    id: payment_id,
                    status: payment.status,
                    expected: PaymentStatus::Pending,
                });
            }
            let s_idx = account.schedule_index(payment.schedule_id)?;
            let amount = payment.amount;

            let BookingAccount {
                booking,
                schedules,
                installments,
                payments,
                ..
            } = account;
            self.allocator.allocate(
                booking,
                &mut schedules[s_idx],
                installments,
                amount,
                Some(payment_id),
                time_provider,
                events,
            )?;
            payments[p_idx].status = PaymentStatus::Completed;
            payments[p_idx].recorded_at = time_provider.now();

            Ok(ScheduleSummary::from_schedule(&schedules[s_idx], payments))
        })
    }

    /// mark a pending payment failed or cancelled
    pub fn void_pending_payment(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        time_provider: &SafeTimeProvider,
    ) -> Result<Payment> {
        if !matches!(status, PaymentStatus::Failed | PaymentStatus::Cancelled) {
            return Err(EngineError::InvalidPaymentState {
                id: payment_id,
                status,
                expected: PaymentStatus::Failed,
            });
        }
        let booking_id = self.booking_for_payment(payment_id)?;

        self.transact(booking_id, "void_pending_payment", time_provider, |account, events| {
            let idx = account.payment_index(payment_id)?;
            let payment = &mut account.payments[idx];
            if payment.status != PaymentStatus::Pending {
                return Err(EngineError::InvalidPaymentState {
                    id: payment_id,
                    status: payment.status,
                    expected: PaymentStatus::Pending,
                });
            }
            payment.status = status;
            events.emit(Event::PaymentVoided {
                payment_id,
                status,
                timestamp: time_provider.now(),
            });
            Ok(payment.clone())
        })
    }

    /// refund part or all of a completed installment payment
    ///
    /// The original payment is left as recorded; the refund is a new
    /// negative payment linked to it.
    pub fn refund_payment(
        &self,
        payment_id: PaymentId,
        amount: Money,
        time_provider: &SafeTimeProvider,
    ) -> Result<Payment> {
        let booking_id = self.booking_for_payment(payment_id)?;

        let refund = self.transact(booking_id, "refund_payment", time_provider, |account, events| {
            let p_idx = account.payment_index(payment_id)?;
            let original = account.payments[p_idx].clone();
            if !original.is_completed() || original.category != PaymentCategory::Installment {
                return Err(EngineError::NotRefundable {
                    id: payment_id,
                    reason: format!("{:?} {:?} payment", original.status, original.category),
                });
            }

            let already_refunded: Money = account
                .payments
                .iter()
                .filter(|p| p.refund_of == Some(payment_id) && p.is_completed())
                .map(|p| p.amount.abs())
                .sum();
            let refundable = original.amount - already_refunded;
            if amount > refundable {
                return Err(EngineError::RefundExceedsPaid {
                    refundable,
                    requested: amount,
                });
            }

            let s_idx = account.schedule_index(original.schedule_id)?;
            // reopening a settled schedule must not leave two active ones
            let reopens = account.schedules[s_idx].status == ScheduleStatus::Completed;
            if let Some(active) = account.active_schedule().filter(|a| reopens && a.id != original.schedule_id) {
                return Err(EngineError::ActiveScheduleExists {
                    booking_id,
                    schedule_id: active.id,
                });
            }
            let BookingAccount {
                booking,
                schedules,
                installments,
                payments,
                ..
            } = account;
            let reversal = self.refunds.reverse(
                booking,
                &mut schedules[s_idx],
                installments,
                amount,
                time_provider,
                events,
            )?;

            let refund = Payment::refund(&original, amount, time_provider.now());
            events.emit(Event::PaymentRefunded {
                payment_id,
                refund_id: refund.id,
                amount,
                installments_reopened: reversal.reopened.len(),
                timestamp: time_provider.now(),
            });
            payments.push(refund.clone());
            Ok(refund)
        })?;

        self.payment_index.insert(refund.id, booking_id);
        Ok(refund)
    }

    // overdue handling

    /// mark the active schedule's past-due installments overdue
    pub fn mark_overdue(&self, booking_id: BookingId, time_provider: &SafeTimeProvider) -> Result<usize> {
        let today = time_provider.now().date_naive();
        self.transact(booking_id, "mark_overdue", time_provider, |account, events| {
            let Some(idx) = account.active_index() else {
                return Ok(0);
            };
            Ok(self
                .late_fees
                .mark_overdue(&account.schedules[idx], &mut account.installments, today, events))
        })
    }

    /// mark overdue installments and recompute late fees for one booking
    pub fn accrue_late_fees(&self, booking_id: BookingId, time_provider: &SafeTimeProvider) -> Result<LateFeeSummary> {
        let today = time_provider.now().date_naive();
        self.transact(booking_id, "accrue_late_fees", time_provider, |account, events| {
            let idx = account
                .active_index()
                .ok_or(EngineError::NoActiveSchedule { booking_id })?;
            let BookingAccount {
                schedules, installments, ..
            } = account;
            self.late_fees.mark_overdue(&schedules[idx], installments, today, events);
            Ok(self.late_fees.accrue(&mut schedules[idx], installments, today, events))
        })
    }

    /// periodic sweep over every booking with an active schedule
    ///
    /// A booking that fails is recorded in `failures` and the sweep moves on.
    pub fn run_overdue_sweep(&self, time_provider: &SafeTimeProvider) -> LateFeeSweep {
        let today = time_provider.now().date_naive();
        let booking_ids: Vec<BookingId> = self.accounts.iter().map(|e| *e.key()).collect();
        let mut sweep = LateFeeSweep::default();

        for booking_id in booking_ids {
            let outcome = self.transact(booking_id, "overdue_sweep", time_provider, |account, events| {
                let Some(idx) = account.active_index() else {
                    return Ok(None);
                };
                let BookingAccount {
                    schedules, installments, ..
                } = account;
                let marked = self.late_fees.mark_overdue(&schedules[idx], installments, today, events);
                let summary = self.late_fees.accrue(&mut schedules[idx], installments, today, events);
                Ok(Some((marked, summary)))
            });

            match outcome {
                Ok(Some((marked, summary))) => {
                    sweep.schedules_processed += 1;
                    sweep.installments_marked_overdue += marked;
                    sweep.total_late_fees_accrued += summary.total_late_fees;
                    sweep.accrued_this_run += summary.accrued_delta;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(booking_id = %booking_id, error = %err, "overdue sweep skipped booking");
                    sweep.failures.push(SweepFailure {
                        booking_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            schedules = sweep.schedules_processed,
            marked = sweep.installments_marked_overdue,
            total = %sweep.total_late_fees_accrued,
            failed = sweep.failures.len(),
            "overdue sweep finished"
        );
        sweep
    }

    // queries

    pub fn account(&self, booking_id: BookingId) -> Result<BookingAccount> {
        let cell = self.cell(booking_id)?;
        let account = cell.lock().map_err(|_| poisoned(booking_id))?;
        Ok(account.clone())
    }

    pub fn booking(&self, booking_id: BookingId) -> Result<Booking> {
        Ok(self.account(booking_id)?.booking)
    }

    pub fn active_schedule(&self, booking_id: BookingId) -> Result<PaymentSchedule> {
        self.account(booking_id)?
            .active_schedule()
            .cloned()
            .ok_or(EngineError::NoActiveSchedule { booking_id })
    }

    pub fn schedule(&self, schedule_id: ScheduleId) -> Result<PaymentSchedule> {
        let account = self.account(self.booking_for_schedule(schedule_id)?)?;
        let idx = account.schedule_index(schedule_id)?;
        Ok(account.schedules[idx].clone())
    }

    /// installments of a schedule, oldest due date first
    pub fn installments(&self, schedule_id: ScheduleId) -> Result<Vec<Installment>> {
        let account = self.account(self.booking_for_schedule(schedule_id)?)?;
        let mut installments: Vec<Installment> = account
            .installments
            .into_iter()
            .filter(|i| i.schedule_id == schedule_id)
            .collect();
        sort_by_due_date(&mut installments);
        Ok(installments)
    }

    pub fn pending_installments(&self, schedule_id: ScheduleId) -> Result<Vec<Installment>> {
        Ok(self
            .installments(schedule_id)?
            .into_iter()
            .filter(|i| matches!(i.status, InstallmentStatus::Pending | InstallmentStatus::Overdue))
            .collect())
    }

    pub fn payments(&self, schedule_id: ScheduleId) -> Result<Vec<Payment>> {
        let account = self.account(self.booking_for_schedule(schedule_id)?)?;
        Ok(account
            .payments
            .into_iter()
            .filter(|p| p.schedule_id == schedule_id)
            .collect())
    }

    pub fn summary(&self, booking_id: BookingId) -> Result<ScheduleSummary> {
        let account = self.account(booking_id)?;
        let schedule = account
            .active_schedule()
            .or(account.schedules.last())
            .ok_or(EngineError::NoActiveSchedule { booking_id })?;
        Ok(ScheduleSummary::from_schedule(schedule, &account.payments))
    }

    pub fn view(&self, booking_id: BookingId) -> Result<ScheduleView> {
        let account = self.account(booking_id)?;
        let schedule = account
            .active_schedule()
            .or(account.schedules.last())
            .ok_or(EngineError::NoActiveSchedule { booking_id })?;
        Ok(ScheduleView::build(
            &account.booking,
            schedule,
            &account.installments,
            &account.payments,
        ))
    }

    /// run the reconciliation guard against the stored state
    pub fn reconcile(&self, booking_id: BookingId) -> Result<()> {
        let account = self.account(booking_id)?;
        self.guard
            .check_invariants(
                &account.booking,
                &account.schedules,
                &account.installments,
                &account.payments,
            )
            .map_err(EngineError::from)
    }

    pub fn take_events(&self) -> Result<Vec<Event>> {
        let mut store = self.events.lock().map_err(|_| EngineError::LockPoisoned {
            resource: "event store".to_string(),
        })?;
        Ok(store.take_events())
    }

    // transactions

    fn cell(&self, booking_id: BookingId) -> Result<Arc<Mutex<BookingAccount>>> {
        self.accounts
            .get(&booking_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(EngineError::BookingNotFound { id: booking_id })
    }

    fn booking_for_schedule(&self, schedule_id: ScheduleId) -> Result<BookingId> {
        self.schedule_index
            .get(&schedule_id)
            .map(|e| *e.value())
            .ok_or(EngineError::ScheduleNotFound { id: schedule_id })
    }

    fn booking_for_payment(&self, payment_id: PaymentId) -> Result<BookingId> {
        self.payment_index
            .get(&payment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::PaymentNotFound { id: payment_id })
    }

    fn transact<T, F>(
        &self,
        booking_id: BookingId,
        operation: &str,
        time_provider: &SafeTimeProvider,
        apply: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut BookingAccount, &mut EventStore) -> Result<T>,
    {
        let cell = self.cell(booking_id)?;
        self.transact_cell(&cell, booking_id, operation, time_provider, apply)
    }

    fn transact_cell<T, F>(
        &self,
        cell: &Mutex<BookingAccount>,
        booking_id: BookingId,
        operation: &str,
        time_provider: &SafeTimeProvider,
        apply: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut BookingAccount, &mut EventStore) -> Result<T>,
    {
        let mut stored = cell.lock().map_err(|_| poisoned(booking_id))?;
        let mut working = stored.clone();
        let mut staged = EventStore::new();

        let output = apply(&mut working, &mut staged)
            .inspect_err(|err| warn!(booking_id = %booking_id, operation, error = %err, "operation rejected"))?;
        self.verify(&working, operation, time_provider)?;

        working.version = stored.version + 1;
        *stored = working;
        let version = stored.version;
        drop(stored);

        self.publish(staged.take_events())?;
        info!(booking_id = %booking_id, operation, version, "transaction committed");
        Ok(output)
    }

    fn verify(&self, account: &BookingAccount, operation: &str, time_provider: &SafeTimeProvider) -> Result<()> {
        let checked = self.guard.check_invariants(
            &account.booking,
            &account.schedules,
            &account.installments,
            &account.payments,
        );
        if let Err(err) = checked {
            self.audit.reconciliation_failed(operation, &err);
            self.publish(vec![Event::ReconciliationFailed {
                booking_id: err.booking_id,
                operation: operation.to_string(),
                violations: err.violations.clone(),
                timestamp: time_provider.now(),
            }])?;
            return Err(err.into());
        }
        Ok(())
    }

    fn publish(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut store = self.events.lock().map_err(|_| EngineError::LockPoisoned {
            resource: "event store".to_string(),
        })?;
        store.extend(events);
        Ok(())
    }
}

fn poisoned(booking_id: BookingId) -> EngineError {
    EngineError::LockPoisoned {
        resource: format!("booking {}", booking_id),
    }
}

/// cancel schedule `idx` and every open installment on it
fn cancel_at(
    account: &mut BookingAccount,
    idx: usize,
    reason: &str,
    time_provider: &SafeTimeProvider,
    events: &mut EventStore,
) -> PaymentSchedule {
    let now = time_provider.now();
    let schedule = &mut account.schedules[idx];
    let old_status = schedule.status;
    schedule.status = ScheduleStatus::Cancelled;
    schedule.updated_at = now;

    for installment in account
        .installments
        .iter_mut()
        .filter(|i| i.schedule_id == schedule.id && i.is_open())
    {
        installment.status = InstallmentStatus::Cancelled;
    }

    events.emit(Event::ScheduleStatusChanged {
        schedule_id: schedule.id,
        old_status,
        new_status: ScheduleStatus::Cancelled,
        reason: reason.to_string(),
        timestamp: now,
    });
    schedule.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InvariantViolation;
    use crate::plans::DownPaymentSpec;
    use crate::types::PaymentMethod;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        failures: Mutex<Vec<(String, ReconciliationError)>>,
    }

    impl AuditSink for RecordingSink {
        fn reconciliation_failed(&self, operation: &str, error: &ReconciliationError) {
            self.failures
                .lock()
                .unwrap()
                .push((operation.to_string(), error.clone()));
        }
    }

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()))
    }

    fn ad_hoc_booking(ledger: &Ledger, time: &SafeTimeProvider) -> BookingId {
        let booking_id = Uuid::new_v4();
        ledger
            .create_booking(
                BookingRequest {
                    booking_id,
                    total_amount: Money::from_major(1_100),
                    down_payment_requested: Money::from_major(100),
                    down_payment_paid: Money::from_major(100),
                    start_date: None,
                    terms: BookingTerms::AdHoc {
                        payment_type: PaymentType::Installments,
                        installment_count: 4,
                    },
                },
                time,
            )
            .unwrap();
        booking_id
    }

    #[test]
    fn test_inconsistent_commit_is_rolled_back() {
        let sink = Arc::new(RecordingSink::default());
        let ledger = Ledger::default().with_audit_sink(sink.clone());
        let time = time();
        let booking_id = ad_hoc_booking(&ledger, &time);
        let before = ledger.account(booking_id).unwrap();

        let result = ledger.transact(booking_id, "corrupt", &time, |account, _| {
            account.booking.paid_amount += Money::from_major(5);
            Ok(())
        });

        match result {
            Err(EngineError::Reconciliation(err)) => {
                assert!(matches!(err.violations[..], [InvariantViolation::BookingBalance { .. }]));
            }
            other => panic!("expected reconciliation failure, got {:?}", other),
        }

        let after = ledger.account(booking_id).unwrap();
        assert_eq!(after.booking, before.booking);
        assert_eq!(after.version, before.version);

        let failures = sink.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "corrupt");
        assert!(ledger
            .take_events()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::ReconciliationFailed { .. })));
    }

    #[test]
    fn test_version_bumps_on_commit_only() {
        let ledger = Ledger::default();
        let time = time();
        let booking_id = ad_hoc_booking(&ledger, &time);
        assert_eq!(ledger.account(booking_id).unwrap().version, 1);

        ledger
            .record_payment(booking_id, PaymentRequest::new(Money::from_major(250), PaymentMethod::Cash), &time)
            .unwrap();
        assert_eq!(ledger.account(booking_id).unwrap().version, 2);

        let rejected = ledger.record_payment(
            booking_id,
            PaymentRequest::new(Money::from_major(5_000), PaymentMethod::Cash),
            &time,
        );
        assert!(matches!(rejected, Err(EngineError::Overpayment { .. })));
        assert_eq!(ledger.account(booking_id).unwrap().version, 2);
    }

    #[test]
    fn test_initial_down_payment_recorded() {
        let ledger = Ledger::default();
        let time = time();
        let booking_id = ad_hoc_booking(&ledger, &time);

        let account = ledger.account(booking_id).unwrap();
        assert_eq!(account.payments.len(), 1);
        assert_eq!(account.payments[0].category, PaymentCategory::DownPayment);
        assert_eq!(account.booking.status, BookingStatus::Confirmed);
        assert_eq!(account.booking.paid_amount, Money::from_major(100));
        assert!(ledger.reconcile(booking_id).is_ok());
    }

    #[test]
    fn test_plan_edit_blocked_while_in_use() {
        let ledger = Ledger::default();
        let time = time();
        let draft = PlanDraft::new(
            "5 marla",
            Money::from_major(5_000_000),
            DownPaymentSpec::Percentage(dec!(20)),
            Money::from_major(166_667),
        )
        .with_tenure(24);
        let plan = ledger.create_plan(draft.clone(), &time).unwrap();

        let booking_id = Uuid::new_v4();
        ledger
            .create_booking(
                BookingRequest {
                    booking_id,
                    total_amount: Money::from_major(5_000_000),
                    down_payment_requested: Money::from_major(1_000_000),
                    down_payment_paid: Money::from_major(1_000_000),
                    start_date: None,
                    terms: BookingTerms::Plan { plan_id: plan.id },
                },
                &time,
            )
            .unwrap();

        let mut renamed = draft.clone();
        renamed.plot_size_class = "5 marla corner".to_string();
        assert!(ledger.update_plan(plan.id, renamed, false, &time).is_ok());

        let mut repriced = draft.clone();
        repriced.monthly_payment = Money::from_major(170_000);
        assert!(matches!(
            ledger.update_plan(plan.id, repriced.clone(), false, &time),
            Err(EngineError::PlanInUse { .. })
        ));

        let corrected = ledger.update_plan(plan.id, repriced, true, &time).unwrap();
        assert_eq!(corrected.validated.monthly_payment(), Money::from_major(170_000));
        // the live schedule keeps its original obligations
        let schedule = ledger.active_schedule(booking_id).unwrap();
        assert_eq!(schedule.installment_amount, Money::from_major(166_667));
    }

    #[test]
    fn test_inactive_plan_cannot_seed_booking() {
        let ledger = Ledger::default();
        let time = time();
        let plan = ledger
            .create_plan(
                PlanDraft::new(
                    "5 marla",
                    Money::from_major(5_000_000),
                    DownPaymentSpec::Percentage(dec!(20)),
                    Money::from_major(166_667),
                ),
                &time,
            )
            .unwrap();
        ledger.set_plan_status(plan.id, PlanStatus::Inactive, &time).unwrap();

        let result = ledger.create_booking(
            BookingRequest {
                booking_id: Uuid::new_v4(),
                total_amount: Money::from_major(5_000_000),
                down_payment_requested: Money::from_major(1_000_000),
                down_payment_paid: Money::from_major(1_000_000),
                start_date: None,
                terms: BookingTerms::Plan { plan_id: plan.id },
            },
            &time,
        );
        assert!(matches!(result, Err(EngineError::PlanInactive { .. })));
    }

    #[test]
    fn test_suspended_schedule_refuses_payments() {
        let ledger = Ledger::default();
        let time = time();
        let booking_id = ad_hoc_booking(&ledger, &time);

        ledger.set_schedule_suspended(booking_id, true, &time).unwrap();
        let result = ledger.record_payment(
            booking_id,
            PaymentRequest::new(Money::from_major(10), PaymentMethod::Cash),
            &time,
        );
        assert!(matches!(result, Err(EngineError::NoActiveSchedule { .. })));

        let resumed = ledger.set_schedule_suspended(booking_id, false, &time).unwrap();
        assert_eq!(resumed.status, ScheduleStatus::Active);
        assert!(ledger
            .record_payment(booking_id, PaymentRequest::new(Money::from_major(10), PaymentMethod::Cash), &time)
            .is_ok());
    }

    #[test]
    fn test_sweep_continues_past_failing_booking() {
        let ledger = Ledger::default();
        let time = time();
        let healthy = ad_hoc_booking(&ledger, &time);
        let broken = ad_hoc_booking(&ledger, &time);

        let cell = ledger.cell(broken).unwrap();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| {
                let _guard = cell.lock().unwrap();
                panic!("worker died holding the account");
            });
            assert!(handle.join().is_err());
        });

        // first installment falls due on 2024-02-01
        time.test_control().unwrap().advance(chrono::Duration::days(31 + 15));
        let sweep = ledger.run_overdue_sweep(&time);

        assert_eq!(sweep.schedules_processed, 1);
        assert_eq!(sweep.installments_marked_overdue, 1);
        assert_eq!(sweep.failures.len(), 1);
        assert_eq!(sweep.failures[0].booking_id, broken);
        assert!(ledger.active_schedule(healthy).unwrap().total_late_fees > Money::ZERO);
    }
}
