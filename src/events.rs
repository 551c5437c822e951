use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::InvariantViolation;
use crate::types::{
    BookingId, BookingStatus, InstallmentId, PaymentId, PaymentMethod, PaymentStatus, PlanId,
    ScheduleId, ScheduleStatus,
};

/// all events that can be emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // plan events
    PlanCreated {
        plan_id: PlanId,
        plot_price: Money,
        down_payment: Money,
        scheduled_total: Money,
        timestamp: DateTime<Utc>,
    },
    PlanUpdated {
        plan_id: PlanId,
        revalidated: bool,
        administrative: bool,
        timestamp: DateTime<Utc>,
    },

    // schedule events
    ScheduleCreated {
        schedule_id: ScheduleId,
        booking_id: BookingId,
        plan_id: Option<PlanId>,
        total_amount: Money,
        down_payment: Money,
        installment_count: u32,
        start_date: NaiveDate,
        end_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    ScheduleCompleted {
        schedule_id: ScheduleId,
        final_payment: Money,
        timestamp: DateTime<Utc>,
    },
    ScheduleStatusChanged {
        schedule_id: ScheduleId,
        old_status: ScheduleStatus,
        new_status: ScheduleStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentRegistered {
        payment_id: PaymentId,
        schedule_id: ScheduleId,
        amount: Money,
        method: PaymentMethod,
        timestamp: DateTime<Utc>,
    },
    PaymentApplied {
        payment_id: PaymentId,
        schedule_id: ScheduleId,
        amount: Money,
        installments_paid: usize,
        new_paid: Money,
        new_pending: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentVoided {
        payment_id: PaymentId,
        status: PaymentStatus,
        timestamp: DateTime<Utc>,
    },
    PaymentRefunded {
        payment_id: PaymentId,
        refund_id: PaymentId,
        amount: Money,
        installments_reopened: usize,
        timestamp: DateTime<Utc>,
    },

    // installment events
    InstallmentPaid {
        installment_id: InstallmentId,
        amount: Money,
        due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    InstallmentSplit {
        installment_id: InstallmentId,
        remainder_id: InstallmentId,
        paid_amount: Money,
        remainder_amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentReopened {
        installment_id: InstallmentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentsMarkedOverdue {
        schedule_id: ScheduleId,
        count: usize,
        as_of: NaiveDate,
    },

    // late fee events
    LateFeesAccrued {
        schedule_id: ScheduleId,
        overdue_installments: usize,
        total_late_fees: Money,
        as_of: NaiveDate,
    },

    // booking events
    BookingStatusChanged {
        booking_id: BookingId,
        old_status: BookingStatus,
        new_status: BookingStatus,
        timestamp: DateTime<Utc>,
    },

    // consistency events
    ReconciliationFailed {
        booking_id: BookingId,
        operation: String,
        violations: Vec<InvariantViolation>,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// append events staged by a committed transaction
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
