use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{BookingId, PaymentStatus, PlanId, ScheduleId, ScheduleStatus};

/// a single reason a candidate plan was refused
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanViolation {
    #[error("more than one extra cadence configured: {cadences:?}")]
    MultipleCadence { cadences: Vec<String> },

    #[error("invalid term {field}: {reason}")]
    InvalidTerm { field: String, reason: String },

    #[error("down payment {down_payment} outside (0, {plot_price})")]
    DownPaymentRange {
        down_payment: Money,
        plot_price: Money,
    },

    #[error("schedule total {scheduled_total} does not balance plot price {plot_price}: shortfall {shortfall}, overage {overage}")]
    ScheduleImbalance {
        scheduled_total: Money,
        plot_price: Money,
        shortfall: Money,
        overage: Money,
    },

    #[error("{cadence} payment {amount} exceeds bound {bound}")]
    CadenceBound {
        cadence: String,
        amount: Money,
        bound: Money,
    },
}

/// aggregate list of plan violations, in check order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanViolations(pub Vec<PlanViolation>);

impl PlanViolations {
    pub fn iter(&self) -> impl Iterator<Item = &PlanViolation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlanViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// one failed cross-entity invariant
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    #[error("booking balance drift: paid {paid} + pending {pending} != total {total}")]
    BookingBalance {
        paid: Money,
        pending: Money,
        total: Money,
    },

    #[error("schedule paid {schedule_paid} != completed payments {payments_total}")]
    PaymentsMismatch {
        schedule_paid: Money,
        payments_total: Money,
    },

    #[error("installments {installments_total} + down payment {down_payment} != schedule total {schedule_total}")]
    InstallmentSumMismatch {
        installments_total: Money,
        down_payment: Money,
        schedule_total: Money,
    },

    #[error("installment {installment_id} has negative amount {amount}")]
    NegativeInstallment { installment_id: Uuid, amount: Money },

    #[error("schedule pending {pending} != total {total} - paid {paid}")]
    PendingDrift {
        total: Money,
        paid: Money,
        pending: Money,
    },

    #[error("schedule pending amount is negative: {pending}")]
    NegativePending { pending: Money },

    #[error("open installments {open_total} cannot absorb payment {amount}")]
    UnallocatedPayment { amount: Money, open_total: Money },

    #[error("{count} active schedules for booking {booking_id}")]
    MultipleActiveSchedules { booking_id: BookingId, count: usize },
}

/// every invariant that failed for one booking
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("reconciliation failed for booking {booking_id}: {violations:?}")]
pub struct ReconciliationError {
    pub booking_id: BookingId,
    pub violations: Vec<InvariantViolation>,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid payment plan: {0}")]
    InvalidPlan(PlanViolations),

    #[error("invalid payment amount: {amount}")]
    InvalidAmount { amount: Money },

    #[error("overpayment: pending {pending}, requested {requested}")]
    Overpayment { pending: Money, requested: Money },

    #[error("schedule not found: {id}")]
    ScheduleNotFound { id: ScheduleId },

    #[error("no active schedule for booking {booking_id}")]
    NoActiveSchedule { booking_id: BookingId },

    #[error("booking not found: {id}")]
    BookingNotFound { id: BookingId },

    #[error("booking already exists: {id}")]
    BookingExists { id: BookingId },

    #[error("payment plan not found: {id}")]
    PlanNotFound { id: PlanId },

    #[error("payment plan {id} is inactive")]
    PlanInactive { id: PlanId },

    #[error("payment plan {id} is referenced by an active schedule")]
    PlanInUse { id: PlanId },

    #[error("payment not found: {id}")]
    PaymentNotFound { id: Uuid },

    #[error("payment {id} is {status:?}, expected {expected:?}")]
    InvalidPaymentState {
        id: Uuid,
        status: PaymentStatus,
        expected: PaymentStatus,
    },

    #[error("invalid payment details: {message}")]
    InvalidPaymentDetails { message: String },

    #[error("payment {id} cannot be refunded: {reason}")]
    NotRefundable { id: Uuid, reason: String },

    #[error("refund {requested} exceeds refundable {refundable}")]
    RefundExceedsPaid { refundable: Money, requested: Money },

    #[error("schedule {id} is {status:?}")]
    ScheduleNotActive { id: ScheduleId, status: ScheduleStatus },

    #[error("booking {booking_id} already has active schedule {schedule_id}")]
    ActiveScheduleExists {
        booking_id: BookingId,
        schedule_id: ScheduleId,
    },

    #[error("invalid booking terms: {message}")]
    InvalidBookingTerms { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("invalid date: {message}")]
    InvalidDate { message: String },

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error("lock poisoned: {resource}")]
    LockPoisoned { resource: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PlanViolations> for EngineError {
    fn from(v: PlanViolations) -> Self {
        EngineError::InvalidPlan(v)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
