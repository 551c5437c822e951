pub mod booking;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod payments;
pub mod plans;
pub mod reconciliation;
pub mod schedule;
pub mod serialization;
pub mod types;

// re-export key types
pub use booking::Booking;
pub use config::{EngineConfig, LateFeeConfig, ToleranceConfig};
pub use decimal::{Money, Rate};
pub use errors::{
    EngineError, InvariantViolation, PlanViolation, PlanViolations, ReconciliationError, Result,
};
pub use events::{Event, EventStore};
pub use fees::{LateFeeAccrual, LateFeeCalculation, LateFeeSummary};
pub use ledger::{
    AuditSink, BookingAccount, BookingRequest, BookingTerms, LateFeeSweep, Ledger, SweepFailure, TracingAuditSink,
};
pub use payments::{
    Allocation, Payment, PaymentAllocator, PaymentRequest, RefundReversal, Reversal,
};
pub use plans::{DownPaymentSpec, PaymentPlan, PlanDraft, PlanValidator, ValidatedPlan};
pub use reconciliation::ReconciliationGuard;
pub use schedule::{
    BuiltSchedule, Installment, PaymentSchedule, ScheduleBuilder, ScheduleRequest, ScheduleTerms,
};
pub use serialization::{ScheduleSummary, ScheduleView};
pub use types::{
    BookingId, BookingStatus, Cadence, ChequeDetails, InstallmentId, InstallmentStatus,
    InstallmentType, PaymentCategory, PaymentDetails, PaymentId, PaymentMethod, PaymentStatus,
    PaymentType, PlanId, PlanStatus, ScheduleId, ScheduleStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
