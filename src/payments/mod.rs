pub mod allocator;
pub mod refund;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::types::{
    BookingId, PaymentCategory, PaymentDetails, PaymentId, PaymentMethod, PaymentStatus, ScheduleId,
};

pub use allocator::{Allocation, InstallmentSplit, PaymentAllocator};
pub use refund::{RefundReversal, Reversal};

/// manual payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub method: PaymentMethod,
    pub details: PaymentDetails,
    /// defaults to the time of recording
    pub payment_date: Option<DateTime<Utc>>,
}

impl PaymentRequest {
    pub fn new(amount: Money, method: PaymentMethod) -> Self {
        Self {
            amount,
            method,
            details: PaymentDetails::default(),
            payment_date: None,
        }
    }

    pub fn with_details(mut self, details: PaymentDetails) -> Self {
        self.details = details;
        self
    }

    pub fn dated(mut self, payment_date: DateTime<Utc>) -> Self {
        self.payment_date = Some(payment_date);
        self
    }

    /// method-specific field checks
    pub fn validate_details(&self) -> Result<()> {
        match self.method {
            PaymentMethod::Cheque => {
                let cheque = self.details.cheque.as_ref().ok_or_else(|| EngineError::InvalidPaymentDetails {
                    message: "cheque payments require cheque details".to_string(),
                })?;
                if cheque.cheque_number.trim().is_empty() {
                    return Err(EngineError::InvalidPaymentDetails {
                        message: "cheque number is empty".to_string(),
                    });
                }
            }
            method if method.requires_reference() => {
                let has_reference = self
                    .details
                    .reference_number
                    .as_deref()
                    .is_some_and(|r| !r.trim().is_empty());
                if !has_reference {
                    return Err(EngineError::InvalidPaymentDetails {
                        message: format!("{:?} payments require a reference number", method),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// a record of money received or returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    /// negative for refunds
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub category: PaymentCategory,
    pub payment_date: DateTime<Utc>,
    pub details: PaymentDetails,
    pub refund_of: Option<PaymentId>,
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    fn from_request(
        schedule_id: ScheduleId,
        booking_id: BookingId,
        request: &PaymentRequest,
        status: PaymentStatus,
        category: PaymentCategory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            booking_id,
            amount: request.amount,
            method: request.method,
            status,
            category,
            payment_date: request.payment_date.unwrap_or(now),
            details: request.details.clone(),
            refund_of: None,
            recorded_at: now,
        }
    }

    /// cleared installment payment
    pub fn completed(schedule_id: ScheduleId, booking_id: BookingId, request: &PaymentRequest, now: DateTime<Utc>) -> Self {
        Self::from_request(schedule_id, booking_id, request, PaymentStatus::Completed, PaymentCategory::Installment, now)
    }

    /// received but not yet cleared
    pub fn pending(schedule_id: ScheduleId, booking_id: BookingId, request: &PaymentRequest, now: DateTime<Utc>) -> Self {
        Self::from_request(schedule_id, booking_id, request, PaymentStatus::Pending, PaymentCategory::Installment, now)
    }

    /// down payment collected at sale time
    pub fn down_payment(schedule_id: ScheduleId, booking_id: BookingId, amount: Money, now: DateTime<Utc>) -> Self {
        let request = PaymentRequest::new(amount, PaymentMethod::Cash);
        Self::from_request(schedule_id, booking_id, &request, PaymentStatus::Completed, PaymentCategory::DownPayment, now)
    }

    /// negative reversal linked to `original`
    pub fn refund(original: &Payment, amount: Money, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id: original.schedule_id,
            booking_id: original.booking_id,
            amount: -amount,
            method: original.method,
            status: PaymentStatus::Completed,
            category: PaymentCategory::Refund,
            payment_date: now,
            details: original.details.clone(),
            refund_of: Some(original.id),
            recorded_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// sum of completed payments against a schedule, refunds included
pub fn completed_total<'a>(payments: impl IntoIterator<Item = &'a Payment>, schedule_id: ScheduleId) -> Money {
    payments
        .into_iter()
        .filter(|p| p.schedule_id == schedule_id && p.is_completed())
        .map(|p| p.amount)
        .sum()
}
