use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a payment plan
pub type PlanId = Uuid;

/// unique identifier for a payment schedule
pub type ScheduleId = Uuid;

/// unique identifier for an installment
pub type InstallmentId = Uuid;

/// unique identifier for a payment
pub type PaymentId = Uuid;

/// unique identifier for a booking (one sale)
pub type BookingId = Uuid;

/// payment plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Inactive,
}

/// payment schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// accepting payments
    Active,
    /// nothing left owed
    Completed,
    /// superseded or voided
    Cancelled,
    /// frozen by staff
    Suspended,
}

/// installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    /// past due date and still unpaid
    Overdue,
    Cancelled,
}

impl InstallmentStatus {
    /// still owed money
    pub fn is_open(&self) -> bool {
        matches!(self, InstallmentStatus::Pending | InstallmentStatus::Overdue)
    }
}

/// kind of obligation an installment represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentType {
    DownPaymentBalance,
    Monthly,
    Quarterly,
    BiYearly,
    Triannual,
}

/// extra cadence overlaid on the monthly installments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Quarterly,
    BiYearly,
    /// three times per year
    Triannual,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Quarterly, Cadence::BiYearly, Cadence::Triannual];

    /// months between occurrences
    pub fn period_months(&self) -> u32 {
        match self {
            Cadence::Quarterly => 3,
            Cadence::BiYearly => 6,
            Cadence::Triannual => 4,
        }
    }

    /// number of occurrences that fit in the tenure
    pub fn occurrences(&self, tenure_months: u32) -> u32 {
        tenure_months / self.period_months()
    }

    /// divisor of the post-down-payment remainder a single payment may not exceed
    pub fn bound_divisor(&self) -> u32 {
        match self {
            Cadence::Quarterly => 4,
            Cadence::BiYearly => 2,
            Cadence::Triannual => 3,
        }
    }

    pub fn installment_type(&self) -> InstallmentType {
        match self {
            Cadence::Quarterly => InstallmentType::Quarterly,
            Cadence::BiYearly => InstallmentType::BiYearly,
            Cadence::Triannual => InstallmentType::Triannual,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Cadence::Quarterly => "quarterly",
            Cadence::BiYearly => "bi_yearly",
            Cadence::Triannual => "triannual",
        }
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// received but not cleared
    Pending,
    Completed,
    Failed,
    Cancelled,
    /// original of a refund
    Refunded,
}

/// what a payment was recorded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCategory {
    /// down payment collected at sale time
    DownPayment,
    Installment,
    /// negative reversal of an earlier payment
    Refund,
}

/// how money was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Cheque,
    Card,
    Online,
}

impl PaymentMethod {
    /// methods that must carry a reference number
    pub fn requires_reference(&self) -> bool {
        matches!(
            self,
            PaymentMethod::BankTransfer | PaymentMethod::Card | PaymentMethod::Online
        )
    }
}

/// cheque details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChequeDetails {
    pub cheque_number: String,
    pub bank_name: String,
    pub cheque_date: NaiveDate,
}

/// method-specific payment metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub reference_number: Option<String>,
    pub cheque: Option<ChequeDetails>,
    pub notes: Option<String>,
}

impl PaymentDetails {
    pub fn with_reference(reference: impl Into<String>) -> Self {
        Self {
            reference_number: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn with_cheque(cheque: ChequeDetails) -> Self {
        Self {
            cheque: Some(cheque),
            ..Self::default()
        }
    }
}

/// booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// down payment not yet covered
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// repayment style for ad-hoc schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// equal monthly installments
    Installments,
    /// single installment for the whole balance
    Lumpsum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_occurrences() {
        assert_eq!(Cadence::Quarterly.occurrences(12), 4);
        assert_eq!(Cadence::BiYearly.occurrences(24), 4);
        assert_eq!(Cadence::Triannual.occurrences(12), 3);
        assert_eq!(Cadence::Quarterly.occurrences(11), 3);
        assert_eq!(Cadence::BiYearly.occurrences(5), 0);
    }

    #[test]
    fn test_installment_type_wire_names() {
        let json = serde_json::to_string(&InstallmentType::DownPaymentBalance).unwrap();
        assert_eq!(json, "\"down_payment_balance\"");
        let json = serde_json::to_string(&Cadence::BiYearly.installment_type()).unwrap();
        assert_eq!(json, "\"bi_yearly\"");
    }

    #[test]
    fn test_open_statuses() {
        assert!(InstallmentStatus::Pending.is_open());
        assert!(InstallmentStatus::Overdue.is_open());
        assert!(!InstallmentStatus::Paid.is_open());
        assert!(!InstallmentStatus::Cancelled.is_open());
    }
}
