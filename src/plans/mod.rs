pub mod validator;

pub use validator::{PlanValidator, ValidatedPlan};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{Cadence, PlanId, PlanStatus};

/// how the down payment of a plan is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownPaymentSpec {
    /// fixed amount
    Amount(Money),
    /// percent of plot price (e.g. 20 for 20%)
    Percentage(Decimal),
}

impl DownPaymentSpec {
    /// resolve against a plot price, rounded to the minor unit
    pub fn resolve(&self, plot_price: Money) -> Money {
        match self {
            DownPaymentSpec::Amount(amount) => *amount,
            DownPaymentSpec::Percentage(pct) => plot_price.percentage(*pct),
        }
    }
}

/// candidate plan terms, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub plot_size_class: String,
    pub plot_price: Money,
    pub down_payment: DownPaymentSpec,
    pub monthly_payment: Money,
    pub quarterly_payment: Option<Money>,
    pub bi_yearly_payment: Option<Money>,
    pub triannual_payment: Option<Money>,
    /// falls back to the configured default tenure
    pub tenure_months: Option<u32>,
}

impl PlanDraft {
    pub fn new(
        plot_size_class: impl Into<String>,
        plot_price: Money,
        down_payment: DownPaymentSpec,
        monthly_payment: Money,
    ) -> Self {
        Self {
            plot_size_class: plot_size_class.into(),
            plot_price,
            down_payment,
            monthly_payment,
            quarterly_payment: None,
            bi_yearly_payment: None,
            triannual_payment: None,
            tenure_months: None,
        }
    }

    pub fn with_tenure(mut self, months: u32) -> Self {
        self.tenure_months = Some(months);
        self
    }

    pub fn with_quarterly(mut self, amount: Money) -> Self {
        self.quarterly_payment = Some(amount);
        self
    }

    pub fn with_bi_yearly(mut self, amount: Money) -> Self {
        self.bi_yearly_payment = Some(amount);
        self
    }

    pub fn with_triannual(mut self, amount: Money) -> Self {
        self.triannual_payment = Some(amount);
        self
    }

    /// configured extra cadence amounts, in a fixed order
    pub fn cadence_amounts(&self) -> [(Cadence, Option<Money>); 3] {
        [
            (Cadence::Quarterly, self.quarterly_payment),
            (Cadence::BiYearly, self.bi_yearly_payment),
            (Cadence::Triannual, self.triannual_payment),
        ]
    }

    /// true when any field that shapes the schedule differs
    pub fn affects_payments(&self, other: &PlanDraft) -> bool {
        self.plot_price != other.plot_price
            || self.down_payment != other.down_payment
            || self.monthly_payment != other.monthly_payment
            || self.quarterly_payment != other.quarterly_payment
            || self.bi_yearly_payment != other.bi_yearly_payment
            || self.triannual_payment != other.triannual_payment
            || self.tenure_months != other.tenure_months
    }
}

/// a reusable, validated payment plan template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: PlanId,
    pub terms: PlanDraft,
    pub validated: ValidatedPlan,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentPlan {
    pub fn new(terms: PlanDraft, validated: ValidatedPlan, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            terms,
            validated,
            status: PlanStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }
}
