use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EngineConfig, ToleranceConfig};
use crate::decimal::Money;
use crate::errors::{EngineError, PlanViolation, PlanViolations, Result};
use crate::types::Cadence;

use super::PlanDraft;

/// extra cadence overlay of a validated plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadencePayment {
    pub cadence: Cadence,
    pub amount: Money,
}

/// plan terms that passed every validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedPlan {
    plot_price: Money,
    down_payment: Money,
    monthly_payment: Money,
    extra: Option<CadencePayment>,
    tenure_months: u32,
    scheduled_total: Money,
}

impl ValidatedPlan {
    pub fn plot_price(&self) -> Money {
        self.plot_price
    }

    /// resolved down payment required at sale time
    pub fn down_payment(&self) -> Money {
        self.down_payment
    }

    pub fn monthly_payment(&self) -> Money {
        self.monthly_payment
    }

    pub fn extra(&self) -> Option<CadencePayment> {
        self.extra
    }

    pub fn tenure_months(&self) -> u32 {
        self.tenure_months
    }

    /// down payment plus every installment the plan generates
    pub fn scheduled_total(&self) -> Money {
        self.scheduled_total
    }
}

/// validates candidate payment plans
#[derive(Debug, Clone)]
pub struct PlanValidator {
    tolerances: ToleranceConfig,
    default_tenure_months: u32,
    max_tenure_months: u32,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl PlanValidator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            tolerances: config.tolerances.clone(),
            default_tenure_months: config.default_tenure_months,
            max_tenure_months: config.max_tenure_months,
        }
    }

    /// validate a draft, returning every failure found
    pub fn validate(&self, draft: &PlanDraft) -> Result<ValidatedPlan> {
        self.check(draft).map_err(|violations| {
            warn!(
                plot_size_class = %draft.plot_size_class,
                violations = violations.len(),
                "payment plan rejected: {}",
                violations
            );
            EngineError::InvalidPlan(violations)
        })
    }

    fn check(&self, draft: &PlanDraft) -> std::result::Result<ValidatedPlan, PlanViolations> {
        let mut violations = Vec::new();
        let tenure_months = draft.tenure_months.unwrap_or(self.default_tenure_months);

        // structural checks, both reported together
        let configured: Vec<(Cadence, Money)> = draft
            .cadence_amounts()
            .into_iter()
            .filter_map(|(cadence, amount)| amount.filter(|a| a.is_positive()).map(|a| (cadence, a)))
            .collect();
        if configured.len() > 1 {
            violations.push(PlanViolation::MultipleCadence {
                cadences: configured.iter().map(|(c, _)| c.label().to_string()).collect(),
            });
        }
        self.check_terms(draft, tenure_months, &mut violations);
        if !violations.is_empty() {
            return Err(PlanViolations(violations));
        }

        let plot_price = draft.plot_price;
        let down_payment = draft.down_payment.resolve(plot_price);
        if !down_payment.is_positive() || down_payment >= plot_price {
            return Err(PlanViolations(vec![PlanViolation::DownPaymentRange {
                down_payment,
                plot_price,
            }]));
        }

        let extra = configured
            .first()
            .map(|&(cadence, amount)| CadencePayment { cadence, amount });
        let scheduled_total = down_payment
            + draft.monthly_payment * tenure_months
            + extra
                .map(|e| e.amount * e.cadence.occurrences(tenure_months))
                .unwrap_or(Money::ZERO);

        let floor = plot_price - self.tolerances.imbalance_tolerance();
        let ceiling = plot_price
            * (Decimal::ONE + Decimal::from(self.tolerances.max_overage_percentage) / Decimal::from(100));
        if scheduled_total < floor || scheduled_total > ceiling {
            violations.push(PlanViolation::ScheduleImbalance {
                scheduled_total,
                plot_price,
                shortfall: (plot_price - scheduled_total).max(Money::ZERO),
                overage: (scheduled_total - plot_price).max(Money::ZERO),
            });
        }

        // occurrence bounds on the post-down-payment remainder
        let remaining = plot_price - down_payment;
        if draft.monthly_payment * 2 > remaining {
            violations.push(PlanViolation::CadenceBound {
                cadence: "monthly".to_string(),
                amount: draft.monthly_payment,
                bound: remaining / Decimal::from(2),
            });
        }
        if let Some(e) = extra {
            let divisor = e.cadence.bound_divisor();
            if e.amount * divisor > remaining {
                violations.push(PlanViolation::CadenceBound {
                    cadence: e.cadence.label().to_string(),
                    amount: e.amount,
                    bound: remaining / Decimal::from(divisor),
                });
            }
        }
        if !violations.is_empty() {
            return Err(PlanViolations(violations));
        }

        debug!(
            plot_size_class = %draft.plot_size_class,
            %down_payment,
            %scheduled_total,
            tenure_months,
            "payment plan validated"
        );

        Ok(ValidatedPlan {
            plot_price,
            down_payment,
            monthly_payment: draft.monthly_payment,
            extra,
            tenure_months,
            scheduled_total,
        })
    }

    fn check_terms(&self, draft: &PlanDraft, tenure_months: u32, violations: &mut Vec<PlanViolation>) {
        let mut invalid = |field: &str, reason: String| {
            violations.push(PlanViolation::InvalidTerm {
                field: field.to_string(),
                reason,
            });
        };

        if !draft.plot_price.is_positive() {
            invalid("plot_price", format!("must be positive, got {}", draft.plot_price));
        }
        if !draft.monthly_payment.is_positive() {
            invalid("monthly_payment", format!("must be positive, got {}", draft.monthly_payment));
        }
        if tenure_months == 0 {
            invalid("tenure_months", "must be positive".to_string());
        } else if tenure_months > self.max_tenure_months {
            invalid(
                "tenure_months",
                format!("{} exceeds the maximum of {}", tenure_months, self.max_tenure_months),
            );
        }
        for (cadence, amount) in draft.cadence_amounts() {
            if let Some(amount) = amount.filter(|a| a.is_negative()) {
                invalid(cadence.label(), format!("must not be negative, got {}", amount));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::DownPaymentSpec;
    use rust_decimal_macros::dec;

    fn standard_draft() -> PlanDraft {
        PlanDraft::new(
            "5 marla",
            Money::from_major(5_000_000),
            DownPaymentSpec::Percentage(dec!(20)),
            Money::from_major(166_667),
        )
        .with_tenure(24)
    }

    fn violations_of(result: Result<ValidatedPlan>) -> Vec<PlanViolation> {
        match result {
            Err(EngineError::InvalidPlan(v)) => v.0,
            other => panic!("expected plan violations, got {:?}", other),
        }
    }

    #[test]
    fn test_standard_plan_validates() {
        let plan = PlanValidator::default().validate(&standard_draft()).unwrap();

        assert_eq!(plan.down_payment(), Money::from_major(1_000_000));
        assert_eq!(plan.tenure_months(), 24);
        assert_eq!(plan.scheduled_total(), Money::from_major(5_000_008));
        assert!(plan.extra().is_none());
    }

    #[test]
    fn test_default_tenure_applied() {
        let mut draft = standard_draft();
        draft.tenure_months = None;

        let plan = PlanValidator::default().validate(&draft).unwrap();
        assert_eq!(plan.tenure_months(), 24);
    }

    #[test]
    fn test_multiple_cadence_rejected() {
        let draft = PlanDraft::new(
            "10 marla",
            Money::from_major(2_000_000),
            DownPaymentSpec::Amount(Money::from_major(400_000)),
            Money::from_major(50_000),
        )
        .with_tenure(12)
        .with_quarterly(Money::from_major(50_000))
        .with_bi_yearly(Money::from_major(80_000));

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            &violations[0],
            PlanViolation::MultipleCadence { cadences } if cadences == &vec!["quarterly".to_string(), "bi_yearly".to_string()]
        ));
    }

    #[test]
    fn test_zero_cadence_amount_is_not_configured() {
        let draft = standard_draft().with_quarterly(Money::ZERO);
        assert!(PlanValidator::default().validate(&draft).is_ok());
    }

    #[test]
    fn test_structural_failures_reported_together() {
        let mut draft = standard_draft()
            .with_quarterly(Money::from_major(1))
            .with_triannual(Money::from_major(1));
        draft.monthly_payment = Money::ZERO;
        draft.tenure_months = Some(0);

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert_eq!(violations.len(), 3);
        assert!(matches!(violations[0], PlanViolation::MultipleCadence { .. }));
        assert!(matches!(&violations[1], PlanViolation::InvalidTerm { field, .. } if field == "monthly_payment"));
        assert!(matches!(&violations[2], PlanViolation::InvalidTerm { field, .. } if field == "tenure_months"));
    }

    #[test]
    fn test_down_payment_out_of_range() {
        let mut draft = standard_draft();
        draft.down_payment = DownPaymentSpec::Percentage(dec!(100));
        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(violations[..], [PlanViolation::DownPaymentRange { .. }]));

        draft.down_payment = DownPaymentSpec::Amount(Money::ZERO);
        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(violations[..], [PlanViolation::DownPaymentRange { .. }]));
    }

    #[test]
    fn test_shortfall_reported() {
        let mut draft = standard_draft();
        draft.monthly_payment = Money::from_major(150_000);

        let violations = violations_of(PlanValidator::default().validate(&draft));
        match &violations[..] {
            [PlanViolation::ScheduleImbalance { shortfall, overage, .. }] => {
                assert_eq!(*shortfall, Money::from_major(400_000));
                assert_eq!(*overage, Money::ZERO);
            }
            other => panic!("unexpected violations {:?}", other),
        }
    }

    #[test]
    fn test_shortfall_within_tolerance_accepted() {
        // 999,999 total against a 1,000,000 price is 1 short, inside the 10.00 tolerance
        let draft = PlanDraft::new(
            "3 marla",
            Money::from_major(1_000_000),
            DownPaymentSpec::Amount(Money::from_major(200_007)),
            Money::from_major(66_666),
        )
        .with_tenure(12);

        let plan = PlanValidator::default().validate(&draft).unwrap();
        assert_eq!(plan.scheduled_total(), Money::from_major(999_999));
    }

    #[test]
    fn test_overage_beyond_five_percent() {
        let mut draft = standard_draft();
        draft.monthly_payment = Money::from_major(180_000);

        let violations = violations_of(PlanValidator::default().validate(&draft));
        match &violations[..] {
            [PlanViolation::ScheduleImbalance { overage, .. }] => {
                assert_eq!(*overage, Money::from_major(320_000));
            }
            other => panic!("unexpected violations {:?}", other),
        }
    }

    #[test]
    fn test_imbalance_and_bound_collected_together() {
        let draft = PlanDraft::new(
            "1 kanal",
            Money::from_major(1_000_000),
            DownPaymentSpec::Amount(Money::from_major(200_000)),
            Money::from_major(500_000),
        )
        .with_tenure(2);

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert_eq!(violations.len(), 2);
        assert!(matches!(violations[0], PlanViolation::ScheduleImbalance { .. }));
        assert!(matches!(
            &violations[1],
            PlanViolation::CadenceBound { cadence, bound, .. }
                if cadence == "monthly" && *bound == Money::from_major(400_000)
        ));
    }

    #[test]
    fn test_quarterly_bound() {
        // quarterly may not exceed remaining / 4
        let draft = PlanDraft::new(
            "8 marla",
            Money::from_major(1_000_000),
            DownPaymentSpec::Amount(Money::from_major(200_000)),
            Money::from_major(10_000),
        )
        .with_tenure(3)
        .with_quarterly(Money::from_major(770_000));

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(
            &violations[..],
            [PlanViolation::CadenceBound { cadence, bound, .. }]
                if cadence == "quarterly" && *bound == Money::from_major(200_000)
        ));
    }

    #[test]
    fn test_multi_cadence_plan_total() {
        let draft = PlanDraft::new(
            "7 marla",
            Money::from_major(1_250_000),
            DownPaymentSpec::Percentage(dec!(20)),
            Money::from_major(50_000),
        )
        .with_tenure(12)
        .with_quarterly(Money::from_major(100_000));

        let plan = PlanValidator::default().validate(&draft).unwrap();
        assert_eq!(
            plan.extra(),
            Some(CadencePayment {
                cadence: Cadence::Quarterly,
                amount: Money::from_major(100_000)
            })
        );
        assert_eq!(plan.scheduled_total(), Money::from_major(1_250_000));
    }

    #[test]
    fn test_tenure_beyond_maximum_rejected() {
        let draft = PlanDraft::new(
            "1 kanal",
            Money::from_major(50_000_000),
            DownPaymentSpec::Percentage(dec!(20)),
            Money::from_str_exact("0.01").unwrap(),
        )
        .with_tenure(4_000_000_000);

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(
            &violations[..],
            [PlanViolation::InvalidTerm { field, .. }] if field == "tenure_months"
        ));
    }

    #[test]
    fn test_tenure_limit_follows_config() {
        let config = EngineConfig {
            max_tenure_months: 12,
            default_tenure_months: 12,
            ..EngineConfig::default()
        };
        let result = PlanValidator::from_config(&config).validate(&standard_draft());
        assert!(matches!(
            &violations_of(result)[..],
            [PlanViolation::InvalidTerm { field, .. }] if field == "tenure_months"
        ));
    }

    #[test]
    fn test_bi_yearly_bound() {
        // bi-yearly may not exceed remaining / 2
        let draft = PlanDraft::new(
            "8 marla",
            Money::from_major(1_000_000),
            DownPaymentSpec::Amount(Money::from_major(200_000)),
            Money::from_major(10_000),
        )
        .with_tenure(6)
        .with_bi_yearly(Money::from_major(740_000));

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(
            &violations[..],
            [PlanViolation::CadenceBound { cadence, bound, .. }]
                if cadence == "bi_yearly" && *bound == Money::from_major(400_000)
        ));
    }

    #[test]
    fn test_triannual_bound() {
        // triannual may not exceed remaining / 3
        let draft = PlanDraft::new(
            "8 marla",
            Money::from_major(900_000),
            DownPaymentSpec::Amount(Money::from_major(300_000)),
            Money::from_major(10_000),
        )
        .with_tenure(4)
        .with_triannual(Money::from_major(560_000));

        let violations = violations_of(PlanValidator::default().validate(&draft));
        assert!(matches!(
            &violations[..],
            [PlanViolation::CadenceBound { cadence, bound, .. }]
                if cadence == "triannual" && *bound == Money::from_major(200_000)
        ));
    }
}
