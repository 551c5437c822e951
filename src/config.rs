use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, Result};

/// engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub late_fee: LateFeeConfig,
    pub tolerances: ToleranceConfig,
    /// tenure applied when a plan draft leaves it unset
    pub default_tenure_months: u32,
    /// longest tenure a plan or ad-hoc schedule may span
    pub max_tenure_months: u32,
}

/// late fee configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LateFeeConfig {
    /// default fee rate per month, copied onto each new schedule
    pub monthly_rate: Rate,
    /// fixed month length used to derive the daily rate
    pub days_per_month: u32,
}

/// tolerances, all in integer minor currency units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// allowed shortfall of a plan's scheduled total below plot price
    pub imbalance_tolerance_minor: i64,
    /// allowed overage of a plan's scheduled total above plot price, in percent
    pub max_overage_percentage: u32,
    /// allowed drift for reconciliation checks
    pub reconciliation_tolerance_minor: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            late_fee: LateFeeConfig::default(),
            tolerances: ToleranceConfig::default(),
            default_tenure_months: 24,
            max_tenure_months: 600,
        }
    }
}

impl Default for LateFeeConfig {
    fn default() -> Self {
        Self {
            monthly_rate: Rate::from_percentage(2),
            days_per_month: 30,
        }
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            imbalance_tolerance_minor: 1000,
            max_overage_percentage: 5,
            reconciliation_tolerance_minor: 1,
        }
    }
}

impl ToleranceConfig {
    pub fn imbalance_tolerance(&self) -> Money {
        Money::from_minor(self.imbalance_tolerance_minor)
    }
}

impl EngineConfig {
    /// load from a json document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.late_fee.days_per_month == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "late_fee.days_per_month must be positive".to_string(),
            });
        }
        if self.late_fee.monthly_rate < Rate::ZERO {
            return Err(EngineError::InvalidConfiguration {
                message: format!("late_fee.monthly_rate {} is negative", self.late_fee.monthly_rate),
            });
        }
        if self.tolerances.imbalance_tolerance_minor < 0
            || self.tolerances.reconciliation_tolerance_minor < 0
        {
            return Err(EngineError::InvalidConfiguration {
                message: "tolerances must not be negative".to_string(),
            });
        }
        if self.default_tenure_months == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "default_tenure_months must be positive".to_string(),
            });
        }
        if self.max_tenure_months < self.default_tenure_months {
            return Err(EngineError::InvalidConfiguration {
                message: format!(
                    "max_tenure_months {} is below default_tenure_months {}",
                    self.max_tenure_months, self.default_tenure_months
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.late_fee.monthly_rate.as_decimal(), dec!(0.02));
        assert_eq!(config.late_fee.days_per_month, 30);
        assert_eq!(config.tolerances.imbalance_tolerance(), Money::from_major(10));
        assert_eq!(config.default_tenure_months, 24);
        assert_eq!(config.max_tenure_months, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_tenure_below_default_rejected() {
        let result = EngineConfig::from_json(r#"{ "default_tenure_months": 36, "max_tenure_months": 12 }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "late_fee": { "monthly_rate": "0.03" }, "default_tenure_months": 36 }"#,
        )
        .unwrap();
        assert_eq!(config.late_fee.monthly_rate, Rate::from_percentage(3));
        assert_eq!(config.late_fee.days_per_month, 30);
        assert_eq!(config.default_tenure_months, 36);
        assert_eq!(config.tolerances, ToleranceConfig::default());
    }

    #[test]
    fn test_rejects_zero_month_length() {
        let err = EngineConfig::from_json(r#"{ "late_fee": { "days_per_month": 0 } }"#);
        assert!(matches!(err, Err(EngineError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
