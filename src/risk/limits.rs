//! Session risk limits.

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("max_position_size must be positive, got {0}")]
    NonPositivePositionSize(Decimal),

    #[error("max_daily_loss must be positive, got {0}")]
    NonPositiveDailyLoss(Decimal),

    #[error("max_drawdown must be positive, got {0}")]
    NonPositiveDrawdown(Decimal),

    #[error("max_open_positions must be at least 1")]
    ZeroOpenPositions,

    #[error("max_correlation must be in [0, 1], got {0}")]
    CorrelationOutOfRange(f64),
}

/// Hard limits for a trading session. Loaded from configuration and fixed
/// for the session lifetime; a session must not start with malformed limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimits {
    /// Maximum absolute net quantity per instrument.
    pub max_position_size: Decimal,
    /// Daily realized loss that halts new entries. Positive magnitude.
    pub max_daily_loss: Decimal,
    /// Equity decline from peak that halts new entries. Positive magnitude.
    pub max_drawdown: Decimal,
    pub max_open_positions: u32,
    /// Upper bound on portfolio correlation for new entries.
    pub max_correlation: f64,
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_position_size <= Decimal::ZERO {
            return Err(LimitsError::NonPositivePositionSize(self.max_position_size));
        }
        if self.max_daily_loss <= Decimal::ZERO {
            return Err(LimitsError::NonPositiveDailyLoss(self.max_daily_loss));
        }
        if self.max_drawdown <= Decimal::ZERO {
            return Err(LimitsError::NonPositiveDrawdown(self.max_drawdown));
        }
        if self.max_open_positions == 0 {
            return Err(LimitsError::ZeroOpenPositions);
        }
        if !(0.0..=1.0).contains(&self.max_correlation) {
            return Err(LimitsError::CorrelationOutOfRange(self.max_correlation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid() -> RiskLimits {
        RiskLimits {
            max_position_size: dec!(100),
            max_daily_loss: dec!(500),
            max_drawdown: dec!(1000),
            max_open_positions: 4,
            max_correlation: 0.95,
        }
    }

    #[test]
    fn test_valid_limits_pass() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_magnitudes() {
        let mut limits = valid();
        limits.max_daily_loss = dec!(-500);
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::NonPositiveDailyLoss(_))
        ));

        let mut limits = valid();
        limits.max_position_size = dec!(0);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_rejects_correlation_out_of_range() {
        let mut limits = valid();
        limits.max_correlation = 1.5;
        assert!(matches!(
            limits.validate(),
            Err(LimitsError::CorrelationOutOfRange(_))
        ));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let limits: RiskLimits = toml::from_str(
            r#"
            max_position_size = "100"
            max_daily_loss = "500"
            max_drawdown = "1000"
            max_open_positions = 4
            max_correlation = 0.95
            "#,
        )
        .unwrap();
        assert_eq!(limits.max_position_size, dec!(100));
        assert!(limits.validate().is_ok());
    }
}
