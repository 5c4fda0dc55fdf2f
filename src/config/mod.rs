//! Session configuration.
//!
//! A session is fully described by one TOML file: the pair, the strategy
//! thresholds, the risk limits, and the execution mode. Every validation
//! failure is fatal at load time; a session never starts with incomplete
//! risk limits.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::risk::{LimitsError, RiskLimits};
use crate::strategy::{MeanReversionConfigBuilder, Strategy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid risk limits: {0}")]
    Limits(#[from] LimitsError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub leg1: String,
    pub leg2: String,
    pub bar_interval_secs: u64,
    /// Bars of history required before signals are produced.
    pub lookback: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    MeanReversion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub entry_z: f64,
    pub exit_z: f64,
    pub min_correlation: f64,
    /// Leg-1 order quantity; leg 2 is scaled by the hedge ratio.
    pub order_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Simulated,
    Live,
}

fn default_fill_splits() -> u32 {
    1
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    #[serde(default)]
    pub fee_bps: Decimal,
    #[serde(default)]
    pub latency_micros: i64,
    #[serde(default = "default_fill_splits")]
    pub fill_splits: u32,
    /// Bound on the shutdown drain of in-flight orders.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_starting_equity() -> Decimal {
    Decimal::from(10_000)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub pair: PairConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskLimits,
    pub execution: ExecutionConfig,
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
}

impl SessionConfig {
    /// Read and validate a session config. Any failure aborts session start.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pair.leg1.is_empty() || self.pair.leg2.is_empty() {
            return Err(ConfigError::Invalid("pair legs must be named".into()));
        }
        if self.pair.leg1 == self.pair.leg2 {
            return Err(ConfigError::Invalid(format!(
                "pair legs must differ, both are {}",
                self.pair.leg1
            )));
        }
        if self.pair.bar_interval_secs == 0 {
            return Err(ConfigError::Invalid("bar_interval_secs must be positive".into()));
        }
        if self.pair.lookback < 2 {
            return Err(ConfigError::Invalid(format!(
                "lookback must be at least 2, got {}",
                self.pair.lookback
            )));
        }
        if self.strategy.order_size <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "order_size must be positive, got {}",
                self.strategy.order_size
            )));
        }
        if self.execution.fill_splits == 0 {
            return Err(ConfigError::Invalid("fill_splits must be at least 1".into()));
        }
        // Strategy thresholds are checked by the same builder that will
        // construct the strategy.
        self.strategy_builder()
            .build()
            .map_err(ConfigError::Invalid)?;
        self.risk.validate()?;
        Ok(())
    }

    fn strategy_builder(&self) -> MeanReversionConfigBuilder {
        let mut builder = MeanReversionConfigBuilder::new()
            .entry_z(self.strategy.entry_z)
            .exit_z(self.strategy.exit_z)
            .min_correlation(self.strategy.min_correlation)
            .stop_loss_pct(self.strategy.stop_loss_pct);
        if let Some(tp) = self.strategy.take_profit_pct {
            builder = builder.take_profit_pct(tp);
        }
        builder
    }

    /// Construct the configured strategy.
    pub fn strategy(&self) -> Result<Box<dyn Strategy>, ConfigError> {
        match self.strategy.kind {
            StrategyKind::MeanReversion => {
                let config = self.strategy_builder().build().map_err(ConfigError::Invalid)?;
                Ok(Box::new(crate::strategy::MeanReversion::new(config)))
            }
        }
    }

    #[must_use]
    pub fn bar_interval_micros(&self) -> i64 {
        self.pair.bar_interval_secs as i64 * 1_000_000
    }
}
