//! Mean-reversion pairs strategy.
//!
//! Z-score of the OLS-hedged spread over a fixed lookback window. Entries
//! fire at the configured z threshold, exits when the z-score reverts
//! through the exit band or a stop-loss/take-profit percentage is breached,
//! whichever occurs first.
//!
//! A strategy-level correlation gate suppresses entries when the pair's
//! rolling correlation drops below the configured minimum. This is a filter
//! on signal quality, independent of the risk gate's portfolio-level
//! correlation limit. Exits are never suppressed by the gate: de-risking an
//! open position must stay possible even when the relationship has broken.

use tracing::debug;

use crate::data::PairSeries;
use crate::events::EventTime;
use crate::math;
use crate::strategy::{Signal, SignalAction, SpreadPosition, Strategy};
use crate::types::SpreadDirection;

const STRATEGY_ID: &str = "mean-reversion";

/// Tuning for [`MeanReversion`]. Build via [`MeanReversionConfigBuilder`].
#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    /// Enter when |z| reaches this many standard deviations.
    pub entry_z: f64,
    /// Exit band around the mean; 0.0 means exit on crossing the mean.
    pub exit_z: f64,
    /// Entries are suppressed below this rolling correlation.
    pub min_correlation: f64,
    /// Exit when spread P&L falls below -pct of the leg-1 entry price.
    pub stop_loss_pct: Option<f64>,
    /// Exit when spread P&L exceeds +pct of the leg-1 entry price.
    pub take_profit_pct: Option<f64>,
}

/// Builder with validation, so a strategy can never be constructed with
/// thresholds that make entries unreachable or exits inverted.
#[derive(Debug, Clone)]
pub struct MeanReversionConfigBuilder {
    entry_z: f64,
    exit_z: f64,
    min_correlation: f64,
    stop_loss_pct: Option<f64>,
    take_profit_pct: Option<f64>,
}

impl Default for MeanReversionConfigBuilder {
    fn default() -> Self {
        Self {
            entry_z: 2.0,
            exit_z: 0.0,
            min_correlation: 0.0,
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }
}

impl MeanReversionConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry_z(mut self, z: f64) -> Self {
        self.entry_z = z;
        self
    }

    #[must_use]
    pub fn exit_z(mut self, z: f64) -> Self {
        self.exit_z = z;
        self
    }

    #[must_use]
    pub fn min_correlation(mut self, c: f64) -> Self {
        self.min_correlation = c;
        self
    }

    #[must_use]
    pub fn stop_loss_pct(mut self, pct: f64) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    #[must_use]
    pub fn take_profit_pct(mut self, pct: f64) -> Self {
        self.take_profit_pct = Some(pct);
        self
    }

    pub fn build(self) -> Result<MeanReversionConfig, String> {
        if !self.entry_z.is_finite() || self.entry_z <= 0.0 {
            return Err(format!("entry_z must be positive, got {}", self.entry_z));
        }
        if !self.exit_z.is_finite() || self.exit_z < 0.0 {
            return Err(format!("exit_z must be non-negative, got {}", self.exit_z));
        }
        if self.exit_z >= self.entry_z {
            return Err(format!(
                "exit_z ({}) must be below entry_z ({})",
                self.exit_z, self.entry_z
            ));
        }
        if !(0.0..=1.0).contains(&self.min_correlation) {
            return Err(format!(
                "min_correlation must be in [0, 1], got {}",
                self.min_correlation
            ));
        }
        for (name, pct) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if let Some(p) = pct {
                if !p.is_finite() || p <= 0.0 {
                    return Err(format!("{name} must be positive, got {p}"));
                }
            }
        }

        Ok(MeanReversionConfig {
            entry_z: self.entry_z,
            exit_z: self.exit_z,
            min_correlation: self.min_correlation,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
        })
    }
}

/// Stateless z-score strategy over a [`PairSeries`].
#[derive(Debug)]
pub struct MeanReversion {
    config: MeanReversionConfig,
}

impl MeanReversion {
    #[must_use]
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }

    fn hold(series: &PairSeries, strength: f64, ts: EventTime) -> Signal {
        Signal {
            pair: series.pair().to_string(),
            action: SignalAction::Hold,
            strength,
            ts,
            strategy_id: STRATEGY_ID.to_string(),
        }
    }

    fn emit(series: &PairSeries, action: SignalAction, z: f64, ts: EventTime) -> Signal {
        Signal {
            pair: series.pair().to_string(),
            action,
            strength: z.abs(),
            ts,
            strategy_id: STRATEGY_ID.to_string(),
        }
    }

    /// Exit test for an open position: z reverting through the exit band,
    /// or stop-loss/take-profit breached, whichever occurs first.
    fn should_exit(&self, position: &SpreadPosition, z: f64, current_spread: f64) -> bool {
        let reverted = match position.direction {
            SpreadDirection::Long => z >= -self.config.exit_z,
            SpreadDirection::Short => z <= self.config.exit_z,
        };
        if reverted {
            return true;
        }

        if let Some(pnl_pct) = position.pnl_pct(current_spread) {
            if let Some(sl) = self.config.stop_loss_pct {
                if pnl_pct <= -sl {
                    return true;
                }
            }
            if let Some(tp) = self.config.take_profit_pct {
                if pnl_pct >= tp {
                    return true;
                }
            }
        }
        false
    }
}

impl Strategy for MeanReversion {
    fn evaluate(
        &self,
        series: &PairSeries,
        position: Option<&SpreadPosition>,
        ts: EventTime,
    ) -> Signal {
        // Cold start: never an error, just no opinion yet.
        if !series.ready() {
            return Self::hold(series, 0.0, ts);
        }

        let spreads = series.spreads();
        let current = match series.current_spread() {
            Some(s) => s,
            None => return Self::hold(series, 0.0, ts),
        };

        let window_mean = math::mean(spreads);
        let window_std = match math::sample_std_dev(spreads) {
            Some(sd) => sd,
            None => return Self::hold(series, 0.0, ts),
        };

        // Constant spread: z-score undefined, hold rather than divide by zero.
        let z = match math::z_score(current, window_mean, window_std) {
            Some(z) => z,
            None => return Self::hold(series, 0.0, ts),
        };

        if let Some(pos) = position {
            if self.should_exit(pos, z, current) {
                return Self::emit(series, SignalAction::Exit, z, ts);
            }
            return Self::hold(series, z.abs(), ts);
        }

        // Correlation gate: entries require the legs to still move together.
        let correlated = series
            .correlation()
            .map(|c| c >= self.config.min_correlation)
            .unwrap_or(false);
        if !correlated {
            debug!(
                pair = %series.pair(),
                correlation = ?series.correlation(),
                min = self.config.min_correlation,
                "entry suppressed by correlation gate"
            );
            return Self::hold(series, z.abs(), ts);
        }

        if z <= -self.config.entry_z {
            Self::emit(series, SignalAction::EnterLongSpread, z, ts)
        } else if z >= self.config.entry_z {
            Self::emit(series, SignalAction::EnterShortSpread, z, ts)
        } else {
            Self::hold(series, z.abs(), ts)
        }
    }

    fn id(&self) -> &str {
        STRATEGY_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const LOOKBACK: usize = 20;

    fn bar(instrument: &str, close: f64, idx: i64) -> Bar {
        let c = Decimal::from_f64(close).unwrap();
        Bar {
            instrument: instrument.to_string(),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: dec!(1),
            open_time: EventTime::from_micros(idx * 300_000_000),
            close_time: EventTime::from_micros((idx + 1) * 300_000_000),
        }
    }

    fn config() -> MeanReversionConfig {
        MeanReversionConfigBuilder::new()
            .entry_z(2.0)
            .exit_z(0.0)
            .min_correlation(0.5)
            .build()
            .unwrap()
    }

    /// Legs that are perfectly correlated with an oscillating residual on
    /// leg 1, so the spread has non-zero variance around mean ~0.
    fn seeded_series(residuals: &[f64]) -> PairSeries {
        let mut series = PairSeries::new("EURUSD", "GBPUSD", LOOKBACK);
        for (i, r) in residuals.iter().enumerate() {
            let b = 1.25 + i as f64 * 0.001;
            series.on_bar(&bar("GBPUSD", b, i as i64));
            series.on_bar(&bar("EURUSD", 0.88 * b + r, i as i64));
        }
        series
    }

    fn oscillating(n: usize, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| if i % 2 == 0 { amp } else { -amp })
            .collect()
    }

    #[test]
    fn test_cold_start_holds_with_zero_strength() {
        let strategy = MeanReversion::new(config());
        let series = seeded_series(&oscillating(5, 0.001));
        let signal = strategy.evaluate(&series, None, EventTime::from_micros(0));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn test_degenerate_spread_holds() {
        let strategy = MeanReversion::new(config());
        // leg1 = 2 * leg2 with values exact in f64: the hedge is perfect,
        // the spread is identically zero, and the z-score is undefined.
        let mut series = PairSeries::new("EURUSD", "GBPUSD", LOOKBACK);
        for i in 0..LOOKBACK {
            let b = 2.0 + i as f64;
            series.on_bar(&bar("GBPUSD", b, i as i64));
            series.on_bar(&bar("EURUSD", 2.0 * b, i as i64));
        }
        let signal = strategy.evaluate(&series, None, EventTime::from_micros(0));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn test_large_positive_z_enters_short_spread() {
        let strategy = MeanReversion::new(config());
        // Mean-zero oscillation, then a final spike well beyond 2 sigma.
        let mut residuals = oscillating(LOOKBACK - 1, 0.001);
        residuals.push(0.01);
        let series = seeded_series(&residuals);

        let signal = strategy.evaluate(&series, None, EventTime::from_micros(1));
        assert_eq!(signal.action, SignalAction::EnterShortSpread);
        assert!(signal.strength > 2.0, "strength = {}", signal.strength);
    }

    #[test]
    fn test_large_negative_z_enters_long_spread() {
        let strategy = MeanReversion::new(config());
        let mut residuals = oscillating(LOOKBACK - 1, 0.001);
        residuals.push(-0.01);
        let series = seeded_series(&residuals);

        let signal = strategy.evaluate(&series, None, EventTime::from_micros(1));
        assert_eq!(signal.action, SignalAction::EnterLongSpread);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let strategy = MeanReversion::new(config());
        let mut residuals = oscillating(LOOKBACK - 1, 0.001);
        residuals.push(0.01);
        let series = seeded_series(&residuals);

        let ts = EventTime::from_micros(42);
        let first = strategy.evaluate(&series, None, ts);
        let second = strategy.evaluate(&series, None, ts);
        assert_eq!(first, second);
    }

    #[test]
    fn test_correlation_gate_suppresses_entry() {
        let strategy = MeanReversion::new(
            MeanReversionConfigBuilder::new()
                .entry_z(2.0)
                .min_correlation(0.99)
                .build()
                .unwrap(),
        );

        // Leg 1 oscillates independently of a flat-ish leg 2: the residual
        // dominates, so correlation is far below 0.99.
        let mut series = PairSeries::new("EURUSD", "GBPUSD", LOOKBACK);
        for i in 0..LOOKBACK {
            let r = if i % 2 == 0 { 0.05 } else { -0.05 };
            series.on_bar(&bar("GBPUSD", 1.25 + i as f64 * 1e-6, i as i64));
            series.on_bar(&bar("EURUSD", 1.10 + r, i as i64));
        }
        assert!(series.correlation().unwrap() < 0.99);

        let signal = strategy.evaluate(&series, None, EventTime::from_micros(0));
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn test_exit_when_z_reverts_through_band() {
        let strategy = MeanReversion::new(config());
        // Final residual back at the mean: an open short from the earlier
        // spike should exit (z <= exit band).
        let mut residuals = oscillating(LOOKBACK - 1, 0.001);
        residuals.push(-0.001);
        let series = seeded_series(&residuals);

        let position = SpreadPosition {
            direction: SpreadDirection::Short,
            entry_spread: 0.01,
            entry_leg1_price: 1.1,
        };
        let signal = strategy.evaluate(&series, Some(&position), EventTime::from_micros(0));
        assert_eq!(signal.action, SignalAction::Exit);
    }

    #[test]
    fn test_stop_loss_exit_fires_before_reversion() {
        let strategy = MeanReversion::new(
            MeanReversionConfigBuilder::new()
                .entry_z(2.0)
                .exit_z(0.0)
                .min_correlation(0.0)
                .stop_loss_pct(0.005)
                .build()
                .unwrap(),
        );

        // Spread keeps widening against a short position: z stays positive
        // (no reversion) but the loss breaches the stop.
        let mut residuals = oscillating(LOOKBACK - 1, 0.001);
        residuals.push(0.02);
        let series = seeded_series(&residuals);
        let current = series.current_spread().unwrap();

        let position = SpreadPosition {
            direction: SpreadDirection::Short,
            entry_spread: current - 0.01, // 0.01 of adverse move on ~1.1 price
            entry_leg1_price: 1.1,
        };
        assert!(position.pnl_pct(current).unwrap() < -0.005);

        let signal = strategy.evaluate(&series, Some(&position), EventTime::from_micros(0));
        assert_eq!(signal.action, SignalAction::Exit);
    }

    #[test]
    fn test_builder_rejects_inverted_thresholds() {
        assert!(MeanReversionConfigBuilder::new()
            .entry_z(1.0)
            .exit_z(1.5)
            .build()
            .is_err());
        assert!(MeanReversionConfigBuilder::new().entry_z(-1.0).build().is_err());
        assert!(MeanReversionConfigBuilder::new()
            .min_correlation(1.5)
            .build()
            .is_err());
    }
}
