//! Pre-trade gate.
//!
//! Every entry intent passes through [`RiskGate::check`] before it becomes
//! an order. Checks run in a fixed priority, first failure wins, so the
//! rejection reason for a given state is deterministic. Exit intents are
//! never blocked: closing risk is always allowed.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::orders::{OrderIntent, Position};
use crate::risk::limits::RiskLimits;

/// Mutable risk inputs, maintained by the engine from fills and
/// mark-to-market snapshots.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub daily_realized_pnl: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub open_position_count: u32,
    /// Correlation between the pair legs over the lookback window.
    pub portfolio_correlation: Option<f64>,
}

impl RiskState {
    #[must_use]
    pub fn new(starting_equity: Decimal) -> Self {
        Self {
            daily_realized_pnl: Decimal::ZERO,
            equity: starting_equity,
            peak_equity: starting_equity,
            open_position_count: 0,
            portfolio_correlation: None,
        }
    }

    /// Fold a realized P&L delta into the day's total and the equity curve.
    pub fn record_pnl(&mut self, delta: Decimal) {
        self.daily_realized_pnl += delta;
        self.equity += delta;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    /// Equity decline from the session peak. Never negative.
    #[must_use]
    pub fn drawdown(&self) -> Decimal {
        (self.peak_equity - self.equity).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn daily_loss_breached(&self, limits: &RiskLimits) -> bool {
        self.daily_realized_pnl <= -limits.max_daily_loss
    }

    #[must_use]
    pub fn drawdown_breached(&self, limits: &RiskLimits) -> bool {
        self.drawdown() >= limits.max_drawdown
    }

    /// Session-boundary reset. Equity and peak carry over, the daily loss
    /// counter does not.
    pub fn reset_daily(&mut self) {
        self.daily_realized_pnl = Decimal::ZERO;
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("open position limit reached ({limit})")]
    MaxOpenPositions { limit: u32 },

    #[error("position size exhausted for {instrument}")]
    PositionSizeExhausted { instrument: String },

    #[error("daily loss limit breached")]
    DailyLossBreached,

    #[error("drawdown limit breached")]
    DrawdownBreached,

    #[error("portfolio correlation {correlation:.3} above limit {limit:.3}")]
    CorrelationTooHigh { correlation: f64, limit: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    /// Proceed, possibly with a smaller quantity than requested.
    Approve { quantity: Decimal },
    Reject(RiskRejection),
}

/// Stateless decision logic over [`RiskLimits`].
#[derive(Debug, Clone)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Decide an order intent. `is_entry` distinguishes risk-adding intents
    /// from closing ones; exits short-circuit to approval.
    pub fn check(
        &self,
        intent: &OrderIntent,
        is_entry: bool,
        position: Option<&Position>,
        state: &RiskState,
    ) -> RiskDecision {
        if !is_entry {
            return RiskDecision::Approve {
                quantity: intent.quantity,
            };
        }

        // 1. Open-position cap, only when this intent would open a new one.
        let opens_new = position.map_or(true, Position::is_flat);
        if opens_new && state.open_position_count >= self.limits.max_open_positions {
            return RiskDecision::Reject(RiskRejection::MaxOpenPositions {
                limit: self.limits.max_open_positions,
            });
        }

        // 2. Per-instrument size headroom: scale down, reject at zero.
        let current = position.map_or(Decimal::ZERO, |p| p.net_qty.abs());
        let headroom = self.limits.max_position_size - current;
        if headroom <= Decimal::ZERO {
            return RiskDecision::Reject(RiskRejection::PositionSizeExhausted {
                instrument: intent.instrument.clone(),
            });
        }
        let quantity = intent.quantity.min(headroom);
        if quantity < intent.quantity {
            warn!(
                instrument = %intent.instrument,
                requested = %intent.quantity,
                approved = %quantity,
                "scaling order to position headroom"
            );
        }

        // 3. Loss limits block new risk only.
        if state.daily_loss_breached(&self.limits) {
            return RiskDecision::Reject(RiskRejection::DailyLossBreached);
        }
        if state.drawdown_breached(&self.limits) {
            return RiskDecision::Reject(RiskRejection::DrawdownBreached);
        }

        // 4. Correlation ceiling.
        if let Some(correlation) = state.portfolio_correlation {
            if correlation.abs() > self.limits.max_correlation {
                return RiskDecision::Reject(RiskRejection::CorrelationTooHigh {
                    correlation,
                    limit: self.limits.max_correlation,
                });
            }
        }

        debug!(instrument = %intent.instrument, quantity = %quantity, "intent approved");
        RiskDecision::Approve { quantity }
    }
}
