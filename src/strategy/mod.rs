//! Signal generation.
//!
//! Strategies are a capability interface over a [`PairSeries`]: given the
//! current rolling state and the open spread position (if any), produce one
//! immutable [`Signal`]. Concrete variants are selected at configuration
//! time: mean reversion today, others later.

pub mod mean_reversion;

pub use mean_reversion::{MeanReversion, MeanReversionConfig, MeanReversionConfigBuilder};

use crate::data::PairSeries;
use crate::events::EventTime;
use crate::types::SpreadDirection;

/// What the strategy wants done with the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    EnterLongSpread,
    EnterShortSpread,
    Exit,
    Hold,
}

impl SignalAction {
    #[must_use]
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::EnterLongSpread | Self::EnterShortSpread)
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnterLongSpread => write!(f, "enter-long-spread"),
            Self::EnterShortSpread => write!(f, "enter-short-spread"),
            Self::Exit => write!(f, "exit"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// One evaluation result. Produced once per evaluation step; the strategy
/// holds no mutable state, so re-evaluating an unchanged series yields an
/// identical signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Instrument-pair identifier, e.g. "EURUSD/GBPUSD".
    pub pair: String,
    pub action: SignalAction,
    /// Z-score magnitude at evaluation time (0.0 on cold start).
    pub strength: f64,
    pub ts: EventTime,
    pub strategy_id: String,
}

impl Signal {
    /// Stable reference string linking downstream orders back to the
    /// emission that caused them.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}:{}", self.strategy_id, self.pair, self.ts)
    }
}

/// An open spread position as the strategy sees it: enough to decide exits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadPosition {
    pub direction: SpreadDirection,
    /// Spread value at entry.
    pub entry_spread: f64,
    /// Leg 1 price at entry, the scale reference for stop-loss/take-profit
    /// percentage checks.
    pub entry_leg1_price: f64,
}

impl SpreadPosition {
    /// Spread P&L in leg-1 price units, positive when the position is in
    /// profit.
    #[must_use]
    pub fn spread_pnl(&self, current_spread: f64) -> f64 {
        match self.direction {
            SpreadDirection::Long => current_spread - self.entry_spread,
            SpreadDirection::Short => self.entry_spread - current_spread,
        }
    }

    /// P&L as a fraction of the leg-1 entry price. `None` when the entry
    /// price was not positive (nothing sane to scale by).
    #[must_use]
    pub fn pnl_pct(&self, current_spread: f64) -> Option<f64> {
        if self.entry_leg1_price <= 0.0 {
            return None;
        }
        Some(self.spread_pnl(current_spread) / self.entry_leg1_price)
    }
}

/// Capability interface for signal generators.
pub trait Strategy: Send {
    /// Evaluate the pair state. Never errors: insufficient history or a
    /// degenerate spread produce a `Hold`.
    fn evaluate(
        &self,
        series: &PairSeries,
        position: Option<&SpreadPosition>,
        ts: EventTime,
    ) -> Signal;

    fn id(&self) -> &str;
}
