//! Rolling bar windows and derived pair state.
//!
//! All mutable statistical state for a pair lives here: the signal layer
//! reads a [`PairSeries`] and stays stateless per emission.

use std::collections::VecDeque;

use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

use crate::data::Bar;
use crate::math;

/// Bounded FIFO window with ring-buffer eviction.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// # Panics
    ///
    /// Debug builds assert a non-zero capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "window capacity must be non-zero");
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, returning the evicted oldest element when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

/// Two instrument bar windows plus the derived hedge ratio and spread
/// history. Recomputed whenever a bar lands so readers always see a
/// consistent snapshot.
///
/// Invariant: while the hedge ratio is estimable,
/// `spreads.len() == min(leg1.len(), leg2.len())`; otherwise (fewer than
/// two aligned bars, or a degenerate fit) the spread history is empty.
#[derive(Debug)]
pub struct PairSeries {
    pair: String,
    leg1_instrument: String,
    leg2_instrument: String,
    lookback: usize,
    leg1: RollingWindow<Bar>,
    leg2: RollingWindow<Bar>,
    hedge_ratio: Option<f64>,
    spreads: Vec<f64>,
    correlation: Option<f64>,
}

impl PairSeries {
    #[must_use]
    pub fn new(leg1_instrument: impl Into<String>, leg2_instrument: impl Into<String>, lookback: usize) -> Self {
        let leg1_instrument = leg1_instrument.into();
        let leg2_instrument = leg2_instrument.into();
        Self {
            pair: format!("{}/{}", leg1_instrument, leg2_instrument),
            leg1_instrument,
            leg2_instrument,
            lookback,
            leg1: RollingWindow::new(lookback),
            leg2: RollingWindow::new(lookback),
            hedge_ratio: None,
            spreads: Vec::new(),
            correlation: None,
        }
    }

    /// Route a closed bar to its leg and refresh the derived state.
    /// Bars for unrelated instruments are ignored.
    ///
    /// Returns true when the bar belonged to this pair.
    pub fn on_bar(&mut self, bar: &Bar) -> bool {
        if bar.instrument == self.leg1_instrument {
            self.leg1.push(bar.clone());
        } else if bar.instrument == self.leg2_instrument {
            self.leg2.push(bar.clone());
        } else {
            return false;
        }
        self.recompute();
        true
    }

    /// Both legs have a full lookback window.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.leg1.is_full() && self.leg2.is_full()
    }

    #[must_use]
    pub fn pair(&self) -> &str {
        &self.pair
    }

    #[must_use]
    pub fn leg1_instrument(&self) -> &str {
        &self.leg1_instrument
    }

    #[must_use]
    pub fn leg2_instrument(&self) -> &str {
        &self.leg2_instrument
    }

    #[must_use]
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    #[must_use]
    pub fn hedge_ratio(&self) -> Option<f64> {
        self.hedge_ratio
    }

    /// Spread history over the aligned tail of both windows.
    #[must_use]
    pub fn spreads(&self) -> &[f64] {
        &self.spreads
    }

    #[must_use]
    pub fn current_spread(&self) -> Option<f64> {
        self.spreads.last().copied()
    }

    /// Rolling Pearson correlation of the aligned close series.
    #[must_use]
    pub fn correlation(&self) -> Option<f64> {
        self.correlation
    }

    #[must_use]
    pub fn latest_leg1_close(&self) -> Option<f64> {
        self.leg1.latest().and_then(|b| b.close.to_f64())
    }

    fn recompute(&mut self) {
        let n = self.leg1.len().min(self.leg2.len());
        if n < 2 {
            self.hedge_ratio = None;
            self.correlation = None;
            self.spreads.clear();
            return;
        }

        let closes1 = Self::aligned_closes(&self.leg1, n);
        let closes2 = Self::aligned_closes(&self.leg2, n);
        if closes1.len() != n || closes2.len() != n {
            // A close failed the Decimal -> f64 conversion; prices that
            // extreme cannot feed the stats layer safely.
            warn!(pair = %self.pair, "non-representable close price, derived state cleared");
            self.hedge_ratio = None;
            self.correlation = None;
            self.spreads.clear();
            return;
        }

        self.correlation = math::pearson_correlation(&closes1, &closes2);
        self.hedge_ratio = math::ols_slope(&closes2, &closes1);

        match self.hedge_ratio {
            Some(beta) => {
                self.spreads.clear();
                self.spreads.extend(
                    closes1
                        .iter()
                        .zip(closes2.iter())
                        .map(|(&p1, &p2)| p1 - beta * p2),
                );
            }
            None => self.spreads.clear(),
        }
    }

    fn aligned_closes(window: &RollingWindow<Bar>, n: usize) -> Vec<f64> {
        window
            .iter()
            .skip(window.len() - n)
            .filter_map(|b| b.close.to_f64())
            .collect()
    }
}
