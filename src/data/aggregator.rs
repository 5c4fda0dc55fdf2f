//! Tick-to-bar aggregation.
//!
//! Converts a per-instrument stream of quotes into fixed-interval bars. Bars
//! close strictly on interval boundaries: the first tick at or past a
//! boundary closes the previous bar and opens the next one at the boundary.

use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::events::EventTime;

/// A single market data update. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// The trading symbol (e.g., "EURUSD").
    pub instrument: String,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Monotonic per-instrument timestamp, microsecond resolution.
    pub ts: EventTime,
}

impl Tick {
    /// Quote midpoint, used for bar construction and simulated marks.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Fixed-interval OHLCV bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub instrument: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Tick count within the bar (quote feeds carry no trade size).
    pub volume: Decimal,
    pub open_time: EventTime,
    pub close_time: EventTime,
}

/// Out-of-order tick for an instrument. Dropped by the caller, never fatal.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("stale tick for {instrument}: ts {tick_ts} precedes last seen {last_ts}")]
pub struct StaleData {
    pub instrument: String,
    pub tick_ts: EventTime,
    pub last_ts: EventTime,
}

#[derive(Debug)]
struct OpenBar {
    bucket: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

/// Converts ticks into interval bars, one open bar per instrument.
///
/// Ticks must arrive in non-decreasing timestamp order per instrument;
/// violations are reported as [`StaleData`] and leave all state untouched.
/// Cross-instrument ordering is not required here; that is the event
/// queue's concern.
#[derive(Debug)]
pub struct BarAggregator {
    interval_micros: i64,
    open_bars: HashMap<String, OpenBar>,
    last_seen: HashMap<String, EventTime>,
}

impl BarAggregator {
    /// # Panics
    ///
    /// Debug builds assert a positive interval; configuration validation
    /// rejects non-positive intervals before an aggregator is built.
    #[must_use]
    pub fn new(interval_micros: i64) -> Self {
        debug_assert!(interval_micros > 0, "bar interval must be positive");
        Self {
            interval_micros,
            open_bars: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Ingest one tick. Returns the bar that closed, if this tick crossed an
    /// interval boundary for its instrument.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<Option<Bar>, StaleData> {
        if let Some(&last) = self.last_seen.get(&tick.instrument) {
            if tick.ts < last {
                return Err(StaleData {
                    instrument: tick.instrument.clone(),
                    tick_ts: tick.ts,
                    last_ts: last,
                });
            }
        }
        self.last_seen.insert(tick.instrument.clone(), tick.ts);

        let bucket = tick.ts.as_micros().div_euclid(self.interval_micros);
        let mid = tick.mid();

        let closed = match self.open_bars.remove(&tick.instrument) {
            Some(mut open) if open.bucket == bucket => {
                if mid > open.high {
                    open.high = mid;
                }
                if mid < open.low {
                    open.low = mid;
                }
                open.close = mid;
                open.volume += Decimal::ONE;
                self.open_bars.insert(tick.instrument.clone(), open);
                None
            }
            Some(prev) => {
                // Boundary crossed: close the previous bar, open a new one.
                let bar = self.seal(&tick.instrument, prev);
                self.open_bars
                    .insert(tick.instrument.clone(), Self::fresh(bucket, mid));
                Some(bar)
            }
            None => {
                self.open_bars
                    .insert(tick.instrument.clone(), Self::fresh(bucket, mid));
                None
            }
        };

        Ok(closed)
    }

    /// Close and return the open bar for an instrument, if any. Used at
    /// session end so the final partial bar is not silently dropped.
    pub fn flush(&mut self, instrument: &str) -> Option<Bar> {
        let open = self.open_bars.remove(instrument)?;
        Some(self.seal(instrument, open))
    }

    fn fresh(bucket: i64, mid: Decimal) -> OpenBar {
        OpenBar {
            bucket,
            open: mid,
            high: mid,
            low: mid,
            close: mid,
            volume: Decimal::ONE,
        }
    }

    fn seal(&self, instrument: &str, open: OpenBar) -> Bar {
        let open_time = EventTime::from_micros(open.bucket * self.interval_micros);
        Bar {
            instrument: instrument.to_string(),
            open: open.open,
            high: open.high,
            low: open.low,
            close: open.close,
            volume: open.volume,
            open_time,
            close_time: open_time.plus_micros(self.interval_micros),
        }
    }
}
