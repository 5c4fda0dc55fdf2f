//! Time and event primitives.
//!
//! Everything downstream of the data feed speaks in [`Event`] envelopes
//! stamped with a monotonic [`EventTime`]. The [`EventQueue`] merges events
//! from all sources into a single strictly ordered stream, which is what
//! makes backtest and live runs produce identical decision sequences.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Tick;
use crate::orders::Fill;

/// Monotonic timestamp with microsecond resolution.
///
/// Stored as microseconds since the Unix epoch so backtest replays can use
/// the historical data's own timestamps and remain bit-for-bit reproducible.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventTime(i64);

impl EventTime {
    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Offset by a number of microseconds (saturating).
    #[must_use]
    pub fn plus_micros(&self, micros: i64) -> Self {
        Self(self.0.saturating_add(micros))
    }

    /// Wall-clock representation for logging and records.
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_micros(self.0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_micros(0).single().unwrap_or_default())
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time source abstraction so tests and backtests can inject a manual clock.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> EventTime;
}

/// Wall-clock backed [`Clock`] for live sessions.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EventTime {
        EventTime::from_micros(Utc::now().timestamp_micros())
    }
}

/// Kind of housekeeping a timer event requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Mark open positions to market and re-check portfolio risk state.
    MarkToMarket,
}

#[derive(Debug, Clone)]
pub struct TimerEvent {
    pub ts: EventTime,
    pub kind: TimerKind,
}

/// Portfolio-level limit that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreachKind {
    DailyLoss,
    Drawdown,
}

impl std::fmt::Display for BreachKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreachKind::DailyLoss => write!(f, "daily-loss"),
            BreachKind::Drawdown => write!(f, "drawdown"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskBreachEvent {
    pub ts: EventTime,
    pub kind: BreachKind,
}

/// Typed event envelope dispatched by the engine loop.
#[derive(Debug, Clone)]
pub enum Event {
    Tick(Tick),
    Timer(TimerEvent),
    Fill(Fill),
    RiskBreach(RiskBreachEvent),
}

impl Event {
    #[must_use]
    pub fn ts(&self) -> EventTime {
        match self {
            Event::Tick(t) => t.ts,
            Event::Timer(t) => t.ts,
            Event::Fill(f) => f.ts,
            Event::RiskBreach(b) => b.ts,
        }
    }

    /// Dispatch class used as the tie-break at equal timestamps:
    /// data events before timer events before fill events, so a backtest
    /// replay dispatches in exactly one order.
    fn class(&self) -> u8 {
        match self {
            Event::Tick(_) => 0,
            Event::Timer(_) => 1,
            Event::Fill(_) => 2,
            Event::RiskBreach(_) => 3,
        }
    }
}

struct QueuedEvent {
    ts: EventTime,
    class: u8,
    seq: u64,
    event: Event,
}

impl QueuedEvent {
    fn key(&self) -> (EventTime, u8, u64) {
        (self.ts, self.class, self.seq)
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Single-consumer merge queue ordered by `(timestamp, class, insertion seq)`.
///
/// The sequence number makes the ordering total and stable: two events with
/// the same timestamp and class dispatch in insertion order.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    seq: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        let entry = QueuedEvent {
            ts: event.ts(),
            class: event.class(),
            seq: self.seq,
            event,
        };
        self.seq += 1;
        self.heap.push(Reverse(entry));
    }

    /// Pop the earliest event, data-before-timer-before-fill at ties.
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(q)| q.event)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
