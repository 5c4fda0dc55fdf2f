//! Session telemetry.
//!
//! The engine emits [`SessionRecord`]s for everything an operator replays
//! after the fact: order transitions, fills, risk events. Records flow
//! through a buffered channel so the decision path never awaits a sink.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::events::{BreachKind, EventTime};
use crate::orders::{FillId, OrderId, OrderState};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("record sink I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One telemetry record. Everything carries the event time it happened at,
/// not the wall-clock time it was written.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRecord {
    OrderEvent {
        order_id: OrderId,
        instrument: String,
        state: OrderState,
        ts: EventTime,
    },
    Fill {
        order_id: OrderId,
        fill_id: FillId,
        instrument: String,
        price: Decimal,
        quantity: Decimal,
        fees: Decimal,
        ts: EventTime,
    },
    RiskBreach {
        kind: BreachKind,
        daily_pnl: Decimal,
        drawdown: Decimal,
        ts: EventTime,
    },
    RiskRejection {
        instrument: String,
        reason: String,
        ts: EventTime,
    },
    StaleTick {
        instrument: String,
        tick_ts: EventTime,
        last_ts: EventTime,
    },
}

/// Destination for session records. Implementations may buffer or batch;
/// they must tolerate bursts.
#[async_trait]
pub trait RecordSink: Send {
    async fn record(&mut self, record: SessionRecord) -> Result<(), RecordError>;
}

/// Sink that renders records as structured tracing events. The default for
/// backtests and dry runs.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl RecordSink for TracingSink {
    async fn record(&mut self, record: SessionRecord) -> Result<(), RecordError> {
        match record {
            SessionRecord::OrderEvent {
                order_id,
                instrument,
                state,
                ts,
            } => {
                info!(
                    target: "pairflow::records",
                    order_id = %order_id,
                    instrument = %instrument,
                    state = %state,
                    ts = %ts,
                    "order event"
                );
            }
            SessionRecord::Fill {
                order_id,
                fill_id,
                instrument,
                price,
                quantity,
                fees,
                ts,
            } => {
                info!(
                    target: "pairflow::records",
                    order_id = %order_id,
                    fill_id = %fill_id,
                    instrument = %instrument,
                    price = %price,
                    quantity = %quantity,
                    fees = %fees,
                    ts = %ts,
                    "fill"
                );
            }
            SessionRecord::RiskBreach {
                kind,
                daily_pnl,
                drawdown,
                ts,
            } => {
                info!(
                    target: "pairflow::records",
                    kind = %kind,
                    daily_pnl = %daily_pnl,
                    drawdown = %drawdown,
                    ts = %ts,
                    "risk breach"
                );
            }
            SessionRecord::RiskRejection {
                instrument,
                reason,
                ts,
            } => {
                info!(
                    target: "pairflow::records",
                    instrument = %instrument,
                    reason = %reason,
                    ts = %ts,
                    "risk rejection"
                );
            }
            SessionRecord::StaleTick {
                instrument,
                tick_ts,
                last_ts,
            } => {
                info!(
                    target: "pairflow::records",
                    instrument = %instrument,
                    tick_ts = %tick_ts,
                    last_ts = %last_ts,
                    "stale tick dropped"
                );
            }
        }
        Ok(())
    }
}

/// Sink that appends one JSON object per line. Replayable session history
/// for post-trade analysis.
#[derive(Debug)]
pub struct JsonlSink {
    writer: std::io::BufWriter<std::fs::File>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            writer: std::io::BufWriter::new(file),
        })
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn record(&mut self, record: SessionRecord) -> Result<(), RecordError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        // Flush per record: the session may end abruptly and a partial
        // history is worse than slow writes off the decision path.
        self.writer.flush()?;
        Ok(())
    }
}

/// Run a sink on its own task behind a bounded channel. The engine writes
/// with `try_send`; a full buffer drops the record rather than stalling the
/// event loop.
pub fn spawn_sink(
    mut sink: Box<dyn RecordSink>,
    buffer: usize,
) -> (mpsc::Sender<SessionRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = sink.record(record).await {
                error!(error = %e, "record sink failure");
            }
        }
    });
    (tx, handle)
}

/// Event-time log throttle: permits at most one emission per interval.
/// Keeps repeated warnings (stale feeds, clamped fills) from flooding logs.
#[derive(Debug)]
pub struct LogThrottle {
    interval_micros: i64,
    last: Option<EventTime>,
}

impl LogThrottle {
    #[must_use]
    pub fn new(interval_micros: i64) -> Self {
        Self {
            interval_micros,
            last: None,
        }
    }

    /// True when enough event time elapsed since the last permitted call.
    pub fn allow(&mut self, now: EventTime) -> bool {
        match self.last {
            Some(last) if now.as_micros() - last.as_micros() < self.interval_micros => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
