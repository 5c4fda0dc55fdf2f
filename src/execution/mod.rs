//! Execution adapters.
//!
//! The engine talks to a venue through [`ExecutionAdapter`]: submit and
//! cancel are request/response, fills come back asynchronously as events.
//! Backtest and live runs differ only in which adapter is plugged in.

pub mod simulated;

pub use simulated::{SimulatedAdapter, SimulatedAdapterConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::Tick;
use crate::events::EventTime;
use crate::orders::{Order, OrderId, OrderType};
use crate::types::OrderSide;

/// The slice of an order an adapter needs to route it. Adapters never see
/// the mutable order record.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

impl From<&Order> for OrderSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: order.quantity,
            order_type: order.order_type,
            limit_price: order.limit_price,
        }
    }
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub order_id: OrderId,
    pub ts: EventTime,
}

/// Why the venue refused an order.
#[derive(Debug, Clone, Error)]
pub enum RejectionReason {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("no market data for {0}")]
    NoMarketData(String),

    #[error("limit order missing a limit price")]
    MissingLimitPrice,

    #[error("order refused by venue: {0}")]
    VenueRefused(String),
}

/// Cancel target already finished (filled or otherwise terminal on the
/// venue side). Callers treat this as informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order already terminal at the venue")]
pub struct AlreadyTerminal;

/// Venue connectivity seam. Fills are not returned from `submit`; adapters
/// deliver them asynchronously so partial fills and latency model the same
/// way in backtest and live.
#[async_trait]
pub trait ExecutionAdapter: Send {
    /// Route an order. `Ok` means accepted, fills will follow as events.
    async fn submit(&mut self, order: &OrderSnapshot) -> Result<Ack, RejectionReason>;

    /// Request cancellation of a previously accepted order.
    async fn cancel(&mut self, id: &OrderId) -> Result<(), AlreadyTerminal>;

    /// Quote update hook. Simulated venues use it to price fills and wake
    /// resting limit orders; live adapters typically ignore it.
    async fn on_quote(&mut self, _tick: &Tick) {}
}
