//! Core types for order management.
//!
//! Type-safe identifiers and the order/fill value types. Identifier newtypes
//! prevent mixing order ids, fill ids, and plain strings at compile time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventTime;
use crate::types::OrderSide;

/// Type-safe order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        debug_assert!(!s.is_empty(), "OrderId cannot be empty");
        Self(s)
    }

    /// Generate a fresh unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Fill identifier assigned by the execution adapter. The dedup key for
/// idempotent fill application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillId(String);

impl FillId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        debug_assert!(!s.is_empty(), "FillId cannot be empty");
        Self(s)
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// Order lifecycle states.
///
/// The sequence is strictly forward-moving: `Created → Submitted →
/// {PartiallyFilled ⇄, Filled, Rejected, Cancelled}`, with `Filled`,
/// `Rejected`, and `Cancelled` terminal. Terminal orders are never
/// resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Built locally, not yet handed to the execution adapter.
    Created,
    /// Accepted by the adapter, awaiting fills.
    Submitted,
    /// Some quantity executed, more outstanding.
    PartiallyFilled,
    /// All quantity executed.
    Filled,
    /// Adapter refused the order (insufficient margin, invalid params, ...).
    Rejected,
    /// Cancelled before completion.
    Cancelled,
}

impl OrderState {
    /// No further transitions expected.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }

    /// The order may still receive fills.
    #[must_use]
    pub fn may_fill(&self) -> bool {
        matches!(self, Self::Submitted | Self::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Submitted => write!(f, "Submitted"),
            Self::PartiallyFilled => write!(f, "PartiallyFilled"),
            Self::Filled => write!(f, "Filled"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// An order through its whole lifecycle. Owned exclusively by the
/// [`OrderManager`](crate::orders::OrderManager); everything else holds the
/// [`OrderId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Requested price for limit orders.
    pub limit_price: Option<Decimal>,
    pub state: OrderState,
    pub filled_qty: Decimal,
    /// Volume-weighted average fill price across applied fills.
    pub avg_fill_price: Option<Decimal>,
    pub created_at: EventTime,
    pub updated_at: EventTime,
    /// Reference to the signal emission that caused this order.
    pub signal_ref: Option<String>,
}

impl Order {
    #[must_use]
    pub fn remaining_qty(&self) -> Decimal {
        self.quantity - self.filled_qty
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A confirmed (full or partial) execution. Immutable; produced by the
/// execution adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    pub order_id: OrderId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub ts: EventTime,
    pub fees: Decimal,
}
