//! Order lifecycle management.
//!
//! Single-threaded by design: the engine loop is the only caller, so there
//! is no interior locking. Fills are applied idempotently by [`FillId`] and
//! overfills are clamped to the remaining quantity.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::EventTime;
use crate::orders::position::PositionBook;
use crate::orders::types::{Fill, FillId, Order, OrderId, OrderState, OrderType};
use crate::types::OrderSide;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("unknown order: {0}")]
    NotFound(OrderId),

    #[error("invalid transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: OrderId,
        from: OrderState,
        to: OrderState,
    },
}

/// What to build; the manager assigns the id and owns the record.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub signal_ref: Option<String>,
}

/// Result of applying a fill.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// Fill accepted; order moved to the given state.
    Applied {
        state: OrderState,
        /// Realized P&L delta from position accounting.
        realized_pnl: Decimal,
    },
    /// Previously-seen fill id; nothing changed.
    Duplicate,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The order already reached a terminal state; the request is a no-op.
    AlreadyTerminal(OrderState),
}

/// Owns every order from creation to terminal state and the positions they
/// produce. Orders only move forward through their lifecycle; terminal
/// orders are never resurrected.
#[derive(Debug, Default)]
pub struct OrderManager {
    orders: HashMap<OrderId, Order>,
    seen_fills: HashSet<FillId>,
    positions: PositionBook,
}

impl OrderManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an order in `Created` state and return its id.
    pub fn create(&mut self, intent: OrderIntent, ts: EventTime) -> OrderId {
        let id = OrderId::generate();
        let order = Order {
            id: id.clone(),
            instrument: intent.instrument,
            side: intent.side,
            quantity: intent.quantity,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            state: OrderState::Created,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            created_at: ts,
            updated_at: ts,
            signal_ref: intent.signal_ref,
        };
        debug!(
            order_id = %id,
            instrument = %order.instrument,
            side = %order.side,
            quantity = %order.quantity,
            "order created"
        );
        self.orders.insert(id.clone(), order);
        id
    }

    /// The adapter accepted the order.
    pub fn mark_submitted(&mut self, id: &OrderId, ts: EventTime) -> Result<(), OrderError> {
        self.transition(id, OrderState::Submitted, ts)
    }

    /// The adapter refused the order.
    pub fn mark_rejected(&mut self, id: &OrderId, ts: EventTime) -> Result<(), OrderError> {
        self.transition(id, OrderState::Rejected, ts)
    }

    fn transition(
        &mut self,
        id: &OrderId,
        to: OrderState,
        ts: EventTime,
    ) -> Result<(), OrderError> {
        let order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| OrderError::NotFound(id.clone()))?;
        let allowed = match (order.state, to) {
            (OrderState::Created, OrderState::Submitted) => true,
            (OrderState::Created | OrderState::Submitted, OrderState::Rejected) => true,
            _ => false,
        };
        if !allowed {
            return Err(OrderError::InvalidTransition {
                id: id.clone(),
                from: order.state,
                to,
            });
        }
        order.state = to;
        order.updated_at = ts;
        Ok(())
    }

    /// Apply a fill. Duplicate fill ids are absorbed without side effects;
    /// quantity beyond the order's remainder is clamped with a warning.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<FillOutcome, OrderError> {
        if self.seen_fills.contains(&fill.fill_id) {
            debug!(fill_id = %fill.fill_id, order_id = %fill.order_id, "duplicate fill ignored");
            return Ok(FillOutcome::Duplicate);
        }
        let order = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or_else(|| OrderError::NotFound(fill.order_id.clone()))?;
        if !order.state.may_fill() {
            return Err(OrderError::InvalidTransition {
                id: fill.order_id.clone(),
                from: order.state,
                to: OrderState::PartiallyFilled,
            });
        }

        let remaining = order.remaining_qty();
        let qty = if fill.quantity > remaining {
            warn!(
                order_id = %fill.order_id,
                fill_qty = %fill.quantity,
                remaining = %remaining,
                "fill exceeds remaining quantity, clamping"
            );
            remaining
        } else {
            fill.quantity
        };

        let prior_notional = order.avg_fill_price.unwrap_or(Decimal::ZERO) * order.filled_qty;
        order.filled_qty += qty;
        if !order.filled_qty.is_zero() {
            order.avg_fill_price =
                Some((prior_notional + fill.price * qty) / order.filled_qty);
        }
        order.state = if order.remaining_qty().is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        order.updated_at = fill.ts;

        let instrument = order.instrument.clone();
        let side = order.side;
        let state = order.state;

        let realized_pnl = self.positions.apply_fill(&instrument, side, qty, fill.price);
        self.seen_fills.insert(fill.fill_id.clone());

        debug!(
            order_id = %fill.order_id,
            fill_id = %fill.fill_id,
            quantity = %qty,
            price = %fill.price,
            state = %state,
            "fill applied"
        );
        Ok(FillOutcome::Applied {
            state,
            realized_pnl,
        })
    }

    /// Request cancellation. Cancelling an order that already reached a
    /// terminal state (a cancel/fill race) is a no-op, not an error.
    pub fn request_cancel(
        &mut self,
        id: &OrderId,
        ts: EventTime,
    ) -> Result<CancelOutcome, OrderError> {
        let order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| OrderError::NotFound(id.clone()))?;
        if order.is_terminal() {
            debug!(order_id = %id, state = %order.state, "cancel after terminal state, ignoring");
            return Ok(CancelOutcome::AlreadyTerminal(order.state));
        }
        order.state = OrderState::Cancelled;
        order.updated_at = ts;
        Ok(CancelOutcome::Cancelled)
    }

    #[must_use]
    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Orders that have not yet reached a terminal state.
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| !o.is_terminal())
    }

    #[must_use]
    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionBook {
        &mut self.positions
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intent(instrument: &str, side: OrderSide, qty: Decimal) -> OrderIntent {
        OrderIntent {
            instrument: instrument.to_string(),
            side,
            quantity: qty,
            order_type: OrderType::Market,
            limit_price: None,
            signal_ref: None,
        }
    }

    fn fill(order_id: &OrderId, qty: Decimal, price: Decimal, ts: i64) -> Fill {
        Fill {
            fill_id: FillId::generate(),
            order_id: order_id.clone(),
            price,
            quantity: qty,
            ts: EventTime::from_micros(ts),
            fees: Decimal::ZERO,
        }
    }

    #[test]
    fn test_lifecycle_created_submitted_filled() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        assert_eq!(mgr.get(&id).unwrap().state, OrderState::Created);

        mgr.mark_submitted(&id, ts).unwrap();
        assert_eq!(mgr.get(&id).unwrap().state, OrderState::Submitted);

        let outcome = mgr.apply_fill(&fill(&id, dec!(10), dec!(1.10), 1)).unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Applied {
                state: OrderState::Filled,
                realized_pnl: dec!(0),
            }
        );
        let order = mgr.get(&id).unwrap();
        assert_eq!(order.filled_qty, dec!(10));
        assert_eq!(order.avg_fill_price, Some(dec!(1.10)));
    }

    #[test]
    fn test_partial_fills_vwap() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        mgr.mark_submitted(&id, ts).unwrap();

        mgr.apply_fill(&fill(&id, dec!(4), dec!(1.00), 1)).unwrap();
        assert_eq!(mgr.get(&id).unwrap().state, OrderState::PartiallyFilled);

        mgr.apply_fill(&fill(&id, dec!(6), dec!(1.10), 2)).unwrap();
        let order = mgr.get(&id).unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(1.06)));
    }

    #[test]
    fn test_duplicate_fill_is_noop() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        mgr.mark_submitted(&id, ts).unwrap();

        let f = fill(&id, dec!(4), dec!(1.00), 1);
        mgr.apply_fill(&f).unwrap();
        let outcome = mgr.apply_fill(&f).unwrap();
        assert_eq!(outcome, FillOutcome::Duplicate);
        assert_eq!(mgr.get(&id).unwrap().filled_qty, dec!(4));
        assert_eq!(mgr.positions().get("EURUSD").unwrap().net_qty, dec!(4));
    }

    #[test]
    fn test_overfill_clamped_to_remaining() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        mgr.mark_submitted(&id, ts).unwrap();

        mgr.apply_fill(&fill(&id, dec!(8), dec!(1.00), 1)).unwrap();
        // Reports 5 more but only 2 remain.
        mgr.apply_fill(&fill(&id, dec!(5), dec!(1.00), 2)).unwrap();

        let order = mgr.get(&id).unwrap();
        assert_eq!(order.filled_qty, dec!(10));
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(mgr.positions().get("EURUSD").unwrap().net_qty, dec!(10));
    }

    #[test]
    fn test_fill_on_created_order_rejected() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);

        let err = mgr.apply_fill(&fill(&id, dec!(1), dec!(1.00), 1)).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cancel_after_fill_is_noop() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        mgr.mark_submitted(&id, ts).unwrap();
        mgr.apply_fill(&fill(&id, dec!(10), dec!(1.00), 1)).unwrap();

        let outcome = mgr.request_cancel(&id, EventTime::from_micros(2)).unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal(OrderState::Filled));
        assert_eq!(mgr.get(&id).unwrap().state, OrderState::Filled);
    }

    #[test]
    fn test_cancel_open_order() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(10)), ts);
        mgr.mark_submitted(&id, ts).unwrap();

        let outcome = mgr.request_cancel(&id, EventTime::from_micros(1)).unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert!(mgr.get(&id).unwrap().is_terminal());
    }

    #[test]
    fn test_rejected_order_stays_terminal() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let id = mgr.create(intent("EURUSD", OrderSide::Sell, dec!(3)), ts);
        mgr.mark_submitted(&id, ts).unwrap();
        // Terminal via cancel, then a stray submitted transition must fail.
        mgr.request_cancel(&id, ts).unwrap();
        assert!(mgr.mark_submitted(&id, ts).is_err());
    }

    #[test]
    fn test_unknown_order() {
        let mut mgr = OrderManager::new();
        let id = OrderId::new("nope");
        assert!(matches!(
            mgr.mark_submitted(&id, EventTime::from_micros(0)),
            Err(OrderError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_orders_iterator() {
        let mut mgr = OrderManager::new();
        let ts = EventTime::from_micros(0);
        let a = mgr.create(intent("EURUSD", OrderSide::Buy, dec!(1)), ts);
        let b = mgr.create(intent("GBPUSD", OrderSide::Sell, dec!(1)), ts);
        mgr.mark_submitted(&a, ts).unwrap();
        mgr.mark_submitted(&b, ts).unwrap();
        mgr.apply_fill(&fill(&a, dec!(1), dec!(1.0), 1)).unwrap();

        let open: Vec<_> = mgr.open_orders().map(|o| o.id.clone()).collect();
        assert_eq!(open, vec![b]);
    }
}
