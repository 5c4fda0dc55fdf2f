//! Simulated venue for backtests and dry runs.
//!
//! Fills at the quoted bid/ask with configurable latency, fees, and fill
//! splitting. Limit orders rest until a quote makes them marketable. The
//! adapter only emits events; all bookkeeping stays in the order manager.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::data::Tick;
use crate::events::{Event, EventTime};
use crate::execution::{Ack, AlreadyTerminal, ExecutionAdapter, OrderSnapshot, RejectionReason};
use crate::orders::{Fill, FillId, OrderId, OrderType};
use crate::types::OrderSide;

#[derive(Debug, Clone)]
pub struct SimulatedAdapterConfig {
    /// Fee charged per fill, in basis points of notional.
    pub fee_bps: Decimal,
    /// Delay between submission and fill timestamps.
    pub latency_micros: i64,
    /// Number of partial fills a market order is split into.
    pub fill_splits: u32,
}

impl Default for SimulatedAdapterConfig {
    fn default() -> Self {
        Self {
            fee_bps: Decimal::ZERO,
            latency_micros: 0,
            fill_splits: 1,
        }
    }
}

pub struct SimulatedAdapter {
    config: SimulatedAdapterConfig,
    fills_tx: mpsc::Sender<Event>,
    /// Latest quote per instrument.
    quotes: HashMap<String, Tick>,
    /// Limit orders waiting to become marketable.
    resting: HashMap<OrderId, OrderSnapshot>,
    /// Instruments the venue refuses outright. Test hook.
    refuse_instruments: Vec<String>,
}

impl SimulatedAdapter {
    #[must_use]
    pub fn new(config: SimulatedAdapterConfig, fills_tx: mpsc::Sender<Event>) -> Self {
        Self {
            config,
            fills_tx,
            quotes: HashMap::new(),
            resting: HashMap::new(),
            refuse_instruments: Vec::new(),
        }
    }

    /// Make the venue refuse every order for an instrument.
    pub fn refuse_instrument(&mut self, instrument: impl Into<String>) {
        self.refuse_instruments.push(instrument.into());
    }

    fn execution_price(quote: &Tick, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => quote.ask,
            OrderSide::Sell => quote.bid,
        }
    }

    /// Split the order quantity into fills and push them on the event
    /// channel, timestamped `base_ts + latency`.
    async fn emit_fills(&mut self, order: &OrderSnapshot, price: Decimal, base_ts: EventTime) {
        let splits = self.config.fill_splits.max(1);
        let ts = base_ts.plus_micros(self.config.latency_micros);
        let slice = order.quantity / Decimal::from(splits);
        let mut sent = Decimal::ZERO;
        for i in 0..splits {
            // Last slice absorbs rounding so the total matches exactly.
            let qty = if i == splits - 1 {
                order.quantity - sent
            } else {
                slice
            };
            sent += qty;
            let fees = price * qty * self.config.fee_bps / Decimal::from(10_000);
            let fill = Fill {
                fill_id: FillId::generate(),
                order_id: order.id.clone(),
                price,
                quantity: qty,
                ts,
                fees,
            };
            if self.fills_tx.send(Event::Fill(fill)).await.is_err() {
                warn!(order_id = %order.id, "fill channel closed, dropping fill");
                return;
            }
        }
        debug!(
            order_id = %order.id,
            price = %price,
            splits,
            "simulated fills emitted"
        );
    }

    fn is_marketable(order: &OrderSnapshot, quote: &Tick) -> bool {
        let Some(limit) = order.limit_price else {
            return false;
        };
        match order.side {
            OrderSide::Buy => quote.ask <= limit,
            OrderSide::Sell => quote.bid >= limit,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SimulatedAdapter {
    async fn submit(&mut self, order: &OrderSnapshot) -> Result<Ack, RejectionReason> {
        if self.refuse_instruments.contains(&order.instrument) {
            return Err(RejectionReason::VenueRefused(format!(
                "instrument {} disabled",
                order.instrument
            )));
        }
        let quote = self
            .quotes
            .get(&order.instrument)
            .cloned()
            .ok_or_else(|| RejectionReason::NoMarketData(order.instrument.clone()))?;

        match order.order_type {
            OrderType::Market => {
                let price = Self::execution_price(&quote, order.side);
                let ack = Ack {
                    order_id: order.id.clone(),
                    ts: quote.ts,
                };
                self.emit_fills(order, price, quote.ts).await;
                Ok(ack)
            }
            OrderType::Limit => {
                let limit = order
                    .limit_price
                    .ok_or(RejectionReason::MissingLimitPrice)?;
                let ack = Ack {
                    order_id: order.id.clone(),
                    ts: quote.ts,
                };
                if Self::is_marketable(order, &quote) {
                    self.emit_fills(order, limit, quote.ts).await;
                } else {
                    debug!(order_id = %order.id, limit = %limit, "limit order resting");
                    self.resting.insert(order.id.clone(), order.clone());
                }
                Ok(ack)
            }
        }
    }

    async fn cancel(&mut self, id: &OrderId) -> Result<(), AlreadyTerminal> {
        if self.resting.remove(id).is_some() {
            debug!(order_id = %id, "resting order cancelled");
            Ok(())
        } else {
            Err(AlreadyTerminal)
        }
    }

    async fn on_quote(&mut self, tick: &Tick) {
        self.quotes.insert(tick.instrument.clone(), tick.clone());

        let woken: Vec<OrderSnapshot> = self
            .resting
            .values()
            .filter(|o| o.instrument == tick.instrument && Self::is_marketable(o, tick))
            .cloned()
            .collect();
        for order in woken {
            self.resting.remove(&order.id);
            // Marketable limit orders fill at their limit price.
            let limit = match order.limit_price {
                Some(p) => p,
                None => continue,
            };
            self.emit_fills(&order, limit, tick.ts).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(instrument: &str, bid: Decimal, ask: Decimal, ts: i64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            bid,
            ask,
            ts: EventTime::from_micros(ts),
        }
    }

    fn snapshot(
        instrument: &str,
        side: OrderSide,
        qty: Decimal,
        order_type: OrderType,
        limit: Option<Decimal>,
    ) -> OrderSnapshot {
        OrderSnapshot {
            id: OrderId::generate(),
            instrument: instrument.to_string(),
            side,
            quantity: qty,
            order_type,
            limit_price: limit,
        }
    }

    async fn recv_fill(rx: &mut mpsc::Receiver<Event>) -> Fill {
        match rx.recv().await {
            Some(Event::Fill(fill)) => fill,
            other => panic!("expected fill event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_market_buy_fills_at_ask() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0998), dec!(1.1002), 100)).await;

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(10), OrderType::Market, None);
        adapter.submit(&order).await.unwrap();

        let fill = recv_fill(&mut rx).await;
        assert_eq!(fill.order_id, order.id);
        assert_eq!(fill.price, dec!(1.1002));
        assert_eq!(fill.quantity, dec!(10));
        assert_eq!(fill.ts, EventTime::from_micros(100));
    }

    #[tokio::test]
    async fn test_market_sell_fills_at_bid() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0998), dec!(1.1002), 100)).await;

        let order = snapshot("EURUSD", OrderSide::Sell, dec!(5), OrderType::Market, None);
        adapter.submit(&order).await.unwrap();
        assert_eq!(recv_fill(&mut rx).await.price, dec!(1.0998));
    }

    #[tokio::test]
    async fn test_fill_splitting_preserves_quantity() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = SimulatedAdapterConfig {
            fill_splits: 3,
            ..SimulatedAdapterConfig::default()
        };
        let mut adapter = SimulatedAdapter::new(config, tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0), dec!(1.0), 0)).await;

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(10), OrderType::Market, None);
        adapter.submit(&order).await.unwrap();

        let mut total = Decimal::ZERO;
        for _ in 0..3 {
            total += recv_fill(&mut rx).await.quantity;
        }
        assert_eq!(total, dec!(10));
    }

    #[tokio::test]
    async fn test_latency_shifts_fill_timestamp() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = SimulatedAdapterConfig {
            latency_micros: 250,
            ..SimulatedAdapterConfig::default()
        };
        let mut adapter = SimulatedAdapter::new(config, tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0), dec!(1.0), 1_000)).await;

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(1), OrderType::Market, None);
        adapter.submit(&order).await.unwrap();
        assert_eq!(recv_fill(&mut rx).await.ts, EventTime::from_micros(1_250));
    }

    #[tokio::test]
    async fn test_fees_in_basis_points() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = SimulatedAdapterConfig {
            fee_bps: dec!(2),
            ..SimulatedAdapterConfig::default()
        };
        let mut adapter = SimulatedAdapter::new(config, tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0), dec!(1.0), 0)).await;

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(100), OrderType::Market, None);
        adapter.submit(&order).await.unwrap();
        // 1.0 * 100 * 2 / 10_000 = 0.02
        assert_eq!(recv_fill(&mut rx).await.fees, dec!(0.02));
    }

    #[tokio::test]
    async fn test_no_market_data_rejection() {
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(1), OrderType::Market, None);
        let err = adapter.submit(&order).await.unwrap_err();
        assert!(matches!(err, RejectionReason::NoMarketData(_)));
    }

    #[tokio::test]
    async fn test_scripted_refusal() {
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.0), dec!(1.0), 0)).await;
        adapter.refuse_instrument("EURUSD");

        let order = snapshot("EURUSD", OrderSide::Buy, dec!(1), OrderType::Market, None);
        let err = adapter.submit(&order).await.unwrap_err();
        assert!(matches!(err, RejectionReason::VenueRefused(_)));
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_marketable() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.10), dec!(1.11), 0)).await;

        // Buy limit below the ask: rests.
        let order = snapshot(
            "EURUSD",
            OrderSide::Buy,
            dec!(5),
            OrderType::Limit,
            Some(dec!(1.09)),
        );
        adapter.submit(&order).await.unwrap();
        assert!(rx.try_recv().is_err());

        // Ask drops through the limit: fills at the limit price.
        adapter.on_quote(&tick("EURUSD", dec!(1.08), dec!(1.085), 10)).await;
        let fill = recv_fill(&mut rx).await;
        assert_eq!(fill.order_id, order.id);
        assert_eq!(fill.price, dec!(1.09));
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        adapter.on_quote(&tick("EURUSD", dec!(1.10), dec!(1.11), 0)).await;

        let order = snapshot(
            "EURUSD",
            OrderSide::Buy,
            dec!(5),
            OrderType::Limit,
            Some(dec!(1.09)),
        );
        adapter.submit(&order).await.unwrap();
        adapter.cancel(&order.id).await.unwrap();

        // Order is gone; a marketable quote no longer fills it.
        adapter.on_quote(&tick("EURUSD", dec!(1.08), dec!(1.085), 10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_already_terminal() {
        let (tx, _rx) = mpsc::channel(16);
        let mut adapter = SimulatedAdapter::new(SimulatedAdapterConfig::default(), tx);
        let err = adapter.cancel(&OrderId::new("gone")).await.unwrap_err();
        assert_eq!(err, AlreadyTerminal);
    }
}
