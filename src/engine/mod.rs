//! Session orchestrator.
//!
//! One task owns every mutable component and processes one event at a time.
//! Ticks and fills are drained into the [`EventQueue`] and popped strictly
//! by `(timestamp, class, seq)`, so a backtest replaying the same feed makes
//! the same decisions in the same order as a live session would have.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::data::{Bar, BarAggregator, PairSeries, Tick};
use crate::events::{
    BreachKind, Event, EventQueue, EventTime, RiskBreachEvent, TimerEvent, TimerKind,
};
use crate::execution::{ExecutionAdapter, OrderSnapshot};
use crate::orders::{Fill, FillOutcome, OrderId, OrderIntent, OrderManager, OrderType};
use crate::risk::{RiskDecision, RiskGate, RiskState};
use crate::strategy::{Signal, SignalAction, SpreadPosition, Strategy};
use crate::telemetry::{LogThrottle, SessionRecord};
use crate::types::{OrderSide, SpreadDirection};

/// End-of-session summary returned by [`Engine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub ticks_processed: u64,
    pub ticks_dropped: u64,
    pub bars_closed: u64,
    pub orders_created: u64,
    pub fills_applied: u64,
    pub risk_rejections: u64,
    pub realized_pnl: Decimal,
    pub ending_equity: Decimal,
    /// True when a risk breach halted new entries before the feed ended.
    pub halted: bool,
}

/// Single-task event loop over one instrument pair.
pub struct Engine {
    aggregator: BarAggregator,
    series: PairSeries,
    strategy: Box<dyn Strategy>,
    gate: RiskGate,
    orders: OrderManager,
    adapter: Box<dyn ExecutionAdapter>,
    queue: EventQueue,
    fill_rx: mpsc::Receiver<Event>,
    risk_state: RiskState,
    records: mpsc::Sender<SessionRecord>,
    stale_throttle: LogThrottle,

    order_size: Decimal,
    drain_timeout: Duration,

    /// Last mid price per instrument, for mark-to-market timers.
    last_mid: HashMap<String, Decimal>,
    /// Highest accepted tick timestamp per instrument, checked at admission
    /// so staleness does not depend on how arrivals batch in the channel.
    tick_high_water: HashMap<String, EventTime>,
    last_ts: EventTime,
    open_spread: Option<SpreadPosition>,
    /// Entry legs whose partner was refused; their fills get offset once
    /// the order goes terminal.
    unwind_orders: HashSet<OrderId>,
    /// An exit order pair is in flight; suppress duplicate exit signals.
    exit_in_flight: bool,
    breach_emitted: bool,
    halted: bool,

    ticks_processed: u64,
    ticks_dropped: u64,
    bars_closed: u64,
    orders_created: u64,
    fills_applied: u64,
    risk_rejections: u64,
}

impl Engine {
    pub fn new(
        config: &SessionConfig,
        adapter: Box<dyn ExecutionAdapter>,
        fill_rx: mpsc::Receiver<Event>,
        records: mpsc::Sender<SessionRecord>,
    ) -> Result<Self, crate::config::ConfigError> {
        let strategy = config.strategy()?;
        Ok(Self {
            aggregator: BarAggregator::new(config.bar_interval_micros()),
            series: PairSeries::new(
                config.pair.leg1.clone(),
                config.pair.leg2.clone(),
                config.pair.lookback,
            ),
            strategy,
            gate: RiskGate::new(config.risk.clone()),
            orders: OrderManager::new(),
            adapter,
            queue: EventQueue::new(),
            fill_rx,
            risk_state: RiskState::new(config.starting_equity),
            records,
            stale_throttle: LogThrottle::new(60 * 1_000_000),
            order_size: config.strategy.order_size,
            drain_timeout: Duration::from_millis(config.execution.drain_timeout_ms),
            last_mid: HashMap::new(),
            tick_high_water: HashMap::new(),
            last_ts: EventTime::from_micros(0),
            open_spread: None,
            unwind_orders: HashSet::new(),
            exit_in_flight: false,
            breach_emitted: false,
            halted: false,
            ticks_processed: 0,
            ticks_dropped: 0,
            bars_closed: 0,
            orders_created: 0,
            fills_applied: 0,
            risk_rejections: 0,
        })
    }

    /// Run until the tick feed closes, then drain in-flight orders and
    /// return the session report.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<Tick>) -> SessionReport {
        info!(pair = %self.series.pair(), "session started");
        let mut feed_open = true;
        loop {
            while let Ok(event) = self.fill_rx.try_recv() {
                self.queue.push(event);
            }
            while feed_open {
                match tick_rx.try_recv() {
                    Ok(tick) => self.admit_tick(tick),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => feed_open = false,
                }
            }

            if let Some(event) = self.queue.pop() {
                self.dispatch(event).await;
                continue;
            }
            if !feed_open {
                break;
            }

            // Queue empty, feed still open: block until something arrives.
            let incoming = {
                let fill_rx = &mut self.fill_rx;
                tokio::select! {
                    maybe_tick = tick_rx.recv() => match maybe_tick {
                        Some(tick) => Some(Event::Tick(tick)),
                        None => {
                            feed_open = false;
                            None
                        }
                    },
                    maybe_fill = fill_rx.recv() => maybe_fill,
                }
            };
            match incoming {
                Some(Event::Tick(tick)) => self.admit_tick(tick),
                Some(event) => self.queue.push(event),
                None => {}
            }
        }

        self.shutdown().await;
        info!(pair = %self.series.pair(), "session finished");
        self.report()
    }

    async fn dispatch(&mut self, event: Event) {
        self.last_ts = event.ts();
        match event {
            Event::Tick(tick) => self.on_tick(tick).await,
            Event::Timer(timer) => self.on_timer(timer),
            Event::Fill(fill) => self.on_fill(fill).await,
            Event::RiskBreach(breach) => self.on_breach(breach),
        }
    }

    /// Validate per-instrument timestamp order at admission, before the
    /// queue re-sorts by timestamp. Checking here (not after the queue)
    /// keeps stale handling independent of how many ticks a drain batch
    /// happens to pick up, so replays drop exactly the same ticks.
    fn admit_tick(&mut self, tick: Tick) {
        if let Some(&last) = self.tick_high_water.get(&tick.instrument) {
            if tick.ts < last {
                self.ticks_dropped += 1;
                if self.stale_throttle.allow(tick.ts) {
                    warn!(
                        instrument = %tick.instrument,
                        tick_ts = %tick.ts,
                        last_ts = %last,
                        "stale tick dropped"
                    );
                }
                self.record(SessionRecord::StaleTick {
                    instrument: tick.instrument,
                    tick_ts: tick.ts,
                    last_ts: last,
                });
                return;
            }
        }
        self.tick_high_water.insert(tick.instrument.clone(), tick.ts);
        self.queue.push(Event::Tick(tick));
    }

    async fn on_tick(&mut self, tick: Tick) {
        let bar = match self.aggregator.on_tick(&tick) {
            Ok(bar) => bar,
            Err(stale) => {
                self.ticks_dropped += 1;
                if self.stale_throttle.allow(tick.ts) {
                    warn!(
                        instrument = %stale.instrument,
                        tick_ts = %stale.tick_ts,
                        last_ts = %stale.last_ts,
                        "stale tick dropped"
                    );
                }
                self.record(SessionRecord::StaleTick {
                    instrument: stale.instrument,
                    tick_ts: stale.tick_ts,
                    last_ts: stale.last_ts,
                });
                return;
            }
        };
        self.ticks_processed += 1;
        self.last_mid.insert(tick.instrument.clone(), tick.mid());
        self.adapter.on_quote(&tick).await;

        if let Some(bar) = bar {
            self.on_bar_closed(bar, tick.ts).await;
        }
    }

    /// `now` is the timestamp of the tick that closed the bar; it is at or
    /// past `bar.close_time`, and stamping downstream events with it keeps
    /// dispatch timestamps non-decreasing.
    async fn on_bar_closed(&mut self, bar: Bar, now: EventTime) {
        if !self.series.on_bar(&bar) {
            return;
        }
        self.bars_closed += 1;
        self.queue.push(Event::Timer(TimerEvent {
            ts: now,
            kind: TimerKind::MarkToMarket,
        }));

        let signal = self
            .strategy
            .evaluate(&self.series, self.open_spread.as_ref(), now);
        match signal.action {
            SignalAction::Hold => {}
            SignalAction::Exit => self.handle_exit(&signal).await,
            SignalAction::EnterLongSpread | SignalAction::EnterShortSpread => {
                self.handle_entry(&signal).await;
            }
        }
    }

    async fn handle_entry(&mut self, signal: &Signal) {
        if self.halted {
            debug!(pair = %signal.pair, "entry ignored, session halted by risk breach");
            return;
        }
        // One spread position per pair.
        if self.open_spread.is_some() || self.exit_in_flight {
            return;
        }
        let Some(hedge_ratio) = self.series.hedge_ratio() else {
            return;
        };
        let Some(leg2_qty) = Decimal::from_f64(hedge_ratio.abs()).map(|h| {
            (self.order_size * h).round_dp(8)
        }) else {
            warn!(hedge_ratio, "hedge ratio not representable, entry skipped");
            return;
        };
        if leg2_qty.is_zero() {
            return;
        }

        let direction = match signal.action {
            SignalAction::EnterLongSpread => SpreadDirection::Long,
            _ => SpreadDirection::Short,
        };
        // Long spread: long leg 1 against the hedge in leg 2. A negative
        // hedge ratio flips the leg-2 side.
        let leg1_side = match direction {
            SpreadDirection::Long => OrderSide::Buy,
            SpreadDirection::Short => OrderSide::Sell,
        };
        let leg2_side = if hedge_ratio >= 0.0 {
            leg1_side.opposite()
        } else {
            leg1_side
        };

        let leg1_intent = OrderIntent {
            instrument: self.series.leg1_instrument().to_string(),
            side: leg1_side,
            quantity: self.order_size,
            order_type: OrderType::Market,
            limit_price: None,
            signal_ref: Some(signal.reference()),
        };
        let leg2_intent = OrderIntent {
            instrument: self.series.leg2_instrument().to_string(),
            side: leg2_side,
            quantity: leg2_qty,
            order_type: OrderType::Market,
            limit_price: None,
            signal_ref: Some(signal.reference()),
        };

        // Gate both legs before routing either: a spread entry is atomic,
        // one rejected leg rejects the pair.
        let mut scale = Decimal::ONE;
        for intent in [&leg1_intent, &leg2_intent] {
            let position = self.orders.positions().get(&intent.instrument);
            match self.gate.check(intent, true, position, &self.risk_state) {
                RiskDecision::Approve { quantity } => {
                    if !intent.quantity.is_zero() {
                        scale = scale.min(quantity / intent.quantity);
                    }
                }
                RiskDecision::Reject(rejection) => {
                    self.risk_rejections += 1;
                    info!(
                        pair = %signal.pair,
                        instrument = %intent.instrument,
                        reason = %rejection,
                        "entry rejected by risk gate"
                    );
                    self.record(SessionRecord::RiskRejection {
                        instrument: intent.instrument.clone(),
                        reason: rejection.to_string(),
                        ts: signal.ts,
                    });
                    return;
                }
            }
        }

        // Scale both legs by the tighter headroom to keep the hedge intact.
        let scaled = |intent: &OrderIntent| OrderIntent {
            quantity: (intent.quantity * scale).round_dp(8),
            ..intent.clone()
        };
        let leg1_intent = scaled(&leg1_intent);
        let leg2_intent = scaled(&leg2_intent);
        if leg1_intent.quantity.is_zero() || leg2_intent.quantity.is_zero() {
            return;
        }

        let entry_spread = self.series.current_spread().unwrap_or(0.0);
        let entry_leg1_price = self.series.latest_leg1_close().unwrap_or(0.0);

        let leg1_id = self.submit_order(leg1_intent, signal.ts).await;
        let Some(leg1_id) = leg1_id else {
            return;
        };
        if self.submit_order(leg2_intent, signal.ts).await.is_none() {
            // One-legged entries are not acceptable exposure.
            warn!(pair = %signal.pair, "second leg rejected, unwinding first leg");
            self.cancel_order(&leg1_id, signal.ts).await;
            let still_live = self.orders.get(&leg1_id).is_some_and(|o| !o.is_terminal());
            if still_live {
                // Cancel lost the race at the venue; fills for this leg are
                // already in flight and get offset as they land.
                self.unwind_orders.insert(leg1_id);
            }
            return;
        }

        self.open_spread = Some(SpreadPosition {
            direction,
            entry_spread,
            entry_leg1_price,
        });
        info!(
            pair = %signal.pair,
            direction = %direction,
            strength = signal.strength,
            "spread entry submitted"
        );
    }

    async fn handle_exit(&mut self, signal: &Signal) {
        if self.open_spread.is_none() || self.exit_in_flight {
            return;
        }

        let mut intents = Vec::new();
        for instrument in [
            self.series.leg1_instrument().to_string(),
            self.series.leg2_instrument().to_string(),
        ] {
            let Some(position) = self.orders.positions().get(&instrument) else {
                continue;
            };
            if position.is_flat() {
                continue;
            }
            let side = if position.net_qty > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            intents.push(OrderIntent {
                instrument,
                side,
                quantity: position.net_qty.abs(),
                order_type: OrderType::Market,
                limit_price: None,
                signal_ref: Some(signal.reference()),
            });
        }
        if intents.is_empty() {
            // Nothing actually held; the entry never filled.
            self.open_spread = None;
            return;
        }

        // Exits are pre-approved: closing risk is always allowed.
        for intent in intents {
            self.submit_order(intent, signal.ts).await;
        }
        self.exit_in_flight = true;
        info!(pair = %signal.pair, strength = signal.strength, "spread exit submitted");
    }

    /// Create, record, and route one order. Returns the id when the venue
    /// accepted it.
    async fn submit_order(&mut self, intent: OrderIntent, ts: EventTime) -> Option<OrderId> {
        let id = self.orders.create(intent, ts);
        self.orders_created += 1;
        self.record_order_event(&id, ts);

        let snapshot = self.orders.get(&id).map(OrderSnapshot::from)?;
        match self.adapter.submit(&snapshot).await {
            Ok(ack) => {
                if let Err(e) = self.orders.mark_submitted(&id, ack.ts) {
                    error!(order_id = %id, error = %e, "submit bookkeeping failed");
                    return None;
                }
                self.record_order_event(&id, ack.ts);
                Some(id)
            }
            Err(reason) => {
                warn!(order_id = %id, reason = %reason, "order rejected by venue");
                if let Err(e) = self.orders.mark_rejected(&id, ts) {
                    error!(order_id = %id, error = %e, "reject bookkeeping failed");
                }
                self.record_order_event(&id, ts);
                None
            }
        }
    }

    async fn cancel_order(&mut self, id: &OrderId, ts: EventTime) {
        if self.adapter.cancel(id).await.is_err() {
            // Fills for it are already on their way; they will be applied.
            debug!(order_id = %id, "cancel raced a fill at the venue");
            return;
        }
        match self.orders.request_cancel(id, ts) {
            Ok(_) => self.record_order_event(id, ts),
            Err(e) => error!(order_id = %id, error = %e, "cancel bookkeeping failed"),
        }
    }

    async fn on_fill(&mut self, fill: Fill) {
        let outcome = match self.orders.apply_fill(&fill) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(order_id = %fill.order_id, error = %e, "fill rejected");
                return;
            }
        };
        let FillOutcome::Applied {
            state,
            realized_pnl,
        } = outcome
        else {
            return;
        };
        self.fills_applied += 1;

        let instrument = self
            .orders
            .get(&fill.order_id)
            .map(|o| o.instrument.clone())
            .unwrap_or_default();
        self.record(SessionRecord::Fill {
            order_id: fill.order_id.clone(),
            fill_id: fill.fill_id.clone(),
            instrument,
            price: fill.price,
            quantity: fill.quantity,
            fees: fill.fees,
            ts: fill.ts,
        });
        debug!(order_id = %fill.order_id, state = %state, "fill applied");

        self.risk_state.record_pnl(realized_pnl - fill.fees);
        self.risk_state.open_position_count = self.orders.positions().open_count();

        if self.open_spread.is_some() && self.spread_flat() {
            self.open_spread = None;
            self.exit_in_flight = false;
            info!(pair = %self.series.pair(), "spread position closed");
        }
        if self.unwind_orders.contains(&fill.order_id) {
            self.offset_unwound_leg(&fill.order_id, fill.ts).await;
        }
        self.check_breaches(fill.ts);
    }

    /// Flatten an entry leg whose partner was refused. Runs once the leg is
    /// terminal, so a single offsetting order covers every fill it received.
    async fn offset_unwound_leg(&mut self, id: &OrderId, ts: EventTime) {
        let intent = {
            let Some(order) = self.orders.get(id) else {
                self.unwind_orders.remove(id);
                return;
            };
            if !order.is_terminal() {
                return;
            }
            OrderIntent {
                instrument: order.instrument.clone(),
                side: order.side.opposite(),
                quantity: order.filled_qty,
                order_type: OrderType::Market,
                limit_price: None,
                signal_ref: order.signal_ref.clone(),
            }
        };
        self.unwind_orders.remove(id);
        if intent.quantity.is_zero() {
            return;
        }
        warn!(
            order_id = %id,
            instrument = %intent.instrument,
            quantity = %intent.quantity,
            "offsetting orphaned entry leg"
        );
        // Offsets reduce risk; like exits, they are not gated.
        self.submit_order(intent, ts).await;
    }

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer.kind {
            TimerKind::MarkToMarket => {
                for instrument in [
                    self.series.leg1_instrument().to_string(),
                    self.series.leg2_instrument().to_string(),
                ] {
                    let Some(mid) = self.last_mid.get(&instrument).copied() else {
                        continue;
                    };
                    if let Some(position) = self.orders.positions_mut().get_mut(&instrument) {
                        position.mark(mid);
                    }
                }
                self.risk_state.portfolio_correlation = self.series.correlation();
                self.check_breaches(timer.ts);
            }
        }
    }

    fn on_breach(&mut self, breach: RiskBreachEvent) {
        self.halted = true;
        warn!(kind = %breach.kind, "risk breach, new entries halted");
        self.record(SessionRecord::RiskBreach {
            kind: breach.kind,
            daily_pnl: self.risk_state.daily_realized_pnl,
            drawdown: self.risk_state.drawdown(),
            ts: breach.ts,
        });
    }

    /// Emit at most one breach event per session; the gate keeps rejecting
    /// entries regardless.
    fn check_breaches(&mut self, ts: EventTime) {
        if self.breach_emitted {
            return;
        }
        let kind = if self.risk_state.daily_loss_breached(self.gate.limits()) {
            Some(BreachKind::DailyLoss)
        } else if self.risk_state.drawdown_breached(self.gate.limits()) {
            Some(BreachKind::Drawdown)
        } else {
            None
        };
        if let Some(kind) = kind {
            self.breach_emitted = true;
            self.queue.push(Event::RiskBreach(RiskBreachEvent { ts, kind }));
        }
    }

    fn spread_flat(&self) -> bool {
        let legs = [self.series.leg1_instrument(), self.series.leg2_instrument()];
        let positions_flat = legs
            .iter()
            .all(|leg| self.orders.positions().get(leg).map_or(true, |p| p.is_flat()));
        let no_open_orders = !self
            .orders
            .open_orders()
            .any(|o| legs.contains(&o.instrument.as_str()));
        positions_flat && no_open_orders
    }

    /// Drain in-flight orders: request cancels, apply whatever fills arrive
    /// within the timeout, then force a local terminal state on the rest.
    /// No order leaves the session without a terminal status.
    async fn shutdown(&mut self) {
        let open: Vec<OrderId> = self.orders.open_orders().map(|o| o.id.clone()).collect();
        if open.is_empty() {
            return;
        }
        info!(count = open.len(), "draining in-flight orders");
        for id in &open {
            if self.adapter.cancel(id).await.is_err() {
                debug!(order_id = %id, "order already terminal at venue");
            }
        }

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            while let Ok(event) = self.fill_rx.try_recv() {
                self.queue.push(event);
            }
            if let Some(event) = self.queue.pop() {
                self.dispatch(event).await;
                continue;
            }
            if self.orders.open_orders().next().is_none() {
                return;
            }
            let incoming = {
                let fill_rx = &mut self.fill_rx;
                tokio::select! {
                    maybe = fill_rx.recv() => maybe,
                    () = tokio::time::sleep_until(deadline) => None,
                }
            };
            match incoming {
                Some(event) => self.queue.push(event),
                None => break,
            }
        }

        let leftover: Vec<OrderId> = self.orders.open_orders().map(|o| o.id.clone()).collect();
        for id in leftover {
            warn!(order_id = %id, "drain timeout, forcing local cancel");
            let ts = self.last_ts;
            if self.orders.request_cancel(&id, ts).is_ok() {
                self.record_order_event(&id, ts);
            }
        }
    }

    fn record_order_event(&mut self, id: &OrderId, ts: EventTime) {
        let Some(order) = self.orders.get(id) else {
            return;
        };
        let record = SessionRecord::OrderEvent {
            order_id: order.id.clone(),
            instrument: order.instrument.clone(),
            state: order.state,
            ts,
        };
        self.record(record);
    }

    /// Fire-and-forget: a full telemetry buffer drops the record rather
    /// than stalling the event loop.
    fn record(&self, record: SessionRecord) {
        if let Err(e) = self.records.try_send(record) {
            debug!(error = %e, "telemetry record dropped");
        }
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            ticks_processed: self.ticks_processed,
            ticks_dropped: self.ticks_dropped,
            bars_closed: self.bars_closed,
            orders_created: self.orders_created,
            fills_applied: self.fills_applied,
            risk_rejections: self.risk_rejections,
            realized_pnl: self.orders.positions().total_realized_pnl(),
            ending_equity: self.risk_state.equity,
            halted: self.halted,
        }
    }
}
