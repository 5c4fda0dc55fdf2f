//! Invariant checks over generated inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;

use pairflow::data::{RollingWindow, Tick};
use pairflow::events::{Event, EventQueue, EventTime};
use pairflow::orders::Position;
use pairflow::types::OrderSide;

proptest! {
    /// A rolling window never holds more than its capacity and always keeps
    /// the most recent values.
    #[test]
    fn rolling_window_bounded(capacity in 1usize..64, values in prop::collection::vec(any::<i64>(), 0..256)) {
        let mut window = RollingWindow::new(capacity);
        for &v in &values {
            window.push(v);
        }
        prop_assert!(window.len() <= capacity);
        prop_assert_eq!(window.len(), values.len().min(capacity));

        let expected_tail: Vec<i64> = values
            .iter()
            .copied()
            .skip(values.len().saturating_sub(capacity))
            .collect();
        let actual: Vec<i64> = window.iter().copied().collect();
        prop_assert_eq!(actual, expected_tail);
    }

    /// Net quantity always equals the signed sum of applied fill quantities,
    /// whatever order the fills arrive in.
    #[test]
    fn position_net_qty_is_signed_fill_sum(
        fills in prop::collection::vec((any::<bool>(), 1u32..1_000, 1u32..200_000), 1..40)
    ) {
        let mut position = Position::flat("EURUSD");
        let mut expected = Decimal::ZERO;
        for (buy, qty, price_ticks) in fills {
            let side = if buy { OrderSide::Buy } else { OrderSide::Sell };
            let qty = Decimal::from(qty);
            // Price grid of 0.00001 steps keeps values realistic.
            let price = Decimal::new(i64::from(price_ticks), 5);
            position.apply_fill(side, qty, price);
            expected += if buy { qty } else { -qty };
        }
        prop_assert_eq!(position.net_qty, expected);
        if position.net_qty.is_zero() {
            prop_assert_eq!(position.avg_entry_price, Decimal::ZERO);
        }
    }

    /// The event queue dispatches in non-decreasing timestamp order for any
    /// insertion order.
    #[test]
    fn event_queue_pops_in_timestamp_order(timestamps in prop::collection::vec(0i64..1_000_000, 1..128)) {
        let mut queue = EventQueue::new();
        for &ts in &timestamps {
            queue.push(Event::Tick(Tick {
                instrument: "EURUSD".to_string(),
                bid: Decimal::new(10998, 4),
                ask: Decimal::new(11002, 4),
                ts: EventTime::from_micros(ts),
            }));
        }

        let mut last = i64::MIN;
        let mut popped = 0;
        while let Some(event) = queue.pop() {
            let ts = event.ts().as_micros();
            prop_assert!(ts >= last, "queue went backwards: {} after {}", ts, last);
            last = ts;
            popped += 1;
        }
        prop_assert_eq!(popped, timestamps.len());
    }
}
