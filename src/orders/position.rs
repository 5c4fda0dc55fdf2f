//! Position accounting.
//!
//! Positions are mutated only by the order manager in response to fills.
//! Partial fills average into a single entry price (weighted-average
//! accounting, not FIFO); reducing fills realize P&L against that average.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::OrderSide;

/// Net position in one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument: String,
    /// Positive long, negative short.
    pub net_qty: Decimal,
    /// Weighted-average entry price of the open quantity. Zero when flat.
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    /// Last mark-to-market estimate; refreshed by timer events.
    pub unrealized_pnl: Decimal,
}

impl Position {
    #[must_use]
    pub fn flat(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            net_qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.net_qty.is_zero()
    }

    /// Apply an executed quantity at a price. Returns the realized P&L
    /// delta (zero when the fill only extends the position).
    pub fn apply_fill(&mut self, side: OrderSide, quantity: Decimal, price: Decimal) -> Decimal {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let old = self.net_qty;
        let new = old + signed;
        let old_long = old > Decimal::ZERO;

        let realized = if old.is_zero() || old_long == (signed > Decimal::ZERO) {
            // Opening or extending: fold into the weighted average.
            let total = old.abs() + quantity;
            if !total.is_zero() {
                self.avg_entry_price =
                    (self.avg_entry_price * old.abs() + price * quantity) / total;
            }
            Decimal::ZERO
        } else {
            // Reducing or crossing through flat.
            let closing_qty = quantity.min(old.abs());
            let direction = if old_long { Decimal::ONE } else { -Decimal::ONE };
            let pnl = (price - self.avg_entry_price) * closing_qty * direction;
            if new.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
            } else if old_long != (new > Decimal::ZERO) {
                // Crossed zero: the remainder is a fresh position at the
                // fill price.
                self.avg_entry_price = price;
            }
            pnl
        };

        self.net_qty = new;
        self.realized_pnl += realized;
        realized
    }

    /// Refresh the unrealized mark against a current price.
    pub fn mark(&mut self, price: Decimal) {
        self.unrealized_pnl = (price - self.avg_entry_price) * self.net_qty;
    }
}

/// All positions for the session, keyed by instrument.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fill, creating the position on first touch. Returns the
    /// realized P&L delta.
    pub fn apply_fill(
        &mut self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Decimal {
        self.positions
            .entry(instrument.to_string())
            .or_insert_with(|| Position::flat(instrument))
            .apply_fill(side, quantity, price)
    }

    #[must_use]
    pub fn get(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn get_mut(&mut self, instrument: &str) -> Option<&mut Position> {
        self.positions.get_mut(instrument)
    }

    /// Count of instruments with a non-zero net quantity.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.positions.values().filter(|p| !p.is_flat()).count() as u32
    }

    #[must_use]
    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    #[must_use]
    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}
