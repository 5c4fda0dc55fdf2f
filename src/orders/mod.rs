//! Order lifecycle and position accounting.
//!
//! The [`OrderManager`] owns every order from creation to terminal state;
//! other components refer to orders by id only.

pub mod manager;
pub mod position;
pub mod types;

pub use manager::{CancelOutcome, FillOutcome, OrderError, OrderIntent, OrderManager};
pub use position::{Position, PositionBook};
pub use types::{Fill, FillId, Order, OrderId, OrderState, OrderType};
