//! Pairflow: event-driven pairs-trading strategy execution.
//!
//! The crate is organized around a single deterministic event loop:
//! quotes stream in as ticks, aggregate into bars, feed a rolling pair
//! model, and come out the other side as risk-gated orders. Every decision
//! is a function of the strictly ordered event stream, so a backtest over
//! recorded ticks reproduces a live session's decisions exactly.
//!
//! - [`events`]: timestamps, the event envelope, and the merge queue.
//! - [`data`]: tick-to-bar aggregation and rolling pair state.
//! - [`math`]: OLS hedge ratio, z-score, correlation.
//! - [`strategy`]: signal generation over the pair state.
//! - [`risk`]: session limits and the pre-trade gate.
//! - [`orders`]: order lifecycle and position accounting.
//! - [`execution`]: venue adapters, simulated and live behind one trait.
//! - [`engine`]: the loop tying it all together.
//! - [`config`]: TOML session configuration.
//! - [`telemetry`]: structured session records.

pub mod config;
pub mod data;
pub mod engine;
pub mod events;
pub mod execution;
pub mod math;
pub mod orders;
pub mod risk;
pub mod strategy;
pub mod telemetry;
pub mod types;

pub use config::SessionConfig;
pub use engine::{Engine, SessionReport};
pub use events::{Event, EventTime};
