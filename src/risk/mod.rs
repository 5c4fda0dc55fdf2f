//! Pre-trade risk controls.
//!
//! Limits are immutable for the session; the engine keeps [`RiskState`]
//! current from fills and the [`RiskGate`] decides order intents against
//! both. Checks run in a fixed priority order so a rejection reason is
//! deterministic for a given state.

pub mod gate;
pub mod limits;

pub use gate::{RiskDecision, RiskGate, RiskRejection, RiskState};
pub use limits::{LimitsError, RiskLimits};
