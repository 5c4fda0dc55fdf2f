//! Market data ingestion: ticks, bars, and rolling series.

pub mod aggregator;
pub mod series;

pub use aggregator::{Bar, BarAggregator, StaleData, Tick};
pub use series::{PairSeries, RollingWindow};
