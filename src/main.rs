//! Backtest demo: replay a seeded synthetic tick feed through the engine
//! and print the session report.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pairflow::config::{ExecutionMode, SessionConfig};
use pairflow::data::Tick;
use pairflow::engine::Engine;
use pairflow::events::EventTime;
use pairflow::execution::{SimulatedAdapter, SimulatedAdapterConfig};
use pairflow::telemetry::{spawn_sink, JsonlSink, RecordSink, TracingSink};

#[derive(Debug, Parser)]
#[command(name = "pairflow", about = "Pairs-trading strategy engine")]
struct Cli {
    /// Path to the session TOML config.
    #[arg(long, default_value = "session.toml")]
    config: String,

    /// Number of synthetic ticks to generate per instrument.
    #[arg(long, default_value_t = 10_000)]
    ticks: u64,

    /// RNG seed; the same seed replays the same session.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Append session records to this JSONL file instead of tracing output.
    #[arg(long)]
    records: Option<String>,
}

/// Correlated random walk: leg 2 wanders, leg 1 tracks it through a fixed
/// ratio plus mean-reverting noise, so the pair periodically diverges and
/// snaps back.
fn synthetic_feed(
    config: &SessionConfig,
    ticks: u64,
    seed: u64,
    tx: mpsc::Sender<Tick>,
) -> tokio::task::JoinHandle<()> {
    let leg1 = config.pair.leg1.clone();
    let leg2 = config.pair.leg2.clone();
    // A quarter of the bar interval between ticks, so every bar sees data.
    let step_micros = (config.bar_interval_micros() / 4).max(1);

    tokio::spawn(async move {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut base: f64 = 1.25;
        let mut residual: f64 = 0.0;
        for i in 0..ticks {
            base += rng.gen_range(-1.0..1.0) * 0.0002;
            // Ornstein-Uhlenbeck style pullback keeps the residual bounded.
            residual = residual * 0.95 + rng.gen_range(-1.0..1.0) * 0.0003;
            let p2 = base;
            let p1 = 0.88 * base + residual;
            let ts = EventTime::from_micros(i as i64 * step_micros);

            for (instrument, mid) in [(&leg2, p2), (&leg1, p1)] {
                let Some(mid) = Decimal::from_f64(mid) else {
                    continue;
                };
                let half_spread = Decimal::new(1, 4); // 0.0001
                let tick = Tick {
                    instrument: instrument.clone(),
                    bid: mid - half_spread,
                    ask: mid + half_spread,
                    ts,
                };
                if tx.send(tick).await.is_err() {
                    return;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::load(&cli.config)?;
    if config.execution.mode == ExecutionMode::Live {
        return Err("live mode requires a broker adapter; this binary only backtests".into());
    }

    let (fills_tx, fill_rx) = mpsc::channel(1024);
    let adapter = SimulatedAdapter::new(
        SimulatedAdapterConfig {
            fee_bps: config.execution.fee_bps,
            latency_micros: config.execution.latency_micros,
            fill_splits: config.execution.fill_splits,
        },
        fills_tx,
    );
    let sink: Box<dyn RecordSink> = match &cli.records {
        Some(path) => Box::new(JsonlSink::create(path)?),
        None => Box::new(TracingSink),
    };
    let (records, sink_handle) = spawn_sink(sink, 1024);
    let engine = Engine::new(&config, Box::new(adapter), fill_rx, records)?;

    let (tick_tx, tick_rx) = mpsc::channel(1024);
    let feed = synthetic_feed(&config, cli.ticks, cli.seed, tick_tx);

    let report = engine.run(tick_rx).await;
    feed.await?;
    drop(sink_handle);

    info!(
        ticks = report.ticks_processed,
        dropped = report.ticks_dropped,
        bars = report.bars_closed,
        orders = report.orders_created,
        fills = report.fills_applied,
        risk_rejections = report.risk_rejections,
        realized_pnl = %report.realized_pnl,
        ending_equity = %report.ending_equity,
        halted = report.halted,
        "session report"
    );
    Ok(())
}
