//! ReplayLab CLI: replay and synthetic-data commands.
//!
//! Commands:
//! - `replay`: run a replay from a TOML config and print the report
//! - `synthetic`: write seeded random-walk bar files plus a ready-to-run config
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use replaylab_core::bus::EventBus;
use replaylab_core::source::FeedMode;
use replaylab_core::synthetic::{bars_for, SyntheticConfig};
use replaylab_runner::{
    run_replay_on, write_bars_csv, ReplayConfig, ReplayReport, SourceConfig, SourceKind,
};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "replaylab",
    about = "ReplayLab CLI: chronological multi-source market replay"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replay from a TOML config file.
    Replay {
        /// Path to the replay config.
        #[arg(long)]
        config: PathBuf,

        /// Print the full report as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Write every bus event as one JSON line to this file.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Generate synthetic bar files and a matching replay config.
    Synthetic {
        /// Symbols to generate (e.g., IBM AAPL).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bars per symbol.
        #[arg(long, default_value_t = 390)]
        bars: usize,

        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Seconds between bars.
        #[arg(long, default_value_t = 60)]
        interval_secs: i64,

        /// First bar time (RFC 3339). Defaults to 2024-01-02T14:30:00Z.
        #[arg(long)]
        start: Option<String>,

        /// Feed synthetic sources through producer threads.
        #[arg(long, default_value_t = false)]
        async_sources: bool,

        /// Output directory for CSV files and replay.toml.
        #[arg(long, default_value = "synthetic")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            json,
            events,
        } => run_replay_cmd(&config, json, events.as_deref()),
        Commands::Synthetic {
            symbols,
            bars,
            seed,
            interval_secs,
            start,
            async_sources,
            out_dir,
        } => run_synthetic(
            &symbols,
            bars,
            seed,
            interval_secs,
            start.as_deref(),
            async_sources,
            &out_dir,
        ),
    }
}

fn run_replay_cmd(config_path: &Path, json: bool, events: Option<&Path>) -> Result<()> {
    let config = ReplayConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let bus = EventBus::new();
    let sink = match events {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating event log {}", path.display()))?;
            let writer = Arc::new(Mutex::new(BufWriter::new(file)));
            let log = Arc::clone(&writer);
            bus.subscribe(move |event| {
                let mut out = log.lock();
                let written = serde_json::to_writer(&mut *out, event)
                    .map_err(std::io::Error::from)
                    .and_then(|()| out.write_all(b"\n"));
                if let Err(e) = written {
                    warn!(kind = event.kind(), error = %e, "event not logged");
                }
            });
            Some(writer)
        }
        None => None,
    };

    let report = run_replay_on(&config, &bus)?;

    if let Some(writer) = sink {
        writer.lock().flush().context("flushing event log")?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &ReplayReport) {
    println!();
    println!("=== Replay ===");
    match (report.first_timestamp, report.last_timestamp) {
        (Some(first), Some(last)) => println!("Window:      {first} .. {last}"),
        _ => println!("Window:      (no data)"),
    }
    println!("Snapshots:   {}", report.snapshots);
    println!("Rows:        {}", report.stats.rows_emitted);
    println!("Stale rows:  {}", report.stats.stale_rows_dropped);
    println!("Fingerprint: {}", report.fingerprint);
    for fault in &report.stats.faults {
        println!("Fault:       {} ({})", fault.source, fault.reason);
    }
    println!();
    println!("=== Orders ===");
    println!(
        "Fulfilled: {}  Rejected: {}  Pending: {}  Unsubmitted: {}",
        report.fulfilled.len(),
        report.rejected.len(),
        report.pending.len(),
        report.unsubmitted
    );
    for order in &report.fulfilled {
        println!(
            "  {:<8} {:?} {:>10.2} @ {:>10.4}  ({} fills)",
            order.symbol(),
            order.side(),
            order.filled_quantity(),
            order.weighted_avg_price(),
            order.fills().len()
        );
    }
    for rejection in &report.rejected {
        println!("  rejected {}: {}", rejection.uid, rejection.reason);
    }
    println!();
    println!("=== Portfolio ===");
    println!("Initial capital: {:.2}", report.initial_capital);
    println!("Final capital:   {:.2}", report.final_capital);
    println!("Total value:     {:.2}", report.total_value);
    for (symbol, quantity) in &report.positions {
        println!("  {symbol:<8} {quantity:>12.2}");
    }
}

fn run_synthetic(
    symbols: &[String],
    bars: usize,
    seed: u64,
    interval_secs: i64,
    start: Option<&str>,
    async_sources: bool,
    out_dir: &Path,
) -> Result<()> {
    if interval_secs <= 0 {
        bail!("--interval-secs must be positive");
    }
    let start = match start {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --start '{s}'"))?
            .with_timezone(&Utc),
        None => "2024-01-02T14:30:00Z".parse::<DateTime<Utc>>()?,
    };

    let mut synthetic = SyntheticConfig::new(seed, start);
    synthetic.bars = bars;
    synthetic.interval_secs = interval_secs;

    let mode = if async_sources {
        FeedMode::Async
    } else {
        FeedMode::Sync
    };
    let config = synthetic_config(symbols, mode)?;
    for source in &config.sources {
        write_bars_csv(&out_dir.join(&source.path), &bars_for(&synthetic, &source.name))?;
    }

    let config_path = out_dir.join("replay.toml");
    std::fs::write(&config_path, toml::to_string_pretty(&config)?)
        .with_context(|| format!("writing {}", config_path.display()))?;

    info!(symbols = config.sources.len(), bars, seed, dir = %out_dir.display(), "synthetic data written");
    println!("Config written to: {}", config_path.display());
    Ok(())
}

/// One bars source per distinct symbol, in first-seen order.
fn synthetic_config(symbols: &[String], mode: FeedMode) -> Result<ReplayConfig> {
    let mut seen = BTreeSet::new();
    let sources = symbols
        .iter()
        .filter(|symbol| seen.insert(symbol.as_str()))
        .map(|symbol| SourceConfig {
            name: symbol.clone(),
            path: PathBuf::from(format!("{symbol}.csv")),
            kind: SourceKind::Bars,
            mode,
            minibatch: 0,
        })
        .collect();

    let config = ReplayConfig {
        initial_capital: 100_000.0,
        sources,
        orders: Vec::new(),
    };
    config.validate().context("synthetic config")?;
    Ok(config)
}
