//! Seeded synthetic bars for tests, benchmarks and demos.
//!
//! Each symbol gets its own `StdRng`, seeded from BLAKE3 over `(seed, symbol)`,
//! so a symbol's series does not depend on which other symbols are generated
//! or in what order.

use crate::domain::{Batch, BarRecord};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub interval_secs: i64,
    pub bars: usize,
    pub start_price: f64,
    /// Per-bar return standard deviation, as a fraction.
    pub volatility: f64,
    pub mean_volume: f64,
}

impl SyntheticConfig {
    pub fn new(seed: u64, start: DateTime<Utc>) -> Self {
        Self {
            seed,
            start,
            interval_secs: 60,
            bars: 390,
            start_price: 100.0,
            volatility: 0.002,
            mean_volume: 1_000.0,
        }
    }
}

/// Per-symbol seed, independent of generation order.
pub fn symbol_seed(seed: u64, symbol: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(symbol.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Random-walk bar series for one symbol, ascending at a fixed interval.
pub fn bars_for(config: &SyntheticConfig, symbol: &str) -> Batch<BarRecord> {
    let mut rng = StdRng::seed_from_u64(symbol_seed(config.seed, symbol));
    let mut price = config.start_price;
    let mut total_volume = 0.0;
    let mut out = Vec::with_capacity(config.bars);

    for i in 0..config.bars {
        let open = price;
        // Sum of four uniforms: a bell-shaped step in [-2, 2].
        let shock: f64 = (0..4).map(|_| rng.gen_range(-1.0..1.0)).sum::<f64>() * 0.5;
        let close = (open * (1.0 + config.volatility * shock)).max(0.01);
        let wiggle = open.max(close) * config.volatility * rng.gen_range(0.0..1.0);
        let high = open.max(close) + wiggle;
        let low = (open.min(close) - wiggle).max(0.01);
        let volume = (config.mean_volume * rng.gen_range(0.5..1.5)).round();
        total_volume += volume;

        out.push(BarRecord {
            symbol: symbol.to_string(),
            timestamp: config.start + Duration::seconds(config.interval_secs * i as i64),
            open,
            high,
            low,
            close,
            period_volume: volume,
            total_volume,
            trade_count: rng.gen_range(1..50),
        });
        price = close;
    }
    out
}

/// One series per symbol, merged into a single ascending batch.
pub fn merged_bars(config: &SyntheticConfig, symbols: &[&str]) -> Batch<BarRecord> {
    let mut all: Vec<BarRecord> = symbols.iter().flat_map(|s| bars_for(config, s)).collect();
    all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.symbol.cmp(&b.symbol)));
    all
}
