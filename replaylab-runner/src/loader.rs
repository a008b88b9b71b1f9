//! CSV loading for replay sources, and the bar writer used by `synthetic`.
//!
//! Files carry a header row whose column names match the record fields:
//! - bars: `symbol,timestamp,open,high,low,close,period_volume,total_volume,trade_count`
//! - ticks: `symbol,timestamp,tick_id,last,last_size,bid,bid_size,ask,ask_size,most_recent_trade,most_recent_trade_size`
//!
//! Timestamps are RFC 3339. An empty `tick_id` marks a quote update.

use crate::config::SourceKind;
use replaylab_core::domain::{BarRecord, Batch, MarketRecord, TickRecord, Timestamped};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{path}' row {row}: {reason}")]
    Invalid {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load one source file as a single ascending batch.
///
/// Rows out of time order are stably re-sorted, so rows sharing a timestamp
/// keep their file order.
pub fn load_batch(path: &Path, kind: SourceKind) -> Result<Batch<MarketRecord>, LoadError> {
    let mut rows: Batch<MarketRecord> = match kind {
        SourceKind::Bars => {
            let bars: Vec<BarRecord> = read_rows(path)?;
            for (i, bar) in bars.iter().enumerate() {
                if !bar.is_sane() {
                    return Err(LoadError::Invalid {
                        path: path.to_path_buf(),
                        row: i + 1,
                        reason: format!("inconsistent OHLC/volume for {}", bar.symbol),
                    });
                }
            }
            bars.into_iter().map(MarketRecord::Bar).collect()
        }
        SourceKind::Ticks => {
            let ticks: Vec<TickRecord> = read_rows(path)?;
            ticks.into_iter().map(MarketRecord::Tick).collect()
        }
    };

    if !rows.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()) {
        debug!(path = %path.display(), "rows out of order, sorting");
        rows.sort_by_key(|r| r.timestamp());
    }
    debug!(path = %path.display(), rows = rows.len(), ?kind, "source loaded");
    Ok(rows)
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LoadError> {
    let csv_err = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(csv_err)
}

/// Write bars with a header row, creating parent directories.
pub fn write_bars_csv(path: &Path, bars: &[BarRecord]) -> Result<(), LoadError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let csv_err = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for bar in bars {
        writer.serialize(bar).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}
