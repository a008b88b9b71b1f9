//! Serializable replay configuration.

use chrono::{DateTime, Utc};
use replaylab_core::domain::OrderSide;
use replaylab_core::source::FeedMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What a source file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Bars,
    Ticks,
}

/// One named input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// CSV file; relative paths resolve against the config file's directory.
    pub path: PathBuf,
    pub kind: SourceKind,
    /// `async` sources are fed from a producer thread through a blocking channel.
    #[serde(default = "default_mode")]
    pub mode: FeedMode,
    /// Rows per batch handed to the scheduler; 0 delivers the file as one batch.
    #[serde(default)]
    pub minibatch: usize,
}

fn default_mode() -> FeedMode {
    FeedMode::Sync
}

/// An order to submit during the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfig {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Submit once the replay clock reaches this time; absent means before
    /// the first snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_at: Option<DateTime<Utc>>,
}

/// Complete description of one replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub initial_capital: f64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<OrderConfig>,
}

impl ReplayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file and resolve its source paths.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Make relative source paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for source in &mut self.sources {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_capital.is_finite() || self.initial_capital < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "initial_capital must be a non-negative number, got {}",
                self.initial_capital
            )));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one [[sources]] entry is required".into()));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid("source name must not be empty".into()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        for (i, order) in self.orders.iter().enumerate() {
            if !order.quantity.is_finite() || order.quantity <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "orders[{i}]: quantity must be positive, got {}",
                    order.quantity
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
initial_capital = 100000.0

[[sources]]
name = "ibm_bars"
path = "data/IBM.csv"
kind = "bars"

[[sources]]
name = "ibm_ticks"
path = "/abs/ticks.csv"
kind = "ticks"
mode = "async"
minibatch = 50

[[orders]]
symbol = "IBM"
side = "buy"
quantity = 100

[[orders]]
symbol = "IBM"
side = "sell"
quantity = 40
submit_at = "2024-01-02T15:00:00Z"
"#;

    #[test]
    fn parses_sources_and_orders() {
        let config = ReplayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].mode, FeedMode::Sync);
        assert_eq!(config.sources[0].minibatch, 0);
        assert_eq!(config.sources[1].mode, FeedMode::Async);
        assert_eq!(config.sources[1].kind, SourceKind::Ticks);
        assert_eq!(config.orders[0].side, OrderSide::Buy);
        assert!(config.orders[0].submit_at.is_none());
        assert!(config.orders[1].submit_at.is_some());
    }

    #[test]
    fn resolves_relative_paths_only() {
        let mut config = ReplayConfig::from_toml_str(SAMPLE).unwrap();
        config.resolve_paths(Path::new("/runs/today"));
        assert_eq!(config.sources[0].path, PathBuf::from("/runs/today/data/IBM.csv"));
        assert_eq!(config.sources[1].path, PathBuf::from("/abs/ticks.csv"));
    }

    #[test]
    fn rejects_duplicate_sources() {
        let text = r#"
initial_capital = 1.0
[[sources]]
name = "a"
path = "a.csv"
kind = "bars"
[[sources]]
name = "a"
path = "b.csv"
kind = "bars"
"#;
        let err = ReplayConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate source name 'a'"));
    }

    #[test]
    fn rejects_missing_sources_and_bad_quantities() {
        assert!(matches!(
            ReplayConfig::from_toml_str("initial_capital = 10.0"),
            Err(ConfigError::Invalid(_))
        ));

        let text = r#"
initial_capital = 1.0
[[sources]]
name = "a"
path = "a.csv"
kind = "bars"
[[orders]]
symbol = "IBM"
side = "buy"
quantity = 0
"#;
        assert!(matches!(
            ReplayConfig::from_toml_str(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = ReplayConfig::from_toml_str(SAMPLE).unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(ReplayConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let text = r#"
initial_capital = 1.0
[[sources]]
name = "a"
path = "a.csv"
kind = "options"
"#;
        assert!(matches!(
            ReplayConfig::from_toml_str(text),
            Err(ConfigError::Parse(_))
        ));
    }
}
