//! Configuration management for Spout.
//!
//! Configuration is loaded from a YAML file (or built in code by the
//! embedding process), with sensible defaults for every section and
//! validation before use. Durations use humantime syntax (`500ms`, `1m`).

use crate::core::{Result, SpoutError};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// Complete configuration for the nozzle, rollups, store, and exposition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Ingestion and batching configuration.
    pub nozzle: NozzleConfig,
    /// Timer rollup configuration.
    pub rollup: RollupConfig,
    /// Metric store configuration.
    pub store: StoreConfig,
    /// HTTP exposition endpoint configuration.
    pub exposition: ExpositionConfig,
}

/// Ingestion and batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NozzleConfig {
    /// Shard identity sent to the stream connector; readers sharing a
    /// shard id split the stream between them.
    pub shard_id: String,
    /// Deployment allow-list. Empty allows every deployment.
    pub deployments: Vec<String>,
    /// Metric-category allow-list (vocabulary names). Empty allows all;
    /// listing any category switches to deny-by-default.
    pub categories: Vec<String>,
    /// Capacity of the ingress envelope ring.
    pub ingress_capacity: usize,
    /// Capacity of the timer envelope ring.
    pub timer_capacity: usize,
    /// Capacity (in batches) of the point channel feeding insert workers.
    pub channel_capacity: usize,
    /// Number of store insert workers.
    pub insert_workers: usize,
    /// Batch flush interval.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Estimated-size threshold that flushes a batch early.
    pub max_batch_bytes: usize,
    /// Timer name identifying HTTP ingress traffic eligible for rollup.
    pub http_timer_name: String,
    /// Ask the connector to prefer platform tags over legacy ones.
    pub use_preferred_tags: bool,
}

impl Default for NozzleConfig {
    fn default() -> Self {
        Self {
            shard_id: "spout".to_string(),
            deployments: Vec::new(),
            categories: Vec::new(),
            ingress_capacity: 16_384,
            timer_capacity: 8_192,
            channel_capacity: 64,
            insert_workers: 4,
            flush_interval: Duration::from_millis(500),
            max_batch_bytes: 32 * 1024,
            http_timer_name: "http".to_string(),
            use_preferred_tags: true,
        }
    }
}

/// Which rollup aggregators are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupKind {
    /// Request-count rollup.
    Counter,
    /// Fixed-bucket duration histogram rollup.
    Histogram,
    /// Streaming-quantile duration summary rollup.
    Summary,
}

/// Timer rollup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    /// Emission interval for rolled-up points.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Ordered tag allow-list folded into the rollup key. Tags outside
    /// this list are invisible to the rollup.
    pub tags: Vec<String>,
    /// Active aggregators; omitted kinds run as no-ops.
    pub metrics: Vec<RollupKind>,
    /// Histogram bucket upper bounds in seconds.
    pub buckets: Vec<f64>,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            tags: vec![
                "app_id".to_string(),
                "index".to_string(),
                "status_code".to_string(),
            ],
            metrics: vec![RollupKind::Counter, RollupKind::Histogram],
            buckets: vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        }
    }
}

/// Metric store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Time-to-live stamped onto every inserted point.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Interval between background sweeps.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Size of the sweep worker pool.
    pub sweep_workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            sweep_workers: 4,
        }
    }
}

/// HTTP exposition endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionConfig {
    /// Bind address for the scrape endpoint.
    pub bind_address: IpAddr,
    /// Port for the scrape endpoint.
    pub port: u16,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9091,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.nozzle.ingress_capacity == 0 || self.nozzle.timer_capacity == 0 {
            return Err(SpoutError::config("buffer capacities must be greater than 0"));
        }
        if self.nozzle.channel_capacity == 0 {
            return Err(SpoutError::config("channel capacity must be greater than 0"));
        }
        if self.nozzle.insert_workers == 0 {
            return Err(SpoutError::config("at least one insert worker is required"));
        }
        if self.nozzle.max_batch_bytes == 0 {
            return Err(SpoutError::config("max batch bytes must be greater than 0"));
        }
        if self.nozzle.flush_interval.is_zero() {
            return Err(SpoutError::config("flush interval must be greater than 0"));
        }
        if self.rollup.interval.is_zero() {
            return Err(SpoutError::config("rollup interval must be greater than 0"));
        }
        if self.store.sweep_workers == 0 {
            return Err(SpoutError::config("at least one sweep worker is required"));
        }
        if self.store.ttl.is_zero() {
            return Err(SpoutError::config("store TTL must be greater than 0"));
        }
        let mut previous = f64::NEG_INFINITY;
        for bound in &self.rollup.buckets {
            if !bound.is_finite() || *bound <= previous {
                return Err(SpoutError::config(
                    "histogram buckets must be finite and strictly increasing",
                ));
            }
            previous = *bound;
        }
        // Fail fast on unknown category names instead of at stream setup.
        crate::core::CategoryFilter::from_names(&self.nozzle.categories)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.nozzle.ingress_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsorted_buckets_rejected() {
        let mut config = Config::default();
        config.rollup.buckets = vec![0.5, 0.1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut config = Config::default();
        config.nozzle.categories = vec!["not-a-category".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "nozzle:\n  shard_id: edge-1\n  flush_interval: 250ms\nstore:\n  ttl: 5m\nrollup:\n  metrics: [counter, summary]\n"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.nozzle.shard_id, "edge-1");
        assert_eq!(config.nozzle.flush_interval, Duration::from_millis(250));
        assert_eq!(config.store.ttl, Duration::from_secs(300));
        assert_eq!(config.rollup.metrics, vec![RollupKind::Counter, RollupKind::Summary]);
        // Unset sections keep their defaults.
        assert_eq!(config.exposition.port, 9091);
    }
}
