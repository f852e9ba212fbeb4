//! Engine configuration model.
//!
//! One canonical `Config` shape covering the engine, persistence, logging,
//! saga, memory, and signal sub-systems. Loaded by the infrastructure
//! config loader with yaml + environment layering.

use serde::{Deserialize, Serialize};

use super::lane::LaneConfig;
use super::saga::CompensationRetryConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub saga: SagaConfig,
    pub memory: MemoryConfig,
    pub signals: SignalConfig,
    /// Lanes registered at startup, in addition to the default lane.
    pub lanes: Vec<LaneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lane used by tasks that do not name one.
    pub default_lane: String,
    /// Queue depth of the default lane.
    pub default_lane_capacity: usize,
    /// Worker pool size of the default lane.
    pub default_lane_concurrency: usize,
    /// Grace period for shutdown before in-flight workflows are abandoned.
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_lane: "default".into(),
            default_lane_capacity: 64,
            default_lane_concurrency: 4,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".cascade/cascade.db".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
    /// When set, logs also roll daily into this directory.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Flush every WAL append when true; batch asynchronously otherwise.
    pub wal_sync: bool,
    /// Bounded buffer size for async WAL appends.
    pub wal_buffer: usize,
    /// WAL entries older than this are purged by the cleanup loop.
    pub wal_retention_secs: u64,
    pub wal_cleanup_interval_secs: u64,
    pub compensation: CompensationRetryConfig,
    /// Default per-step timeout in milliseconds; zero means unbounded.
    pub step_timeout_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            wal_sync: true,
            wal_buffer: 256,
            wal_retention_secs: 24 * 3600,
            wal_cleanup_interval_secs: 600,
            compensation: CompensationRetryConfig::default(),
            step_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// L1 LRU capacity in entries.
    pub l1_capacity: usize,
    /// Fixed vector dimension enforced by the vector index.
    pub vector_dimension: usize,
    pub decay_interval_secs: u64,
    /// Entries whose decayed strength falls below this are forgotten.
    pub forget_threshold: f64,
    /// Stability (hours) assigned to freshly memorized entries.
    pub default_stability_hours: f64,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    /// RRF fusion weights.
    pub weight_vector: f64,
    pub weight_bm25: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1024,
            vector_dimension: 384,
            decay_interval_secs: 3600,
            forget_threshold: 0.05,
            default_stability_hours: 24.0,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            weight_vector: 1.0,
            weight_bm25: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Buffered depth of each per-task signal channel.
    pub buffer_depth: usize,
    /// Topic prefix for the broker-backed transport.
    pub channel_prefix: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            buffer_depth: 16,
            channel_prefix: "cascade.signals.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.default_lane, "default");
        assert!(config.saga.wal_sync);
        assert_eq!(config.memory.vector_dimension, 384);
        assert!(config.lanes.is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.engine.default_lane_concurrency, 4);
        assert_eq!(back.signals.channel_prefix, "cascade.signals.");
    }
}
