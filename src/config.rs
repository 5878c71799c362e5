//! Configuration file support for the node core.
//!
//! Loads optional `weave.toml` from the data directory. Callers override
//! individual fields programmatically. If no config file exists, defaults
//! are used.

use serde::Deserialize;
use std::path::Path;

use crate::constants;
use crate::types::Amount;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub elections: ElectionsConfig,
    pub bootstrap: BootstrapConfig,
    pub confirming_set: ConfirmingSetConfig,
    pub block_processor: BlockProcessorConfig,
    pub online_weight: OnlineWeightConfig,
}

/// Active-elections section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ElectionsConfig {
    /// Bound on concurrently active elections
    pub active_elections_size: usize,
    /// Interval between confirmation-request rounds, milliseconds
    pub request_interval_ms: u64,
    /// Smallest send considered worth receiving automatically
    pub receive_minimum: Amount,
}

impl Default for ElectionsConfig {
    fn default() -> Self {
        ElectionsConfig {
            active_elections_size: 5000,
            request_interval_ms: 500,
            receive_minimum: constants::XRB_RATIO,
        }
    }
}

/// Ascending-bootstrap section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Request-loop worker threads
    pub threads: usize,
    /// Concurrent in-flight pull requests at most
    pub requests_max: usize,
    /// Pull reply wait before a tag is evicted, milliseconds
    pub timeout_ms: u64,
    /// Cap on the priority set
    pub priorities_max: usize,
    /// Accounts sampled per weighted selection
    pub consideration_count: usize,
    /// Blocks requested per pull
    pub pull_count: u8,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            threads: 2,
            requests_max: 16,
            timeout_ms: 5000,
            priorities_max: constants::BOOTSTRAP_PRIORITIES_MAX,
            consideration_count: constants::BOOTSTRAP_CONSIDERATION_COUNT,
            pull_count: constants::BOOTSTRAP_PULL_COUNT,
        }
    }
}

/// Cementation worker section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConfirmingSetConfig {
    /// Budget for one write transaction over the back buffer, milliseconds
    pub batch_time_ms: u64,
}

impl Default for ConfirmingSetConfig {
    fn default() -> Self {
        ConfirmingSetConfig { batch_time_ms: 500 }
    }
}

/// Block-processor section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BlockProcessorConfig {
    /// Queue bound; admission beyond it drops non-local blocks
    pub max_queue: usize,
    /// Blocks applied under one write transaction at most
    pub batch_max: usize,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        BlockProcessorConfig {
            max_queue: 8192,
            batch_max: 256,
        }
    }
}

/// Quorum section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OnlineWeightConfig {
    /// Floor on the weight used for quorum computation
    pub minimum: Amount,
    /// Fraction of online weight required for quorum, percent
    pub quorum_percent: u8,
}

impl Default for OnlineWeightConfig {
    fn default() -> Self {
        OnlineWeightConfig {
            minimum: 60_000 * constants::GXRB_RATIO,
            quorum_percent: constants::QUORUM_PERCENT,
        }
    }
}

impl NodeConfig {
    /// Load configuration from `weave.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("weave.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    NodeConfig::default()
                }
            },
            Err(_) => NodeConfig::default(),
        }
    }

    /// Defaults sized for tests: no quorum floor, so observed weight alone
    /// decides elections.
    pub fn dev() -> Self {
        let mut config = NodeConfig::default();
        config.online_weight.minimum = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = NodeConfig::default();
        assert_eq!(config.bootstrap.threads, 2);
        assert_eq!(config.bootstrap.pull_count, 128);
        assert_eq!(config.confirming_set.batch_time_ms, 500);
        assert!(config.elections.active_elections_size > 0);
    }

    #[test]
    fn parse_partial_toml() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            [elections]
            active_elections_size = 2

            [bootstrap]
            requests_max = 4
            "#,
        )
        .expect("config parses");
        assert_eq!(parsed.elections.active_elections_size, 2);
        assert_eq!(parsed.bootstrap.requests_max, 4);
        // untouched sections keep defaults
        assert_eq!(parsed.confirming_set.batch_time_ms, 500);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = NodeConfig::load(dir.path());
        assert_eq!(config.block_processor.batch_max, 256);
    }
}
