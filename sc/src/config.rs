//! shardcoord configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;

const LOCAL_CONFIG: &str = ".shardcoord.yml";

/// Main shardcoord configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator tuning shared by every process
    pub coordinator: CoordinatorConfig,

    /// Shape of the in-memory deployment the CLI drives
    pub simulation: SimulationConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Any failure yields `None`; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// Project-local file first, then the user config directory
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("shardcoord").join("shardcoord.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Simulated deployment driven by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of cluster processes
    pub clusters: u32,

    #[serde(rename = "shards-per-cluster")]
    pub shards_per_cluster: u32,

    #[serde(rename = "guilds-per-shard")]
    pub guilds_per_shard: u32,

    /// Period of the StatsUpdate publisher in milliseconds
    #[serde(rename = "stats-interval-ms")]
    pub stats_interval_ms: u64,

    /// Processes whose reload hooks fail
    #[serde(rename = "failing-reloads")]
    pub failing_reloads: Vec<u32>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clusters: 3,
            shards_per_cluster: 2,
            guilds_per_shard: 4,
            stats_interval_ms: 5_000,
            failing_reloads: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Shard count across every process, saturating on overflow
    ///
    /// `validate` rejects shapes where this would saturate.
    pub fn total_shards(&self) -> u32 {
        self.clusters.saturating_mul(self.shards_per_cluster)
    }

    /// Reject shapes the simulation cannot build
    pub fn validate(&self) -> Result<()> {
        if self.clusters == 0 {
            return Err(eyre::eyre!("At least one cluster process is required"));
        }
        if self.shards_per_cluster == 0 {
            return Err(eyre::eyre!("shards-per-cluster must be at least 1"));
        }
        if self.stats_interval_ms == 0 {
            return Err(eyre::eyre!("stats-interval-ms must be at least 1"));
        }
        let total_shards = self.clusters.checked_mul(self.shards_per_cluster).ok_or_else(|| {
            eyre::eyre!(
                "{} clusters of {} shards overflow the shard count",
                self.clusters,
                self.shards_per_cluster
            )
        })?;
        // Largest generated guild ID is ((guilds-per-shard + 1) * total) << 22
        let fits = (u64::from(self.guilds_per_shard) + 1)
            .checked_mul(u64::from(total_shards))
            .is_some_and(|top| top < 1 << (64 - 22));
        if !fits {
            return Err(eyre::eyre!(
                "{} guilds per shard over {} shards overflow the guild ID space",
                self.guilds_per_shard,
                total_shards
            ));
        }
        Ok(())
    }
}
