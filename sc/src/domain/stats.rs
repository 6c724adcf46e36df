//! Cluster statistics types
//!
//! `ClusterStats` is produced locally by each process. `GlobalStats` is the
//! deployment-wide snapshot a designated publisher broadcasts periodically.

use serde::{Deserialize, Serialize};

use super::id::{ProcessId, ShardId};

/// Snapshot of one cluster process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub process_id: ProcessId,
    pub shard_count: u32,
    /// Guilds cached by this process
    pub guild_count: u64,
    /// Resident memory in MB
    pub ram_usage_mb: f64,
    pub voice_connection_count: u32,
    pub uptime_ms: u64,
    /// Guilds owned by this process's shards
    pub exclusive_guild_count: u64,
    /// Guilds with 250+ members
    pub large_guild_count: u64,
    /// Shards owned by this process (empty when unknown)
    #[serde(default)]
    pub shard_ids: Vec<ShardId>,
}

impl ClusterStats {
    /// Whether this process reports any guilds at all
    pub fn has_guilds(&self) -> bool {
        self.guild_count >= 1
    }

    pub fn owns_shard(&self, shard_id: ShardId) -> bool {
        self.shard_ids.contains(&shard_id)
    }
}

/// Gateway connection state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Resuming,
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShardStatus::Disconnected => "disconnected",
            ShardStatus::Connecting => "connecting",
            ShardStatus::Handshaking => "handshaking",
            ShardStatus::Ready => "ready",
            ShardStatus::Resuming => "resuming",
        };
        write!(f, "{}", s)
    }
}

/// Per-shard detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardInfo {
    pub id: ShardId,
    pub status: ShardStatus,
    pub latency_ms: u64,
    pub guild_count: u64,
    pub voice_connections: u32,
}

/// Payload of a ShardStats response: the process summary plus its shards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatsReport {
    pub stats: ClusterStats,
    pub shards: Vec<ShardInfo>,
}

/// Deployment-wide snapshot carried by a StatsUpdate broadcast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_shards: u32,
    pub guild_count: u64,
    pub user_count: u64,
    pub ram_usage_mb: f64,
    pub voice_connection_count: u32,
    pub clusters: Vec<ClusterStats>,
}

impl GlobalStats {
    /// Aggregate per-process stats into a global snapshot
    pub fn from_clusters(clusters: Vec<ClusterStats>, user_count: u64) -> Self {
        Self {
            total_shards: clusters.iter().map(|c| c.shard_count).sum(),
            guild_count: clusters.iter().map(|c| c.guild_count).sum(),
            user_count,
            ram_usage_mb: clusters.iter().map(|c| c.ram_usage_mb).sum(),
            voice_connection_count: clusters.iter().map(|c| c.voice_connection_count).sum(),
            clusters,
        }
    }

    pub fn process_count(&self) -> usize {
        self.clusters.len()
    }

    /// Processes that report zero guilds and are not expected to answer
    pub fn idle_process_count(&self) -> usize {
        self.clusters.iter().filter(|c| !c.has_guilds()).count()
    }

    /// Process that owns the given shard, if any process lists it
    pub fn owner_of_shard(&self, shard_id: ShardId) -> Option<ProcessId> {
        self.clusters
            .iter()
            .find(|c| c.owns_shard(shard_id))
            .map(|c| c.process_id)
    }
}
