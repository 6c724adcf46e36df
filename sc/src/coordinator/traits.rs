//! Local collaborators the router executes requests against

use serde_json::Value;

use crate::domain::{Guild, GuildId, ShardStatsReport};

/// This process's view of its own shards and guild cache
pub trait ClusterNode: Send + Sync {
    /// Summary of this process plus per-shard detail
    fn collect_shard_stats(&self) -> ShardStatsReport;

    /// Guild from the local cache, if this process holds it
    fn guild(&self, guild_id: GuildId) -> Option<Guild>;
}

/// Hot-reload hooks, one per reload target
///
/// Implementations may fail or panic; the router turns either into a
/// `false` reply.
pub trait Reloader: Send + Sync {
    fn reload_event_listener(&self, path: &str) -> eyre::Result<()>;

    fn reload_command(&self, path: &str) -> eyre::Result<()>;

    fn reload_module(&self, path: &str, name: Option<&str>, options: Option<&Value>) -> eyre::Result<()>;

    fn reload_utils(&self) -> eyre::Result<()>;

    fn reload_commands(&self) -> eyre::Result<()>;

    fn reload_structures(&self) -> eyre::Result<()>;

    fn reload_handlers(&self) -> eyre::Result<()>;

    /// Reload every registered event listener
    fn reload_all_event_listeners(&self) -> eyre::Result<()>;
}
