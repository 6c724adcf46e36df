//! Domain types for shardcoord
//!
//! Process and correlation identities, the statistics each cluster process
//! reports, guild cache entries, and reload directives.

mod guild;
mod id;
mod reload;
mod stats;

pub use guild::{Channel, ChannelKind, Guild, GuildSnapshot, LARGE_GUILD_THRESHOLD, Member, Role, shard_for_guild};
pub use id::{CorrelationId, GuildId, IdGenerator, ProcessId, ShardId};
pub use reload::{ReloadDirective, ReloadTarget};
pub use stats::{ClusterStats, GlobalStats, ShardInfo, ShardStatsReport, ShardStatus};
