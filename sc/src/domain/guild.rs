//! Guild cache entries and their transport-safe snapshots

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::id::{GuildId, ShardId};

/// Member count at which a guild is considered large
pub const LARGE_GUILD_THRESHOLD: usize = 250;

/// Snowflake bits below the timestamp
const SNOWFLAKE_TIMESTAMP_SHIFT: u32 = 22;

/// Shard that owns a guild, using the gateway's sharding formula
pub fn shard_for_guild(guild_id: GuildId, total_shards: u32) -> Option<ShardId> {
    if total_shards == 0 {
        return None;
    }
    Some(((guild_id >> SNOWFLAKE_TIMESTAMP_SHIFT) % u64::from(total_shards)) as ShardId)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: u64,
    pub name: String,
    pub permissions: u64,
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
}

/// A guild as held in a process's in-memory cache
///
/// Members, roles and channels are indexed by ID. Use [`Guild::snapshot`]
/// before handing a guild to another process.
#[derive(Debug, Clone, PartialEq)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub owner_id: u64,
    pub shard_id: ShardId,
    pub members: HashMap<u64, Member>,
    pub roles: HashMap<u64, Role>,
    pub channels: HashMap<u64, Channel>,
}

impl Guild {
    pub fn new(id: GuildId, name: impl Into<String>, owner_id: u64, shard_id: ShardId) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id,
            shard_id,
            members: HashMap::new(),
            roles: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    pub fn add_member(&mut self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub fn add_role(&mut self, role: Role) {
        self.roles.insert(role.id, role);
    }

    pub fn add_channel(&mut self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn is_large(&self) -> bool {
        self.members.len() >= LARGE_GUILD_THRESHOLD
    }

    /// Clone into a transport-safe shape with every index flattened into a
    /// sequence ordered by ID
    pub fn snapshot(&self) -> GuildSnapshot {
        fn flatten<T: Clone>(map: &HashMap<u64, T>) -> Vec<T> {
            let mut entries: Vec<(&u64, &T)> = map.iter().collect();
            entries.sort_by_key(|(id, _)| **id);
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        }

        GuildSnapshot {
            id: self.id,
            name: self.name.clone(),
            owner_id: self.owner_id,
            shard_id: self.shard_id,
            large: self.is_large(),
            member_count: self.members.len(),
            members: flatten(&self.members),
            roles: flatten(&self.roles),
            channels: flatten(&self.channels),
        }
    }
}

/// Guild payload of a GuildFetch response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSnapshot {
    pub id: GuildId,
    pub name: String,
    pub owner_id: u64,
    pub shard_id: ShardId,
    pub large: bool,
    pub member_count: usize,
    pub members: Vec<Member>,
    pub roles: Vec<Role>,
    pub channels: Vec<Channel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> Member {
        Member {
            id,
            username: format!("user{}", id),
            nick: None,
            roles: vec![],
        }
    }

    #[test]
    fn test_shard_for_guild() {
        // Shard 3 of 4: (id >> 22) % 4 == 3
        let guild_id = (7u64 * 4 + 3) << 22;
        assert_eq!(shard_for_guild(guild_id, 4), Some(3));
        assert_eq!(shard_for_guild(guild_id, 1), Some(0));
        assert_eq!(shard_for_guild(guild_id, 0), None);
    }

    #[test]
    fn test_snapshot_flattens_in_id_order() {
        let mut guild = Guild::new(42, "memers", 1, 0);
        for id in [30, 10, 20] {
            guild.add_member(member(id));
        }
        guild.add_role(Role {
            id: 9,
            name: "mod".to_string(),
            permissions: 8,
            position: 2,
        });
        guild.add_role(Role {
            id: 42,
            name: "@everyone".to_string(),
            permissions: 0,
            position: 0,
        });
        guild.add_channel(Channel {
            id: 5,
            name: "general".to_string(),
            kind: ChannelKind::Text,
            position: 0,
        });

        let snapshot = guild.snapshot();
        let member_ids: Vec<u64> = snapshot.members.iter().map(|m| m.id).collect();
        assert_eq!(member_ids, vec![10, 20, 30]);
        assert_eq!(snapshot.roles[0].id, 9);
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(snapshot.member_count, 3);
        assert!(!snapshot.large);
    }

    #[test]
    fn test_large_guild_threshold() {
        let mut guild = Guild::new(1, "big", 1, 0);
        for id in 0..LARGE_GUILD_THRESHOLD as u64 {
            guild.add_member(member(id));
        }
        assert!(guild.is_large());
        assert!(guild.snapshot().large);
    }

    #[test]
    fn test_snapshot_serializes_plain_sequences() {
        let mut guild = Guild::new(7, "g", 1, 0);
        guild.add_member(member(1));
        let json = serde_json::to_value(guild.snapshot()).unwrap();
        assert!(json["members"].is_array());
        assert_eq!(json["memberCount"], 1);
        assert_eq!(json["ownerId"], 1);
    }
}
