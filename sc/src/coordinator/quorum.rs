//! Process-wide stats cache and the quorum it implies

use tracing::debug;

use crate::domain::{GlobalStats, GuildId, ProcessId, shard_for_guild};

/// Latest global statistics as seen by this process
#[derive(Debug, Default)]
pub struct StatsCache {
    latest: Option<GlobalStats>,
    /// Process count captured from the first StatsUpdate
    process_count: Option<usize>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a StatsUpdate
    ///
    /// The snapshot is always overwritten. The process count is captured once
    /// and only re-captured while it is still zero.
    pub fn update(&mut self, stats: GlobalStats) {
        let reported = stats.process_count();
        match self.process_count {
            Some(count) if count > 0 => {}
            _ => {
                debug!(process_count = reported, "StatsCache::update: caching process count");
                self.process_count = Some(reported);
            }
        }
        self.latest = Some(stats);
    }

    pub fn latest(&self) -> Option<&GlobalStats> {
        self.latest.as_ref()
    }

    pub fn process_count(&self) -> Option<usize> {
        self.process_count
    }

    /// Responses needed before a broadcast request can settle
    ///
    /// `max(1, processes - processes reporting zero guilds)` once stats are
    /// known, otherwise 1.
    pub fn required_responses(&self) -> usize {
        match (&self.latest, self.process_count) {
            (Some(latest), Some(count)) => count.saturating_sub(latest.idle_process_count()).max(1),
            _ => 1,
        }
    }

    /// Empty answers a broadcast guild fetch needs before resolving `None`
    ///
    /// Every process answers a guild lookup, idle ones included, so this is
    /// the full cached process count. `None` while the count is unknown.
    pub fn guild_fetch_required(&self) -> Option<usize> {
        self.process_count.filter(|count| *count > 0)
    }

    /// Process owning the guild's shard, when the snapshot lists ownership
    pub fn owner_of_guild(&self, guild_id: GuildId) -> Option<ProcessId> {
        let latest = self.latest.as_ref()?;
        let shard = shard_for_guild(guild_id, latest.total_shards)?;
        latest.owner_of_shard(shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClusterStats;

    fn cluster(id: u32, guilds: u64, shards: Vec<u32>) -> ClusterStats {
        ClusterStats {
            process_id: ProcessId(id),
            shard_count: shards.len() as u32,
            guild_count: guilds,
            shard_ids: shards,
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_topology_requires_one() {
        let cache = StatsCache::new();
        assert_eq!(cache.required_responses(), 1);
        assert!(cache.latest().is_none());
        assert_eq!(cache.owner_of_guild(1 << 22), None);
    }

    #[test]
    fn test_required_excludes_idle_processes() {
        let mut cache = StatsCache::new();
        cache.update(GlobalStats::from_clusters(
            vec![cluster(0, 4, vec![0]), cluster(1, 0, vec![1]), cluster(2, 7, vec![2])],
            0,
        ));
        assert_eq!(cache.process_count(), Some(3));
        assert_eq!(cache.required_responses(), 2);
        assert_eq!(cache.guild_fetch_required(), Some(3));
    }

    #[test]
    fn test_guild_fetch_required_unknown_until_processes_counted() {
        let mut cache = StatsCache::new();
        assert_eq!(cache.guild_fetch_required(), None);
        cache.update(GlobalStats::default());
        assert_eq!(cache.guild_fetch_required(), None);
        cache.update(GlobalStats::from_clusters(vec![cluster(0, 0, vec![0]), cluster(1, 0, vec![1])], 0));
        assert_eq!(cache.guild_fetch_required(), Some(2));
    }

    #[test]
    fn test_all_idle_still_requires_one() {
        let mut cache = StatsCache::new();
        cache.update(GlobalStats::from_clusters(vec![cluster(0, 0, vec![0]), cluster(1, 0, vec![1])], 0));
        assert_eq!(cache.required_responses(), 1);
    }

    #[test]
    fn test_process_count_cached_from_first_update() {
        let mut cache = StatsCache::new();
        cache.update(GlobalStats::from_clusters(vec![cluster(0, 1, vec![0]), cluster(1, 1, vec![1])], 0));
        cache.update(GlobalStats::from_clusters(
            vec![cluster(0, 1, vec![0]), cluster(1, 1, vec![1]), cluster(2, 1, vec![2])],
            0,
        ));
        assert_eq!(cache.process_count(), Some(2));
        assert_eq!(cache.latest().unwrap().process_count(), 3);
    }

    #[test]
    fn test_zero_process_count_is_recaptured() {
        let mut cache = StatsCache::new();
        cache.update(GlobalStats::default());
        assert_eq!(cache.process_count(), Some(0));
        cache.update(GlobalStats::from_clusters(vec![cluster(0, 1, vec![0])], 0));
        assert_eq!(cache.process_count(), Some(1));
    }

    #[test]
    fn test_owner_of_guild() {
        let mut cache = StatsCache::new();
        cache.update(GlobalStats::from_clusters(
            vec![cluster(0, 1, vec![0, 1]), cluster(1, 1, vec![2, 3])],
            0,
        ));
        // shard = (id >> 22) % 4
        assert_eq!(cache.owner_of_guild(2 << 22), Some(ProcessId(1)));
        assert_eq!(cache.owner_of_guild(5 << 22), Some(ProcessId(0)));
    }
}
