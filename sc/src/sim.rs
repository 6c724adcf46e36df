//! In-memory simulated deployment
//!
//! Hosts several cluster processes in one runtime, each with its own
//! coordinator, all wired to a shared [`LocalBus`]. Process 0 doubles as the
//! designated stats publisher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::coordinator::{ClusterNode, Coordinator, CoordinatorConfig, CoordinatorHandle, Reloader};
use crate::domain::{
    Channel, ChannelKind, ClusterStats, GlobalStats, Guild, GuildId, Member, ProcessId, Role, ShardId, ShardInfo,
    ShardStatsReport, ShardStatus,
};
use crate::events::EventBus;
use crate::transport::{Envelope, LocalBus};

const SNOWFLAKE_SHIFT: u32 = 22;
const MIN_STATS_INTERVAL: Duration = Duration::from_millis(1);

/// Guild IDs whose snowflake maps onto `shard` under `total_shards`
fn guild_id_for(shard: ShardId, seq: u32, total_shards: u32) -> GuildId {
    (u64::from(seq + 1) * u64::from(total_shards) + u64::from(shard)) << SNOWFLAKE_SHIFT
}

fn build_guild(guild_id: GuildId, shard: ShardId, seq: u32) -> Guild {
    let mut guild = Guild::new(guild_id, format!("guild-{}-{}", shard, seq), 1000 + u64::from(seq), shard);
    for m in 0..(3 + u64::from(seq)) {
        guild.add_member(Member {
            id: 1000 + m,
            username: format!("user{}", m),
            nick: None,
            roles: vec![guild_id + 1],
        });
    }
    guild.add_role(Role {
        id: guild_id,
        name: "@everyone".to_string(),
        permissions: 0,
        position: 0,
    });
    guild.add_role(Role {
        id: guild_id + 1,
        name: "member".to_string(),
        permissions: 1024,
        position: 1,
    });
    guild.add_channel(Channel {
        id: guild_id + 2,
        name: "general".to_string(),
        kind: ChannelKind::Text,
        position: 0,
    });
    guild.add_channel(Channel {
        id: guild_id + 3,
        name: "voice".to_string(),
        kind: ChannelKind::Voice,
        position: 1,
    });
    guild
}

/// One simulated cluster process: its shards, guild cache and reload hooks
pub struct SimulatedProcess {
    process_id: ProcessId,
    shard_ids: Vec<ShardId>,
    guilds: BTreeMap<GuildId, Guild>,
    started: Instant,
    fail_reloads: bool,
    reloads: Mutex<Vec<String>>,
}

impl SimulatedProcess {
    /// Build the process's slice of the deployment
    ///
    /// Expects a config that passed `SimulationConfig::validate`.
    pub fn new(process_id: ProcessId, config: &SimulationConfig) -> Self {
        let total_shards = config.total_shards();
        let first = process_id.get().saturating_mul(config.shards_per_cluster);
        let last = first.saturating_add(config.shards_per_cluster).min(total_shards);
        let shard_ids: Vec<ShardId> = (first..last).collect();

        let mut guilds = BTreeMap::new();
        for &shard in &shard_ids {
            for seq in 0..config.guilds_per_shard {
                let guild_id = guild_id_for(shard, seq, total_shards);
                guilds.insert(guild_id, build_guild(guild_id, shard, seq));
            }
        }

        let fail_reloads = config.failing_reloads.contains(&process_id.get());
        debug!(%process_id, shards = ?shard_ids, guilds = guilds.len(), fail_reloads, "SimulatedProcess::new: called");
        Self {
            process_id,
            shard_ids,
            guilds,
            started: Instant::now(),
            fail_reloads,
            reloads: Mutex::new(Vec::new()),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn shard_ids(&self) -> &[ShardId] {
        &self.shard_ids
    }

    /// Cached guild IDs, ascending
    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.keys().copied().collect()
    }

    /// Reloads applied so far, as `target:path`
    pub fn reloads(&self) -> Vec<String> {
        self.reloads.lock().clone()
    }

    pub fn user_count(&self) -> u64 {
        self.guilds.values().map(|g| g.members.len() as u64).sum()
    }

    fn record(&self, what: &str, path: &str) -> eyre::Result<()> {
        if self.fail_reloads {
            eyre::bail!("{} reload of '{}' failed on process {}", what, path, self.process_id);
        }
        self.reloads.lock().push(format!("{}:{}", what, path));
        Ok(())
    }

    fn stats(&self) -> ClusterStats {
        let guild_count = self.guilds.len() as u64;
        ClusterStats {
            process_id: self.process_id,
            shard_count: self.shard_ids.len() as u32,
            guild_count,
            ram_usage_mb: 48.0 + guild_count as f64 * 0.5,
            voice_connection_count: 0,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            exclusive_guild_count: guild_count,
            large_guild_count: self.guilds.values().filter(|g| g.is_large()).count() as u64,
            shard_ids: self.shard_ids.clone(),
        }
    }
}

impl ClusterNode for SimulatedProcess {
    fn collect_shard_stats(&self) -> ShardStatsReport {
        let mut rng = rand::rng();
        let shards = self
            .shard_ids
            .iter()
            .map(|&id| ShardInfo {
                id,
                status: ShardStatus::Ready,
                latency_ms: 40 + u64::from(id) * 3 + rng.random_range(0..15),
                guild_count: self.guilds.values().filter(|g| g.shard_id == id).count() as u64,
                voice_connections: 0,
            })
            .collect();
        ShardStatsReport {
            stats: self.stats(),
            shards,
        }
    }

    fn guild(&self, guild_id: GuildId) -> Option<Guild> {
        self.guilds.get(&guild_id).cloned()
    }
}

impl Reloader for SimulatedProcess {
    fn reload_event_listener(&self, path: &str) -> eyre::Result<()> {
        self.record("event-listener", path)
    }

    fn reload_command(&self, path: &str) -> eyre::Result<()> {
        self.record("command", path)
    }

    fn reload_module(&self, path: &str, name: Option<&str>, options: Option<&Value>) -> eyre::Result<()> {
        debug!(path, ?name, ?options, "SimulatedProcess::reload_module: called");
        self.record("module", path)
    }

    fn reload_utils(&self) -> eyre::Result<()> {
        self.record("utils", "")
    }

    fn reload_commands(&self) -> eyre::Result<()> {
        self.record("all-commands", "")
    }

    fn reload_structures(&self) -> eyre::Result<()> {
        self.record("all-structures", "")
    }

    fn reload_handlers(&self) -> eyre::Result<()> {
        self.record("all-handlers", "")
    }

    fn reload_all_event_listeners(&self) -> eyre::Result<()> {
        self.record("all-event-listeners", "")
    }
}

/// Deployment-wide snapshot assembled from every process
fn global_stats(processes: &[Arc<SimulatedProcess>]) -> GlobalStats {
    let clusters = processes.iter().map(|p| p.stats()).collect();
    let user_count = processes.iter().map(|p| p.user_count()).sum();
    GlobalStats::from_clusters(clusters, user_count)
}

fn publish(bus: &LocalBus, processes: &[Arc<SimulatedProcess>]) -> Result<usize> {
    let envelope = Envelope::StatsUpdate {
        origin_id: ProcessId(0),
        data: global_stats(processes),
    };
    Ok(bus.publish(&envelope)?)
}

/// Several coordinated processes sharing one in-memory bus
pub struct SimulatedCluster {
    bus: LocalBus,
    processes: Vec<Arc<SimulatedProcess>>,
    handles: Vec<CoordinatorHandle>,
    tasks: Vec<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
}

impl SimulatedCluster {
    /// Spawn one coordinator per simulated process
    pub fn start(sim: &SimulationConfig, coordinator: &CoordinatorConfig, events: &EventBus) -> Result<Self> {
        info!(clusters = sim.clusters, shards = sim.total_shards(), "SimulatedCluster::start: called");
        sim.validate()?;
        let bus = LocalBus::new();
        let mut processes = Vec::new();
        let mut handles = Vec::new();
        let mut tasks = Vec::new();

        for id in 0..sim.clusters {
            let process = Arc::new(SimulatedProcess::new(ProcessId(id), sim));
            let endpoint = Arc::new(bus.endpoint(ProcessId(id)));
            let coord = Coordinator::new(coordinator.clone(), endpoint, process.clone(), process.clone())?
                .with_events(events);
            handles.push(coord.handle());
            tasks.push(tokio::spawn(coord.run()));
            processes.push(process);
        }

        Ok(Self {
            bus,
            processes,
            handles,
            tasks,
            publisher: None,
        })
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn handle(&self, index: usize) -> Option<&CoordinatorHandle> {
        self.handles.get(index)
    }

    pub fn process(&self, index: usize) -> Option<&Arc<SimulatedProcess>> {
        self.processes.get(index)
    }

    pub fn global_stats(&self) -> GlobalStats {
        global_stats(&self.processes)
    }

    /// Broadcast one StatsUpdate; returns how many processes it reached
    pub fn publish_stats(&self) -> Result<usize> {
        publish(&self.bus, &self.processes)
    }

    /// Publish a StatsUpdate and wait until every coordinator has applied it
    pub async fn sync_topology(&self, timeout: Duration) -> Result<()> {
        let reached = self.publish_stats()?;
        debug!(reached, "SimulatedCluster::sync_topology: published");
        let applied = async {
            for handle in &self.handles {
                while handle.metrics().await?.stats_updates == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            Ok::<_, eyre::Report>(())
        };
        tokio::time::timeout(timeout, applied)
            .await
            .map_err(|_| eyre::eyre!("Topology not applied within {:?}", timeout))?
    }

    /// Publish a StatsUpdate now and then every `interval`
    ///
    /// A zero interval is raised to one millisecond.
    pub fn spawn_stats_publisher(&mut self, interval: Duration) {
        debug!(?interval, "SimulatedCluster::spawn_stats_publisher: called");
        let interval = interval.max(MIN_STATS_INTERVAL);
        let bus = self.bus.clone();
        let processes = self.processes.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = publish(&bus, &processes) {
                    warn!(error = %e, "stats publisher: failed to publish");
                }
            }
        });
        if let Some(previous) = self.publisher.replace(task) {
            previous.abort();
        }
    }

    /// Drop a process off the bus, as if it crashed
    pub fn disconnect(&self, index: usize) {
        if let Some(process) = self.processes.get(index) {
            self.bus.disconnect(process.process_id());
        }
    }

    /// Stop the publisher and every coordinator
    pub async fn shutdown(self) {
        info!("SimulatedCluster::shutdown: called");
        if let Some(publisher) = self.publisher {
            publisher.abort();
        }
        // Already stopped coordinators are fine
        join_all(self.handles.iter().map(|h| h.shutdown())).await;
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "SimulatedCluster::shutdown: coordinator task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shard_for_guild;

    fn config() -> SimulationConfig {
        SimulationConfig {
            clusters: 3,
            shards_per_cluster: 2,
            guilds_per_shard: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_guilds_land_on_owned_shards() {
        let sim = config();
        let process = SimulatedProcess::new(ProcessId(1), &sim);

        assert_eq!(process.shard_ids(), &[2, 3]);
        assert_eq!(process.guild_ids().len(), 6);
        for guild_id in process.guild_ids() {
            let shard = shard_for_guild(guild_id, sim.total_shards()).unwrap();
            assert!(process.shard_ids().contains(&shard), "guild {} on shard {}", guild_id, shard);
        }
    }

    #[test]
    fn test_shard_report_matches_cache() {
        let process = SimulatedProcess::new(ProcessId(0), &config());
        let report = process.collect_shard_stats();

        assert_eq!(report.stats.guild_count, 6);
        assert_eq!(report.shards.len(), 2);
        assert!(report.shards.iter().all(|s| s.guild_count == 3 && s.status == ShardStatus::Ready));
    }

    #[test]
    fn test_failing_process_rejects_reloads() {
        let sim = SimulationConfig {
            failing_reloads: vec![2],
            ..config()
        };
        let healthy = SimulatedProcess::new(ProcessId(0), &sim);
        let failing = SimulatedProcess::new(ProcessId(2), &sim);

        assert!(healthy.reload_command("commands/ping").is_ok());
        assert!(failing.reload_command("commands/ping").is_err());
        assert_eq!(healthy.reloads(), vec!["command:commands/ping"]);
        assert!(failing.reloads().is_empty());
    }

    #[test]
    fn test_global_stats_cover_every_process() {
        let sim = config();
        let processes: Vec<Arc<SimulatedProcess>> =
            (0..3).map(|id| Arc::new(SimulatedProcess::new(ProcessId(id), &sim))).collect();

        let stats = global_stats(&processes);

        assert_eq!(stats.total_shards, 6);
        assert_eq!(stats.guild_count, 18);
        assert_eq!(stats.idle_process_count(), 0);
        assert!(stats.user_count > 0);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_shape() {
        let bus = EventBus::with_default_capacity();
        let sim = SimulationConfig {
            clusters: u32::MAX,
            ..config()
        };

        let err = SimulatedCluster::start(&sim, &CoordinatorConfig::default(), &bus).err().unwrap();
        assert!(err.to_string().contains("overflow"));
    }

    #[tokio::test]
    async fn test_zero_stats_interval_still_publishes() {
        let bus = EventBus::with_default_capacity();
        let mut cluster = SimulatedCluster::start(&config(), &CoordinatorConfig::default(), &bus).unwrap();

        cluster.spawn_stats_publisher(Duration::ZERO);

        let handle = cluster.handle(2).unwrap().clone();
        let applied = async {
            while handle.metrics().await.unwrap().stats_updates < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), applied)
            .await
            .expect("publisher should keep running");
        cluster.shutdown().await;
    }
}
