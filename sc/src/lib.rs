//! shardcoord - scatter-gather coordination for sharded cluster processes
//!
//! A sharded chat bot runs as several cluster processes, each owning a slice of
//! gateway shards and the guilds on them. shardcoord lets any process ask the
//! whole deployment a question and get one aggregated answer back.
//!
//! # Core Concepts
//!
//! - **Correlation**: every request carries an ID; responses are matched back by it
//! - **Quorum**: a request completes once every non-idle process has answered
//! - **Settle once**: each request resolves, rejects, times out or is cancelled exactly once
//! - **Local routing**: each process answers peers from its own shard state
//!
//! # Modules
//!
//! - [`coordinator`] - registry, aggregation, routing and the coordinator task
//! - [`transport`] - transport boundary and the in-memory bus
//! - [`domain`] - IDs, stats, guild cache entries and reload directives
//! - [`events`] - cluster event bus and JSONL event logs
//! - [`sim`] - in-memory multi-process deployment
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, SimulationConfig};
pub use coordinator::{
    ClusterNode, CoordError, CoordResult, Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics,
    GuildRouting, Reloader, Response,
};
pub use domain::{
    ClusterStats, CorrelationId, GlobalStats, Guild, GuildId, GuildSnapshot, ProcessId, ReloadDirective, ReloadTarget,
    ShardId, ShardStatsReport,
};
pub use events::{ClusterEvent, EventBus, EventEmitter, spawn_event_logger};
pub use sim::{SimulatedCluster, SimulatedProcess};
pub use transport::{Envelope, LocalBus, Transport, TransportError};
