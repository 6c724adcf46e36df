//! Coordination events for live observability
//!
//! Coordinators and routers emit [`ClusterEvent`]s onto a shared
//! [`EventBus`] (a tokio broadcast channel). Diagnostics mirroring, contained
//! reload faults and request lifecycle all flow through it; the
//! [`EventLogger`] persists them as JSONL, one file per process.
//!
//! ```text
//!   Coordinator ──┐                    ┌── EventLogger (.jsonl)
//!   LocalRouter ──┼──► EventBus ──────►┤
//!                 │                    └── tests / CLI subscribers
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_process_events, spawn_event_logger};
pub use types::{ClusterEvent, EventLogEntry};
