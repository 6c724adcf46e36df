//! Correlation-based scatter-gather coordinator
//!
//! One Coordinator task runs per cluster process. Callers talk to it through a
//! [`CoordinatorHandle`]; peers talk to it through the [`Transport`]:
//! - **Dispatch:** open a registry entry, then broadcast (or send to the owner)
//! - **Aggregate:** append each response and settle once quorum is reached
//! - **Route:** answer peers' requests from this process's own state
//!
//! Every request carries a deadline and settles exactly once.
//!
//! [`Transport`]: crate::transport::Transport

mod aggregator;
mod config;
mod core;
mod handle;
mod messages;
mod quorum;
mod registry;
mod router;
mod traits;

pub use config::{CoordinatorConfig, GuildRouting};
pub use core::{Coordinator, DIAGNOSTICS_TARGET};
pub use handle::CoordinatorHandle;
pub use messages::{
    CoordError, CoordRequest, CoordResult, CoordinatorMetrics, DispatchRequest, RequestKind, RequestState, Response,
};
pub use quorum::StatsCache;
pub use registry::{AppendOutcome, CorrelationRegistry, PendingRequest, ResponsePayload};
pub use router::LocalRouter;
pub use traits::{ClusterNode, Reloader};
