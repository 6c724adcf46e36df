//! Message types for the Coordinator

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{CorrelationId, GuildId, GuildSnapshot, ProcessId, ReloadDirective, ShardStatsReport};
use crate::transport::TransportError;

/// One process's answer to a scatter-gather request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    #[serde(rename = "originId")]
    pub origin_id: ProcessId,
    pub data: T,
}

impl<T> Response<T> {
    pub fn new(origin_id: ProcessId, data: T) -> Self {
        Self { origin_id, data }
    }
}

/// The request kinds the coordinator can scatter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    ShardStats,
    Reload,
    GuildFetch,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestKind::ShardStats => "ShardStats",
            RequestKind::Reload => "Reload",
            RequestKind::GuildFetch => "GuildFetch",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a pending request; Resolved and Rejected are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Open,
    Resolved,
    Rejected,
}

/// Errors delivered to callers of the coordinator
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Reload failed on processes {:?}", failed_origins(.responses))]
    ReloadFailed { responses: Vec<Response<bool>> },

    #[error("Request {id} timed out with {received}/{required} responses")]
    Timeout {
        id: CorrelationId,
        received: usize,
        /// Zero for a guild fetch issued before the process count was known
        required: usize,
    },

    #[error("Correlation ID already in use: {0}")]
    DuplicateId(CorrelationId),

    #[error("Request {0} cancelled")]
    Cancelled(CorrelationId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Coordinator channel closed")]
    ChannelClosed,
}

fn failed_origins(responses: &[Response<bool>]) -> Vec<ProcessId> {
    responses.iter().filter(|r| !r.data).map(|r| r.origin_id).collect()
}

impl CoordError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordError::Timeout { .. })
    }

    /// Processes that reported a failed reload, if this is a reload failure
    pub fn failed_processes(&self) -> Vec<ProcessId> {
        match self {
            CoordError::ReloadFailed { responses } => failed_origins(responses),
            _ => Vec::new(),
        }
    }
}

/// Result type for coordinator operations
pub type CoordResult<T> = Result<T, CoordError>;

pub type ShardStatsReply = oneshot::Sender<CoordResult<Vec<Response<ShardStatsReport>>>>;
pub type ReloadReply = oneshot::Sender<CoordResult<Vec<Response<bool>>>>;
pub type GuildReply = oneshot::Sender<CoordResult<Option<GuildSnapshot>>>;

/// Work a caller asks the coordinator to scatter, with its reply channel
#[derive(Debug)]
pub enum DispatchRequest {
    ShardStats { reply: ShardStatsReply },
    Reload { directive: ReloadDirective, reply: ReloadReply },
    GuildFetch { guild_id: GuildId, reply: GuildReply },
}

impl DispatchRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            DispatchRequest::ShardStats { .. } => RequestKind::ShardStats,
            DispatchRequest::Reload { .. } => RequestKind::Reload,
            DispatchRequest::GuildFetch { .. } => RequestKind::GuildFetch,
        }
    }
}

/// Internal requests to the Coordinator task
#[derive(Debug)]
pub enum CoordRequest {
    /// Seed a registry entry and scatter the request
    Dispatch {
        id: CorrelationId,
        request: DispatchRequest,
        timeout: Duration,
    },

    /// Deadline reached for a request (internal)
    Deadline { id: CorrelationId },

    /// Caller gave up on a request
    Cancel { id: CorrelationId },

    /// Correlation IDs currently open
    PendingIds {
        reply_tx: oneshot::Sender<Vec<CorrelationId>>,
    },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Shutdown the coordinator
    Shutdown,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorMetrics {
    pub pending_requests: usize,
    pub requests_dispatched: u64,
    pub requests_resolved: u64,
    pub requests_rejected: u64,
    pub requests_cancelled: u64,
    pub request_timeouts: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub late_responses: u64,
    pub stats_updates: u64,
    pub local_faults: u64,
}
