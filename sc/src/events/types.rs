//! Event types for cluster coordination activity
//!
//! These events cover what a process observes while coordinating:
//! - Inbound messages (diagnostics mode only)
//! - Local faults contained by the router
//! - Request settlement, expiry and cancellation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::{RequestKind, RequestState};
use crate::domain::{CorrelationId, ProcessId};
use crate::transport::MessageKind;

/// Observable coordination activity, tagged with the process that saw it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterEvent {
    /// An inbound message was dispatched
    MessageReceived {
        process_id: ProcessId,
        kind: MessageKind,
        origin_id: ProcessId,
        correlation_id: Option<CorrelationId>,
    },
    /// A local operation failed and was contained
    LocalFault {
        process_id: ProcessId,
        context: String,
        message: String,
    },
    /// A request reached a terminal state with enough responses
    RequestSettled {
        process_id: ProcessId,
        id: CorrelationId,
        kind: RequestKind,
        state: RequestState,
        received: usize,
    },
    /// A request hit its deadline
    RequestExpired {
        process_id: ProcessId,
        id: CorrelationId,
        kind: RequestKind,
        received: usize,
        required: usize,
    },
    /// The caller abandoned a request
    RequestCancelled {
        process_id: ProcessId,
        id: CorrelationId,
        kind: RequestKind,
    },
}

impl ClusterEvent {
    /// Process this event was observed on
    pub fn process_id(&self) -> ProcessId {
        match self {
            ClusterEvent::MessageReceived { process_id, .. }
            | ClusterEvent::LocalFault { process_id, .. }
            | ClusterEvent::RequestSettled { process_id, .. }
            | ClusterEvent::RequestExpired { process_id, .. }
            | ClusterEvent::RequestCancelled { process_id, .. } => *process_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::MessageReceived { .. } => "MessageReceived",
            ClusterEvent::LocalFault { .. } => "LocalFault",
            ClusterEvent::RequestSettled { .. } => "RequestSettled",
            ClusterEvent::RequestExpired { .. } => "RequestExpired",
            ClusterEvent::RequestCancelled { .. } => "RequestCancelled",
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: ClusterEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: ClusterEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
