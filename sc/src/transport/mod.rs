//! Inter-process transport boundary
//!
//! The coordinator consumes a [`Transport`]: best-effort broadcast to every
//! live cluster process (the sender included), best-effort point-to-point
//! send, and exactly one registered inbound handler per process. Delivery is
//! at-most-once and unordered; nothing here retries.
//!
//! [`LocalBus`] is an in-memory implementation that routes JSON-encoded
//! envelopes between processes hosted in one runtime.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::ProcessId;

mod envelope;
mod local;

pub use envelope::{Envelope, MessageKind};
pub use local::{LocalBus, LocalEndpoint};

/// Errors surfaced by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Inbound handler already registered for process {0}")]
    AlreadyRegistered(ProcessId),

    #[error("Process {0} is not connected")]
    UnknownProcess(ProcessId),

    #[error("Transport closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Sink that receives every inbound envelope for one process
pub type InboundHandler = mpsc::UnboundedSender<Envelope>;

/// Broadcast / send / register primitives the coordinator is layered over
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the process this transport belongs to
    fn process_id(&self) -> ProcessId;

    /// Install the process's inbound handler; a second registration fails
    fn register(&self, handler: InboundHandler) -> Result<(), TransportError>;

    /// Deliver to every live process, including this one
    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Deliver to one process
    async fn send_to(&self, target: ProcessId, envelope: Envelope) -> Result<(), TransportError>;
}
