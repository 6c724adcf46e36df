//! Event Bus - pub/sub for coordination events
//!
//! The EventBus uses a tokio broadcast channel; coordinators and routers emit,
//! loggers and tests subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use crate::coordinator::{RequestKind, RequestState};
use crate::domain::{CorrelationId, ProcessId};
use crate::transport::MessageKind;

use super::types::ClusterEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus shared by every process hosted in one runtime
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: ClusterEvent) {
        debug!(event_type = event.event_type(), process_id = %event.process_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one process
    pub fn emitter_for(&self, process_id: ProcessId) -> EventEmitter {
        debug!(%process_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: Some(self.tx.clone()),
            process_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events stamped with their process ID
///
/// A detached emitter (no bus) silently discards everything.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: Option<broadcast::Sender<ClusterEvent>>,
    process_id: ProcessId,
}

impl EventEmitter {
    /// Emitter that is not connected to any bus
    pub fn detached(process_id: ProcessId) -> Self {
        Self { tx: None, process_id }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn emit(&self, event: ClusterEvent) {
        if let Some(tx) = &self.tx {
            debug!(event_type = event.event_type(), "EventEmitter::emit");
            let _ = tx.send(event);
        }
    }

    // === Convenience methods ===

    pub fn message_received(&self, kind: MessageKind, origin_id: ProcessId, correlation_id: Option<CorrelationId>) {
        self.emit(ClusterEvent::MessageReceived {
            process_id: self.process_id,
            kind,
            origin_id,
            correlation_id,
        });
    }

    pub fn local_fault(&self, context: &str, message: &str) {
        self.emit(ClusterEvent::LocalFault {
            process_id: self.process_id,
            context: context.to_string(),
            message: message.to_string(),
        });
    }

    pub fn request_settled(&self, id: CorrelationId, kind: RequestKind, state: RequestState, received: usize) {
        self.emit(ClusterEvent::RequestSettled {
            process_id: self.process_id,
            id,
            kind,
            state,
            received,
        });
    }

    pub fn request_expired(&self, id: CorrelationId, kind: RequestKind, received: usize, required: usize) {
        self.emit(ClusterEvent::RequestExpired {
            process_id: self.process_id,
            id,
            kind,
            received,
            required,
        });
    }

    pub fn request_cancelled(&self, id: CorrelationId, kind: RequestKind) {
        self.emit(ClusterEvent::RequestCancelled {
            process_id: self.process_id,
            id,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(100);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(100);
        bus.emitter_for(ProcessId(0)).local_fault("reload", "nobody listening");
    }

    #[tokio::test]
    async fn test_emitter_stamps_process_id() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for(ProcessId(4));

        emitter.message_received(MessageKind::StatsUpdate, ProcessId(0), None);
        emitter.request_cancelled(CorrelationId::from_string("c"), RequestKind::GuildFetch);

        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.process_id(), ProcessId(4));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_detached_emitter_emits_nothing() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = EventEmitter::detached(ProcessId(1));

        emitter.local_fault("reload", "lost");

        assert_eq!(emitter.process_id(), ProcessId(1));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(ClusterEvent::LocalFault {
            process_id: ProcessId(2),
            context: "reload".to_string(),
            message: "x".to_string(),
        });

        assert_eq!(rx1.recv().await.unwrap().event_type(), "LocalFault");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "LocalFault");
    }
}
