//! In-memory transport hub
//!
//! Every envelope is encoded to JSON and decoded again on delivery so that
//! payloads cross the same serialization boundary they would between real
//! processes. Inbound queues are unbounded: a coordinator replying to itself
//! must never block on its own inbound channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::ProcessId;

use super::{Envelope, InboundHandler, Transport, TransportError};

#[derive(Default)]
struct BusState {
    /// Connected processes; `None` until the process registers its handler
    endpoints: BTreeMap<ProcessId, Option<InboundHandler>>,
}

/// Shared routing hub for processes hosted in one runtime
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<RwLock<BusState>>,
    delivered: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        debug!("LocalBus::new: called");
        Self::default()
    }

    /// Connect a process and return its transport endpoint
    pub fn endpoint(&self, process_id: ProcessId) -> LocalEndpoint {
        debug!(%process_id, "LocalBus::endpoint: called");
        self.state.write().endpoints.entry(process_id).or_insert(None);
        LocalEndpoint {
            bus: self.clone(),
            process_id,
        }
    }

    /// Drop a process from the bus, as if it crashed
    ///
    /// Its inbound handler is released and later sends addressed to it fail.
    pub fn disconnect(&self, process_id: ProcessId) {
        debug!(%process_id, "LocalBus::disconnect: called");
        self.state.write().endpoints.remove(&process_id);
    }

    /// Connected process IDs, ascending
    pub fn processes(&self) -> Vec<ProcessId> {
        self.state.read().endpoints.keys().copied().collect()
    }

    /// Total envelopes handed to inbound handlers so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Broadcast from outside any cluster process (the deployment supervisor)
    pub fn publish(&self, envelope: &Envelope) -> Result<usize, TransportError> {
        debug!(kind = %envelope.kind(), "LocalBus::publish: called");
        self.fan_out(envelope)
    }

    fn attach(&self, process_id: ProcessId, handler: InboundHandler) -> Result<(), TransportError> {
        let mut state = self.state.write();
        let slot = state.endpoints.entry(process_id).or_insert(None);
        if slot.as_ref().is_some_and(|h| !h.is_closed()) {
            return Err(TransportError::AlreadyRegistered(process_id));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn fan_out(&self, envelope: &Envelope) -> Result<usize, TransportError> {
        let line = envelope.encode()?;
        let handlers: Vec<(ProcessId, InboundHandler)> = self
            .state
            .read()
            .endpoints
            .iter()
            .filter_map(|(pid, handler)| handler.as_ref().map(|h| (*pid, h.clone())))
            .collect();

        let mut reached = 0;
        for (pid, handler) in handlers {
            if self.deliver(pid, &handler, &line)? {
                reached += 1;
            }
        }
        Ok(reached)
    }

    fn unicast(&self, target: ProcessId, envelope: &Envelope) -> Result<(), TransportError> {
        let handler = {
            let state = self.state.read();
            match state.endpoints.get(&target) {
                Some(Some(handler)) => handler.clone(),
                _ => return Err(TransportError::UnknownProcess(target)),
            }
        };
        let line = envelope.encode()?;
        if self.deliver(target, &handler, &line)? {
            Ok(())
        } else {
            Err(TransportError::UnknownProcess(target))
        }
    }

    fn deliver(&self, target: ProcessId, handler: &InboundHandler, line: &str) -> Result<bool, TransportError> {
        let envelope = Envelope::decode(line)?;
        if handler.send(envelope).is_err() {
            warn!(%target, "LocalBus: inbound handler closed, dropping message");
            return Ok(false);
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}

/// One process's view of a [`LocalBus`]
#[derive(Clone)]
pub struct LocalEndpoint {
    bus: LocalBus,
    process_id: ProcessId,
}

impl LocalEndpoint {
    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }
}

#[async_trait]
impl Transport for LocalEndpoint {
    fn process_id(&self) -> ProcessId {
        self.process_id
    }

    fn register(&self, handler: InboundHandler) -> Result<(), TransportError> {
        debug!(process_id = %self.process_id, "LocalEndpoint::register: called");
        self.bus.attach(self.process_id, handler)
    }

    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        debug!(process_id = %self.process_id, kind = %envelope.kind(), "LocalEndpoint::broadcast: called");
        let reached = self.bus.fan_out(&envelope)?;
        debug!(reached, "LocalEndpoint::broadcast: delivered");
        Ok(())
    }

    async fn send_to(&self, target: ProcessId, envelope: Envelope) -> Result<(), TransportError> {
        debug!(process_id = %self.process_id, %target, kind = %envelope.kind(), "LocalEndpoint::send_to: called");
        self.bus.unicast(target, &envelope)
    }
}
