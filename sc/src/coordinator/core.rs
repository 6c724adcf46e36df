//! Main Coordinator task implementation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{CorrelationId, IdGenerator, ProcessId};
use crate::events::{EventBus, EventEmitter};
use crate::transport::{Envelope, Transport, TransportError};

use super::config::{CoordinatorConfig, GuildRouting};
use super::handle::CoordinatorHandle;
use super::messages::{CoordError, CoordRequest, CoordinatorMetrics, DispatchRequest, RequestState};
use super::quorum::StatsCache;
use super::registry::{AppendOutcome, CorrelationRegistry, Outbound, PendingRequest, ResponsePayload};
use super::router::LocalRouter;
use super::traits::{ClusterNode, Reloader};

/// Log target for development diagnostics
pub const DIAGNOSTICS_TARGET: &str = "shardcoord::diagnostics";

/// Per-process scatter-gather coordinator
///
/// Owns the correlation registry, the stats cache and the local router. All
/// of them are touched only from the task running [`Coordinator::run`].
pub struct Coordinator {
    config: CoordinatorConfig,
    process_id: ProcessId,
    transport: Arc<dyn Transport>,
    node: Arc<dyn ClusterNode>,
    router: LocalRouter,
    events: EventEmitter,
    ids: Arc<IdGenerator>,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    inbound_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Coordinator {
    /// Create a coordinator and install its inbound handler on the transport
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        node: Arc<dyn ClusterNode>,
        reloader: Arc<dyn Reloader>,
    ) -> Result<Self, TransportError> {
        let process_id = transport.process_id();
        debug!(%process_id, ?config, "Coordinator::new: called");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport.register(inbound_tx)?;

        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let events = EventEmitter::detached(process_id);
        let router = LocalRouter::new(process_id, node.clone(), reloader, events.clone());

        Ok(Self {
            config,
            process_id,
            transport,
            node,
            router,
            events,
            ids: Arc::new(IdGenerator::new(process_id)),
            tx,
            rx,
            inbound_rx,
        })
    }

    /// Report faults, settlements and diagnostics on the given bus
    pub fn with_events(mut self, bus: &EventBus) -> Self {
        self.events = bus.emitter_for(self.process_id);
        self.router.set_events(self.events.clone());
        self
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Get a sender for raw requests
    pub fn sender(&self) -> mpsc::Sender<CoordRequest> {
        self.tx.clone()
    }

    /// Create a caller handle
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(
            self.tx.clone(),
            self.ids.clone(),
            self.node.clone(),
            self.process_id,
            self.config.request_timeout(),
        )
    }

    /// Run the Coordinator task
    ///
    /// Runs until shutdown is requested or every handle is dropped. Requests
    /// still open at that point fail with `ChannelClosed`.
    pub async fn run(self) {
        let Coordinator {
            config,
            process_id,
            transport,
            router,
            events,
            tx,
            mut rx,
            mut inbound_rx,
            ..
        } = self;

        // Deadline sleepers must not keep the command channel alive
        let deadline_tx = tx.downgrade();
        drop(tx);

        let mut state = CoordState {
            process_id,
            transport,
            router,
            events,
            deadline_tx,
            diagnostics: config.diagnostics,
            guild_routing: config.guild_routing,
            registry: CorrelationRegistry::new(),
            stats: StatsCache::new(),
            metrics: CoordinatorMetrics::default(),
        };

        info!(%process_id, "Coordinator started");
        let mut inbound_open = true;

        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => {
                        if !state.handle_request(req).await {
                            info!(%process_id, "Coordinator shutting down");
                            break;
                        }
                    }
                    None => {
                        info!(%process_id, "Coordinator: all handles dropped, shutting down");
                        break;
                    }
                },
                msg = inbound_rx.recv(), if inbound_open => match msg {
                    Some(envelope) => state.handle_inbound(envelope).await,
                    None => {
                        warn!(%process_id, "Coordinator: transport inbound closed");
                        inbound_open = false;
                    }
                },
            }
        }

        for pending in state.registry.drain() {
            pending.fail(CoordError::ChannelClosed);
        }
        info!(%process_id, "Coordinator stopped");
    }
}

/// State owned by the running coordinator task
struct CoordState {
    process_id: ProcessId,
    transport: Arc<dyn Transport>,
    router: LocalRouter,
    events: EventEmitter,
    deadline_tx: mpsc::WeakSender<CoordRequest>,
    diagnostics: bool,
    guild_routing: GuildRouting,
    registry: CorrelationRegistry,
    stats: StatsCache,
    metrics: CoordinatorMetrics,
}

impl CoordState {
    /// Returns false when the coordinator should stop
    async fn handle_request(&mut self, req: CoordRequest) -> bool {
        match req {
            CoordRequest::Dispatch { id, request, timeout } => self.dispatch(id, request, timeout).await,

            CoordRequest::Deadline { id } => self.expire(id),

            CoordRequest::Cancel { id } => {
                if let Some(pending) = self.registry.take(&id) {
                    debug!(%id, "Coordinator: request cancelled by caller");
                    self.metrics.requests_cancelled += 1;
                    self.events.request_cancelled(id.clone(), pending.kind());
                    pending.fail(CoordError::Cancelled(id));
                }
            }

            CoordRequest::PendingIds { reply_tx } => {
                let _ = reply_tx.send(self.registry.ids());
            }

            CoordRequest::GetMetrics { reply_tx } => {
                self.metrics.pending_requests = self.registry.len();
                let _ = reply_tx.send(self.metrics.clone());
            }

            CoordRequest::Shutdown => return false,
        }
        self.metrics.pending_requests = self.registry.len();
        true
    }

    async fn dispatch(&mut self, id: CorrelationId, request: DispatchRequest, timeout: Duration) {
        let kind = request.kind();
        debug!(%id, %kind, ?timeout, "Coordinator::dispatch: called");

        let (pending, outbound) = PendingRequest::open(id.clone(), request);
        let target = match &outbound {
            Outbound::GuildFetch(guild_id) if self.guild_routing == GuildRouting::Direct => {
                self.stats.owner_of_guild(*guild_id)
            }
            _ => None,
        };
        let pending = if target.is_some() { pending.with_required(1) } else { pending };

        if let Err(rejected) = self.registry.create(pending) {
            warn!(%id, "Coordinator: correlation ID already open");
            rejected.fail(CoordError::DuplicateId(id));
            return;
        }
        self.metrics.requests_dispatched += 1;
        self.spawn_deadline(id.clone(), timeout);

        let envelope = outbound.into_envelope(id.clone(), self.process_id);
        let sent = match target {
            Some(owner) => {
                debug!(%id, %owner, "Coordinator::dispatch: sending to owning process");
                match self.transport.send_to(owner, envelope.clone()).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!(%id, %owner, error = %e, "Coordinator::dispatch: owner unreachable, broadcasting");
                        if let Some(mut pending) = self.registry.take(&id) {
                            pending.required_override = None;
                            let _ = self.registry.create(pending);
                        }
                        self.transport.broadcast(envelope).await
                    }
                }
            }
            None => self.transport.broadcast(envelope).await,
        };

        match sent {
            Ok(()) => self.metrics.messages_sent += 1,
            Err(e) => {
                warn!(%id, error = %e, "Coordinator::dispatch: transport failed");
                if let Some(pending) = self.registry.take(&id) {
                    self.metrics.requests_rejected += 1;
                    pending.fail(CoordError::Transport(e));
                }
            }
        }
    }

    fn spawn_deadline(&self, id: CorrelationId, timeout: Duration) {
        let deadline_tx = self.deadline_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = deadline_tx.upgrade() {
                let _ = tx.send(CoordRequest::Deadline { id }).await;
            }
        });
    }

    fn expire(&mut self, id: CorrelationId) {
        // Already settled requests have left the registry
        let Some(pending) = self.registry.take(&id) else {
            return;
        };
        let received = pending.received();
        let required = pending.required(&self.stats).unwrap_or(0);
        let kind = pending.kind();
        warn!(%id, %kind, received, required, "Coordinator: request timed out");

        self.metrics.request_timeouts += 1;
        self.events.request_expired(id.clone(), kind, received, required);
        pending.fail(CoordError::Timeout { id, received, required });
    }

    async fn handle_inbound(&mut self, envelope: Envelope) {
        self.metrics.messages_received += 1;
        let kind = envelope.kind();
        let origin_id = envelope.origin_id();
        let correlation_id = envelope.correlation_id().cloned();

        match envelope {
            Envelope::StatsUpdate { data, .. } => {
                debug!(%origin_id, processes = data.process_count(), "Coordinator: stats update");
                self.stats.update(data);
                self.metrics.stats_updates += 1;
            }
            envelope if envelope.is_response() => self.handle_response(envelope),
            envelope => {
                if let Some((target, reply)) = self.router.route(&envelope) {
                    if matches!(reply, Envelope::ReloadResponse { data: false, .. }) {
                        self.metrics.local_faults += 1;
                    }
                    self.send_reply(target, reply).await;
                }
            }
        }

        if self.diagnostics {
            info!(
                target: DIAGNOSTICS_TARGET,
                process_id = %self.process_id,
                kind = %kind,
                origin_id = %origin_id,
                "Received the message {} from cluster {}",
                kind,
                origin_id
            );
            self.events.message_received(kind, origin_id, correlation_id);
        }
    }

    fn handle_response(&mut self, envelope: Envelope) {
        let Some((id, origin_id, payload)) = ResponsePayload::from_envelope(envelope) else {
            return;
        };

        match self.registry.append(&id, origin_id, payload) {
            AppendOutcome::Unknown => {
                debug!(%id, %origin_id, "Coordinator: dropping late response");
                self.metrics.late_responses += 1;
            }
            AppendOutcome::KindMismatch { expected, got } => {
                warn!(%id, %origin_id, %expected, %got, "Coordinator: response kind mismatch, dropping");
            }
            AppendOutcome::Appended { received } => {
                let complete = self
                    .registry
                    .get(&id)
                    .is_some_and(|pending| pending.is_complete(pending.required(&self.stats)));
                if complete && let Some(pending) = self.registry.take(&id) {
                    let kind = pending.kind();
                    let state = pending.settle();
                    match state {
                        RequestState::Rejected => self.metrics.requests_rejected += 1,
                        _ => self.metrics.requests_resolved += 1,
                    }
                    self.events.request_settled(id, kind, state, received);
                }
            }
        }
        self.metrics.pending_requests = self.registry.len();
    }

    async fn send_reply(&mut self, target: ProcessId, reply: Envelope) {
        let kind = reply.kind();
        match self.transport.send_to(target, reply).await {
            Ok(()) => self.metrics.messages_sent += 1,
            Err(e) => warn!(%target, %kind, error = %e, "Coordinator: failed to send reply"),
        }
    }
}
