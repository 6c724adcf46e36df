//! Correlation registry: the single source of truth for open requests

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::domain::{CorrelationId, GuildSnapshot, ProcessId, ShardStatsReport};
use crate::transport::Envelope;

use super::messages::{
    CoordError, DispatchRequest, GuildReply, ReloadReply, RequestKind, Response, ShardStatsReply,
};

/// Accumulated responses plus the caller's reply channel, typed per kind
#[derive(Debug)]
pub(super) enum Gather {
    ShardStats {
        responses: Vec<Response<ShardStatsReport>>,
        reply: ShardStatsReply,
    },
    Reload {
        responses: Vec<Response<bool>>,
        reply: ReloadReply,
    },
    GuildFetch {
        responses: Vec<Response<Option<GuildSnapshot>>>,
        reply: GuildReply,
    },
}

/// Payload extracted from an inbound response envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    ShardStats(ShardStatsReport),
    Reload(bool),
    GuildFetch(Option<GuildSnapshot>),
}

impl ResponsePayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            ResponsePayload::ShardStats(_) => RequestKind::ShardStats,
            ResponsePayload::Reload(_) => RequestKind::Reload,
            ResponsePayload::GuildFetch(_) => RequestKind::GuildFetch,
        }
    }

    /// Split a response envelope into correlation ID, origin and payload
    ///
    /// Returns `None` for request and StatsUpdate envelopes.
    pub fn from_envelope(envelope: Envelope) -> Option<(CorrelationId, ProcessId, ResponsePayload)> {
        match envelope {
            Envelope::ShardStatsResponse { id, origin_id, data } => {
                Some((id, origin_id, ResponsePayload::ShardStats(data)))
            }
            Envelope::ReloadResponse { id, origin_id, data } => Some((id, origin_id, ResponsePayload::Reload(data))),
            Envelope::GuildFetchResponse { id, origin_id, data } => {
                Some((id, origin_id, ResponsePayload::GuildFetch(data)))
            }
            _ => None,
        }
    }
}

/// A request that has been scattered and is waiting on responses
#[derive(Debug)]
pub struct PendingRequest {
    pub id: CorrelationId,
    pub created_at: Instant,
    /// Fixed quorum for directly addressed requests
    pub(super) required_override: Option<usize>,
    pub(super) gather: Gather,
}

impl PendingRequest {
    /// Seed an open request from a caller's dispatch
    ///
    /// Returns the entry plus whatever the outbound message needs to carry.
    pub(super) fn open(id: CorrelationId, request: DispatchRequest) -> (Self, Outbound) {
        let (gather, outbound) = match request {
            DispatchRequest::ShardStats { reply } => (
                Gather::ShardStats {
                    responses: Vec::new(),
                    reply,
                },
                Outbound::ShardStats,
            ),
            DispatchRequest::Reload { directive, reply } => (
                Gather::Reload {
                    responses: Vec::new(),
                    reply,
                },
                Outbound::Reload(directive),
            ),
            DispatchRequest::GuildFetch { guild_id, reply } => (
                Gather::GuildFetch {
                    responses: Vec::new(),
                    reply,
                },
                Outbound::GuildFetch(guild_id),
            ),
        };

        let pending = Self {
            id,
            created_at: Instant::now(),
            required_override: None,
            gather,
        };
        (pending, outbound)
    }

    pub fn kind(&self) -> RequestKind {
        match &self.gather {
            Gather::ShardStats { .. } => RequestKind::ShardStats,
            Gather::Reload { .. } => RequestKind::Reload,
            Gather::GuildFetch { .. } => RequestKind::GuildFetch,
        }
    }

    /// Number of responses accumulated so far
    pub fn received(&self) -> usize {
        match &self.gather {
            Gather::ShardStats { responses, .. } => responses.len(),
            Gather::Reload { responses, .. } => responses.len(),
            Gather::GuildFetch { responses, .. } => responses.len(),
        }
    }

    /// Origins in arrival order
    pub fn origins(&self) -> Vec<ProcessId> {
        match &self.gather {
            Gather::ShardStats { responses, .. } => responses.iter().map(|r| r.origin_id).collect(),
            Gather::Reload { responses, .. } => responses.iter().map(|r| r.origin_id).collect(),
            Gather::GuildFetch { responses, .. } => responses.iter().map(|r| r.origin_id).collect(),
        }
    }

    pub(super) fn push(&mut self, origin_id: ProcessId, payload: ResponsePayload) -> Result<usize, ResponsePayload> {
        match (&mut self.gather, payload) {
            (Gather::ShardStats { responses, .. }, ResponsePayload::ShardStats(data)) => {
                responses.push(Response::new(origin_id, data));
                Ok(responses.len())
            }
            (Gather::Reload { responses, .. }, ResponsePayload::Reload(data)) => {
                responses.push(Response::new(origin_id, data));
                Ok(responses.len())
            }
            (Gather::GuildFetch { responses, .. }, ResponsePayload::GuildFetch(data)) => {
                responses.push(Response::new(origin_id, data));
                Ok(responses.len())
            }
            (_, payload) => Err(payload),
        }
    }

    /// Settle with an error, whatever the kind
    pub fn fail(self, err: CoordError) {
        debug!(id = %self.id, kind = %self.kind(), error = %err, "PendingRequest::fail: called");
        // A dropped receiver means the caller stopped waiting; nothing to do
        match self.gather {
            Gather::ShardStats { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Gather::Reload { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Gather::GuildFetch { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// What the outbound request message must carry
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Outbound {
    ShardStats,
    Reload(crate::domain::ReloadDirective),
    GuildFetch(crate::domain::GuildId),
}

impl Outbound {
    pub(super) fn into_envelope(self, id: CorrelationId, origin_id: ProcessId) -> Envelope {
        match self {
            Outbound::ShardStats => Envelope::ShardStatsRequest { id, origin_id },
            Outbound::Reload(data) => Envelope::ReloadRequest { id, origin_id, data },
            Outbound::GuildFetch(data) => Envelope::GuildFetchRequest { id, origin_id, data },
        }
    }
}

/// Result of appending a response to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// No open request with that ID (late or foreign response)
    Unknown,
    /// The response kind does not match the open request
    KindMismatch { expected: RequestKind, got: RequestKind },
    Appended { received: usize },
}

/// Process-local mapping from correlation ID to pending request
///
/// Owned by the coordinator task; every mutation happens on its single
/// message-processing path.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new open request
    ///
    /// If the ID is already open the request is handed back untouched so the
    /// caller can fail it.
    pub fn create(&mut self, request: PendingRequest) -> Result<(), Box<PendingRequest>> {
        if self.pending.contains_key(&request.id) {
            return Err(Box::new(request));
        }
        debug!(id = %request.id, kind = %request.kind(), "CorrelationRegistry::create: opened");
        self.pending.insert(request.id.clone(), request);
        Ok(())
    }

    /// Append a response to its open request; never creates an entry
    pub fn append(&mut self, id: &CorrelationId, origin_id: ProcessId, payload: ResponsePayload) -> AppendOutcome {
        let Some(pending) = self.pending.get_mut(id) else {
            return AppendOutcome::Unknown;
        };
        let expected = pending.kind();
        match pending.push(origin_id, payload) {
            Ok(received) => AppendOutcome::Appended { received },
            Err(payload) => AppendOutcome::KindMismatch {
                expected,
                got: payload.kind(),
            },
        }
    }

    pub fn get(&self, id: &CorrelationId) -> Option<&PendingRequest> {
        self.pending.get(id)
    }

    /// Remove and return an entry
    pub fn take(&mut self, id: &CorrelationId) -> Option<PendingRequest> {
        self.pending.remove(id)
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Open correlation IDs, oldest first
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut open: Vec<&PendingRequest> = self.pending.values().collect();
        open.sort_by_key(|p| p.created_at);
        open.into_iter().map(|p| p.id.clone()).collect()
    }

    /// Remove every entry (coordinator shutdown)
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.pending.drain().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::messages::CoordResult;
    use super::*;
    use tokio::sync::oneshot;

    type StatsRx = oneshot::Receiver<CoordResult<Vec<Response<ShardStatsReport>>>>;

    fn open_stats(id: &str) -> (PendingRequest, StatsRx) {
        let (reply, rx) = oneshot::channel();
        let (pending, _) = PendingRequest::open(CorrelationId::from_string(id), DispatchRequest::ShardStats { reply });
        (pending, rx)
    }

    fn open_reload(id: &str) -> PendingRequest {
        let (reply, _rx) = oneshot::channel();
        let directive = crate::domain::ReloadDirective::new(crate::domain::ReloadTarget::Utils, "");
        PendingRequest::open(CorrelationId::from_string(id), DispatchRequest::Reload { directive, reply }).0
    }

    #[test]
    fn test_create_and_take() {
        let mut registry = CorrelationRegistry::new();
        let (pending, _rx) = open_stats("a");
        registry.create(pending).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&CorrelationId::from_string("a")));

        let taken = registry.take(&CorrelationId::from_string("a")).unwrap();
        assert_eq!(taken.kind(), RequestKind::ShardStats);
        assert!(registry.is_empty());
        assert!(registry.take(&CorrelationId::from_string("a")).is_none());
    }

    #[test]
    fn test_create_duplicate_hands_request_back() {
        let mut registry = CorrelationRegistry::new();
        let (first, _rx1) = open_stats("dup");
        let (second, mut rx2) = open_stats("dup");
        registry.create(first).unwrap();

        let rejected = registry.create(second).unwrap_err();
        let id = rejected.id.clone();
        rejected.fail(CoordError::DuplicateId(id));

        assert_eq!(registry.len(), 1);
        assert!(matches!(rx2.try_recv().unwrap(), Err(CoordError::DuplicateId(_))));
    }

    #[test]
    fn test_append_to_unknown_id_is_noop() {
        let mut registry = CorrelationRegistry::new();
        let (pending, _rx) = open_stats("open");
        registry.create(pending).unwrap();

        let outcome = registry.append(&CorrelationId::from_string("gone"), ProcessId(1), ResponsePayload::Reload(true));

        assert_eq!(outcome, AppendOutcome::Unknown);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&CorrelationId::from_string("gone")));
        assert_eq!(registry.get(&CorrelationId::from_string("open")).unwrap().received(), 0);
    }

    #[test]
    fn test_append_kind_mismatch_leaves_entry_untouched() {
        let mut registry = CorrelationRegistry::new();
        registry.create(open_reload("r")).unwrap();

        let outcome = registry.append(&CorrelationId::from_string("r"), ProcessId(1), ResponsePayload::GuildFetch(None));

        assert_eq!(
            outcome,
            AppendOutcome::KindMismatch {
                expected: RequestKind::Reload,
                got: RequestKind::GuildFetch
            }
        );
        assert_eq!(registry.get(&CorrelationId::from_string("r")).unwrap().received(), 0);
    }

    #[test]
    fn test_append_is_append_only() {
        let mut registry = CorrelationRegistry::new();
        registry.create(open_reload("r")).unwrap();
        let id = CorrelationId::from_string("r");

        for (n, origin) in [3, 1, 2].into_iter().enumerate() {
            let outcome = registry.append(&id, ProcessId(origin), ResponsePayload::Reload(true));
            assert_eq!(outcome, AppendOutcome::Appended { received: n + 1 });
        }
        assert_eq!(
            registry.get(&id).unwrap().origins(),
            vec![ProcessId(3), ProcessId(1), ProcessId(2)]
        );
    }

    #[test]
    fn test_ids_oldest_first_and_drain() {
        let mut registry = CorrelationRegistry::new();
        registry.create(open_reload("first")).unwrap();
        registry.create(open_reload("second")).unwrap();
        assert_eq!(registry.ids()[0], CorrelationId::from_string("first"));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_envelope_ignores_requests() {
        let request = Envelope::ShardStatsRequest {
            id: CorrelationId::from_string("x"),
            origin_id: ProcessId(0),
        };
        assert!(ResponsePayload::from_envelope(request).is_none());

        let response = Envelope::ReloadResponse {
            id: CorrelationId::from_string("x"),
            origin_id: ProcessId(2),
            data: false,
        };
        let (id, origin, payload) = ResponsePayload::from_envelope(response).unwrap();
        assert_eq!(id.as_str(), "x");
        assert_eq!(origin, ProcessId(2));
        assert_eq!(payload, ResponsePayload::Reload(false));
    }
}
