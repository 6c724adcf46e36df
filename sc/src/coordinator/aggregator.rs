//! Response aggregation and settlement
//!
//! A pending request settles exactly once: `settle` and `fail` both take the
//! entry by value, so its reply channel can only fire one time.

use tracing::{debug, warn};

use super::messages::{CoordError, RequestState, Response};
use super::quorum::StatsCache;
use super::registry::{Gather, PendingRequest};

fn sort_by_origin<T>(responses: &mut [Response<T>]) {
    responses.sort_by_key(|r| r.origin_id);
}

impl PendingRequest {
    /// Pin the quorum for a request addressed to a single process
    pub(super) fn with_required(mut self, required: usize) -> Self {
        self.required_override = Some(required);
        self
    }

    /// Responses this request needs, given the current stats snapshot
    ///
    /// A broadcast guild fetch waits on every known process and has no
    /// quorum at all before the process count is known.
    pub fn required(&self, stats: &StatsCache) -> Option<usize> {
        if let Some(required) = self.required_override {
            return Some(required);
        }
        match &self.gather {
            Gather::GuildFetch { .. } => stats.guild_fetch_required(),
            _ => Some(stats.required_responses()),
        }
    }

    /// Whether the request can settle now
    ///
    /// Guild fetches complete on the first non-empty payload, or on empty
    /// answers from the whole quorum when there is one.
    pub fn is_complete(&self, required: Option<usize>) -> bool {
        let quorum_met = required.is_some_and(|required| self.received() >= required);
        match &self.gather {
            Gather::GuildFetch { responses, .. } => responses.iter().any(|r| r.data.is_some()) || quorum_met,
            _ => quorum_met,
        }
    }

    /// Fulfil the caller and report the terminal state
    pub fn settle(self) -> RequestState {
        let id = self.id;
        match self.gather {
            Gather::ShardStats { mut responses, reply } => {
                sort_by_origin(&mut responses);
                debug!(%id, received = responses.len(), "PendingRequest::settle: shard stats resolved");
                let _ = reply.send(Ok(responses));
                RequestState::Resolved
            }
            Gather::Reload { mut responses, reply } => {
                sort_by_origin(&mut responses);
                if responses.iter().all(|r| r.data) {
                    debug!(%id, received = responses.len(), "PendingRequest::settle: reload resolved");
                    let _ = reply.send(Ok(responses));
                    RequestState::Resolved
                } else {
                    let err = CoordError::ReloadFailed { responses };
                    warn!(%id, error = %err, "PendingRequest::settle: reload rejected");
                    let _ = reply.send(Err(err));
                    RequestState::Rejected
                }
            }
            Gather::GuildFetch { responses, reply } => {
                // Arrival order decides which non-empty answer wins
                let found = responses.into_iter().find_map(|r| r.data);
                debug!(%id, found = found.is_some(), "PendingRequest::settle: guild fetch resolved");
                let _ = reply.send(Ok(found));
                RequestState::Resolved
            }
        }
    }
}
