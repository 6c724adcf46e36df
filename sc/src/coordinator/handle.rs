//! CoordinatorHandle - caller interface for scatter-gather requests

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::domain::{
    CorrelationId, GuildId, GuildSnapshot, IdGenerator, ProcessId, ReloadDirective, ReloadTarget, ShardStatsReport,
};

use super::messages::{CoordError, CoordRequest, CoordResult, CoordinatorMetrics, DispatchRequest, Response};
use super::traits::ClusterNode;

/// Posts a `Cancel` for its request unless disarmed first
///
/// Dropping a caller's future before the request settles drops this guard.
struct CancelOnDrop {
    tx: mpsc::Sender<CoordRequest>,
    id: Option<CorrelationId>,
}

impl CancelOnDrop {
    fn new(tx: mpsc::Sender<CoordRequest>, id: CorrelationId) -> Self {
        Self { tx, id: Some(id) }
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            debug!(%id, "CancelOnDrop: caller went away, cancelling");
            // Best effort; a full or closed channel leaves it to the deadline
            let _ = self.tx.try_send(CoordRequest::Cancel { id });
        }
    }
}

/// Handle for issuing requests through a running Coordinator
///
/// Cheap to clone. Every request settles exactly once: with the aggregated
/// responses, or with a [`CoordError`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    ids: Arc<IdGenerator>,
    node: Arc<dyn ClusterNode>,
    process_id: ProcessId,
    default_timeout: Duration,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<CoordRequest>,
        ids: Arc<IdGenerator>,
        node: Arc<dyn ClusterNode>,
        process_id: ProcessId,
        default_timeout: Duration,
    ) -> Self {
        debug!(%process_id, ?default_timeout, "CoordinatorHandle::new: called");
        Self {
            tx,
            ids,
            node,
            process_id,
            default_timeout,
        }
    }

    /// Process this handle issues requests from
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Shard statistics from every live process, sorted by origin
    pub async fn fetch_shard_stats(&self) -> CoordResult<Vec<Response<ShardStatsReport>>> {
        self.fetch_shard_stats_within(self.default_timeout).await
    }

    pub async fn fetch_shard_stats_within(&self, timeout: Duration) -> CoordResult<Vec<Response<ShardStatsReport>>> {
        debug!(process_id = %self.process_id, ?timeout, "CoordinatorHandle::fetch_shard_stats: called");
        let (reply, reply_rx) = oneshot::channel();
        self.dispatch(DispatchRequest::ShardStats { reply }, reply_rx, timeout).await
    }

    /// Apply a reload on every process
    ///
    /// Resolves with every response, sorted by origin, only when all of them
    /// report success. Otherwise fails with [`CoordError::ReloadFailed`]
    /// carrying the full sorted set.
    pub async fn broadcast_reload(
        &self,
        target: ReloadTarget,
        path: impl Into<String>,
        name: Option<&str>,
        options: Option<Value>,
    ) -> CoordResult<Vec<Response<bool>>> {
        let mut directive = ReloadDirective::new(target, path);
        match name {
            Some(name) => directive = directive.with_module(name, options),
            None => directive.options = options,
        }
        self.broadcast_reload_directive(directive, self.default_timeout).await
    }

    pub async fn broadcast_reload_directive(
        &self,
        directive: ReloadDirective,
        timeout: Duration,
    ) -> CoordResult<Vec<Response<bool>>> {
        debug!(
            process_id = %self.process_id,
            target = %directive.target,
            path = %directive.path,
            "CoordinatorHandle::broadcast_reload: called"
        );
        let (reply, reply_rx) = oneshot::channel();
        self.dispatch(DispatchRequest::Reload { directive, reply }, reply_rx, timeout)
            .await
    }

    /// Look a guild up wherever it lives
    ///
    /// A guild in this process's cache is answered without any message being
    /// sent.
    pub async fn fetch_guild(&self, guild_id: GuildId) -> CoordResult<Option<GuildSnapshot>> {
        self.fetch_guild_within(guild_id, self.default_timeout).await
    }

    pub async fn fetch_guild_within(&self, guild_id: GuildId, timeout: Duration) -> CoordResult<Option<GuildSnapshot>> {
        debug!(process_id = %self.process_id, guild_id, "CoordinatorHandle::fetch_guild: called");
        if let Some(guild) = self.node.guild(guild_id) {
            debug!(guild_id, "CoordinatorHandle::fetch_guild: local cache hit");
            return Ok(Some(guild.snapshot()));
        }
        let (reply, reply_rx) = oneshot::channel();
        self.dispatch(DispatchRequest::GuildFetch { guild_id, reply }, reply_rx, timeout)
            .await
    }

    /// Current coordinator metrics
    pub async fn metrics(&self) -> CoordResult<CoordinatorMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| CoordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed)
    }

    /// Correlation IDs currently open on this process, oldest first
    pub async fn pending_requests(&self) -> CoordResult<Vec<CorrelationId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::PendingIds { reply_tx })
            .await
            .map_err(|_| CoordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed)
    }

    /// Request shutdown of the Coordinator
    pub async fn shutdown(&self) -> CoordResult<()> {
        debug!(process_id = %self.process_id, "CoordinatorHandle::shutdown: called");
        self.tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| CoordError::ChannelClosed)
    }

    async fn dispatch<T>(
        &self,
        request: DispatchRequest,
        reply_rx: oneshot::Receiver<CoordResult<T>>,
        timeout: Duration,
    ) -> CoordResult<T> {
        let id = self.ids.next_id();
        let guard = CancelOnDrop::new(self.tx.clone(), id.clone());

        self.tx
            .send(CoordRequest::Dispatch {
                id: id.clone(),
                request,
                timeout,
            })
            .await
            .map_err(|_| CoordError::ChannelClosed)?;

        debug!(%id, "CoordinatorHandle::dispatch: waiting for settlement");
        let result = reply_rx.await.map_err(|_| CoordError::ChannelClosed);
        guard.disarm();
        result?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Guild;

    struct OneGuildNode;

    impl ClusterNode for OneGuildNode {
        fn collect_shard_stats(&self) -> ShardStatsReport {
            ShardStatsReport {
                stats: Default::default(),
                shards: Vec::new(),
            }
        }

        fn guild(&self, guild_id: GuildId) -> Option<Guild> {
            (guild_id == 10).then(|| Guild::new(10, "home", 1, 0))
        }
    }

    fn handle(buffer: usize) -> (CoordinatorHandle, mpsc::Receiver<CoordRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        let ids = Arc::new(IdGenerator::new(ProcessId(0)));
        let handle = CoordinatorHandle::new(tx, ids, Arc::new(OneGuildNode), ProcessId(0), Duration::from_secs(1));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_local_guild_short_circuits() {
        let (handle, mut rx) = handle(8);

        let guild = handle.fetch_guild(10).await.unwrap().unwrap();

        assert_eq!(guild.name, "home");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_future_posts_cancel() {
        let (handle, mut rx) = handle(8);

        let fetch = tokio::spawn({
            let handle = handle.clone();
            async move { handle.fetch_shard_stats().await }
        });

        // Holding the request keeps its reply channel open
        let (id, _request) = match rx.recv().await.unwrap() {
            CoordRequest::Dispatch { id, request, .. } => (id, request),
            other => panic!("expected dispatch, got {:?}", other),
        };
        fetch.abort();
        let _ = fetch.await;

        match rx.recv().await.unwrap() {
            CoordRequest::Cancel { id: cancelled } => assert_eq!(cancelled, id),
            other => panic!("expected cancel, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_coordinator_reports_channel_closed() {
        let (handle, rx) = handle(8);
        drop(rx);

        assert!(matches!(handle.fetch_shard_stats().await, Err(CoordError::ChannelClosed)));
        assert!(matches!(handle.metrics().await, Err(CoordError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_reload_directive_carries_module_options() {
        let (handle, mut rx) = handle(8);

        let task = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .broadcast_reload(
                        ReloadTarget::Module,
                        "modules/music",
                        Some("music"),
                        Some(serde_json::json!({"volume": 5})),
                    )
                    .await
            }
        });

        match rx.recv().await.unwrap() {
            CoordRequest::Dispatch {
                request: DispatchRequest::Reload { directive, .. },
                timeout,
                ..
            } => {
                assert_eq!(directive.name.as_deref(), Some("music"));
                assert_eq!(directive.options.unwrap()["volume"], 5);
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("expected reload dispatch, got {:?}", other),
        }
        // Reply sender dropped with the request
        assert!(matches!(task.await.unwrap(), Err(CoordError::ChannelClosed)));
    }
}
