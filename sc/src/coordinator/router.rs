//! Local dispatch: execute inbound requests against this process

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::{ProcessId, ReloadDirective, ReloadTarget};
use crate::events::EventEmitter;
use crate::transport::Envelope;

use super::traits::{ClusterNode, Reloader};

/// Executes request envelopes locally and builds the single reply for each
pub struct LocalRouter {
    process_id: ProcessId,
    node: Arc<dyn ClusterNode>,
    reloader: Arc<dyn Reloader>,
    events: EventEmitter,
}

impl LocalRouter {
    pub fn new(
        process_id: ProcessId,
        node: Arc<dyn ClusterNode>,
        reloader: Arc<dyn Reloader>,
        events: EventEmitter,
    ) -> Self {
        debug!(%process_id, "LocalRouter::new: called");
        Self {
            process_id,
            node,
            reloader,
            events,
        }
    }

    pub fn set_events(&mut self, events: EventEmitter) {
        self.events = events;
    }

    /// Handle a request envelope, returning the reply and where to send it
    ///
    /// Responses and StatsUpdate are not requests and yield `None`.
    pub fn route(&self, envelope: &Envelope) -> Option<(ProcessId, Envelope)> {
        let origin_id = self.process_id;
        match envelope {
            Envelope::ShardStatsRequest { id, origin_id: requester } => {
                debug!(%id, %requester, "LocalRouter::route: shard stats");
                let data = self.node.collect_shard_stats();
                Some((
                    *requester,
                    Envelope::ShardStatsResponse {
                        id: id.clone(),
                        origin_id,
                        data,
                    },
                ))
            }
            Envelope::ReloadRequest {
                id,
                origin_id: requester,
                data,
            } => {
                debug!(%id, %requester, target = %data.target, "LocalRouter::route: reload");
                let data = self.apply_reload(data);
                Some((
                    *requester,
                    Envelope::ReloadResponse {
                        id: id.clone(),
                        origin_id,
                        data,
                    },
                ))
            }
            Envelope::GuildFetchRequest {
                id,
                origin_id: requester,
                data: guild_id,
            } => {
                let data = self.node.guild(*guild_id).map(|guild| guild.snapshot());
                debug!(%id, %requester, guild_id, found = data.is_some(), "LocalRouter::route: guild fetch");
                Some((
                    *requester,
                    Envelope::GuildFetchResponse {
                        id: id.clone(),
                        origin_id,
                        data,
                    },
                ))
            }
            _ => None,
        }
    }

    /// Run a reload directive, containing any failure
    ///
    /// Errors and panics both become `false`, are logged, and are reported on
    /// the event bus.
    pub fn apply_reload(&self, directive: &ReloadDirective) -> bool {
        let reloader = &self.reloader;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let path = directive.path.as_str();
            match directive.target {
                ReloadTarget::EventListener => reloader.reload_event_listener(path),
                ReloadTarget::Command => reloader.reload_command(path),
                ReloadTarget::Module => {
                    reloader.reload_module(path, directive.name.as_deref(), directive.options.as_ref())
                }
                ReloadTarget::Utils => reloader.reload_utils(),
                ReloadTarget::AllCommands => reloader.reload_commands(),
                ReloadTarget::AllStructures => reloader.reload_structures(),
                ReloadTarget::AllHandlers => reloader.reload_handlers(),
                ReloadTarget::AllEventListeners => reloader.reload_all_event_listeners(),
            }
        }));

        let message = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic_message(panic.as_ref()),
        };
        error!(
            process_id = %self.process_id,
            target = %directive.target,
            path = %directive.path,
            %message,
            "LocalRouter::apply_reload: reload failed"
        );
        self.events.local_fault(&format!("reload {}", directive.target), &message);
        false
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterStats, CorrelationId, Guild, GuildId, ShardStatsReport};
    use crate::events::{ClusterEvent, EventBus};
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct FakeNode {
        guilds: Vec<GuildId>,
    }

    impl ClusterNode for FakeNode {
        fn collect_shard_stats(&self) -> ShardStatsReport {
            ShardStatsReport {
                stats: ClusterStats {
                    process_id: ProcessId(5),
                    guild_count: self.guilds.len() as u64,
                    ..Default::default()
                },
                shards: Vec::new(),
            }
        }

        fn guild(&self, guild_id: GuildId) -> Option<Guild> {
            self.guilds
                .contains(&guild_id)
                .then(|| Guild::new(guild_id, "local", 1, 0))
        }
    }

    #[derive(Default)]
    struct RecordingReloader {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingReloader {
        fn record(&self, call: String) -> eyre::Result<()> {
            self.calls.lock().push(call);
            Ok(())
        }
    }

    impl Reloader for RecordingReloader {
        fn reload_event_listener(&self, path: &str) -> eyre::Result<()> {
            self.record(format!("event-listener:{}", path))
        }
        fn reload_command(&self, path: &str) -> eyre::Result<()> {
            if path == "broken" {
                eyre::bail!("syntax error in {}", path);
            }
            if path == "panics" {
                panic!("command loader exploded");
            }
            self.record(format!("command:{}", path))
        }
        fn reload_module(&self, path: &str, name: Option<&str>, options: Option<&Value>) -> eyre::Result<()> {
            self.record(format!("module:{}:{:?}:{}", path, name, options.is_some()))
        }
        fn reload_utils(&self) -> eyre::Result<()> {
            self.record("utils".to_string())
        }
        fn reload_commands(&self) -> eyre::Result<()> {
            self.record("commands".to_string())
        }
        fn reload_structures(&self) -> eyre::Result<()> {
            self.record("structures".to_string())
        }
        fn reload_handlers(&self) -> eyre::Result<()> {
            self.record("handlers".to_string())
        }
        fn reload_all_event_listeners(&self) -> eyre::Result<()> {
            self.record("all-event-listeners".to_string())
        }
    }

    fn router(bus: &EventBus) -> (LocalRouter, Arc<RecordingReloader>) {
        let reloader = Arc::new(RecordingReloader::default());
        let node = Arc::new(FakeNode { guilds: vec![42] });
        let router = LocalRouter::new(ProcessId(5), node, reloader.clone(), bus.emitter_for(ProcessId(5)));
        (router, reloader)
    }

    #[test]
    fn test_shard_stats_reply_goes_to_requester() {
        let bus = EventBus::new(16);
        let (router, _) = router(&bus);
        let request = Envelope::ShardStatsRequest {
            id: CorrelationId::from_string("s-1"),
            origin_id: ProcessId(0),
        };

        let (target, reply) = router.route(&request).unwrap();

        assert_eq!(target, ProcessId(0));
        match reply {
            Envelope::ShardStatsResponse { id, origin_id, data } => {
                assert_eq!(id.as_str(), "s-1");
                assert_eq!(origin_id, ProcessId(5));
                assert_eq!(data.stats.guild_count, 1);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_guild_fetch_hit_and_miss() {
        let bus = EventBus::new(16);
        let (router, _) = router(&bus);
        let fetch = |guild_id| Envelope::GuildFetchRequest {
            id: CorrelationId::from_string("g"),
            origin_id: ProcessId(1),
            data: guild_id,
        };

        let (_, hit) = router.route(&fetch(42)).unwrap();
        let (_, miss) = router.route(&fetch(43)).unwrap();

        assert!(matches!(hit, Envelope::GuildFetchResponse { data: Some(ref g), .. } if g.id == 42));
        assert!(matches!(miss, Envelope::GuildFetchResponse { data: None, .. }));
    }

    #[test]
    fn test_each_target_maps_to_one_hook() {
        let bus = EventBus::new(16);
        let (router, reloader) = router(&bus);

        for target in ReloadTarget::ALL {
            let directive = if target == ReloadTarget::Module {
                ReloadDirective::new(target, "modules/music").with_module("music", Some(serde_json::json!({"hot": true})))
            } else {
                ReloadDirective::new(target, "x")
            };
            assert!(router.apply_reload(&directive), "{} should succeed", target);
        }

        let calls = reloader.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                "event-listener:x",
                "command:x",
                "module:modules/music:Some(\"music\"):true",
                "utils",
                "commands",
                "structures",
                "handlers",
                "all-event-listeners",
            ]
        );
    }

    #[tokio::test]
    async fn test_reload_error_becomes_false_and_is_reported() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (router, _) = router(&bus);

        let ok = router.apply_reload(&ReloadDirective::new(ReloadTarget::Command, "broken"));

        assert!(!ok);
        match rx.recv().await.unwrap() {
            ClusterEvent::LocalFault { process_id, context, message } => {
                assert_eq!(process_id, ProcessId(5));
                assert_eq!(context, "reload command");
                assert!(message.contains("syntax error in broken"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reload_panic_is_contained() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (router, _) = router(&bus);
        let request = Envelope::ReloadRequest {
            id: CorrelationId::from_string("r"),
            origin_id: ProcessId(2),
            data: ReloadDirective::new(ReloadTarget::Command, "panics"),
        };

        let (target, reply) = router.route(&request).unwrap();

        assert_eq!(target, ProcessId(2));
        assert!(matches!(reply, Envelope::ReloadResponse { data: false, .. }));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ClusterEvent::LocalFault { ref message, .. } if message.contains("command loader exploded")));
    }

    #[test]
    fn test_responses_are_not_routed() {
        let bus = EventBus::new(16);
        let (router, _) = router(&bus);
        let response = Envelope::ReloadResponse {
            id: CorrelationId::from_string("r"),
            origin_id: ProcessId(1),
            data: true,
        };
        assert!(router.route(&response).is_none());
    }
}
