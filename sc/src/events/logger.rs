//! Event Logger - persists cluster events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes each event to the
//! log of the process that observed it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use eyre::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::domain::ProcessId;

use super::bus::EventBus;
use super::types::{ClusterEvent, EventLogEntry};

const EVENTS_FILE: &str = "events.jsonl";

fn process_dir(events_dir: &Path, process_id: ProcessId) -> PathBuf {
    events_dir.join(format!("cluster-{}", process_id))
}

/// Event logger that writes events to `{events_dir}/cluster-{id}/events.jsonl`
pub struct EventLogger {
    events_dir: PathBuf,
    writers: HashMap<ProcessId, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(events_dir: impl AsRef<Path>) -> Self {
        let events_dir = events_dir.as_ref().to_path_buf();
        debug!(?events_dir, "EventLogger::new: creating logger");
        Self {
            events_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its process's log file
    pub fn write_event(&mut self, event: &ClusterEvent) -> eyre::Result<()> {
        let process_id = event.process_id();
        debug!(%process_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = match self.writers.entry(process_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let dir = process_dir(&self.events_dir, process_id);
                fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

                let log_path = dir.join(EVENTS_FILE);
                debug!(?log_path, "EventLogger: creating new log file");
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .with_context(|| format!("Failed to open {}", log_path.display()))?;
                entry.insert(BufWriter::new(file))
            }
        };

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Write events until every sender on the bus is gone
    async fn consume(mut self, mut rx: broadcast::Receiver<ClusterEvent>) {
        debug!("EventLogger::consume: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(process_id = %event.process_id(), error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (process_id, mut writer) in self.writers.drain() {
            debug!(%process_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back the events one process logged
pub fn read_process_events(events_dir: impl AsRef<Path>, process_id: ProcessId) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = process_dir(events_dir.as_ref(), process_id).join(EVENTS_FILE);
    debug!(?log_path, "read_process_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path).with_context(|| format!("Failed to read {}", log_path.display()))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_process_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_process_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
///
/// The subscription is taken before this returns, so no event emitted
/// afterwards is missed.
pub fn spawn_event_logger(bus: &EventBus, events_dir: impl AsRef<Path>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let events_dir = events_dir.as_ref();
    fs::create_dir_all(events_dir).with_context(|| format!("Failed to create {}", events_dir.display()))?;
    let logger = EventLogger::new(events_dir);
    let rx = bus.subscribe();
    Ok(tokio::spawn(logger.consume(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RequestKind;
    use crate::domain::CorrelationId;
    use tempfile::tempdir;

    fn fault(process: u32) -> ClusterEvent {
        ClusterEvent::LocalFault {
            process_id: ProcessId(process),
            context: "reload".to_string(),
            message: "failed".to_string(),
        }
    }

    #[test]
    fn test_write_event_creates_process_log() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&fault(2)).unwrap();

        let log_path = temp.path().join("cluster-2").join("events.jsonl");
        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("LocalFault"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_events_split_by_process() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&fault(0)).unwrap();
        logger.write_event(&fault(1)).unwrap();
        logger
            .write_event(&ClusterEvent::RequestCancelled {
                process_id: ProcessId(0),
                id: CorrelationId::from_string("c"),
                kind: RequestKind::ShardStats,
            })
            .unwrap();

        let zero = read_process_events(temp.path(), ProcessId(0)).unwrap();
        let one = read_process_events(temp.path(), ProcessId(1)).unwrap();
        assert_eq!(zero.len(), 2);
        assert_eq!(one.len(), 1);
        assert_eq!(zero[1].event.event_type(), "RequestCancelled");
    }

    #[test]
    fn test_read_missing_process_is_empty() {
        let temp = tempdir().unwrap();
        assert!(read_process_events(temp.path(), ProcessId(7)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_logger_persists_until_bus_closes() {
        let temp = tempdir().unwrap();
        let bus = EventBus::new(16);
        let handle = spawn_event_logger(&bus, temp.path()).unwrap();

        bus.emitter_for(ProcessId(3)).local_fault("reload", "broken");
        drop(bus);
        handle.await.unwrap();

        let entries = read_process_events(temp.path(), ProcessId(3)).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
