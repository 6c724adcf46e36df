//! Identity types for cluster processes, guilds and in-flight requests
//!
//! Correlation IDs use the format: `{millis}-{pid}-{cluster}-{seq}`
//! Example: `1760601600000-48213-2-17`

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Chat platform guild snowflake
pub type GuildId = u64;

/// Gateway shard number
pub type ShardId = u32;

/// Identity of one cluster process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Opaque key linking a dispatched request to its aggregated response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing ID string (e.g. one received off the wire)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number portion, if the ID was produced by an [`IdGenerator`]
    pub fn sequence(&self) -> Option<u64> {
        self.0.rsplit('-').next().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-process correlation ID source
///
/// The sequence counter alone guarantees uniqueness within one generator; the
/// timestamp, OS PID and cluster ID keep IDs distinct across restarts and
/// across processes sharing a transport.
#[derive(Debug)]
pub struct IdGenerator {
    process_id: ProcessId,
    pid: u32,
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn new(process_id: ProcessId) -> Self {
        debug!(%process_id, "IdGenerator::new: called");
        Self {
            process_id,
            pid: std::process::id(),
            seq: AtomicU64::new(0),
        }
    }

    /// Produce the next correlation ID
    pub fn next_id(&self) -> CorrelationId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        CorrelationId(format!("{}-{}-{}-{}", millis, self.pid, self.process_id, seq))
    }

    /// Number of IDs handed out so far
    pub fn issued(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}
