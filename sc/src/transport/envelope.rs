//! Wire envelope exchanged between cluster processes
//!
//! Every message is a JSON object tagged by `kind`, carrying the correlation
//! `id` (absent on StatsUpdate), the sender's `originId`, and a kind-specific
//! `data` payload.

use serde::{Deserialize, Serialize};

use crate::domain::{CorrelationId, GlobalStats, GuildId, GuildSnapshot, ProcessId, ReloadDirective, ShardStatsReport};

use super::TransportError;

/// Message kinds understood by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "ShardStats-request")]
    ShardStatsRequest,
    #[serde(rename = "ShardStats-response")]
    ShardStatsResponse,
    #[serde(rename = "StatsUpdate")]
    StatsUpdate,
    #[serde(rename = "Reload-request")]
    ReloadRequest,
    #[serde(rename = "Reload-response")]
    ReloadResponse,
    #[serde(rename = "GuildFetch-request")]
    GuildFetchRequest,
    #[serde(rename = "GuildFetch-response")]
    GuildFetchResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ShardStatsRequest => "ShardStats-request",
            MessageKind::ShardStatsResponse => "ShardStats-response",
            MessageKind::StatsUpdate => "StatsUpdate",
            MessageKind::ReloadRequest => "Reload-request",
            MessageKind::ReloadResponse => "Reload-response",
            MessageKind::GuildFetchRequest => "GuildFetch-request",
            MessageKind::GuildFetchResponse => "GuildFetch-response",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inter-process message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    #[serde(rename = "ShardStats-request")]
    ShardStatsRequest {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
    },

    #[serde(rename = "ShardStats-response")]
    ShardStatsResponse {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: ShardStatsReport,
    },

    /// Published out-of-band by the deployment's stats publisher
    #[serde(rename = "StatsUpdate")]
    StatsUpdate {
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: GlobalStats,
    },

    #[serde(rename = "Reload-request")]
    ReloadRequest {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: ReloadDirective,
    },

    #[serde(rename = "Reload-response")]
    ReloadResponse {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: bool,
    },

    #[serde(rename = "GuildFetch-request")]
    GuildFetchRequest {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: GuildId,
    },

    /// `data` is null when the responding process does not hold the guild
    #[serde(rename = "GuildFetch-response")]
    GuildFetchResponse {
        id: CorrelationId,
        #[serde(rename = "originId")]
        origin_id: ProcessId,
        data: Option<GuildSnapshot>,
    },
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::ShardStatsRequest { .. } => MessageKind::ShardStatsRequest,
            Envelope::ShardStatsResponse { .. } => MessageKind::ShardStatsResponse,
            Envelope::StatsUpdate { .. } => MessageKind::StatsUpdate,
            Envelope::ReloadRequest { .. } => MessageKind::ReloadRequest,
            Envelope::ReloadResponse { .. } => MessageKind::ReloadResponse,
            Envelope::GuildFetchRequest { .. } => MessageKind::GuildFetchRequest,
            Envelope::GuildFetchResponse { .. } => MessageKind::GuildFetchResponse,
        }
    }

    pub fn origin_id(&self) -> ProcessId {
        match self {
            Envelope::ShardStatsRequest { origin_id, .. }
            | Envelope::ShardStatsResponse { origin_id, .. }
            | Envelope::StatsUpdate { origin_id, .. }
            | Envelope::ReloadRequest { origin_id, .. }
            | Envelope::ReloadResponse { origin_id, .. }
            | Envelope::GuildFetchRequest { origin_id, .. }
            | Envelope::GuildFetchResponse { origin_id, .. } => *origin_id,
        }
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Envelope::ShardStatsRequest { id, .. }
            | Envelope::ShardStatsResponse { id, .. }
            | Envelope::ReloadRequest { id, .. }
            | Envelope::ReloadResponse { id, .. }
            | Envelope::GuildFetchRequest { id, .. }
            | Envelope::GuildFetchResponse { id, .. } => Some(id),
            Envelope::StatsUpdate { .. } => None,
        }
    }

    /// Whether this message answers a request issued by the receiver
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Envelope::ShardStatsResponse { .. } | Envelope::ReloadResponse { .. } | Envelope::GuildFetchResponse { .. }
        )
    }

    /// Encode as a single JSON line (no trailing newline)
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterStats, ReloadTarget};

    fn id(s: &str) -> CorrelationId {
        CorrelationId::from_string(s)
    }

    #[test]
    fn test_shard_stats_request_serialize() {
        let msg = Envelope::ShardStatsRequest {
            id: id("1-2-3-4"),
            origin_id: ProcessId(3),
        };
        let json = msg.encode().unwrap();
        assert_eq!(json, r#"{"kind":"ShardStats-request","id":"1-2-3-4","originId":3}"#);
    }

    #[test]
    fn test_reload_response_deserialize() {
        let json = r#"{"kind":"Reload-response","id":"abc","originId":2,"data":false}"#;
        let msg = Envelope::decode(json).unwrap();
        assert_eq!(
            msg,
            Envelope::ReloadResponse {
                id: id("abc"),
                origin_id: ProcessId(2),
                data: false,
            }
        );
        assert!(msg.is_response());
        assert_eq!(msg.kind(), MessageKind::ReloadResponse);
    }

    #[test]
    fn test_empty_guild_response_is_null_data() {
        let msg = Envelope::GuildFetchResponse {
            id: id("g"),
            origin_id: ProcessId(1),
            data: None,
        };
        let json = msg.encode().unwrap();
        assert!(json.contains(r#""data":null"#));
        assert_eq!(Envelope::decode(&json).unwrap(), msg);
    }

    #[test]
    fn test_stats_update_has_no_correlation_id() {
        let msg = Envelope::StatsUpdate {
            origin_id: ProcessId(0),
            data: GlobalStats::from_clusters(vec![ClusterStats::default()], 0),
        };
        assert!(msg.correlation_id().is_none());
        assert!(!msg.is_response());
        let json = msg.encode().unwrap();
        assert!(!json.contains(r#""id""#));
    }

    #[test]
    fn test_reload_request_carries_directive() {
        let msg = Envelope::ReloadRequest {
            id: id("r"),
            origin_id: ProcessId(1),
            data: ReloadDirective::new(ReloadTarget::AllCommands, ""),
        };
        let json = msg.encode().unwrap();
        assert!(json.contains(r#""kind":"Reload-request""#));
        assert!(json.contains(r#""target":"all-commands""#));
        assert_eq!(msg.origin_id(), ProcessId(1));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = Envelope::decode(r#"{"kind":"Nope","originId":1}"#).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn test_message_kind_wire_names_match_envelope_tags() {
        let kind_json = serde_json::to_string(&MessageKind::GuildFetchRequest).unwrap();
        assert_eq!(kind_json, r#""GuildFetch-request""#);
        assert_eq!(MessageKind::GuildFetchRequest.as_str(), "GuildFetch-request");
    }
}
