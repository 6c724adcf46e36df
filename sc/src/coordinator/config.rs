//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How guild lookups that miss the local cache are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuildRouting {
    /// Always broadcast; the first non-empty answer wins
    Broadcast,
    /// Send to the owning process when shard ownership is known, else broadcast
    Direct,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deadline for every scatter-gather request in milliseconds
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Channel buffer size for caller commands
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Mirror every inbound message to the diagnostics log target and event bus
    #[serde(default)]
    pub diagnostics: bool,

    #[serde(rename = "guild-routing", default = "default_guild_routing")]
    pub guild_routing: GuildRouting,
}

fn default_request_timeout_ms() -> u64 {
    debug!("default_request_timeout_ms: called");
    10_000
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

fn default_guild_routing() -> GuildRouting {
    debug!("default_guild_routing: called");
    GuildRouting::Direct
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            request_timeout_ms: 10_000,
            channel_buffer: 1000,
            diagnostics: false,
            guild_routing: GuildRouting::Direct,
        }
    }
}

impl CoordinatorConfig {
    /// Get the request deadline as a Duration
    pub fn request_timeout(&self) -> Duration {
        debug!(request_timeout_ms = %self.request_timeout_ms, "CoordinatorConfig::request_timeout: called");
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.channel_buffer, 1000);
        assert!(!config.diagnostics);
        assert_eq!(config.guild_routing, GuildRouting::Direct);
    }

    #[test]
    fn test_request_timeout_duration() {
        let config = CoordinatorConfig {
            request_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CoordinatorConfig = serde_yaml::from_str("guild-routing: broadcast\n").unwrap();
        assert_eq!(config.guild_routing, GuildRouting::Broadcast);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.channel_buffer, 1000);
    }
}
