//! Hot-reload directives

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a reload directive applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadTarget {
    /// One event listener file
    EventListener,
    /// One command file
    Command,
    /// One named module, with optional options
    Module,
    /// The utility set
    Utils,
    AllCommands,
    AllStructures,
    AllHandlers,
    AllEventListeners,
}

impl ReloadTarget {
    pub const ALL: [ReloadTarget; 8] = [
        ReloadTarget::EventListener,
        ReloadTarget::Command,
        ReloadTarget::Module,
        ReloadTarget::Utils,
        ReloadTarget::AllCommands,
        ReloadTarget::AllStructures,
        ReloadTarget::AllHandlers,
        ReloadTarget::AllEventListeners,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadTarget::EventListener => "event-listener",
            ReloadTarget::Command => "command",
            ReloadTarget::Module => "module",
            ReloadTarget::Utils => "utils",
            ReloadTarget::AllCommands => "all-commands",
            ReloadTarget::AllStructures => "all-structures",
            ReloadTarget::AllHandlers => "all-handlers",
            ReloadTarget::AllEventListeners => "all-event-listeners",
        }
    }

    /// Whether the directive's path names a single file
    pub fn takes_path(&self) -> bool {
        matches!(
            self,
            ReloadTarget::EventListener | ReloadTarget::Command | ReloadTarget::Module
        )
    }
}

impl fmt::Display for ReloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReloadTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Short names are what operators type in chat-side reload commands
        match s.to_lowercase().as_str() {
            "event-listener" | "event" => Ok(ReloadTarget::EventListener),
            "command" => Ok(ReloadTarget::Command),
            "module" => Ok(ReloadTarget::Module),
            "utils" | "utility-set" => Ok(ReloadTarget::Utils),
            "all-commands" | "commands" => Ok(ReloadTarget::AllCommands),
            "all-structures" | "structures" => Ok(ReloadTarget::AllStructures),
            "all-handlers" | "handlers" => Ok(ReloadTarget::AllHandlers),
            "all-event-listeners" | "events" => Ok(ReloadTarget::AllEventListeners),
            other => Err(format!("Unknown reload target '{}'", other)),
        }
    }
}

/// A reload to apply on every cluster process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadDirective {
    pub target: ReloadTarget,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl ReloadDirective {
    pub fn new(target: ReloadTarget, path: impl Into<String>) -> Self {
        Self {
            target,
            path: path.into(),
            name: None,
            options: None,
        }
    }

    /// Name and options for a module reload
    pub fn with_module(mut self, name: impl Into<String>, options: Option<serde_json::Value>) -> Self {
        self.name = Some(name.into());
        self.options = options;
        self
    }
}
