//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{GuildId, ReloadTarget};

/// shardcoord - scatter-gather coordination across sharded cluster processes
#[derive(Parser)]
#[command(
    name = "shardcoord",
    about = "Scatter-gather request coordination across sharded bot cluster processes",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Persist cluster events as JSONL under this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub events: Option<PathBuf>,

    /// Log every message each coordinator receives
    #[arg(long, global = true)]
    pub diagnostics: bool,

    /// Override the number of simulated cluster processes
    #[arg(long, global = true)]
    pub clusters: Option<u32>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gather shard statistics from every process
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Broadcast a reload to every process
    Reload {
        /// What to reload (event-listener, command, module, utils, all-commands, ...)
        #[arg(value_name = "TARGET")]
        target: ReloadTarget,

        /// File to reload, for single-file targets
        #[arg(default_value = "")]
        path: String,

        /// Module name, for module reloads
        #[arg(short, long)]
        name: Option<String>,

        /// Module options as a JSON object
        #[arg(short, long, value_name = "JSON")]
        options: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Look a guild up across processes
    Guild {
        /// Guild snowflake
        id: GuildId,

        /// Process the request is issued from
        #[arg(long, default_value = "0")]
        from: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the guilds each simulated process caches
    Guilds,

    /// Print the effective configuration as YAML
    Config,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shardcoord")
        .join("logs")
        .join("shardcoord.log")
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Config search order:\n");
    help.push_str("  --config <PATH>\n");
    help.push_str("  ./.shardcoord.yml\n");
    if let Some(config_dir) = dirs::config_dir() {
        help.push_str(&format!("  {}\n", config_dir.join("shardcoord").join("shardcoord.yml").display()));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for command results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
