//! shardcoord - scatter-gather coordination across sharded cluster processes
//!
//! CLI entry point. Each invocation boots an in-memory deployment, issues one
//! request through process 0's coordinator (or `--from`), and prints the
//! aggregated result.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use shardcoord::cli::{Cli, Command, OutputFormat, generate_after_help};
use shardcoord::config::Config;
use shardcoord::coordinator::{CoordError, CoordinatorHandle};
use shardcoord::domain::{GuildId, ReloadTarget};
use shardcoord::events::{EventBus, spawn_event_logger};
use shardcoord::sim::SimulatedCluster;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shardcoord")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("shardcoord.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if cli.diagnostics {
        config.coordinator.diagnostics = true;
    }
    if let Some(clusters) = cli.clusters {
        config.simulation.clusters = clusters;
    }
    info!(
        clusters = config.simulation.clusters,
        routing = ?config.coordinator.guild_routing,
        "shardcoord loaded config"
    );

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Config) => {
            debug!("main: matched Config command");
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(command) => run_in_cluster(&config, cli.events, command).await,
        None => {
            debug!("main: no command, printing help");
            Cli::command().after_help(generate_after_help()).print_help()?;
            Ok(())
        }
    }
}

/// Boot the simulated deployment, run one command, then tear it down
async fn run_in_cluster(config: &Config, events_dir: Option<PathBuf>, command: Command) -> Result<()> {
    debug!(?events_dir, "run_in_cluster: called");
    config.simulation.validate().context("Invalid simulation config")?;

    let bus = EventBus::with_default_capacity();
    let logger = match &events_dir {
        Some(dir) => Some(spawn_event_logger(&bus, dir)?),
        None => None,
    };

    let mut cluster = SimulatedCluster::start(&config.simulation, &config.coordinator, &bus)?;
    cluster
        .sync_topology(config.coordinator.request_timeout())
        .await
        .context("Failed to distribute cluster topology")?;
    cluster.spawn_stats_publisher(Duration::from_millis(config.simulation.stats_interval_ms));

    let result = match command {
        Command::Stats { format } => {
            debug!(?format, "run_in_cluster: matched Stats command");
            cmd_stats(primary(&cluster, 0)?, format).await
        }
        Command::Reload {
            target,
            path,
            name,
            options,
            format,
        } => {
            debug!(%target, %path, ?name, "run_in_cluster: matched Reload command");
            cmd_reload(primary(&cluster, 0)?, target, path, name, options, format).await
        }
        Command::Guild { id, from, format } => {
            debug!(id, from, ?format, "run_in_cluster: matched Guild command");
            cmd_guild(primary(&cluster, from)?, id, format).await
        }
        Command::Guilds => {
            debug!("run_in_cluster: matched Guilds command");
            cmd_guilds(&cluster);
            Ok(())
        }
        Command::Config => Ok(()),
    };

    cluster.shutdown().await;
    drop(bus);
    if let Some(logger) = logger {
        logger.await.context("Event logger task failed")?;
        if let Some(dir) = events_dir {
            println!("{} Events written to {}", "✓".green(), dir.display().to_string().cyan());
        }
    }
    result
}

fn primary(cluster: &SimulatedCluster, index: usize) -> Result<&CoordinatorHandle> {
    cluster
        .handle(index)
        .ok_or_else(|| eyre!("No cluster process {} (have {})", index, cluster.len()))
}

async fn cmd_stats(handle: &CoordinatorHandle, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_stats: called");
    let responses = handle.fetch_shard_stats().await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
        return Ok(());
    }

    println!(
        "{:<8} {:>7} {:>7} {:>9} {:>10}",
        "Cluster".bold(),
        "Shards".bold(),
        "Guilds".bold(),
        "RAM (MB)".bold(),
        "Uptime".bold()
    );
    for response in &responses {
        let stats = &response.data.stats;
        println!(
            "{:<8} {:>7} {:>7} {:>9.1} {:>8}ms",
            response.origin_id.to_string().cyan(),
            stats.shard_count,
            stats.guild_count,
            stats.ram_usage_mb,
            stats.uptime_ms
        );
        for shard in &response.data.shards {
            println!(
                "  shard {:<3} {:<12} {:>5}ms {:>4} guilds",
                shard.id,
                shard.status.to_string().green(),
                shard.latency_ms,
                shard.guild_count
            );
        }
    }
    Ok(())
}

async fn cmd_reload(
    handle: &CoordinatorHandle,
    target: ReloadTarget,
    path: String,
    name: Option<String>,
    options: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    debug!(%target, %path, "cmd_reload: called");
    if target.takes_path() && path.is_empty() {
        return Err(eyre!("Reload target '{}' needs a path", target));
    }
    let options = options
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("Module options must be valid JSON")?;

    let (responses, failed) = match handle.broadcast_reload(target, path, name.as_deref(), options).await {
        Ok(responses) => (responses, false),
        Err(CoordError::ReloadFailed { responses }) => (responses, true),
        Err(e) => return Err(e.into()),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
    } else {
        for response in &responses {
            let mark = if response.data { "✓".green() } else { "✗".red() };
            println!("{} cluster {} reloaded {}", mark, response.origin_id.to_string().cyan(), target);
        }
    }

    if failed {
        let failures = responses.iter().filter(|r| !r.data).count();
        return Err(eyre!("Reload failed on {} of {} processes", failures, responses.len()));
    }
    Ok(())
}

async fn cmd_guild(handle: &CoordinatorHandle, guild_id: GuildId, format: OutputFormat) -> Result<()> {
    debug!(guild_id, ?format, "cmd_guild: called");
    let guild = handle.fetch_guild(guild_id).await?;

    match (guild, format) {
        (Some(guild), OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&guild)?),
        (None, OutputFormat::Json) => println!("null"),
        (Some(guild), OutputFormat::Text) => {
            println!("{} {}", guild.name.bold(), guild.id.to_string().dimmed());
            println!("  shard:    {}", guild.shard_id);
            println!("  owner:    {}", guild.owner_id);
            println!("  members:  {}{}", guild.member_count, if guild.large { " (large)" } else { "" });
            println!("  roles:    {}", guild.roles.len());
            println!("  channels: {}", guild.channels.len());
        }
        (None, OutputFormat::Text) => println!("{} Guild {} not found on any process", "✗".red(), guild_id),
    }
    Ok(())
}

fn cmd_guilds(cluster: &SimulatedCluster) {
    debug!(processes = cluster.len(), "cmd_guilds: called");
    for index in 0..cluster.len() {
        if let Some(process) = cluster.process(index) {
            println!(
                "cluster {} shards {:?}",
                process.process_id().to_string().cyan(),
                process.shard_ids()
            );
            for guild_id in process.guild_ids() {
                println!("  {}", guild_id);
            }
        }
    }
}
