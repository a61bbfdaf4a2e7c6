use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use collectd_agent::{logging, Agent, AgentSettings, JsonLinesSink};

#[derive(Parser, Debug)]
#[command(name = "collectd-agent")]
#[command(about = "Run collectd-backed monitors under a supervised collectd process")]
struct Args {
    /// Path to the agent settings file (TOML, JSON or YAML)
    #[arg(short, long, default_value = "/etc/collectd-agent/agent.toml")]
    config: PathBuf,

    /// Log filter, e.g. "info" or "debug,collectd=warn" (overrides RUST_LOG)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the collectd bundle directory from the settings file
    #[arg(long)]
    bundle_dir: Option<PathBuf>,

    /// Write monitor data to this file instead of the settings' output
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_level.as_deref())?;

    let mut settings = AgentSettings::load(&args.config)?;
    if let Some(bundle_dir) = args.bundle_dir {
        settings.collectd.bundle_dir = bundle_dir;
    }

    let sink = match args.output.or_else(|| settings.output.clone()) {
        Some(path) => JsonLinesSink::file(&path)
            .with_context(|| format!("failed to open output {}", path.display()))?,
        None => JsonLinesSink::stdout(),
    };

    tracing::info!(
        config = %args.config.display(),
        bundle_dir = %settings.collectd.bundle_dir.display(),
        monitors = settings.monitors.len(),
        "collectd-agent starting"
    );
    let agent = Agent::start(settings, sink).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down gracefully");

    agent.shutdown().await;
    Ok(())
}
