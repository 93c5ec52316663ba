use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use voltback::config::{AppConfig, PlatformKind};
use voltback::context::AppContext;
use voltback::core::filter::FilterDecision;
use voltback::core::metrics::{self, MetricsPusher};
use voltback::core::{Orchestrator, WebSocketTunnel};
use voltback::{adapters, logging};

#[derive(Parser)]
#[command(name = "voltback")]
#[command(about = "Back up container volumes through ephemeral worker containers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every eligible volume and print the metrics
    Run(RunArgs),
    /// List discovered volumes with their filter decision
    Volumes,
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, value_enum)]
    platform: Option<PlatformKind>,
}

#[derive(Args, Serialize, Default)]
struct RunArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    target_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    concurrency: Option<usize>,
}

/// CLI flags laid out like the configuration sections they override.
#[derive(Serialize)]
struct Overrides<'a> {
    log: LogOverrides,
    platform: PlatformOverrides,
    backup: &'a RunArgs,
}

#[derive(Serialize)]
struct LogOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<bool>,
}

#[derive(Serialize)]
struct PlatformOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<PlatformKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let no_run_args = RunArgs::default();
    let run_args = match &cli.command {
        Commands::Run(args) => args,
        Commands::Volumes => &no_run_args,
    };
    let overrides = Overrides {
        log: LogOverrides {
            verbose: cli.overrides.verbose,
            json: cli.overrides.json,
        },
        platform: PlatformOverrides {
            kind: cli.overrides.platform,
        },
        backup: run_args,
    };

    let config = AppConfig::new(cli.config.as_deref(), Some(&overrides))?;
    logging::init(&config.log);

    let platform = adapters::get_platform(&config.platform)
        .await
        .context("Failed to set up the orchestrator client")?;
    let tunnel = Arc::new(WebSocketTunnel::new(
        config.platform.url.clone(),
        config.jobs.tunnel_timeout(),
    ));
    let ctx = AppContext::new(config, platform, tunnel);

    match cli.command {
        Commands::Run(_) => run_backups(ctx).await.context("Backup run failed"),
        Commands::Volumes => list_volumes(ctx).await.context("Failed to list volumes"),
    }
}

async fn run_backups(ctx: AppContext) -> Result<()> {
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, tearing down running workers");
            cancel.cancel();
        }
    });

    let push_gateway = ctx.config.metrics.push_gateway_url.clone();
    let summary = Orchestrator::new(ctx).run().await?;

    for (volume, reason) in &summary.failures {
        error!(volume = %volume, error = %reason, "Volume not backed up");
    }

    let lines = summary.metrics();
    println!("{}", metrics::render(&lines));

    if let Some(url) = push_gateway.filter(|u| !u.is_empty()) {
        MetricsPusher::new(&url).push(&lines).await?;
    }

    info!(volumes = lines.len(), "Run complete");
    Ok(())
}

async fn list_volumes(ctx: AppContext) -> Result<()> {
    let entries = Orchestrator::new(ctx).inventory().await?;

    for entry in entries {
        let decision = match entry.decision {
            FilterDecision::Include => "backup".to_string(),
            FilterDecision::Reject(rejection) => format!("ignored: {rejection}"),
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            entry.volume.name, entry.volume.hostname, entry.volume.mountpoint, entry.provider, decision
        );
    }
    Ok(())
}
