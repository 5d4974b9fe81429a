//! conclaved — the Conclave placement daemon.
//!
//! Decides which isolate hosts each component of a composition on one
//! node. The launching of isolates is left to the platform: this binary
//! prints or logs the plan.
//!
//! # Usage
//!
//! ```text
//! conclaved plan --composition shop.toml [--isolates running.json] [--events events.json] [--audit]
//! conclaved run --composition shop.toml --config conclave.toml
//! ```

mod composition;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use conclave_core::ConclaveConfig;
use conclave_placement::{Distribution, NodeComposer, VoteRecord};
use serde::Serialize;
use tracing::{error, info};

use crate::composition::{Composition, load_events, load_isolates};

#[derive(Parser)]
#[command(name = "conclaved", about = "Conclave placement daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute one placement and print it as JSON. Launches nothing.
    Plan {
        /// Composition file (TOML).
        #[arg(long)]
        composition: PathBuf,

        /// Configuration file (TOML). Defaults apply when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Isolates already running on the node (JSON array).
        #[arg(long)]
        isolates: Option<PathBuf>,

        /// Lifecycle events replayed into the criteria first (JSON array).
        #[arg(long)]
        events: Option<PathBuf>,

        /// Include the vote records in the output.
        #[arg(long)]
        audit: bool,
    },
    /// Place a composition, then keep ticking and redistributing until
    /// interrupted.
    Run {
        #[arg(long)]
        composition: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Seconds between two redistributions.
        #[arg(long, default_value = "120")]
        redistribute_interval: u64,
    },
}

#[derive(Serialize)]
struct PlanOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    composition: Option<String>,
    distribution: Distribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<Vec<VoteRecord>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Plan {
            composition,
            config,
            isolates,
            events,
            audit,
        } => plan(&composition, config.as_deref(), isolates.as_deref(), events.as_deref(), audit),
        Command::Run {
            composition,
            config,
            redistribute_interval,
        } => run(&composition, config.as_deref(), redistribute_interval).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,conclave=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConclaveConfig> {
    match path {
        Some(path) => Ok(ConclaveConfig::from_file(path)?),
        None => Ok(ConclaveConfig::default()),
    }
}

fn plan(
    composition: &Path,
    config: Option<&Path>,
    isolates: Option<&Path>,
    events: Option<&Path>,
    audit: bool,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let composition = Composition::from_file(composition)?;
    let composer = NodeComposer::from_config(&config)?;

    if let Some(path) = isolates {
        let running = load_isolates(path)?;
        info!(isolates = running.len(), "running isolates loaded");
        composer.status().store(&running);
    }
    if let Some(path) = events {
        let events = load_events(path)?;
        info!(events = events.len(), "replaying lifecycle events");
        for event in &events {
            composer.distributor().handle_event(event);
        }
    }

    let distribution = composer.instantiate(&composition.components)?;
    let output = PlanOutput {
        composition: composition.name,
        distribution,
        audit: audit.then(|| composer.distributor().history()),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(composition: &Path, config: Option<&Path>, redistribute_interval: u64) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let composition = Composition::from_file(composition)?;
    let composer = Arc::new(NodeComposer::from_config(&config)?);

    info!(
        node = %config.placement.node_name,
        components = composition.components.len(),
        "Conclave daemon starting"
    );
    composer.instantiate(&composition.components)?;
    for line in composer.status().dump().lines() {
        info!(isolate = line, "placement");
    }

    composer.start_ticking();

    let mut redistribution = tokio::time::interval(Duration::from_secs(redistribute_interval.max(1)));
    // The first tick completes immediately.
    redistribution.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = redistribution.tick() => {
                match composer.redistribute() {
                    Ok(delta) if delta.is_empty() => {}
                    Ok(delta) => info!(moved = delta.moved.len(), removed = ?delta.removed, "placement changed"),
                    Err(e) => error!(error = %e, "redistribution failed"),
                }
            }
            result = &mut shutdown => {
                result?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    composer.stop_ticking().await;
    info!("Conclave daemon stopped");
    Ok(())
}
