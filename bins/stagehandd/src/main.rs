// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stagehand Daemon (stagehandd)
//!
//! Loads the runtime config, submits the bundle requests given on the command
//! line, and ticks the orchestrator against a simulated host until every run
//! has finished or the process is interrupted.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use stagehand_config::ConfigService;
use stagehand_config_fs::FsConfigStore;
use stagehand_core::{Direction, Orchestrator, PipelineEvent, TransferMode};
use stagehand_sched::Scheduler;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod host;

use host::SimulatedHost;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Milliseconds between orchestrator ticks (overrides the config file)
    #[clap(short, long)]
    tick_interval: Option<u64>,

    /// Bundles to load additively, in order
    #[clap(long = "load", value_name = "BUNDLE")]
    loads: Vec<String>,

    /// Bundle to load exclusively after the additive loads
    #[clap(long, value_name = "BUNDLE")]
    exclusive: Option<String>,

    /// Bundles to unload
    #[clap(long = "unload", value_name = "BUNDLE")]
    unloads: Vec<String>,

    /// Extra core bundles that exclusive loads keep
    #[clap(long = "core", value_name = "BUNDLE")]
    core: Vec<String>,

    /// Simulated time per bundle transfer, in milliseconds
    #[clap(long, default_value_t = 50)]
    transfer_ms: u64,

    /// Bundles whose simulated transfer fails
    #[clap(long = "fail", value_name = "BUNDLE")]
    failing: Vec<String>,

    /// Stop after this many ticks even if work remains
    #[clap(long)]
    max_ticks: Option<u64>,

    /// Directory holding runtime.json (defaults to the platform config dir)
    #[clap(long)]
    config_dir: Option<PathBuf>,

    /// Write the effective runtime config back to the config directory
    #[clap(long)]
    save_config: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    info!("Starting Stagehand daemon (stagehandd)...");

    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    }
    .context("opening config store")?;
    let service = ConfigService::new(store);
    let mut config = service.load_runtime().context("loading runtime config")?;
    if let Some(ms) = args.tick_interval {
        config.tick_interval_ms = ms;
    }
    config.core_bundles.extend(args.core.iter().cloned());
    config.validate().context("invalid runtime config")?;
    if args.save_config {
        service.save_runtime(&config).context("saving runtime config")?;
        info!(path = %service.store().base().display(), "runtime config saved");
    }
    info!(
        tick_ms = config.tick_interval_ms,
        settle_ms = config.settle_delay_ms,
        transfer_interval_ms = config.transfer_interval_ms,
        core = ?config.core_bundles,
        "runtime config"
    );

    let host = SimulatedHost::new(
        Duration::from_millis(args.transfer_ms),
        args.failing.iter().cloned(),
    );
    let mut orchestrator = Orchestrator::new(config.settings(), host);
    let events = tokio::spawn(log_events(orchestrator.subscribe_events()));

    submit(&mut orchestrator, &args);

    let mut scheduler = Scheduler::new(config.tick_interval())?;
    if let Some(max) = args.max_ticks {
        scheduler = scheduler.with_tick_budget(max);
    }
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let reason = scheduler.run(&mut orchestrator, shutdown).await?;

    for direction in [Direction::Load, Direction::Unload] {
        orchestrator.cancel(direction);
    }
    let summary = json!({
        "stop_reason": format!("{reason:?}"),
        "ticks": scheduler.tick_count(),
        "loaded": orchestrator.loaded().iter().map(|b| b.as_str()).collect::<Vec<_>>(),
        "overrides": orchestrator.stack().folded(),
        "modes": orchestrator
            .stack()
            .modes()
            .iter()
            .map(|m| json!({ "name": m.name, "priority": m.priority }))
            .collect::<Vec<_>>(),
    });
    info!(summary = %serde_json::to_string_pretty(&summary)?, "final state");

    drop(orchestrator);
    events.await.context("event logger task failed")?;
    Ok(())
}

fn submit(orchestrator: &mut Orchestrator, args: &Args) {
    for bundle in &args.loads {
        orchestrator.request_load(bundle.as_str(), TransferMode::Additive);
    }
    if let Some(bundle) = &args.exclusive {
        orchestrator.request_load(bundle.as_str(), TransferMode::Exclusive);
    }
    for bundle in &args.unloads {
        orchestrator.request_unload(bundle.as_str());
    }
}

async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::PhaseChanged { direction, phase }) => {
                debug!(%direction, %phase, "phase");
            }
            Ok(PipelineEvent::Started { direction }) => info!(%direction, "run started"),
            Ok(PipelineEvent::Stopped {
                direction,
                cancelled,
            }) => info!(%direction, cancelled, "run stopped"),
            Ok(PipelineEvent::PreTransfer { direction, bundle }) => {
                debug!(%direction, %bundle, "pre-transfer");
            }
            Ok(PipelineEvent::PostTransfer { direction, bundle }) => {
                info!(%direction, %bundle, "transferred");
            }
            Ok(PipelineEvent::TransferFailed {
                direction,
                bundle,
                reason,
            }) => warn!(%direction, %bundle, %reason, "transfer failed"),
            Err(RecvError::Lagged(missed)) => warn!(missed, "event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
