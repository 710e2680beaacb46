//! # Salesloop — Background Sales-Outreach Automation
//!
//! Runs the two background workers over a shared SQLite store:
//! the automation poller (per-customer outreach pipeline) and the task
//! runner (due follow-up emails).
//!
//! Usage:
//!   salesloop                        # Start with ~/.salesloop/config.toml
//!   salesloop --config ./dev.toml    # Custom config file
//!   salesloop --db-path ./dev.db     # Override the database location

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use salesloop_automation::{AutomationEngine, AutomationPoller};
use salesloop_core::traits::{
    UnconfiguredAnalysis, UnconfiguredComposer, UnconfiguredGrading, UnconfiguredMailer,
};
use salesloop_core::SalesloopConfig;
use salesloop_scheduler::{FollowupScheduler, TaskRunner};
use salesloop_store::Store;

#[derive(Parser)]
#[command(
    name = "salesloop",
    version,
    about = "🔁 Salesloop — background sales-outreach automation"
)]
struct Cli {
    /// Config file path (default: ~/.salesloop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "salesloop=debug"
    } else {
        "salesloop=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => SalesloopConfig::load_from(path)?,
        None => SalesloopConfig::load()?,
    };
    let db_path = cli
        .db_path
        .unwrap_or_else(|| PathBuf::from(&config.db_path));

    let store = Arc::new(Store::open(Path::new(&db_path))?);

    // Collaborator stubs: grading, analysis, drafting, and delivery are
    // wired in by the embedding application. Standalone, the daemon runs
    // the queues and reports unconfigured collaborators as job failures.
    let scheduler = Arc::new(FollowupScheduler::new(
        Arc::clone(&store),
        Arc::new(UnconfiguredComposer),
        Arc::new(UnconfiguredMailer),
        Duration::from_secs(config.followup.send_timeout_secs),
    ));
    let engine = Arc::new(AutomationEngine::new(
        Arc::clone(&store),
        Arc::new(UnconfiguredGrading),
        Arc::new(UnconfiguredAnalysis),
        Arc::new(UnconfiguredComposer),
        Arc::clone(&scheduler) as Arc<dyn salesloop_core::traits::FollowupScheduling>,
    ));

    let poller = AutomationPoller::new(
        Arc::clone(&engine),
        Duration::from_secs(config.automation.poll_interval_secs),
    );
    let runner = TaskRunner::new(
        Arc::clone(&scheduler),
        Duration::from_secs(config.followup.poll_interval_secs),
        config.followup.due_batch_size,
    );

    println!("🔁 Salesloop v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:          {}", db_path.display());
    println!(
        "   🤖 Automation poll:   every {}s",
        config.automation.poll_interval_secs
    );
    println!(
        "   ⏰ Follow-up poll:    every {}s (batch {})",
        config.followup.poll_interval_secs, config.followup.due_batch_size
    );
    println!();

    let poller_handle = poller.start();
    let runner_handle = runner.start();

    tokio::signal::ctrl_c().await?;
    println!("\n👋 Shutting down...");
    poller.stop();
    runner.stop();
    let _ = poller_handle.await;
    let _ = runner_handle.await;

    Ok(())
}
