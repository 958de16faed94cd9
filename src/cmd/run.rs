//! Promotion cycles: `promoter run` and `promoter watch`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use promoter::config::Config;
use promoter::controller::poll::{PollOptions, run_continuous};
use promoter::controller::{CycleOutcome, PromotionController};
use promoter::correlator::Correlator;
use promoter::ledger::LedgerStore;

use super::exit_code;

pub fn build_controller(config: &Config, dry_run: bool) -> Result<PromotionController> {
    let tracker = config.build_tracker()?;
    let store = LedgerStore::open(config.state_dir()).context("Failed to open ledger")?;
    Ok(PromotionController::new(
        tracker,
        Correlator::new(config.correlation_config()),
        store,
        config.controller_settings(dry_run),
    ))
}

pub fn print_outcome(outcome: &CycleOutcome) {
    let line = outcome.to_string();
    let styled = match outcome {
        CycleOutcome::Created { .. } => console::style(line).green(),
        CycleOutcome::WouldCreate { .. } => console::style(line).cyan(),
        CycleOutcome::Waiting { .. } => console::style(line).yellow(),
        CycleOutcome::Exhausted => console::style(line).dim(),
        CycleOutcome::Halted { .. } => console::style(line).red().bold(),
    };
    println!("{}", styled);
}

pub async fn cmd_run(project_dir: &Path, dry_run: bool) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let mut controller = build_controller(&config, dry_run)?;
    let outcome = controller
        .run_cycle()
        .await
        .context("Promotion cycle failed")?;

    print_outcome(&outcome);
    Ok(exit_code(Some(&outcome)))
}

pub async fn cmd_watch(
    project_dir: &Path,
    interval: Option<u64>,
    max_cycles: Option<u32>,
) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let mut controller = build_controller(&config, false)?;
    let options = PollOptions {
        interval: interval
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.poll_interval()),
        max_cycles,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for interrupts");
                // Keep the sender alive so the poll loop is not stopped.
                std::future::pending::<()>().await;
            }
        }
    });

    let summary = run_continuous(&mut controller, options, shutdown_rx)
        .await
        .context("Continuous promotion stopped")?;

    if let Some(outcome) = &summary.last {
        print_outcome(outcome);
    }
    println!(
        "{} cycle(s), {} failed",
        summary.cycles,
        summary.failures
    );
    Ok(exit_code(summary.last.as_ref()))
}
