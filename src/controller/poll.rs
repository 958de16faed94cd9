//! Continuous mode: run cycles back to back with a fixed sleep between them.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{CycleOutcome, PromotionController};
use crate::errors::CycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Stop after this many cycles. `None` runs until shutdown.
    pub max_cycles: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub cycles: u32,
    pub failures: u32,
    pub last: Option<CycleOutcome>,
}

/// Run cycles until shutdown is signalled, `max_cycles` is reached, or a
/// permanent error occurs.
///
/// A cycle in progress always runs to completion; the shutdown signal is
/// only observed between cycles.
pub async fn run_continuous(
    controller: &mut PromotionController,
    options: PollOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<PollSummary, CycleError> {
    let mut summary = PollSummary::default();
    info!(interval_secs = options.interval.as_secs(), "starting continuous promotion");

    loop {
        summary.cycles += 1;
        match controller.run_cycle().await {
            Ok(outcome) => summary.last = Some(outcome),
            Err(e) if e.is_permanent() => {
                error!(error = %e, "permanent failure, stopping");
                return Err(e);
            }
            Err(e) => {
                summary.failures += 1;
                warn!(error = %e, "cycle failed, retrying next poll");
            }
        }

        if options.max_cycles.is_some_and(|max| summary.cycles >= max) {
            break;
        }
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender also ends the loop.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(options.interval) => {}
        }
    }

    info!(cycles = summary.cycles, failures = summary.failures, "stopped continuous promotion");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerSettings;
    use crate::correlator::Correlator;
    use crate::errors::TrackerError;
    use crate::ledger::LedgerStore;
    use crate::oracle::ManualClosePolicy;
    use crate::tracker::memory::{MemoryTracker, Operation};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn controller(tracker: Arc<MemoryTracker>, dir: &TempDir) -> PromotionController {
        let issues = dir.path().join("issues");
        std::fs::create_dir_all(&issues).unwrap();
        std::fs::write(issues.join("001-a.md"), "First item").unwrap();
        PromotionController::new(
            tracker,
            Correlator::default(),
            LedgerStore::open(&dir.path().join(".promoter")).unwrap(),
            ControllerSettings {
                issues_dir: issues,
                marker_label: "auto-generated".into(),
                assignees: Vec::new(),
                manual_close: ManualClosePolicy::Trust,
                dry_run: false,
            },
        )
    }

    fn fast(max_cycles: Option<u32>) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(1),
            max_cycles,
        }
    }

    #[tokio::test]
    async fn test_runs_until_max_cycles() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(MemoryTracker::new());
        let mut controller = controller(tracker.clone(), &dir);
        let (_tx, rx) = watch::channel(false);

        let summary = run_continuous(&mut controller, fast(Some(3)), rx).await.unwrap();
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failures, 0);
        assert!(matches!(summary.last, Some(CycleOutcome::Waiting { index: 1, .. })));
        assert_eq!(tracker.calls(Operation::Create), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_next_poll() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(MemoryTracker::new());
        tracker.fail_next(Operation::ListItems, TrackerError::Unavailable("503".into()));
        let mut controller = controller(tracker.clone(), &dir);
        let (_tx, rx) = watch::channel(false);

        let summary = run_continuous(&mut controller, fast(Some(2)), rx).await.unwrap();
        assert_eq!(summary.failures, 1);
        assert!(matches!(summary.last, Some(CycleOutcome::Created { index: 1, .. })));
    }

    #[tokio::test]
    async fn test_permanent_failure_stops() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(MemoryTracker::new());
        tracker.fail_next(Operation::ListItems, TrackerError::Auth("bad token".into()));
        let mut controller = controller(tracker.clone(), &dir);
        let (_tx, rx) = watch::channel(false);

        let err = run_continuous(&mut controller, fast(None), rx).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(tracker.calls(Operation::ListItems), 1);
    }

    #[tokio::test]
    async fn test_shutdown_between_cycles() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(MemoryTracker::new());
        let mut controller = controller(tracker.clone(), &dir);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = run_continuous(&mut controller, fast(None), rx).await.unwrap();
        assert_eq!(summary.cycles, 1);
    }
}
