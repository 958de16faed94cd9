//! One promotion decision cycle.
//!
//! `Idle -> Reconciling -> Evaluating -> Creating`, ending in one of the
//! [`CycleOutcome`] variants. Only the creating step touches remote state or
//! appends to the ledger.

pub mod poll;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::correlator::Correlator;
use crate::errors::{CycleError, LedgerError};
use crate::ledger::{Ledger, LedgerStore, ReconcileReport, Reconciler};
use crate::oracle::{Judgment, ManualClosePolicy};
use crate::sequence::{ItemContent, SequenceStore};
use crate::tracker::{ItemId, NewWorkItem, RemoteWorkItem, TrackerClient};

/// What the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub issues_dir: PathBuf,
    pub marker_label: String,
    pub assignees: Vec<String>,
    pub manual_close: ManualClosePolicy,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reconciling,
    Evaluating,
    Creating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new item was created and recorded.
    Created { index: u32, item: RemoteWorkItem },
    /// Dry run: this file would have been promoted.
    WouldCreate { index: u32, title: String },
    /// The in-flight item is not done yet.
    Waiting { index: u32, item: ItemId },
    /// Every file has been promoted.
    Exhausted,
    /// Advancement needs a human.
    Halted { reason: String },
}

impl CycleOutcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, CycleOutcome::Halted { .. })
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Created { index, item } => {
                write!(f, "Created {} for file {:03}: {}", item.id, index, item.title)
            }
            CycleOutcome::WouldCreate { index, title } => {
                write!(f, "Would create file {:03}: {}", index, title)
            }
            CycleOutcome::Waiting { index, item } => {
                write!(f, "Waiting on {} (file {:03})", item, index)
            }
            CycleOutcome::Exhausted => write!(f, "Queue exhausted, nothing left to promote"),
            CycleOutcome::Halted { reason } => write!(f, "Halted: {}", reason),
        }
    }
}

pub struct PromotionController {
    tracker: Arc<dyn TrackerClient>,
    correlator: Correlator,
    ledger: LedgerStore,
    settings: ControllerSettings,
    phase: Phase,
}

impl PromotionController {
    pub fn new(
        tracker: Arc<dyn TrackerClient>,
        correlator: Correlator,
        ledger: LedgerStore,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            tracker,
            correlator,
            ledger,
            settings,
            phase: Phase::Idle,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "controller phase");
        self.phase = phase;
    }

    /// Reconcile only, persisting the result. Used by `sync`.
    pub async fn sync(&mut self) -> Result<(Ledger, ReconcileReport), CycleError> {
        self.enter(Phase::Reconciling);
        let result = self.reconcile().await;
        self.enter(Phase::Idle);
        result
    }

    /// Run one full decision cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let outcome = self.cycle().await;
        self.enter(Phase::Idle);
        match &outcome {
            Ok(CycleOutcome::Halted { reason }) => warn!(%reason, "promotion halted"),
            Ok(other) => info!(outcome = %other, "cycle finished"),
            Err(e) => warn!(error = %e, "cycle failed"),
        }
        outcome
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        self.enter(Phase::Reconciling);
        let (mut ledger, report) = match self.reconcile().await {
            Ok(reconciled) => reconciled,
            Err(CycleError::Ledger(LedgerError::SingleFlightViolation { indices })) => {
                return Ok(CycleOutcome::Halted {
                    reason: format!(
                        "more than one item is in flight (files {}); close or relabel the extras",
                        join_indices(&indices)
                    ),
                });
            }
            Err(e) => return Err(e),
        };

        self.enter(Phase::Evaluating);
        if let Some(record) = ledger.in_flight() {
            let index = record.file_index;
            if report.is_missing_remote(index) {
                return Ok(CycleOutcome::Halted {
                    reason: format!(
                        "remote item {} for file {:03} no longer exists",
                        record.remote_item_id, index
                    ),
                });
            }

            let assessment = report.assessments.get(&index);
            match assessment.map(|a| a.judgment) {
                Some(Judgment::Blocked) => {
                    let reason = match assessment.and_then(|a| a.evidence.as_ref()) {
                        Some(artifact) => format!(
                            "{} (file {:03}) is closed but its change {} is {}",
                            record.remote_item_id, index, artifact.id, artifact.merge_state
                        ),
                        None => format!(
                            "{} (file {:03}) was closed without a linked change and needs review",
                            record.remote_item_id, index
                        ),
                    };
                    return Ok(CycleOutcome::Halted { reason });
                }
                _ => {
                    return Ok(CycleOutcome::Waiting {
                        index,
                        item: record.remote_item_id.clone(),
                    });
                }
            }
        }

        self.enter(Phase::Creating);
        let store = SequenceStore::open(&self.settings.issues_dir)?;
        let next = match ledger.last_completed_index() {
            Some(last) => store.next_index_after(last),
            None => store.first_index(),
        };
        let Some(index) = next else {
            info!(last = ?ledger.last_completed_index(), "no work-item file left to promote");
            return Ok(CycleOutcome::Exhausted);
        };

        let file = store.file_for(index)?;
        let content = ItemContent::from_file(&file)?;

        if self.settings.dry_run {
            return Ok(CycleOutcome::WouldCreate {
                index,
                title: content.title,
            });
        }

        let labels = self
            .tracker
            .ensure_labels(&item_labels(&self.settings.marker_label, &content.labels))
            .await?;
        let request = NewWorkItem {
            title: content.title,
            body: content.body,
            labels,
            assignees: self.settings.assignees.clone(),
        };

        info!(index, title = %request.title, "creating work item");
        let item = self.tracker.create_item(&request).await?;

        // The remote item exists from here on; if the save fails the next
        // reconciliation imports it.
        ledger.append(index, item.id.clone(), item.created_at)?;
        self.ledger.save(&ledger)?;

        Ok(CycleOutcome::Created { index, item })
    }

    async fn reconcile(&self) -> Result<(Ledger, ReconcileReport), CycleError> {
        let current = self.ledger.load()?;
        let reconciler = Reconciler::new(
            self.tracker.as_ref(),
            &self.correlator,
            self.settings.manual_close,
            &self.settings.marker_label,
        );
        let (ledger, report) = reconciler.reconcile(&current).await?;

        if report.changed && !self.settings.dry_run {
            self.ledger.save(&ledger)?;
        }
        Ok((ledger, report))
    }
}

/// Marker label first, then the file's own labels, without
/// case-insensitive duplicates.
pub fn item_labels(marker: &str, extra: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in std::iter::once(marker).chain(extra.iter().map(String::as_str)) {
        let label = label.trim();
        if !label.is_empty() && !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            labels.push(label.to_string());
        }
    }
    labels
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|i| format!("{:03}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
