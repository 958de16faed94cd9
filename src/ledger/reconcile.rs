use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use super::{Ledger, LedgerRecord, RecordStatus};
use crate::correlator::Correlator;
use crate::errors::{LedgerError, TrackerError};
use crate::oracle::{self, Judgment, ManualClosePolicy};
use crate::sequence::parse_leading_index;
use crate::tracker::{ChangeArtifact, ItemId, RemoteWorkItem, TrackerClient};

/// Something skipped during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A managed remote item whose title carries no index.
    Unindexed { item: ItemId, title: String },
    /// A ledger record whose remote item no longer exists.
    MissingRemote { index: u32, item: ItemId },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::Unindexed { item, title } => {
                write!(f, "{} has no file index in its title: {}", item, title)
            }
            Anomaly::MissingRemote { index, item } => {
                write!(f, "{} for file {:03} no longer exists", item, index)
            }
        }
    }
}

/// Oracle result for one record's remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub item: ItemId,
    pub judgment: Judgment,
    pub evidence: Option<ChangeArtifact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Judgments made this run, keyed by file index.
    pub assessments: BTreeMap<u32, Assessment>,
    pub anomalies: Vec<Anomaly>,
    /// Indices with more than one remote item, with the ids absorbed as duplicates.
    pub duplicates: BTreeMap<u32, Vec<ItemId>>,
    /// Indices that had no ledger record before this run.
    pub imported: Vec<u32>,
    pub changed: bool,
}

impl ReconcileReport {
    pub fn is_missing_remote(&self, index: u32) -> bool {
        self.anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::MissingRemote { index: i, .. } if *i == index))
    }
}

/// Rebuilds the ledger from the tracker's view of managed items.
pub struct Reconciler<'a> {
    tracker: &'a dyn TrackerClient,
    correlator: &'a Correlator,
    policy: ManualClosePolicy,
    marker: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        tracker: &'a dyn TrackerClient,
        correlator: &'a Correlator,
        policy: ManualClosePolicy,
        marker: &'a str,
    ) -> Self {
        Self {
            tracker,
            correlator,
            policy,
            marker,
        }
    }

    /// Reconcile `ledger` against the tracker and return the refreshed copy.
    ///
    /// The input is never modified. Fails with `SingleFlightViolation` when
    /// the remote state implies more than one item in flight.
    pub async fn reconcile(&self, ledger: &Ledger) -> Result<(Ledger, ReconcileReport), LedgerError> {
        let mut report = ReconcileReport::default();
        let items = self.tracker.list_managed_items(self.marker).await?;
        debug!(count = items.len(), marker = self.marker, "listed managed items");

        let mut by_index: BTreeMap<u32, Vec<RemoteWorkItem>> = BTreeMap::new();
        for item in items {
            match parse_leading_index(&item.title) {
                Some(index) => by_index.entry(index).or_default().push(item),
                None => {
                    warn!(item = %item.id, title = %item.title, "managed item has no index in its title");
                    report.anomalies.push(Anomaly::Unindexed {
                        item: item.id,
                        title: item.title,
                    });
                }
            }
        }

        let mut records = Vec::new();
        let mut seen = BTreeSet::new();

        for (index, mut group) in by_index {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let mut group = group.into_iter();
            let Some(canonical) = group.next() else {
                continue;
            };
            let duplicates: Vec<ItemId> = group.map(|i| i.id).collect();
            if !duplicates.is_empty() {
                warn!(
                    index,
                    canonical = %canonical.id,
                    duplicates = ?duplicates,
                    "absorbing duplicate remote items"
                );
                report.duplicates.insert(index, duplicates.clone());
            }

            let existing = ledger.record(index);
            if existing.is_none() {
                info!(index, item = %canonical.id, "importing remote item into ledger");
                report.imported.push(index);
            } else if let Some(previous) = existing.filter(|r| r.remote_item_id != canonical.id) {
                info!(
                    index,
                    previous = %previous.remote_item_id,
                    current = %canonical.id,
                    "ledger record now points at a different remote item"
                );
            }

            seen.insert(index);
            let mut record = self
                .refresh(index, existing, &canonical, &mut report)
                .await?;
            record.duplicates = duplicates;
            records.push(record);
        }

        // Records the listing no longer shows, e.g. the marker label was removed.
        for record in ledger.records().iter().filter(|r| !seen.contains(&r.file_index)) {
            match self.tracker.get_item(&record.remote_item_id).await {
                Ok(item) => {
                    let refreshed = self
                        .refresh(record.file_index, Some(record), &item, &mut report)
                        .await?;
                    records.push(LedgerRecord {
                        duplicates: record.duplicates.clone(),
                        ..refreshed
                    });
                }
                Err(TrackerError::NotFound(_)) => {
                    warn!(
                        index = record.file_index,
                        item = %record.remote_item_id,
                        "remote item for ledger record no longer exists"
                    );
                    report.anomalies.push(Anomaly::MissingRemote {
                        index: record.file_index,
                        item: record.remote_item_id.clone(),
                    });
                    records.push(record.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let reconciled = Ledger::from_records(records)?;
        report.changed = reconciled != *ledger;
        debug!(
            records = reconciled.records().len(),
            last_completed = ?reconciled.last_completed_index(),
            changed = report.changed,
            "reconciled ledger"
        );
        Ok((reconciled, report))
    }

    /// Derive the record for `index` from its live remote item.
    ///
    /// Completion is sticky: a completed record stays completed while its
    /// item remains closed, and only reverts when the item is reopened.
    async fn refresh(
        &self,
        index: u32,
        existing: Option<&LedgerRecord>,
        item: &RemoteWorkItem,
        report: &mut ReconcileReport,
    ) -> Result<LedgerRecord, LedgerError> {
        let created_at = existing
            .filter(|r| r.remote_item_id == item.id)
            .map(|r| r.created_at)
            .unwrap_or(item.created_at);

        if let Some(record) = existing.filter(|r| r.is_completed() && r.remote_item_id == item.id)
            && !item.is_open()
        {
            report.assessments.insert(
                index,
                Assessment {
                    item: item.id.clone(),
                    judgment: Judgment::Done,
                    evidence: None,
                },
            );
            return Ok(LedgerRecord {
                created_at,
                ..record.clone()
            });
        }

        let (judgment, verdict) =
            oracle::assess(self.tracker, self.correlator, self.policy, item).await?;
        report.assessments.insert(
            index,
            Assessment {
                item: item.id.clone(),
                judgment,
                evidence: verdict.artifact().cloned(),
            },
        );

        let (status, completed_at) = match judgment {
            Judgment::Done => (
                RecordStatus::Completed,
                Some(
                    existing
                        .and_then(|r| r.completed_at)
                        .unwrap_or_else(Utc::now),
                ),
            ),
            Judgment::NotDone | Judgment::Blocked => (RecordStatus::Created, None),
        };

        if existing.is_some_and(|r| r.is_completed()) && status == RecordStatus::Created {
            warn!(index, item = %item.id, "completed item was reopened");
        }

        Ok(LedgerRecord {
            file_index: index,
            remote_item_id: item.id.clone(),
            status,
            created_at,
            completed_at,
            duplicates: Vec::new(),
        })
    }
}
