//! Durable record of which work-item files have been promoted.
//!
//! The ledger maps local file indices to remote item ids with a status. At
//! most one record is `Created` (in flight) at a time, and new records only
//! ever extend the ledger past its highest index.

pub mod reconcile;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::LedgerError;
use crate::tracker::ItemId;

pub use reconcile::{Anomaly, Assessment, ReconcileReport, Reconciler};
pub use store::LedgerStore;

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Created,
    Completed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Created => write!(f, "created"),
            RecordStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub file_index: u32,
    pub remote_item_id: ItemId,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Other remote items found for the same index (duplicate creations).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<ItemId>,
}

impl LedgerRecord {
    pub fn is_completed(&self) -> bool {
        self.status == RecordStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    /// Ordered by `file_index`.
    records: Vec<LedgerRecord>,
    #[serde(default)]
    last_completed_index: Option<u32>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION,
            records: Vec::new(),
            last_completed_index: None,
        }
    }

    /// Build a ledger from arbitrary records, sorting them and checking the
    /// single-flight invariant.
    pub fn from_records(mut records: Vec<LedgerRecord>) -> Result<Self, LedgerError> {
        records.sort_by_key(|r| r.file_index);
        let ledger = Self {
            version: LEDGER_VERSION,
            last_completed_index: completed_prefix(&records),
            records,
        };
        ledger.check_single_flight()?;
        Ok(ledger)
    }

    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, index: u32) -> Option<&LedgerRecord> {
        self.records.iter().find(|r| r.file_index == index)
    }

    /// The record still awaiting completion, if any.
    pub fn in_flight(&self) -> Option<&LedgerRecord> {
        self.records
            .iter()
            .find(|r| r.status == RecordStatus::Created)
    }

    /// Highest index such that it and every lower record are completed.
    pub fn last_completed_index(&self) -> Option<u32> {
        self.last_completed_index
    }

    pub fn last_index(&self) -> Option<u32> {
        self.records.last().map(|r| r.file_index)
    }

    /// Record a newly created remote item.
    pub fn append(
        &mut self,
        index: u32,
        remote_item_id: ItemId,
        created_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if let Some(in_flight) = self.in_flight() {
            return Err(LedgerError::InFlight {
                index,
                in_flight: in_flight.file_index,
            });
        }
        if let Some(last) = self.last_index()
            && index <= last
        {
            return Err(LedgerError::OutOfOrder { index, last });
        }

        self.records.push(LedgerRecord {
            file_index: index,
            remote_item_id,
            status: RecordStatus::Created,
            created_at,
            completed_at: None,
            duplicates: Vec::new(),
        });
        self.refresh();
        Ok(())
    }

    /// Mark `index` completed. Returns false when there is no such record or
    /// it was already completed.
    pub fn mark_completed(&mut self, index: u32, at: DateTime<Utc>) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.file_index == index) else {
            return false;
        };
        if record.is_completed() {
            return false;
        }
        record.status = RecordStatus::Completed;
        record.completed_at = Some(at);
        self.refresh();
        true
    }

    pub(crate) fn check_single_flight(&self) -> Result<(), LedgerError> {
        let created: Vec<u32> = self
            .records
            .iter()
            .filter(|r| r.status == RecordStatus::Created)
            .map(|r| r.file_index)
            .collect();
        if created.len() > 1 {
            return Err(LedgerError::SingleFlightViolation { indices: created });
        }
        Ok(())
    }

    /// Re-sort and recompute derived state after loading or mutation.
    pub(crate) fn refresh(&mut self) {
        self.records.sort_by_key(|r| r.file_index);
        self.last_completed_index = completed_prefix(&self.records);
    }
}

fn completed_prefix(records: &[LedgerRecord]) -> Option<u32> {
    records
        .iter()
        .take_while(|r| r.is_completed())
        .last()
        .map(|r| r.file_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32, status: RecordStatus) -> LedgerRecord {
        LedgerRecord {
            file_index: index,
            remote_item_id: ItemId::new(format!("{}", index + 100)),
            status,
            created_at: Utc::now(),
            completed_at: None,
            duplicates: Vec::new(),
        }
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = Ledger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.in_flight(), None);
        assert_eq!(ledger.last_completed_index(), None);
    }

    #[test]
    fn test_append_and_complete() {
        let mut ledger = Ledger::new();
        ledger.append(1, ItemId::new("10"), Utc::now()).unwrap();
        assert_eq!(ledger.in_flight().map(|r| r.file_index), Some(1));
        assert_eq!(ledger.last_completed_index(), None);

        assert!(ledger.mark_completed(1, Utc::now()));
        assert!(!ledger.mark_completed(1, Utc::now()));
        assert_eq!(ledger.in_flight(), None);
        assert_eq!(ledger.last_completed_index(), Some(1));
        assert!(ledger.record(1).unwrap().completed_at.is_some());
    }

    #[test]
    fn test_append_rejected_while_in_flight() {
        let mut ledger = Ledger::new();
        ledger.append(1, ItemId::new("10"), Utc::now()).unwrap();
        let err = ledger.append(2, ItemId::new("11"), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InFlight { index: 2, in_flight: 1 }));
        assert_eq!(ledger.records().len(), 1);
    }

    #[test]
    fn test_append_must_extend() {
        let mut ledger = Ledger::new();
        ledger.append(5, ItemId::new("10"), Utc::now()).unwrap();
        ledger.mark_completed(5, Utc::now());
        let err = ledger.append(5, ItemId::new("11"), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { index: 5, last: 5 }));
        let err = ledger.append(3, ItemId::new("11"), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { index: 3, last: 5 }));
    }

    #[test]
    fn test_completed_prefix_stops_at_hole() {
        let ledger = Ledger::from_records(vec![
            record(5, RecordStatus::Completed),
            record(1, RecordStatus::Completed),
            record(2, RecordStatus::Created),
        ])
        .unwrap();
        assert_eq!(ledger.last_completed_index(), Some(1));
        assert_eq!(ledger.last_index(), Some(5));
        assert_eq!(
            ledger.records().iter().map(|r| r.file_index).collect::<Vec<_>>(),
            vec![1, 2, 5]
        );
    }

    #[test]
    fn test_from_records_rejects_two_in_flight() {
        let err = Ledger::from_records(vec![
            record(1, RecordStatus::Created),
            record(2, RecordStatus::Completed),
            record(3, RecordStatus::Created),
        ])
        .unwrap_err();
        match err {
            LedgerError::SingleFlightViolation { indices } => assert_eq!(indices, vec![1, 3]),
            other => panic!("expected SingleFlightViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_serialized_layout() {
        let mut ledger = Ledger::new();
        ledger.append(7, ItemId::new("42"), Utc::now()).unwrap();
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["records"][0]["file_index"], 7);
        assert_eq!(json["records"][0]["remote_item_id"], "42");
        assert_eq!(json["records"][0]["status"], "created");
        assert!(json["records"][0].get("completed_at").is_none());
    }
}
