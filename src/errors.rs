//! Typed error hierarchy for the promoter.
//!
//! Four enums cover the subsystems:
//! - `TrackerError`: remote tracker calls (transient vs permanent)
//! - `StoreError`: reading numbered work-item files
//! - `LedgerError`: durable ledger persistence and its invariants
//! - `CycleError`: one promotion cycle, wrapping the above

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by a tracker adapter.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Rate limited by tracker")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Tracker unavailable: {0}")]
    Unavailable(String),

    #[error("Tracker request timed out")]
    Timeout,

    #[error("Tracker rejected credentials: {0}")]
    Auth(String),

    #[error("Missing tracker permission: {0}")]
    Permission(String),

    #[error("Tracker resource not found: {0}")]
    NotFound(String),

    #[error("Tracker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed tracker payload: {0}")]
    Malformed(String),
}

impl TrackerError {
    /// Network trouble or rate limiting; worth retrying within a cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackerError::RateLimited { .. } | TrackerError::Unavailable(_) | TrackerError::Timeout
        )
    }

    /// Requires operator action; never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TrackerError::Auth(_) | TrackerError::Permission(_))
    }
}

/// Errors from the sequence store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No work-item file with index {index}")]
    NotFound { index: u32 },

    #[error("Work-item file {path} is empty")]
    EmptyWorkItem { path: PathBuf },

    #[error("Failed to read work-item file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid issues directory pattern: {0}")]
    Pattern(String),
}

/// Errors from the ledger store and reconciliation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger at {path} is in use by another promoter process")]
    Locked { path: PathBuf },

    #[error("Ledger I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported ledger version {found}")]
    UnsupportedVersion { found: u32 },

    #[error("More than one item in flight: indices {indices:?}")]
    SingleFlightViolation { indices: Vec<u32> },

    #[error("Record for index {index} would not extend the ledger (last index {last})")]
    OutOfOrder { index: u32, last: u32 },

    #[error("Cannot append index {index} while index {in_flight} is in flight")]
    InFlight { index: u32, in_flight: u32 },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Errors that abort a promotion cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CycleError {
    /// Permanent failures stop continuous mode; everything else is retried next poll.
    pub fn is_permanent(&self) -> bool {
        match self {
            CycleError::Tracker(e) => e.is_permanent(),
            CycleError::Ledger(LedgerError::Tracker(e)) => e.is_permanent(),
            CycleError::Ledger(LedgerError::Locked { .. }) => true,
            _ => false,
        }
    }
}
