use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{LEDGER_VERSION, Ledger};
use crate::errors::LedgerError;

pub const LEDGER_FILE: &str = "ledger.json";
pub const LOCK_FILE: &str = "ledger.lock";

/// Exclusive owner of the ledger file in a state directory.
///
/// Holds an advisory lock on `ledger.lock` until dropped, so two controllers
/// never share a ledger.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    _lock: File,
}

impl LedgerStore {
    pub fn open(state_dir: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(state_dir).map_err(|source| LedgerError::Io {
            path: state_dir.to_path_buf(),
            source,
        })?;

        let lock_path = state_dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| LedgerError::Io {
                path: lock_path.clone(),
                source,
            })?;

        match FileExt::try_lock_exclusive(&lock) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(LedgerError::Locked { path: lock_path });
            }
            Err(source) => {
                return Err(LedgerError::Io {
                    path: lock_path,
                    source,
                });
            }
        }

        Ok(Self {
            path: state_dir.join(LEDGER_FILE),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger, or an empty one on first run.
    pub fn load(&self) -> Result<Ledger, LedgerError> {
        Ok(read_ledger(&self.path)?.unwrap_or_default())
    }

    /// Replace the ledger file atomically: temp file, fsync, rename, then
    /// sync the directory so the rename itself is durable.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| LedgerError::Io { path, source }
        };

        let payload = serde_json::to_vec_pretty(ledger).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&payload).map_err(io_err(&tmp))?;
            file.write_all(b"\n").map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        if let Some(dir) = self.path.parent() {
            File::open(dir)
                .and_then(|d| d.sync_all())
                .map_err(io_err(dir))?;
        }

        debug!(
            path = %self.path.display(),
            records = ledger.records().len(),
            "saved ledger"
        );
        Ok(())
    }
}

/// Read a ledger file without taking the lock. `None` when it does not exist.
pub fn read_ledger(path: &Path) -> Result<Option<Ledger>, LedgerError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut ledger: Ledger =
        serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    if ledger.version != LEDGER_VERSION {
        return Err(LedgerError::UnsupportedVersion {
            found: ledger.version,
        });
    }
    ledger.refresh();
    Ok(Some(ledger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ItemId;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::open(&dir.path().join(".promoter")).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_survives_restart() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join(".promoter");

        {
            let store = LedgerStore::open(&state_dir).unwrap();
            let mut ledger = store.load().unwrap();
            ledger.append(1, ItemId::new("11"), Utc::now()).unwrap();
            ledger.mark_completed(1, Utc::now());
            ledger.append(2, ItemId::new("12"), Utc::now()).unwrap();
            store.save(&ledger).unwrap();
        }

        let store = LedgerStore::open(&state_dir).unwrap();
        let ledger = store.load().unwrap();
        assert_eq!(ledger.records().len(), 2);
        assert_eq!(ledger.last_completed_index(), Some(1));
        assert_eq!(
            ledger.in_flight().map(|r| r.remote_item_id.clone()),
            Some(ItemId::new("12"))
        );
        assert!(!state_dir.join("ledger.json.tmp").exists());
    }

    #[test]
    fn test_save_load_save_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::new();
        ledger.append(3, ItemId::new("9"), Utc::now()).unwrap();
        store.save(&ledger).unwrap();
        let first = fs::read_to_string(store.path()).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, ledger);
        store.save(&reloaded).unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), first);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _first = LedgerStore::open(dir.path()).unwrap();
        let err = LedgerStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, LedgerError::Locked { .. }));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        drop(LedgerStore::open(dir.path()).unwrap());
        assert!(LedgerStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_corrupt_and_future_versions_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_ledger(&path),
            Err(LedgerError::Corrupt { .. })
        ));

        fs::write(&path, r#"{"version": 9, "records": []}"#).unwrap();
        assert!(matches!(
            read_ledger(&path),
            Err(LedgerError::UnsupportedVersion { found: 9 })
        ));
    }
}
