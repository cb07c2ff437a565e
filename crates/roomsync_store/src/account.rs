//! Per-account cache: the state store and member index under one lock.

use crate::config::StoreConfig;
use crate::dir::AccountDir;
use crate::error::StoreResult;
use crate::index::{IndexStats, Indexer};
use crate::log::ScanReport;
use crate::memory::InMemoryBackend;
use crate::state::{StateStore, StoreStats};
use roomsync_types::UserId;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// The persisted cache of one account.
///
/// Holds the directory lock for as long as it lives, so a second session
/// for the same account fails to open instead of interleaving writes.
#[derive(Debug)]
pub struct AccountStore {
    dir: Option<AccountDir>,
    state: Arc<StateStore>,
    index: Arc<Indexer>,
}

impl AccountStore {
    /// Opens the cache of `user` under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`](crate::StoreError::Locked) if another
    /// session holds the account, or an I/O error.
    pub fn open(data_dir: &Path, user: &UserId, config: StoreConfig) -> StoreResult<Self> {
        let dir = AccountDir::for_account(data_dir, user)?;
        Self::open_in(dir, config)
    }

    /// Opens an account directory by path.
    ///
    /// # Errors
    ///
    /// Same as [`AccountStore::open`].
    pub fn open_dir(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = AccountDir::open(path)?;
        Self::open_in(dir, config)
    }

    /// Creates a cache that lives only in memory.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature matches the other openers.
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        let index = Indexer::in_memory(&config)?;
        let state = StateStore::in_memory(config)?;
        Ok(Self {
            dir: None,
            state: Arc::new(state),
            index: Arc::new(index),
        })
    }

    fn open_in(dir: AccountDir, config: StoreConfig) -> StoreResult<Self> {
        let index = Indexer::open(&dir.index_path(), &config)?;
        let state = StateStore::open(&dir.state_path(), config)?;
        info!(path = %dir.path().display(), rooms = state.rooms().len(), "opened account store");
        Ok(Self {
            dir: Some(dir),
            state: Arc::new(state),
            index: Arc::new(index),
        })
    }

    /// Returns the account directory, or `None` for an in-memory cache.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(AccountDir::path)
    }

    /// Returns the state store.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Returns the member index.
    #[must_use]
    pub fn index(&self) -> &Arc<Indexer> {
        &self.index
    }

    /// Compacts both logs.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either rewrite fails.
    pub fn compact(&self) -> StoreResult<()> {
        self.state.compact()?;
        self.index.compact()
    }

    /// Closes both logs. The directory lock is released on drop.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a final sync fails.
    pub fn close(&self) -> StoreResult<()> {
        let state = self.state.close();
        let index = self.index.close();
        state.and(index)
    }
}

/// Result of [`verify_dir`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// Frames found in the state log.
    pub state_frames: usize,
    /// Why the state log scan stopped early, if it did.
    pub state_error: Option<String>,
    /// Frames found in the index log.
    pub index_frames: usize,
    /// Why the index log scan stopped early, if it did.
    pub index_error: Option<String>,
    /// Contents of the state store as replayed.
    pub store: StoreStats,
    /// Contents of the member index as replayed.
    pub members: IndexStats,
}

impl VerifyReport {
    /// Returns true if both logs replayed without an invalid tail.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.state_error.is_none() && self.index_error.is_none()
    }
}

/// Replays an account directory without modifying it.
///
/// The logs are copied into memory first, so a torn tail is reported but not
/// truncated, and no lock is taken.
///
/// # Errors
///
/// Returns an I/O error if a log exists but cannot be read.
pub fn verify_dir(path: &Path) -> StoreResult<VerifyReport> {
    let config = StoreConfig::default().with_sync_on_write(false);
    let state = StateStore::with_backend(Box::new(read_copy(&path.join("state.log"))?), config.clone())?;
    let index = Indexer::with_backend(Box::new(read_copy(&path.join("index.log"))?), &config)?;

    let state_report: &ScanReport = state.recovery_report();
    let index_report: &ScanReport = index.recovery_report();
    Ok(VerifyReport {
        state_frames: state_report.frames,
        state_error: state_report.tail_error.clone(),
        index_frames: index_report.frames,
        index_error: index_report.tail_error.clone(),
        store: state.stats(),
        members: index.stats(),
    })
}

fn read_copy(path: &Path) -> StoreResult<InMemoryBackend> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(InMemoryBackend::with_data(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InMemoryBackend::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use roomsync_types::{event_type, Event, RoomId};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn one_session_per_account() {
        let temp = tempdir().unwrap();
        let user = UserId::from("@alice:example.org");

        let first = AccountStore::open(temp.path(), &user, StoreConfig::default()).unwrap();
        let second = AccountStore::open(temp.path(), &user, StoreConfig::default());
        assert!(matches!(second, Err(StoreError::Locked(_))));

        let other = UserId::from("@bob:example.org");
        assert!(AccountStore::open(temp.path(), &other, StoreConfig::default()).is_ok());
        drop(first);
    }

    #[test]
    fn verify_reports_without_truncating() {
        let temp = tempdir().unwrap();
        let room = RoomId::from("!r:x");
        let path = {
            let store = AccountStore::open_dir(&temp.path().join("acct"), StoreConfig::default()).unwrap();
            store
                .state()
                .put_state_event(&room, event_type::ROOM_NAME, "", Event::new(event_type::ROOM_NAME, json!({"name": "n"})))
                .unwrap();
            store.close().unwrap();
            store.path().unwrap().to_path_buf()
        };

        let state_log = path.join("state.log");
        let mut bytes = std::fs::read(&state_log).unwrap();
        bytes.extend_from_slice(b"RSLG\x01");
        std::fs::write(&state_log, &bytes).unwrap();

        let report = verify_dir(&path).unwrap();
        assert_eq!(report.state_frames, 1);
        assert!(!report.is_clean());
        assert_eq!(report.store.rooms, 1);
        assert_eq!(std::fs::read(&state_log).unwrap().len(), bytes.len());
    }

    #[test]
    fn verify_missing_dir_is_empty() {
        let temp = tempdir().unwrap();
        let report = verify_dir(&temp.path().join("nothing")).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.store.rooms, 0);
    }
}
