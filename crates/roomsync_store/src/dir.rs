//! Per-account directory layout.
//!
//! ```text
//! <data_dir>/
//! └─ <base64url(user id)>/
//!    ├─ LOCK        # exclusive lock held for the session
//!    ├─ state.log   # state store frames
//!    └─ index.log   # member index frames
//! ```

use crate::error::{StoreError, StoreResult};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use fs2::FileExt;
use roomsync_types::UserId;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const STATE_FILE: &str = "state.log";
const INDEX_FILE: &str = "index.log";

/// Returns the directory name derived from an account's user id.
///
/// URL-safe base64 keeps the name path-safe whatever the id contains.
#[must_use]
pub fn account_dir_name(user: &UserId) -> String {
    URL_SAFE.encode(user.as_str())
}

/// An opened account directory holding the session lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct AccountDir {
    path: PathBuf,
    _lock_file: File,
}

impl AccountDir {
    /// Opens the directory for `user` under `data_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another session holds the lock.
    pub fn for_account(data_dir: &Path, user: &UserId) -> StoreResult<Self> {
        Self::open(&data_dir.join(account_dir_name(user)))
    }

    /// Opens an account directory by path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another session holds the lock, or
    /// an I/O error.
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StoreError::corrupted(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.display().to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the state log.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }

    /// Returns the path of the index log.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.path.join(INDEX_FILE)
    }
}
