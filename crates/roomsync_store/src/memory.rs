//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Used for ephemeral sessions and tests. Clones made with
/// [`InMemoryBackend::handle`] share the same bytes, so a test can "reopen"
/// a store over the data a previous instance wrote, and can make writes fail
/// to exercise storage-fault paths.
///
/// # Example
///
/// ```rust
/// use roomsync_store::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"frame").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 5);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
    fail_syncs: Arc<AtomicBool>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over pre-existing bytes.
    ///
    /// Useful for recovery tests with hand-crafted tails.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            fail_writes: Arc::default(),
            fail_syncs: Arc::default(),
        }
    }

    /// Returns another backend sharing this one's bytes and fault switches.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            fail_writes: Arc::clone(&self.fail_writes),
            fail_syncs: Arc::clone(&self.fail_syncs),
        }
    }

    /// Returns a copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent append, flush and sync fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `sync` and `replace` fail while appends still land.
    pub fn fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("injected write failure"));
        }
        Ok(())
    }

    fn check_syncable(&self) -> StoreResult<()> {
        self.check_writable()?;
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(injected("injected sync failure"));
        }
        Ok(())
    }
}

fn injected(reason: &str) -> StoreError {
    StoreError::Io(io::Error::new(io::ErrorKind::Other, reason))
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StoreError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.check_writable()
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.check_syncable()
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let current = data.len() as u64;

        if new_size > current {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, current size is {current}"),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.check_syncable()?;
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}
