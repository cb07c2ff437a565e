//! Storage backend trait definition.

use crate::error::StoreResult;

/// A low-level byte store underneath one append-only log.
///
/// Backends are opaque: they know nothing about frames, batches or events.
/// The log layer owns all interpretation of the bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the OS; `sync` makes it durable
/// - Backends must be `Send + Sync` so a store can be shared across tasks
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::ReadPastEnd`] if the range extends beyond
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends data to the end of the storage, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Flushes pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StoreResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StoreResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StoreResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to cut a torn tail after a crash and to roll back a failed
    /// append.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;

    /// Replaces the whole contents with `data` and makes it durable.
    ///
    /// Either the old or the new contents survive a failure, never a mix
    /// and never nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents could not be written. The old
    /// contents are still in place.
    fn replace(&mut self, data: &[u8]) -> StoreResult<()>;
}
