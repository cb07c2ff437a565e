//! Store configuration.

/// Default number of timeline events kept per room.
pub const DEFAULT_TIMELINE_KEEP_LAST: usize = 500;

/// Configuration for the state store and member index.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of cached timeline events per room.
    ///
    /// When exceeded, the oldest events are evicted.
    pub timeline_keep_last: usize,

    /// Whether to sync each committed frame to disk before applying it.
    ///
    /// When false, a crash may lose the most recent batches. The resume
    /// token is written through the same log, so lost batches are simply
    /// fetched again.
    pub sync_on_write: bool,

    /// Size in bytes past which the state log is rewritten as a snapshot.
    pub compact_threshold: u64,

    /// Size in bytes past which the index log is rewritten as a snapshot.
    pub index_compact_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeline_keep_last: DEFAULT_TIMELINE_KEEP_LAST,
            sync_on_write: true,
            compact_threshold: 16 * 1024 * 1024,
            index_compact_threshold: 4 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-room timeline retention cap.
    #[must_use]
    pub const fn with_timeline_keep_last(mut self, keep: usize) -> Self {
        self.timeline_keep_last = keep;
        self
    }

    /// Sets whether each frame is synced before it is applied.
    #[must_use]
    pub const fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the state log compaction threshold.
    #[must_use]
    pub const fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }

    /// Sets the index log compaction threshold.
    #[must_use]
    pub const fn with_index_compact_threshold(mut self, bytes: u64) -> Self {
        self.index_compact_threshold = bytes;
        self
    }
}
