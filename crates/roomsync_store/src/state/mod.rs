//! The durable state store.
//!
//! Holds, per room: the latest state event per `(type, state key)`, a
//! bounded timeline, a pagination token, per-room account data and
//! ephemeral events. Globally: per-user client-config events and the sync
//! resume token.
//!
//! Every mutation goes through a [`WriteBatch`]. A commit appends one frame
//! to the log (synced when configured) and only then applies the batch to
//! memory, so whatever a reader observes is already durable. Reads never
//! touch the log.

mod batch;
mod room;

pub use batch::WriteBatch;

use crate::backend::StorageBackend;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::file::FileBackend;
use crate::log::{decode, FrameKind, FrameLog, ScanReport};
use crate::memory::InMemoryBackend;
use batch::StoreOp;
use parking_lot::{Mutex, RwLock};
use room::{RoomData, RoomSnapshot};
use roomsync_types::{Event, EventId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    rooms: Vec<RoomSnapshot>,
    user_events: Vec<Event>,
    resume_token: Option<String>,
}

/// Counters describing the store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Rooms known to the store.
    pub rooms: usize,
    /// State events across all rooms.
    pub state_events: usize,
    /// Cached timeline events across all rooms.
    pub timeline_events: usize,
    /// Per-user client-config events.
    pub user_events: usize,
    /// Current log size in bytes.
    pub log_bytes: u64,
    /// Whether a resume token is stored.
    pub has_resume_token: bool,
}

/// Durable, keyed store of room state and timelines.
///
/// Safe to share across tasks. Reads on different rooms never contend;
/// writes are serialized on the log.
pub struct StateStore {
    config: StoreConfig,
    log: Mutex<FrameLog>,
    rooms: RwLock<HashMap<RoomId, Arc<RwLock<RoomData>>>>,
    user_events: RwLock<HashMap<String, Event>>,
    resume_token: RwLock<Option<String>>,
    busy: Mutex<HashSet<(RoomId, String)>>,
    recovery: ScanReport,
    compacted_len: AtomicU64,
    closed: AtomicBool,
}

impl StateStore {
    /// Opens the store persisted at `path`, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::with_backend(Box::new(backend), config)
    }

    /// Creates a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature matches the other openers.
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), config)
    }

    /// Opens a store over any backend, replaying existing frames.
    ///
    /// An invalid tail left by a crash is truncated away.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        let mut log = FrameLog::new(backend, config.sync_on_write);
        let mut store = Self {
            config,
            log: Mutex::new(FrameLog::new(Box::new(InMemoryBackend::new()), false)),
            rooms: RwLock::new(HashMap::new()),
            user_events: RwLock::new(HashMap::new()),
            resume_token: RwLock::new(None),
            busy: Mutex::new(HashSet::new()),
            recovery: ScanReport::default(),
            compacted_len: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        let report = log.recover(|kind, payload| {
            match kind {
                FrameKind::Batch => {
                    let ops: Vec<StoreOp> = decode(payload)?;
                    store.apply(ops);
                }
                FrameKind::Snapshot => {
                    let snapshot: StoreSnapshot = decode(payload)?;
                    store.load_snapshot(snapshot);
                }
            }
            Ok(())
        })?;

        debug!(
            frames = report.frames,
            bytes = report.valid_len,
            rooms = store.rooms.read().len(),
            "state store replayed"
        );

        store.log = Mutex::new(log);
        store.recovery = report;
        Ok(store)
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns what replay found when the store was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &ScanReport {
        &self.recovery
    }

    /// Starts a write batch.
    pub fn write(&self) -> WriteBatch<'_> {
        WriteBatch::new(self)
    }

    /// Replaces the state event at `(room, event_type, state_key)`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails; the store stays usable.
    pub fn put_state_event(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        event: Event,
    ) -> StoreResult<()> {
        let mut batch = self.write();
        batch.put_state_event(room, event_type, state_key, event);
        batch.commit()
    }

    /// Appends timeline events, ignoring ids already cached and evicting the
    /// oldest events beyond the retention cap.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn append_timeline_events(&self, room: &RoomId, events: Vec<Event>) -> StoreResult<()> {
        let mut batch = self.write();
        batch.append_timeline(room, events);
        batch.commit()
    }

    /// Stores the pagination token for `room`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_prev_batch(&self, room: &RoomId, token: impl Into<String>) -> StoreResult<()> {
        let mut batch = self.write();
        batch.set_prev_batch(room, Some(token.into()));
        batch.commit()
    }

    /// Stores a per-user client-config event.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_user_event(&self, event: Event) -> StoreResult<()> {
        let mut batch = self.write();
        batch.set_user_event(event);
        batch.commit()
    }

    /// Removes a per-user client-config event.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn remove_user_event(&self, event_type: &str) -> StoreResult<()> {
        let mut batch = self.write();
        batch.remove_user_event(event_type);
        batch.commit()
    }

    /// Stores the sync resume token.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_resume_token(&self, token: impl Into<String>) -> StoreResult<()> {
        let mut batch = self.write();
        batch.set_resume_token(token);
        batch.commit()
    }

    /// Returns the state event at `(room, event_type, state_key)`.
    #[must_use]
    pub fn state_event(&self, room: &RoomId, event_type: &str, state_key: &str) -> Option<Event> {
        self.with_room(room, |r| r.state_event(event_type, state_key).cloned())
            .flatten()
    }

    /// Returns every state event of `event_type` in `room`.
    #[must_use]
    pub fn room_state_of_type(&self, room: &RoomId, event_type: &str) -> Vec<Event> {
        self.with_room(room, |r| r.state_of_type(event_type).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the full cached state of `room`.
    #[must_use]
    pub fn room_state(&self, room: &RoomId) -> Vec<Event> {
        self.with_room(room, |r| r.all_state().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if any state is cached for `room`.
    #[must_use]
    pub fn has_room_state(&self, room: &RoomId) -> bool {
        self.with_room(room, |r| r.state_len() > 0)
            .unwrap_or(false)
    }

    /// Returns the cached timeline, latest last, or `None` if nothing was
    /// ever cached for the room.
    #[must_use]
    pub fn timeline(&self, room: &RoomId) -> Option<Vec<Event>> {
        self.with_room(room, RoomData::timeline).flatten()
    }

    /// Returns the id of the oldest cached timeline event.
    #[must_use]
    pub fn first_timeline_event(&self, room: &RoomId) -> Option<EventId> {
        self.with_room(room, |r| r.first_timeline_id().cloned())
            .flatten()
    }

    /// Returns the pagination token bordering the oldest cached event.
    #[must_use]
    pub fn prev_batch(&self, room: &RoomId) -> Option<String> {
        self.with_room(room, |r| r.prev_batch().map(str::to_owned))
            .flatten()
    }

    /// Returns per-room account data of `event_type`.
    #[must_use]
    pub fn room_account_data(&self, room: &RoomId, event_type: &str) -> Option<Event> {
        self.with_room(room, |r| r.account_data(event_type).cloned())
            .flatten()
    }

    /// Returns the latest ephemeral event of `event_type`.
    #[must_use]
    pub fn ephemeral(&self, room: &RoomId, event_type: &str) -> Option<Event> {
        self.with_room(room, |r| r.ephemeral(event_type).cloned())
            .flatten()
    }

    /// Returns the per-user client-config event of `event_type`.
    #[must_use]
    pub fn user_event(&self, event_type: &str) -> Option<Event> {
        self.user_events.read().get(event_type).cloned()
    }

    /// Returns the sync resume token.
    #[must_use]
    pub fn resume_token(&self) -> Option<String> {
        self.resume_token.read().clone()
    }

    /// Returns every known room, sorted.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.read().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Acquires the `(room, key)` latch.
    ///
    /// Returns true if the caller acquired it, false if it is already held.
    pub fn mark_room_busy(&self, room: &RoomId, key: &str) -> bool {
        self.busy.lock().insert((room.clone(), key.to_owned()))
    }

    /// Releases the `(room, key)` latch.
    pub fn clear_room_busy(&self, room: &RoomId, key: &str) {
        self.busy.lock().remove(&(room.clone(), key.to_owned()));
    }

    /// Returns content counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let log_bytes = self.log.lock().size().unwrap_or(0);
        let rooms = self.rooms.read();
        let mut stats = StoreStats {
            rooms: rooms.len(),
            user_events: self.user_events.read().len(),
            log_bytes,
            has_resume_token: self.resume_token.read().is_some(),
            ..StoreStats::default()
        };
        for room in rooms.values() {
            let room = room.read();
            stats.state_events += room.state_len();
            stats.timeline_events += room.timeline_len();
        }
        stats
    }

    /// Rewrites the log as a single snapshot frame.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rewrite fails.
    pub fn compact(&self) -> StoreResult<()> {
        self.check_open()?;
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }

    /// Flushes and syncs the log.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn sync(&self) -> StoreResult<()> {
        self.log.lock().sync()
    }

    /// Syncs the log and rejects further writes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the final sync fails.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.log.lock().sync()
    }

    /// Returns true once [`StateStore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn with_room<T>(&self, room: &RoomId, f: impl FnOnce(&RoomData) -> T) -> Option<T> {
        let room = self.rooms.read().get(room).cloned()?;
        let guard = room.read();
        Some(f(&guard))
    }

    fn room_entry(&self, room: &RoomId) -> Arc<RwLock<RoomData>> {
        if let Some(existing) = self.rooms.read().get(room) {
            return Arc::clone(existing);
        }
        Arc::clone(self.rooms.write().entry(room.clone()).or_default())
    }

    pub(crate) fn commit_ops(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.check_open()?;

        // The log lock is held through apply so memory reflects log order.
        let mut log = self.log.lock();
        log.append(FrameKind::Batch, &ops)?;
        self.apply(ops);

        // Past the threshold, and at least double the last snapshot. The
        // batch is already durable, so a failed compaction only warns.
        let size = log.size()?;
        if size > self.config.compact_threshold
            && size > 2 * self.compacted_len.load(Ordering::SeqCst)
        {
            if let Err(e) = self.compact_locked(&mut log) {
                warn!(log_bytes = size, error = %e, "state log compaction failed");
            }
        }
        Ok(())
    }

    fn apply(&self, ops: Vec<StoreOp>) {
        let cap = self.config.timeline_keep_last;
        for op in ops {
            match op {
                StoreOp::EnsureRoom { room } => {
                    self.room_entry(&room);
                }
                StoreOp::PutState { room, event } => {
                    self.room_entry(&room).write().put_state(event);
                }
                StoreOp::AppendTimeline { room, events } => {
                    self.room_entry(&room).write().append_timeline(events, cap);
                }
                StoreOp::SyncTimeline {
                    room,
                    events,
                    limited,
                    prev_batch,
                } => {
                    self.room_entry(&room)
                        .write()
                        .sync_timeline(events, limited, prev_batch, cap);
                }
                StoreOp::SetPrevBatch { room, token } => {
                    self.room_entry(&room).write().set_prev_batch(token);
                }
                StoreOp::PutRoomAccountData { room, event } => {
                    self.room_entry(&room).write().put_account_data(event);
                }
                StoreOp::PutEphemeral { room, event } => {
                    self.room_entry(&room).write().put_ephemeral(event);
                }
                StoreOp::PutUserEvent { event } => {
                    self.user_events
                        .write()
                        .insert(event.event_type.clone(), event);
                }
                StoreOp::RemoveUserEvent { event_type } => {
                    self.user_events.write().remove(&event_type);
                }
                StoreOp::SetResumeToken { token } => {
                    *self.resume_token.write() = Some(token);
                }
            }
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        let rooms = self.rooms.read();
        StoreSnapshot {
            rooms: rooms
                .iter()
                .map(|(id, room)| room.read().to_snapshot(id))
                .collect(),
            user_events: self.user_events.read().values().cloned().collect(),
            resume_token: self.resume_token.read().clone(),
        }
    }

    fn load_snapshot(&self, snapshot: StoreSnapshot) {
        let mut rooms = self.rooms.write();
        rooms.clear();
        for room in snapshot.rooms {
            let (id, data) = RoomData::from_snapshot(room);
            rooms.insert(id, Arc::new(RwLock::new(data)));
        }

        let mut user_events = self.user_events.write();
        user_events.clear();
        for event in snapshot.user_events {
            user_events.insert(event.event_type.clone(), event);
        }

        *self.resume_token.write() = snapshot.resume_token;
    }

    fn compact_locked(&self, log: &mut FrameLog) -> StoreResult<()> {
        let before = log.size()?;
        log.rewrite(FrameKind::Snapshot, &self.snapshot())?;
        let after = log.size()?;
        self.compacted_len.store(after, Ordering::SeqCst);
        info!(before, after, "compacted state log");
        Ok(())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("rooms", &self.rooms.read().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
