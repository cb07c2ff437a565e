//! Member-name search index.
//!
//! A secondary index from display names and user-id localparts to the users
//! of a room, derived from `m.room.member` state events. Mutations go through
//! an [`IndexBatch`]; a commit writes one log frame and then applies every
//! staged entry under a single write lock, so readers see either the whole
//! batch or none of it.

use crate::backend::StorageBackend;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::file::FileBackend;
use crate::log::{decode, FrameKind, FrameLog, ScanReport};
use crate::memory::InMemoryBackend;
use parking_lot::{Mutex, RwLock};
use roomsync_types::{event_type, Event, MemberContent, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// One indexed member: `(room, display name, user id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Room the member belongs to.
    pub room: RoomId,
    /// Member's user id.
    pub user: UserId,
    /// Display name, if the member set one.
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IndexOp {
    Upsert(IndexEntry),
    Remove { room: RoomId, user: UserId },
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct RoomIndex {
    members: HashMap<UserId, Option<String>>,
    exact: HashMap<String, BTreeSet<UserId>>,
    terms: BTreeMap<String, BTreeSet<UserId>>,
}

impl RoomIndex {
    fn search_terms(user: &UserId, name: Option<&str>) -> BTreeSet<String> {
        let mut terms = BTreeSet::new();
        terms.insert(user.localpart().to_lowercase());
        if let Some(name) = name {
            let folded = name.to_lowercase();
            terms.extend(folded.split_whitespace().map(str::to_owned));
            terms.insert(folded);
        }
        terms
    }

    fn remove(&mut self, user: &UserId) {
        let Some(name) = self.members.remove(user) else {
            return;
        };
        if let Some(name) = &name {
            if let Some(users) = self.exact.get_mut(name) {
                users.remove(user);
                if users.is_empty() {
                    self.exact.remove(name);
                }
            }
        }
        for term in Self::search_terms(user, name.as_deref()) {
            if let Some(users) = self.terms.get_mut(&term) {
                users.remove(user);
                if users.is_empty() {
                    self.terms.remove(&term);
                }
            }
        }
    }

    fn upsert(&mut self, user: UserId, name: Option<String>) {
        self.remove(&user);
        if let Some(name) = &name {
            self.exact
                .entry(name.clone())
                .or_default()
                .insert(user.clone());
        }
        for term in Self::search_terms(&user, name.as_deref()) {
            self.terms.entry(term).or_default().insert(user.clone());
        }
        self.members.insert(user, name);
    }
}

/// Counters describing the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Rooms with at least one indexed member.
    pub rooms: usize,
    /// Indexed members across all rooms.
    pub entries: usize,
    /// Current log size in bytes.
    pub log_bytes: u64,
}

/// Durable member-name index.
pub struct Indexer {
    log: Mutex<FrameLog>,
    rooms: RwLock<HashMap<RoomId, RoomIndex>>,
    compact_threshold: u64,
    compacted_len: AtomicU64,
    recovery: ScanReport,
    closed: AtomicBool,
}

impl Indexer {
    /// Opens the index persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::with_backend(Box::new(backend), config)
    }

    /// Creates an index that lives only in memory.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature matches the other openers.
    pub fn in_memory(config: &StoreConfig) -> StoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), config)
    }

    /// Opens an index over any backend, replaying existing frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: &StoreConfig) -> StoreResult<Self> {
        let mut log = FrameLog::new(backend, config.sync_on_write);
        let mut rooms: HashMap<RoomId, RoomIndex> = HashMap::new();

        let recovery = log.recover(|kind, payload| {
            match kind {
                FrameKind::Batch => {
                    let ops: Vec<IndexOp> = decode(payload)?;
                    apply_ops(&mut rooms, ops);
                }
                FrameKind::Snapshot => {
                    let snapshot: IndexSnapshot = decode(payload)?;
                    rooms.clear();
                    apply_ops(&mut rooms, snapshot.entries.into_iter().map(IndexOp::Upsert));
                }
            }
            Ok(())
        })?;
        debug!(frames = recovery.frames, rooms = rooms.len(), "member index replayed");

        Ok(Self {
            log: Mutex::new(log),
            rooms: RwLock::new(rooms),
            compact_threshold: config.index_compact_threshold,
            compacted_len: AtomicU64::new(0),
            recovery,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns what replay found when the index was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &ScanReport {
        &self.recovery
    }

    /// Starts a write batch.
    pub fn begin(&self) -> IndexBatch<'_> {
        IndexBatch {
            indexer: self,
            ops: Vec::new(),
        }
    }

    /// Users in `room` whose display name is exactly `name`.
    #[must_use]
    pub fn lookup_exact(&self, room: &RoomId, name: &str) -> Vec<UserId> {
        self.rooms
            .read()
            .get(room)
            .and_then(|r| r.exact.get(name))
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users in `room` whose display name, any word of it, or localpart
    /// starts with `prefix`, ignoring case. Sorted by user id.
    #[must_use]
    pub fn lookup_prefix(&self, room: &RoomId, prefix: &str) -> Vec<UserId> {
        let prefix = prefix.to_lowercase();
        let rooms = self.rooms.read();
        let Some(index) = rooms.get(room) else {
            return Vec::new();
        };

        let mut found = BTreeSet::new();
        for (term, users) in index.terms.range(prefix.clone()..) {
            if !term.starts_with(&prefix) {
                break;
            }
            found.extend(users.iter().cloned());
        }
        found.into_iter().collect()
    }

    /// Returns the indexed display name of `user` in `room`.
    #[must_use]
    pub fn display_name(&self, room: &RoomId, user: &UserId) -> Option<String> {
        self.rooms
            .read()
            .get(room)
            .and_then(|r| r.members.get(user).cloned())
            .flatten()
    }

    /// Returns all indexed members of `room`, sorted by user id.
    #[must_use]
    pub fn entries(&self, room: &RoomId) -> Vec<IndexEntry> {
        let rooms = self.rooms.read();
        let mut entries: Vec<IndexEntry> = rooms
            .get(room)
            .map(|r| {
                r.members
                    .iter()
                    .map(|(user, name)| IndexEntry {
                        room: room.clone(),
                        user: user.clone(),
                        display_name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.user.cmp(&b.user));
        entries
    }

    /// Returns index counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let log_bytes = self.log.lock().size().unwrap_or(0);
        let rooms = self.rooms.read();
        IndexStats {
            rooms: rooms.len(),
            entries: rooms.values().map(|r| r.members.len()).sum(),
            log_bytes,
        }
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

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn commit_ops(&self, ops: Vec<IndexOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.check_open()?;

        let mut log = self.log.lock();
        log.append(FrameKind::Batch, &ops)?;
        apply_ops(&mut self.rooms.write(), ops);

        let size = log.size()?;
        if size > self.compact_threshold && size > 2 * self.compacted_len.load(Ordering::SeqCst) {
            if let Err(e) = self.compact_locked(&mut log) {
                warn!(log_bytes = size, error = %e, "member index compaction failed");
            }
        }
        Ok(())
    }

    fn compact_locked(&self, log: &mut FrameLog) -> StoreResult<()> {
        let entries = {
            let rooms = self.rooms.read();
            rooms
                .iter()
                .flat_map(|(room, index)| {
                    index.members.iter().map(move |(user, name)| IndexEntry {
                        room: room.clone(),
                        user: user.clone(),
                        display_name: name.clone(),
                    })
                })
                .collect()
        };
        log.rewrite(FrameKind::Snapshot, &IndexSnapshot { entries })?;
        self.compacted_len.store(log.size()?, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("rooms", &self.rooms.read().len())
            .finish_non_exhaustive()
    }
}

fn apply_ops(rooms: &mut HashMap<RoomId, RoomIndex>, ops: impl IntoIterator<Item = IndexOp>) {
    for op in ops {
        match op {
            IndexOp::Upsert(entry) => {
                rooms
                    .entry(entry.room)
                    .or_default()
                    .upsert(entry.user, entry.display_name);
            }
            IndexOp::Remove { room, user } => {
                if let Some(index) = rooms.get_mut(&room) {
                    index.remove(&user);
                    if index.members.is_empty() {
                        rooms.remove(&room);
                    }
                }
            }
        }
    }
}

/// Staged index mutations, applied atomically on commit.
///
/// Later entries for the same user supersede earlier ones. Dropping the
/// batch without committing discards it.
#[must_use = "a batch does nothing until committed"]
pub struct IndexBatch<'a> {
    indexer: &'a Indexer,
    ops: Vec<IndexOp>,
}

impl IndexBatch<'_> {
    /// Stages the member→name mapping carried by a member event.
    ///
    /// Leave and ban memberships stage a removal. Events that are not
    /// well-formed member events are logged and skipped; they never fail the
    /// batch. Returns true if something was staged.
    pub fn index_room_member(&mut self, room: &RoomId, event: &Event) -> bool {
        if !event.is_type(event_type::ROOM_MEMBER) {
            warn!(room_id = %room, event_type = %event.event_type, "skipping non-member event");
            return false;
        }
        let Some(user) = event.state_key.as_deref().filter(|k| !k.is_empty()) else {
            warn!(room_id = %room, "skipping member event without state key");
            return false;
        };
        let content: MemberContent = match event.parse_content() {
            Ok(content) => content,
            Err(error) => {
                warn!(room_id = %room, user_id = %user, %error, "skipping malformed member event");
                return false;
            }
        };

        let user = UserId::from(user);
        if content.membership().is_gone() {
            self.ops.push(IndexOp::Remove {
                room: room.clone(),
                user,
            });
        } else {
            self.ops.push(IndexOp::Upsert(IndexEntry {
                room: room.clone(),
                user,
                display_name: content.display_name().map(str::to_owned),
            }));
        }
        true
    }

    /// Number of staged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Persists and applies every staged entry at once.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the frame cannot be written; nothing
    /// becomes visible in that case.
    pub fn commit(self) -> StoreResult<()> {
        self.indexer.commit_ops(self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::from("!room:x")
    }

    fn member(user: &str, membership: &str, name: Option<&str>) -> Event {
        let mut content = json!({"membership": membership});
        if let Some(name) = name {
            content["displayname"] = json!(name);
        }
        let mut e = Event::new(event_type::ROOM_MEMBER, content);
        e.state_key = Some(user.to_owned());
        e
    }

    fn index() -> Indexer {
        Indexer::in_memory(&StoreConfig::default()).unwrap()
    }

    #[test]
    fn prefix_lookup_is_case_insensitive() {
        let idx = index();
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@alice:x", "join", Some("Alice Liddell")));
        batch.index_room_member(&room(), &member("@bob:x", "join", None));
        batch.commit().unwrap();

        assert_eq!(idx.lookup_prefix(&room(), "al"), vec![UserId::from("@alice:x")]);
        assert_eq!(idx.lookup_prefix(&room(), "LID"), vec![UserId::from("@alice:x")]);
        assert_eq!(idx.lookup_prefix(&room(), "bo"), vec![UserId::from("@bob:x")]);
        assert!(idx.lookup_prefix(&room(), "z").is_empty());
        assert_eq!(idx.lookup_prefix(&room(), "").len(), 2);
    }

    #[test]
    fn exact_lookup_finds_collisions() {
        let idx = index();
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "join", Some("Sam")));
        batch.index_room_member(&room(), &member("@b:y", "join", Some("Sam")));
        batch.commit().unwrap();

        assert_eq!(idx.lookup_exact(&room(), "Sam").len(), 2);
        assert!(idx.lookup_exact(&room(), "sam").is_empty());
    }

    #[test]
    fn uncommitted_batch_is_invisible() {
        let idx = index();
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "join", Some("Ann")));
        assert!(idx.lookup_prefix(&room(), "ann").is_empty());
        drop(batch);
        assert!(idx.lookup_prefix(&room(), "ann").is_empty());
    }

    #[test]
    fn newer_entry_supersedes_within_batch() {
        let idx = index();
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "join", Some("Old")));
        batch.index_room_member(&room(), &member("@a:x", "join", Some("New")));
        batch.commit().unwrap();

        assert!(idx.lookup_exact(&room(), "Old").is_empty());
        assert_eq!(idx.display_name(&room(), &UserId::from("@a:x")).as_deref(), Some("New"));
    }

    #[test]
    fn leave_removes_member() {
        let idx = index();
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "join", Some("Ann")));
        batch.commit().unwrap();

        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "leave", None));
        batch.commit().unwrap();

        assert!(idx.lookup_prefix(&room(), "ann").is_empty());
        assert!(idx.entries(&room()).is_empty());
    }

    #[test]
    fn malformed_events_are_skipped() {
        let idx = index();
        let mut batch = idx.begin();
        let mut broken = member("@a:x", "join", None);
        broken.content = json!({"membership": ["not", "a", "string"]});

        assert!(!batch.index_room_member(&room(), &broken));
        assert!(!batch.index_room_member(&room(), &Event::new("m.room.name", json!({}))));
        assert!(batch.index_room_member(&room(), &member("@b:x", "join", Some("Bea"))));
        assert_eq!(batch.len(), 1);
        batch.commit().unwrap();

        assert_eq!(idx.entries(&room()).len(), 1);
    }

    #[test]
    fn replay_and_compaction() {
        let config = StoreConfig::default().with_index_compact_threshold(512);
        let backend = InMemoryBackend::new();
        {
            let idx = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();
            for i in 0..40 {
                let mut batch = idx.begin();
                batch.index_room_member(
                    &room(),
                    &member(&format!("@u{i}:x"), "join", Some(&format!("User {i}"))),
                );
                batch.commit().unwrap();
            }
        }

        let idx = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();
        assert_eq!(idx.entries(&room()).len(), 40);
        assert!(idx.recovery_report().snapshots >= 1);
        assert_eq!(idx.lookup_exact(&room(), "User 7"), vec![UserId::from("@u7:x")]);
    }

    #[test]
    fn failed_sync_rolls_back_batch() {
        let config = StoreConfig::default();
        let backend = InMemoryBackend::new();
        let idx = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();

        backend.fail_syncs(true);
        let mut batch = idx.begin();
        batch.index_room_member(&room(), &member("@a:x", "join", Some("Ann")));
        assert!(batch.commit().is_err());
        assert!(idx.entries(&room()).is_empty());

        backend.fail_syncs(false);
        let reopened = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();
        assert!(reopened.entries(&room()).is_empty());
    }

    #[test]
    fn failed_compaction_keeps_batches() {
        let config = StoreConfig::default()
            .with_index_compact_threshold(64)
            .with_sync_on_write(false);
        let backend = InMemoryBackend::new();
        let idx = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();

        backend.fail_syncs(true);
        for i in 0..3 {
            let mut batch = idx.begin();
            batch.index_room_member(
                &room(),
                &member(&format!("@u{i}:x"), "join", Some(&format!("User {i}"))),
            );
            batch.commit().unwrap();
        }

        backend.fail_syncs(false);
        let reopened = Indexer::with_backend(Box::new(backend.handle()), &config).unwrap();
        assert_eq!(reopened.entries(&room()).len(), 3);
        assert_eq!(reopened.recovery_report().snapshots, 0);
    }
}
