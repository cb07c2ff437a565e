//! Staged write batches.

use super::StateStore;
use crate::error::StoreResult;
use roomsync_types::{Event, RoomId};
use serde::{Deserialize, Serialize};

/// One persisted mutation. A committed batch is a `Vec<StoreOp>` in a
/// single log frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum StoreOp {
    EnsureRoom {
        room: RoomId,
    },
    PutState {
        room: RoomId,
        event: Event,
    },
    AppendTimeline {
        room: RoomId,
        events: Vec<Event>,
    },
    SyncTimeline {
        room: RoomId,
        events: Vec<Event>,
        limited: bool,
        prev_batch: Option<String>,
    },
    SetPrevBatch {
        room: RoomId,
        token: Option<String>,
    },
    PutRoomAccountData {
        room: RoomId,
        event: Event,
    },
    PutEphemeral {
        room: RoomId,
        event: Event,
    },
    PutUserEvent {
        event: Event,
    },
    RemoveUserEvent {
        event_type: String,
    },
    SetResumeToken {
        token: String,
    },
}

/// A set of store mutations applied atomically.
///
/// Operations are staged in memory and become visible only on
/// [`WriteBatch::commit`], which writes them to the log as one frame before
/// applying them. Dropping a batch without committing discards it.
///
/// ```rust
/// use roomsync_store::{StateStore, StoreConfig};
/// use roomsync_types::{Event, RoomId};
/// use serde_json::json;
///
/// let store = StateStore::in_memory(StoreConfig::default()).unwrap();
/// let room = RoomId::from("!r:x");
///
/// let mut batch = store.write();
/// batch.put_state_event(&room, "m.room.name", "", Event::new("m.room.name", json!({"name": "Lobby"})));
/// batch.set_resume_token("s1");
/// batch.commit().unwrap();
///
/// assert!(store.state_event(&room, "m.room.name", "").is_some());
/// assert_eq!(store.resume_token().as_deref(), Some("s1"));
/// ```
#[must_use = "a batch does nothing until committed"]
pub struct WriteBatch<'a> {
    store: &'a StateStore,
    ops: Vec<StoreOp>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(store: &'a StateStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    /// Records that `room` exists even if nothing else is known about it.
    pub fn ensure_room(&mut self, room: &RoomId) -> &mut Self {
        self.ops.push(StoreOp::EnsureRoom { room: room.clone() });
        self
    }

    /// Stages a state event at `(event_type, state_key)`.
    ///
    /// The event is tagged with the room and key it is stored under.
    pub fn put_state_event(
        &mut self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        mut event: Event,
    ) -> &mut Self {
        event.room_id = Some(room.clone());
        event.event_type = event_type.to_owned();
        event.state_key = Some(state_key.to_owned());
        self.ops.push(StoreOp::PutState {
            room: room.clone(),
            event,
        });
        self
    }

    /// Stages a state event under its own type and state key.
    ///
    /// Events without a state key are not state and are ignored.
    pub fn put_state(&mut self, room: &RoomId, event: Event) -> &mut Self {
        if let Some(key) = event.state_key.clone() {
            let event_type = event.event_type.clone();
            self.put_state_event(room, &event_type, &key, event);
        }
        self
    }

    /// Stages timeline events to append (latest last).
    pub fn append_timeline(&mut self, room: &RoomId, events: Vec<Event>) -> &mut Self {
        self.ops.push(StoreOp::AppendTimeline {
            room: room.clone(),
            events: tag_room(room, events),
        });
        self
    }

    /// Stages a timeline chunk from the sync feed.
    ///
    /// A `limited` chunk, or the first chunk for a room, replaces the cached
    /// timeline and its pagination token; otherwise the events are appended.
    pub fn sync_timeline(
        &mut self,
        room: &RoomId,
        events: Vec<Event>,
        limited: bool,
        prev_batch: Option<String>,
    ) -> &mut Self {
        self.ops.push(StoreOp::SyncTimeline {
            room: room.clone(),
            events: tag_room(room, events),
            limited,
            prev_batch,
        });
        self
    }

    /// Stages a new pagination token for `room`.
    pub fn set_prev_batch(&mut self, room: &RoomId, token: Option<String>) -> &mut Self {
        self.ops.push(StoreOp::SetPrevBatch {
            room: room.clone(),
            token,
        });
        self
    }

    /// Stages per-room account data, keyed by event type.
    pub fn put_room_account_data(&mut self, room: &RoomId, event: Event) -> &mut Self {
        self.ops.push(StoreOp::PutRoomAccountData {
            room: room.clone(),
            event: event.in_room(room),
        });
        self
    }

    /// Stages an ephemeral event, keyed by event type.
    pub fn put_ephemeral(&mut self, room: &RoomId, event: Event) -> &mut Self {
        self.ops.push(StoreOp::PutEphemeral {
            room: room.clone(),
            event: event.in_room(room),
        });
        self
    }

    /// Stages a per-user client-config event, keyed by event type.
    pub fn set_user_event(&mut self, event: Event) -> &mut Self {
        self.ops.push(StoreOp::PutUserEvent { event });
        self
    }

    /// Stages removal of a per-user client-config event.
    pub fn remove_user_event(&mut self, event_type: &str) -> &mut Self {
        self.ops.push(StoreOp::RemoveUserEvent {
            event_type: event_type.to_owned(),
        });
        self
    }

    /// Stages a new resume token.
    pub fn set_resume_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.ops.push(StoreOp::SetResumeToken {
            token: token.into(),
        });
        self
    }

    /// Number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Persists and applies all staged operations.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the frame cannot be written; nothing is
    /// applied in that case.
    pub fn commit(self) -> StoreResult<()> {
        self.store.commit_ops(self.ops)
    }
}

fn tag_room(room: &RoomId, events: Vec<Event>) -> Vec<Event> {
    events.into_iter().map(|e| e.in_room(room)).collect()
}
