//! In-memory data of a single room.

use roomsync_types::{event_type, Event, EventId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// `(event type, state key)`
type StateKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct RoomData {
    state: HashMap<StateKey, Event>,
    timeline: VecDeque<Event>,
    timeline_ids: HashSet<EventId>,
    has_timeline: bool,
    prev_batch: Option<String>,
    account_data: HashMap<String, Event>,
    ephemeral: HashMap<String, Event>,
}

/// Persisted form of a room inside a snapshot frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RoomSnapshot {
    room_id: RoomId,
    state: Vec<Event>,
    timeline: Vec<Event>,
    has_timeline: bool,
    prev_batch: Option<String>,
    account_data: Vec<Event>,
    ephemeral: Vec<Event>,
}

impl RoomData {
    /// Stores `event` at its key unless a strictly newer event is already
    /// there.
    pub(crate) fn put_state(&mut self, event: Event) {
        let Some(state_key) = event.state_key.clone() else {
            return;
        };
        let key = (event.event_type.clone(), state_key);

        if let Some(existing) = self.state.get(&key) {
            if let (Some(old), Some(new)) = (existing.origin_server_ts, event.origin_server_ts) {
                if old > new {
                    return;
                }
            }
        }
        self.state.insert(key, event);
    }

    pub(crate) fn state_event(&self, event_type: &str, state_key: &str) -> Option<&Event> {
        self.state
            .get(&(event_type.to_owned(), state_key.to_owned()))
    }

    pub(crate) fn state_of_type<'a>(
        &'a self,
        event_type: &'a str,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.state
            .iter()
            .filter(move |((t, _), _)| t == event_type)
            .map(|(_, e)| e)
    }

    pub(crate) fn all_state(&self) -> impl Iterator<Item = &Event> {
        self.state.values()
    }

    pub(crate) fn state_len(&self) -> usize {
        self.state.len()
    }

    /// Appends events not already present, then evicts from the front down
    /// to `cap`. Eviction invalidates the pagination token because it no
    /// longer borders the oldest cached event.
    pub(crate) fn append_timeline(&mut self, events: Vec<Event>, cap: usize) -> usize {
        self.has_timeline = true;

        let mut appended = 0;
        for event in events {
            if let Some(id) = &event.event_id {
                if !self.timeline_ids.insert(id.clone()) {
                    continue;
                }
            }
            self.timeline.push_back(event);
            appended += 1;
        }

        let mut evicted = false;
        while self.timeline.len() > cap {
            if let Some(old) = self.timeline.pop_front() {
                if let Some(id) = &old.event_id {
                    self.timeline_ids.remove(id);
                }
                evicted = true;
            }
        }
        if evicted {
            self.prev_batch = None;
        }

        appended
    }

    pub(crate) fn sync_timeline(
        &mut self,
        events: Vec<Event>,
        limited: bool,
        prev_batch: Option<String>,
        cap: usize,
    ) {
        if limited || !self.has_timeline {
            self.timeline.clear();
            self.timeline_ids.clear();
            self.prev_batch = prev_batch;
        }

        // Timeline state events update room state in order.
        for event in events.iter().filter(|e| e.is_state()) {
            self.put_state(event.clone());
        }
        self.append_timeline(events, cap);
    }

    pub(crate) fn timeline(&self) -> Option<Vec<Event>> {
        self.has_timeline
            .then(|| self.timeline.iter().cloned().collect())
    }

    pub(crate) fn timeline_len(&self) -> usize {
        self.timeline.len()
    }

    pub(crate) fn first_timeline_id(&self) -> Option<&EventId> {
        self.timeline.front().and_then(|e| e.event_id.as_ref())
    }

    pub(crate) fn prev_batch(&self) -> Option<&str> {
        self.prev_batch.as_deref()
    }

    pub(crate) fn set_prev_batch(&mut self, token: Option<String>) {
        self.prev_batch = token;
    }

    pub(crate) fn put_account_data(&mut self, event: Event) {
        self.account_data.insert(event.event_type.clone(), event);
    }

    pub(crate) fn account_data(&self, event_type: &str) -> Option<&Event> {
        self.account_data.get(event_type)
    }

    /// Stores an ephemeral event. Receipts are deltas and are merged into
    /// the existing receipt map; other types replace.
    pub(crate) fn put_ephemeral(&mut self, event: Event) {
        if event.is_type(event_type::RECEIPT) {
            if let Some(existing) = self.ephemeral.get_mut(event_type::RECEIPT) {
                merge_json(&mut existing.content, event.content);
                return;
            }
        }
        self.ephemeral.insert(event.event_type.clone(), event);
    }

    pub(crate) fn ephemeral(&self, event_type: &str) -> Option<&Event> {
        self.ephemeral.get(event_type)
    }

    pub(crate) fn to_snapshot(&self, room_id: &RoomId) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.clone(),
            state: self.state.values().cloned().collect(),
            timeline: self.timeline.iter().cloned().collect(),
            has_timeline: self.has_timeline,
            prev_batch: self.prev_batch.clone(),
            account_data: self.account_data.values().cloned().collect(),
            ephemeral: self.ephemeral.values().cloned().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: RoomSnapshot) -> (RoomId, Self) {
        let mut room = Self {
            has_timeline: snapshot.has_timeline,
            prev_batch: snapshot.prev_batch,
            ..Self::default()
        };
        for event in snapshot.state {
            room.put_state(event);
        }
        for event in snapshot.timeline {
            if let Some(id) = &event.event_id {
                room.timeline_ids.insert(id.clone());
            }
            room.timeline.push_back(event);
        }
        for event in snapshot.account_data {
            room.put_account_data(event);
        }
        for event in snapshot.ephemeral {
            room.ephemeral.insert(event.event_type.clone(), event);
        }
        (snapshot.room_id, room)
    }
}

/// Recursively merges JSON objects; non-object values in `patch` replace.
fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch) => {
            if let serde_json::Value::Object(target) = target {
                for (key, value) in patch {
                    match target.get_mut(&key) {
                        Some(existing) => merge_json(existing, value),
                        None => {
                            target.insert(key, value);
                        }
                    }
                }
            } else {
                *target = serde_json::Value::Object(patch);
            }
        }
        patch => *target = patch,
    }
}
