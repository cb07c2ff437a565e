//! Wire types for the sync feed and history endpoints.

use crate::event::Event;
use crate::ids::{EventId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A list of events as it appears in sync sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    /// The events, in server order.
    #[serde(default)]
    pub events: Vec<Event>,
}

impl EventList {
    /// Wraps a vector of events.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Returns true if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A timeline chunk in a sync response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Events, oldest first.
    #[serde(default)]
    pub events: Vec<Event>,
    /// True if the server skipped events between the previous sync and this
    /// chunk.
    #[serde(default)]
    pub limited: bool,
    /// Pagination token pointing just before the first event of the chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

/// Deltas for a joined room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoom {
    /// State changes preceding the timeline.
    #[serde(default)]
    pub state: EventList,
    /// New timeline events.
    #[serde(default)]
    pub timeline: Timeline,
    /// Ephemeral events (receipts, typing).
    #[serde(default)]
    pub ephemeral: EventList,
    /// Per-room account data.
    #[serde(default)]
    pub account_data: EventList,
}

/// Deltas for a room the user has left.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeftRoom {
    /// State changes preceding the timeline.
    #[serde(default)]
    pub state: EventList,
    /// Timeline up to the leave.
    #[serde(default)]
    pub timeline: Timeline,
    /// Per-room account data.
    #[serde(default)]
    pub account_data: EventList,
}

/// Room sections of a sync response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rooms {
    /// Joined rooms.
    #[serde(default)]
    pub join: BTreeMap<RoomId, JoinedRoom>,
    /// Left rooms.
    #[serde(default)]
    pub leave: BTreeMap<RoomId, LeftRoom>,
}

/// One response of the long-poll sync endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Resume token for the next request.
    pub next_batch: String,
    /// Room deltas.
    #[serde(default)]
    pub rooms: Rooms,
    /// Global account data (client-config events).
    #[serde(default)]
    pub account_data: EventList,
}

impl SyncResponse {
    /// Returns the total number of events carried by this payload.
    #[must_use]
    pub fn event_count(&self) -> usize {
        let joined: usize = self
            .rooms
            .join
            .values()
            .map(|r| {
                r.state.events.len()
                    + r.timeline.events.len()
                    + r.ephemeral.events.len()
                    + r.account_data.events.len()
            })
            .sum();
        let left: usize = self
            .rooms
            .leave
            .values()
            .map(|r| r.state.events.len() + r.timeline.events.len() + r.account_data.events.len())
            .sum();
        joined + left + self.account_data.events.len()
    }
}

/// Direction of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards older events.
    #[serde(rename = "b")]
    Backward,
    /// Towards newer events.
    #[serde(rename = "f")]
    Forward,
}

impl Direction {
    /// Returns the query-string value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backward => "b",
            Self::Forward => "f",
        }
    }
}

/// One page of room history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Events in the requested direction (newest first when backward).
    #[serde(default)]
    pub chunk: Vec<Event>,
    /// Token the page started from.
    pub start: String,
    /// Token to continue from; absent when history is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl MessagesResponse {
    /// Returns true if this page marks the end of history.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.end.as_deref().map_or(true, |end| end == self.start)
    }
}

/// Tokens surrounding an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    /// Token just before the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Token just after the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// The event itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

/// Response of the member listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembersResponse {
    /// Member state events.
    #[serde(default)]
    pub chunk: Vec<Event>,
}

/// Response of the send and redact endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Identifier assigned by the server.
    pub event_id: EventId,
}

/// Response of the joined-rooms endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoomsResponse {
    /// Rooms the user is joined to.
    #[serde(default)]
    pub joined_rooms: Vec<RoomId>,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `M_NOT_FOUND`.
    #[serde(default)]
    pub errcode: String,
    /// Human-readable message.
    #[serde(default)]
    pub error: String,
}
