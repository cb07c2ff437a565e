//! The generic event envelope.

use crate::error::{ContentError, ContentResult};
use crate::ids::{EventId, RoomId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Well-known event type names.
pub mod event_type {
    /// Room creation state event.
    pub const ROOM_CREATE: &str = "m.room.create";
    /// Room membership state event.
    pub const ROOM_MEMBER: &str = "m.room.member";
    /// Power levels state event.
    pub const ROOM_POWER_LEVELS: &str = "m.room.power_levels";
    /// Room name state event.
    pub const ROOM_NAME: &str = "m.room.name";
    /// Plain message event.
    pub const ROOM_MESSAGE: &str = "m.room.message";
    /// Redaction event.
    pub const ROOM_REDACTION: &str = "m.room.redaction";
    /// Annotation (reaction) event.
    pub const REACTION: &str = "m.reaction";
    /// Read receipts (ephemeral).
    pub const RECEIPT: &str = "m.receipt";
    /// Typing notifications (ephemeral).
    pub const TYPING: &str = "m.typing";
    /// Fully-read marker (room account data).
    pub const FULLY_READ: &str = "m.fully_read";
    /// Room tags (room account data).
    pub const TAG: &str = "m.tag";
    /// Direct-message room map (user account data).
    pub const DIRECT: &str = "m.direct";
}

/// A single protocol event.
///
/// The same envelope carries state, timeline, ephemeral and account-data
/// events; fields that a given category does not use are `None`. The
/// `content` is kept as raw JSON and interpreted lazily with
/// [`Event::parse_content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `m.room.member`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Server-assigned identifier (absent for ephemeral and account data).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// Sender of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,
    /// Server timestamp in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<u64>,
    /// State key; present only on state events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Room the event belongs to. Sync payloads omit it; it is filled on apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Target of a redaction event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
    /// Event content.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Unsigned server metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<serde_json::Value>,
}

impl Event {
    /// Creates an event with the given type and content and no metadata.
    pub fn new(event_type: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: None,
            sender: None,
            origin_server_ts: None,
            state_key: None,
            room_id: None,
            redacts: None,
            content,
            unsigned: None,
        }
    }

    /// Returns true if this is a state event.
    #[must_use]
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// Returns true if the event has the given type.
    #[must_use]
    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Deserializes the content into a typed view.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Malformed`] if the content does not match `T`.
    pub fn parse_content<T: DeserializeOwned>(&self) -> ContentResult<T> {
        Ok(T::deserialize(&self.content)?)
    }

    /// Like [`Event::parse_content`] but also checks the event type.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::UnexpectedType`] on a type mismatch.
    pub fn parse_as<T: DeserializeOwned>(&self, event_type: &'static str) -> ContentResult<T> {
        if self.event_type != event_type {
            return Err(ContentError::UnexpectedType {
                expected: event_type,
                actual: self.event_type.clone(),
            });
        }
        self.parse_content()
    }

    /// Returns the event redacted by this event, if it is a redaction.
    ///
    /// Newer room versions carry the target in `content.redacts`.
    #[must_use]
    pub fn redacted_event(&self) -> Option<EventId> {
        if self.event_type != event_type::ROOM_REDACTION {
            return None;
        }
        self.redacts.clone().or_else(|| {
            self.content
                .get("redacts")
                .and_then(serde_json::Value::as_str)
                .map(EventId::from)
        })
    }

    /// Returns a copy tagged with the given room.
    #[must_use]
    pub fn in_room(mut self, room: &RoomId) -> Self {
        self.room_id = Some(room.clone());
        self
    }
}

/// Finds the latest `m.room.message` in a latest-last list of events.
#[must_use]
pub fn latest_message(events: &[Event]) -> Option<&Event> {
    events
        .iter()
        .rev()
        .find(|e| e.is_type(event_type::ROOM_MESSAGE))
}
