//! Typed views over event content.

use crate::ids::{EventId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Membership state of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Joined the room.
    Join,
    /// Invited but not joined.
    Invite,
    /// Left or was kicked.
    Leave,
    /// Banned.
    Ban,
    /// Asked to join.
    Knock,
    /// Any value this crate does not know about.
    Other(String),
}

impl Membership {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "join",
            Self::Invite => "invite",
            Self::Leave => "leave",
            Self::Ban => "ban",
            Self::Knock => "knock",
            Self::Other(s) => s,
        }
    }

    /// Returns true if the member no longer participates in the room.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Leave | Self::Ban)
    }
}

impl From<&str> for Membership {
    fn from(s: &str) -> Self {
        match s {
            "join" => Self::Join,
            "invite" => Self::Invite,
            "leave" => Self::Leave,
            "ban" => Self::Ban,
            "knock" => Self::Knock,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Content of `m.room.member`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberContent {
    /// Raw membership value; see [`MemberContent::membership`].
    pub membership: String,
    /// Display name in this room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Set by the inviter on direct-message invites.
    #[serde(default)]
    pub is_direct: bool,
}

impl MemberContent {
    /// Returns the parsed membership.
    #[must_use]
    pub fn membership(&self) -> Membership {
        Membership::from(self.membership.as_str())
    }

    /// Returns the display name if it is present and non-empty.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.displayname.as_deref().filter(|name| !name.is_empty())
    }
}

/// Content of `m.room.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateContent {
    /// Creator; newer room versions omit it in favour of the event sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserId>,
    /// Room type, e.g. `m.space`. Absent for regular rooms.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
}

/// The `m.relates_to` block of an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatesTo {
    /// Relation type, `m.annotation` for reactions.
    pub rel_type: String,
    /// Event being reacted to.
    pub event_id: EventId,
    /// Reaction key, usually an emoji.
    #[serde(default)]
    pub key: String,
}

/// Content of `m.reaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionContent {
    /// Relation to the target event.
    #[serde(rename = "m.relates_to")]
    pub relates_to: RelatesTo,
}

impl ReactionContent {
    /// Builds an annotation on `target` with `key`.
    pub fn annotation(target: EventId, key: impl Into<String>) -> Self {
        Self {
            relates_to: RelatesTo {
                rel_type: "m.annotation".to_owned(),
                event_id: target,
                key: key.into(),
            },
        }
    }
}

/// Content of `m.fully_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyReadContent {
    /// Latest event the user has fully read.
    pub event_id: EventId,
}

/// Content of `m.receipt`: event id → receipt type → user → metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptContent(
    pub BTreeMap<EventId, BTreeMap<String, BTreeMap<UserId, serde_json::Value>>>,
);

impl ReceiptContent {
    /// Returns true if `user` has a read receipt on `event`.
    #[must_use]
    pub fn has_read(&self, event: &EventId, user: &UserId) -> bool {
        self.0
            .get(event)
            .and_then(|receipts| receipts.get("m.read"))
            .is_some_and(|readers| readers.contains_key(user))
    }

    /// Returns the events `user` has a read receipt on.
    pub fn read_by<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a EventId> + 'a {
        self.0.iter().filter_map(move |(event, receipts)| {
            receipts
                .get("m.read")
                .filter(|readers| readers.contains_key(user))
                .map(|_| event)
        })
    }
}

/// Content of `m.direct`: peer → direct rooms shared with them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectContent(pub HashMap<UserId, Vec<RoomId>>);

impl DirectContent {
    /// Returns true if `room` is listed as a direct room with anyone.
    #[must_use]
    pub fn contains_room(&self, room: &RoomId) -> bool {
        self.0.values().any(|rooms| rooms.contains(room))
    }
}

/// Content of `m.tag`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagContent {
    /// Tag name → tag metadata (e.g. `order`).
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
}
