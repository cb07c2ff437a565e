//! # roomsync types
//!
//! Core identifiers, event envelopes and wire types shared by the roomsync
//! crates.
//!
//! This crate has no I/O. It describes:
//!
//! - string identifiers ([`RoomId`], [`EventId`], [`UserId`])
//! - the generic [`Event`] envelope and typed content views
//! - the incremental sync payload ([`SyncResponse`]) and history pages
//! - power-level authorization rules ([`PowerLevelsContent`])
//! - reaction aggregation ([`ReactionSummary`])
//!
//! ## Example
//!
//! ```rust
//! use roomsync_types::{event_type, Event, MemberContent};
//!
//! let event: Event = serde_json::from_str(
//!     r#"{"type":"m.room.member","state_key":"@alice:example.org",
//!         "content":{"membership":"join","displayname":"Alice"}}"#,
//! ).unwrap();
//!
//! assert_eq!(event.event_type, event_type::ROOM_MEMBER);
//! let member: MemberContent = event.parse_content().unwrap();
//! assert_eq!(member.displayname.as_deref(), Some("Alice"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod content;
mod error;
mod event;
mod ids;
mod power;
mod reaction;
mod sync;

pub use content::{
    CreateContent, DirectContent, FullyReadContent, MemberContent, Membership, ReactionContent,
    ReceiptContent, RelatesTo, TagContent,
};
pub use error::{ContentError, ContentResult};
pub use event::{event_type, latest_message, Event};
pub use ids::{EventId, RoomId, UserId};
pub use power::{PowerAction, PowerLevelsContent, DEFAULT_ACTION_LEVEL};
pub use reaction::ReactionSummary;
pub use sync::{
    ContextResponse, Direction, ErrorBody, EventList, JoinedRoom, JoinedRoomsResponse, LeftRoom,
    MembersResponse, MessagesResponse, Rooms, SendResponse, SyncResponse, Timeline,
};
