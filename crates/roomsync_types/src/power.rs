//! Power-level authorization rules.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Level required for ban, invite, kick and redact when the room does not
/// say otherwise.
pub const DEFAULT_ACTION_LEVEL: i64 = 50;

/// A privileged room action gated by power levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    /// Ban a member.
    Ban,
    /// Invite a user.
    Invite,
    /// Kick a member.
    Kick,
    /// Redact someone else's event.
    Redact,
}

/// Content of `m.room.power_levels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerLevelsContent {
    /// Level required to ban.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban: Option<i64>,
    /// Level required to invite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<i64>,
    /// Level required to kick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick: Option<i64>,
    /// Level required to redact others' events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact: Option<i64>,
    /// Per-user levels.
    #[serde(default)]
    pub users: HashMap<UserId, i64>,
    /// Level of users absent from `users`.
    #[serde(default)]
    pub users_default: i64,
}

impl PowerLevelsContent {
    /// Returns the level required for `action`.
    #[must_use]
    pub fn required(&self, action: PowerAction) -> i64 {
        let level = match action {
            PowerAction::Ban => self.ban,
            PowerAction::Invite => self.invite,
            PowerAction::Kick => self.kick,
            PowerAction::Redact => self.redact,
        };
        level.unwrap_or(DEFAULT_ACTION_LEVEL)
    }

    /// Returns the level of `user`.
    #[must_use]
    pub fn user_level(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    /// Returns true if `user`'s level meets the requirement for `action`.
    ///
    /// This does not apply the room-creator override; callers that know the
    /// creator combine it themselves.
    #[must_use]
    pub fn allows(&self, user: &UserId, action: PowerAction) -> bool {
        self.user_level(user) >= self.required(action)
    }
}
