//! Aggregation of reactions on a single target event.

use crate::content::ReactionContent;
use crate::event::{event_type, Event};
use crate::ids::{EventId, UserId};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Reactor {
    user: UserId,
    event_id: EventId,
}

/// Running tally of annotation events pointing at one target event.
///
/// Reactions are counted once per user per key. Redacting a reaction event
/// removes exactly that user's reaction; other users' reactions with the same
/// key are untouched.
#[derive(Debug, Clone)]
pub struct ReactionSummary {
    target: EventId,
    by_key: HashMap<String, Vec<Reactor>>,
    by_event: HashMap<EventId, String>,
}

impl ReactionSummary {
    /// Creates an empty summary for `target`.
    #[must_use]
    pub fn new(target: EventId) -> Self {
        Self {
            target,
            by_key: HashMap::new(),
            by_event: HashMap::new(),
        }
    }

    /// Returns the event being reacted to.
    #[must_use]
    pub fn target(&self) -> &EventId {
        &self.target
    }

    /// Records a reaction event.
    ///
    /// Returns false if the event is not a reaction to this target, lacks a
    /// sender or identifier, or duplicates an existing reaction.
    pub fn add(&mut self, event: &Event) -> bool {
        if !event.is_type(event_type::REACTION) {
            return false;
        }
        let (Some(sender), Some(event_id)) = (&event.sender, &event.event_id) else {
            return false;
        };
        let Ok(content) = event.parse_content::<ReactionContent>() else {
            return false;
        };
        let relation = content.relates_to;
        if relation.event_id != self.target || relation.rel_type != "m.annotation" {
            return false;
        }
        if self.by_event.contains_key(event_id) {
            return false;
        }

        let reactors = self.by_key.entry(relation.key.clone()).or_default();
        if reactors.iter().any(|r| &r.user == sender) {
            return false;
        }
        reactors.push(Reactor {
            user: sender.clone(),
            event_id: event_id.clone(),
        });
        self.by_event.insert(event_id.clone(), relation.key);
        true
    }

    /// Applies a redaction.
    ///
    /// Returns true if the redaction targeted a reaction tracked here, false
    /// if it refers to anything else (no state change in that case).
    pub fn remove(&mut self, redaction: &Event) -> bool {
        let Some(redacted) = redaction.redacted_event() else {
            return false;
        };
        let Some(key) = self.by_event.remove(&redacted) else {
            return false;
        };

        if let Some(reactors) = self.by_key.get_mut(&key) {
            reactors.retain(|r| r.event_id != redacted);
            if reactors.is_empty() {
                self.by_key.remove(&key);
            }
        }
        true
    }

    /// Number of users who reacted with `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.by_key.get(key).map_or(0, Vec::len)
    }

    /// Returns true if `user` reacted with `key`.
    #[must_use]
    pub fn reacted(&self, key: &str, user: &UserId) -> bool {
        self.own_reaction(key, user).is_some()
    }

    /// Returns the event id of `user`'s reaction with `key`, used to undo it.
    #[must_use]
    pub fn own_reaction(&self, key: &str, user: &UserId) -> Option<&EventId> {
        self.by_key
            .get(key)?
            .iter()
            .find(|r| &r.user == user)
            .map(|r| &r.event_id)
    }

    /// Users who reacted with `key`, in the order their reactions arrived.
    #[must_use]
    pub fn reactors(&self, key: &str) -> Vec<&UserId> {
        self.by_key
            .get(key)
            .map(|rs| rs.iter().map(|r| &r.user).collect())
            .unwrap_or_default()
    }

    /// Keys with their counts, most popular first, ties broken by
    /// case-folded key.
    #[must_use]
    pub fn keys(&self) -> Vec<(&str, usize)> {
        let mut keys: Vec<(&str, usize)> = self
            .by_key
            .iter()
            .map(|(k, rs)| (k.as_str(), rs.len()))
            .collect();
        keys.sort_by(|a, b| match b.1.cmp(&a.1) {
            Ordering::Equal => a
                .0
                .to_lowercase()
                .cmp(&b.0.to_lowercase())
                .then_with(|| a.0.cmp(b.0)),
            other => other,
        });
        keys
    }

    /// Returns true if no reactions are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
