//! Property-based test generators using proptest.

use proptest::prelude::*;
use roomsync_types::{event_type, Event, EventId};
use serde_json::json;

/// Strategy for a room history of `0..max` messages with unique ids.
pub fn history_strategy(max: usize) -> impl Strategy<Value = Vec<Event>> {
    (0..max).prop_map(|len| crate::fixtures::messages("$h", len))
}

/// Strategy for display names, including mixed case and spaces.
pub fn display_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][a-z]{0,8}( [A-Z][a-z]{0,8})?").expect("Invalid regex")
}

/// Strategy for batches of timeline appends, drawn from a pool of ids so
/// duplicates across batches are common.
pub fn timeline_batches_strategy() -> impl Strategy<Value = Vec<Vec<Event>>> {
    prop::collection::vec(prop::collection::vec(0u32..40, 0..12), 1..8).prop_map(|batches| {
        batches
            .into_iter()
            .map(|ids| {
                ids.into_iter()
                    .map(|id| {
                        let mut event =
                            Event::new(event_type::ROOM_MESSAGE, json!({ "body": id }));
                        event.event_id = Some(EventId::new(format!("$p{id}")));
                        event
                    })
                    .collect()
            })
            .collect()
    })
}

/// Pagination parameters: (history length, cached tail, limit, page size).
pub fn paging_strategy() -> impl Strategy<Value = (usize, usize, usize, usize)> {
    (0usize..120, 0usize..40, 1usize..30, 1usize..25)
        .prop_map(|(history, cached, limit, page)| (history, cached.min(history), limit, page))
}
