//! Inspect command implementation.

use super::{format_size, open_account};
use roomsync_store::{AccountStore, IndexStats, StoreStats};
use serde::Serialize;
use std::path::Path;

/// Account cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Account directory.
    pub path: String,
    /// State store contents.
    pub store: StoreStats,
    /// Member index contents.
    pub members: IndexStats,
    /// Sync resume token, if any.
    pub resume_token: Option<String>,
    /// Per-room summary, sorted by room id.
    pub rooms: Vec<RoomSummary>,
}

/// Summary of one cached room.
#[derive(Debug, Serialize)]
pub struct RoomSummary {
    /// Room id.
    pub room_id: String,
    /// State events.
    pub state_events: usize,
    /// Cached timeline events, `None` if no timeline was ever cached.
    pub timeline_events: Option<usize>,
    /// Whether a pagination token is stored.
    pub has_prev_batch: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let account = open_account(path)?;
    let result = collect(path, &account);
    account.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn collect(path: &Path, account: &AccountStore) -> InspectResult {
    let state = account.state();
    let mut rooms: Vec<RoomSummary> = state
        .rooms()
        .into_iter()
        .map(|room| RoomSummary {
            state_events: state.room_state(&room).len(),
            timeline_events: state.timeline(&room).map(|t| t.len()),
            has_prev_batch: state.prev_batch(&room).is_some(),
            room_id: room.to_string(),
        })
        .collect();
    rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

    InspectResult {
        path: path.display().to_string(),
        store: state.stats(),
        members: account.index().stats(),
        resume_token: state.resume_token(),
        rooms,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("roomsync Account Cache");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!(
        "Resume token: {}",
        result.resume_token.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Storage:");
    println!("  State log: {}", format_size(result.store.log_bytes));
    println!("  Index log: {}", format_size(result.members.log_bytes));
    println!();
    println!("Contents:");
    println!("  Rooms:           {}", result.store.rooms);
    println!("  State events:    {}", result.store.state_events);
    println!("  Timeline events: {}", result.store.timeline_events);
    println!("  User events:     {}", result.store.user_events);
    println!("  Indexed members: {}", result.members.entries);

    if !result.rooms.is_empty() {
        println!();
        println!("Rooms:");
        for room in &result.rooms {
            let timeline = room
                .timeline_events
                .map_or_else(|| "no timeline".to_string(), |n| format!("{} timeline events", n));
            println!(
                "  {} - {} state events, {}{}",
                room.room_id,
                room.state_events,
                timeline,
                if room.has_prev_batch { ", paginable" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seed_account;

    #[test]
    fn collects_room_summaries() {
        let temp = tempfile::tempdir().unwrap();
        seed_account(temp.path());

        let account = open_account(temp.path()).unwrap();
        let result = collect(temp.path(), &account);

        assert_eq!(result.resume_token.as_deref(), Some("s1"));
        assert_eq!(result.store.rooms, 1);
        assert_eq!(result.members.entries, 1);
        assert_eq!(result.rooms.len(), 1);
        assert_eq!(result.rooms[0].room_id, "!lobby:example.org");
        assert_eq!(result.rooms[0].timeline_events, Some(3));
        assert!(result.rooms[0].has_prev_batch);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rooms"][0]["state_events"], 1);
    }
}
