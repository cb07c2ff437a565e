//! Timeline command implementation.

use super::open_account;
use roomsync_types::{latest_message, Event, RoomId};
use std::path::Path;

/// Runs the timeline command.
pub fn run(path: &Path, room: &str, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let account = open_account(path)?;
    let room = RoomId::from(room);
    let timeline = account.state().timeline(&room);
    account.close()?;

    let Some(events) = timeline else {
        return Err(format!("No timeline cached for {}", room).into());
    };

    println!("Timeline of {} ({} cached events)", room, events.len());
    if let Some(latest) = latest_message(&events) {
        println!("Latest message: {}", describe(latest));
    }
    println!();
    for event in tail(&events, limit) {
        println!("{}", describe(event));
    }

    Ok(())
}

fn tail(events: &[Event], limit: Option<usize>) -> &[Event] {
    let skip = limit.map_or(0, |n| events.len().saturating_sub(n));
    &events[skip..]
}

fn describe(event: &Event) -> String {
    let id = event
        .event_id
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let sender = event
        .sender
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let ts = event
        .origin_server_ts
        .map_or_else(|| "-".to_string(), |ts| ts.to_string());
    let detail = match (&event.state_key, event.content.get("body").and_then(|b| b.as_str())) {
        (_, Some(body)) => format!("{:?}", body),
        (Some(key), None) => format!("[{}]", key),
        (None, None) => String::new(),
    };
    format!("{} {} {} {} {}", ts, id, sender, event.event_type, detail)
        .trim_end()
        .to_string()
}
