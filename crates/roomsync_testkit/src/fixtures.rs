//! Event builders and session helpers.

use crate::homeserver::FakeHomeserver;
use roomsync_client::{Client, ClientConfig, SyncConfig};
use roomsync_store::{AccountStore, StoreConfig};
use roomsync_types::{event_type, Event, EventId, RoomId, UserId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A plain text message without id.
pub fn message(body: &str) -> Event {
    Event::new(
        event_type::ROOM_MESSAGE,
        json!({ "msgtype": "m.text", "body": body }),
    )
}

/// A message with a fixed id and sender.
pub fn message_with_id(id: &str, sender: &str, body: &str) -> Event {
    let mut event = message(body);
    event.event_id = Some(EventId::from(id));
    event.sender = Some(UserId::from(sender));
    event
}

/// `count` messages with ids `{prefix}0..` and increasing timestamps.
pub fn messages(prefix: &str, count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| {
            let mut event = message_with_id(
                &format!("{prefix}{i}"),
                "@someone:test",
                &format!("message {i}"),
            );
            event.origin_server_ts = Some(i as u64);
            event
        })
        .collect()
}

/// A state event.
pub fn state(event_type: &str, state_key: &str, content: Value) -> Event {
    let mut event = Event::new(event_type, content);
    event.state_key = Some(state_key.to_owned());
    event
}

/// A joined member with an optional display name.
pub fn member(user: &str, display_name: Option<&str>) -> Event {
    let mut content = json!({ "membership": "join" });
    if let Some(name) = display_name {
        content["displayname"] = json!(name);
    }
    let mut event = state(event_type::ROOM_MEMBER, user, content);
    event.sender = Some(UserId::from(user));
    event
}

/// A member event with an arbitrary membership.
pub fn membership(user: &str, membership: &str) -> Event {
    let mut event = state(
        event_type::ROOM_MEMBER,
        user,
        json!({ "membership": membership }),
    );
    event.sender = Some(UserId::from(user));
    event
}

/// A create event naming `creator`.
pub fn create(creator: &str, room_type: Option<&str>) -> Event {
    let mut content = json!({ "creator": creator });
    if let Some(room_type) = room_type {
        content["type"] = json!(room_type);
    }
    let mut event = state(event_type::ROOM_CREATE, "", content);
    event.sender = Some(UserId::from(creator));
    event
}

/// A power levels event with the given user levels.
pub fn power_levels(users: &[(&str, i64)], users_default: i64) -> Event {
    let users: serde_json::Map<String, Value> = users
        .iter()
        .map(|(user, level)| ((*user).to_owned(), json!(level)))
        .collect();
    state(
        event_type::ROOM_POWER_LEVELS,
        "",
        json!({ "users": users, "users_default": users_default }),
    )
}

/// A reaction by `sender` on `target`.
pub fn reaction(id: &str, sender: &str, target: &str, key: &str) -> Event {
    let mut event = Event::new(
        event_type::REACTION,
        json!({ "m.relates_to": { "rel_type": "m.annotation", "event_id": target, "key": key } }),
    );
    event.event_id = Some(EventId::from(id));
    event.sender = Some(UserId::from(sender));
    event
}

/// A redaction by `sender` of `target`.
pub fn redaction(id: &str, sender: &str, target: &str) -> Event {
    let mut event = Event::new(event_type::ROOM_REDACTION, json!({}));
    event.event_id = Some(EventId::from(id));
    event.sender = Some(UserId::from(sender));
    event.redacts = Some(EventId::from(target));
    event
}

/// An `m.receipt` event with a read receipt of `user` on `event`.
pub fn receipt(event: &str, user: &str) -> Event {
    let mut readers = serde_json::Map::new();
    readers.insert(user.to_owned(), json!({ "ts": 1 }));
    let mut content = serde_json::Map::new();
    content.insert(event.to_owned(), json!({ "m.read": readers }));
    Event::new(event_type::RECEIPT, Value::Object(content))
}

/// An `m.fully_read` marker.
pub fn fully_read(event: &str) -> Event {
    Event::new(event_type::FULLY_READ, json!({ "event_id": event }))
}

/// Sync settings that keep tests fast: short long-poll and backoff.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig::default()
        .with_timeout(Duration::from_millis(50))
        .with_backoff(Duration::from_millis(1), Duration::from_millis(10))
}

/// Client configuration for `server`'s user with fast sync settings.
pub fn test_config(server: &FakeHomeserver) -> ClientConfig {
    ClientConfig::new("http://fake.test", server.user().clone(), "secret")
        .with_sync(fast_sync_config())
        .with_page_size(20)
}

/// A client with an in-memory cache talking to `server`.
pub fn memory_client(server: &Arc<FakeHomeserver>) -> Client {
    Client::open_in_memory(test_config(server), Arc::clone(server) as _)
        .expect("Failed to create in-memory client")
}

/// A client with an in-memory cache using `store` settings.
pub fn memory_client_with_store(server: &Arc<FakeHomeserver>, store: StoreConfig) -> Client {
    Client::open_in_memory(test_config(server).with_store(store), Arc::clone(server) as _)
        .expect("Failed to create in-memory client")
}

/// A client with an on-disk cache in a temporary directory.
pub struct TestAccount {
    /// The client.
    pub client: Client,
    /// Keeps the directory alive.
    pub dir: TempDir,
}

impl TestAccount {
    /// Opens a file-backed client for `server`'s user.
    pub fn open(server: &Arc<FakeHomeserver>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let client = Self::reopen(server, &dir);
        Self { client, dir }
    }

    /// Opens another session on the same directory.
    pub fn reopen(server: &Arc<FakeHomeserver>, dir: &TempDir) -> Client {
        let config = test_config(server).with_data_dir(dir.path());
        let account = AccountStore::open(dir.path(), &config.user_id, config.store.clone())
            .expect("Failed to open account store");
        Client::with_transport(config, Arc::clone(server) as _, account)
    }
}

/// A room id used across tests.
pub fn test_room() -> RoomId {
    RoomId::from("!room:test")
}
