//! An in-process homeserver.
//!
//! [`FakeHomeserver`] implements [`HttpClient`] directly, so a
//! [`Client`](roomsync_client::Client) can run against it without sockets.
//!
//! History is addressed by position: token `t{n}` sits between event `n-1`
//! and event `n` of a room's history. A backward page from `t{n}` with limit
//! `L` returns events `n-L..n` newest first and ends at `t{n-L}`; from `t0`
//! the page is empty and its start and end tokens are equal.
//!
//! Sync answers immediately when there is something to deliver, otherwise
//! waits for new events up to the request's timeout, or forever with
//! [`FakeHomeserver::hang_syncs`].

use async_trait::async_trait;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use roomsync_client::{
    CachePolicy, HttpClient, HttpRequest, HttpResponse, Method, SyncError, SyncResult,
    CLIENT_PREFIX, SYNC_PATH,
};
use roomsync_types::{
    event_type, Event, EventId, JoinedRoom, RoomId, SyncResponse, Timeline, UserId,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

/// Failure injected with [`FakeHomeserver::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The transport fails before a response arrives.
    Transport,
    /// The server answers with this status and `M_UNKNOWN`.
    Status(u16),
}

#[derive(Debug)]
struct InjectedFailure {
    prefix: String,
    remaining: usize,
    failure: Failure,
}

#[derive(Debug, Default)]
struct FakeRoom {
    history: Vec<Event>,
    state: BTreeMap<(String, String), Event>,
    /// History events already delivered through sync.
    delivered: usize,
    read_markers: Option<Value>,
    tags: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct ServerState {
    rooms: BTreeMap<RoomId, FakeRoom>,
    account_data: HashMap<String, Value>,
    queued_syncs: VecDeque<SyncResponse>,
    failures: Vec<InjectedFailure>,
    requests: Vec<HttpRequest>,
    hang_syncs: bool,
    next_event: u64,
    next_batch: u64,
    delay: Duration,
}

impl ServerState {
    fn next_event_id(&mut self) -> EventId {
        self.next_event += 1;
        EventId::new(format!("$ev{}", self.next_event))
    }

    fn take_failure(&mut self, path: &str) -> Option<Failure> {
        let position = self
            .failures
            .iter()
            .position(|f| path.starts_with(&f.prefix))?;
        let entry = &mut self.failures[position];
        entry.remaining -= 1;
        let failure = entry.failure;
        if entry.remaining == 0 {
            self.failures.remove(position);
        }
        Some(failure)
    }
}

/// In-process homeserver for tests.
#[derive(Debug)]
pub struct FakeHomeserver {
    user: UserId,
    state: Mutex<ServerState>,
    activity: Notify,
}

impl Default for FakeHomeserver {
    fn default() -> Self {
        Self::new("@me:test")
    }
}

impl FakeHomeserver {
    /// Creates an empty server on which `user` is logged in.
    pub fn new(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            state: Mutex::new(ServerState::default()),
            activity: Notify::new(),
        }
    }

    /// The logged-in user.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Appends `event` to the room's history, assigning an id, sender and
    /// timestamp where missing. State events also update the room state.
    ///
    /// Wakes a waiting long-poll.
    pub fn push_event(&self, room: &RoomId, mut event: Event) -> EventId {
        let id = {
            let mut state = self.state.lock();
            let id = match &event.event_id {
                Some(id) => id.clone(),
                None => state.next_event_id(),
            };
            let ts = state.next_event;
            event.event_id = Some(id.clone());
            event.sender.get_or_insert_with(|| self.user.clone());
            event.origin_server_ts.get_or_insert(ts);
            event.room_id = Some(room.clone());

            let fake = state.rooms.entry(room.clone()).or_default();
            if let Some(key) = &event.state_key {
                fake.state
                    .insert((event.event_type.clone(), key.clone()), event.clone());
            }
            fake.history.push(event);
            id
        };
        self.activity.notify_waiters();
        id
    }

    /// Appends several events; see [`FakeHomeserver::push_event`].
    pub fn push_events(&self, room: &RoomId, events: impl IntoIterator<Item = Event>) -> Vec<EventId> {
        events.into_iter().map(|e| self.push_event(room, e)).collect()
    }

    /// Sets room state without adding it to the history.
    pub fn set_state(&self, room: &RoomId, mut event: Event) {
        let mut state = self.state.lock();
        if event.event_id.is_none() {
            event.event_id = Some(state.next_event_id());
        }
        event.room_id = Some(room.clone());
        let key = event.state_key.clone().unwrap_or_default();
        state
            .rooms
            .entry(room.clone())
            .or_default()
            .state
            .insert((event.event_type.clone(), key), event);
    }

    /// Sets global account data content.
    pub fn set_account_data(&self, event_type: &str, content: Value) {
        self.state
            .lock()
            .account_data
            .insert(event_type.to_owned(), content);
    }

    /// Returns global account data content.
    pub fn account_data(&self, event_type: &str) -> Option<Value> {
        self.state.lock().account_data.get(event_type).cloned()
    }

    /// Sets one of the room's tags.
    pub fn set_tag(&self, room: &RoomId, tag: &str, meta: Value) {
        self.state
            .lock()
            .rooms
            .entry(room.clone())
            .or_default()
            .tags
            .insert(tag.to_owned(), meta);
    }

    /// The last body posted to the room's read markers.
    pub fn read_markers(&self, room: &RoomId) -> Option<Value> {
        self.state
            .lock()
            .rooms
            .get(room)
            .and_then(|r| r.read_markers.clone())
    }

    /// The room's full history, oldest first.
    pub fn history(&self, room: &RoomId) -> Vec<Event> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    /// Serves `response` to the next sync request, whatever its token.
    pub fn queue_sync(&self, response: SyncResponse) {
        self.state.lock().queued_syncs.push_back(response);
        self.activity.notify_waiters();
    }

    /// Fails the next `times` requests whose path starts with `prefix`.
    pub fn fail_next(&self, prefix: impl Into<String>, times: usize, failure: Failure) {
        if times == 0 {
            return;
        }
        self.state.lock().failures.push(InjectedFailure {
            prefix: prefix.into(),
            remaining: times,
            failure,
        });
    }

    /// While set, sync requests never answer; only cancelling the caller's
    /// token ends them.
    pub fn hang_syncs(&self, hang: bool) {
        self.state.lock().hang_syncs = hang;
    }

    /// Delays every request except sync by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests whose path starts with `prefix`.
    pub fn request_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }

    /// Path of room endpoint `suffix`, for use with the request helpers.
    pub fn room_path(room: &RoomId, suffix: &str) -> String {
        let encoded =
            percent_encoding::utf8_percent_encode(room.as_str(), percent_encoding::NON_ALPHANUMERIC);
        format!("{CLIENT_PREFIX}/rooms/{encoded}/{suffix}")
    }

    async fn sync(&self, request: &HttpRequest) -> HttpResponse {
        let hang = self.state.lock().hang_syncs;
        if hang {
            return std::future::pending().await;
        }

        let since = request.query_param("since").map(str::to_owned);
        let limit = request
            .query_param("filter")
            .and_then(|f| serde_json::from_str::<Value>(f).ok())
            .and_then(|f| f["room"]["timeline"]["limit"].as_u64())
            .map_or(10, |l| l as usize);
        let timeout = request
            .query_param("timeout")
            .and_then(|t| t.parse::<u64>().ok())
            .map_or(Duration::ZERO, Duration::from_millis);

        let wait = async {
            loop {
                let notified = self.activity.notified();
                if let Some(response) = self.try_sync(since.as_deref(), limit) {
                    return response;
                }
                notified.await;
            }
        };

        let response = match tokio::time::timeout(timeout, wait).await {
            Ok(response) => response,
            Err(_) => self.empty_sync(),
        };
        json_response(200, &json!(response))
    }

    fn try_sync(&self, since: Option<&str>, limit: usize) -> Option<SyncResponse> {
        let mut state = self.state.lock();
        if let Some(queued) = state.queued_syncs.pop_front() {
            return Some(queued);
        }

        let initial = since.is_none();
        let mut response = SyncResponse::default();
        for (room_id, room) in &mut state.rooms {
            let total = room.history.len();
            let mut joined = JoinedRoom::default();
            if initial {
                let from = total.saturating_sub(limit);
                joined.state.events = room.state.values().cloned().collect();
                joined.timeline = Timeline {
                    events: room.history[from..].to_vec(),
                    limited: from > 0,
                    prev_batch: Some(format!("t{from}")),
                };
            } else if room.delivered < total {
                joined.timeline = Timeline {
                    events: room.history[room.delivered..].to_vec(),
                    limited: false,
                    prev_batch: Some(format!("t{}", room.delivered)),
                };
            } else {
                continue;
            }
            room.delivered = total;
            response.rooms.join.insert(room_id.clone(), joined);
        }
        if initial {
            response.account_data.events = state
                .account_data
                .iter()
                .map(|(t, c)| Event::new(t.as_str(), c.clone()))
                .collect();
        }

        if !initial && response.rooms.join.is_empty() {
            return None;
        }
        state.next_batch += 1;
        response.next_batch = format!("s{}", state.next_batch);
        Some(response)
    }

    fn empty_sync(&self) -> SyncResponse {
        let mut state = self.state.lock();
        state.next_batch += 1;
        SyncResponse {
            next_batch: format!("s{}", state.next_batch),
            ..SyncResponse::default()
        }
    }

    fn route(&self, request: &HttpRequest) -> HttpResponse {
        let Some(rest) = request.path.strip_prefix(CLIENT_PREFIX) else {
            return not_found("unknown endpoint");
        };
        let segments: Vec<String> = rest
            .trim_start_matches('/')
            .split('/')
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["joined_rooms"]) => {
                let rooms: Vec<RoomId> = self.state.lock().rooms.keys().cloned().collect();
                json_response(200, &json!({ "joined_rooms": rooms }))
            }
            (Method::Get, ["rooms", room, "messages"]) => self.messages(&RoomId::from(*room), request),
            (Method::Get, ["rooms", room, "context", event]) => {
                self.context(&RoomId::from(*room), &EventId::from(*event))
            }
            (Method::Get, ["rooms", room, "members"]) => self.members(&RoomId::from(*room), request),
            (Method::Get, ["rooms", room, "state"]) => {
                let state = self.state.lock();
                let events: Vec<&Event> = state
                    .rooms
                    .get(&RoomId::from(*room))
                    .map(|r| r.state.values().collect())
                    .unwrap_or_default();
                json_response(200, &json!(events))
            }
            (Method::Get, ["rooms", room, "state", event_type, key]) => {
                let state = self.state.lock();
                state
                    .rooms
                    .get(&RoomId::from(*room))
                    .and_then(|r| r.state.get(&((*event_type).to_owned(), (*key).to_owned())))
                    .map_or_else(
                        || not_found("state event not found"),
                        |e| json_response(200, &json!(e)),
                    )
            }
            (Method::Put, ["rooms", room, "send", event_type, _txn]) => {
                let content = request.body.clone().unwrap_or_else(|| json!({}));
                let id = self.push_event(&RoomId::from(*room), Event::new(*event_type, content));
                json_response(200, &json!({ "event_id": id }))
            }
            (Method::Put, ["rooms", room, "redact", target, _txn]) => {
                let mut redaction = Event::new(
                    event_type::ROOM_REDACTION,
                    request.body.clone().unwrap_or_else(|| json!({})),
                );
                redaction.redacts = Some(EventId::from(*target));
                let id = self.push_event(&RoomId::from(*room), redaction);
                json_response(200, &json!({ "event_id": id }))
            }
            (Method::Post, ["rooms", room, "read_markers"]) => {
                self.state
                    .lock()
                    .rooms
                    .entry(RoomId::from(*room))
                    .or_default()
                    .read_markers = request.body.clone();
                json_response(200, &json!({}))
            }
            (Method::Get, ["user", _user, "account_data", event_type]) => self
                .account_data(event_type)
                .map_or_else(
                    || not_found("account data not found"),
                    |c| json_response(200, &c),
                ),
            (Method::Put, ["user", _user, "account_data", event_type]) => {
                let content = request.body.clone().unwrap_or_else(|| json!({}));
                self.set_account_data(event_type, content);
                json_response(200, &json!({}))
            }
            (Method::Get, ["user", _user, "rooms", room, "tags"]) => {
                let state = self.state.lock();
                let tags = state
                    .rooms
                    .get(&RoomId::from(*room))
                    .map(|r| r.tags.clone())
                    .unwrap_or_default();
                json_response(200, &json!({ "tags": tags }))
            }
            _ => not_found("unknown endpoint"),
        }
    }

    fn messages(&self, room: &RoomId, request: &HttpRequest) -> HttpResponse {
        let state = self.state.lock();
        let history: &[Event] = state
            .rooms
            .get(room)
            .map(|r| r.history.as_slice())
            .unwrap_or_default();
        let total = history.len();

        let limit = request
            .query_param("limit")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(10);
        let from = match request.query_param("from") {
            None => total,
            Some(token) => match parse_token(token) {
                Some(n) if n <= total => n,
                _ => return error_response(400, "M_INVALID_PARAM", "unknown pagination token"),
            },
        };

        let (chunk, end) = if request.query_param("dir") == Some("f") {
            let to = (from + limit).min(total);
            (history[from..to].to_vec(), to)
        } else {
            let to = from.saturating_sub(limit);
            let mut chunk = history[to..from].to_vec();
            chunk.reverse();
            (chunk, to)
        };

        json_response(
            200,
            &json!({
                "chunk": chunk,
                "start": format!("t{from}"),
                "end": format!("t{end}"),
            }),
        )
    }

    fn context(&self, room: &RoomId, event: &EventId) -> HttpResponse {
        let state = self.state.lock();
        let found = state.rooms.get(room).and_then(|r| {
            r.history
                .iter()
                .position(|e| e.event_id.as_ref() == Some(event))
                .map(|i| (i, r.history[i].clone()))
        });
        match found {
            Some((index, event)) => json_response(
                200,
                &json!({
                    "start": format!("t{index}"),
                    "end": format!("t{}", index + 1),
                    "event": event,
                }),
            ),
            None => not_found("event not found"),
        }
    }

    fn members(&self, room: &RoomId, request: &HttpRequest) -> HttpResponse {
        let membership = request.query_param("membership");
        let state = self.state.lock();
        let chunk: Vec<&Event> = state
            .rooms
            .get(room)
            .map(|r| {
                r.state
                    .values()
                    .filter(|e| e.is_type(event_type::ROOM_MEMBER))
                    .filter(|e| {
                        membership.map_or(true, |m| {
                            e.content.get("membership").and_then(Value::as_str) == Some(m)
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        json_response(200, &json!({ "chunk": chunk }))
    }
}

#[async_trait]
impl HttpClient for FakeHomeserver {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let (failure, delay) = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            (state.take_failure(&request.path), state.delay)
        };

        match failure {
            Some(Failure::Transport) => {
                return Err(SyncError::transport_retryable("injected transport failure"))
            }
            Some(Failure::Status(status)) => {
                return Ok(error_response(status, "M_UNKNOWN", "injected failure"))
            }
            None => {}
        }

        if request.path.starts_with(SYNC_PATH) {
            return Ok(self.sync(&request).await);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.route(&request))
    }
}

/// Returns true if `request` was marked as not cacheable.
pub fn is_no_store(request: &HttpRequest) -> bool {
    request.cache == CachePolicy::NoStore
}

fn parse_token(token: &str) -> Option<usize> {
    token.strip_prefix('t')?.parse().ok()
}

fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse::json_value(status, body)
}

fn error_response(status: u16, errcode: &str, message: &str) -> HttpResponse {
    json_response(status, &json!({ "errcode": errcode, "error": message }))
}

fn not_found(message: &str) -> HttpResponse {
    error_response(404, "M_NOT_FOUND", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::message;
    use roomsync_types::MessagesResponse;

    fn room() -> RoomId {
        RoomId::from("!r:test")
    }

    #[tokio::test]
    async fn backward_pages_walk_to_the_start() {
        let server = FakeHomeserver::default();
        server.push_events(&room(), (0..5).map(|i| message(&format!("m{i}"))));

        let page = |from: Option<&str>| {
            let mut request = HttpRequest::get(FakeHomeserver::room_path(&room(), "messages"))
                .with_query("dir", "b")
                .with_query("limit", "3");
            if let Some(from) = from {
                request = request.with_query("from", from);
            }
            request
        };

        let first: MessagesResponse = server.send(page(None)).await.unwrap().json().unwrap();
        assert_eq!((first.start.as_str(), first.end.as_deref()), ("t5", Some("t2")));
        assert_eq!(first.chunk.len(), 3);
        assert_eq!(first.chunk[0].event_id, Some(EventId::from("$ev5")));

        let second: MessagesResponse = server.send(page(Some("t2"))).await.unwrap().json().unwrap();
        assert_eq!(second.chunk.len(), 2);
        assert!(!second.is_exhausted());

        let last: MessagesResponse = server.send(page(Some("t0"))).await.unwrap().json().unwrap();
        assert!(last.chunk.is_empty());
        assert!(last.is_exhausted());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let server = FakeHomeserver::default();
        server.fail_next(CLIENT_PREFIX, 1, Failure::Status(502));

        let request = HttpRequest::get(format!("{CLIENT_PREFIX}/joined_rooms"));
        assert_eq!(server.send(request.clone()).await.unwrap().status, 502);
        assert_eq!(server.send(request).await.unwrap().status, 200);
        assert_eq!(server.request_count(CLIENT_PREFIX), 2);
    }

    #[tokio::test]
    async fn incremental_sync_times_out_empty() {
        let server = FakeHomeserver::default();
        let request = HttpRequest::get(SYNC_PATH)
            .with_query("since", "s0")
            .with_query("timeout", "10");

        let response: SyncResponse = server.send(request).await.unwrap().json().unwrap();
        assert!(response.rooms.join.is_empty());
        assert_eq!(response.next_batch, "s1");
    }
}
