//! Typed client-server API calls.
//!
//! Every call takes the caller's [`CancellationToken`]; cancelling it drops
//! the in-flight request and returns [`SyncError::Cancelled`].

use crate::error::{SyncError, SyncResult};
use crate::transport::{HttpClient, HttpRequest, HttpResponse};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use roomsync_types::{
    ContextResponse, Direction, ErrorBody, Event, EventId, JoinedRoomsResponse, MembersResponse,
    MessagesResponse, RoomId, SendResponse, SyncResponse, TagContent, UserId,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

/// Path prefix of every client-server endpoint.
pub const CLIENT_PREFIX: &str = "/_matrix/client/v3";

/// Path of the long-poll sync endpoint.
pub const SYNC_PATH: &str = "/_matrix/client/v3/sync";

/// Characters escaped in a path segment (RFC 3986 unreserved are kept).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

fn room_path(room: &RoomId) -> String {
    format!("{CLIENT_PREFIX}/rooms/{}", segment(room.as_str()))
}

/// Remote API bound to one account.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Api {
    http: Arc<dyn HttpClient>,
    access_token: String,
    user_id: UserId,
}

impl Api {
    /// Creates an API handle over `http`.
    pub fn new(
        http: Arc<dyn HttpClient>,
        user_id: UserId,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            user_id,
        }
    }

    /// Returns the account's user id.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Sends `request` with the account's token, honoring `cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `cancel` fires first, the
    /// transport's error, or [`SyncError::Http`] for a non-2xx status.
    pub async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let request = request.with_token(self.access_token.clone());
        trace!(method = request.method.as_str(), path = %request.path, "request");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SyncError::Cancelled),
            response = self.http.send(request) => response?,
        };

        if response.is_success() {
            return Ok(response);
        }
        let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
        let errcode = if body.errcode.is_empty() {
            "M_UNKNOWN".to_owned()
        } else {
            body.errcode
        };
        Err(SyncError::Http {
            status: response.status,
            errcode,
            message: body.error,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<T> {
        self.execute(request, cancel).await?.json()
    }

    /// `GET /sync`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
        filter: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncResponse> {
        let mut request = HttpRequest::get(SYNC_PATH)
            .with_query("timeout", timeout.as_millis().to_string())
            .with_query("filter", filter);
        if let Some(since) = since {
            request = request.with_query("since", since);
        }
        self.fetch(request, cancel).await
    }

    /// `GET /rooms/{room}/messages`
    ///
    /// Without `from` the page starts at the latest event.
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn messages(
        &self,
        room: &RoomId,
        from: Option<&str>,
        dir: Direction,
        limit: usize,
        cancel: &CancellationToken,
    ) -> SyncResult<MessagesResponse> {
        let mut request = HttpRequest::get(format!("{}/messages", room_path(room)))
            .with_query("dir", dir.as_str())
            .with_query("limit", limit.to_string());
        if let Some(from) = from {
            request = request.with_query("from", from);
        }
        let mut page: MessagesResponse = self.fetch(request, cancel).await?;
        for event in &mut page.chunk {
            event.room_id = Some(room.clone());
        }
        Ok(page)
    }

    /// `GET /rooms/{room}/context/{event}`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn context(
        &self,
        room: &RoomId,
        event: &EventId,
        limit: usize,
        cancel: &CancellationToken,
    ) -> SyncResult<ContextResponse> {
        let request = HttpRequest::get(format!(
            "{}/context/{}",
            room_path(room),
            segment(event.as_str())
        ))
        .with_query("limit", limit.to_string());
        self.fetch(request, cancel).await
    }

    /// `GET /rooms/{room}/members`
    ///
    /// `at` is a pagination token pinning the listing to a point in history.
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn members(
        &self,
        room: &RoomId,
        at: Option<&str>,
        membership: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Event>> {
        let mut request = HttpRequest::get(format!("{}/members", room_path(room)));
        if let Some(at) = at {
            request = request.with_query("at", at);
        }
        if let Some(membership) = membership {
            request = request.with_query("membership", membership);
        }
        let response: MembersResponse = self.fetch(request, cancel).await?;
        Ok(tag_room(room, response.chunk))
    }

    /// `GET /rooms/{room}/state/{type}/{key}`
    ///
    /// Servers that answer with bare content get it wrapped into an event.
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn state_event(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Event> {
        let request = HttpRequest::get(format!(
            "{}/state/{}/{}",
            room_path(room),
            segment(event_type),
            segment(state_key)
        ))
        .with_query("format", "event");

        let value: Value = self.fetch(request, cancel).await?;
        let mut event = if value.get("type").is_some() && value.get("content").is_some() {
            serde_json::from_value(value).map_err(|e| SyncError::Decode(e.to_string()))?
        } else {
            Event::new(event_type, value)
        };
        event.state_key = Some(state_key.to_owned());
        event.room_id = Some(room.clone());
        Ok(event)
    }

    /// `GET /rooms/{room}/state`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn room_state(
        &self,
        room: &RoomId,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Event>> {
        let request = HttpRequest::get(format!("{}/state", room_path(room)));
        let events: Vec<Event> = self.fetch(request, cancel).await?;
        Ok(tag_room(room, events))
    }

    /// `GET /joined_rooms`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn joined_rooms(&self, cancel: &CancellationToken) -> SyncResult<Vec<RoomId>> {
        let request = HttpRequest::get(format!("{CLIENT_PREFIX}/joined_rooms"));
        let response: JoinedRoomsResponse = self.fetch(request, cancel).await?;
        Ok(response.joined_rooms)
    }

    /// `PUT /rooms/{room}/send/{type}/{txn}` with a fresh transaction id.
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        content: Value,
        cancel: &CancellationToken,
    ) -> SyncResult<EventId> {
        let request = HttpRequest::put(
            format!(
                "{}/send/{}/{}",
                room_path(room),
                segment(event_type),
                Uuid::new_v4()
            ),
            content,
        );
        let response: SendResponse = self.fetch(request, cancel).await?;
        Ok(response.event_id)
    }

    /// `PUT /rooms/{room}/redact/{event}/{txn}`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn redact(
        &self,
        room: &RoomId,
        event: &EventId,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<EventId> {
        let body = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let request = HttpRequest::put(
            format!(
                "{}/redact/{}/{}",
                room_path(room),
                segment(event.as_str()),
                Uuid::new_v4()
            ),
            body,
        );
        let response: SendResponse = self.fetch(request, cancel).await?;
        Ok(response.event_id)
    }

    /// `POST /rooms/{room}/read_markers`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn read_markers(
        &self,
        room: &RoomId,
        fully_read: &EventId,
        read: Option<&EventId>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let mut body = json!({ "m.fully_read": fully_read });
        if let Some(read) = read {
            body["m.read"] = json!(read);
        }
        let request = HttpRequest::post(format!("{}/read_markers", room_path(room)), body);
        self.execute(request, cancel).await?;
        Ok(())
    }

    fn account_data_path(&self, event_type: &str) -> String {
        format!(
            "{CLIENT_PREFIX}/user/{}/account_data/{}",
            segment(self.user_id.as_str()),
            segment(event_type)
        )
    }

    /// `GET /user/{user}/account_data/{type}`, returning the content.
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn account_data(
        &self,
        event_type: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Value> {
        self.fetch(HttpRequest::get(self.account_data_path(event_type)), cancel)
            .await
    }

    /// `PUT /user/{user}/account_data/{type}`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn set_account_data(
        &self,
        event_type: &str,
        content: Value,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let request = HttpRequest::put(self.account_data_path(event_type), content);
        self.execute(request, cancel).await?;
        Ok(())
    }

    /// `GET /user/{user}/rooms/{room}/tags`
    ///
    /// # Errors
    ///
    /// See [`Api::execute`].
    pub async fn room_tags(
        &self,
        room: &RoomId,
        cancel: &CancellationToken,
    ) -> SyncResult<TagContent> {
        let request = HttpRequest::get(format!(
            "{CLIENT_PREFIX}/user/{}/rooms/{}/tags",
            segment(self.user_id.as_str()),
            segment(room.as_str())
        ));
        self.fetch(request, cancel).await
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

fn tag_room(room: &RoomId, events: Vec<Event>) -> Vec<Event> {
    events.into_iter().map(|e| e.in_room(room)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Scripted {
        requests: Mutex<Vec<HttpRequest>>,
        reply: Mutex<Option<HttpResponse>>,
    }

    #[async_trait]
    impl HttpClient for Scripted {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            self.requests.lock().push(request);
            Ok(self
                .reply
                .lock()
                .clone()
                .unwrap_or_else(|| HttpResponse::new(200, "{}")))
        }
    }

    fn api(http: &Arc<Scripted>) -> Api {
        Api::new(Arc::clone(http) as Arc<dyn HttpClient>, UserId::from("@me:hs"), "secret")
    }

    #[test]
    fn segments_are_encoded() {
        assert_eq!(segment("!room:hs.example"), "%21room%3Ahs.example");
        assert_eq!(segment("$ev/1"), "%24ev%2F1");
        assert_eq!(segment("m.room.member"), "m.room.member");
    }

    #[tokio::test]
    async fn requests_carry_token_and_encoded_path() {
        let http = Arc::new(Scripted::default());
        *http.reply.lock() = Some(HttpResponse::new(200, r#"{"event_id":"$new"}"#));

        let id = api(&http)
            .send_event(
                &RoomId::from("!r:hs"),
                "m.room.message",
                json!({"body": "hi"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(id, EventId::from("$new"));

        let request = http.requests.lock()[0].clone();
        assert_eq!(request.access_token.as_deref(), Some("secret"));
        assert!(request.path.starts_with("/_matrix/client/v3/rooms/%21r%3Ahs/send/m.room.message/"));
    }

    #[tokio::test]
    async fn error_body_becomes_http_error() {
        let http = Arc::new(Scripted::default());
        *http.reply.lock() = Some(HttpResponse::new(
            403,
            r#"{"errcode":"M_FORBIDDEN","error":"nope"}"#,
        ));

        let err = api(&http)
            .joined_rooms(&CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SyncError::Http { status, errcode, message } => {
                assert_eq!(status, 403);
                assert_eq!(errcode, "M_FORBIDDEN");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_sends_nothing() {
        let http = Arc::new(Scripted::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = api(&http).joined_rooms(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(http.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn bare_state_content_is_wrapped() {
        let http = Arc::new(Scripted::default());
        *http.reply.lock() = Some(HttpResponse::new(200, r#"{"name":"Lobby"}"#));

        let event = api(&http)
            .state_event(&RoomId::from("!r:hs"), "m.room.name", "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(event.event_type, "m.room.name");
        assert_eq!(event.state_key.as_deref(), Some(""));
        assert_eq!(event.content["name"], "Lobby");
    }
}
