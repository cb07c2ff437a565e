//! The session handle consumers use.
//!
//! [`Client`] ties one account's cache to its homeserver. Reads are served
//! from the cache and fall back to the homeserver once on a miss, feeding
//! what they fetched back into the cache. Every call that may reach the
//! network takes a [`CancellationToken`]; pass [`Client::offline`] for a
//! cache-only lookup.

use crate::api::{Api, SYNC_PATH};
use crate::cache::CachingClient;
use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::handler::HandlerRegistry;
use crate::interceptor::{Interceptor, InterceptorHandle, Middleware, NoStore};
use crate::paginator::RoomPaginator;
use crate::sync::{SyncClient, SyncHandle};
use crate::transport::{HttpClient, ReqwestClient};
use parking_lot::Mutex;
use roomsync_store::{AccountStore, Indexer, StateStore};
use roomsync_types::{
    event_type, CreateContent, Direction, DirectContent, Event, EventId, FullyReadContent,
    MemberContent, PowerAction, PowerLevelsContent, ReactionContent, ReactionSummary,
    ReceiptContent, RoomId, UserId,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ENSURE_MEMBERS: &str = "ensure-members";

/// Room type of spaces.
pub const SPACE_ROOM_TYPE: &str = "m.space";

/// A member's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberName {
    /// Display name, or the user id when the member has none.
    pub name: String,
    /// Another member of the room uses the same display name.
    pub ambiguous: bool,
}

/// Unread events counted from the cached timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadCount {
    /// Events after the latest read one.
    pub count: usize,
    /// The read marker is not in the cached timeline, so the real count is
    /// at least `count`.
    pub more: bool,
}

/// Result of [`Client::toggle_reaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A reaction was sent; carries its event id.
    Added(EventId),
    /// The user's existing reaction was redacted; carries the redaction id.
    Removed(EventId),
}

struct ClientInner {
    config: ClientConfig,
    account: AccountStore,
    registry: Arc<HandlerRegistry>,
    interceptor: Interceptor,
    api: Api,
    sync: Arc<SyncClient>,
    running: Mutex<Option<SyncHandle>>,
}

/// Session handle for one account. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Opens the account's on-disk cache under `config.data_dir` and
    /// connects to `config.homeserver`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cache is locked by another session or
    /// unreadable, or a transport error if the HTTP client cannot be built.
    pub fn open(config: ClientConfig) -> SyncResult<Self> {
        let transport = ReqwestClient::new(config.homeserver.as_str())?;
        let account = AccountStore::open(&config.data_dir, &config.user_id, config.store.clone())?;
        info!(user_id = %config.user_id, path = ?account.path(), "account cache opened");
        Ok(Self::with_transport(config, Arc::new(transport), account))
    }

    /// Creates a session with a non-persistent cache over `transport`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the in-memory cache cannot be created.
    pub fn open_in_memory(config: ClientConfig, transport: Arc<dyn HttpClient>) -> SyncResult<Self> {
        let account = AccountStore::in_memory(config.store.clone())?;
        Ok(Self::with_transport(config, transport, account))
    }

    /// Creates a session over an explicit transport and cache.
    ///
    /// Requests flow through the interceptor, then the response cache, then
    /// `transport`. Long-poll requests are exempted from the response cache.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpClient>,
        account: AccountStore,
    ) -> Self {
        let cached = CachingClient::new(transport, config.response_cache_ttl)
            .with_max_entries(config.response_cache_entries);
        let interceptor = Interceptor::new(Arc::new(cached));
        interceptor.add(SYNC_PATH, NoStore);

        let api = Api::new(
            Arc::new(interceptor.clone()),
            config.user_id.clone(),
            config.access_token.as_str(),
        );
        let registry = Arc::new(HandlerRegistry::new(
            Arc::clone(account.state()),
            Arc::clone(account.index()),
        ));
        let sync = Arc::new(SyncClient::new(
            api.clone(),
            Arc::clone(&registry),
            Arc::clone(account.state()),
            config.sync.clone(),
        ));

        Self {
            inner: Arc::new(ClientInner {
                config,
                account,
                registry,
                interceptor,
                api,
                sync,
                running: Mutex::new(None),
            }),
        }
    }

    /// Returns an already-cancelled token. Calls given it never reach the
    /// network and fail with [`SyncError::Cancelled`] on a cache miss.
    #[must_use]
    pub fn offline() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    /// The logged-in user.
    pub fn user_id(&self) -> &UserId {
        &self.inner.config.user_id
    }

    /// The session configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The state cache.
    pub fn store(&self) -> &Arc<StateStore> {
        self.inner.account.state()
    }

    /// The member-name index.
    pub fn index(&self) -> &Arc<Indexer> {
        self.inner.account.index()
    }

    /// The handler registry every sync payload passes through.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// The request interceptor in front of the transport.
    pub fn interceptor(&self) -> &Interceptor {
        &self.inner.interceptor
    }

    /// The raw API handle.
    pub fn api(&self) -> &Api {
        &self.inner.api
    }

    /// The sync loop driver.
    pub fn sync_client(&self) -> &Arc<SyncClient> {
        &self.inner.sync
    }

    /// Registers a middleware for long-poll sync requests.
    pub fn add_sync_interceptor(&self, middleware: impl Middleware + 'static) -> InterceptorHandle {
        self.inner.interceptor.add(SYNC_PATH, middleware)
    }

    /// Starts the sync loop on a background task of the current Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] if a loop is already running.
    pub fn start_sync(&self) -> SyncResult<()> {
        let mut running = self.inner.running.lock();
        if running.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(SyncError::InvalidState("sync loop already running".into()));
        }
        let handle = Arc::clone(&self.inner.sync).spawn(CancellationToken::new());
        *running = Some(handle);
        Ok(())
    }

    /// Stops the sync loop if one is running and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the storage error that stopped the loop, if any.
    pub async fn stop_sync(&self) -> SyncResult<()> {
        let handle = self.inner.running.lock().take();
        match handle {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }

    /// Runs a single sync iteration on the caller's task.
    ///
    /// # Errors
    ///
    /// See [`SyncClient::sync_once`].
    pub async fn sync_once(&self, cancel: &CancellationToken) -> SyncResult<usize> {
        self.inner.sync.sync_once(cancel).await
    }

    /// Stops syncing, then flushes and closes the cache.
    ///
    /// # Errors
    ///
    /// Returns the sync loop's storage error, or the error from closing.
    pub async fn close(&self) -> SyncResult<()> {
        let stopped = self.stop_sync().await;
        self.inner.account.close()?;
        info!(user_id = %self.user_id(), "session closed");
        stopped
    }

    // Room state and timeline.

    /// Returns the state event at `(event_type, state_key)`.
    ///
    /// # Errors
    ///
    /// On a cache miss, returns the error of the remote lookup (HTTP 404
    /// when the room has no such state).
    pub async fn room_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Event> {
        if let Some(event) = self.store().state_event(room, event_type, state_key) {
            return Ok(event);
        }

        let event = self
            .inner
            .api
            .state_event(room, event_type, state_key, cancel)
            .await?;
        self.absorb_state(room, vec![event.clone()])?;
        Ok(event)
    }

    /// Returns the room event of `event_type`: room account data, then
    /// ephemeral, then the state event with an empty key.
    ///
    /// # Errors
    ///
    /// See [`Client::room_state`].
    pub async fn room_event(
        &self,
        room: &RoomId,
        event_type: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Event> {
        let store = self.store();
        if let Some(event) = store
            .room_account_data(room, event_type)
            .or_else(|| store.ephemeral(room, event_type))
        {
            return Ok(event);
        }
        self.room_state(room, event_type, "", cancel).await
    }

    /// Returns every state event of `event_type` in the room.
    ///
    /// If nothing is cached for the room, the full room state is fetched
    /// and cached first.
    ///
    /// # Errors
    ///
    /// Returns the remote error on a cache miss.
    pub async fn room_states_of_type(
        &self,
        room: &RoomId,
        event_type: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Event>> {
        if self.store().has_room_state(room) {
            return Ok(self.store().room_state_of_type(room, event_type));
        }

        let events = self.inner.api.room_state(room, cancel).await?;
        self.absorb_state(room, events)?;
        Ok(self.store().room_state_of_type(room, event_type))
    }

    /// Returns the room's timeline, latest last.
    ///
    /// On a cache miss, one page of history is fetched: forward from the
    /// stored pagination token if there is one, otherwise backward from the
    /// latest event. The fetched page is not cached.
    ///
    /// # Errors
    ///
    /// Returns the remote error on a cache miss.
    pub async fn room_timeline(
        &self,
        room: &RoomId,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Event>> {
        let store = self.store();
        if let Some(events) = store.timeline(room) {
            return Ok(events);
        }

        let prev = store.prev_batch(room);
        let limit = store.config().timeline_keep_last;
        match prev {
            Some(prev) => {
                let page = self
                    .inner
                    .api
                    .messages(room, Some(&prev), Direction::Forward, limit, cancel)
                    .await?;
                Ok(page.chunk)
            }
            None => {
                let page = self
                    .inner
                    .api
                    .messages(room, None, Direction::Backward, limit, cancel)
                    .await?;
                let mut events = page.chunk;
                events.reverse();
                Ok(events)
            }
        }
    }

    /// Returns the rooms the user is in.
    ///
    /// # Errors
    ///
    /// Returns the remote error if nothing is cached.
    pub async fn rooms(&self, cancel: &CancellationToken) -> SyncResult<Vec<RoomId>> {
        let rooms = self.store().rooms();
        if !rooms.is_empty() {
            return Ok(rooms);
        }
        self.inner.api.joined_rooms(cancel).await
    }

    /// Returns the room's member events.
    ///
    /// If none are cached, they are fetched at the stored pagination token
    /// and fed into the cache and the index.
    ///
    /// # Errors
    ///
    /// Returns the remote error on a cache miss.
    pub async fn room_members(
        &self,
        room: &RoomId,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Event>> {
        let cached = self.store().room_state_of_type(room, event_type::ROOM_MEMBER);
        if !cached.is_empty() {
            return Ok(cached);
        }

        let prev = self.store().prev_batch(room);
        let events = self
            .inner
            .api
            .members(room, prev.as_deref(), None, cancel)
            .await?;
        self.absorb_state(room, events.clone())?;
        Ok(events)
    }

    /// Fetches every joined member of the room once per session.
    ///
    /// Concurrent and repeated calls return immediately while a fetch is in
    /// flight or after one succeeded. A failed fetch may be retried.
    ///
    /// # Errors
    ///
    /// Returns the remote or storage error of the fetch.
    pub async fn room_ensure_members(
        &self,
        room: &RoomId,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let store = self.store();
        if !store.mark_room_busy(room, ENSURE_MEMBERS) {
            return Ok(());
        }

        let prev = store.prev_batch(room);
        let fetched = self
            .inner
            .api
            .members(room, prev.as_deref(), Some("join"), cancel)
            .await;
        let result = fetched.and_then(|events| {
            debug!(room_id = %room, members = events.len(), "fetched room members");
            self.absorb_state(room, events)
        });

        if let Err(e) = &result {
            warn!(room_id = %room, error = %e, "failed to fetch room members");
            store.clear_room_busy(room, ENSURE_MEMBERS);
        }
        result
    }

    /// Writes remotely fetched state into the cache, then indexes the member
    /// events the cache kept.
    fn absorb_state(&self, room: &RoomId, events: Vec<Event>) -> SyncResult<()> {
        let member_keys: Vec<String> = events
            .iter()
            .filter(|e| e.is_type(event_type::ROOM_MEMBER))
            .filter_map(|e| e.state_key.clone())
            .collect();

        let mut batch = self.store().write();
        batch.ensure_room(room);
        for event in events.into_iter().filter(Event::is_state) {
            batch.put_state(room, event);
        }
        batch.commit()?;

        if member_keys.is_empty() {
            return Ok(());
        }
        let mut index = self.index().begin();
        for key in member_keys {
            if let Some(kept) = self.store().state_event(room, event_type::ROOM_MEMBER, &key) {
                index.index_room_member(room, &kept);
            }
        }
        index.commit()?;
        Ok(())
    }

    // Authorization and members.

    /// Returns true if the user may perform `action` in the room.
    ///
    /// The room creator is always permitted, also when the power levels
    /// cannot be loaded.
    pub async fn has_power(
        &self,
        room: &RoomId,
        action: PowerAction,
        cancel: &CancellationToken,
    ) -> bool {
        match self
            .room_state(room, event_type::ROOM_POWER_LEVELS, "", cancel)
            .await
        {
            Ok(event) => match event.parse_content::<PowerLevelsContent>() {
                Ok(levels) if levels.allows(self.user_id(), action) => return true,
                Ok(_) => {}
                Err(error) => warn!(room_id = %room, %error, "malformed power levels"),
            },
            Err(error) => debug!(room_id = %room, %error, "power levels unavailable"),
        }
        self.is_room_creator(room, cancel).await
    }

    /// Returns true if the user created the room.
    pub async fn is_room_creator(&self, room: &RoomId, cancel: &CancellationToken) -> bool {
        let Ok(event) = self
            .room_state(room, event_type::ROOM_CREATE, "", cancel)
            .await
        else {
            return false;
        };
        let creator = event
            .parse_content::<CreateContent>()
            .ok()
            .and_then(|c| c.creator)
            .or(event.sender);
        creator.as_ref() == Some(self.user_id())
    }

    /// Returns the display name of `user` in the room.
    ///
    /// With `check_ambiguity`, the name is flagged when the index maps it to
    /// another member too.
    pub async fn member_name(
        &self,
        room: &RoomId,
        user: &UserId,
        check_ambiguity: bool,
        cancel: &CancellationToken,
    ) -> MemberName {
        let mut names = self
            .member_names(room, std::slice::from_ref(user), check_ambiguity, cancel)
            .await;
        names.pop().unwrap_or_else(|| MemberName {
            name: user.to_string(),
            ambiguous: false,
        })
    }

    /// Like [`Client::member_name`] for several users at once.
    pub async fn member_names(
        &self,
        room: &RoomId,
        users: &[UserId],
        check_ambiguity: bool,
        cancel: &CancellationToken,
    ) -> Vec<MemberName> {
        let mut names = Vec::with_capacity(users.len());
        for user in users {
            let display = self
                .room_state(room, event_type::ROOM_MEMBER, user.as_str(), cancel)
                .await
                .ok()
                .and_then(|e| e.parse_content::<MemberContent>().ok())
                .and_then(|c| c.display_name().map(str::to_owned));
            let name = display.unwrap_or_else(|| user.to_string());

            let ambiguous = check_ambiguity
                && self
                    .index()
                    .lookup_exact(room, &name)
                    .iter()
                    .any(|other| other != user);
            names.push(MemberName { name, ambiguous });
        }
        names
    }

    /// Members of the room whose name or user id starts with `prefix`.
    pub fn search_members(&self, room: &RoomId, prefix: &str) -> Vec<UserId> {
        self.index().lookup_prefix(room, prefix)
    }

    // Sending.

    /// Sends a room event. Nothing is written to the cache; the event
    /// arrives through sync.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] for an empty type, or the
    /// remote error.
    pub async fn send_room_event(
        &self,
        room: &RoomId,
        event_type: &str,
        content: Value,
        cancel: &CancellationToken,
    ) -> SyncResult<EventId> {
        if event_type.is_empty() {
            return Err(SyncError::InvalidArgument("missing event type".into()));
        }
        let id = self
            .inner
            .api
            .send_event(room, event_type, content, cancel)
            .await?;
        debug!(room_id = %room, event_type, event_id = %id, "event sent");
        Ok(id)
    }

    /// Reacts to `target` with `key`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn send_reaction(
        &self,
        room: &RoomId,
        target: &EventId,
        key: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<EventId> {
        let content = serde_json::to_value(ReactionContent::annotation(target.clone(), key))
            .map_err(|e| SyncError::InvalidArgument(e.to_string()))?;
        self.send_room_event(room, event_type::REACTION, content, cancel)
            .await
    }

    /// Aggregates the cached reactions on `target`.
    pub fn reactions(&self, room: &RoomId, target: &EventId) -> ReactionSummary {
        let mut summary = ReactionSummary::new(target.clone());
        for event in self.store().timeline(room).unwrap_or_default() {
            if event.is_type(event_type::REACTION) {
                summary.add(&event);
            } else if event.is_type(event_type::ROOM_REDACTION) {
                summary.remove(&event);
            }
        }
        summary
    }

    /// Adds the user's `key` reaction to `target`, or redacts it if the
    /// cache shows the user already reacted with it.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn toggle_reaction(
        &self,
        room: &RoomId,
        target: &EventId,
        key: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<ToggleOutcome> {
        let existing = self
            .reactions(room, target)
            .own_reaction(key, self.user_id())
            .cloned();
        match existing {
            Some(reaction) => {
                let id = self.redact(room, &reaction, None, cancel).await?;
                Ok(ToggleOutcome::Removed(id))
            }
            None => {
                let id = self.send_reaction(room, target, key, cancel).await?;
                Ok(ToggleOutcome::Added(id))
            }
        }
    }

    /// Redacts an event. Nothing is written to the cache.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn redact(
        &self,
        room: &RoomId,
        event: &EventId,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<EventId> {
        self.inner.api.redact(room, event, reason, cancel).await
    }

    // Per-user events.

    /// Stores a client-config event locally, then uploads it. The local
    /// value is rolled back if the upload fails.
    ///
    /// # Errors
    ///
    /// Returns the upload error, or a storage error.
    pub async fn set_user_event(&self, event: Event, cancel: &CancellationToken) -> SyncResult<()> {
        if event.event_type.is_empty() {
            return Err(SyncError::InvalidArgument("missing event type".into()));
        }
        let store = self.store();
        let event_type = event.event_type.clone();
        let previous = store.user_event(&event_type);
        let content = event.content.clone();
        store.set_user_event(event)?;

        match self
            .inner
            .api
            .set_account_data(&event_type, content, cancel)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let rollback = match previous {
                    Some(previous) => store.set_user_event(previous),
                    None => store.remove_user_event(&event_type),
                };
                if let Err(rollback) = rollback {
                    error!(event_type = %event_type, error = %rollback, "failed to roll back user event");
                }
                Err(e)
            }
        }
    }

    /// Returns the client-config event of `event_type`, fetching and
    /// caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the remote error on a cache miss.
    pub async fn user_event(
        &self,
        event_type: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Event> {
        if let Some(event) = self.store().user_event(event_type) {
            return Ok(event);
        }
        let content = self.inner.api.account_data(event_type, cancel).await?;
        let event = Event::new(event_type, content);
        self.store().set_user_event(event.clone())?;
        Ok(event)
    }

    // Read markers.

    /// Cache-only: whether the user has seen `event`, or `None` if no read
    /// marker or receipt is cached.
    fn has_seen_event(&self, room: &RoomId, event: &EventId) -> Option<bool> {
        let store = self.store();
        if let Some(marker) = store
            .room_account_data(room, event_type::FULLY_READ)
            .and_then(|e| e.parse_content::<FullyReadContent>().ok())
        {
            return Some(&marker.event_id == event);
        }
        store
            .ephemeral(room, event_type::RECEIPT)
            .and_then(|e| e.parse_content::<ReceiptContent>().ok())
            .map(|receipts| receipts.has_read(event, self.user_id()))
    }

    /// Moves the read markers to `event`. Skips the request if the cache
    /// shows the event as already read.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn mark_room_as_read(
        &self,
        room: &RoomId,
        event: &EventId,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        if self.has_seen_event(room, event) == Some(true) {
            return Ok(());
        }
        self.inner
            .api
            .read_markers(room, event, Some(event), cancel)
            .await
    }

    /// Whether the latest timeline event is unread. `None` when the timeline
    /// is empty or unavailable, or no read marker is known.
    pub async fn room_is_unread(&self, room: &RoomId, cancel: &CancellationToken) -> Option<bool> {
        let timeline = self.room_timeline(room, cancel).await.ok()?;
        let latest = timeline.last()?.event_id.clone()?;
        self.has_seen_event(room, &latest).map(|seen| !seen)
    }

    /// The latest event the user has read, from the cached fully-read marker
    /// or read receipts.
    pub fn room_latest_read_event(&self, room: &RoomId) -> Option<EventId> {
        let store = self.store();
        if let Some(marker) = store
            .room_account_data(room, event_type::FULLY_READ)
            .and_then(|e| e.parse_content::<FullyReadContent>().ok())
        {
            return Some(marker.event_id);
        }

        let receipts = store
            .ephemeral(room, event_type::RECEIPT)
            .and_then(|e| e.parse_content::<ReceiptContent>().ok())?;
        let read: Vec<&EventId> = receipts.read_by(self.user_id()).collect();
        let timeline = store.timeline(room).unwrap_or_default();
        timeline
            .iter()
            .rev()
            .filter_map(|e| e.event_id.as_ref())
            .find(|id| read.contains(id))
            .or_else(|| read.first().copied())
            .cloned()
    }

    /// Counts cached timeline events after the latest read one.
    pub fn room_count_unread(&self, room: &RoomId) -> UnreadCount {
        let latest = self.room_latest_read_event(room);
        let timeline = self.store().timeline(room).unwrap_or_default();

        let mut count = 0;
        for event in timeline.iter().rev() {
            if latest.is_some() && event.event_id == latest {
                return UnreadCount { count, more: false };
            }
            count += 1;
        }
        UnreadCount { count, more: true }
    }

    // Room kind.

    /// Whether the room is a direct chat: listed in `m.direct`, or the
    /// user's own member event says so.
    pub async fn is_direct(&self, room: &RoomId, cancel: &CancellationToken) -> bool {
        if let Ok(direct) = self.user_event(event_type::DIRECT, cancel).await {
            match direct.parse_content::<DirectContent>() {
                Ok(direct) if direct.contains_room(room) => return true,
                Ok(_) => {}
                Err(error) => warn!(%error, "malformed direct room map"),
            }
        }

        self.room_state(room, event_type::ROOM_MEMBER, self.user_id().as_str(), cancel)
            .await
            .ok()
            .and_then(|e| e.parse_content::<MemberContent>().ok())
            .is_some_and(|member| member.is_direct)
    }

    /// The room type from the create event; `None` for a regular room.
    pub async fn room_type(&self, room: &RoomId, cancel: &CancellationToken) -> Option<String> {
        self.room_event(room, event_type::ROOM_CREATE, cancel)
            .await
            .ok()?
            .parse_content::<CreateContent>()
            .ok()?
            .room_type
    }

    /// Whether the room is a space.
    pub async fn room_is_space(&self, room: &RoomId, cancel: &CancellationToken) -> bool {
        self.room_type(room, cancel).await.as_deref() == Some(SPACE_ROOM_TYPE)
    }

    /// Fetches the room's tags into the cache.
    ///
    /// # Errors
    ///
    /// Returns the remote or storage error.
    pub async fn update_room_tags(&self, room: &RoomId, cancel: &CancellationToken) -> SyncResult<()> {
        let tags = self.inner.api.room_tags(room, cancel).await?;
        let content =
            serde_json::to_value(&tags).map_err(|e| SyncError::Decode(e.to_string()))?;
        let event = Event::new(event_type::TAG, content).in_room(room);

        let mut batch = self.store().write();
        batch.put_room_account_data(room, event);
        batch.commit()?;
        Ok(())
    }

    /// Creates a backward history cursor returning at most `limit` events
    /// per call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] if `limit` is 0.
    pub fn room_paginator(&self, room: &RoomId, limit: usize) -> SyncResult<RoomPaginator> {
        RoomPaginator::new(
            Arc::clone(self.store()),
            self.inner.api.clone(),
            room.clone(),
            limit,
            self.inner.config.page_size,
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user_id", self.user_id())
            .field("homeserver", &self.inner.config.homeserver)
            .finish_non_exhaustive()
    }
}
