//! The long-poll sync loop.
//!
//! [`SyncClient`] repeatedly asks the homeserver for everything since the
//! stored resume token, hands each payload to the [`HandlerRegistry`], and
//! only then persists the new token. A crash between apply and persist
//! replays the payload on restart, which the store absorbs idempotently.
//!
//! ```text
//! Idle ──► Polling ──► Applying ──► Idle ...
//!             │
//!             └─(error)─► Backoff ──► Polling
//!
//! any state ──(cancel)──► Closing ──► Closed
//! ```

use crate::api::Api;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::handler::HandlerRegistry;
use parking_lot::RwLock;
use roomsync_store::StateStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// State of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Between iterations, or never started.
    #[default]
    Idle,
    /// A long-poll request is in flight.
    Polling,
    /// A payload is being applied to the cache.
    Applying,
    /// Waiting before retrying a failed request.
    Backoff,
    /// Shutting down.
    Closing,
    /// Stopped. A new loop may be started.
    Closed,
}

impl SyncState {
    /// Returns true while a request is in flight or a payload is applied.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Polling | SyncState::Applying)
    }
}

/// Counters of the sync loop.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Payloads applied and committed.
    pub cycles_completed: u64,
    /// Events in all applied payloads.
    pub events_applied: u64,
    /// Failed iterations, including the fatal one if any.
    pub failures: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the last payload was committed.
    pub last_sync: Option<Instant>,
}

/// Drives the long-poll feed into the cache.
pub struct SyncClient {
    api: Api,
    registry: Arc<HandlerRegistry>,
    store: Arc<StateStore>,
    config: SyncConfig,
    filter: String,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl SyncClient {
    /// Creates a sync client.
    pub fn new(
        api: Api,
        registry: Arc<HandlerRegistry>,
        store: Arc<StateStore>,
        config: SyncConfig,
    ) -> Self {
        let filter = config.filter_json();
        Self {
            api,
            registry,
            store,
            config,
            filter,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn record_failure(&self, err: &SyncError) {
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(err.to_string());
    }

    /// Runs one poll-apply-persist iteration without retrying.
    ///
    /// Returns the number of events applied.
    ///
    /// # Errors
    ///
    /// Returns the transport error, [`SyncError::Cancelled`], or a storage
    /// error. The resume token only advances on success.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> SyncResult<usize> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.set_state(SyncState::Polling);
        let since = self.store.resume_token();
        let payload = match self
            .api
            .sync(since.as_deref(), self.config.timeout, &self.filter, cancel)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                self.set_state(SyncState::Idle);
                return Err(e);
            }
        };

        self.set_state(SyncState::Applying);
        let applied = self
            .registry
            .on_sync_payload(&payload)
            .and_then(|count| {
                self.store.set_resume_token(payload.next_batch.as_str())?;
                Ok(count)
            });
        self.set_state(SyncState::Idle);
        let count = applied?;

        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.events_applied += count as u64;
        stats.last_sync = Some(Instant::now());
        debug!(since = ?since, next_batch = %payload.next_batch, events = count, "sync cycle complete");

        Ok(count)
    }

    /// Runs the loop until `cancel` fires or the cache fails.
    ///
    /// Transport and decode failures are retried with exponential backoff;
    /// the backoff wait also observes `cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if applying a payload failed. The loop
    /// is stopped in that case.
    pub async fn run(&self, cancel: &CancellationToken) -> SyncResult<()> {
        let mut attempt: u32 = 0;
        info!("sync loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.sync_once(cancel).await {
                Ok(_) => attempt = 0,
                Err(SyncError::Cancelled) => break,
                Err(e) if e.is_storage_fault() => {
                    error!(error = %e, "cache failure, stopping sync loop");
                    self.record_failure(&e);
                    self.set_state(SyncState::Closed);
                    return Err(e);
                }
                Err(e) => {
                    self.record_failure(&e);
                    attempt = attempt.saturating_add(1);
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "sync failed, backing off");

                    self.set_state(SyncState::Backoff);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(SyncState::Closing);
        info!("sync loop stopped");
        self.set_state(SyncState::Closed);
        Ok(())
    }

    /// Runs the loop on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> SyncHandle {
        let span = info_span!("sync", user_id = %self.api.user_id());
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(&token).await }.instrument(span));
        SyncHandle { cancel, task }
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a sync loop running on a background task.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<SyncResult<()>>,
}

impl SyncHandle {
    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Returns the loop's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the loop and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns the storage error that stopped the loop, if any.
    pub async fn stop(self) -> SyncResult<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the loop to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns the storage error that stopped the loop, or
    /// [`SyncError::InvalidState`] if the task panicked.
    pub async fn join(self) -> SyncResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::InvalidState(format!("sync task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpClient, HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use roomsync_store::{InMemoryBackend, Indexer, StoreConfig};
    use roomsync_types::{event_type, Event, EventId, JoinedRoom, RoomId, SyncResponse};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted sync responses, then hangs until dropped.
    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<SyncResult<HttpResponse>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Script {
        fn push_ok(&self, next_batch: &str, event: &str) {
            let mut joined = JoinedRoom::default();
            let mut e = Event::new(event_type::ROOM_MESSAGE, json!({"body": event}));
            e.event_id = Some(EventId::from(event));
            joined.timeline.events.push(e);
            let mut payload = SyncResponse {
                next_batch: next_batch.into(),
                ..SyncResponse::default()
            };
            payload.rooms.join.insert(RoomId::from("!r:hs"), joined);
            let body = serde_json::to_value(&payload).unwrap();
            self.replies
                .lock()
                .push_back(Ok(HttpResponse::json_value(200, &body)));
        }

        fn push_err(&self) {
            self.replies
                .lock()
                .push_back(Err(SyncError::transport_retryable("connection reset")));
        }

        fn since_params(&self) -> Vec<Option<String>> {
            self.requests
                .lock()
                .iter()
                .map(|r| r.query_param("since").map(str::to_owned))
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for Script {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            self.requests.lock().push(request);
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn client_over(
        script: Arc<Script>,
        store: Arc<StateStore>,
    ) -> SyncClient {
        let index = Arc::new(Indexer::in_memory(&StoreConfig::default()).unwrap());
        let registry = Arc::new(HandlerRegistry::new(Arc::clone(&store), index));
        let api = Api::new(script, "@me:hs".into(), "token");
        SyncClient::new(api, registry, store, fast_config())
    }

    fn memory_store() -> Arc<StateStore> {
        Arc::new(StateStore::in_memory(StoreConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn sync_once_persists_token_after_apply() {
        let script = Arc::new(Script::default());
        script.push_ok("s1", "$a");
        script.push_ok("s2", "$b");
        let store = memory_store();
        let client = client_over(Arc::clone(&script), Arc::clone(&store));
        let cancel = CancellationToken::new();

        assert_eq!(client.sync_once(&cancel).await.unwrap(), 1);
        assert_eq!(store.resume_token().as_deref(), Some("s1"));
        client.sync_once(&cancel).await.unwrap();

        assert_eq!(script.since_params(), vec![None, Some("s1".to_owned())]);
        assert_eq!(client.stats().cycles_completed, 2);
        assert_eq!(client.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn failure_does_not_advance_token() {
        let script = Arc::new(Script::default());
        script.push_err();
        let store = memory_store();
        let client = client_over(script, Arc::clone(&store));

        let err = client.sync_once(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.resume_token().is_none());
    }

    #[tokio::test]
    async fn run_retries_then_stops_on_cancel() {
        let script = Arc::new(Script::default());
        script.push_err();
        script.push_err();
        script.push_ok("s1", "$a");
        let store = memory_store();
        let client = Arc::new(client_over(Arc::clone(&script), Arc::clone(&store)));
        let handle = Arc::clone(&client).spawn(CancellationToken::new());

        // The loop hangs on the fourth request once the script runs dry.
        while script.requests.lock().len() < 4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.stop().await.unwrap();

        assert_eq!(store.resume_token().as_deref(), Some("s1"));
        let stats = client.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(client.state(), SyncState::Closed);
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_poll() {
        let script = Arc::new(Script::default());
        let client = client_over(script, memory_store());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(5), client.run(&cancel)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn storage_fault_halts_loop() {
        let script = Arc::new(Script::default());
        script.push_ok("s1", "$a");
        let backend = InMemoryBackend::new();
        let store = Arc::new(
            StateStore::with_backend(Box::new(backend.handle()), StoreConfig::default()).unwrap(),
        );
        backend.fail_writes(true);
        let client = client_over(script, Arc::clone(&store));

        let err = client.run(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_storage_fault());
        assert_eq!(client.state(), SyncState::Closed);
        assert!(store.resume_token().is_none());
    }
}
