//! Backward history cursor over one room.
//!
//! A [`RoomPaginator`] hands out a room's history newest first, in batches of
//! at most `limit` events, each batch ordered oldest to newest. It drains the
//! cached timeline once, then follows `/messages` backward from the room's
//! pagination token.
//!
//! The paginator is single-owner: `paginate` takes `&mut self`.

use crate::api::Api;
use crate::error::{SyncError, SyncResult};
use roomsync_store::StateStore;
use roomsync_types::{Direction, Event, EventId, RoomId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Stateful backward cursor over a room's history.
pub struct RoomPaginator {
    store: Arc<StateStore>,
    api: Api,
    room: RoomId,
    limit: usize,
    page_size: usize,
    /// Events not returned yet, oldest first.
    buffer: VecDeque<Event>,
    /// Oldest event held or already returned.
    earliest_seen: Option<EventId>,
    /// Token to continue backward from.
    last_batch: Option<String>,
    /// The cached timeline was consumed.
    drained_local: bool,
    /// Remote history is exhausted.
    on_top: bool,
}

impl RoomPaginator {
    /// Creates a cursor returning at most `limit` events per call and
    /// fetching `page_size` events per remote request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] if `limit` or `page_size` is 0.
    pub fn new(
        store: Arc<StateStore>,
        api: Api,
        room: RoomId,
        limit: usize,
        page_size: usize,
    ) -> SyncResult<Self> {
        if limit == 0 {
            return Err(SyncError::InvalidArgument(
                "paginator limit must be non-zero".into(),
            ));
        }
        if page_size == 0 {
            return Err(SyncError::InvalidArgument(
                "paginator page size must be non-zero".into(),
            ));
        }
        Ok(Self {
            store,
            api,
            room,
            limit,
            page_size,
            buffer: VecDeque::new(),
            earliest_seen: None,
            last_batch: None,
            drained_local: false,
            on_top: false,
        })
    }

    /// The room being paginated.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Maximum events per call.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Events fetched but not returned yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true once every event has been returned. Later calls to
    /// [`RoomPaginator::paginate`] return nothing.
    pub fn is_on_top(&self) -> bool {
        self.on_top && self.buffer.is_empty()
    }

    /// Returns the next batch of older events, oldest first.
    ///
    /// If a remote fetch fails after some events were buffered, the error is
    /// logged, the cursor is marked as on top and the buffer is returned as
    /// the final batch. A cancelled fetch returns the buffer without marking
    /// the cursor, so a later call may continue.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if nothing is buffered.
    pub async fn paginate(&mut self, cancel: &CancellationToken) -> SyncResult<Vec<Event>> {
        if self.is_on_top() {
            return Ok(Vec::new());
        }

        if self.need_fill() {
            if let Err(e) = self.fill(cancel).await {
                if self.buffer.is_empty() {
                    return Err(e);
                }
                if !e.is_cancelled() {
                    warn!(room_id = %self.room, error = %e, "history fetch failed, returning buffered events");
                    self.on_top = true;
                }
                return Ok(self.buffer.drain(..).collect());
            }
        }

        let split = self.buffer.len().saturating_sub(self.limit);
        Ok(self.buffer.split_off(split).into())
    }

    fn need_fill(&self) -> bool {
        self.buffer.len() < self.limit && !self.on_top
    }

    async fn fill(&mut self, cancel: &CancellationToken) -> SyncResult<()> {
        if !self.drained_local {
            self.drained_local = true;
            if let Some(events) = self.store.timeline(&self.room) {
                debug!(room_id = %self.room, events = events.len(), "seeding paginator from cache");
                self.prepend(events);
                if !self.need_fill() {
                    return Ok(());
                }
            }
        }

        let mut from = match self.last_batch.clone() {
            Some(token) => Some(token),
            None => self.initial_token(cancel).await?,
        };

        while self.need_fill() {
            let page = self
                .api
                .messages(
                    &self.room,
                    from.as_deref(),
                    Direction::Backward,
                    self.page_size,
                    cancel,
                )
                .await?;
            trace!(room_id = %self.room, from = ?from, start = %page.start, end = ?page.end, "history page");

            let exhausted = page.is_exhausted();
            let mut events = page.chunk;
            events.reverse();
            let events = self.seek(events);
            self.prepend(events);

            if exhausted {
                debug!(room_id = %self.room, "reached the start of history");
                self.on_top = true;
            } else {
                self.last_batch = page.end;
                from.clone_from(&self.last_batch);
            }
        }
        Ok(())
    }

    /// Finds a token to start fetching older events from.
    ///
    /// Prefers the stored pagination token. Without one, derives a token next
    /// to the oldest event seen and stores it if that event is still the
    /// oldest cached one. `None` means "start at the latest event".
    async fn initial_token(&mut self, cancel: &CancellationToken) -> SyncResult<Option<String>> {
        if let Some(token) = self.store.prev_batch(&self.room) {
            return Ok(Some(token));
        }
        let Some(earliest) = self.earliest_seen.clone() else {
            return Ok(None);
        };

        let context = self.api.context(&self.room, &earliest, 0, cancel).await?;
        let Some(start) = context.start else {
            return Ok(None);
        };
        if self.store.first_timeline_event(&self.room).as_ref() == Some(&earliest) {
            self.store.set_prev_batch(&self.room, start.as_str())?;
        }
        Ok(Some(start))
    }

    /// Drops events at or after the oldest event seen so far.
    ///
    /// If that event is not in the page, the whole page is kept.
    fn seek(&self, mut events: Vec<Event>) -> Vec<Event> {
        let Some(earliest) = &self.earliest_seen else {
            return events;
        };
        match events
            .iter()
            .position(|e| e.event_id.as_ref() == Some(earliest))
        {
            Some(index) => {
                trace!(room_id = %self.room, event_id = %earliest, "seeked to earliest event");
                events.truncate(index);
            }
            None => {
                debug!(room_id = %self.room, event_id = %earliest, "earliest event not in page");
            }
        }
        events
    }

    fn prepend(&mut self, events: Vec<Event>) {
        for event in events.into_iter().rev() {
            self.buffer.push_front(event);
        }
        if let Some(id) = self.buffer.front().and_then(|e| e.event_id.clone()) {
            self.earliest_seen = Some(id);
        }
    }
}

impl std::fmt::Debug for RoomPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomPaginator")
            .field("room", &self.room)
            .field("limit", &self.limit)
            .field("buffered", &self.buffer.len())
            .field("earliest_seen", &self.earliest_seen)
            .field("drained_local", &self.drained_local)
            .field("on_top", &self.on_top)
            .finish_non_exhaustive()
    }
}
