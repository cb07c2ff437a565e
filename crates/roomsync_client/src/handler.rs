//! Apply-then-notify dispatch of sync payloads.
//!
//! [`HandlerRegistry::on_sync_payload`] is the only way sync data enters the
//! cache. For each payload it:
//!
//! 1. writes every room delta to the [`StateStore`] as one batch,
//! 2. indexes member events from the state sections and timelines as one
//!    [`Indexer`] batch,
//! 3. invokes matching subscribers, per category, in registration order.
//!
//! A subscriber therefore never sees an event the cache does not hold yet.

use parking_lot::RwLock;
use roomsync_store::{Indexer, StateStore, StoreResult};
use roomsync_types::{event_type, Event, RoomId, SyncResponse};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Which section of a sync payload an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Room state, from the state section or state events in a timeline.
    State,
    /// Room timeline events.
    Timeline,
    /// Ephemeral room events (receipts, typing).
    Ephemeral,
    /// Per-room account data.
    RoomAccountData,
    /// Global account data.
    AccountData,
}

impl EventCategory {
    const COUNT: usize = 5;

    const fn slot(self) -> usize {
        match self {
            Self::State => 0,
            Self::Timeline => 1,
            Self::Ephemeral => 2,
            Self::RoomAccountData => 3,
            Self::AccountData => 4,
        }
    }
}

/// Predicate on event types.
#[derive(Clone)]
pub enum TypeFilter {
    /// Every type.
    Any,
    /// Exactly this type.
    Exact(String),
    /// Types starting with this prefix.
    Prefix(String),
    /// Arbitrary predicate.
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl TypeFilter {
    /// Returns true if `event_type` passes the filter.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(t) => t == event_type,
            Self::Prefix(p) => event_type.starts_with(p.as_str()),
            Self::Custom(f) => f(event_type),
        }
    }
}

impl fmt::Debug for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Exact(t) => write!(f, "Exact({t})"),
            Self::Prefix(p) => write!(f, "Prefix({p})"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// An event delivered through [`HandlerRegistry::subscribe_channel`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    /// Section the event came from.
    pub category: EventCategory,
    /// Room, absent for global account data.
    pub room: Option<RoomId>,
    /// The event.
    pub event: Event,
}

type EventCallback = dyn Fn(Option<&RoomId>, &Event) + Send + Sync;
type SyncCallback = dyn Fn(&SyncResponse) + Send + Sync;
type ClosedCheck = dyn Fn() -> bool + Send + Sync;

struct Subscription {
    id: HandlerId,
    filter: TypeFilter,
    callback: Arc<EventCallback>,
    /// Reports that nobody receives this subscription's events any more.
    closed: Option<Box<ClosedCheck>>,
}

impl Subscription {
    fn is_closed(&self) -> bool {
        self.closed.as_ref().is_some_and(|closed| closed())
    }
}

#[derive(Default)]
struct Handlers {
    by_category: [Vec<Arc<Subscription>>; EventCategory::COUNT],
    on_sync: Vec<(HandlerId, Arc<SyncCallback>)>,
}

/// Publish/subscribe dispatcher wrapping the store and the index.
///
/// Callbacks run on the sync task and must return quickly; use
/// [`HandlerRegistry::subscribe_channel`] to hand slow work to another task.
pub struct HandlerRegistry {
    store: Arc<StateStore>,
    index: Arc<Indexer>,
    handlers: RwLock<Handlers>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    /// Creates a registry applying payloads to `store` and `index`.
    pub fn new(store: Arc<StateStore>, index: Arc<Indexer>) -> Self {
        Self {
            store,
            index,
            handlers: RwLock::new(Handlers::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `callback` for applied events of `category` passing
    /// `filter`. The callback receives the room (absent for global account
    /// data) and the event.
    pub fn subscribe<F>(&self, category: EventCategory, filter: TypeFilter, callback: F) -> HandlerId
    where
        F: Fn(Option<&RoomId>, &Event) + Send + Sync + 'static,
    {
        self.register(category, filter, Arc::new(callback), None)
    }

    /// Registers a channel receiving owned copies of matching events.
    ///
    /// Once the receiver is dropped the subscription is removed before the
    /// next payload is dispatched.
    pub fn subscribe_channel(
        &self,
        category: EventCategory,
        filter: TypeFilter,
    ) -> (HandlerId, mpsc::UnboundedReceiver<DispatchedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel::<DispatchedEvent>();
        let watch = tx.clone();
        let callback = move |room: Option<&RoomId>, event: &Event| {
            let sent = tx.send(DispatchedEvent {
                category,
                room: room.cloned(),
                event: event.clone(),
            });
            if sent.is_err() {
                trace!(event_type = %event.event_type, "channel receiver gone");
            }
        };
        let id = self.register(
            category,
            filter,
            Arc::new(callback),
            Some(Box::new(move || watch.is_closed())),
        );
        (id, rx)
    }

    fn register(
        &self,
        category: EventCategory,
        filter: TypeFilter,
        callback: Arc<EventCallback>,
        closed: Option<Box<ClosedCheck>>,
    ) -> HandlerId {
        let id = self.next_id();
        self.handlers.write().by_category[category.slot()].push(Arc::new(Subscription {
            id,
            filter,
            callback,
            closed,
        }));
        id
    }

    fn prune_closed(&self) {
        let any_closed = self
            .handlers
            .read()
            .by_category
            .iter()
            .flatten()
            .any(|sub| sub.is_closed());
        if !any_closed {
            return;
        }
        let mut handlers = self.handlers.write();
        for list in &mut handlers.by_category {
            list.retain(|sub| {
                let closed = sub.is_closed();
                if closed {
                    debug!(handler = sub.id.0, "removing closed channel subscription");
                }
                !closed
            });
        }
    }

    /// Registers `callback` for every whole payload, after all per-event
    /// callbacks of that payload ran.
    pub fn on_sync<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&SyncResponse) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.handlers.write().on_sync.push((id, Arc::new(callback)));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in &mut handlers.by_category {
            let before = list.len();
            list.retain(|s| s.id != id);
            removed |= list.len() != before;
        }
        let before = handlers.on_sync.len();
        handlers.on_sync.retain(|(h, _)| *h != id);
        removed || handlers.on_sync.len() != before
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        let handlers = self.handlers.read();
        handlers.by_category.iter().map(Vec::len).sum::<usize>() + handlers.on_sync.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies a sync payload, indexes its members, then notifies.
    ///
    /// Returns the number of events in the payload. The resume token is
    /// not touched; the caller persists it once this returns.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either batch fails to commit. No callback
    /// runs in that case.
    pub fn on_sync_payload(&self, payload: &SyncResponse) -> StoreResult<usize> {
        self.apply(payload)?;
        self.index_members(payload)?;
        self.dispatch(payload);

        let count = payload.event_count();
        debug!(
            events = count,
            rooms = payload.rooms.join.len() + payload.rooms.leave.len(),
            "sync payload applied"
        );
        Ok(count)
    }

    fn apply(&self, payload: &SyncResponse) -> StoreResult<()> {
        let mut batch = self.store.write();

        for (room, joined) in &payload.rooms.join {
            batch.ensure_room(room);
            for event in &joined.state.events {
                batch.put_state(room, event.clone());
            }
            batch.sync_timeline(
                room,
                joined.timeline.events.clone(),
                joined.timeline.limited,
                joined.timeline.prev_batch.clone(),
            );
            for event in &joined.ephemeral.events {
                batch.put_ephemeral(room, event.clone());
            }
            for event in &joined.account_data.events {
                batch.put_room_account_data(room, event.clone());
            }
        }

        for (room, left) in &payload.rooms.leave {
            batch.ensure_room(room);
            for event in &left.state.events {
                batch.put_state(room, event.clone());
            }
            if !left.timeline.events.is_empty() {
                batch.sync_timeline(
                    room,
                    left.timeline.events.clone(),
                    left.timeline.limited,
                    left.timeline.prev_batch.clone(),
                );
            }
            for event in &left.account_data.events {
                batch.put_room_account_data(room, event.clone());
            }
        }

        for event in &payload.account_data.events {
            batch.set_user_event(event.clone());
        }

        batch.commit()
    }

    fn index_members(&self, payload: &SyncResponse) -> StoreResult<()> {
        let mut batch = self.index.begin();

        let joined = payload
            .rooms
            .join
            .iter()
            .map(|(room, r)| (room, &r.state.events, &r.timeline.events));
        let left = payload
            .rooms
            .leave
            .iter()
            .map(|(room, r)| (room, &r.state.events, &r.timeline.events));

        for (room, state, timeline) in joined.chain(left) {
            for event in state.iter().chain(timeline.iter()) {
                if event.is_type(event_type::ROOM_MEMBER) && event.is_state() {
                    batch.index_room_member(room, event);
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        batch.commit()
    }

    fn dispatch(&self, payload: &SyncResponse) {
        self.prune_closed();

        // Callbacks may (un)subscribe, so run them on a snapshot.
        let (lists, on_sync) = {
            let handlers = self.handlers.read();
            (handlers.by_category.clone(), handlers.on_sync.clone())
        };
        let notify = |category: EventCategory, room: Option<&RoomId>, event: &Event| {
            for sub in &lists[category.slot()] {
                if sub.filter.matches(&event.event_type) {
                    trace!(handler = sub.id.0, event_type = %event.event_type, "dispatch");
                    (sub.callback)(room, event);
                }
            }
        };

        for (room, joined) in &payload.rooms.join {
            for event in &joined.state.events {
                notify(EventCategory::State, Some(room), &event.clone().in_room(room));
            }
            for event in &joined.timeline.events {
                let event = event.clone().in_room(room);
                if event.is_state() {
                    notify(EventCategory::State, Some(room), &event);
                }
                notify(EventCategory::Timeline, Some(room), &event);
            }
            for event in &joined.ephemeral.events {
                notify(EventCategory::Ephemeral, Some(room), &event.clone().in_room(room));
            }
            for event in &joined.account_data.events {
                notify(EventCategory::RoomAccountData, Some(room), &event.clone().in_room(room));
            }
        }

        for (room, left) in &payload.rooms.leave {
            for event in &left.state.events {
                notify(EventCategory::State, Some(room), &event.clone().in_room(room));
            }
            for event in &left.timeline.events {
                let event = event.clone().in_room(room);
                if event.is_state() {
                    notify(EventCategory::State, Some(room), &event);
                }
                notify(EventCategory::Timeline, Some(room), &event);
            }
            for event in &left.account_data.events {
                notify(EventCategory::RoomAccountData, Some(room), &event.clone().in_room(room));
            }
        }

        for event in &payload.account_data.events {
            notify(EventCategory::AccountData, None, event);
        }

        for (_, callback) in &on_sync {
            callback(payload);
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}
