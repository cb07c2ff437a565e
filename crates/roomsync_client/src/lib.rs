//! # roomsync client
//!
//! Sync loop, event dispatch and history access on top of the roomsync
//! cache.
//!
//! This crate provides:
//! - an HTTP transport abstraction ([`HttpClient`]) with a `reqwest`
//!   implementation and a transport-wide response cache
//! - a path-prefix middleware chain ([`Interceptor`])
//! - the long-poll sync loop ([`SyncClient`])
//! - apply-then-notify dispatch of sync payloads ([`HandlerRegistry`])
//! - a backward history cursor ([`RoomPaginator`])
//! - the [`Client`] session handle tying it all together
//!
//! ## Data flow
//!
//! ```text
//! homeserver ─► ReqwestClient ─► CachingClient ─► Interceptor ─► Api
//!                                                                 │
//!              SyncClient ─► HandlerRegistry ─► StateStore + Indexer ─► subscribers
//! ```
//!
//! ## Key invariants
//!
//! - A subscriber never observes an event the cache does not hold yet
//! - The resume token is persisted only after its payload is applied
//! - Long-poll requests never go through the response cache
//! - Every network call honours the caller's cancellation token
//! - Storage faults stop the sync loop; network faults are retried
//!
//! ## Example
//!
//! ```rust,no_run
//! use roomsync_client::{Client, ClientConfig, EventCategory, TypeFilter};
//!
//! # async fn run() -> roomsync_client::SyncResult<()> {
//! let config = ClientConfig::new("https://matrix.example.org", "@alice:example.org", "token");
//! let client = Client::open(config)?;
//!
//! client.registry().subscribe(
//!     EventCategory::Timeline,
//!     TypeFilter::Exact("m.room.message".into()),
//!     |room, event| println!("{room:?}: {:?}", event.content),
//! );
//! client.start_sync()?;
//! # client.close().await
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod cache;
mod client;
mod config;
mod error;
mod handler;
mod interceptor;
mod paginator;
mod sync;
mod transport;

pub use api::{Api, CLIENT_PREFIX, SYNC_PATH};
pub use cache::{CachingClient, DEFAULT_MAX_ENTRIES};
pub use client::{Client, MemberName, ToggleOutcome, UnreadCount, SPACE_ROOM_TYPE};
pub use config::{ClientConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use handler::{DispatchedEvent, EventCategory, HandlerId, HandlerRegistry, TypeFilter};
pub use interceptor::{Interceptor, InterceptorHandle, Middleware, Next, NoStore};
pub use paginator::RoomPaginator;
pub use sync::{SyncClient, SyncHandle, SyncState, SyncStats};
pub use transport::{CachePolicy, HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};

pub use roomsync_types::{latest_message, PowerAction};
pub use tokio_util::sync::CancellationToken;
