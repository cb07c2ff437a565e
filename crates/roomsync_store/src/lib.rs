//! # roomsync store
//!
//! Durable local cache for roomsync: room state, bounded timelines,
//! pagination tokens, account data and a member-name index.
//!
//! Both the [`StateStore`] and the [`Indexer`] persist to a framed,
//! append-only log ([`FrameLog`]) over an opaque [`StorageBackend`]. Each
//! committed batch is one checksummed frame; on open the log is replayed and
//! any torn tail is cut off. Logs are periodically rewritten as a single
//! snapshot frame.
//!
//! ## Layout
//!
//! An [`AccountStore`] owns one directory per account, named by
//! [`account_dir_name`], and holds an exclusive lock on it for the session.
//!
//! ## Example
//!
//! ```rust
//! use roomsync_store::{AccountStore, StoreConfig};
//! use roomsync_types::{Event, RoomId};
//! use serde_json::json;
//!
//! let store = AccountStore::in_memory(StoreConfig::default()).unwrap();
//! let room = RoomId::from("!lobby:example.org");
//!
//! let mut batch = store.state().write();
//! batch.append_timeline(&room, vec![Event::new("m.room.message", json!({"body": "hi"}))]);
//! batch.set_resume_token("s1");
//! batch.commit().unwrap();
//!
//! assert_eq!(store.state().timeline(&room).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod backend;
mod config;
mod dir;
mod error;
mod file;
mod index;
mod log;
mod memory;
mod state;

pub use account::{verify_dir, AccountStore, VerifyReport};
pub use backend::StorageBackend;
pub use config::{StoreConfig, DEFAULT_TIMELINE_KEEP_LAST};
pub use dir::{account_dir_name, AccountDir};
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use index::{IndexBatch, IndexEntry, IndexStats, Indexer};
pub use log::{compute_crc32, FrameKind, FrameLog, ScanReport, LOG_MAGIC, LOG_VERSION};
pub use memory::InMemoryBackend;
pub use state::{StateStore, StoreStats, WriteBatch};
