//! # roomsync testkit
//!
//! Test utilities for roomsync.
//!
//! This crate provides:
//! - [`FakeHomeserver`], an in-process [`HttpClient`](roomsync_client::HttpClient)
//!   with position-addressed history, failure injection and a request log
//! - event builders and client helpers ([`fixtures`])
//! - proptest strategies ([`generators`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn paginates() {
//!     let server = Arc::new(FakeHomeserver::default());
//!     server.push_events(&test_room(), messages("$m", 30));
//!     let client = memory_client(&server);
//!     let mut pager = client.room_paginator(&test_room(), 10).unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod homeserver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::homeserver::*;
    pub use std::sync::Arc;
}

pub use homeserver::{is_no_store, Failure, FakeHomeserver};
