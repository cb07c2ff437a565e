//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod members;
pub mod timeline;
pub mod verify;

use roomsync_store::{AccountStore, StoreConfig};
use std::path::Path;
use tracing::debug;

/// Opens an existing account directory, taking its session lock.
///
/// Refuses to create a fresh cache at a mistyped path.
pub(crate) fn open_account(path: &Path) -> Result<AccountStore, Box<dyn std::error::Error>> {
    if !path.join("state.log").exists() && !path.join("index.log").exists() {
        return Err(format!("No account cache found at {:?}", path).into());
    }
    debug!(path = ?path, "opening account cache");
    Ok(AccountStore::open_dir(path, StoreConfig::default())?)
}

/// Formats a byte count for humans.
pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
