//! Configuration for the client and its sync loop.

use crate::cache::DEFAULT_MAX_ENTRIES;
use rand::Rng;
use roomsync_store::StoreConfig;
use roomsync_types::UserId;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the long-poll sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long the server may hold a sync request open.
    pub timeout: Duration,
    /// Delay before the first retry after a failure.
    pub min_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to retry delays.
    pub add_jitter: bool,
    /// Maximum timeline events per room in one sync response.
    pub timeline_limit: usize,
    /// Whether the server may omit member events not needed for display.
    pub lazy_load_members: bool,
    /// Whether left rooms are included in sync responses.
    pub include_leave: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the long-poll timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the minimum and maximum retry delay.
    #[must_use]
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables retry jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Sets the per-room timeline limit requested from the server.
    #[must_use]
    pub fn with_timeline_limit(mut self, limit: usize) -> Self {
        self.timeline_limit = limit;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-based).
    ///
    /// Attempt 0 has no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.min_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_backoff.as_secs_f64());

        if self.add_jitter {
            let jitter = delay * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay + jitter)
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Returns the sync filter sent with every long-poll request.
    #[must_use]
    pub fn filter_json(&self) -> String {
        serde_json::json!({
            "room": {
                "include_leave": self.include_leave,
                "timeline": { "limit": self.timeline_limit },
                "state": { "lazy_load_members": self.lazy_load_members },
            }
        })
        .to_string()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: false,
            timeline_limit: 500,
            lazy_load_members: true,
            include_leave: true,
        }
    }
}

/// Configuration for a [`Client`](crate::Client) session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    pub homeserver: String,
    /// The logged-in user.
    pub user_id: UserId,
    /// Bearer token for every request.
    pub access_token: String,
    /// Directory holding one cache directory per account.
    pub data_dir: PathBuf,
    /// Local cache settings.
    pub store: StoreConfig,
    /// Sync loop settings.
    pub sync: SyncConfig,
    /// How long successful GET responses are served from the response cache.
    pub response_cache_ttl: Duration,
    /// Most responses the response cache holds at once.
    pub response_cache_entries: usize,
    /// Events requested per history page when paginating.
    pub page_size: usize,
}

impl ClientConfig {
    /// Creates a configuration for one account.
    pub fn new(
        homeserver: impl Into<String>,
        user_id: impl Into<UserId>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            homeserver: homeserver.into(),
            user_id: user_id.into(),
            access_token: access_token.into(),
            data_dir: PathBuf::from("roomsync-data"),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            response_cache_ttl: Duration::from_secs(60),
            response_cache_entries: DEFAULT_MAX_ENTRIES,
            page_size: 100,
        }
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the local cache configuration.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the sync loop configuration.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the response cache lifetime. Zero disables the cache.
    #[must_use]
    pub fn with_response_cache_ttl(mut self, ttl: Duration) -> Self {
        self.response_cache_ttl = ttl;
        self
    }

    /// Sets how many responses the response cache may hold.
    #[must_use]
    pub fn with_response_cache_entries(mut self, entries: usize) -> Self {
        self.response_cache_entries = entries;
        self
    }

    /// Sets the history page size.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let config = SyncConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(50), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = SyncConfig::default().with_jitter(true);
        for _ in 0..20 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn filter_carries_limits() {
        let filter: serde_json::Value =
            serde_json::from_str(&SyncConfig::default().with_timeline_limit(20).filter_json())
                .unwrap();
        assert_eq!(filter["room"]["timeline"]["limit"], 20);
        assert_eq!(filter["room"]["state"]["lazy_load_members"], true);
    }

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("https://hs.example", "@me:hs.example", "token")
            .with_data_dir("/tmp/cache")
            .with_page_size(25);
        assert_eq!(config.user_id, UserId::from("@me:hs.example"));
        assert_eq!(config.page_size, 25);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.response_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.response_cache_entries, DEFAULT_MAX_ENTRIES);
    }
}
