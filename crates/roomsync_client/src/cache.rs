//! Transport-wide response cache.

use crate::error::SyncResult;
use crate::transport::{CachePolicy, HttpClient, HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Default bound on the number of cached responses.
pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Caches successful `GET` responses for a fixed time.
///
/// Requests marked [`CachePolicy::NoStore`] always reach the inner client
/// and their responses are never stored. Any other method clears the cache,
/// since a write may change what later reads return. Expired responses are
/// dropped whenever a new one is stored, and the oldest entry gives way once
/// the cache is full.
pub struct CachingClient<C> {
    inner: C,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, (Instant, HttpResponse)>>,
    hits: AtomicU64,
}

impl<C: HttpClient> CachingClient<C> {
    /// Wraps `inner`. A zero `ttl` disables caching.
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
        }
    }

    /// Caps the number of cached responses. Zero disables caching.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Returns the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Number of responses served from the cache so far.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cached responses, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every cached response.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn lookup(&self, key: &str) -> Option<HttpResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, response)) if stored.elapsed() < self.ttl => Some(response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, response: HttpResponse) {
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, (stored, _)| stored.elapsed() < ttl);

        while entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (stored, _))| *stored)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
        entries.insert(key, (Instant::now(), response));
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for CachingClient<C> {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        if request.method != Method::Get {
            self.clear();
            return self.inner.send(request).await;
        }
        if request.cache == CachePolicy::NoStore || self.ttl.is_zero() || self.max_entries == 0 {
            return self.inner.send(request).await;
        }

        let key = request.cache_key();
        if let Some(response) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(path = %request.path, "response cache hit");
            return Ok(response);
        }

        let response = self.inner.send(request).await?;
        if response.is_success() {
            self.store(key, response.clone());
        }
        Ok(response)
    }
}

impl<C> std::fmt::Debug for CachingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingClient")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for Counting {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if request.path == "/missing" {
                return Ok(HttpResponse::new(404, "{}"));
            }
            Ok(HttpResponse::new(200, format!("{n}")))
        }
    }

    #[tokio::test]
    async fn get_is_cached() {
        let client = CachingClient::new(Counting::default(), Duration::from_secs(60));
        let first = client.send(HttpRequest::get("/a")).await.unwrap();
        let second = client.send(HttpRequest::get("/a")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.hits(), 1);
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_store_bypasses_cache() {
        let client = CachingClient::new(Counting::default(), Duration::from_secs(60));
        let request = HttpRequest::get("/sync").with_cache(CachePolicy::NoStore);
        client.send(request.clone()).await.unwrap();
        client.send(request).await.unwrap();

        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 2);
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn errors_and_writes_are_not_cached() {
        let client = CachingClient::new(Counting::default(), Duration::from_secs(60));
        client.send(HttpRequest::get("/missing")).await.unwrap();
        assert!(client.is_empty());

        client.send(HttpRequest::get("/a")).await.unwrap();
        assert_eq!(client.len(), 1);
        client
            .send(HttpRequest::put("/a", serde_json::json!({})))
            .await
            .unwrap();
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_insert() {
        let client = CachingClient::new(Counting::default(), Duration::from_millis(1));
        for i in 0..200 {
            client
                .send(HttpRequest::get(format!("/messages?from=t{i}")))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.send(HttpRequest::get("/a")).await.unwrap();
        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn full_cache_drops_oldest() {
        let client =
            CachingClient::new(Counting::default(), Duration::from_secs(60)).with_max_entries(2);
        client.send(HttpRequest::get("/a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        client.send(HttpRequest::get("/b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        client.send(HttpRequest::get("/c")).await.unwrap();
        assert_eq!(client.len(), 2);

        client.send(HttpRequest::get("/c")).await.unwrap();
        client.send(HttpRequest::get("/b")).await.unwrap();
        assert_eq!(client.hits(), 2);
        client.send(HttpRequest::get("/a")).await.unwrap();
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let client = CachingClient::new(Counting::default(), Duration::ZERO);
        client.send(HttpRequest::get("/a")).await.unwrap();
        client.send(HttpRequest::get("/a")).await.unwrap();
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 2);
    }
}
