//! Path-prefix request middleware.
//!
//! An [`Interceptor`] wraps a transport and runs every outgoing request
//! through the middlewares whose prefix matches the request path, in
//! registration order. Each middleware receives a [`Next`] to continue the
//! chain; not calling it short-circuits the request.

use crate::error::SyncResult;
use crate::transport::{CachePolicy, HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A request middleware.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles `request`, usually by calling `next.run(request)`.
    async fn handle(&self, request: HttpRequest, next: Next) -> SyncResult<HttpResponse>;
}

struct Registration {
    id: u64,
    prefix: String,
    middleware: Arc<dyn Middleware>,
}

type Chain = Arc<Vec<Arc<Registration>>>;

/// The rest of a middleware chain.
pub struct Next {
    chain: Chain,
    position: usize,
    transport: Arc<dyn HttpClient>,
}

impl Next {
    /// Runs the remaining matching middlewares, then the transport.
    pub async fn run(mut self, request: HttpRequest) -> SyncResult<HttpResponse> {
        while let Some(registration) = self.chain.get(self.position).cloned() {
            self.position += 1;
            if request.path.starts_with(&registration.prefix) {
                return registration.middleware.handle(request, self).await;
            }
        }
        self.transport.send(request).await
    }
}

struct Inner {
    transport: Arc<dyn HttpClient>,
    // Replaced wholesale on change so in-flight requests keep their chain.
    chain: RwLock<Chain>,
    next_id: AtomicU64,
}

/// Ordered chain of path-prefix middlewares in front of a transport.
///
/// Cheap to clone; clones share the chain.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

impl Interceptor {
    /// Wraps `transport`.
    pub fn new(transport: Arc<dyn HttpClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                chain: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers `middleware` for request paths starting with `prefix`.
    ///
    /// The middleware runs after every previously registered match.
    pub fn add(
        &self,
        prefix: impl Into<String>,
        middleware: impl Middleware + 'static,
    ) -> InterceptorHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            id,
            prefix: prefix.into(),
            middleware: Arc::new(middleware),
        });

        let mut chain = self.inner.chain.write();
        let mut updated = Vec::clone(&chain);
        debug!(id, prefix = %registration.prefix, "middleware registered");
        updated.push(registration);
        *chain = Arc::new(updated);

        InterceptorHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.chain.read().len()
    }

    /// Returns true if no middleware is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.chain.read().is_empty()
    }
}

#[async_trait]
impl HttpClient for Interceptor {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let chain = Arc::clone(&self.inner.chain.read());
        Next {
            chain,
            position: 0,
            transport: Arc::clone(&self.inner.transport),
        }
        .run(request)
        .await
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("middlewares", &self.len())
            .finish_non_exhaustive()
    }
}

/// Removes a middleware registered with [`Interceptor::add`].
///
/// Dropping the handle keeps the middleware registered.
#[derive(Debug)]
pub struct InterceptorHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl InterceptorHandle {
    /// Deregisters the middleware. Returns false if it was already gone.
    pub fn deregister(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut chain = inner.chain.write();
        if !chain.iter().any(|r| r.id == self.id) {
            return false;
        }
        let updated: Vec<_> = chain.iter().filter(|r| r.id != self.id).cloned().collect();
        *chain = Arc::new(updated);
        debug!(id = self.id, "middleware deregistered");
        true
    }
}

/// Middleware that exempts matching requests from response caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

#[async_trait]
impl Middleware for NoStore {
    async fn handle(&self, request: HttpRequest, next: Next) -> SyncResult<HttpResponse> {
        next.run(request.with_cache(CachePolicy::NoStore)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Echoes the request's cache policy and the path back.
    struct Echo;

    #[async_trait]
    impl HttpClient for Echo {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            Ok(HttpResponse::new(
                200,
                format!("{:?} {}", request.cache, request.path),
            ))
        }
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(&self, request: HttpRequest, next: Next) -> SyncResult<HttpResponse> {
            self.log.lock().push(self.name);
            next.run(request).await
        }
    }

    struct Teapot;

    #[async_trait]
    impl Middleware for Teapot {
        async fn handle(&self, _request: HttpRequest, _next: Next) -> SyncResult<HttpResponse> {
            Ok(HttpResponse::new(418, "short-circuit"))
        }
    }

    fn body(response: &HttpResponse) -> String {
        String::from_utf8(response.body.clone()).unwrap()
    }

    #[tokio::test]
    async fn runs_matching_middlewares_in_order() {
        let interceptor = Interceptor::new(Arc::new(Echo));
        let log = Arc::new(Mutex::new(Vec::new()));
        for (prefix, name) in [("/a", "first"), ("/b", "other"), ("/a/b", "second")] {
            interceptor.add(prefix, Record { name, log: Arc::clone(&log) });
        }

        interceptor.send(HttpRequest::get("/a/b/c")).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_transport() {
        let interceptor = Interceptor::new(Arc::new(Echo));
        interceptor.add("/blocked", Teapot);

        let blocked = interceptor.send(HttpRequest::get("/blocked/x")).await.unwrap();
        assert_eq!(blocked.status, 418);
        let passed = interceptor.send(HttpRequest::get("/open")).await.unwrap();
        assert_eq!(passed.status, 200);
    }

    #[tokio::test]
    async fn deregister_removes_only_that_middleware() {
        let interceptor = Interceptor::new(Arc::new(Echo));
        let handle = interceptor.add("/x", Teapot);
        interceptor.add("/x", NoStore);
        assert_eq!(interceptor.len(), 2);

        assert!(handle.deregister());
        assert_eq!(interceptor.len(), 1);

        let response = interceptor.send(HttpRequest::get("/x")).await.unwrap();
        assert_eq!(body(&response), "NoStore /x");
    }

    #[tokio::test]
    async fn no_store_marks_request() {
        let interceptor = Interceptor::new(Arc::new(Echo));
        interceptor.add("/sync", NoStore);

        let sync = interceptor.send(HttpRequest::get("/sync")).await.unwrap();
        assert_eq!(body(&sync), "NoStore /sync");
        let other = interceptor.send(HttpRequest::get("/messages")).await.unwrap();
        assert_eq!(body(&other), "Default /messages");
    }
}
