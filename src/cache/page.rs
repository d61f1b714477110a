use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CachedResponse, KeyStrategy, PAGE_CACHE_PREFIX};
use crate::{
    Request, Response,
    context::Context,
    persistence::{CacheError, CacheStore, Expiration, SharedStore},
    router::IntoHandler,
};

/// Caches the responses of one route handler.
///
/// On a hit the stored page is served and the handler is not called. On a
/// miss the handler runs and its response is stored when the status is below
/// 300. A response carrying `Cache-Control: no-store` is never stored and
/// evicts any page already cached under its key.
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
/// use rttp_cache::{Context, Response, Router, StatusCode};
/// use rttp_cache::cache::PageCache;
/// use rttp_cache::persistence::{InMemoryStore, SharedStore};
///
/// let store: SharedStore = Arc::new(InMemoryStore::default());
/// let mut router = Router::new();
/// router.get(
///     "/report",
///     PageCache::new(store, Duration::from_secs(30))
///         .without_query()
///         .wrap(|_ctx: Context| async { Response::new(StatusCode::Ok).body("expensive") }),
/// );
/// ```
#[derive(Clone)]
pub struct PageCache {
    store: SharedStore,
    expiration: Expiration,
    strategy: KeyStrategy,
    prefix: String,
    restore_headers: bool,
    lock: Option<Arc<Mutex<()>>>,
}

impl PageCache {
    /// A zero `expire` duration means the store's default expiration.
    pub fn new(store: SharedStore, expire: impl Into<Expiration>) -> Self {
        Self {
            store,
            expiration: expire.into(),
            strategy: KeyStrategy::RequestUri,
            prefix: PAGE_CACHE_PREFIX.to_owned(),
            restore_headers: true,
            lock: None,
        }
    }

    /// Key on the path alone, so every query string shares one entry.
    #[must_use]
    pub fn without_query(mut self) -> Self {
        self.strategy = KeyStrategy::Path;
        self
    }

    /// Key on the request body as well as the URI.
    #[must_use]
    pub fn with_request_body(mut self) -> Self {
        self.strategy = KeyStrategy::RequestUriAndBody;
        self
    }

    /// Serve hits with their status and body only.
    #[must_use]
    pub fn without_header(mut self) -> Self {
        self.restore_headers = false;
        self
    }

    /// Serialize lookup and population, so concurrent misses run the handler once.
    #[must_use]
    pub fn atomic(mut self) -> Self {
        self.lock = Some(Arc::new(Mutex::new(())));
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn key_for(&self, request: &Request) -> String {
        self.strategy.key_for(&self.prefix, request)
    }

    /// Decorates `handler`; the result registers with the [`Router`](crate::Router).
    pub fn wrap<H>(self, handler: H) -> impl IntoHandler
    where
        H: IntoHandler,
    {
        let page = Arc::new(self);
        let handler = Arc::new(handler);
        move |ctx: Context| {
            let page = Arc::clone(&page);
            let handler = Arc::clone(&handler);
            async move { page.serve(ctx, &*handler).await }
        }
    }

    async fn serve<H>(&self, ctx: Context, handler: &H) -> Response
    where
        H: IntoHandler,
    {
        let _guard = match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let key = self.key_for(ctx.request());
        if let Some(hit) = lookup(self.store.as_ref(), &key).await {
            debug!(key = %key, status = hit.status.as_u16(), "page cache hit");
            return hit.into_response(self.restore_headers);
        }

        let response = handler.call(ctx).await;
        populate(self.store.as_ref(), &key, &response, self.expiration).await;
        response
    }
}

/// Reads a page. Misses, store failures and corrupt entries all yield `None`.
pub(crate) async fn lookup(store: &dyn CacheStore, key: &str) -> Option<CachedResponse> {
    match store.get(key).await {
        Ok(bytes) => match CachedResponse::decode(&bytes) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring undecodable cached page");
                None
            }
        },
        Err(CacheError::CacheMiss) => {
            debug!(key = %key, "page cache miss");
            None
        }
        Err(e) => {
            warn!(key = %key, adapter = store.adapter(), error = %e, "page cache lookup failed");
            None
        }
    }
}

/// Stores `response` under `key` if it is cacheable. Failures are logged only.
pub(crate) async fn populate(
    store: &dyn CacheStore,
    key: &str,
    response: &Response,
    expiration: Expiration,
) {
    if is_no_store(response) {
        match store.delete(key).await {
            Ok(()) => debug!(key = %key, "evicted page marked no-store"),
            Err(CacheError::CacheMiss) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to evict cached page"),
        }
        return;
    }

    let status = response.status();
    if !status.is_cacheable() {
        debug!(key = %key, status = status.as_u16(), "response not cacheable");
        return;
    }

    let snapshot = CachedResponse::from_response(response);
    if snapshot.headers.len() > CachedResponse::MAX_HEADERS {
        debug!(key = %key, headers = snapshot.headers.len(), "too many headers to cache");
        return;
    }
    if let Err(e) = store.set(key, snapshot.encode(), expiration).await {
        warn!(key = %key, adapter = store.adapter(), error = %e, "failed to store page");
    }
}

fn is_no_store(response: &Response) -> bool {
    response
        .headers()
        .get_all("cache-control")
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
}

/// Caches `handler` keyed by request URI.
pub fn cache_page<H>(store: SharedStore, expire: impl Into<Expiration>, handler: H) -> impl IntoHandler
where
    H: IntoHandler,
{
    PageCache::new(store, expire).wrap(handler)
}

/// Caches `handler` keyed by path, ignoring the query string.
pub fn cache_page_without_query<H>(
    store: SharedStore,
    expire: impl Into<Expiration>,
    handler: H,
) -> impl IntoHandler
where
    H: IntoHandler,
{
    PageCache::new(store, expire).without_query().wrap(handler)
}

/// Caches `handler` keyed by request URI and body.
pub fn cache_page_with_request_body<H>(
    store: SharedStore,
    expire: impl Into<Expiration>,
    handler: H,
) -> impl IntoHandler
where
    H: IntoHandler,
{
    PageCache::new(store, expire).with_request_body().wrap(handler)
}

/// [`cache_page`] with lookup and population serialized per handler.
pub fn cache_page_atomic<H>(
    store: SharedStore,
    expire: impl Into<Expiration>,
    handler: H,
) -> impl IntoHandler
where
    H: IntoHandler,
{
    PageCache::new(store, expire).atomic().wrap(handler)
}

/// [`cache_page`] serving hits without their stored headers.
pub fn cache_page_without_header<H>(
    store: SharedStore,
    expire: impl Into<Expiration>,
    handler: H,
) -> impl IntoHandler
where
    H: IntoHandler,
{
    PageCache::new(store, expire).without_header().wrap(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;

    fn response_with(cache_control: &str) -> Response {
        Response::new(StatusCode::Ok).header("Cache-Control", cache_control)
    }

    #[test]
    fn no_store_directive_is_detected_in_lists() {
        assert!(is_no_store(&response_with("no-store")));
        assert!(is_no_store(&response_with("private, No-Store")));
        assert!(!is_no_store(&response_with("no-cache, max-age=0")));
        assert!(!is_no_store(&Response::new(StatusCode::Ok)));
    }
}
