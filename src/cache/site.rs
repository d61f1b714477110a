use std::{future::Future, pin::Pin, sync::Arc};

use super::{
    generate_key,
    page::{lookup, populate},
    PAGE_CACHE_PREFIX,
};
use crate::{
    Method, Request, Response,
    context::Context,
    middleware::{Middleware, Next},
    persistence::{Expiration, SharedStore},
};

/// Whole-site page cache, keyed by request URI.
///
/// Only safe methods (`GET`, `HEAD`, `OPTIONS`) are looked up or stored; other
/// requests pass straight through. `GET` pages use the plain URI key, the same
/// key [`create_key`](super::create_key) gives; `HEAD` and `OPTIONS` keys also
/// carry the method, so their responses never answer a `GET`. Cacheability follows
/// [`PageCache`](super::PageCache).
pub struct SiteCache {
    store: SharedStore,
    expiration: Expiration,
    prefix: String,
}

impl SiteCache {
    pub fn new(store: SharedStore, expire: impl Into<Expiration>) -> Self {
        Self {
            store,
            expiration: expire.into(),
            prefix: PAGE_CACHE_PREFIX.to_owned(),
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn key_for(&self, request: &Request) -> String {
        match request.method() {
            Method::Get => generate_key(&self.prefix, &request.uri()),
            method => generate_key(&self.prefix, &format!("{method} {}", request.uri())),
        }
    }
}

impl Middleware for SiteCache {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        if !ctx.request().method().is_safe() {
            return Box::pin(next.run(ctx));
        }

        let store = Arc::clone(&self.store);
        let expiration = self.expiration;
        let key = self.key_for(ctx.request());
        Box::pin(async move {
            if let Some(hit) = lookup(store.as_ref(), &key).await {
                tracing::debug!(key = %key, "site cache hit");
                return hit.into_response(true);
            }
            let response = next.run(ctx).await;
            populate(store.as_ref(), &key, &response, expiration).await;
            response
        })
    }
}

/// Request extension carrying the cache store.
#[derive(Clone)]
pub struct StoreHandle(pub SharedStore);

/// Makes the store available to every downstream handler via [`store_from`].
pub struct StoreInjector {
    store: SharedStore,
}

impl StoreInjector {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl Middleware for StoreInjector {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        ctx.extensions_mut()
            .insert(StoreHandle(Arc::clone(&self.store)));
        Box::pin(next.run(ctx))
    }
}

/// The store injected by [`StoreInjector`], if any.
pub fn store_from(ctx: &Context) -> Option<SharedStore> {
    ctx.extensions()
        .get::<StoreHandle>()
        .map(|handle| Arc::clone(&handle.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    fn request(method: &str, uri: &str) -> Request {
        let raw = format!("{method} {uri} HTTP/1.1\r\nHost: test\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn keys_separate_methods() {
        let site = SiteCache::new(Arc::new(InMemoryStore::default()), Expiration::Default);
        let get = site.key_for(&request("GET", "/page?x=1"));
        assert_eq!(get, crate::cache::create_key("/page?x=1"));
        assert_ne!(site.key_for(&request("HEAD", "/page?x=1")), get);
        assert_ne!(site.key_for(&request("OPTIONS", "/page?x=1")), get);
        assert_ne!(
            site.key_for(&request("HEAD", "/page?x=1")),
            site.key_for(&request("OPTIONS", "/page?x=1"))
        );
    }
}
