//! HTTP response caching on top of a [`CacheStore`](crate::persistence::CacheStore).
//!
//! - [`PageCache`] and the `cache_page*` functions decorate a single route handler.
//! - [`SiteCache`] is middleware caching every safe request by URI.
//! - [`StoreInjector`] puts the store into request extensions for handlers
//!   that talk to it directly; read it back with [`store_from`].
//!
//! Pages are stored under `"rttp.page.cache:<xxh64 hex>"` as
//! [`CachedResponse`] snapshots. Only responses with a status below 300 are
//! stored, and a `Cache-Control: no-store` response evicts its key.

mod key;
mod page;
mod site;
mod snapshot;

pub use key::{KeyStrategy, PAGE_CACHE_PREFIX, create_key, generate_key};
pub use page::{
    PageCache, cache_page, cache_page_atomic, cache_page_with_request_body,
    cache_page_without_header, cache_page_without_query,
};
pub use site::{SiteCache, StoreHandle, StoreInjector, store_from};
pub use snapshot::CachedResponse;
