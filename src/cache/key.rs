use xxhash_rust::xxh64::{Xxh64, xxh64};

use crate::Request;

/// Prefix of every key written by the page cache.
pub const PAGE_CACHE_PREFIX: &str = "rttp.page.cache";

/// `"rttp.page.cache:<16 hex digits>"` for `input`.
///
/// ```
/// use rttp_cache::cache::create_key;
///
/// let key = create_key("/users?page=2");
/// assert!(key.starts_with("rttp.page.cache:"));
/// assert_eq!(key.len(), "rttp.page.cache:".len() + 16);
/// ```
pub fn create_key(input: &str) -> String {
    generate_key(PAGE_CACHE_PREFIX, input)
}

pub fn generate_key(prefix: &str, input: &str) -> String {
    format_key(prefix, xxh64(input.as_bytes(), 0))
}

fn format_key(prefix: &str, digest: u64) -> String {
    format!("{prefix}:{digest:016x}")
}

/// Which parts of a request identify a cached page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Path and query string.
    #[default]
    RequestUri,
    /// Path only; every query string shares one entry.
    Path,
    /// Path, query string and request body.
    RequestUriAndBody,
}

impl KeyStrategy {
    pub fn key_for(self, prefix: &str, request: &Request) -> String {
        match self {
            KeyStrategy::RequestUri => generate_key(prefix, &request.uri()),
            KeyStrategy::Path => generate_key(prefix, request.path()),
            KeyStrategy::RequestUriAndBody => {
                let mut hasher = Xxh64::new(0);
                hasher.update(request.uri().as_bytes());
                hasher.update(request.body());
                format_key(prefix, hasher.digest())
            }
        }
    }
}
