//! # rttp-cache
//!
//! HTTP response caching for a small async HTTP/1.1 framework, backed by
//! pluggable key/value stores.
//!
//! - [`persistence`]: the [`CacheStore`](persistence::CacheStore) contract with
//!   in-memory, Redis and memcached backends, plus a registry that opens a
//!   store by adapter name.
//! - [`cache`]: page caching for route handlers and whole sites.
//! - [`http`], [`server`], [`router`], [`middleware`], [`context`]: the
//!   framework the caches plug into.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use rttp_cache::{Context, Response, Router, Server, StatusCode};
//! use rttp_cache::cache::cache_page;
//! use rttp_cache::middleware::Pipeline;
//! use rttp_cache::persistence::{StoreOptions, open_store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = open_store(&StoreOptions::default()).await?;
//!
//!     let mut router = Router::new();
//!     router.get(
//!         "/hello",
//!         cache_page(store, Duration::from_secs(60), |_ctx: Context| async {
//!             Response::new(StatusCode::Ok).body("Hello, World!")
//!         }),
//!     );
//!
//!     let pipeline = Arc::new(Pipeline::new(router));
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req| {
//!             let pipeline = Arc::clone(&pipeline);
//!             async move { pipeline.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

// ── Framework ─────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Caching ───────────────────────────────────────────────────────────────────
pub mod cache;
pub mod persistence;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{IntoHandler, Router};
pub use server::{Server, ServerError};
