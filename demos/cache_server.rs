//! Demo server with cached routes.
//!
//! ```text
//! CACHE_ADAPTER=memory cargo run --example cache_server
//! curl http://127.0.0.1:8080/cache_ping     # second call is served from the cache
//! curl -X POST http://127.0.0.1:8080/visits
//! ```
//!
//! Set `CACHE_ADAPTER=redis` with `REDIS_URL`, or `CACHE_ADAPTER=memcache` with
//! `MEMCACHED_SERVERS`, to use a remote store.

use std::{sync::Arc, time::Duration};

use rttp_cache::{
    Context, Response, Router, Server, StatusCode,
    cache::{StoreInjector, cache_page, cache_page_without_query, store_from},
    middleware::{LoggerMiddleware, Pipeline},
    persistence::{CacheError, StoreOptions, open_store},
};
use tracing_subscriber::EnvFilter;

async fn visits(ctx: Context) -> Response {
    let Some(store) = store_from(&ctx) else {
        return Response::new(StatusCode::InternalServerError).body("no cache store");
    };
    let count = match store.increment("demo.visits", 1).await {
        Err(CacheError::CacheMiss) => store
            .add("demo.visits", "1".into(), Default::default())
            .await
            .map(|()| 1),
        other => other,
    };
    match count {
        Ok(count) => Response::new(StatusCode::Ok)
            .header("Cache-Control", "no-store")
            .body(format!("visits: {count}")),
        Err(e) => Response::new(StatusCode::InternalServerError).body(e.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = StoreOptions::from_env()?;
    let store = open_store(&options).await?;

    let mut router = Router::new();
    router.get("/ping", |_ctx: Context| async {
        Response::new(StatusCode::Ok).body("pong")
    });
    router.get(
        "/cache_ping",
        cache_page(Arc::clone(&store), Duration::from_secs(60), |_ctx: Context| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Response::new(StatusCode::Ok).body(format!(
                "pong {}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default()
            ))
        }),
    );
    router.get(
        "/report",
        cache_page_without_query(Arc::clone(&store), Duration::ZERO, |ctx: Context| async move {
            let page = ctx.request().query_param("page").unwrap_or("1").to_owned();
            Response::new(StatusCode::Ok).body(format!("report, first requested page {page}"))
        }),
    );
    router.post("/visits", visits);

    let pipeline = Arc::new(
        Pipeline::new(router)
            .layer(LoggerMiddleware)
            .layer(StoreInjector::new(store)),
    );

    let server = Server::bind("127.0.0.1:8080").await?;
    server
        .run_with_shutdown(
            move |req| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(req).await }
            },
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await?;
    Ok(())
}
