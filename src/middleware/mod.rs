//! Middleware pipeline: composable before/after request handler logic.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer. When the chain is exhausted it calls the
//!   endpoint handler, usually the router.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered middleware stack in front of a [`Router`].
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! The page cache plugs in at both ends: [`StoreInjector`](crate::cache::StoreInjector)
//! and [`SiteCache`](crate::cache::SiteCache) are middleware, while
//! [`PageCache`](crate::cache::PageCache) wraps individual route handlers.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{
    Request, Response, StatusCode,
    context::Context,
    router::{Handler, Router},
};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use rttp_cache::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
    endpoint: Option<Handler>,
}

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::{future::Future, pin::Pin, sync::Arc};
/// use rttp_cache::{Response, context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(
///     |ctx: Context, next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     },
/// );
/// ```
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack,
    /// with no endpoint.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
            endpoint: None,
        }
    }

    /// Creates a `Next` that calls `endpoint` once every middleware has run.
    pub fn with_endpoint(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint: Some(endpoint),
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// Once the chain is exhausted the endpoint is called. Without an endpoint a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        if let Some(handler) = self.middlewares.get(self.index).cloned() {
            self.index += 1;
            return handler(ctx, self).await;
        }

        match self.endpoint {
            Some(endpoint) => endpoint(ctx).await,
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks, and `handle` must return a pinned `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack terminating in a [`Router`].
///
/// Middleware run in the order they were added with [`layer`](Self::layer).
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{Router, Server, middleware::{LoggerMiddleware, Pipeline}};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Arc::new(Pipeline::new(Router::new()).layer(LoggerMiddleware));
/// let server = Server::bind("127.0.0.1:8080").await?;
/// server
///     .run(move |req| {
///         let pipeline = Arc::clone(&pipeline);
///         async move { pipeline.handle(req).await }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        let router = Arc::new(router);
        let endpoint: Handler = Arc::new(
            move |ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.dispatch(ctx).await })
            },
        );
        Self {
            middlewares: Arc::from(Vec::new()),
            endpoint,
        }
    }

    /// Appends a middleware to the end of the stack.
    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layer_handler(from_middleware(Arc::new(middleware)))
    }

    /// Appends an already type-erased middleware function.
    #[must_use]
    pub fn layer_handler(mut self, handler: MiddlewareHandler) -> Self {
        let mut middlewares = self.middlewares.to_vec();
        middlewares.push(handler);
        self.middlewares = middlewares.into();
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through every middleware and then the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next::with_endpoint(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint));
        next.run(Context::new(request)).await
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits one `tracing::info!` event per request after the downstream handler
/// completes. It never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let uri = ctx.request().uri();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                uri = %uri,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Record {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let name = self.name;
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(name);
                next.run(ctx).await
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    #[tokio::test]
    async fn exhausted_chain_without_endpoint_is_500() {
        let next = Next::new(Vec::new());
        let res = next.run(Context::new(request("/"))).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn middleware_run_in_order_before_router() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async {
            Response::new(StatusCode::Ok).body("hi")
        });

        let pipeline = Pipeline::new(router)
            .layer(Record {
                name: "first",
                log: Arc::clone(&log),
            })
            .layer(LoggerMiddleware)
            .layer(Record {
                name: "second",
                log: Arc::clone(&log),
            });
        assert_eq!(pipeline.len(), 3);

        let res = pipeline.handle(request("/hello")).await;
        assert_eq!(res.content(), b"hi");
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_router() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let mut router = Router::new();
        router.get("/", move |_ctx: Context| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
                Response::new(StatusCode::Ok)
            }
        });

        let pipeline = Pipeline::new(router).layer(Deny);
        let res = pipeline.handle(request("/")).await;
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
