//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths. Routes
//! are matched in registration order; the first route whose method and pattern
//! both match wins.
//!
//! Cached handlers produced by [`PageCache::wrap`](crate::cache::PageCache::wrap)
//! are ordinary [`IntoHandler`] values and register like any other closure.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below. The trait is object safe, so decorators can hold `&dyn IntoHandler`.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

impl Pattern {
    /// `/*` suffix → wildcard, any `:` → parameterized, otherwise exact.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => path.strip_prefix(prefix.as_str()).map(|suffix| {
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                params
            }),
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// When no route matches, a `404 Not Found` response is returned.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::{Context, Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/users/:id", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    /// Register a handler for `PUT` requests matching `path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Put, path, handler);
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx: Context| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch a bare request. Equivalent to `dispatch(Context::new(request))`.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(Context::new(request)).await
    }

    /// Dispatch a context that middleware may already have decorated.
    ///
    /// The matched route's path parameters are written into `ctx`; its
    /// extensions are passed through unchanged.
    pub async fn dispatch(&self, mut ctx: Context) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            if &route.method != ctx.request().method() {
                return None;
            }
            route
                .pattern
                .matches(ctx.request().path())
                .map(|params| (Arc::clone(&route.handler), params))
        });

        match matched {
            Some((handler, params)) => {
                ctx.set_params(params);
                handler(ctx).await
            }
            None => Response::new(StatusCode::NotFound),
        }
    }
}
