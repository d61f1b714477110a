//! Per-request context: the parsed request, route parameters, and a
//! type-keyed extension map that middleware use to hand state to handlers.
//!
//! The cache layer's [`StoreInjector`](crate::cache::StoreInjector) stores the
//! active cache store here; handlers read it back with
//! [`store_from`](crate::cache::store_from).

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::Request;

/// Type-erased request extensions map: used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// Everything a handler sees for one request.
pub struct Context {
    request: Request,
    params: PathParams,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context carrying route parameters.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self {
            request,
            params,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Replace the route parameters; extensions are left untouched.
    pub fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
