//! # Registry Module
//!
//! Maps routing paths to bound [`Handler`]s.
//!
//! Handler configuration lives in descriptor files (`.yaml`, `.yml`, `.json`)
//! under the API location; the routing path of a descriptor mirrors its place in
//! the tree (`users/profile/get.yaml` → `users/profile/get`). Handler code is
//! registered up front in a [`HandlerCatalog`], keyed by the same routing path.
//! [`discover`] walks the tree, pairs each descriptor with its factory, binds the
//! result to the running service through a [`ServiceContext`] and freezes it
//! into a [`HandlerRegistry`].
//!
//! The registry is built once, before the server accepts anything, and is
//! read-only afterwards.
//!
//! ```rust,ignore
//! use waypost::handler::handler_fn;
//! use waypost::registry::{discover, HandlerCatalog, ServiceContext};
//! use serde_json::json;
//!
//! let mut catalog = HandlerCatalog::<AppState>::new();
//! catalog.register("users/get", |ctx| {
//!     let state = ctx.state_arc();
//!     handler_fn(move |params, _| Ok(json!(state.user(params.get_str("id")))))
//! });
//! let registry = discover("api".as_ref(), &catalog, &ServiceContext::new(state, hub))?;
//! ```

mod discover;

pub use discover::{discover, discover_descriptors, load, load_descriptor, Descriptor};

use crate::error::DispatchError;
use crate::events::ConnectionHub;
use crate::handler::{Handler, HandlerFn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a handler factory gets to bind against: application state and the connection hub.
pub struct ServiceContext<S> {
    state: Arc<S>,
    hub: ConnectionHub,
}

impl<S> Clone for ServiceContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            hub: self.hub.clone(),
        }
    }
}

impl<S> ServiceContext<S> {
    pub fn new(state: Arc<S>, hub: ConnectionHub) -> Self {
        Self { state, hub }
    }

    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    #[must_use]
    pub fn state_arc(&self) -> Arc<S> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }
}

/// Produces the callable for one routing path.
pub type HandlerFactory<S> = Box<dyn Fn(&ServiceContext<S>) -> HandlerFn + Send + Sync>;

/// Explicit table of handler factories keyed by routing path.
pub struct HandlerCatalog<S> {
    factories: BTreeMap<String, HandlerFactory<S>>,
}

impl<S> Default for HandlerCatalog<S> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<S> HandlerCatalog<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `routing_path`, replacing any earlier one.
    pub fn register<F>(&mut self, routing_path: &str, factory: F) -> &mut Self
    where
        F: Fn(&ServiceContext<S>) -> HandlerFn + Send + Sync + 'static,
    {
        self.factories
            .insert(routing_path.to_string(), Box::new(factory));
        self
    }

    #[must_use]
    pub fn with<F>(mut self, routing_path: &str, factory: F) -> Self
    where
        F: Fn(&ServiceContext<S>) -> HandlerFn + Send + Sync + 'static,
    {
        self.register(routing_path, factory);
        self
    }

    #[must_use]
    pub fn get(&self, routing_path: &str) -> Option<&HandlerFactory<S>> {
        self.factories.get(routing_path)
    }

    #[must_use]
    pub fn contains(&self, routing_path: &str) -> bool {
        self.factories.contains_key(routing_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Read-only mapping from routing path to bound handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<BTreeMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn from_handlers<I>(handlers: I) -> Self
    where
        I: IntoIterator<Item = Handler>,
    {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.routing_path().to_string(), h))
            .collect();
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Handler bound at exactly `routing_path`.
    ///
    /// An unknown path is a `400 Not found`, matching how callers have always
    /// observed it.
    pub fn get(&self, routing_path: &str) -> Result<Handler, DispatchError> {
        self.handlers
            .get(routing_path)
            .cloned()
            .ok_or_else(|| DispatchError::bad_request("Not found"))
    }

    /// Lookup for conventionally optional handlers: no key means no handler.
    pub fn get_optional(&self, routing_path: Option<&str>) -> Result<Option<Handler>, DispatchError> {
        routing_path.map(|p| self.get(p)).transpose()
    }

    #[must_use]
    pub fn has(&self, routing_path: &str) -> bool {
        self.handlers.contains_key(routing_path)
    }

    /// Every handler, ordered by routing path.
    pub fn all(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.handlers.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
