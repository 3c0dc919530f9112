//! # Router Module
//!
//! Maps `{verb, path}` to what should serve it.
//!
//! API handlers are mounted at `{api.path}/{override or routing path}` for every
//! verb their descriptor enables; the `index` handler, when present, is also
//! mounted at `/`. The top-level wiring adds the login (`POST`) and logout (any
//! verb) routes on top.
//!
//! Matching uses a radix tree; mount paths may carry `:name` or `{name}`
//! parameters, which are returned percent-decoded alongside the match.

mod radix;

pub use radix::RadixRouter;

use crate::handler::Handler;
use crate::registry::HandlerRegistry;
use http::Method;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

/// Extracted path parameters; most routes have few enough to stay on the stack.
pub type ParamVec = SmallVec<[(Arc<str>, String); 8]>;

/// What a matched route dispatches to.
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// An API handler run through the request pipeline
    Handler { handler: Handler },
    /// Login through the authenticator, then the optional login handler
    Login { handler: Option<Handler> },
    /// Logout through the authenticator, then the optional logout handler
    Logout { handler: Option<Handler> },
}

impl RouteTarget {
    /// Routing path of the handler behind this target, if any.
    #[must_use]
    pub fn routing_path(&self) -> Option<&str> {
        match self {
            RouteTarget::Handler { handler } => Some(handler.routing_path()),
            RouteTarget::Login { handler } | RouteTarget::Logout { handler } => {
                handler.as_ref().map(Handler::routing_path)
            }
        }
    }
}

/// A mounted route. `method` is `None` for routes answering every verb.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Option<Method>,
    pub pattern: String,
    pub target: RouteTarget,
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub path_params: ParamVec,
}

impl RouteMatch {
    #[must_use]
    pub fn handler(&self) -> Option<&Handler> {
        match &self.route.target {
            RouteTarget::Handler { handler } => Some(handler),
            RouteTarget::Login { handler } | RouteTarget::Logout { handler } => handler.as_ref(),
        }
    }

    pub fn path_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.path_params.iter().map(|(k, v)| (k.as_ref(), v.as_str()))
    }
}

/// Route table.
#[derive(Clone, Default)]
pub struct Router {
    tree: RadixRouter,
    routes: Vec<Arc<Route>>,
}

/// Join an API prefix and a relative mount path into an absolute pattern.
#[must_use]
pub fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => ensure_leading_slash(prefix),
        (false, false) => format!("{}/{}", ensure_leading_slash(prefix), path),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount every handler with HTTP routing under `api_path`, plus `index` at `/`.
    #[must_use]
    pub fn from_registry(registry: &HandlerRegistry, api_path: &str) -> Self {
        let mut router = Router::new();
        for (_, handler) in registry.all() {
            router.mount_handler(&join_path(api_path, handler.config().mount_path()), handler);
        }
        if let Ok(index) = registry.get("index") {
            router.mount_handler("/", &index);
        }
        router
    }

    fn mount_handler(&mut self, pattern: &str, handler: &Handler) {
        let Some(http) = handler.config().http() else {
            return;
        };
        for method in http.methods() {
            self.add(
                Some(method),
                pattern,
                RouteTarget::Handler {
                    handler: handler.clone(),
                },
            );
        }
    }

    /// Mount a route. A later route for the same verb and pattern replaces the earlier one.
    pub fn add(&mut self, method: Option<Method>, pattern: &str, target: RouteTarget) {
        let route = Arc::new(Route {
            method,
            pattern: pattern.to_string(),
            target,
        });
        debug!(
            method = %route.method.as_ref().map(Method::as_str).unwrap_or("*"),
            pattern = %route.pattern,
            routing_path = ?route.target.routing_path(),
            "Route mounted"
        );
        if let Some(replaced) = self.tree.insert(Arc::clone(&route)) {
            warn!(pattern = %replaced.pattern, "Route replaced by a later mount");
            self.routes.retain(|r| !Arc::ptr_eq(r, &replaced));
        }
        self.routes.push(route);
    }

    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or(path);
        self.tree
            .route(method, path)
            .map(|(route, path_params)| RouteMatch { route, path_params })
    }

    /// Mounted routes in mounting order.
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::config::HttpRouting;
    use crate::handler::{handler_fn, HandlerConfig};
    use serde_json::json;

    fn handler(path: &str, config: HandlerConfig) -> Handler {
        Handler::bind(path, config, handler_fn(|_, _| Ok(json!({})))).unwrap()
    }

    fn get_post() -> HttpRouting {
        HttpRouting {
            get: true,
            post: true,
            ..Default::default()
        }
    }

    #[test]
    fn join_path_normalizes_slashes() {
        assert_eq!(join_path("/api", "users/get"), "/api/users/get");
        assert_eq!(join_path("api/", "/users"), "/api/users");
        assert_eq!(join_path("", "users"), "/users");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn mounts_enabled_verbs_under_api_path() {
        let registry = HandlerRegistry::from_handlers([
            handler("users/get", HandlerConfig::builder().http(get_post()).path("users/:id").build()),
            handler("events/only", HandlerConfig::builder().socket(None).build()),
        ]);
        let router = Router::from_registry(&registry, "/api");

        let m = router.route(&Method::POST, "/api/users/42?x=1").unwrap();
        assert_eq!(m.handler().map(Handler::routing_path), Some("users/get"));
        assert_eq!(m.path_params().collect::<Vec<_>>(), vec![("id", "42")]);

        assert!(router.route(&Method::PUT, "/api/users/42").is_none());
        assert!(router.route(&Method::GET, "/api/events/only").is_none());
        assert_eq!(router.routes().len(), 2);
    }

    #[test]
    fn index_is_mounted_at_root() {
        let registry = HandlerRegistry::from_handlers([handler(
            "index",
            HandlerConfig::builder()
                .http(HttpRouting {
                    get: true,
                    ..Default::default()
                })
                .build(),
        )]);
        let router = Router::from_registry(&registry, "/api");
        assert!(router.route(&Method::GET, "/").is_some());
        assert!(router.route(&Method::GET, "/api/index").is_some());
    }

    #[test]
    fn later_mount_replaces_earlier() {
        let mut router = Router::new();
        router.add(Some(Method::POST), "/api/login", RouteTarget::Login { handler: None });
        router.add(Some(Method::POST), "/api/login", RouteTarget::Logout { handler: None });
        assert_eq!(router.routes().len(), 1);
        let m = router.route(&Method::POST, "/api/login").unwrap();
        assert!(matches!(m.route.target, RouteTarget::Logout { .. }));
    }
}
