//! # Service Module
//!
//! Assembles a runnable service from a [`ServiceConfig`], a [`HandlerCatalog`]
//! and application state.
//!
//! ```no_run
//! use waypost::config::ServiceConfig;
//! use waypost::handler::handler_fn;
//! use waypost::registry::HandlerCatalog;
//! use waypost::service::ServiceBuilder;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ServiceConfig::load("service.yaml".as_ref())?;
//! let catalog = HandlerCatalog::new()
//!     .with("users/list", |_ctx| handler_fn(|_, _| Ok(json!([]))));
//! let service = ServiceBuilder::new(config, ())
//!     .catalog(catalog)
//!     .build()?;
//! let running = service.start()?;
//! running.join();
//! # Ok(())
//! # }
//! ```

use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RegistryError;
use crate::events::{ConnectionHub, EventDispatcher, EventServer, EventServerHandle};
use crate::handler::Handler;
use crate::registry::{discover, HandlerCatalog, HandlerRegistry, ServiceContext};
use crate::router::{join_path, RouteTarget, Router};
use crate::security::{Authenticator, CredentialVerifier, SessionAuthenticator, SessionStore};
use crate::server::{AppService, HttpServer, ServerHandle};
use crate::static_files::StaticFiles;
use http::Method;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_LOGIN_PATH: &str = "login";
const DEFAULT_LOGOUT_PATH: &str = "logout";

/// Builder for a [`Service`].
pub struct ServiceBuilder<S> {
    config: ServiceConfig,
    state: Arc<S>,
    catalog: HandlerCatalog<S>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl<S: Send + Sync + 'static> ServiceBuilder<S> {
    pub fn new(config: ServiceConfig, state: S) -> Self {
        Self {
            config,
            state: Arc::new(state),
            catalog: HandlerCatalog::new(),
            authenticator: None,
        }
    }

    #[must_use]
    pub fn catalog(mut self, catalog: HandlerCatalog<S>) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Use a [`SessionAuthenticator`] whose cookie is named by `session.key`.
    #[must_use]
    pub fn session_authenticator<T, V>(self, store: T, verifier: V) -> Self
    where
        T: SessionStore + 'static,
        V: CredentialVerifier + 'static,
    {
        let authenticator =
            SessionAuthenticator::from_config(&self.config.session, store, verifier);
        self.authenticator(Arc::new(authenticator))
    }

    /// Discover handlers and wire the HTTP and event pipelines.
    pub fn build(self) -> Result<Service, RegistryError> {
        let hub = ConnectionHub::new();
        let context = ServiceContext::new(self.state, hub.clone());
        let registry = discover(&self.config.routing.api.location, &self.catalog, &context)?;

        let api_path = self.config.routing.api.path.as_str();
        let mut router = Router::from_registry(&registry, api_path);
        if let (Some(_), Some(auth)) = (&self.authenticator, &self.config.authentication) {
            let login = configured(&registry, "login", auth.login.api.as_deref())?;
            let logout = configured(&registry, "logout", auth.logout.api.as_deref())?;
            router.add(
                Some(Method::POST),
                &join_path(api_path, auth.login.mount_path().unwrap_or(DEFAULT_LOGIN_PATH)),
                RouteTarget::Login { handler: login },
            );
            router.add(
                None,
                &join_path(api_path, auth.logout.mount_path().unwrap_or(DEFAULT_LOGOUT_PATH)),
                RouteTarget::Logout { handler: logout },
            );
        }

        let connect = self.config.socket.connect.api.as_deref();
        let disconnect = self.config.socket.disconnect.api.as_deref();
        let events = EventDispatcher::new(
            &registry,
            hub.clone(),
            connect,
            disconnect,
            self.authenticator.clone(),
        )
        .map_err(|_| {
            let (role, routing_path) = if connect.is_some_and(|p| !registry.has(p)) {
                ("connect", connect)
            } else {
                ("disconnect", disconnect)
            };
            RegistryError::UnknownHandler {
                role,
                routing_path: routing_path.unwrap_or_default().to_string(),
            }
        })?;

        let app = AppService::new(router, Dispatcher::new(self.authenticator), &registry)
            .with_static_files(StaticFiles::new(&self.config.routing.static_dir))
            .with_max_body_bytes(self.config.limits.max_body_bytes);

        Ok(Service {
            config: self.config,
            registry,
            hub,
            app,
            events,
        })
    }
}

/// Look up a handler named by the service configuration.
fn configured(
    registry: &HandlerRegistry,
    role: &'static str,
    routing_path: Option<&str>,
) -> Result<Option<Handler>, RegistryError> {
    registry
        .get_optional(routing_path)
        .map_err(|_| RegistryError::UnknownHandler {
            role,
            routing_path: routing_path.unwrap_or_default().to_string(),
        })
}

/// A fully wired service, ready to start.
pub struct Service {
    config: ServiceConfig,
    registry: HandlerRegistry,
    hub: ConnectionHub,
    app: AppService,
    events: EventDispatcher,
}

impl Service {
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    #[must_use]
    pub fn app(&self) -> &AppService {
        &self.app
    }

    #[must_use]
    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.events
    }

    /// Start the HTTP server and, when `socket.port` is configured, the event transport.
    pub fn start(&self) -> io::Result<RunningService> {
        let http = HttpServer(self.app.clone()).start(self.config.http_addr())?;
        info!(addr = %http.addr(), handlers = self.registry.len(), "Service listening");

        let events = match self.config.socket_addr() {
            Some(addr) => Some(EventServer::new(self.events.clone()).start(addr)?),
            None => None,
        };
        Ok(RunningService { http, events })
    }
}

/// Handles to the servers started by [`Service::start`].
pub struct RunningService {
    http: ServerHandle,
    events: Option<EventServerHandle>,
}

impl RunningService {
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        self.http.addr()
    }

    #[must_use]
    pub fn event_addr(&self) -> Option<SocketAddr> {
        self.events.as_ref().map(EventServerHandle::addr)
    }

    pub fn wait_ready(&self) -> io::Result<()> {
        self.http.wait_ready()
    }

    pub fn stop(self) {
        if let Some(events) = self.events {
            events.stop();
        }
        self.http.stop();
    }

    /// Block until the HTTP server exits.
    pub fn join(self) {
        if self.http.join().is_err() {
            warn!("HTTP server coroutine panicked");
        }
    }
}
