use super::{Connection, ConnectionHub, EventFrame, OutboundReceiver};
use crate::error::DispatchError;
use crate::handler::{Handler, Parameters};
use crate::registry::HandlerRegistry;
use crate::security::{parse_cookie_header, AuthRequest, Authenticator, Identity};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credentials presented when a connection opens.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl Handshake {
    /// Handshake carrying a raw `Cookie` header value.
    #[must_use]
    pub fn from_cookie_header(cookie: &str) -> Self {
        Self {
            headers: HashMap::new(),
            cookies: parse_cookie_header(cookie),
        }
    }

    /// Handshake from the `data` of a handshake frame: `{"cookie": "..."}`.
    #[must_use]
    pub fn from_frame_data(data: &Value) -> Self {
        data.get("cookie")
            .and_then(Value::as_str)
            .map(Self::from_cookie_header)
            .unwrap_or_default()
    }
}

struct Inner {
    bindings: HashMap<String, Handler>,
    on_connect: Option<Handler>,
    on_disconnect: Option<Handler>,
    hub: ConnectionHub,
    authenticator: Option<Arc<dyn Authenticator>>,
}

/// Event pipeline shared by every connection.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut events: Vec<&String> = self.inner.bindings.keys().collect();
        events.sort();
        f.debug_struct("EventDispatcher")
            .field("events", &events)
            .field("connections", &self.inner.hub.len())
            .finish()
    }
}

impl EventDispatcher {
    /// Bind every handler declaring socket routing to its event name.
    ///
    /// `connect` and `disconnect` name the lifecycle handlers, when configured;
    /// naming a handler that does not exist fails.
    pub fn new(
        registry: &HandlerRegistry,
        hub: ConnectionHub,
        connect: Option<&str>,
        disconnect: Option<&str>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, DispatchError> {
        let bindings: HashMap<String, Handler> = registry
            .all()
            .filter_map(|(_, h)| h.config().event_name().map(|e| (e.to_string(), h.clone())))
            .collect();
        debug!(events = bindings.len(), "Event handlers bound");

        Ok(Self {
            inner: Arc::new(Inner {
                bindings,
                on_connect: registry.get_optional(connect)?,
                on_disconnect: registry.get_optional(disconnect)?,
                hub,
                authenticator,
            }),
        })
    }

    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.inner.hub
    }

    /// Event names with a bound handler, sorted.
    #[must_use]
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.inner.bindings.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    /// Open a connection.
    ///
    /// The identity is resolved once, here. With an authenticator configured a
    /// connection without an established identity is refused.
    pub fn connect(&self, handshake: &Handshake) -> Result<(EventSession, OutboundReceiver), DispatchError> {
        let identity = self.identify(handshake)?;
        let (connection, outbound) = Connection::open(identity);
        self.inner.hub.register(connection.clone());
        info!(
            connection = %connection.id(),
            identity = ?connection.identity().map(|i| &i.id),
            "User has connected to service"
        );

        if let Some(handler) = &self.inner.on_connect {
            let mut parameters = Parameters::default();
            parameters.set_connection(connection.clone());
            if let Err(e) = handler.call(parameters, connection.identity()) {
                info!(error = %e, "Error performing socket connect");
            }
        }

        let session = EventSession {
            dispatcher: self.clone(),
            connection,
            closed: false,
        };
        Ok((session, outbound))
    }

    fn identify(&self, handshake: &Handshake) -> Result<Option<Identity>, DispatchError> {
        let Some(auth) = &self.inner.authenticator else {
            return Ok(None);
        };
        let body = Value::Null;
        let request = AuthRequest {
            headers: &handshake.headers,
            cookies: &handshake.cookies,
            body: &body,
            identity: None,
        };
        match auth.identify(&request)? {
            Some(identity) => Ok(Some(identity)),
            None => {
                debug!("Connection refused without identity");
                Err(DispatchError::unauthorized("Unauthorized access."))
            }
        }
    }
}

/// One open connection bound to the event pipeline.
///
/// The disconnect handler runs exactly once: on [`EventSession::disconnect`]
/// or, failing that, when the session is dropped.
pub struct EventSession {
    dispatcher: EventDispatcher,
    connection: Connection,
    closed: bool,
}

impl EventSession {
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Dispatch one inbound frame. Returns whether a handler ran successfully.
    ///
    /// Failures are logged and swallowed so the connection stays usable.
    pub fn handle(&self, frame: &EventFrame) -> bool {
        if self.closed {
            return false;
        }
        let Some(handler) = self.dispatcher.inner.bindings.get(&frame.event) else {
            debug!(event = %frame.event, connection = %self.connection.id(), "Unbound event ignored");
            return false;
        };

        let mut parameters = Parameters::from_value(frame.payload());
        let outcome = handler.validate(&parameters).and_then(|()| {
            parameters.set_connection(self.connection.clone());
            handler.call(parameters, self.connection.identity())
        });
        match outcome {
            Ok(_) => true,
            Err(e) => {
                info!(
                    event = %frame.event,
                    connection = %self.connection.id(),
                    error = %e.message(),
                    "Error performing socket event"
                );
                false
            }
        }
    }

    /// Close the session, running the disconnect handler once.
    pub fn disconnect(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        let inner = &self.dispatcher.inner;
        inner.hub.unregister(self.connection.id());

        if let Some(handler) = &inner.on_disconnect {
            let mut parameters = Parameters::default();
            parameters.set_connection(self.connection.clone());
            if let Err(e) = handler.call(parameters, self.connection.identity()) {
                warn!(error = %e, "Error performing socket disconnect");
            }
        }
        info!(connection = %self.connection.id(), "User has disconnected from service");
    }
}

impl Drop for EventSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
