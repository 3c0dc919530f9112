//! # Events Module
//!
//! Realtime counterpart of the request pipeline.
//!
//! A persistent connection is represented by a [`Connection`]: its id, the
//! identity resolved once at handshake, and the sending half of a `may` channel
//! carrying outbound [`EventFrame`]s. The [`ConnectionHub`] tracks every open
//! connection and offers the outbound primitives (`broadcast`, `send_to`,
//! `send_to_many`). [`EventDispatcher`] binds handlers declaring socket routing
//! to event names and runs each inbound frame through validate and invoke;
//! failures are logged and never sent back over the wire.
//!
//! [`EventServer`] is the bundled transport: line-delimited JSON frames over TCP.
//!
//! ## Wire format
//!
//! ```text
//! {"event":"handshake","data":{"cookie":"sid=01J..."}}
//! {"event":"chat/say","data":{"data":{"text":"hello"}}}
//! ```
//!
//! Outbound frames use the same shape, with the payload wrapped as
//! `{"data": <payload>}`.

mod dispatcher;
mod hub;
mod transport;

pub use dispatcher::{EventDispatcher, EventSession, Handshake};
pub use hub::ConnectionHub;
pub use transport::{EventServer, EventServerHandle, MAX_FRAME_BYTES};

use crate::ids::ConnectionId;
use crate::security::Identity;
use may::sync::mpsc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Name of the first frame sent by a client.
pub const HANDSHAKE_EVENT: &str = "handshake";

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Frame for an outbound send, payload wrapped as `{"data": payload}`.
    pub fn outbound(event: impl Into<String>, payload: Value) -> Self {
        Self::new(event, json!({ "data": payload }))
    }

    /// Parameters carried by an inbound frame: `data.data`, or an empty object.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self.data.get("data") {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(value) => value.clone(),
        }
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Encode as one line, newline included.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// An open realtime connection.
///
/// Cloning shares the outbound channel; the identity is fixed at handshake.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<Identity>,
    tx: mpsc::Sender<EventFrame>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity.as_ref().map(|i| &i.id))
            .finish()
    }
}

impl Connection {
    /// Open a connection and return it with the receiving half of its outbound channel.
    pub fn open(identity: Option<Identity>) -> (Connection, OutboundReceiver) {
        let (tx, rx) = mpsc::channel();
        let connection = Connection {
            id: ConnectionId::new(),
            identity,
            tx,
        };
        (connection, OutboundReceiver { rx })
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Send an event to this connection only. Returns `false` once the connection is gone.
    pub fn emit(&self, event: impl Into<String>, payload: Value) -> bool {
        self.push(EventFrame::outbound(event, payload))
    }

    pub(crate) fn push(&self, frame: EventFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Receiving half of a connection's outbound channel.
pub struct OutboundReceiver {
    rx: mpsc::Receiver<EventFrame>,
}

impl OutboundReceiver {
    /// Block the current coroutine until a frame is queued; `None` once every sender is gone.
    pub fn recv(&self) -> Option<EventFrame> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<EventFrame> {
        self.rx.try_recv().ok()
    }
}
