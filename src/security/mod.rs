//! # Security Module
//!
//! Contracts the dispatch pipelines need from the authentication collaborator.
//!
//! The pipelines never verify credentials or persist sessions themselves. They
//! hand an [`AuthRequest`] to an [`Authenticator`] and act on the outcome:
//!
//! - [`Authenticator::identify`] resolves an already established identity
//!   (session cookie, token) when a request context or event connection is built
//! - [`Authenticator::validate`] gates routes that declare
//!   `authentication.isRequired`, failing with `401 Unauthorized access.`
//! - [`Authenticator::login`] / [`Authenticator::logout`] back the login and
//!   logout routes mounted by the top-level wiring
//!
//! [`SessionAuthenticator`] is the bundled implementation: a session id cookie
//! mapped to an [`Identity`] through a [`SessionStore`], with credentials checked
//! by a [`CredentialVerifier`].
//!
//! ```rust,ignore
//! use waypost::security::{Identity, MemorySessionStore, SessionAuthenticator};
//! use serde_json::{json, Value};
//!
//! let auth = SessionAuthenticator::new(
//!     "sid",
//!     MemorySessionStore::default(),
//!     |body: &Value| {
//!         Ok((body["password"] == "hunter2").then(|| Identity::new("ada", json!({}))))
//!     },
//! );
//! ```

mod session;

pub use session::{CredentialVerifier, MemorySessionStore, SessionAuthenticator, SessionStore};

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The authenticated principal of a request or connection.
///
/// Opaque to the pipelines beyond equality, which compares `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
}

impl Identity {
    pub fn new(id: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

/// Credentials and state an authenticator may inspect.
///
/// Header names are lower-case.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub headers: &'a HashMap<String, String>,
    pub cookies: &'a HashMap<String, String>,
    /// Request body; `Null` for handshakes and body-less requests
    pub body: &'a Value,
    /// Identity resolved for the context, if any
    pub identity: Option<&'a Identity>,
}

impl<'a> AuthRequest<'a> {
    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// A `Set-Cookie` instruction produced by login or logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; `Some(0)` expires the cookie
    pub max_age: Option<u64>,
}

impl SetCookie {
    /// Render the header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut out = format!("{}={}; Path=/; HttpOnly", self.name, self.value);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        out
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub cookie: Option<SetCookie>,
}

/// Authentication collaborator consumed by the request and event pipelines.
pub trait Authenticator: Send + Sync {
    /// Resolve the identity already established for this request, if any.
    fn identify(&self, req: &AuthRequest<'_>) -> Result<Option<Identity>, DispatchError>;

    /// Require an established identity.
    fn validate(&self, req: &AuthRequest<'_>) -> Result<(), DispatchError> {
        match req.identity {
            Some(_) => Ok(()),
            None => Err(DispatchError::unauthorized("Unauthorized access.")),
        }
    }

    /// Verify credentials carried by the request and establish an identity.
    fn login(&self, req: &AuthRequest<'_>) -> Result<LoginOutcome, DispatchError>;

    /// Drop the identity established for this request.
    fn logout(&self, req: &AuthRequest<'_>) -> Result<Option<SetCookie>, DispatchError>;
}

/// Split a `Cookie` header into name/value pairs.
#[must_use]
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("").trim();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
