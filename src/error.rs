//! # Error Module
//!
//! Failure taxonomy shared by the request and event pipelines.
//!
//! Every failure raised inside a pipeline stage is a [`DispatchError`]: a tagged
//! value carrying an [`ErrorKind`], a numeric code, an HTTP-style status, a
//! message and optional structured data. The request pipeline catches it exactly
//! once at its boundary and renders it as the error envelope:
//!
//! ```json
//! { "success": false, "error": { "code": 400, "message": "Invalid request", "data": null } }
//! ```
//!
//! Errors converted from foreign error types (`anyhow`, `io`, `serde_json`) are
//! [`ErrorKind::Unclassified`]. They carry no code of their own, render as 500
//! and are logged at warn level before being surfaced.

use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;

/// Kind of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or invalid parameters, invalid or disallowed upload
    BadRequest,
    /// Missing or invalid identity where one is required
    Unauthorized,
    /// Identity present but not allowed
    Forbidden,
    /// Unknown routing path
    NotFound,
    /// State conflict reported by a handler
    Conflict,
    /// Unsupported request payload
    UnsupportedMediaType,
    /// Successful outcome without content, raised by handlers to short-circuit
    NoContent,
    /// Explicit internal failure raised by a handler
    Internal,
    /// Failure without an explicit classification
    Unclassified,
}

impl ErrorKind {
    /// HTTP status for this kind.
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::UnsupportedMediaType => 415,
            ErrorKind::NoContent => 204,
            ErrorKind::Internal | ErrorKind::Unclassified => 500,
        }
    }
}

/// A failure raised by a pipeline stage or a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError {
    kind: ErrorKind,
    code: Option<u16>,
    status: u16,
    message: String,
    data: Option<Value>,
}

impl DispatchError {
    fn typed(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = kind.status();
        Self {
            kind,
            code: Some(status),
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::Conflict, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::UnsupportedMediaType, message)
    }

    pub fn no_content(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::NoContent, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::typed(ErrorKind::Internal, message)
    }

    /// A failure with a caller-chosen code and status.
    pub fn custom(code: u16, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            code: Some(code),
            status,
            message: message.into(),
            data: None,
        }
    }

    /// A failure without a code; surfaced as 500 and flagged in the logs.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unclassified,
            code: None,
            status: 500,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data echoed in the error envelope.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Explicit code, `None` for unclassified failures.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn is_unclassified(&self) -> bool {
        self.code.is_none()
    }

    /// Render the failure envelope body.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        json!({
            "success": false,
            "error": {
                "code": self.code.unwrap_or(500),
                "message": self.message,
                "data": self.data,
            }
        })
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DispatchError>() {
            Ok(typed) => typed,
            Err(other) => DispatchError::unclassified(other.to_string()),
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::unclassified(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::unclassified(err.to_string())
    }
}

/// Startup failure while building the handler registry.
#[derive(Debug)]
pub enum RegistryError {
    /// The descriptor tree could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// A descriptor file could not be parsed
    Descriptor { path: PathBuf, message: String },
    /// A descriptor's parameter schema does not compile
    Schema { routing_path: String, message: String },
    /// A descriptor has no factory registered in the catalog
    MissingFactory { routing_path: String },
    /// The service configuration names a handler the registry does not hold
    UnknownHandler { role: &'static str, routing_path: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Io { path, source } => {
                write!(f, "failed to read handler tree at {}: {}", path.display(), source)
            }
            RegistryError::Descriptor { path, message } => {
                write!(f, "invalid handler descriptor {}: {}", path.display(), message)
            }
            RegistryError::Schema {
                routing_path,
                message,
            } => write!(
                f,
                "parameter schema for '{}' does not compile: {}",
                routing_path, message
            ),
            RegistryError::MissingFactory { routing_path } => write!(
                f,
                "no handler factory registered for '{}'",
                routing_path
            ),
            RegistryError::UnknownHandler { role, routing_path } => {
                write!(f, "{role} handler '{routing_path}' is not registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_carry_matching_code_and_status() {
        let err = DispatchError::unauthorized("Unauthorized access.");
        assert_eq!(err.code(), Some(401));
        assert_eq!(err.status(), 401);
        assert!(!err.is_unclassified());

        let err = DispatchError::unsupported_media_type("nope");
        assert_eq!(err.status(), 415);
    }

    #[test]
    fn unclassified_renders_as_500() {
        let err: DispatchError = anyhow::anyhow!("boom").into();
        assert!(err.is_unclassified());
        assert_eq!(err.status(), 500);
        assert_eq!(
            err.to_envelope(),
            json!({"success": false, "error": {"code": 500, "message": "boom", "data": null}})
        );
    }

    #[test]
    fn anyhow_keeps_typed_errors() {
        let err: DispatchError = anyhow::Error::new(DispatchError::conflict("taken")).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), Some(409));
    }

    #[test]
    fn envelope_includes_data() {
        let err = DispatchError::bad_request("Invalid request").with_data(json!({"field": "name"}));
        assert_eq!(
            err.to_envelope(),
            json!({
                "success": false,
                "error": {"code": 400, "message": "Invalid request", "data": {"field": "name"}}
            })
        );
    }
}
