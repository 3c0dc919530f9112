//! # Handler Module
//!
//! A [`Handler`] is one unit of business logic bound to a routing path. It owns
//! the callable produced by its catalog factory, its resolved
//! [`HandlerConfig`], and the compiled [`ParameterValidator`] for its schema.
//!
//! Handlers are cheap to clone: every clone shares the same `Arc`, so the
//! registry hands out the same handler on every lookup.
//!
//! ```rust,ignore
//! use waypost::handler::{handler_fn, Parameters};
//! use serde_json::json;
//!
//! let greet = handler_fn(|params: Parameters, _identity| {
//!     let name = params.get_str("name").unwrap_or("stranger");
//!     Ok(json!({ "greeting": format!("hello {name}") }))
//! });
//! ```

pub mod config;

use crate::error::{DispatchError, RegistryError};
use crate::events::Connection;
use crate::params::redact;
use crate::security::Identity;
use crate::validator::ParameterValidator;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use config::HandlerConfig;

/// Result returned by a handler: a JSON value, `Null` when there is nothing to return.
pub type HandlerResult = Result<Value, DispatchError>;

/// The bound callable of a handler.
pub type HandlerFn = Arc<dyn Fn(Parameters, Option<&Identity>) -> HandlerResult + Send + Sync>;

/// Wrap a closure as a [`HandlerFn`].
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: Fn(Parameters, Option<&Identity>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A file received through a multipart upload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub mimetype: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, mimetype: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            bytes,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn describe(&self) -> Value {
        json!({
            "filename": self.filename,
            "mimetype": self.mimetype,
            "size": self.bytes.len(),
        })
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("filename", &self.filename)
            .field("mimetype", &self.mimetype)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Parameter bag handed to a handler.
///
/// Holds the merged named values, any uploaded files, and, for events, the
/// connection the event arrived on.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: Map<String, Value>,
    files: BTreeMap<String, UploadedFile>,
    connection: Option<Connection>,
}

impl Parameters {
    #[must_use]
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Default::default()
        }
    }

    /// Build from a JSON value; non-object values give an empty bag.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self::new(values),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn files(&self) -> &BTreeMap<String, UploadedFile> {
        &self.files
    }

    /// Connection an event arrived on; `None` for HTTP requests.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn insert_file(&mut self, name: impl Into<String>, file: UploadedFile) {
        self.files.insert(name.into(), file);
    }

    pub(crate) fn set_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    /// Deserialize the named values into a typed request.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|_| DispatchError::bad_request("Invalid request"))
    }

    /// JSON view used for schema validation: values plus file descriptions.
    #[must_use]
    pub fn validation_view(&self) -> Value {
        let mut view = self.values.clone();
        for (name, file) in &self.files {
            view.insert(name.clone(), file.describe());
        }
        Value::Object(view)
    }

    /// JSON view safe to log: credentials masked, file contents elided.
    #[must_use]
    pub fn log_view(&self) -> Value {
        let mut view = self.values.clone();
        for name in self.files.keys() {
            view.insert(name.clone(), Value::String("[Buffer]".to_string()));
        }
        redact(&Value::Object(view))
    }
}

struct HandlerInner {
    call: HandlerFn,
    config: HandlerConfig,
    validator: ParameterValidator,
}

/// A handler bound to its routing path.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("routing_path", &self.inner.config.routing_path())
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Bind a callable to a declared configuration.
    ///
    /// Resolves the configuration (upload limits) and compiles the parameter
    /// schema; both are fixed for the lifetime of the handler.
    pub fn bind(
        routing_path: &str,
        declared: HandlerConfig,
        call: HandlerFn,
    ) -> Result<Self, RegistryError> {
        let config = HandlerConfig::resolve(declared, routing_path);
        let validator = ParameterValidator::new(routing_path, config.parameter_schema())?;
        Ok(Self {
            inner: Arc::new(HandlerInner {
                call,
                config,
                validator,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &HandlerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn routing_path(&self) -> &str {
        self.inner.config.routing_path()
    }

    /// Validate parameters against the handler's schema.
    pub fn validate(&self, parameters: &Parameters) -> Result<(), DispatchError> {
        self.inner.validator.validate(parameters)
    }

    /// Invoke the bound callable.
    pub fn call(&self, parameters: Parameters, identity: Option<&Identity>) -> HandlerResult {
        (self.inner.call)(parameters, identity)
    }

    /// Whether both values refer to the same bound handler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
