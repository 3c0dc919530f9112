//! # Parameter Validator
//!
//! Compiles a handler's parameter schema once, at registration, and validates
//! parameter bags against it for every request or event.
//!
//! Descriptors may declare properties of `type: file`, which is not a JSON
//! Schema type. Before compiling, such properties are rewritten to
//! `type: object`, and [`Parameters::validation_view`] presents every uploaded
//! file as `{filename, mimetype, size}`, so `required` still applies to uploads.
//!
//! Validation failures never echo validator details to the caller: the detailed
//! errors go to the log and the caller receives `400 Invalid request`.

use crate::error::{DispatchError, RegistryError};
use crate::handler::config::empty_schema;
use crate::handler::Parameters;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Compiled parameter schema for one handler.
#[derive(Clone)]
pub struct ParameterValidator {
    routing_path: Arc<str>,
    compiled: Arc<jsonschema::Validator>,
}

impl std::fmt::Debug for ParameterValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterValidator")
            .field("routing_path", &self.routing_path)
            .finish_non_exhaustive()
    }
}

impl ParameterValidator {
    /// Compile the schema for `routing_path`. A missing schema accepts anything.
    pub fn new(routing_path: &str, schema: Option<&Value>) -> Result<Self, RegistryError> {
        let schema = schema.map(rewrite_file_types).unwrap_or_else(empty_schema);
        let compiled =
            jsonschema::validator_for(&schema).map_err(|e| RegistryError::Schema {
                routing_path: routing_path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            routing_path: Arc::from(routing_path),
            compiled: Arc::new(compiled),
        })
    }

    /// Collect every schema violation as a human readable message.
    #[must_use]
    pub fn errors(&self, instance: &Value) -> Vec<String> {
        self.compiled
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect()
    }

    /// Validate a parameter bag; never returns details to the caller.
    pub fn validate(&self, parameters: &Parameters) -> Result<(), DispatchError> {
        let view = parameters.validation_view();
        let errors = self.errors(&view);
        if errors.is_empty() {
            return Ok(());
        }

        info!(
            routing_path = %self.routing_path,
            parameters = %parameters.log_view(),
            errors = ?errors,
            "Invalid request"
        );
        Err(DispatchError::bad_request("Invalid request"))
    }
}

/// Replace `type: file` properties with `type: object`, dropping upload-only keywords.
fn rewrite_file_types(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Some(properties) = schema
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        for prop in properties.values_mut() {
            if prop.get("type").and_then(Value::as_str) == Some("file") {
                if let Some(obj) = prop.as_object_mut() {
                    obj.insert("type".to_string(), Value::String("object".to_string()));
                    obj.remove("limit");
                    obj.remove("mimetype");
                }
            }
        }
    }
    schema
}
