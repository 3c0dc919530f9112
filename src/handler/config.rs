use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default upload ceiling when a route accepts files without explicit limits.
pub const DEFAULT_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;

/// Configuration declared by a handler descriptor.
///
/// Built once per handler by [`HandlerConfig::resolve`] and shared read-only
/// behind the handler's `Arc`; nothing exposes a mutable reference after that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    #[serde(skip)]
    routing_path: String,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    routing: Option<RoutingConfig>,
    #[serde(default)]
    authentication: Option<AuthenticationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Overrides the derived routing path when mounting HTTP routes
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub http: Option<HttpRouting>,
    #[serde(default)]
    pub socket: Option<SocketRouting>,
    #[serde(default)]
    pub response: Option<ResponseConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouting {
    #[serde(default)]
    pub get: bool,
    #[serde(default)]
    pub post: bool,
    #[serde(default)]
    pub put: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub file: Option<FileRouting>,
}

impl HttpRouting {
    /// Enabled verbs in mounting order.
    #[must_use]
    pub fn methods(&self) -> Vec<http::Method> {
        let mut methods = Vec::with_capacity(4);
        if self.get {
            methods.push(http::Method::GET);
        }
        if self.post {
            methods.push(http::Method::POST);
        }
        if self.put {
            methods.push(http::Method::PUT);
        }
        if self.delete {
            methods.push(http::Method::DELETE);
        }
        methods
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileRouting {
    #[serde(default)]
    pub limits: Option<UploadLimits>,
}

/// Ceiling applied to one multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadLimits {
    pub max_total_bytes: u64,
    pub max_file_count: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_UPLOAD_BYTES,
            max_file_count: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketRouting {
    /// Event name; the handler's routing path when absent
    #[serde(default)]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default)]
    pub is_raw: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub is_required: bool,
}

/// A file-typed property declared in a parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProperty {
    pub name: String,
    /// Per-file byte limit
    pub limit: Option<u64>,
    /// Allowed mimetypes, any when absent
    pub mimetypes: Option<Vec<String>>,
}

impl FileProperty {
    #[must_use]
    pub fn accepts(&self, mimetype: &str) -> bool {
        match &self.mimetypes {
            Some(allowed) => allowed.iter().any(|m| m == mimetype),
            None => true,
        }
    }
}

/// Collect the file-typed properties of a parameter schema.
#[must_use]
pub fn file_properties(schema: Option<&Value>) -> Vec<FileProperty> {
    let Some(properties) = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    properties
        .iter()
        .filter(|(_, prop)| prop.get("type").and_then(Value::as_str) == Some("file"))
        .map(|(name, prop)| FileProperty {
            name: name.clone(),
            limit: prop.get("limit").and_then(Value::as_u64),
            mimetypes: match prop.get("mimetype") {
                Some(Value::String(single)) => Some(vec![single.clone()]),
                Some(Value::Array(list)) => Some(
                    list.iter()
                        .filter_map(|m| m.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            },
        })
        .collect()
}

/// Upload ceiling synthesized from file-typed properties.
///
/// The byte ceiling is the sum of the declared per-file limits, or the default
/// ceiling when no file property declares one. `None` when there are no file
/// properties.
#[must_use]
pub fn synthesize_upload_limits(files: &[FileProperty]) -> Option<UploadLimits> {
    if files.is_empty() {
        return None;
    }
    let mut declared = files.iter().filter_map(|f| f.limit).peekable();
    let max_total_bytes = if declared.peek().is_none() {
        DEFAULT_UPLOAD_BYTES
    } else {
        declared.fold(0u64, u64::saturating_add)
    };
    Some(UploadLimits {
        max_total_bytes,
        max_file_count: files.len(),
    })
}

impl HandlerConfig {
    /// Derive the effective configuration from a declared one.
    ///
    /// Takes the declaration by value so the caller's copy is never shared, then
    /// synthesizes upload limits for HTTP routes that accept files and do not
    /// declare a `file` block of their own.
    #[must_use]
    pub fn resolve(mut declared: HandlerConfig, routing_path: &str) -> HandlerConfig {
        declared.routing_path = routing_path.to_string();

        let files = file_properties(declared.parameters.as_ref());
        if let Some(http) = declared
            .routing
            .as_mut()
            .and_then(|routing| routing.http.as_mut())
        {
            if http.file.is_none() {
                if let Some(limits) = synthesize_upload_limits(&files) {
                    http.file = Some(FileRouting {
                        limits: Some(limits),
                    });
                }
            }
        }
        declared
    }

    /// Build a declared configuration programmatically.
    #[must_use]
    pub fn builder() -> HandlerConfigBuilder {
        HandlerConfigBuilder::default()
    }

    #[must_use]
    pub fn routing_path(&self) -> &str {
        &self.routing_path
    }

    #[must_use]
    pub fn parameter_schema(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    #[must_use]
    pub fn routing(&self) -> Option<&RoutingConfig> {
        self.routing.as_ref()
    }

    #[must_use]
    pub fn http(&self) -> Option<&HttpRouting> {
        self.routing.as_ref().and_then(|r| r.http.as_ref())
    }

    #[must_use]
    pub fn socket(&self) -> Option<&SocketRouting> {
        self.routing.as_ref().and_then(|r| r.socket.as_ref())
    }

    /// Event name bound on realtime connections, if the handler has socket routing.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.socket()
            .map(|s| s.event.as_deref().unwrap_or(&self.routing_path))
    }

    /// Path used when mounting HTTP routes: the override or the routing path.
    #[must_use]
    pub fn mount_path(&self) -> &str {
        self.routing
            .as_ref()
            .and_then(|r| r.path.as_deref())
            .unwrap_or(&self.routing_path)
    }

    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        self.authentication.map(|a| a.is_required).unwrap_or(false)
    }

    #[must_use]
    pub fn response_is_raw(&self) -> bool {
        self.routing
            .as_ref()
            .and_then(|r| r.response)
            .map(|r| r.is_raw)
            .unwrap_or(false)
    }

    /// Upload ceiling when the HTTP route accepts multipart files.
    #[must_use]
    pub fn upload_limits(&self) -> Option<UploadLimits> {
        self.http()
            .and_then(|h| h.file.as_ref())
            .map(|f| f.limits.unwrap_or_default())
    }

    #[must_use]
    pub fn file_properties(&self) -> Vec<FileProperty> {
        file_properties(self.parameters.as_ref())
    }
}

/// Programmatic construction of a declared [`HandlerConfig`].
#[derive(Debug, Default)]
pub struct HandlerConfigBuilder {
    config: HandlerConfig,
}

impl HandlerConfigBuilder {
    #[must_use]
    pub fn parameters(mut self, schema: Value) -> Self {
        self.config.parameters = Some(schema);
        self
    }

    #[must_use]
    pub fn http(mut self, http: HttpRouting) -> Self {
        self.routing_mut().http = Some(http);
        self
    }

    #[must_use]
    pub fn socket(mut self, event: Option<&str>) -> Self {
        self.routing_mut().socket = Some(SocketRouting {
            event: event.map(str::to_string),
        });
        self
    }

    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.routing_mut().path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn raw_response(mut self) -> Self {
        self.routing_mut().response = Some(ResponseConfig { is_raw: true });
        self
    }

    #[must_use]
    pub fn require_authentication(mut self) -> Self {
        self.config.authentication = Some(AuthenticationConfig { is_required: true });
        self
    }

    fn routing_mut(&mut self) -> &mut RoutingConfig {
        self.config.routing.get_or_insert_with(RoutingConfig::default)
    }

    #[must_use]
    pub fn build(self) -> HandlerConfig {
        self.config
    }
}

/// Empty object used when a handler declares no parameter schema.
pub(crate) fn empty_schema() -> Value {
    Value::Object(Map::new())
}
