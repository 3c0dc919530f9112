//! # Dispatcher Module
//!
//! The request dispatch pipeline.
//!
//! Every bound HTTP route runs the same strictly sequential stages, stopping at
//! the first failure:
//!
//! 1. **Authenticate**: when the route requires it and an authenticator is
//!    configured, the identity resolved for the context must be valid
//! 2. **Extract**: multipart fields and files, for routes with upload limits
//! 3. **Validate**: the parameter bag against the handler's schema
//! 4. **Invoke**: the handler with `(parameters, identity)`
//! 5. **Shape**: strings and raw routes go out verbatim, everything else as
//!    `{"success": true, "data": result}`
//!
//! Failures from any stage are caught once, at [`Dispatcher::dispatch`], and
//! rendered as the error envelope with the failure's status.

mod pipeline;

pub use pipeline::{error_response, shape_response, Dispatcher};

use crate::handler::Parameters;
use crate::ids::RequestId;
use crate::multipart::MultipartPayload;
use crate::security::{AuthRequest, Identity};
use http::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum number of headers stored inline before spilling to the heap.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Response headers; most responses carry only a few.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// One inbound request as seen by the pipeline.
///
/// Header names are lower-case. `parameters` is already merged (query, body,
/// path) and stripped of nulls when the context reaches the pipeline.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: Map<String, Value>,
    /// Decoded JSON or form body; `Null` when absent
    pub body: Value,
    pub parameters: Parameters,
    pub identity: Option<Identity>,
    pub payload: Option<MultipartPayload>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            query: Map::new(),
            body: Value::Null,
            parameters: Parameters::default(),
            identity: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// View handed to the authenticator.
    #[must_use]
    pub fn auth_request(&self) -> AuthRequest<'_> {
        AuthRequest {
            headers: &self.headers,
            cookies: &self.cookies,
            body: &self.body,
            identity: self.identity.as_ref(),
        }
    }

    /// Whether the caller accepts a JSON response. No `Accept` header accepts anything.
    #[must_use]
    pub fn accepts_json(&self) -> bool {
        let Some(accept) = self.header("accept") else {
            return true;
        };
        accept.split(',').any(|entry| {
            let mut params = entry.split(';');
            let media = params.next().unwrap_or("").trim().to_ascii_lowercase();
            let refused = params.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .map(|q| q <= 0.0)
                    .unwrap_or(false)
            });
            !refused
                && (media == "application/json"
                    || media == "application/*"
                    || media == "*/*"
                    || media.ends_with("+json"))
        })
    }
}

/// Response produced by the pipeline, written out by the server adapter.
///
/// A string body is written verbatim; any other body is serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// JSON response with the content type set.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Verbatim response: strings as HTML text, other values as JSON.
    #[must_use]
    pub fn raw(status: u16, body: Value) -> Self {
        match body {
            Value::String(_) => {
                let mut response = Self::new(status, HeaderVec::new(), body);
                response.set_header("content-type", "text/html; charset=utf-8".to_string());
                response
            }
            other => Self::json(status, other),
        }
    }

    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        let mut response = Self::new(status, HeaderVec::new(), Value::String(body.to_string()));
        response.set_header("content-type", "text/plain; charset=utf-8".to_string());
        response
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Add a header, keeping existing ones of the same name.
    pub fn append_header(&mut self, name: &str, value: String) {
        self.headers.push((Arc::from(name), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_accept(accept: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(Method::GET, "/missing");
        if let Some(accept) = accept {
            ctx.headers.insert("accept".into(), accept.into());
        }
        ctx
    }

    #[test]
    fn accept_negotiation() {
        assert!(with_accept(None).accepts_json());
        assert!(with_accept(Some("application/json")).accepts_json());
        assert!(with_accept(Some("text/html, */*;q=0.8")).accepts_json());
        assert!(with_accept(Some("application/vnd.api+json")).accepts_json());
        assert!(!with_accept(Some("text/html")).accepts_json());
        assert!(!with_accept(Some("text/plain, application/json;q=0")).accepts_json());
    }

    #[test]
    fn raw_strings_are_text() {
        let response = HandlerResponse::raw(200, json!("<p>hi</p>"));
        assert_eq!(response.get_header("Content-Type"), Some("text/html; charset=utf-8"));
        let response = HandlerResponse::raw(200, json!({"a": 1}));
        assert_eq!(response.get_header("content-type"), Some("application/json"));
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut response = HandlerResponse::json(200, json!({}));
        response.set_header("Content-Type", "text/plain".into());
        assert_eq!(response.headers.len(), 1);
        response.append_header("set-cookie", "a=1".into());
        response.append_header("set-cookie", "b=2".into());
        assert_eq!(response.headers.len(), 3);
    }
}
