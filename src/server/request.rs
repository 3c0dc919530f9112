use crate::dispatcher::RequestContext;
use crate::error::DispatchError;
use crate::handler::Parameters;
use crate::ids::RequestId;
use crate::multipart::MultipartPayload;
use crate::params::{merge_parameters, parse_query};
use crate::security::parse_cookie_header;
use http::Method;
use may_minihttp::Request;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

/// Request data copied out of `may_minihttp` before the pipeline runs.
#[derive(Debug, Default, PartialEq)]
pub struct RawRequest {
    pub method: String,
    /// Path including any query string
    pub path: String,
    /// Header names lower-cased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

fn payload_too_large() -> DispatchError {
    DispatchError::custom(413, 413, "Payload too large")
}

/// Copy method, path, headers and body out of a `may_minihttp::Request`.
///
/// Bodies longer than `max_body_bytes` are refused with status 413.
pub fn read_request(req: Request, max_body_bytes: u64) -> Result<RawRequest, DispatchError> {
    let method = req.method().to_string();
    let path = req.path().to_string();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let declared = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > max_body_bytes) {
        return Err(payload_too_large());
    }

    let mut body = Vec::new();
    req.body()
        .take(max_body_bytes + 1)
        .read_to_end(&mut body)?;
    if body.len() as u64 > max_body_bytes {
        return Err(payload_too_large());
    }

    debug!(
        method = %method,
        path = %path,
        headers_count = headers.len(),
        body_size_bytes = body.len(),
        "HTTP request read"
    );
    Ok(RawRequest {
        method,
        path,
        headers,
        body,
    })
}

fn media_type(headers: &HashMap<String, String>) -> String {
    headers
        .get("content-type")
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Build the pipeline context for a raw request.
///
/// JSON and url-encoded bodies are decoded into `body`; a multipart body is
/// kept as a payload for the extraction stage. The parameter bag is built from
/// query and body only; [`apply_path_params`] completes it once a route matched.
pub fn build_context(raw: RawRequest) -> Result<RequestContext, DispatchError> {
    let method = Method::from_bytes(raw.method.as_bytes())
        .map_err(|_| DispatchError::bad_request("Invalid request"))?;
    let (path, query) = match raw.path.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (raw.path.clone(), Map::new()),
    };

    let mut ctx = RequestContext::new(method, path);
    ctx.request_id =
        RequestId::from_header_or_new(raw.headers.get("x-request-id").map(String::as_str));
    ctx.cookies = raw
        .headers
        .get("cookie")
        .map(|c| parse_cookie_header(c))
        .unwrap_or_default();

    let media = media_type(&raw.headers);
    if !raw.body.is_empty() {
        match media.as_str() {
            "application/json" => {
                ctx.body = serde_json::from_slice(&raw.body).map_err(|e| {
                    debug!(error = %e, "JSON body parse failed");
                    DispatchError::bad_request("Invalid request")
                })?;
            }
            "application/x-www-form-urlencoded" => {
                ctx.body = Value::Object(parse_query(&String::from_utf8_lossy(&raw.body)));
            }
            "multipart/form-data" => {
                let content_type = raw
                    .headers
                    .get("content-type")
                    .map(String::as_str)
                    .unwrap_or_default();
                ctx.payload = MultipartPayload::from_bytes(content_type, raw.body);
            }
            _ => debug!(content_type = %media, "Request body ignored"),
        }
    }

    ctx.query = query;
    ctx.headers = raw.headers;
    ctx.parameters = Parameters::new(merge_parameters(
        ctx.query.clone(),
        Some(&ctx.body),
        std::iter::empty(),
    ));
    Ok(ctx)
}

/// Rebuild the parameter bag with the matched route's path parameters on top.
pub fn apply_path_params<'a, I>(ctx: &mut RequestContext, path_params: I)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    ctx.parameters = Parameters::new(merge_parameters(
        ctx.query.clone(),
        Some(&ctx.body),
        path_params,
    ));
}
