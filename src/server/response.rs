use crate::dispatcher::HandlerResponse;
use may_minihttp::Response;
use serde_json::Value;
use std::borrow::Cow;
use tracing::trace;

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// Serialize a response body: strings verbatim, anything else as JSON.
pub(crate) fn body_bytes(body: Value) -> Vec<u8> {
    match body {
        Value::String(s) => s.into_bytes(),
        other => serde_json::to_vec(&other).unwrap_or_else(|_| b"{}".to_vec()),
    }
}

const CONTENT_TYPE_JSON: &str = "Content-Type: application/json";
const CONTENT_TYPE_HTML: &str = "Content-Type: text/html; charset=utf-8";
const CONTENT_TYPE_TEXT: &str = "Content-Type: text/plain; charset=utf-8";

/// Static header line for a content type the pipeline or [`StaticFiles`] produces.
///
/// [`StaticFiles`]: crate::static_files::StaticFiles
pub(crate) fn content_type_line(content_type: &str) -> &'static str {
    match content_type {
        "application/json" => CONTENT_TYPE_JSON,
        "text/html; charset=utf-8" | "text/html" => CONTENT_TYPE_HTML,
        "text/plain; charset=utf-8" | "text/plain" => CONTENT_TYPE_TEXT,
        "text/css" => "Content-Type: text/css",
        "application/javascript" => "Content-Type: application/javascript",
        "image/svg+xml" => "Content-Type: image/svg+xml",
        "image/png" => "Content-Type: image/png",
        "image/jpeg" => "Content-Type: image/jpeg",
        "image/gif" => "Content-Type: image/gif",
        "image/x-icon" => "Content-Type: image/x-icon",
        "font/woff2" => "Content-Type: font/woff2",
        _ => "Content-Type: application/octet-stream",
    }
}

/// How one response header reaches the wire.
///
/// `may_minihttp` only accepts `'static` header lines. Content types map to
/// constants; `Set-Cookie` (login and logout only) is leaked; per-request
/// headers such as `x-request-id` stay in-process.
pub(crate) fn wire_header(name: &str, value: &str) -> Option<Cow<'static, str>> {
    if name.eq_ignore_ascii_case("content-type") {
        Some(Cow::Borrowed(content_type_line(value)))
    } else if name.eq_ignore_ascii_case("set-cookie") {
        Some(Cow::Owned(format!("Set-Cookie: {value}")))
    } else {
        None
    }
}

/// Write a pipeline response to `may_minihttp`.
pub fn write_response(res: &mut Response, response: HandlerResponse) {
    res.status_code(response.status as usize, status_reason(response.status));
    let mut has_content_type = false;
    for (name, value) in &response.headers {
        match wire_header(name, value) {
            Some(Cow::Borrowed(line)) => {
                has_content_type = true;
                res.header(line);
            }
            Some(Cow::Owned(line)) => {
                res.header(Box::leak(line.into_boxed_str()));
            }
            None => trace!(header = %name, "Header kept off the wire"),
        }
    }
    if !has_content_type {
        res.header(if response.body.is_string() {
            CONTENT_TYPE_TEXT
        } else {
            CONTENT_TYPE_JSON
        });
    }
    res.body_vec(body_bytes(response.body));
}

/// Write raw bytes with a fixed content type, as used for static resources.
pub fn write_bytes(res: &mut Response, status: u16, content_type: &str, bytes: Vec<u8>) {
    res.status_code(status as usize, status_reason(status));
    res.header(content_type_line(content_type));
    res.body_vec(bytes);
}
