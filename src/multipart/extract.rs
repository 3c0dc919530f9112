use super::parser::{MultipartError, MultipartParser, PartHeaders, PartSink};
use crate::error::DispatchError;
use crate::handler::config::{FileProperty, UploadLimits};
use crate::handler::{HandlerConfig, Parameters, UploadedFile};
use std::fmt;
use std::io::{Cursor, Read};
use tracing::{debug, info};

/// Size of each read from the request body.
pub const READ_CHUNK_BYTES: usize = 8 * 1024;

/// A `multipart/form-data` request body awaiting extraction.
pub struct MultipartPayload {
    boundary: String,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for MultipartPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartPayload")
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

impl MultipartPayload {
    /// `None` unless `content_type` is `multipart/form-data` with a boundary.
    pub fn new(content_type: &str, body: Box<dyn Read + Send>) -> Option<Self> {
        boundary(content_type).map(|boundary| Self { boundary, body })
    }

    pub fn from_bytes(content_type: &str, body: Vec<u8>) -> Option<Self> {
        Self::new(content_type, Box::new(Cursor::new(body)))
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }
}

/// Boundary of a `multipart/form-data` content type.
#[must_use]
pub fn boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let mime = parts.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    parts
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

struct OpenFile {
    name: String,
    filename: String,
    mimetype: String,
    limit: Option<u64>,
    bytes: Vec<u8>,
}

/// Collects accepted parts while enforcing the schema and ceilings.
struct UploadSink<'a> {
    properties: &'a [FileProperty],
    limits: UploadLimits,
    total_bytes: u64,
    file_count: usize,
    open_file: Option<OpenFile>,
    open_field: Option<(String, Vec<u8>)>,
    fields: Vec<(String, String)>,
    files: Vec<(String, UploadedFile)>,
}

impl<'a> UploadSink<'a> {
    fn new(properties: &'a [FileProperty], limits: UploadLimits) -> Self {
        Self {
            properties,
            limits,
            total_bytes: 0,
            file_count: 0,
            open_file: None,
            open_field: None,
            fields: Vec::new(),
            files: Vec::new(),
        }
    }
}

impl PartSink for UploadSink<'_> {
    fn begin(&mut self, part: &PartHeaders) -> Result<(), MultipartError> {
        let Some(filename) = &part.filename else {
            self.open_field = Some((part.name.clone(), Vec::new()));
            return Ok(());
        };

        let Some(property) = self.properties.iter().find(|p| p.name == part.name) else {
            info!(name = %part.name, "Invalid file request");
            return Err(MultipartError::Rejected(format!(
                "'{}' is not a file parameter",
                part.name
            )));
        };
        if !property.accepts(&part.content_type) {
            info!(
                name = %part.name,
                mimetype = %part.content_type,
                "Invalid file request unexpected mimetype"
            );
            return Err(MultipartError::Rejected(format!(
                "mimetype '{}' not allowed for '{}'",
                part.content_type, part.name
            )));
        }

        self.file_count += 1;
        if self.file_count > self.limits.max_file_count {
            return Err(MultipartError::Rejected(format!(
                "more than {} files",
                self.limits.max_file_count
            )));
        }

        self.open_file = Some(OpenFile {
            name: part.name.clone(),
            filename: filename.clone(),
            mimetype: part.content_type.clone(),
            limit: property.limit,
            bytes: Vec::new(),
        });
        Ok(())
    }

    fn data(&mut self, bytes: &[u8]) -> Result<(), MultipartError> {
        if let Some((_, value)) = self.open_field.as_mut() {
            value.extend_from_slice(bytes);
            return Ok(());
        }
        let Some(file) = self.open_file.as_mut() else {
            return Ok(());
        };

        self.total_bytes += bytes.len() as u64;
        if self.total_bytes > self.limits.max_total_bytes {
            return Err(MultipartError::Rejected(format!(
                "upload exceeds {} bytes",
                self.limits.max_total_bytes
            )));
        }
        file.bytes.extend_from_slice(bytes);
        if let Some(limit) = file.limit {
            if file.bytes.len() as u64 > limit {
                return Err(MultipartError::Rejected(format!(
                    "'{}' exceeds {} bytes",
                    file.name, limit
                )));
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), MultipartError> {
        if let Some((name, value)) = self.open_field.take() {
            self.fields
                .push((name, String::from_utf8_lossy(&value).into_owned()));
        }
        if let Some(file) = self.open_file.take() {
            self.files.push((
                file.name,
                UploadedFile::new(file.filename, file.mimetype, file.bytes),
            ));
        }
        Ok(())
    }
}

/// Run the upload extraction stage for `config`.
///
/// Without upload limits on the route, or without a payload, this is a no-op.
pub fn extract(
    config: &HandlerConfig,
    payload: Option<MultipartPayload>,
    parameters: &mut Parameters,
) -> Result<(), DispatchError> {
    let Some(limits) = config.upload_limits() else {
        return Ok(());
    };
    let Some(mut payload) = payload else {
        debug!(routing_path = %config.routing_path(), "No multipart payload to extract");
        return Ok(());
    };

    let properties = config.file_properties();
    let mut sink = UploadSink::new(&properties, limits);
    let mut parser = MultipartParser::new(&payload.boundary);
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    let outcome = loop {
        let read = match payload.body.read(&mut chunk) {
            Ok(0) => break parser.finish(),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "Upload stream failed");
                break Err(MultipartError::Incomplete);
            }
        };
        if let Err(e) = parser.feed(&chunk[..read], &mut sink) {
            break Err(e);
        }
    };

    if let Err(error) = outcome {
        info!(
            routing_path = %config.routing_path(),
            error = %error,
            "Invalid request"
        );
        return Err(DispatchError::bad_request("Invalid request"));
    }

    debug!(
        routing_path = %config.routing_path(),
        fields = sink.fields.len(),
        files = sink.files.len(),
        bytes = sink.total_bytes,
        "Multipart payload extracted"
    );
    for (name, value) in sink.fields {
        parameters.insert(name, serde_json::Value::String(value));
    }
    for (name, file) in sink.files {
        parameters.insert_file(name, file);
    }
    Ok(())
}
