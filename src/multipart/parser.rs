//! Incremental `multipart/form-data` parser.
//!
//! The parser is fed arbitrary chunks and reports parts to a [`PartSink`] as
//! soon as their bytes are known. Delimiters split across chunk boundaries are
//! handled by holding back the tail of the buffer that could still begin one.

use std::fmt;

/// Cap on the header block of one part.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;
/// Cap on the value of one plain field.
pub const MAX_FIELD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// Framing or part headers could not be parsed
    Malformed(&'static str),
    HeaderTooLarge,
    FieldTooLarge { name: String },
    /// The body ended before the closing delimiter
    Incomplete,
    /// The sink refused a part or its bytes
    Rejected(String),
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::Malformed(what) => write!(f, "malformed multipart body: {what}"),
            MultipartError::HeaderTooLarge => write!(f, "part headers exceed {MAX_HEADER_BYTES} bytes"),
            MultipartError::FieldTooLarge { name } => {
                write!(f, "field '{name}' exceeds {MAX_FIELD_BYTES} bytes")
            }
            MultipartError::Incomplete => write!(f, "multipart body ended before closing delimiter"),
            MultipartError::Rejected(reason) => write!(f, "part rejected: {reason}"),
        }
    }
}

impl std::error::Error for MultipartError {}

/// Headers of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    pub name: String,
    /// Present for file parts
    pub filename: Option<String>,
    pub content_type: String,
}

impl PartHeaders {
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Receiver of parsed parts.
pub trait PartSink {
    fn begin(&mut self, part: &PartHeaders) -> Result<(), MultipartError>;
    fn data(&mut self, bytes: &[u8]) -> Result<(), MultipartError>;
    fn end(&mut self) -> Result<(), MultipartError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Preamble,
    Headers,
    FieldBody,
    FileBody,
    Finished,
}

/// Multipart state machine.
#[derive(Debug)]
pub struct MultipartParser {
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    state: State,
    field_name: String,
    field_len: usize,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            // A body may open with the delimiter without a preceding line break
            buf: b"\r\n".to_vec(),
            state: State::Preamble,
            field_name: String::new(),
            field_len: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Feed the next chunk of the body.
    pub fn feed<S: PartSink>(&mut self, chunk: &[u8], sink: &mut S) -> Result<(), MultipartError> {
        if self.state == State::Finished {
            return Ok(());
        }
        self.buf.extend_from_slice(chunk);

        loop {
            let progressed = match self.state {
                State::Preamble => self.step_preamble()?,
                State::Headers => self.step_headers(sink)?,
                State::FieldBody | State::FileBody => self.step_body(sink)?,
                State::Finished => {
                    self.buf.clear();
                    false
                }
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Signal the end of the body.
    pub fn finish(self) -> Result<(), MultipartError> {
        match self.state {
            State::Finished => Ok(()),
            _ => Err(MultipartError::Incomplete),
        }
    }

    /// Consume the bytes after a delimiter: `\r\n` opens a part, `--` closes the body.
    fn after_delimiter(&mut self, at: usize) -> Result<Option<State>, MultipartError> {
        let tail_start = at + self.delimiter.len();
        if self.buf.len() < tail_start + 2 {
            return Ok(None);
        }
        let next = match &self.buf[tail_start..tail_start + 2] {
            b"\r\n" => State::Headers,
            b"--" => State::Finished,
            _ => return Err(MultipartError::Malformed("unexpected bytes after boundary")),
        };
        self.buf.drain(..tail_start + 2);
        Ok(Some(next))
    }

    fn step_preamble(&mut self) -> Result<bool, MultipartError> {
        match find(&self.buf, &self.delimiter) {
            Some(at) => match self.after_delimiter(at)? {
                Some(next) => {
                    self.state = next;
                    Ok(true)
                }
                None => Ok(false),
            },
            None => {
                // Keep only what could still start a delimiter
                let keep = self.delimiter.len().saturating_sub(1);
                if self.buf.len() > keep {
                    self.buf.drain(..self.buf.len() - keep);
                }
                Ok(false)
            }
        }
    }

    fn step_headers<S: PartSink>(&mut self, sink: &mut S) -> Result<bool, MultipartError> {
        let Some(end) = find(&self.buf, b"\r\n\r\n") else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(MultipartError::HeaderTooLarge);
            }
            return Ok(false);
        };
        if end > MAX_HEADER_BYTES {
            return Err(MultipartError::HeaderTooLarge);
        }

        let block = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.drain(..end + 4);
        let headers = parse_part_headers(&block)?;

        sink.begin(&headers)?;
        self.field_name = headers.name.clone();
        self.field_len = 0;
        self.state = if headers.is_file() {
            State::FileBody
        } else {
            State::FieldBody
        };
        Ok(true)
    }

    fn step_body<S: PartSink>(&mut self, sink: &mut S) -> Result<bool, MultipartError> {
        match find(&self.buf, &self.delimiter) {
            Some(at) => {
                if at > 0 {
                    self.emit(at, sink)?;
                }
                // The delimiter now starts the buffer
                match self.after_delimiter(0)? {
                    Some(next) => {
                        sink.end()?;
                        self.state = next;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            None => {
                let keep = self.delimiter.len() - 1;
                if self.buf.len() > keep {
                    self.emit(self.buf.len() - keep, sink)?;
                }
                Ok(false)
            }
        }
    }

    fn emit<S: PartSink>(&mut self, len: usize, sink: &mut S) -> Result<(), MultipartError> {
        if self.state == State::FieldBody {
            self.field_len += len;
            if self.field_len > MAX_FIELD_BYTES {
                return Err(MultipartError::FieldTooLarge {
                    name: self.field_name.clone(),
                });
            }
        }
        sink.data(&self.buf[..len])?;
        self.buf.drain(..len);
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_part_headers(block: &str) -> Result<PartHeaders, MultipartError> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in block.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => name = Some(unquote(v.trim()).to_string()),
                    "filename" => filename = Some(unquote(v.trim()).to_string()),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or(MultipartError::Malformed("part without a name"))?;
    Ok(PartHeaders {
        name,
        filename,
        content_type: content_type.unwrap_or_else(|| "text/plain".to_string()),
    })
}
