//! # Multipart Module
//!
//! Upload extraction stage of the request pipeline.
//!
//! The stage runs only for routes whose configuration carries upload limits
//! (declared in `routing.http.file` or synthesized from file-typed schema
//! properties) and only when the request actually carries a
//! `multipart/form-data` payload. The body is streamed through
//! [`MultipartParser`] in 8 KiB reads; every file part must target a file-typed
//! schema property whose mimetype allow-list admits it, and the route's byte and
//! file-count ceilings are enforced while reading. Any violation aborts the
//! stream with `400 Invalid request` and drops everything buffered so far.
//! Fields and files are assigned to the parameter bag only once the closing
//! delimiter has been seen.

mod extract;
mod parser;

pub use extract::{boundary, extract, MultipartPayload, READ_CHUNK_BYTES};
pub use parser::{
    MultipartError, MultipartParser, PartHeaders, PartSink, State, MAX_FIELD_BYTES,
    MAX_HEADER_BYTES,
};
