//! `may_minihttp` adapter: request parsing, response writing and the
//! top-level [`AppService`].

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{apply_path_params, build_context, read_request, RawRequest};
pub use response::write_response;
pub use service::{
    health_response, AppService, Served, DEFAULT_MAX_BODY_BYTES, HEALTH_PATH, NOT_FOUND_HANDLER,
};
