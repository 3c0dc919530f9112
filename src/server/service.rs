use super::request::{apply_path_params, build_context, read_request, RawRequest};
use super::response::{write_bytes, write_response};
use crate::dispatcher::{error_response, Dispatcher, HandlerResponse};
use crate::handler::Handler;
use crate::registry::HandlerRegistry;
use crate::router::{RouteTarget, Router};
use crate::static_files::StaticFiles;
use http::Method;
use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Reserved health check path, answered for every verb.
pub const HEALTH_PATH: &str = "/health";

/// Routing path of the optional not-found handler.
pub const NOT_FOUND_HANDLER: &str = "404";

/// Default request body ceiling.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// What the service produced for one request.
#[derive(Debug)]
pub enum Served {
    Response(HandlerResponse),
    Static {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
}

/// Top-level HTTP wiring.
///
/// Each request is resolved in order: the route table (API handlers, index,
/// login and logout), the health check, static resources for `GET`, and finally
/// the not-found fallback.
#[derive(Clone)]
pub struct AppService {
    router: Arc<Router>,
    dispatcher: Dispatcher,
    not_found: Option<Handler>,
    static_files: Option<StaticFiles>,
    max_body_bytes: u64,
}

/// Health check response body.
#[must_use]
pub fn health_response() -> HandlerResponse {
    HandlerResponse::json(200, json!({ "success": true, "data": {} }))
}

impl AppService {
    pub fn new(router: Router, dispatcher: Dispatcher, registry: &HandlerRegistry) -> Self {
        let not_found = registry.get(NOT_FOUND_HANDLER).ok();
        Self {
            router: Arc::new(router),
            dispatcher,
            not_found,
            static_files: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    #[must_use]
    pub fn with_static_files(mut self, static_files: StaticFiles) -> Self {
        self.static_files = Some(static_files);
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// Resolve one request against the route table and the fixed routes.
    pub fn respond(&self, raw: RawRequest) -> Served {
        let mut ctx = match build_context(raw) {
            Ok(ctx) => ctx,
            Err(e) => return Served::Response(error_response(&e)),
        };

        if let Some(matched) = self.router.route(&ctx.method, &ctx.path) {
            apply_path_params(&mut ctx, matched.path_params());
            let response = match &matched.route.target {
                RouteTarget::Handler { handler } => self.dispatcher.dispatch(handler, ctx),
                RouteTarget::Login { handler } => self.dispatcher.login(handler.as_ref(), ctx),
                RouteTarget::Logout { handler } => self.dispatcher.logout(handler.as_ref(), ctx),
            };
            return Served::Response(response);
        }

        if ctx.path == HEALTH_PATH {
            return Served::Response(health_response());
        }

        if ctx.method == Method::GET {
            if let Some(static_files) = &self.static_files {
                match static_files.load(&ctx.path) {
                    Ok((bytes, content_type)) => {
                        return Served::Static {
                            bytes,
                            content_type,
                        }
                    }
                    Err(e) => debug!(path = %ctx.path, error = %e, "No static resource"),
                }
            }
        }

        Served::Response(self.dispatcher.not_found(self.not_found.as_ref(), ctx))
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let served = match read_request(req, self.max_body_bytes) {
            Ok(raw) => self.respond(raw),
            Err(e) => Served::Response(error_response(&e)),
        };
        match served {
            Served::Response(response) => write_response(res, response),
            Served::Static {
                bytes,
                content_type,
            } => write_bytes(res, 200, content_type, bytes),
        }
        Ok(())
    }
}
