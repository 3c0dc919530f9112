use super::{HandlerResponse, RequestContext};
use crate::error::DispatchError;
use crate::handler::config::HandlerConfig;
use crate::handler::{Handler, Parameters};
use crate::multipart;
use crate::params::redact;
use crate::security::Authenticator;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs the request pipeline for bound routes.
#[derive(Clone, Default)]
pub struct Dispatcher {
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}

/// Render a failure as the error envelope.
///
/// Failures without a code are unexpected and logged at warn level.
#[must_use]
pub fn error_response(error: &DispatchError) -> HandlerResponse {
    if error.is_unclassified() {
        warn!(error = %error.message(), "Unknown error performing request");
    } else {
        debug!(
            kind = ?error.kind(),
            status = error.status(),
            message = %error.message(),
            "Request failed"
        );
    }
    HandlerResponse::json(error.status(), error.to_envelope())
}

/// Shape a handler result.
#[must_use]
pub fn shape_response(config: &HandlerConfig, result: Value) -> HandlerResponse {
    if result.is_string() || config.response_is_raw() {
        return HandlerResponse::raw(200, result);
    }
    let data = match result {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    HandlerResponse::json(200, json!({ "success": true, "data": data }))
}

impl Dispatcher {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self { authenticator }
    }

    #[must_use]
    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    /// Run the full pipeline for an API route. Never fails: errors become envelopes.
    pub fn dispatch(&self, handler: &Handler, mut ctx: RequestContext) -> HandlerResponse {
        let request_id = ctx.request_id;
        let required = handler.config().requires_authentication();
        let result = self
            .resolve_identity(&mut ctx, required)
            .and_then(|()| self.authenticate(handler, &ctx))
            .and_then(|()| self.perform(handler, &mut ctx));
        let mut response = result.unwrap_or_else(|e| error_response(&e));
        response.set_header("x-request-id", request_id.to_string());
        response
    }

    /// Resolve the identity already established for the context.
    ///
    /// Unless `required`, an authenticator failure leaves the request anonymous.
    pub fn resolve_identity(
        &self,
        ctx: &mut RequestContext,
        required: bool,
    ) -> Result<(), DispatchError> {
        if ctx.identity.is_some() {
            return Ok(());
        }
        let Some(auth) = &self.authenticator else {
            return Ok(());
        };
        match auth.identify(&ctx.auth_request()) {
            Ok(identity) => ctx.identity = identity,
            Err(e) if !required => {
                debug!(request_id = %ctx.request_id, error = %e, "Identity unresolved, continuing anonymously");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn authenticate(&self, handler: &Handler, ctx: &RequestContext) -> Result<(), DispatchError> {
        match &self.authenticator {
            Some(auth) if handler.config().requires_authentication() => {
                auth.validate(&ctx.auth_request())
            }
            _ => Ok(()),
        }
    }

    /// Extract, validate, invoke and shape. Authentication is the caller's concern.
    pub fn perform(
        &self,
        handler: &Handler,
        ctx: &mut RequestContext,
    ) -> Result<HandlerResponse, DispatchError> {
        let routing_path = handler.routing_path();
        info!(
            request_id = %ctx.request_id,
            routing_path,
            parameters = %ctx.parameters.log_view(),
            "API called"
        );

        multipart::extract(handler.config(), ctx.payload.take(), &mut ctx.parameters)?;
        handler.validate(&ctx.parameters)?;

        let parameters = std::mem::take(&mut ctx.parameters);
        let result = handler.call(parameters, ctx.identity.as_ref())?;

        info!(
            request_id = %ctx.request_id,
            routing_path,
            response = %redact(&result),
            "API response"
        );
        Ok(shape_response(handler.config(), result))
    }

    /// Log in through the authenticator, then run the login handler if there is one.
    ///
    /// The handler receives the request body as its parameters and the new
    /// identity. The session cookie is set on every successful outcome.
    pub fn login(&self, handler: Option<&Handler>, mut ctx: RequestContext) -> HandlerResponse {
        let request_id = ctx.request_id;
        let Some(auth) = self.authenticator.clone() else {
            return error_response(&DispatchError::not_found("Not found"));
        };

        let result = auth.login(&ctx.auth_request()).and_then(|outcome| {
            info!(request_id = %request_id, identity = %outcome.identity.id, "Login succeeded");
            ctx.identity = Some(outcome.identity);
            ctx.parameters = Parameters::from_value(ctx.body.clone());
            let mut response = match handler {
                Some(handler) => self.perform(handler, &mut ctx)?,
                None => HandlerResponse::json(200, json!({ "success": true })),
            };
            if let Some(cookie) = outcome.cookie {
                response.append_header("set-cookie", cookie.header_value());
            }
            Ok(response)
        });

        let mut response = result.unwrap_or_else(|e| error_response(&e));
        response.set_header("x-request-id", request_id.to_string());
        response
    }

    /// Log out through the authenticator, then run the logout handler if there is one.
    pub fn logout(&self, handler: Option<&Handler>, mut ctx: RequestContext) -> HandlerResponse {
        let request_id = ctx.request_id;
        let Some(auth) = self.authenticator.clone() else {
            return error_response(&DispatchError::not_found("Not found"));
        };

        let result = self.resolve_identity(&mut ctx, false).and_then(|()| {
            let cookie = auth.logout(&ctx.auth_request())?;
            if let Some(identity) = &ctx.identity {
                info!(request_id = %request_id, identity = %identity.id, "Logout");
            }
            ctx.parameters = match &ctx.body {
                Value::Object(body) => Parameters::new(body.clone()),
                _ => Parameters::new(ctx.query.clone()),
            };
            let mut response = match handler {
                Some(handler) => self.perform(handler, &mut ctx)?,
                None => HandlerResponse::json(200, json!({ "success": true })),
            };
            if let Some(cookie) = cookie {
                response.append_header("set-cookie", cookie.header_value());
            }
            Ok(response)
        });

        let mut response = result.unwrap_or_else(|e| error_response(&e));
        response.set_header("x-request-id", request_id.to_string());
        response
    }

    /// Fallback for unmatched requests, always status 404.
    ///
    /// With a `404` handler its result is shaped as usual and any failure
    /// degrades to plain text. Without one the caller gets JSON or text
    /// depending on `Accept`.
    pub fn not_found(&self, handler: Option<&Handler>, mut ctx: RequestContext) -> HandlerResponse {
        debug!(method = %ctx.method, path = %ctx.path, "No route matched");
        let mut response = match handler {
            Some(handler) => {
                ctx.parameters = Parameters::default();
                match self
                    .resolve_identity(&mut ctx, false)
                    .and_then(|()| self.perform(handler, &mut ctx))
                {
                    Ok(response) => response,
                    Err(e) => {
                        debug!(error = %e, "Not-found handler failed");
                        HandlerResponse::text(404, "Not found")
                    }
                }
            }
            None if ctx.accepts_json() => {
                HandlerResponse::json(404, json!({ "success": false, "message": "Not found" }))
            }
            None => HandlerResponse::text(404, "Not found"),
        };
        response.status = 404;
        response.set_header("x-request-id", ctx.request_id.to_string());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::config::HttpRouting;
    use crate::handler::handler_fn;
    use crate::security::{AuthRequest, Identity, LoginOutcome, SetCookie};
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts `token` header `let-me-in` as identity `ada`.
    struct TokenAuth;

    impl Authenticator for TokenAuth {
        fn identify(&self, req: &AuthRequest<'_>) -> Result<Option<Identity>, DispatchError> {
            Ok((req.get_header("token") == Some("let-me-in"))
                .then(|| Identity::new("ada", Value::Null)))
        }

        fn login(&self, req: &AuthRequest<'_>) -> Result<LoginOutcome, DispatchError> {
            if req.body["password"] == "secret" {
                Ok(LoginOutcome {
                    identity: Identity::new("ada", Value::Null),
                    cookie: Some(SetCookie {
                        name: "sid".into(),
                        value: "s1".into(),
                        max_age: Some(60),
                    }),
                })
            } else {
                Err(DispatchError::unauthorized("Unauthorized access."))
            }
        }

        fn logout(&self, _req: &AuthRequest<'_>) -> Result<Option<SetCookie>, DispatchError> {
            Ok(None)
        }
    }

    fn post() -> HttpRouting {
        HttpRouting {
            post: true,
            ..Default::default()
        }
    }

    fn ctx(parameters: Value) -> RequestContext {
        let mut ctx = RequestContext::new(Method::POST, "/api/x");
        ctx.parameters = Parameters::from_value(parameters);
        ctx
    }

    /// Identity lookups always fail, as with an unreachable session backend.
    struct BrokenAuth;

    impl Authenticator for BrokenAuth {
        fn identify(&self, _req: &AuthRequest<'_>) -> Result<Option<Identity>, DispatchError> {
            Err(DispatchError::internal("session backend down"))
        }

        fn login(&self, _req: &AuthRequest<'_>) -> Result<LoginOutcome, DispatchError> {
            Err(DispatchError::unauthorized("Unauthorized access."))
        }

        fn logout(&self, _req: &AuthRequest<'_>) -> Result<Option<SetCookie>, DispatchError> {
            Ok(None)
        }
    }

    #[test]
    fn identify_failure_only_affects_protected_routes() {
        let dispatcher = Dispatcher::new(Some(Arc::new(BrokenAuth)));
        let public = Handler::bind(
            "public",
            HandlerConfig::builder().http(post()).build(),
            handler_fn(|_, identity| Ok(json!({ "anonymous": identity.is_none() }))),
        )
        .unwrap();
        let response = dispatcher.dispatch(&public, ctx(json!({})));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"success": true, "data": {"anonymous": true}}));

        let response = dispatcher.not_found(None, RequestContext::new(Method::GET, "/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"success": false, "message": "Not found"}));

        let protected = Handler::bind(
            "protected",
            HandlerConfig::builder().http(post()).require_authentication().build(),
            handler_fn(|_, _| Ok(json!({}))),
        )
        .unwrap();
        let response = dispatcher.dispatch(&protected, ctx(json!({})));
        assert_eq!(response.status, 500);
        assert_eq!(response.body["success"], json!(false));
    }

    #[test]
    fn wraps_results_in_envelope() {
        let handler = Handler::bind(
            "x",
            HandlerConfig::builder().http(post()).build(),
            handler_fn(|_, _| Ok(json!({"x": 1}))),
        )
        .unwrap();
        let response = Dispatcher::default().dispatch(&handler, ctx(json!({})));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"success": true, "data": {"x": 1}}));
        assert!(response.get_header("x-request-id").is_some());
    }

    #[test]
    fn null_result_becomes_empty_object() {
        let handler = Handler::bind(
            "x",
            HandlerConfig::default(),
            handler_fn(|_, _| Ok(Value::Null)),
        )
        .unwrap();
        let response = Dispatcher::default().dispatch(&handler, ctx(json!({})));
        assert_eq!(response.body, json!({"success": true, "data": {}}));
    }

    #[test]
    fn strings_and_raw_routes_bypass_envelope() {
        let text = Handler::bind("t", HandlerConfig::default(), handler_fn(|_, _| Ok(json!("hi"))))
            .unwrap();
        assert_eq!(
            Dispatcher::default().dispatch(&text, ctx(json!({}))).body,
            json!("hi")
        );

        let raw = Handler::bind(
            "r",
            HandlerConfig::builder().raw_response().build(),
            handler_fn(|_, _| Ok(json!([1, 2]))),
        )
        .unwrap();
        assert_eq!(
            Dispatcher::default().dispatch(&raw, ctx(json!({}))).body,
            json!([1, 2])
        );
    }

    #[test]
    fn unauthenticated_request_stops_before_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = Handler::bind(
            "secret",
            HandlerConfig::builder()
                .require_authentication()
                .parameters(json!({"type": "object", "required": ["never"]}))
                .build(),
            handler_fn(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }),
        )
        .unwrap();
        let dispatcher = Dispatcher::new(Some(Arc::new(TokenAuth)));

        let response = dispatcher.dispatch(&handler, ctx(json!({})));
        assert_eq!(response.status, 401);
        assert_eq!(response.body["error"]["code"], json!(401));
        assert_eq!(response.body["error"]["message"], json!("Unauthorized access."));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identity_reaches_handler() {
        let handler = Handler::bind(
            "me",
            HandlerConfig::builder().require_authentication().build(),
            handler_fn(|_, identity| Ok(json!({ "id": identity.map(|i| i.id.clone()) }))),
        )
        .unwrap();
        let mut request = ctx(json!({}));
        request.headers.insert("token".into(), "let-me-in".into());

        let response = Dispatcher::new(Some(Arc::new(TokenAuth))).dispatch(&handler, request);
        assert_eq!(response.body, json!({"success": true, "data": {"id": "ada"}}));
    }

    #[test]
    fn authentication_skipped_without_authenticator() {
        let handler = Handler::bind(
            "open",
            HandlerConfig::builder().require_authentication().build(),
            handler_fn(|_, _| Ok(json!({}))),
        )
        .unwrap();
        assert_eq!(Dispatcher::default().dispatch(&handler, ctx(json!({}))).status, 200);
    }

    #[test]
    fn invalid_parameters_are_400() {
        let handler = Handler::bind(
            "v",
            HandlerConfig::builder()
                .parameters(json!({"type": "object", "required": ["name"]}))
                .build(),
            handler_fn(|_, _| Ok(json!({}))),
        )
        .unwrap();
        let response = Dispatcher::default().dispatch(&handler, ctx(json!({"other": 1})));
        assert_eq!(response.status, 400);
        assert_eq!(
            response.body,
            json!({"success": false, "error": {"code": 400, "message": "Invalid request", "data": null}})
        );
    }

    #[test]
    fn handler_errors_keep_their_status_and_data() {
        let conflict = Handler::bind(
            "c",
            HandlerConfig::default(),
            handler_fn(|_, _| Err(DispatchError::conflict("taken").with_data(json!({"field": "email"})))),
        )
        .unwrap();
        let response = Dispatcher::default().dispatch(&conflict, ctx(json!({})));
        assert_eq!(response.status, 409);
        assert_eq!(response.body["error"]["data"], json!({"field": "email"}));

        let untyped = Handler::bind(
            "u",
            HandlerConfig::default(),
            handler_fn(|_, _| Err(anyhow::anyhow!("db down").into())),
        )
        .unwrap();
        let response = Dispatcher::default().dispatch(&untyped, ctx(json!({})));
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"]["code"], json!(500));
        assert_eq!(response.body["error"]["message"], json!("db down"));
    }

    #[test]
    fn login_sets_cookie_and_runs_handler_with_body() {
        let handler = Handler::bind(
            "auth/login",
            HandlerConfig::default(),
            handler_fn(|params, identity| {
                Ok(json!({
                    "user": identity.map(|i| i.id.clone()),
                    "remember": params.get("remember").cloned()
                }))
            }),
        )
        .unwrap();
        let dispatcher = Dispatcher::new(Some(Arc::new(TokenAuth)));
        let mut request = RequestContext::new(Method::POST, "/api/login");
        request.body = json!({"password": "secret", "remember": true});

        let response = dispatcher.login(Some(&handler), request);
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            json!({"success": true, "data": {"user": "ada", "remember": true}})
        );
        assert_eq!(
            response.get_header("set-cookie"),
            Some("sid=s1; Path=/; HttpOnly; Max-Age=60")
        );

        let mut request = RequestContext::new(Method::POST, "/api/login");
        request.body = json!({"password": "nope"});
        let response = dispatcher.login(None, request);
        assert_eq!(response.status, 401);
        assert!(response.get_header("set-cookie").is_none());
    }

    #[test]
    fn not_found_negotiates_and_uses_handler() {
        let dispatcher = Dispatcher::default();

        let response = dispatcher.not_found(None, RequestContext::new(Method::GET, "/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"success": false, "message": "Not found"}));

        let mut html = RequestContext::new(Method::GET, "/nope");
        html.headers.insert("accept".into(), "text/html".into());
        let response = dispatcher.not_found(None, html);
        assert_eq!(response.body, json!("Not found"));

        let page = Handler::bind(
            "404",
            HandlerConfig::default(),
            handler_fn(|_, _| Ok(json!({"page": "missing"}))),
        )
        .unwrap();
        let response = dispatcher.not_found(Some(&page), RequestContext::new(Method::GET, "/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"success": true, "data": {"page": "missing"}}));

        let broken = Handler::bind(
            "404",
            HandlerConfig::default(),
            handler_fn(|_, _| Err(DispatchError::internal("boom"))),
        )
        .unwrap();
        let response = dispatcher.not_found(Some(&broken), RequestContext::new(Method::GET, "/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!("Not found"));
    }
}
