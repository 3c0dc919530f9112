//! # waypost
//!
//! **waypost** discovers request handlers from a tree of descriptor files and
//! serves them over HTTP and a persistent event transport, on the `may`
//! coroutine runtime.
//!
//! ## Overview
//!
//! A service is described by two things:
//!
//! - a directory of **descriptors** (`.yaml`, `.yml` or `.json`), one per
//!   handler, whose position in the tree is its routing path
//!   (`api/users/list.yaml` → `users/list`), declaring the parameter schema,
//!   the verbs or event it answers, and whether it requires authentication
//! - a **catalog** of handler factories keyed by the same routing paths,
//!   registered in code at startup
//!
//! Every request then runs the same pipeline: authenticate, extract multipart
//! uploads, validate parameters against the schema, invoke the handler, and
//! shape the result into the response envelope:
//!
//! ```json
//! {"success": true, "data": {"id": 1}}
//! {"success": false, "error": {"code": 400, "message": "Invalid request", "data": null}}
//! ```
//!
//! ## Architecture
//!
//! - **[`registry`]** - descriptor discovery, the handler catalog and the read-only registry
//! - **[`handler`]** - bound handlers, their frozen configuration and the parameter bag
//! - **[`validator`]** - JSON Schema validation of parameters
//! - **[`params`]** - query, form and body merging
//! - **[`multipart`]** - incremental `multipart/form-data` parsing and upload ceilings
//! - **[`security`]** - the authenticator seam and a session-cookie implementation
//! - **[`router`]** - radix route table
//! - **[`dispatcher`]** - the request pipeline and the error envelope
//! - **[`events`]** - the event pipeline, connection hub and socket transport
//! - **[`server`]** - the `may_minihttp` adapter and top-level HTTP wiring
//! - **[`service`]** - assembly of all of the above from a [`config::ServiceConfig`]
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use waypost::config::{RuntimeConfig, ServiceConfig};
//! use waypost::handler::handler_fn;
//! use waypost::registry::HandlerCatalog;
//! use waypost::service::ServiceBuilder;
//!
//! # fn main() -> anyhow::Result<()> {
//! RuntimeConfig::from_env().apply();
//! let config = ServiceConfig::load("service.yaml".as_ref())?;
//! let catalog = HandlerCatalog::new().with("users/show", |_ctx| {
//!     handler_fn(|params, _identity| Ok(json!({ "id": params.get("id") })))
//! });
//! let running = ServiceBuilder::new(config, ()).catalog(catalog).build()?.start()?;
//! running.join();
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod multipart;
pub mod params;
pub mod registry;
pub mod router;
pub mod security;
pub mod server;
pub mod service;
pub mod static_files;
pub mod validator;

pub use dispatcher::{Dispatcher, HandlerResponse, RequestContext};
pub use error::{DispatchError, ErrorKind, RegistryError};
pub use handler::{handler_fn, Handler, HandlerConfig, HandlerFn, Parameters};
pub use registry::{HandlerCatalog, HandlerRegistry, ServiceContext};
pub use security::{Authenticator, Identity};
pub use service::{Service, ServiceBuilder};
