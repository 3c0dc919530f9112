mod common;

use common::descriptors::{tree, write};
use common::test_server::{free_port, send, setup_may_runtime};
use serde_json::json;
use waypost::config::ServiceConfig;
use waypost::handler::handler_fn;
use waypost::registry::HandlerCatalog;
use waypost::service::{RunningService, ServiceBuilder};

fn start(dir: &tempfile::TempDir, max_body_bytes: u64) -> RunningService {
    setup_may_runtime();
    let mut config = ServiceConfig::default();
    config.host.address = "127.0.0.1".to_string();
    config.host.port = free_port();
    config.routing.api.location = dir.path().join("api");
    config.routing.static_dir = dir.path().join("public");
    config.limits.max_body_bytes = max_body_bytes;

    let catalog = HandlerCatalog::new()
        .with("echo", |_| handler_fn(|params, _| Ok(params.values().clone().into())))
        .with("index", |_| handler_fn(|_, _| Ok(json!("<h1>waypost</h1>"))));
    let service = ServiceBuilder::new(config, ())
        .catalog(catalog)
        .build()
        .unwrap();
    let running = service.start().unwrap();
    running.wait_ready().unwrap();
    running
}

fn fixture() -> tempfile::TempDir {
    let dir = tree(&[
        (
            "api/echo.yaml",
            "routing:\n  http:\n    get: true\n    post: true\n",
        ),
        ("api/index.yaml", "routing:\n  http:\n    get: true\n"),
    ]);
    write(dir.path(), "public/robots.txt", "User-agent: *\n");
    dir
}

#[test]
fn test_health_and_api_round_trip() {
    let dir = fixture();
    let server = start(&dir, 1024);
    let addr = server.http_addr();

    let health = send(addr, "GET", "/health", &[], b"");
    assert_eq!(health.status, 200);
    assert_eq!(health.json(), json!({"success": true, "data": {}}));

    let echo = send(
        addr,
        "POST",
        "/api/echo?from=query&both=query",
        &[("Content-Type", "application/json")],
        br#"{"both": "body", "n": 1}"#,
    );
    assert_eq!(echo.status, 200);
    assert_eq!(echo.header("content-type"), Some("application/json"));
    assert_eq!(echo.header("x-request-id"), None);
    assert_eq!(
        echo.json(),
        json!({"success": true, "data": {"from": "query", "both": "body", "n": 1}})
    );

    server.stop();
}

#[test]
fn test_index_static_and_not_found() {
    let dir = fixture();
    let server = start(&dir, 1024);
    let addr = server.http_addr();

    let index = send(addr, "GET", "/", &[], b"");
    assert_eq!(index.status, 200);
    assert_eq!(index.text(), "<h1>waypost</h1>");
    assert!(index.header("content-type").unwrap().starts_with("text/html"));

    let robots = send(addr, "GET", "/robots.txt", &[], b"");
    assert_eq!(robots.status, 200);
    assert_eq!(robots.text(), "User-agent: *\n");

    let missing = send(addr, "GET", "/nope", &[("Accept", "application/json")], b"");
    assert_eq!(missing.status, 404);
    assert_eq!(missing.json(), json!({"success": false, "message": "Not found"}));

    let missing = send(addr, "GET", "/nope", &[("Accept", "text/html")], b"");
    assert_eq!(missing.status, 404);
    assert_eq!(missing.text(), "Not found");

    let traversal = send(addr, "GET", "/../Cargo.toml", &[("Accept", "text/html")], b"");
    assert_eq!(traversal.status, 404);

    server.stop();
}

#[test]
fn test_oversized_body_is_refused() {
    let dir = fixture();
    let server = start(&dir, 16);
    let addr = server.http_addr();

    let reply = send(
        addr,
        "POST",
        "/api/echo",
        &[("Content-Type", "application/json")],
        br#"{"padding": "this is longer than sixteen bytes"}"#,
    );
    assert_eq!(reply.status, 413);
    assert_eq!(reply.json()["error"]["code"], json!(413));

    server.stop();
}
