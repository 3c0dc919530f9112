mod common;

use common::descriptors::tree;
use common::event_client::EventClient;
use common::test_server::{free_port, setup_may_runtime};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use waypost::config::ServiceConfig;
use waypost::handler::handler_fn;
use waypost::registry::HandlerCatalog;
use waypost::security::{Authenticator, Identity, MemorySessionStore, SessionAuthenticator};
use waypost::service::{RunningService, ServiceBuilder};
use waypost::DispatchError;

#[derive(Clone, Default)]
struct Counters {
    disconnects: Arc<AtomicUsize>,
}

const DESCRIPTORS: &[(&str, &str)] = &[
    (
        "chat/say.yaml",
        r#"
parameters:
  type: object
  properties:
    text: { type: string }
  required: [text]
routing:
  socket: {}
"#,
    ),
    ("chat/shout.yaml", "routing:\n  socket:\n    event: shout\n"),
    ("socket/connect.yaml", "routing: {}\n"),
    ("socket/disconnect.yaml", "routing: {}\n"),
];

fn catalog() -> HandlerCatalog<Counters> {
    HandlerCatalog::<Counters>::new()
        .with("chat/say", |_| {
            handler_fn(|params, _| {
                let text = params.get_str("text").unwrap_or_default().to_string();
                if text == "explode" {
                    return Err(DispatchError::internal("boom"));
                }
                if let Some(conn) = params.connection() {
                    conn.emit("chat/echo", json!({ "text": text }));
                }
                Ok(Value::Null)
            })
        })
        .with("chat/shout", |ctx| {
            let hub = ctx.hub().clone();
            handler_fn(move |params, _| {
                hub.broadcast("shouted", params.values().clone().into());
                Ok(Value::Null)
            })
        })
        .with("socket/connect", |_| {
            handler_fn(|params, _| {
                if let Some(conn) = params.connection() {
                    conn.emit("welcome", json!({ "id": conn.id().to_string() }));
                }
                Ok(Value::Null)
            })
        })
        .with("socket/disconnect", |ctx| {
            let state = ctx.state_arc();
            handler_fn(move |_, _| {
                state.disconnects.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
        })
}

fn start(
    dir: &tempfile::TempDir,
    counters: &Counters,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> RunningService {
    setup_may_runtime();
    let mut config = ServiceConfig::default();
    config.host.address = "127.0.0.1".to_string();
    config.host.port = free_port();
    config.socket.port = Some(free_port());
    config.socket.connect.api = Some("socket/connect".to_string());
    config.socket.disconnect.api = Some("socket/disconnect".to_string());
    config.routing.api.location = dir.path().to_path_buf();
    config.routing.static_dir = dir.path().join("public");

    let builder = ServiceBuilder::new(config, counters.clone()).catalog(catalog());
    let builder = match authenticator {
        Some(auth) => builder.authenticator(auth),
        None => builder,
    };
    let running = builder.build().unwrap().start().unwrap();
    running.wait_ready().unwrap();
    running
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn connected(server: &RunningService) -> EventClient {
    let mut client = EventClient::connect(server.event_addr().unwrap(), "");
    let welcome = client.recv().unwrap();
    assert_eq!(welcome["event"], json!("welcome"));
    client
}

#[test]
fn handshake_runs_connect_handler() {
    let dir = tree(DESCRIPTORS);
    let server = start(&dir, &Counters::default(), None);

    let mut client = EventClient::connect(server.event_addr().unwrap(), "");
    let welcome = client.recv().unwrap();
    assert_eq!(welcome["event"], json!("welcome"));
    assert!(welcome["data"]["data"]["id"].is_string());

    client.close();
    server.stop();
}

#[test]
fn failing_event_keeps_connection_open() {
    let dir = tree(DESCRIPTORS);
    let server = start(&dir, &Counters::default(), None);
    let mut client = connected(&server);

    client.emit("chat/say", json!({ "text": "explode" }));
    client.emit("chat/say", json!({ "wrong": 1 }));
    client.send_raw(json!("not a frame"));
    client.emit("nobody/listens", json!({}));
    client.emit("chat/say", json!({ "text": "hello" }));

    let echo = client.recv().unwrap();
    assert_eq!(
        echo,
        json!({ "event": "chat/echo", "data": { "data": { "text": "hello" } } })
    );

    client.close();
    server.stop();
}

#[test]
fn undecodable_bytes_do_not_drop_the_connection() {
    let dir = tree(DESCRIPTORS);
    let counters = Counters::default();
    let server = start(&dir, &counters, None);
    let mut client = connected(&server);

    client.send_bytes(b"\xff\xfe garbage\n");
    let mut oversized = vec![b'x'; waypost::events::MAX_FRAME_BYTES + 16];
    oversized.push(b'\n');
    client.send_bytes(&oversized);
    client.emit("chat/say", json!({ "text": "still here" }));

    let echo = client.recv().unwrap();
    assert_eq!(echo["event"], json!("chat/echo"));
    assert_eq!(echo["data"]["data"], json!({ "text": "still here" }));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);

    client.close();
    server.stop();
}

#[test]
fn broadcast_reaches_every_connection() {
    let dir = tree(DESCRIPTORS);
    let server = start(&dir, &Counters::default(), None);
    let mut first = connected(&server);
    let mut second = connected(&server);

    first.emit("shout", json!({ "text": "all hands" }));

    for client in [&mut first, &mut second] {
        let frame = client.recv().unwrap();
        assert_eq!(frame["event"], json!("shouted"));
        assert_eq!(frame["data"]["data"], json!({ "text": "all hands" }));
    }

    first.close();
    second.close();
    server.stop();
}

#[test]
fn disconnect_handler_runs_once_per_connection() {
    let dir = tree(DESCRIPTORS);
    let counters = Counters::default();
    let server = start(&dir, &counters, None);

    let client = connected(&server);
    client.close();
    assert!(wait_for(|| counters.disconnects.load(Ordering::SeqCst) == 1));

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);

    server.stop();
}

#[test]
fn unauthenticated_connection_is_refused() {
    let dir = tree(DESCRIPTORS);
    let auth: Arc<dyn Authenticator> = Arc::new(SessionAuthenticator::new(
        "sid",
        MemorySessionStore::default(),
        |_: &Value| -> Result<Option<Identity>, DispatchError> { Ok(None) },
    ));
    let server = start(&dir, &Counters::default(), Some(auth));

    let mut client = EventClient::connect(server.event_addr().unwrap(), "sid=forged");
    let refusal = client.recv().unwrap();
    assert_eq!(refusal["event"], json!("error"));
    assert_eq!(refusal["data"]["data"]["code"], json!(401));
    assert!(client.recv().is_none());

    server.stop();
}
