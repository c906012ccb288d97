use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use gse_daemon::api::AppState;
use gse_daemon::server::{router, run, start_relay};
use gse_transport::{
    Connector, Inbound, Link, LinkEnds, SimulationConnector, TransportError, TransportSelector,
};
use gse_types::TransportKind;
use relay::SupervisorConfig;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stands in for the microcontroller: the test drives the transport side of
/// every link it hands out.
#[derive(Clone, Default)]
struct BenchConnector {
    ends: Arc<Mutex<Option<LinkEnds>>>,
}

#[async_trait]
impl Connector for BenchConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        let (link, ends) = Link::pair(TransportKind::Serial);
        *self.ends.lock().unwrap() = Some(ends);
        Ok(link)
    }
}

struct TestDaemon {
    addr: String,
    state: AppState,
    shutdown: CancellationToken,
    _static_dir: TempDir,
}

impl TestDaemon {
    async fn start(selector: TransportSelector) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<h1>GSE</h1>").unwrap();
        std::fs::write(static_dir.path().join("app.js"), "console.log('gse');").unwrap();

        let shutdown = CancellationToken::new();
        let (state, _supervisor) = start_relay(
            selector,
            SupervisorConfig::default(),
            static_dir.path().to_path_buf(),
            shutdown.clone(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(run(listener, router(state.clone()), shutdown.clone()));

        Self {
            addr,
            state,
            shutdown,
            _static_dir: static_dir,
        }
    }

    async fn wait_connected(&self) {
        let mut rx = self.state.relay.watch_state();
        timeout(Duration::from_secs(5), async {
            while !rx.borrow_and_update().is_connected() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("relay never connected");
    }

    async fn viewer(&self, path: &str) -> Viewer {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _) = connect_async(url).await.expect("viewer failed to connect");
        ws
    }

    async fn status(&self) -> Value {
        let response = router(self.state.clone())
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

async fn next_json(viewer: &mut Viewer) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), viewer.next())
            .await
            .expect("timed out waiting for a message")
            .expect("viewer stream ended")
            .expect("viewer stream error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_hardware_line_reaches_viewer() {
    let bench = BenchConnector::default();
    let daemon =
        TestDaemon::start(TransportSelector::new(vec![Box::new(bench.clone())], None)).await;
    daemon.wait_connected().await;

    let mut viewer = daemon.viewer("/ws").await;
    let init = next_json(&mut viewer).await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["data"]["pressure"], 0.0);

    let ends = bench.ends.lock().unwrap().take().unwrap();
    ends.inbound_tx
        .send(Inbound::Chunk("PRESSURE:73.5\nVALVE:main:OPEN\n".to_string()))
        .unwrap();

    let update = next_json(&mut viewer).await;
    assert_eq!(update["type"], "pressure");
    assert_eq!(update["value"], 73.5);
    let update = next_json(&mut viewer).await;
    assert_eq!(update["type"], "valve");
    assert_eq!(update["value"], json!({"name": "main", "open": true}));

    let status = daemon.status().await;
    assert_eq!(status["data"]["pressure"], 73.5);
    assert_eq!(status["data"]["valveStates"]["main"], true);
}

#[tokio::test]
async fn test_viewer_command_reaches_hardware() {
    let bench = BenchConnector::default();
    let daemon =
        TestDaemon::start(TransportSelector::new(vec![Box::new(bench.clone())], None)).await;
    daemon.wait_connected().await;
    let ends = bench.ends.lock().unwrap().take().unwrap();

    let mut viewer = daemon.viewer("/ws").await;
    next_json(&mut viewer).await;
    viewer
        .send(Message::Text(
            json!({"type": "valve", "valve": "main", "state": "open"}).to_string(),
        ))
        .await
        .unwrap();

    let command = timeout(Duration::from_secs(5), ends.outbound_rx.recv_async())
        .await
        .expect("command never reached the transport")
        .unwrap();
    assert_eq!(command.to_wire(), "VALVE:main:OPEN\n");
}

#[tokio::test]
async fn test_loosely_typed_viewer_commands_reach_hardware() {
    let bench = BenchConnector::default();
    let daemon =
        TestDaemon::start(TransportSelector::new(vec![Box::new(bench.clone())], None)).await;
    daemon.wait_connected().await;
    let ends = bench.ends.lock().unwrap().take().unwrap();

    let mut viewer = daemon.viewer("/ws").await;
    next_json(&mut viewer).await;
    for message in [
        json!({"type": "valve", "valve": "main", "state": "OPEN"}),
        json!({"type": "servo", "servo": "gimbal", "value": "45"}),
    ] {
        viewer.send(Message::Text(message.to_string())).await.unwrap();
    }

    let mut wire = Vec::new();
    for _ in 0..2 {
        let command = timeout(Duration::from_secs(5), ends.outbound_rx.recv_async())
            .await
            .expect("command never reached the transport")
            .unwrap();
        wire.push(command.to_wire());
    }
    assert_eq!(wire, vec!["VALVE:main:OPEN\n", "SERVO:gimbal:45\n"]);
}

#[tokio::test]
async fn test_bare_heartbeat_is_answered() {
    let daemon = TestDaemon::start(TransportSelector::new(Vec::new(), None)).await;
    let mut viewer = daemon.viewer("/ws").await;
    next_json(&mut viewer).await;

    viewer
        .send(Message::Text(json!({"type": "heartbeat"}).to_string()))
        .await
        .unwrap();
    let reply = next_json(&mut viewer).await;
    assert_eq!(reply["type"], "heartbeat_response");
    assert!(reply["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_heartbeat_is_answered_to_all_viewers() {
    let bench = BenchConnector::default();
    let daemon =
        TestDaemon::start(TransportSelector::new(vec![Box::new(bench.clone())], None)).await;
    daemon.wait_connected().await;

    let mut first = daemon.viewer("/ws").await;
    let mut second = daemon.viewer("/").await;
    next_json(&mut first).await;
    next_json(&mut second).await;

    first
        .send(Message::Text(
            json!({"type": "heartbeat", "timestamp": 1}).to_string(),
        ))
        .await
        .unwrap();

    for viewer in [&mut first, &mut second] {
        let reply = next_json(viewer).await;
        assert_eq!(reply["type"], "heartbeat_response");
        assert!(reply["timestamp"].as_i64().unwrap() > 1);
    }

    // Answered by the hub, never forwarded to the hardware.
    let ends = bench.ends.lock().unwrap().take().unwrap();
    assert!(ends.outbound_rx.is_empty());
}

#[tokio::test]
async fn test_commands_queue_without_hardware() {
    let daemon = TestDaemon::start(TransportSelector::new(Vec::new(), None)).await;

    let mut viewer = daemon.viewer("/ws").await;
    next_json(&mut viewer).await;
    viewer
        .send(Message::Text(json!({"type": "emergency"}).to_string()))
        .await
        .unwrap();

    let status = timeout(Duration::from_secs(5), async {
        loop {
            let status = daemon.status().await;
            if status["queuedCommands"] == 1 {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("command was never queued");
    assert_eq!(status["connected"], false);
    assert_eq!(status["type"], Value::Null);
    assert_eq!(status["clients"], 1);
    assert!(!daemon.state.relay.state().is_connected());
}

#[tokio::test]
async fn test_simulation_feeds_all_scalar_channels() {
    let selector = TransportSelector::simulation_only(SimulationConnector::new(
        Duration::from_millis(50),
    ));
    let daemon = TestDaemon::start(selector).await;
    daemon.wait_connected().await;

    let mut viewer = daemon.viewer("/").await;
    assert_eq!(next_json(&mut viewer).await["type"], "init");

    let ranges = [
        ("pressure", 50.0, 100.0),
        ("temperature", 20.0, 50.0),
        ("flow", 5.0, 20.0),
        ("voltage", 12.0, 15.0),
        ("loadcell", 100.0, 1000.0),
    ];
    let mut seen = std::collections::HashSet::new();
    while seen.len() < ranges.len() {
        let update = next_json(&mut viewer).await;
        let tag = update["type"].as_str().unwrap().to_string();
        let value = update["value"].as_f64().unwrap();
        let (_, min, max) = ranges
            .iter()
            .find(|(name, _, _)| *name == tag)
            .unwrap_or_else(|| panic!("unexpected channel {}", tag));
        assert!(value >= *min && value <= *max, "{} out of range: {}", tag, value);
        seen.insert(tag);
    }

    let status = daemon.status().await;
    assert_eq!(status["connected"], true);
    assert_eq!(status["type"], "simulation");
}

#[tokio::test]
async fn test_static_dashboard_is_served() {
    let daemon = TestDaemon::start(TransportSelector::new(Vec::new(), None)).await;

    let response = router(daemon.state.clone())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"<h1>GSE</h1>");

    let response = router(daemon.state.clone())
        .oneshot(Request::get("/app.js").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_closes_viewers() {
    let daemon = TestDaemon::start(TransportSelector::new(Vec::new(), None)).await;
    let mut viewer = daemon.viewer("/ws").await;
    next_json(&mut viewer).await;

    daemon.shutdown.cancel();
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match viewer.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "viewer was not closed on shutdown");
}
