use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use gse_transport::TransportSelector;
use gse_types::Command;
use relay::{RelaySupervisor, SupervisorConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::api::{self, AppState};
use crate::websocket_broker::{forward_telemetry, TelemetryBroker};

/// Starts the relay session and wires its telemetry into a fresh broker.
///
/// Returns the state shared by the HTTP handlers together with the
/// supervisor task, which finishes once `shutdown` is cancelled.
pub fn start_relay(
    selector: TransportSelector,
    config: SupervisorConfig,
    static_dir: PathBuf,
    shutdown: CancellationToken,
) -> (AppState, JoinHandle<()>) {
    let (supervisor, relay) = RelaySupervisor::new(Arc::new(selector), config);
    let broker = Arc::new(TelemetryBroker::new());
    forward_telemetry(relay.subscribe(), broker.clone());
    let supervisor = tokio::spawn(supervisor.run(shutdown.clone()));

    let state = AppState {
        broker,
        relay,
        static_dir: Arc::new(static_dir),
        shutdown,
    };
    (state, supervisor)
}

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(state.static_dir.as_ref());
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(websocket_handler))
        .route("/api/status", get(api::status_handler))
        .fallback_service(static_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn run(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

/// Viewers may open their socket on `/` as well as `/ws`; plain browser
/// requests get the dashboard.
async fn root_handler(ws: Option<WebSocketUpgrade>, State(state): State<AppState>) -> Response {
    if let Some(ws) = ws {
        return upgrade(ws, state);
    }
    match tokio::fs::read_to_string(state.static_dir.join("index.html")).await {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            debug!("No dashboard index: {}", e);
            (StatusCode::NOT_FOUND, "dashboard not installed").into_response()
        }
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (id, mut updates) = state.broker.subscribe();
    info!(viewer = %id, clients = state.broker.client_count(), "Viewer connected");
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            update = updates.recv() => {
                let Some(text) = update else { break };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(viewer = %id, "Failed to send update: {}", e);
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_viewer_message(&state, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(viewer = %id, "Error receiving from viewer: {}", e);
                    break;
                }
            },
        }
    }

    state.broker.unsubscribe(&id);
    info!(viewer = %id, clients = state.broker.client_count(), "Viewer disconnected");
}

async fn handle_viewer_message(state: &AppState, text: &str) {
    let command = match Command::from_json(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed viewer message: {}", e);
            return;
        }
    };
    match command {
        Command::Heartbeat { .. } => {
            state
                .broker
                .broadcast_heartbeat_response(Utc::now().timestamp_millis());
        }
        command => {
            let tag = command.tag().to_string();
            if state.relay.submit(command).await {
                debug!(command = %tag, "Command sent to hardware");
            } else {
                info!(command = %tag, "Command queued until hardware reconnects");
            }
        }
    }
}
