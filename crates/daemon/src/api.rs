use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, Json};
use gse_types::{TelemetrySnapshot, TransportKind};
use relay::RelayHandle;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::websocket_broker::TelemetryBroker;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<TelemetryBroker>,
    pub relay: RelayHandle,
    pub static_dir: Arc<PathBuf>,
    /// Cancelled when the process is shutting down. Viewer sockets watch it
    /// to send their close frame.
    pub shutdown: CancellationToken,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub clients: usize,
    pub data: TelemetrySnapshot,
    #[serde(rename = "type")]
    pub kind: Option<TransportKind>,
    pub queued_commands: usize,
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.relay.status().await;
    Json(StatusResponse {
        connected: status.connected,
        clients: state.broker.client_count(),
        data: state.broker.snapshot(),
        kind: status.kind,
        queued_commands: status.queued_commands,
    })
}
