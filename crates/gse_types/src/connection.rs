//! Connection state of the relay session

use serde::{Deserialize, Serialize};

/// Which transport tier the relay is currently attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Serial,
    Simulation,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Serial => "serial",
            TransportKind::Simulation => "simulation",
        })
    }
}

/// Lifecycle of the single relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(TransportKind),
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            ConnectionState::Connected(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Point-in-time status report of a relay session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    /// `None` while no transport is attached.
    #[serde(rename = "type")]
    pub kind: Option<TransportKind>,
    pub queued_commands: usize,
}

impl ConnectionStatus {
    pub fn from_state(state: ConnectionState, queued_commands: usize) -> Self {
        Self {
            connected: state.is_connected(),
            kind: state.kind(),
            queued_commands,
        }
    }
}
