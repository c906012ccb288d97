//! Configuration for the transport tiers

use serde::{Deserialize, Serialize};

use crate::serial::SerialConfig;
use crate::simulation::SimulationConfig;

/// Which tiers to try and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upstream relay endpoint tried before any serial device
    pub websocket_url: Option<String>,
    /// Upper bound on a single WebSocket connect attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Serial device selection
    pub serial: SerialConfig,
    /// Synthetic data fallback
    pub simulation: SimulationConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_url: None,
            connect_timeout_ms: 3000,
            serial: SerialConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}
