//! Ordered transport selection with the synthetic fallback

use std::time::Duration;

use tracing::info;

use crate::config::TransportConfig;
use crate::serial::SerialConnector;
use crate::simulation::SimulationConnector;
use crate::types::{Connector, Link, TransportError};
use crate::websocket::WebSocketConnector;

/// Tries each tier in order and falls back to simulation.
pub struct TransportSelector {
    tiers: Vec<Box<dyn Connector>>,
    fallback: Option<SimulationConnector>,
}

impl TransportSelector {
    pub fn new(tiers: Vec<Box<dyn Connector>>, fallback: Option<SimulationConnector>) -> Self {
        Self { tiers, fallback }
    }

    /// WebSocket first (when an upstream URL is set), then serial, then the
    /// generator when enabled.
    pub fn from_config(config: &TransportConfig) -> Self {
        let mut tiers: Vec<Box<dyn Connector>> = Vec::new();
        if let Some(url) = &config.websocket_url {
            tiers.push(Box::new(WebSocketConnector::new(
                url.clone(),
                Duration::from_millis(config.connect_timeout_ms),
            )));
        }
        tiers.push(Box::new(SerialConnector::new(config.serial.clone())));

        let fallback = config
            .simulation
            .enabled
            .then(|| SimulationConnector::from_config(&config.simulation));
        Self::new(tiers, fallback)
    }

    /// Skips every hardware tier and runs the generator directly.
    pub fn simulation_only(connector: SimulationConnector) -> Self {
        Self::new(Vec::new(), Some(connector))
    }

    /// Opens the first tier that answers.
    ///
    /// With the fallback enabled this never fails; `Exhausted` is only
    /// returned when simulation has been switched off.
    pub async fn connect(&self) -> Result<Link, TransportError> {
        for tier in &self.tiers {
            match tier.connect().await {
                Ok(link) => return Ok(link),
                Err(e) => info!(kind = %tier.kind(), "Transport tier failed, trying next: {}", e),
            }
        }
        match &self.fallback {
            Some(simulation) => Ok(simulation.start()),
            None => Err(TransportError::Exhausted),
        }
    }
}
