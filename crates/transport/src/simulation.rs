//! Synthetic telemetry used when no hardware answers

use std::time::Duration;

use async_trait::async_trait;
use gse_types::{TelemetryChannel, TransportKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Connector, Inbound, Link, LinkEnds, TransportError};

/// Value range `[min, max]` produced for each simulated channel.
pub const SENSOR_RANGES: [(TelemetryChannel, f64, f64); 5] = [
    (TelemetryChannel::Pressure, 50.0, 100.0),
    (TelemetryChannel::Temperature, 20.0, 50.0),
    (TelemetryChannel::FlowRate, 5.0, 20.0),
    (TelemetryChannel::Voltage, 12.0, 15.0),
    (TelemetryChannel::LoadCell, 100.0, 1000.0),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fall back to the generator when every real tier fails
    pub enabled: bool,
    /// Cadence of generated frames in milliseconds
    pub interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

/// Draws one value per simulated channel.
pub fn generate_frame<R: Rng>(rng: &mut R) -> Vec<(TelemetryChannel, f64)> {
    SENSOR_RANGES
        .iter()
        .map(|&(channel, min, max)| (channel, min + rng.gen::<f64>() * (max - min)))
        .collect()
}

/// Renders a frame as the wire lines the microcontroller would send.
pub fn render_frame(frame: &[(TelemetryChannel, f64)]) -> String {
    frame
        .iter()
        .map(|(channel, value)| format!("{}:{:.2}\n", channel.wire_tag().to_uppercase(), value))
        .collect()
}

/// Generator tier. Starting it cannot fail.
#[derive(Debug, Clone)]
pub struct SimulationConnector {
    interval: Duration,
}

impl SimulationConnector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(Duration::from_millis(config.interval_ms.max(1)))
    }

    pub fn start(&self) -> Link {
        info!(interval = ?self.interval, "Starting simulation mode - no hardware connected");
        let (link, ends) = Link::pair(TransportKind::Simulation);
        tokio::spawn(run_generator(self.interval, ends));
        link
    }
}

impl Default for SimulationConnector {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

async fn run_generator(interval: Duration, ends: LinkEnds) {
    let LinkEnds {
        inbound_tx,
        outbound_rx,
        cancel,
    } = ends;
    let mut ticker = tokio::time::interval(interval);
    let mut rng = StdRng::from_entropy();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let chunk = render_frame(&generate_frame(&mut rng));
                if inbound_tx.send(Inbound::Chunk(chunk)).is_err() {
                    break;
                }
            }
            command = outbound_rx.recv_async() => match command {
                Ok(command) => debug!(command = command.to_wire().trim_end(), "Simulation swallowed command"),
                Err(_) => break,
            },
        }
    }
    debug!("Simulation generator stopped");
}

#[async_trait]
impl Connector for SimulationConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulation
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        Ok(self.start())
    }
}
