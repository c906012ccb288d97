use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use gse_transport::TransportConfig;
use relay::SupervisorConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "./gse.json";

/// Configuration for the daemon
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the HTTP and WebSocket server listens on
    pub bind_addr: SocketAddr,
    /// Directory holding the dashboard's static files
    pub static_dir: PathBuf,
    /// Transport tiers
    pub transport: TransportConfig,
    /// Heartbeat and reconnect timing
    pub supervisor: SupervisorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            static_dir: PathBuf::from("./public"),
            transport: TransportConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Load daemon configuration from `path`, falling back to defaults when the
/// file does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    if !path.exists() {
        info!("No configuration at {}, using defaults", path.display());
        return Ok(DaemonConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read configuration file at '{}'", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("could not parse configuration file at '{}'", path.display()))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
