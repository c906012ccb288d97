//! Serial transport to the microcontroller
//!
//! The port is driven from a blocking task: short read timeouts keep the
//! loop responsive to queued writes and to cancellation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use gse_types::TransportKind;
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortType};
use tracing::{debug, error, info, warn};

use crate::types::{Connector, Inbound, Link, LinkEnds, TransportError};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit device path. Auto-detected when unset.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Substrings looked for in the USB manufacturer string
    pub vendor_hints: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            vendor_hints: vec!["Arduino".to_string(), "USB".to_string()],
        }
    }
}

/// An enumerated serial device, reduced to what detection looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct PortCandidate {
    pub port_name: String,
    pub manufacturer: Option<String>,
    pub product_id: Option<u16>,
}

/// Lists the serial devices currently present.
pub fn list_candidates() -> Result<Vec<PortCandidate>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => PortCandidate {
                port_name: p.port_name,
                manufacturer: info.manufacturer,
                product_id: Some(info.pid),
            },
            _ => PortCandidate {
                port_name: p.port_name,
                manufacturer: None,
                product_id: None,
            },
        })
        .collect())
}

/// Picks the first device whose manufacturer mentions one of `hints`, or
/// that reports a USB product id alongside a manufacturer string.
pub fn select_port<'a>(candidates: &'a [PortCandidate], hints: &[String]) -> Option<&'a PortCandidate> {
    candidates.iter().find(|c| match &c.manufacturer {
        Some(manufacturer) => {
            hints.iter().any(|h| manufacturer.contains(h.as_str())) || c.product_id.is_some()
        }
        None => false,
    })
}

pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    fn resolve_port(config: &SerialConfig) -> Result<String, TransportError> {
        if let Some(port) = &config.port {
            return Ok(port.clone());
        }
        let candidates = list_candidates()?;
        debug!("Available serial ports: {:?}", candidates);
        select_port(&candidates, &config.vendor_hints)
            .map(|c| c.port_name.clone())
            .ok_or_else(|| {
                TransportError::Unavailable(
                    TransportKind::Serial,
                    "no matching serial device found".to_string(),
                )
            })
    }

    fn open(config: &SerialConfig) -> Result<(String, Box<dyn SerialPort>), TransportError> {
        let path = Self::resolve_port(config)?;
        let port = serialport::new(&path, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::ConnectFailed {
                target: path.clone(),
                message: e.to_string(),
            })?;
        Ok((path, port))
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        let config = self.config.clone();
        let (path, port) = tokio::task::spawn_blocking(move || Self::open(&config))
            .await
            .map_err(|e| TransportError::Io(format!("serial open task failed: {}", e)))??;

        info!(port = %path, baud = self.config.baud_rate, "Serial connection established");

        let (link, ends) = Link::pair(TransportKind::Serial);
        tokio::task::spawn_blocking(move || run_serial_loop(path, port, ends));
        Ok(link)
    }
}

fn run_serial_loop(path: String, mut port: Box<dyn SerialPort>, ends: LinkEnds) {
    let LinkEnds {
        inbound_tx,
        outbound_rx,
        cancel,
    } = ends;
    let mut buf = [0u8; 256];

    let reason = loop {
        if cancel.is_cancelled() {
            break None;
        }

        while let Ok(command) = outbound_rx.try_recv() {
            let wire = command.to_wire();
            match port.write_all(wire.as_bytes()).and_then(|_| port.flush()) {
                Ok(()) => debug!(port = %path, command = wire.trim_end(), "Sent to microcontroller"),
                Err(e) => error!(port = %path, "Error sending serial command: {}", e),
            }
        }

        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if inbound_tx.send(Inbound::Chunk(chunk)).is_err() {
                    break None;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(port = %path, "Serial read error: {}", e);
                break Some(e.to_string());
            }
        }
    };

    info!(port = %path, "Serial reader stopped");
    let _ = inbound_tx.send(Inbound::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, manufacturer: Option<&str>, pid: Option<u16>) -> PortCandidate {
        PortCandidate {
            port_name: name.to_string(),
            manufacturer: manufacturer.map(str::to_string),
            product_id: pid,
        }
    }

    #[test]
    fn test_default_serial_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert!(config.port.is_none());
        assert_eq!(config.vendor_hints, vec!["Arduino", "USB"]);
    }

    #[test]
    fn test_select_port_prefers_first_match() {
        let hints = SerialConfig::default().vendor_hints;
        let candidates = vec![
            candidate("/dev/ttyS0", None, None),
            candidate("/dev/ttyACM0", Some("Arduino (www.arduino.cc)"), None),
            candidate("/dev/ttyUSB0", Some("FTDI USB"), Some(0x6001)),
        ];
        let chosen = select_port(&candidates, &hints).unwrap();
        assert_eq!(chosen.port_name, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_port_accepts_product_id_with_manufacturer() {
        let hints = SerialConfig::default().vendor_hints;
        let candidates = vec![candidate("/dev/ttyUSB1", Some("Silicon Labs"), Some(0xea60))];
        assert_eq!(
            select_port(&candidates, &hints).map(|c| c.port_name.as_str()),
            Some("/dev/ttyUSB1")
        );
    }

    #[test]
    fn test_select_port_ignores_ports_without_manufacturer() {
        let hints = SerialConfig::default().vendor_hints;
        let candidates = vec![
            candidate("/dev/ttyS0", None, None),
            candidate("/dev/ttyUSB2", None, Some(0x1234)),
        ];
        assert!(select_port(&candidates, &hints).is_none());
    }

    #[tokio::test]
    async fn test_connect_to_missing_device_fails() {
        let connector = SerialConnector::new(SerialConfig {
            port: Some("/dev/does-not-exist-gse".to_string()),
            ..SerialConfig::default()
        });
        let result = connector.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
