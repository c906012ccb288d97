//! Messages sent from the hub to viewers

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::telemetry::{TelemetryEvent, TelemetrySnapshot};

/// Everything a viewer can receive over its WebSocket.
///
/// Telemetry updates are flat `{type, value, timestamp}` objects; the two
/// control messages are `{type: "init", data}` and
/// `{type: "heartbeat_response", timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HubRepr", into = "HubRepr")]
pub enum HubMessage {
    Init(TelemetrySnapshot),
    HeartbeatResponse { timestamp: i64 },
    Telemetry(TelemetryEvent),
}

impl HubMessage {
    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlRepr {
    Init { data: TelemetrySnapshot },
    HeartbeatResponse { timestamp: i64 },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HubRepr {
    Control(ControlRepr),
    Telemetry(TelemetryEvent),
}

impl From<HubRepr> for HubMessage {
    fn from(repr: HubRepr) -> Self {
        match repr {
            HubRepr::Control(ControlRepr::Init { data }) => HubMessage::Init(data),
            HubRepr::Control(ControlRepr::HeartbeatResponse { timestamp }) => {
                HubMessage::HeartbeatResponse { timestamp }
            }
            HubRepr::Telemetry(event) => HubMessage::Telemetry(event),
        }
    }
}

impl From<HubMessage> for HubRepr {
    fn from(message: HubMessage) -> Self {
        match message {
            HubMessage::Init(data) => HubRepr::Control(ControlRepr::Init { data }),
            HubMessage::HeartbeatResponse { timestamp } => {
                HubRepr::Control(ControlRepr::HeartbeatResponse { timestamp })
            }
            HubMessage::Telemetry(event) => HubRepr::Telemetry(event),
        }
    }
}
