//! Telemetry channels, values and the per-process snapshot

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The fixed set of channels reported by the ground support hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TelemetryChannel {
    Pressure,
    Temperature,
    FlowRate,
    Voltage,
    LoadCell,
    ValveStatus,
    ServoStatus,
}

impl TelemetryChannel {
    pub const ALL: [TelemetryChannel; 7] = [
        TelemetryChannel::Pressure,
        TelemetryChannel::Temperature,
        TelemetryChannel::FlowRate,
        TelemetryChannel::Voltage,
        TelemetryChannel::LoadCell,
        TelemetryChannel::ValveStatus,
        TelemetryChannel::ServoStatus,
    ];

    /// Channels carrying a single number.
    pub const SCALARS: [TelemetryChannel; 5] = [
        TelemetryChannel::Pressure,
        TelemetryChannel::Temperature,
        TelemetryChannel::FlowRate,
        TelemetryChannel::Voltage,
        TelemetryChannel::LoadCell,
    ];

    /// Looks up a channel by its wire tag, ignoring case.
    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.wire_tag() == tag)
    }

    /// Tag used on the serial wire and in viewer envelopes.
    pub fn wire_tag(self) -> &'static str {
        match self {
            TelemetryChannel::Pressure => "pressure",
            TelemetryChannel::Temperature => "temperature",
            TelemetryChannel::FlowRate => "flow",
            TelemetryChannel::Voltage => "voltage",
            TelemetryChannel::LoadCell => "loadcell",
            TelemetryChannel::ValveStatus => "valve",
            TelemetryChannel::ServoStatus => "servo",
        }
    }

    /// Name of the channel as it appears in the snapshot.
    pub fn name(self) -> &'static str {
        match self {
            TelemetryChannel::Pressure => "pressure",
            TelemetryChannel::Temperature => "temperature",
            TelemetryChannel::FlowRate => "flowRate",
            TelemetryChannel::Voltage => "voltage",
            TelemetryChannel::LoadCell => "loadCell",
            TelemetryChannel::ValveStatus => "valveStatus",
            TelemetryChannel::ServoStatus => "servoStatus",
        }
    }

    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            TelemetryChannel::ValveStatus | TelemetryChannel::ServoStatus
        )
    }
}

impl std::fmt::Display for TelemetryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value carried by a telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Scalar(f64),
    Valve { name: String, open: bool },
    Servo { name: String, position: f64 },
}

impl TelemetryValue {
    fn fits(&self, channel: TelemetryChannel) -> bool {
        match self {
            TelemetryValue::Scalar(_) => channel.is_scalar(),
            TelemetryValue::Valve { .. } => channel == TelemetryChannel::ValveStatus,
            TelemetryValue::Servo { .. } => channel == TelemetryChannel::ServoStatus,
        }
    }
}

/// A single parsed update for one channel.
///
/// Serialized as the viewer envelope `{type, value, timestamp}` where `type`
/// is the channel's wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventRepr", into = "EventRepr")]
pub struct TelemetryEvent {
    pub channel: TelemetryChannel,
    pub value: TelemetryValue,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Builds a scalar event. Returns `None` for the valve and servo channels.
    pub fn scalar(channel: TelemetryChannel, value: f64) -> Option<Self> {
        channel.is_scalar().then(|| Self {
            channel,
            value: TelemetryValue::Scalar(value),
            timestamp: Utc::now(),
        })
    }

    pub fn valve(name: impl Into<String>, open: bool) -> Self {
        Self {
            channel: TelemetryChannel::ValveStatus,
            value: TelemetryValue::Valve {
                name: name.into(),
                open,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn servo(name: impl Into<String>, position: f64) -> Self {
        Self {
            channel: TelemetryChannel::ServoStatus,
            value: TelemetryValue::Servo {
                name: name.into(),
                position,
            },
            timestamp: Utc::now(),
        }
    }

    /// Numeric value for scalar channels.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.value {
            TelemetryValue::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EventRepr {
    #[serde(rename = "type")]
    tag: String,
    value: TelemetryValue,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl TryFrom<EventRepr> for TelemetryEvent {
    type Error = ParseError;

    fn try_from(repr: EventRepr) -> Result<Self, Self::Error> {
        let channel = TelemetryChannel::from_wire_tag(&repr.tag)
            .ok_or_else(|| ParseError::UnknownType(repr.tag.clone()))?;
        if !repr.value.fits(channel) {
            return Err(ParseError::ValueMismatch(channel.name().to_string()));
        }
        Ok(Self {
            channel,
            value: repr.value,
            timestamp: repr.timestamp,
        })
    }
}

impl From<TelemetryEvent> for EventRepr {
    fn from(event: TelemetryEvent) -> Self {
        Self {
            tag: event.channel.wire_tag().to_string(),
            value: event.value,
            timestamp: event.timestamp,
        }
    }
}

/// Latest known value of every channel. Only the most recent update is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySnapshot {
    pub pressure: f64,
    pub temperature: f64,
    pub flow_rate: f64,
    pub voltage: f64,
    pub load_cell: f64,
    pub valve_states: BTreeMap<String, bool>,
    pub servo_positions: BTreeMap<String, f64>,
}

impl TelemetrySnapshot {
    /// Overwrites the channel touched by `event` (last write wins).
    pub fn apply(&mut self, event: &TelemetryEvent) {
        match &event.value {
            TelemetryValue::Scalar(v) => {
                if let Some(slot) = self.scalar_mut(event.channel) {
                    *slot = *v;
                }
            }
            TelemetryValue::Valve { name, open } => {
                self.valve_states.insert(name.clone(), *open);
            }
            TelemetryValue::Servo { name, position } => {
                self.servo_positions.insert(name.clone(), *position);
            }
        }
    }

    pub fn scalar(&self, channel: TelemetryChannel) -> Option<f64> {
        match channel {
            TelemetryChannel::Pressure => Some(self.pressure),
            TelemetryChannel::Temperature => Some(self.temperature),
            TelemetryChannel::FlowRate => Some(self.flow_rate),
            TelemetryChannel::Voltage => Some(self.voltage),
            TelemetryChannel::LoadCell => Some(self.load_cell),
            TelemetryChannel::ValveStatus | TelemetryChannel::ServoStatus => None,
        }
    }

    fn scalar_mut(&mut self, channel: TelemetryChannel) -> Option<&mut f64> {
        match channel {
            TelemetryChannel::Pressure => Some(&mut self.pressure),
            TelemetryChannel::Temperature => Some(&mut self.temperature),
            TelemetryChannel::FlowRate => Some(&mut self.flow_rate),
            TelemetryChannel::Voltage => Some(&mut self.voltage),
            TelemetryChannel::LoadCell => Some(&mut self.load_cell),
            TelemetryChannel::ValveStatus | TelemetryChannel::ServoStatus => None,
        }
    }

    /// Expands the snapshot into one event per scalar channel and per named
    /// valve or servo, all stamped with `timestamp`.
    pub fn to_events(&self, timestamp: DateTime<Utc>) -> Vec<TelemetryEvent> {
        let scalars = TelemetryChannel::SCALARS.into_iter().filter_map(|channel| {
            self.scalar(channel).map(|v| TelemetryEvent {
                channel,
                value: TelemetryValue::Scalar(v),
                timestamp,
            })
        });
        let valves = self.valve_states.iter().map(|(name, open)| TelemetryEvent {
            timestamp,
            ..TelemetryEvent::valve(name.clone(), *open)
        });
        let servos = self
            .servo_positions
            .iter()
            .map(|(name, position)| TelemetryEvent {
                timestamp,
                ..TelemetryEvent::servo(name.clone(), *position)
            });
        scalars.chain(valves).chain(servos).collect()
    }
}
