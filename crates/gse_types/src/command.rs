//! Commands issued by viewers and their wire text encoding

use chrono::Utc;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Requested valve position.
///
/// Decoding ignores case and accepts `closed` for [`ValveState::Close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveState {
    Open,
    Close,
}

impl<'de> Deserialize<'de> for ValveState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = String::deserialize(deserializer)?;
        match state.to_ascii_lowercase().as_str() {
            "open" => Ok(ValveState::Open),
            "close" | "closed" => Ok(ValveState::Close),
            _ => Err(de::Error::unknown_variant(&state, &["open", "close", "closed"])),
        }
    }
}

impl ValveState {
    pub fn wire(self) -> &'static str {
        match self {
            ValveState::Open => "OPEN",
            ValveState::Close => "CLOSE",
        }
    }
}

/// A command travelling from a viewer towards the hardware.
///
/// On the viewer side this is the JSON object `{type, ...}`; towards the
/// microcontroller it is rendered with [`Command::to_wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CommandRepr", into = "CommandRepr")]
pub enum Command {
    Valve { valve: String, state: ValveState },
    Servo { servo: String, value: f64 },
    EmergencyStop,
    Status { status: String },
    Heartbeat { timestamp: i64 },
    /// Any tag outside the fixed set, sent as `<TAG>:<value>`.
    Other { tag: String, value: String },
}

impl Command {
    pub fn open_valve(name: impl Into<String>) -> Self {
        Command::Valve {
            valve: name.into(),
            state: ValveState::Open,
        }
    }

    pub fn close_valve(name: impl Into<String>) -> Self {
        Command::Valve {
            valve: name.into(),
            state: ValveState::Close,
        }
    }

    pub fn set_servo_position(name: impl Into<String>, position: f64) -> Self {
        Command::Servo {
            servo: name.into(),
            value: position,
        }
    }

    pub fn emergency_stop() -> Self {
        Command::EmergencyStop
    }

    pub fn mission_status(status: impl Into<String>) -> Self {
        Command::Status {
            status: status.into(),
        }
    }

    /// Heartbeat stamped with the current time in milliseconds since the epoch.
    pub fn heartbeat() -> Self {
        Command::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The viewer-facing tag of this command.
    pub fn tag(&self) -> &str {
        match self {
            Command::Valve { .. } => "valve",
            Command::Servo { .. } => "servo",
            Command::EmergencyStop => "emergency",
            Command::Status { .. } => "status",
            Command::Heartbeat { .. } => "heartbeat",
            Command::Other { tag, .. } => tag,
        }
    }

    /// Renders the newline-terminated wire text for the microcontroller.
    pub fn to_wire(&self) -> String {
        match self {
            Command::Valve { valve, state } => format!("VALVE:{}:{}\n", valve, state.wire()),
            Command::Servo { servo, value } => format!("SERVO:{}:{}\n", servo, value),
            Command::EmergencyStop => "EMERGENCY:STOP\n".to_string(),
            Command::Status { status } => format!("STATUS:{}\n", status),
            Command::Heartbeat { timestamp } => format!("HEARTBEAT:{}\n", timestamp),
            Command::Other { tag, value } => format!("{}:{}\n", tag.to_uppercase(), value),
        }
    }

    /// Decodes a viewer command from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(text)?)
    }
}

const KNOWN_TAGS: [&str; 5] = ["valve", "servo", "emergency", "status", "heartbeat"];

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KnownCommand {
    Valve { valve: String, state: ValveState },
    Servo {
        servo: String,
        #[serde(deserialize_with = "number_or_numeric_string")]
        value: f64,
    },
    Emergency {},
    Status { status: String },
    Heartbeat {
        #[serde(default)]
        timestamp: i64,
    },
}

/// Form inputs hand over numbers as text, so `"45"` is taken as `45`.
fn number_or_numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(f64),
        Text(String),
    }

    let value = match Loose::deserialize(deserializer)? {
        Loose::Number(v) => v,
        Loose::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid number '{}'", text)))?,
    };
    if !value.is_finite() {
        return Err(de::Error::custom("number must be finite"));
    }
    Ok(value)
}

#[derive(Serialize, Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CommandRepr {
    Known(KnownCommand),
    Raw(RawCommand),
}

impl TryFrom<CommandRepr> for Command {
    type Error = ParseError;

    fn try_from(repr: CommandRepr) -> Result<Self, Self::Error> {
        let known = match repr {
            CommandRepr::Known(known) => known,
            CommandRepr::Raw(raw) => {
                // A known tag only lands here when its fields are missing or mistyped.
                if KNOWN_TAGS.contains(&raw.tag.as_str()) {
                    return Err(ParseError::MalformedCommand {
                        tag: raw.tag,
                        message: "missing or invalid fields".to_string(),
                    });
                }
                let value = match raw.value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                return Ok(Command::Other {
                    tag: raw.tag,
                    value,
                });
            }
        };
        Ok(match known {
            KnownCommand::Valve { valve, state } => Command::Valve { valve, state },
            KnownCommand::Servo { servo, value } => Command::Servo { servo, value },
            KnownCommand::Emergency {} => Command::EmergencyStop,
            KnownCommand::Status { status } => Command::Status { status },
            KnownCommand::Heartbeat { timestamp } => Command::Heartbeat { timestamp },
        })
    }
}

impl From<Command> for CommandRepr {
    fn from(command: Command) -> Self {
        match command {
            Command::Valve { valve, state } => CommandRepr::Known(KnownCommand::Valve { valve, state }),
            Command::Servo { servo, value } => CommandRepr::Known(KnownCommand::Servo { servo, value }),
            Command::EmergencyStop => CommandRepr::Known(KnownCommand::Emergency {}),
            Command::Status { status } => CommandRepr::Known(KnownCommand::Status { status }),
            Command::Heartbeat { timestamp } => {
                CommandRepr::Known(KnownCommand::Heartbeat { timestamp })
            }
            Command::Other { tag, value } => CommandRepr::Raw(RawCommand {
                tag,
                value: Value::String(value),
            }),
        }
    }
}
