//! Hardware transports for the ground support relay
//!
//! A transport yields a [`Link`]: a stream of inbound chunks from the
//! microcontroller (or an upstream hub) and a sink for outbound commands.
//! The [`TransportSelector`] walks the configured tiers in order and falls
//! back to the synthetic generator when nothing real answers.

pub mod config;
pub mod selector;
pub mod serial;
pub mod simulation;
pub mod types;
pub mod websocket;

// Re-export the main types that users need
pub use config::TransportConfig;
pub use selector::TransportSelector;
pub use serial::{SerialConfig, SerialConnector};
pub use simulation::{SimulationConfig, SimulationConnector};
pub use types::{Connector, Inbound, Link, LinkEnds, TransportError};
pub use websocket::WebSocketConnector;
