//! Shared types for the ground support equipment relay
//!
//! This crate contains the telemetry, command and envelope types that flow
//! between the hardware transport, the relay core and connected viewers.

pub mod command;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use command::*;
pub use connection::*;
pub use envelope::*;
pub use error::*;
pub use telemetry::*;
