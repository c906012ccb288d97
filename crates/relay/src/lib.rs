//! Relay core: turns transport chunks into telemetry events and carries
//! viewer commands back to the hardware.

pub mod dispatcher;
pub mod parser;
pub mod supervisor;

pub use dispatcher::CommandDispatcher;
pub use parser::{parse, parse_line, LineAssembler};
pub use supervisor::{RelayHandle, RelaySupervisor, SupervisorConfig};
