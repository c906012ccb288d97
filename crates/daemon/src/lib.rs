// Re-export modules for library use
pub mod api;
pub mod config;
pub mod server;
pub mod websocket_broker;
