//! Default ports.

/// HTTP API and WebSocket listener
pub const PORT_HTTP: u16 = 8080;
