//! WebSocket transport: control protocol, binary wire format, connection handler

pub mod handler;
pub mod protocol;
pub mod wire;
