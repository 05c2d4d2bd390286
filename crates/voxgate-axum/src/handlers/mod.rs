//! HTTP and WebSocket handlers.

pub mod ops;
pub mod pbx_ws;
