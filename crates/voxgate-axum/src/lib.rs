//! Axum adapter for the voxgate gateway.
//!
//! Exposes the PBX WebSocket ingress (`GET /pbx`) and a minimal ops
//! surface (`GET /health`, `GET /stats`). All pipeline logic lives in
//! `voxgate-voice`; this crate only upgrades connections and wires the
//! per-connection session loop.

pub mod bootstrap;
pub mod handlers;
pub mod routes;
pub mod state;

pub use bootstrap::GatewayContext;
pub use routes::{build_router, serve};
pub use state::AppState;
