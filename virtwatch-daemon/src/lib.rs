//! virtwatch daemon
//!
//! Serves hypervisor VM snapshots over HTTP (`/api/vms`) and WebSocket (`/ws`).

pub mod api;
