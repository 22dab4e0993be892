//! HTTP API.

mod health;
mod server;
mod stream;
mod vms;

pub use server::{router, serve, AppState};
