//! HTTP server for Agora

pub mod http;
pub mod routes;

pub use http::{run, serve, AppState};
