//! Tidecast Web - HTTP surface of the relay

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! Exposes `/health`, `/transcode`, `/audio-remux` and `/info` over axum with
//! CORS open to any origin.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, build_router, run_server, serve, shutdown_signal};
