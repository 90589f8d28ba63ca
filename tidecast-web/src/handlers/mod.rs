//! HTTP request handlers organized by functionality

pub mod health;
pub mod media;

// Re-export handler functions
pub use health::{HealthResponse, health};
pub use media::{SourceQuery, audio_remux, info, stream_head, transcode};
