//! Stream transcoding through an external engine.
//!
//! The engine consumes the upstream byte stream and produces fragmented MP4.
//! Each invocation is a [`TranscodeSession`]: a lifecycle event channel plus a
//! bounded output channel, so the state machine is driven by awaiting events
//! rather than by registered callbacks.

pub mod args;
pub mod engine;
pub mod ffmpeg;
pub mod progress;
pub mod session;
pub mod simulation;

pub use args::build_ffmpeg_args;
pub use engine::{TranscodeEngine, TranscodePlan};
pub use ffmpeg::FfmpegEngine;
pub use progress::{Progress, ProgressLine, ProgressTracker};
pub use session::{
    SessionEvent, SessionEvents, SessionHandle, SessionOutput, SessionState, TranscodeSession,
};
pub use simulation::{SimulatedBehavior, SimulatedEngine};

/// Errors raised by a transcoding engine or session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscodeError {
    /// The engine could not be started at all.
    #[error("Transcoding engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// The engine started but did not finish cleanly.
    #[error("Transcode failed: {reason}")]
    Failed { reason: String },
}

/// Result type for transcoding operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;
