//! The narrow boundary between the relay and a transcoding engine.

use async_trait::async_trait;
use uuid::Uuid;

use super::{TranscodeResult, TranscodeSession};
use crate::config::EncoderSettings;
use crate::policy::TranscodeStrategy;
use crate::source::ByteStream;

/// Everything an engine needs to run one session.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    pub session_id: Uuid,
    pub strategy: TranscodeStrategy,
    pub encoder: EncoderSettings,
    /// Source duration in seconds, used only for progress percentages.
    pub duration_hint: Option<f64>,
}

/// Runs transcoding sessions against arbitrary byte streams.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &'static str;

    /// Whether the engine can currently start sessions.
    async fn is_available(&self) -> bool;

    /// Starts a session that consumes `input` and produces fragmented MP4.
    ///
    /// Ownership of `input` passes to the engine, which drops it when the
    /// session ends or is cancelled.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::EngineUnavailable` - The engine could not be started
    async fn start(&self, input: ByteStream, plan: TranscodePlan)
    -> TranscodeResult<TranscodeSession>;
}
