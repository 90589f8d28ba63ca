//! Codec selection and size gating.
//!
//! Pure decisions: nothing here performs I/O, so every branch is testable
//! without an upstream or an engine.

use serde::Serialize;

use crate::media::MediaMetadata;

/// Bytes in one megabyte as used by the size gate.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// What the client asked the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscodeMode {
    /// Re-encode whatever is needed for universal playback.
    FullTranscode,
    /// Keep the video stream, only re-encode audio.
    AudioRemuxOnly,
    /// Probe and report metadata; nothing is transcoded.
    InfoOnly,
}

impl TranscodeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscodeMode::FullTranscode => "transcode",
            TranscodeMode::AudioRemuxOnly => "audio-remux",
            TranscodeMode::InfoOnly => "info",
        }
    }
}

impl std::fmt::Display for TranscodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoAction {
    /// Pass the video elementary stream through bit-for-bit.
    Copy,
    /// Re-encode video to H.264.
    ReencodeH264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioAction {
    /// Re-encode audio to AAC.
    ReencodeAac,
}

/// Why a request was refused before any transcoding started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeRejection {
    pub size_mb: u64,
    pub limit_mb: u64,
}

impl std::fmt::Display for SizeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source is {} MB, above the {} MB limit; try a lower-bitrate source",
            self.size_mb, self.limit_mb
        )
    }
}

/// The per-request decision handed to the transcoder.
///
/// Computed once before the engine starts and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TranscodeStrategy {
    pub video: VideoAction,
    pub audio: AudioAction,
    pub rejection: Option<SizeRejection>,
}

impl TranscodeStrategy {
    pub fn rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn rejection_reason(&self) -> Option<String> {
        self.rejection.map(|r| r.to_string())
    }
}

/// Chooses a [`TranscodeStrategy`] from the mode, advertised size and probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodePolicy {
    max_source_mb: Option<u64>,
}

impl TranscodePolicy {
    /// Creates a policy; `None` disables the size gate.
    pub fn new(max_source_mb: Option<u64>) -> Self {
        Self { max_source_mb }
    }

    pub fn max_source_mb(&self) -> Option<u64> {
        self.max_source_mb
    }

    /// Decides the strategy for one request.
    ///
    /// `content_length` is the upstream's advertised size; when it is unknown
    /// the size gate is skipped. `metadata` is the probe result, if a probe ran.
    /// Video is only copied in full-transcode mode when the probe proved the
    /// source to be H.264 in an MP4 container.
    ///
    /// `InfoOnly` never reaches the engine; it gets a non-rejected copy
    /// strategy so callers can treat every mode uniformly.
    pub fn evaluate(
        &self,
        mode: TranscodeMode,
        content_length: Option<u64>,
        metadata: Option<&MediaMetadata>,
    ) -> TranscodeStrategy {
        match mode {
            TranscodeMode::AudioRemuxOnly | TranscodeMode::InfoOnly => TranscodeStrategy {
                video: VideoAction::Copy,
                audio: AudioAction::ReencodeAac,
                rejection: None,
            },
            TranscodeMode::FullTranscode => {
                if let Some(rejection) = self.size_rejection(content_length) {
                    return TranscodeStrategy {
                        video: VideoAction::ReencodeH264,
                        audio: AudioAction::ReencodeAac,
                        rejection: Some(rejection),
                    };
                }

                let video = match metadata {
                    Some(meta) if meta.mobile_compatible => VideoAction::Copy,
                    _ => VideoAction::ReencodeH264,
                };

                TranscodeStrategy {
                    video,
                    audio: AudioAction::ReencodeAac,
                    rejection: None,
                }
            }
        }
    }

    fn size_rejection(&self, content_length: Option<u64>) -> Option<SizeRejection> {
        let limit_mb = self.max_source_mb?;
        let bytes = content_length?;
        let limit_bytes = limit_mb.saturating_mul(BYTES_PER_MB);

        (bytes > limit_bytes).then(|| SizeRejection {
            size_mb: bytes.div_ceil(BYTES_PER_MB),
            limit_mb,
        })
    }
}
