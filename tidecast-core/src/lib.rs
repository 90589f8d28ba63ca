//! Tidecast Core - fetch, probe, transcode and relay remote video
//!
//! A request names a remote file. The source fetcher opens it as a byte
//! stream, the policy decides what to copy and what to re-encode, an external
//! engine transcodes the stream to fragmented MP4, and the relay forwards the
//! engine's output to the client as it is produced. Nothing touches disk.

pub mod config;
pub mod error;
pub mod media;
pub mod policy;
pub mod relay;
pub mod request;
pub mod service;
pub mod source;
pub mod tracing_setup;
pub mod transcode;

// Re-export main types for convenient access
pub use config::TidecastConfig;
pub use error::RelayError;
pub use media::{FfprobeProber, FormatProber, MediaMetadata, ProbeError};
pub use policy::{TranscodeMode, TranscodePolicy, TranscodeStrategy};
pub use request::TranscodeRequest;
pub use service::RelayService;
pub use source::{HttpSourceFetcher, SourceError, SourceFetcher, SourceStream};
pub use transcode::{
    FfmpegEngine, SimulatedEngine, TranscodeEngine, TranscodeError, TranscodeSession,
};

pub type Result<T> = std::result::Result<T, RelayError>;
