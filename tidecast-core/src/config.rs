//! Centralized configuration for Tidecast.
//!
//! Every tunable of the relay lives here and is handed to the service
//! constructor explicitly, so tests can run isolated instances with
//! different thresholds side by side.

use std::path::PathBuf;
use std::time::Duration;

/// Default upstream size threshold for full transcodes, in megabytes.
pub const DEFAULT_MAX_SOURCE_MB: u64 = 30_000;

/// Central configuration for all Tidecast components.
#[derive(Debug, Clone, Default)]
pub struct TidecastConfig {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub probe: ProbeConfig,
    pub transcode: TranscodeConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind to
    pub host: String,
    /// TCP port to bind to
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Returns the `host:port` string used to bind the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream fetch configuration.
///
/// Only the connection and the response headers are bounded here; the body
/// stream is bounded by [`TranscodeConfig::session_deadline`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Identifying user agent sent with every upstream request
    pub user_agent: String,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Time allowed for the upstream to answer with response headers
    pub response_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("tidecast/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(15),
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// Metadata probing configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Path or name of the ffprobe binary
    pub ffprobe_path: PathBuf,
    /// Bytes of the upstream head buffered for the `/transcode` probe and replay
    pub head_bytes: usize,
    /// Maximum time a single probe may take
    pub timeout: Duration,
    /// Probe `/transcode` sources so H.264/MP4 input can be copied
    pub probe_before_transcode: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: PathBuf::from("ffprobe"),
            head_bytes: 5 * 1024 * 1024, // 5 MiB, ffprobe's default probesize
            timeout: Duration::from_secs(20),
            probe_before_transcode: true,
        }
    }
}

/// Transcoding session configuration.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Path or name of the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Size gate for full transcodes in megabytes (None = no gate)
    pub max_source_mb: Option<u64>,
    /// Hard limit on a session's lifetime (None = unbounded)
    pub session_deadline: Option<Duration>,
    /// Size of each chunk read from the engine's output
    pub output_chunk_size: usize,
    /// Output chunks buffered between engine and client
    pub output_buffer_chunks: usize,
    /// Declarative encoder configuration
    pub encoder: EncoderSettings,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_source_mb: Some(DEFAULT_MAX_SOURCE_MB),
            session_deadline: Some(Duration::from_secs(6 * 60 * 60)),
            output_chunk_size: 64 * 1024,
            output_buffer_chunks: 32,
            encoder: EncoderSettings::default(),
        }
    }
}

/// Encoder parameters handed to the transcoding engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// x264 preset, fastest available by default
    pub video_preset: String,
    /// Constant rate factor quality target
    pub crf: u8,
    /// Video bitrate ceiling in kbps
    pub max_video_bitrate_kbps: u32,
    /// Rate control buffer size in kbps
    pub buffer_size_kbps: u32,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
    /// Output pixel format
    pub pixel_format: String,
    /// AAC bitrate in kbps
    pub audio_bitrate_kbps: u32,
    /// Packets the muxer may queue per stream
    pub max_muxing_queue_size: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_preset: "ultrafast".to_string(),
            crf: 23,
            max_video_bitrate_kbps: 5_000,
            buffer_size_kbps: 10_000,
            keyframe_interval: 48, // 2 seconds at 24 fps
            pixel_format: "yuv420p".to_string(),
            audio_bitrate_kbps: 192,
            max_muxing_queue_size: 1024,
        }
    }
}

impl TidecastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("TIDECAST_HOST") {
            config.server.host = host;
        }

        let port = std::env::var("TIDECAST_PORT").or_else(|_| std::env::var("PORT"));
        if let Ok(port) = port {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        if let Ok(limit) = std::env::var("TIDECAST_MAX_SOURCE_MB") {
            if let Ok(limit) = limit.parse::<u64>() {
                config.transcode.max_source_mb = (limit > 0).then_some(limit);
            }
        }

        if let Ok(secs) = std::env::var("TIDECAST_SESSION_DEADLINE_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.transcode.session_deadline = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }

        if let Ok(path) = std::env::var("TIDECAST_FFMPEG") {
            config.transcode.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("TIDECAST_FFPROBE") {
            config.probe.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(agent) = std::env::var("TIDECAST_USER_AGENT") {
            config.fetch.user_agent = agent;
        }

        if let Ok(enabled) = std::env::var("TIDECAST_PROBE_BEFORE_TRANSCODE") {
            if let Ok(enabled) = enabled.parse::<bool>() {
                config.probe.probe_before_transcode = enabled;
            }
        }

        config
    }

    /// Creates a configuration for tests: short timeouts and small buffers.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            fetch: FetchConfig {
                connect_timeout: Duration::from_secs(2),
                response_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            probe: ProbeConfig {
                head_bytes: 256 * 1024,
                timeout: Duration::from_secs(10),
                ..Default::default()
            },
            transcode: TranscodeConfig {
                session_deadline: Some(Duration::from_secs(30)),
                output_chunk_size: 16 * 1024,
                output_buffer_chunks: 4,
                ..Default::default()
            },
        }
    }

    /// Size gate in bytes, if one is configured.
    pub fn max_source_bytes(&self) -> Option<u64> {
        self.transcode
            .max_source_mb
            .map(|mb| mb.saturating_mul(crate::policy::BYTES_PER_MB))
    }
}
