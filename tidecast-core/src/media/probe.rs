//! Format probing over the head of an upstream stream, or the live stream itself.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{Instrument, debug, warn};

use super::metadata::{FfprobeOutput, MediaMetadata};
use crate::config::ProbeConfig;
use crate::source::ByteStream;

/// Errors raised while extracting metadata.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The container could not be parsed.
    #[error("Probe failed: {reason}")]
    Failed {
        /// Why the probe failed (truncated, unsupported, corrupt, timed out).
        reason: String,
    },
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Extracts [`MediaMetadata`] from media bytes.
#[async_trait::async_trait]
pub trait FormatProber: Send + Sync {
    /// Probes `head`, which holds the leading bytes of the source.
    ///
    /// # Errors
    ///
    /// - `ProbeError::Failed` - Container could not be parsed from the head
    async fn probe(&self, head: Bytes) -> ProbeResult<MediaMetadata>;

    /// Probes a live source, reading only as far as the container needs.
    ///
    /// Files whose index trails the media data are read up to the index.
    /// The stream is dropped once metadata is known.
    ///
    /// # Errors
    ///
    /// - `ProbeError::Failed` - Container could not be parsed from the stream
    async fn probe_stream(&self, input: ByteStream) -> ProbeResult<MediaMetadata>;
}

/// Prober backed by the `ffprobe` CLI reading from its stdin.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Creates a prober from probe configuration.
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
            timeout: config.timeout,
        }
    }

    /// Whether the ffprobe binary can be started.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// `probe_size` caps how much ffprobe analyses; `None` keeps its default
    /// so containers can be read through to a trailing index.
    fn build_args(probe_size: Option<usize>) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];
        if let Some(size) = probe_size {
            args.push("-probesize".to_string());
            args.push(size.max(32).to_string());
        }
        args.extend(
            [
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-i",
                "pipe:0",
            ]
            .map(String::from),
        );
        args
    }

    async fn run(
        &self,
        input: ByteStream,
        probe_size: Option<usize>,
    ) -> ProbeResult<FfprobeOutput> {
        let mut child = Command::new(&self.ffprobe_path)
            .args(Self::build_args(probe_size))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Failed {
                reason: format!("failed to start ffprobe: {e}"),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ProbeError::Failed {
            reason: "ffprobe stdin not captured".to_string(),
        })?;
        let feeder = tokio::spawn(feed(input, stdin).in_current_span());

        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        // Drops the source stream, closing the upstream connection
        feeder.abort();

        let output = waited
            .map_err(|_| ProbeError::Failed {
                reason: format!("ffprobe timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| ProbeError::Failed {
                reason: format!("failed to wait for ffprobe: {e}"),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("unrecognised or truncated container")
                .trim()
                .to_string();
            warn!(status = %output.status, "ffprobe rejected input: {}", reason);
            return Err(ProbeError::Failed { reason });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ProbeError::Failed {
            reason: format!("unreadable ffprobe output: {e}"),
        })
    }
}

/// Copies `input` into ffprobe until either side ends.
async fn feed(mut input: ByteStream, mut stdin: ChildStdin) {
    let mut fed = 0usize;
    while let Some(chunk) = input.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(fed, "Source failed during probe: {}", e);
                return;
            }
        };
        // ffprobe stops reading once it has seen enough, so a broken pipe here is normal
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!(fed, "ffprobe closed stdin early: {}", e);
            return;
        }
        fed += chunk.len();
    }
    debug!(fed, "Source exhausted during probe");
}

fn into_metadata(output: FfprobeOutput) -> ProbeResult<MediaMetadata> {
    if output.streams.is_empty() {
        return Err(ProbeError::Failed {
            reason: "no media streams found".to_string(),
        });
    }

    let metadata = MediaMetadata::from_ffprobe(&output);
    debug!(
        container = %metadata.container_format,
        video = ?metadata.video_codec,
        audio = ?metadata.audio_codec,
        "Probe complete"
    );
    Ok(metadata)
}

#[async_trait::async_trait]
impl FormatProber for FfprobeProber {
    async fn probe(&self, head: Bytes) -> ProbeResult<MediaMetadata> {
        if head.is_empty() {
            return Err(ProbeError::Failed {
                reason: "source is empty".to_string(),
            });
        }

        let probe_size = head.len();
        let input: ByteStream = stream::iter([Ok(head)]).boxed();
        into_metadata(self.run(input, Some(probe_size)).await?)
    }

    async fn probe_stream(&self, input: ByteStream) -> ProbeResult<MediaMetadata> {
        into_metadata(self.run(input, None).await?)
    }
}
