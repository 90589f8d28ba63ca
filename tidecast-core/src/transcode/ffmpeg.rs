//! Transcoding engine backed by the ffmpeg CLI.
//!
//! ffmpeg reads the upstream body on stdin, writes fragmented MP4 on stdout
//! and reports progress on stderr. Four tasks cooperate per session:
//!
//! - the input pump copies upstream chunks into stdin,
//! - the output reader forwards stdout in bounded chunks,
//! - the stderr watcher turns `-progress` blocks into events,
//! - the supervisor waits for exit, cancellation or the deadline and emits
//!   the terminal event.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};

use super::args::build_ffmpeg_args;
use super::engine::{TranscodeEngine, TranscodePlan};
use super::progress::{ProgressLine, ProgressTracker};
use super::session::{self, SessionEvent, SessionHandle, TranscodeSession};
use super::{TranscodeError, TranscodeResult};
use crate::config::TranscodeConfig;
use crate::source::ByteStream;

/// Diagnostic lines kept for the failure reason.
const DIAGNOSTIC_TAIL: usize = 8;

/// Time the pump gets to report after ffmpeg exits on its own.
const PUMP_GRACE: Duration = Duration::from_secs(1);

/// Production engine spawning one ffmpeg process per session.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    output_chunk_size: usize,
    output_buffer_chunks: usize,
    session_deadline: Option<Duration>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    DeadlineExceeded,
    InputFailed(String),
}

impl FfmpegEngine {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            output_chunk_size: config.output_chunk_size.max(1),
            output_buffer_chunks: config.output_buffer_chunks,
            session_deadline: config.session_deadline,
        }
    }

    fn spawn_input_pump(
        mut input: ByteStream,
        mut stdin: ChildStdin,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<u64, String>> {
        tokio::spawn(
            async move {
                let mut fed = 0u64;

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(fed),
                        next = input.next() => next,
                    };

                    match next {
                        Some(Ok(chunk)) => {
                            let written = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return Ok(fed),
                                written = stdin.write_all(&chunk) => written,
                            };
                            if let Err(e) = written {
                                // ffmpeg stopped reading; its exit status tells why
                                debug!("ffmpeg closed stdin after {} bytes: {}", fed, e);
                                return Ok(fed);
                            }
                            fed += chunk.len() as u64;
                        }
                        Some(Err(e)) => {
                            warn!("Upstream failed after {} bytes: {}", fed, e);
                            return Err(e.to_string());
                        }
                        None => break,
                    }
                }

                if let Err(e) = stdin.shutdown().await {
                    debug!("Closing ffmpeg stdin failed: {}", e);
                }
                debug!("Input pump finished, fed {} bytes", fed);
                Ok(fed)
            }
            .in_current_span(),
        )
    }

    fn spawn_output_reader(
        mut stdout: ChildStdout,
        handle: SessionHandle,
        chunk_size: usize,
    ) -> JoinHandle<u64> {
        tokio::spawn(
            async move {
                let mut produced = 0u64;

                loop {
                    let mut buffer = BytesMut::with_capacity(chunk_size);
                    let read = tokio::select! {
                        biased;
                        _ = handle.cancellation().cancelled() => break,
                        read = stdout.read_buf(&mut buffer) => read,
                    };

                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            produced += n as u64;
                            if !handle.send_chunk(buffer.freeze()).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Reading ffmpeg output failed: {}", e);
                            break;
                        }
                    }
                }

                produced
            }
            .in_current_span(),
        )
    }

    fn spawn_stderr_watcher(
        stderr: ChildStderr,
        handle: SessionHandle,
        duration_hint: Option<f64>,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(
            async move {
                let mut reader = BufReader::new(stderr);
                let mut tracker = ProgressTracker::new(duration_hint);
                let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);
                let mut line = Vec::new();

                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("Reading ffmpeg stderr failed: {}", e);
                            break;
                        }
                    }

                    let text = String::from_utf8_lossy(&line);
                    match tracker.feed_line(&text) {
                        ProgressLine::Report(progress) => {
                            trace!(
                                elapsed_secs = progress.elapsed.as_secs_f64(),
                                percent = ?progress.percent,
                                speed = ?progress.speed,
                                "Transcode progress"
                            );
                            handle.progress(progress);
                        }
                        ProgressLine::Field => {}
                        ProgressLine::Diagnostic => {
                            let text = text.trim();
                            if !text.is_empty() {
                                warn!("ffmpeg: {}", text);
                                if tail.len() == DIAGNOSTIC_TAIL {
                                    tail.pop_front();
                                }
                                tail.push_back(text.to_string());
                            }
                        }
                    }
                }

                tail.into_iter().collect()
            }
            .in_current_span(),
        )
    }

    async fn supervise(
        mut child: Child,
        handle: SessionHandle,
        mut pump: JoinHandle<Result<u64, String>>,
        reader: JoinHandle<u64>,
        watcher: JoinHandle<Vec<String>>,
        deadline: Option<Duration>,
    ) {
        let cancel = handle.cancellation().clone();
        let deadline_elapsed = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_elapsed);

        let mut pump_result: Option<Result<u64, String>> = None;
        let outcome = loop {
            tokio::select! {
                status = child.wait() => break Outcome::Exited(status),
                _ = cancel.cancelled() => break Outcome::Cancelled,
                _ = &mut deadline_elapsed => break Outcome::DeadlineExceeded,
                joined = &mut pump, if pump_result.is_none() => {
                    let result = joined.unwrap_or_else(|e| Err(format!("input pump panicked: {e}")));
                    if let Err(reason) = &result {
                        break Outcome::InputFailed(reason.clone());
                    }
                    pump_result = Some(result);
                }
            }
        };

        // A clean exit still fails the session if the upstream broke underneath it
        let outcome = match outcome {
            Outcome::Exited(status) => {
                let input = match pump_result {
                    Some(result) => Some(result),
                    None => tokio::time::timeout(PUMP_GRACE, &mut pump)
                        .await
                        .ok()
                        .map(|joined| joined.unwrap_or(Ok(0))),
                };
                match input {
                    Some(Err(reason)) => Outcome::InputFailed(reason),
                    _ => Outcome::Exited(status),
                }
            }
            other => other,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(e) = child.start_kill() {
                debug!("ffmpeg already gone: {}", e);
            }
            let _ = child.wait().await;
        }
        pump.abort();

        let produced = reader.await.unwrap_or(0);
        let diagnostics = watcher.await.unwrap_or_default();
        let last_diagnostic = diagnostics.last().map(String::as_str);

        let reason = match outcome {
            Outcome::Exited(Ok(status)) if status.success() => {
                info!(bytes = produced, "ffmpeg finished");
                handle.emit(SessionEvent::Completed);
                return;
            }
            Outcome::Cancelled => {
                info!(bytes = produced, "Transcode cancelled");
                handle.emit(SessionEvent::Failed {
                    reason: "cancelled".to_string(),
                });
                return;
            }
            Outcome::Exited(Ok(status)) => match last_diagnostic {
                Some(detail) => format!("ffmpeg exited with {status}: {detail}"),
                None => format!("ffmpeg exited with {status}"),
            },
            Outcome::Exited(Err(e)) => format!("failed to wait for ffmpeg: {e}"),
            Outcome::DeadlineExceeded => format!(
                "session deadline of {}s exceeded",
                deadline.map(|d| d.as_secs()).unwrap_or_default()
            ),
            Outcome::InputFailed(reason) => format!("upstream failed: {reason}"),
        };

        warn!(bytes = produced, "Transcode failed: {}", reason);
        handle.fail_output(&reason).await;
        handle.emit(SessionEvent::Failed { reason });
    }
}

#[async_trait::async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn start(
        &self,
        input: ByteStream,
        plan: TranscodePlan,
    ) -> TranscodeResult<TranscodeSession> {
        let args = build_ffmpeg_args(&plan.strategy, &plan.encoder);
        debug!(session = %plan.session_id, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::EngineUnavailable {
                reason: format!("failed to start {}: {e}", self.ffmpeg_path.display()),
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TranscodeError::EngineUnavailable {
                reason: "ffmpeg pipes not captured".to_string(),
            });
        };

        let (handle, session) = session::open(plan.session_id, self.output_buffer_chunks);
        handle.emit(SessionEvent::Started);
        info!(
            video = ?plan.strategy.video,
            audio = ?plan.strategy.audio,
            pid = ?child.id(),
            "ffmpeg session started"
        );

        let pump = Self::spawn_input_pump(input, stdin, handle.cancellation().clone());
        let reader = Self::spawn_output_reader(stdout, handle.clone(), self.output_chunk_size);
        let watcher = Self::spawn_stderr_watcher(stderr, handle.clone(), plan.duration_hint);

        tokio::spawn(
            Self::supervise(child, handle, pump, reader, watcher, self.session_deadline)
                .in_current_span(),
        );

        Ok(session)
    }
}
