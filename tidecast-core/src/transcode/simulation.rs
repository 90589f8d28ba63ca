//! Deterministic in-process engine for development and tests.
//!
//! Forwards its input unchanged instead of transcoding, with optional
//! injected failures. Counters make it observable whether a session was
//! started at all and whether it has been released.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{Instrument, debug, info};

use super::engine::{TranscodeEngine, TranscodePlan};
use super::progress::Progress;
use super::session::{self, SessionEvent, SessionHandle, TranscodeSession};
use super::{TranscodeError, TranscodeResult};
use crate::source::ByteStream;

/// How a simulated session behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedBehavior {
    /// Forward every input byte, then complete.
    Passthrough,
    /// Fail before acknowledging the configuration or producing output.
    FailBeforeOutput { reason: String },
    /// Forward input until at least `bytes` were produced, then fail.
    FailAfter { bytes: usize, reason: String },
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicUsize,
    active: AtomicUsize,
    availability_checks: AtomicUsize,
}

struct ActiveSession(Arc<Counters>);

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Engine that passes input through with scripted failures.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    behavior: SimulatedBehavior,
    available: bool,
    output_buffer_chunks: usize,
    counters: Arc<Counters>,
    plans: Arc<Mutex<Vec<TranscodePlan>>>,
}

impl SimulatedEngine {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior,
            available: true,
            output_buffer_chunks: 4,
            counters: Arc::default(),
            plans: Arc::default(),
        }
    }

    pub fn passthrough() -> Self {
        Self::new(SimulatedBehavior::Passthrough)
    }

    /// An engine that refuses to start sessions.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::passthrough()
        }
    }

    pub fn with_output_buffer(mut self, chunks: usize) -> Self {
        self.output_buffer_chunks = chunks;
        self
    }

    /// Sessions started since creation.
    pub fn started_sessions(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Sessions whose task has not finished yet.
    pub fn active_sessions(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Calls to [`TranscodeEngine::is_available`] so far.
    pub fn availability_checks(&self) -> usize {
        self.counters.availability_checks.load(Ordering::SeqCst)
    }

    /// Plans of every started session, oldest first.
    pub fn recorded_plans(&self) -> Vec<TranscodePlan> {
        self.plans.lock().clone()
    }

    async fn run(behavior: SimulatedBehavior, mut input: ByteStream, handle: SessionHandle) {
        let fail_after = match behavior {
            SimulatedBehavior::FailBeforeOutput { reason } => {
                handle.emit(SessionEvent::Failed { reason });
                return;
            }
            SimulatedBehavior::FailAfter { bytes, reason } => Some((bytes, reason)),
            SimulatedBehavior::Passthrough => None,
        };

        handle.emit(SessionEvent::Started);
        let mut forwarded = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancellation().cancelled() => None,
                next = input.next() => Some(next),
            };

            let chunk = match next {
                None => {
                    debug!(bytes = forwarded, "Simulated session cancelled");
                    handle.emit(SessionEvent::Failed {
                        reason: "cancelled".to_string(),
                    });
                    return;
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(e))) => {
                    let reason = format!("upstream failed: {e}");
                    handle.fail_output(&reason).await;
                    handle.emit(SessionEvent::Failed { reason });
                    return;
                }
            };

            forwarded += chunk.len();
            if !handle.send_chunk(chunk).await {
                handle.emit(SessionEvent::Failed {
                    reason: "cancelled".to_string(),
                });
                return;
            }
            handle.progress(Progress {
                bytes_written: Some(forwarded as u64),
                ..Progress::default()
            });

            if let Some((limit, reason)) = &fail_after {
                if forwarded >= *limit {
                    handle.fail_output(reason).await;
                    handle.emit(SessionEvent::Failed {
                        reason: reason.clone(),
                    });
                    return;
                }
            }
        }

        info!(bytes = forwarded, "Simulated session finished");
        handle.emit(SessionEvent::Completed);
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::passthrough()
    }
}

#[async_trait]
impl TranscodeEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn is_available(&self) -> bool {
        self.counters
            .availability_checks
            .fetch_add(1, Ordering::SeqCst);
        self.available
    }

    async fn start(
        &self,
        input: ByteStream,
        plan: TranscodePlan,
    ) -> TranscodeResult<TranscodeSession> {
        if !self.available {
            return Err(TranscodeError::EngineUnavailable {
                reason: "simulated engine disabled".to_string(),
            });
        }

        let (handle, session) = session::open(plan.session_id, self.output_buffer_chunks);
        self.plans.lock().push(plan);
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);

        let active = ActiveSession(self.counters.clone());
        let behavior = self.behavior.clone();
        tokio::spawn(
            async move {
                let _active = active;
                Self::run(behavior, input, handle).await;
            }
            .in_current_span(),
        );

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;
    use uuid::Uuid;

    use super::*;
    use crate::config::EncoderSettings;
    use crate::policy::{AudioAction, TranscodeStrategy, VideoAction};
    use crate::transcode::SessionState;

    fn plan() -> TranscodePlan {
        TranscodePlan {
            session_id: Uuid::new_v4(),
            strategy: TranscodeStrategy {
                video: VideoAction::ReencodeH264,
                audio: AudioAction::ReencodeAac,
                rejection: None,
            },
            encoder: EncoderSettings::default(),
            duration_hint: Some(12.0),
        }
    }

    fn input(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    async fn wait_idle(engine: &SimulatedEngine) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.active_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("simulated session did not finish");
    }

    #[tokio::test]
    async fn test_passthrough_completes() {
        let engine = SimulatedEngine::passthrough();
        let plan = plan();
        let mut session = engine.start(input(&["ab", "cd"]), plan.clone()).await.unwrap();

        let mut output = Vec::new();
        while let Some(chunk) = session.next_chunk().await {
            output.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(output, b"abcd".to_vec());

        let mut last = None;
        while let Some(event) = session.next_event().await {
            last = Some(event);
        }
        assert_eq!(last, Some(SessionEvent::Completed));
        assert_eq!(session.state(), SessionState::Completed);

        wait_idle(&engine).await;
        assert_eq!(engine.started_sessions(), 1);
        assert_eq!(engine.recorded_plans(), vec![plan]);
    }

    #[tokio::test]
    async fn test_fail_before_output() {
        let engine = SimulatedEngine::new(SimulatedBehavior::FailBeforeOutput {
            reason: "unsupported codec".to_string(),
        });
        let mut session = engine.start(input(&["ab"]), plan()).await.unwrap();

        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Failed {
                reason: "unsupported codec".to_string()
            })
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_after_bytes() {
        let engine = SimulatedEngine::new(SimulatedBehavior::FailAfter {
            bytes: 4,
            reason: "decoder error".to_string(),
        });
        let mut session = engine
            .start(input(&["ab", "cd", "ef", "gh"]), plan())
            .await
            .unwrap();

        let mut output = Vec::new();
        let mut error = None;
        while let Some(chunk) = session.next_chunk().await {
            match chunk {
                Ok(chunk) => output.extend_from_slice(&chunk),
                Err(e) => error = Some(e),
            }
        }

        assert_eq!(output, b"abcd".to_vec());
        assert!(matches!(error, Some(TranscodeError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_engine_starts_nothing() {
        let engine = SimulatedEngine::unavailable();

        assert!(!engine.is_available().await);
        assert!(engine.start(input(&["ab"]), plan()).await.is_err());
        assert_eq!(engine.started_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_session() {
        let engine = SimulatedEngine::passthrough();
        let endless = stream::once(async { Ok(Bytes::from_static(b"first")) })
            .chain(stream::pending())
            .boxed();

        let mut session = engine.start(endless, plan()).await.unwrap();
        assert_eq!(
            session.next_chunk().await.unwrap().unwrap(),
            Bytes::from_static(b"first")
        );
        assert_eq!(engine.active_sessions(), 1);

        session.cancel();
        wait_idle(&engine).await;
        assert_eq!(engine.started_sessions(), 1);
    }
}
