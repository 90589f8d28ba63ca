//! Request orchestration: fetch, gate, probe, transcode, relay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Response;
use parking_lot::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::TidecastConfig;
use crate::error::RelayError;
use crate::media::{FfprobeProber, FormatProber, MediaMetadata};
use crate::policy::{TranscodeMode, TranscodePolicy};
use crate::relay::relay_session;
use crate::request::TranscodeRequest;
use crate::source::{ByteStream, HttpSourceFetcher, SourceFetcher, SourceHead};
use crate::transcode::{FfmpegEngine, TranscodeEngine, TranscodePlan};

/// How long an engine availability answer is reused.
const ENGINE_CHECK_TTL: Duration = Duration::from_secs(30);

/// Runs relay requests. Holds no per-request state; every call owns its
/// upstream connection and transcoding session.
pub struct RelayService {
    config: TidecastConfig,
    policy: TranscodePolicy,
    fetcher: Arc<dyn SourceFetcher>,
    prober: Arc<dyn FormatProber>,
    engine: Arc<dyn TranscodeEngine>,
    engine_checked: Mutex<Option<(Instant, bool)>>,
}

impl RelayService {
    /// Creates a service with the HTTP fetcher, ffprobe and ffmpeg.
    ///
    /// # Errors
    ///
    /// - `RelayError::Configuration` - The HTTP client could not be built
    pub fn new(config: TidecastConfig) -> Result<Self, RelayError> {
        let fetcher =
            HttpSourceFetcher::new(config.fetch.clone()).map_err(|e| RelayError::Configuration {
                reason: e.to_string(),
            })?;
        let prober = FfprobeProber::new(&config.probe);
        let engine = FfmpegEngine::new(&config.transcode);

        Ok(Self::with_components(
            config,
            Arc::new(fetcher),
            Arc::new(prober),
            Arc::new(engine),
        ))
    }

    /// Creates a service from explicit components.
    pub fn with_components(
        config: TidecastConfig,
        fetcher: Arc<dyn SourceFetcher>,
        prober: Arc<dyn FormatProber>,
        engine: Arc<dyn TranscodeEngine>,
    ) -> Self {
        Self {
            policy: TranscodePolicy::new(config.transcode.max_source_mb),
            config,
            fetcher,
            prober,
            engine,
            engine_checked: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TidecastConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Whether the engine can start sessions, rechecked at most every
    /// [`ENGINE_CHECK_TTL`].
    pub async fn engine_available(&self) -> bool {
        let cached = *self.engine_checked.lock();
        if let Some((checked_at, available)) = cached {
            if checked_at.elapsed() < ENGINE_CHECK_TTL {
                return available;
            }
        }

        let available = self.engine.is_available().await;
        *self.engine_checked.lock() = Some((Instant::now(), available));
        available
    }

    /// Streams the transcoded source as fragmented MP4.
    ///
    /// # Errors
    ///
    /// - `RelayError::UpstreamUnavailable` / `UpstreamHttpError` - Fetch failed
    /// - `RelayError::SourceTooLarge` - Size gate rejected a full transcode
    /// - `RelayError::TranscodeFailed` - Engine failed before any output
    pub async fn stream(&self, request: TranscodeRequest) -> Result<Response, RelayError> {
        let session_id = Uuid::new_v4();
        let span = info_span!(
            "relay",
            session = %session_id,
            mode = %request.mode,
            source = %request.source_label()
        );

        async {
            self.stream_in_session(request, session_id)
                .await
                .inspect_err(log_failure)
        }
        .instrument(span)
        .await
    }

    /// Probes the source and returns its metadata. Nothing is transcoded.
    ///
    /// # Errors
    ///
    /// - `RelayError::UpstreamUnavailable` / `UpstreamHttpError` - Fetch failed
    /// - `RelayError::ProbeFailed` - The container could not be parsed
    pub async fn inspect(&self, request: TranscodeRequest) -> Result<MediaMetadata, RelayError> {
        let span = info_span!(
            "relay",
            session = %Uuid::new_v4(),
            mode = %TranscodeMode::InfoOnly,
            source = %request.source_label()
        );

        async { self.inspect_in_session(request).await.inspect_err(log_failure) }
            .instrument(span)
            .await
    }

    async fn inspect_in_session(
        &self,
        request: TranscodeRequest,
    ) -> Result<MediaMetadata, RelayError> {
        let source = self.fetcher.open(&request.source_url).await?;
        let content_length = source.content_length;

        // Streamed rather than capped so a trailing MP4 index is still reached
        let metadata = self
            .prober
            .probe_stream(source.into_body())
            .await?
            .with_fallback_size(content_length);
        info!(
            container = %metadata.container_format,
            mobile_compatible = metadata.mobile_compatible,
            "Source inspected"
        );
        Ok(metadata)
    }

    async fn stream_in_session(
        &self,
        request: TranscodeRequest,
        session_id: Uuid,
    ) -> Result<Response, RelayError> {
        if request.mode == TranscodeMode::InfoOnly {
            return Err(RelayError::Configuration {
                reason: "info requests are not streamed".to_string(),
            });
        }

        let source = self.fetcher.open(&request.source_url).await?;
        let content_length = source.content_length;

        let gate = self.policy.evaluate(request.mode, content_length, None);
        if let Some(rejection) = gate.rejection {
            return Err(RelayError::SourceTooLarge {
                size_mb: rejection.size_mb,
                limit_mb: rejection.limit_mb,
            });
        }

        let (input, metadata) = self
            .prepare_input(request.mode, source.into_body(), content_length)
            .await?;
        let strategy = self
            .policy
            .evaluate(request.mode, content_length, metadata.as_ref());
        info!(
            video = ?strategy.video,
            audio = ?strategy.audio,
            content_length = ?content_length,
            "Strategy selected"
        );

        let plan = TranscodePlan {
            session_id,
            strategy,
            encoder: self.config.transcode.encoder.clone(),
            duration_hint: metadata.and_then(|m| m.duration_seconds),
        };
        let session = self.engine.start(input, plan).await?;

        relay_session(session).await
    }

    /// Probes the head of full-transcode sources so compatible video can be
    /// copied, then hands back a stream that replays the head.
    async fn prepare_input(
        &self,
        mode: TranscodeMode,
        body: ByteStream,
        content_length: Option<u64>,
    ) -> Result<(ByteStream, Option<MediaMetadata>), RelayError> {
        if mode != TranscodeMode::FullTranscode || !self.config.probe.probe_before_transcode {
            return Ok((body, None));
        }

        let head = SourceHead::capture(body, self.config.probe.head_bytes).await?;
        debug!(bytes = head.len(), complete = head.is_complete(), "Captured source head");

        let probe_input = head.contiguous();
        let metadata = match self.prober.probe(probe_input).await {
            Ok(metadata) => Some(metadata.with_fallback_size(content_length)),
            Err(e) => {
                warn!(phase = "probe", "Probe failed, falling back to re-encode: {}", e);
                None
            }
        };

        Ok((head.replay(), metadata))
    }
}

fn log_failure(error: &RelayError) {
    if error.is_client_error() {
        info!(error = error.error_code(), "Request rejected: {}", error);
    } else {
        warn!(error = error.error_code(), "Request failed: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::media::ProbeError;
    use crate::policy::VideoAction;
    use crate::source::{SourceError, SourceResult, SourceStream};
    use crate::transcode::{SimulatedBehavior, SimulatedEngine};

    struct StaticFetcher {
        body: &'static [u8],
        content_length: Option<u64>,
        status: Option<u16>,
        opened: Mutex<Vec<Url>>,
    }

    impl StaticFetcher {
        fn new(body: &'static [u8]) -> Self {
            Self {
                body,
                content_length: Some(body.len() as u64),
                status: None,
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn open(&self, url: &Url) -> SourceResult<SourceStream> {
            self.opened.lock().push(url.clone());
            if let Some(status) = self.status {
                return Err(SourceError::HttpStatus { status });
            }
            let chunks: Vec<_> = self
                .body
                .chunks(4)
                .map(|c| Ok(Bytes::from_static(c)))
                .collect();
            Ok(SourceStream::new(
                200,
                self.content_length,
                stream::iter(chunks).boxed(),
            ))
        }
    }

    struct FixedProber(Option<MediaMetadata>);

    #[async_trait::async_trait]
    impl FormatProber for FixedProber {
        async fn probe(&self, _head: Bytes) -> Result<MediaMetadata, ProbeError> {
            self.0.clone().ok_or(ProbeError::Failed {
                reason: "unrecognised container".to_string(),
            })
        }

        async fn probe_stream(&self, mut input: ByteStream) -> Result<MediaMetadata, ProbeError> {
            let mut seen = 0;
            while let Some(Ok(chunk)) = input.next().await {
                seen += chunk.len();
            }
            if seen == 0 {
                return Err(ProbeError::Failed {
                    reason: "source is empty".to_string(),
                });
            }
            self.probe(Bytes::new()).await
        }
    }

    fn h264_mp4() -> MediaMetadata {
        MediaMetadata {
            container_format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            duration_seconds: Some(30.0),
            total_bytes: None,
            bitrate: None,
            video_codec: Some("h264".to_string()),
            width: Some(640),
            height: Some(360),
            frame_rate: Some(25.0),
            audio_codec: Some("aac".to_string()),
            sample_rate: Some(44_100),
            channel_count: Some(2),
            mobile_compatible: true,
        }
    }

    fn service(
        fetcher: StaticFetcher,
        prober: FixedProber,
        engine: SimulatedEngine,
    ) -> RelayService {
        RelayService::with_components(
            TidecastConfig::for_testing(),
            Arc::new(fetcher),
            Arc::new(prober),
            Arc::new(engine),
        )
    }

    fn request(mode: TranscodeMode) -> TranscodeRequest {
        TranscodeRequest::from_query(Some("https://cdn.example.com/movie.mp4"), mode).unwrap()
    }

    #[tokio::test]
    async fn test_compatible_source_is_copied_and_replayed_whole() {
        let engine = SimulatedEngine::passthrough();
        let relay = service(
            StaticFetcher::new(b"0123456789abcdef"),
            FixedProber(Some(h264_mp4())),
            engine.clone(),
        );

        let response = relay
            .stream(request(TranscodeMode::FullTranscode))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        assert_eq!(body, Bytes::from_static(b"0123456789abcdef"));
        let plans = engine.recorded_plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].strategy.video, VideoAction::Copy);
        assert_eq!(plans[0].duration_hint, Some(30.0));
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_to_reencode() {
        let engine = SimulatedEngine::passthrough();
        let relay = service(StaticFetcher::new(b"mkv bytes"), FixedProber(None), engine.clone());

        let response = relay
            .stream(request(TranscodeMode::FullTranscode))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        assert_eq!(body, Bytes::from_static(b"mkv bytes"));
        assert_eq!(
            engine.recorded_plans()[0].strategy.video,
            VideoAction::ReencodeH264
        );
    }

    #[tokio::test]
    async fn test_oversized_source_never_starts_engine() {
        let engine = SimulatedEngine::passthrough();
        let mut fetcher = StaticFetcher::new(b"tiny");
        fetcher.content_length = Some(40_000 * crate::policy::BYTES_PER_MB);
        let relay = service(fetcher, FixedProber(Some(h264_mp4())), engine.clone());

        let error = relay
            .stream(request(TranscodeMode::FullTranscode))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::SourceTooLarge {
                size_mb: 40_000,
                limit_mb: 30_000
            }
        ));
        assert_eq!(engine.started_sessions(), 0);
    }

    #[tokio::test]
    async fn test_audio_remux_skips_gate_and_probe() {
        let engine = SimulatedEngine::passthrough();
        let mut fetcher = StaticFetcher::new(b"hevc in mkv");
        fetcher.content_length = Some(40_000 * crate::policy::BYTES_PER_MB);
        let relay = service(fetcher, FixedProber(None), engine.clone());

        let response = relay
            .stream(request(TranscodeMode::AudioRemuxOnly))
            .await
            .unwrap();
        drop(response);

        let plans = engine.recorded_plans();
        assert_eq!(plans[0].strategy.video, VideoAction::Copy);
        assert_eq!(plans[0].duration_hint, None);
    }

    #[tokio::test]
    async fn test_upstream_status_is_reported() {
        let engine = SimulatedEngine::passthrough();
        let mut fetcher = StaticFetcher::new(b"");
        fetcher.status = Some(404);
        let relay = service(fetcher, FixedProber(None), engine.clone());

        let error = relay
            .stream(request(TranscodeMode::FullTranscode))
            .await
            .unwrap_err();

        assert!(matches!(error, RelayError::UpstreamHttpError { status: 404 }));
        assert_eq!(engine.started_sessions(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_before_output() {
        let engine = SimulatedEngine::new(SimulatedBehavior::FailBeforeOutput {
            reason: "encoder init failed".to_string(),
        });
        let relay = service(
            StaticFetcher::new(b"data"),
            FixedProber(Some(h264_mp4())),
            engine,
        );

        let error = relay
            .stream(request(TranscodeMode::FullTranscode))
            .await
            .unwrap_err();
        assert!(matches!(error, RelayError::TranscodeFailed { .. }));
    }

    #[tokio::test]
    async fn test_inspect_fills_size_from_upstream() {
        let relay = service(
            StaticFetcher::new(b"0123456789"),
            FixedProber(Some(h264_mp4())),
            SimulatedEngine::passthrough(),
        );

        let metadata = relay
            .inspect(request(TranscodeMode::InfoOnly))
            .await
            .unwrap();

        assert_eq!(metadata.total_bytes, Some(10));
        assert!(metadata.mobile_compatible);
    }

    #[tokio::test]
    async fn test_inspect_of_empty_source_fails() {
        let relay = service(
            StaticFetcher::new(b""),
            FixedProber(Some(h264_mp4())),
            SimulatedEngine::passthrough(),
        );

        let error = relay
            .inspect(request(TranscodeMode::InfoOnly))
            .await
            .unwrap_err();
        assert!(matches!(error, RelayError::ProbeFailed { .. }));
    }

    #[tokio::test]
    async fn test_engine_availability_is_cached() {
        let engine = SimulatedEngine::unavailable();
        let relay = service(StaticFetcher::new(b""), FixedProber(None), engine.clone());

        for _ in 0..3 {
            assert!(!relay.engine_available().await);
        }
        assert_eq!(engine.availability_checks(), 1);
    }

    #[tokio::test]
    async fn test_inspect_probe_failure() {
        let relay = service(
            StaticFetcher::new(b"junk"),
            FixedProber(None),
            SimulatedEngine::passthrough(),
        );

        let error = relay
            .inspect(request(TranscodeMode::InfoOnly))
            .await
            .unwrap_err();
        assert!(matches!(error, RelayError::ProbeFailed { .. }));
    }
}
