//! Shared fixtures: in-memory upstreams, a fixed prober, a router harness
//! and log capture.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tidecast_core::media::{FormatProber, MediaMetadata, ProbeError, is_mobile_compatible};
use tidecast_core::source::{ByteStream, SourceError, SourceFetcher, SourceResult, SourceStream};
use tidecast_core::transcode::SimulatedEngine;
use tidecast_core::{RelayService, TidecastConfig};
use tidecast_web::{AppState, build_router};
use tower::ServiceExt;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

pub fn source_url(name: &str) -> String {
    format!("http://upstream.test/{name}")
}

#[derive(Clone)]
enum UpstreamBody {
    Chunks(Vec<Bytes>),
    Endless(Bytes),
    Status(u16),
}

/// A scripted upstream response.
#[derive(Clone)]
pub struct Upstream {
    content_length: Option<u64>,
    body: UpstreamBody,
}

impl Upstream {
    /// Serves `data` in chunks of `chunk_size`, advertising its length.
    pub fn fixed(data: &'static [u8], chunk_size: usize) -> Self {
        Self {
            content_length: Some(data.len() as u64),
            body: UpstreamBody::Chunks(data.chunks(chunk_size).map(Bytes::from_static).collect()),
        }
    }

    /// Repeats `chunk` forever without a content length.
    pub fn endless(chunk: &'static [u8]) -> Self {
        Self {
            content_length: None,
            body: UpstreamBody::Endless(Bytes::from_static(chunk)),
        }
    }

    /// Answers with an HTTP error status.
    pub fn status(status: u16) -> Self {
        Self {
            content_length: None,
            body: UpstreamBody::Status(status),
        }
    }

    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }
}

struct LiveConnection(Arc<AtomicUsize>);

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetcher serving scripted upstreams and tracking open connections.
#[derive(Default)]
pub struct MemoryFetcher {
    sources: Mutex<HashMap<String, Upstream>>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    pulled: Arc<AtomicUsize>,
}

impl MemoryFetcher {
    pub fn add(&self, url: &str, upstream: Upstream) {
        self.sources.lock().insert(url.to_string(), upstream);
    }

    /// Requests made so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Upstream bodies not yet dropped.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Chunks read from all upstream bodies.
    pub fn chunks_pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for MemoryFetcher {
    async fn open(&self, url: &Url) -> SourceResult<SourceStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let upstream = self.sources.lock().get(url.as_str()).cloned();
        let Some(upstream) = upstream else {
            return Err(SourceError::Unavailable {
                reason: "connection refused".to_string(),
            });
        };

        let chunks: BoxStream<'static, Bytes> = match upstream.body {
            UpstreamBody::Status(status) => return Err(SourceError::HttpStatus { status }),
            UpstreamBody::Chunks(chunks) => stream::iter(chunks).boxed(),
            UpstreamBody::Endless(chunk) => stream::repeat(chunk).boxed(),
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        let connection = LiveConnection(self.live.clone());
        let pulled = self.pulled.clone();
        let body = chunks
            .map(move |chunk| {
                let _connection = &connection;
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(chunk)
            })
            .boxed();

        Ok(SourceStream::new(200, upstream.content_length, body))
    }
}

/// Prober returning the same answer for every head or stream.
pub struct FixedProber {
    metadata: Option<MediaMetadata>,
    calls: AtomicUsize,
}

impl FixedProber {
    pub fn new(metadata: Option<MediaMetadata>) -> Self {
        Self {
            metadata,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FormatProber for FixedProber {
    async fn probe(&self, _head: Bytes) -> Result<MediaMetadata, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.metadata.clone().ok_or_else(|| ProbeError::Failed {
            reason: "unrecognised container".to_string(),
        })
    }

    async fn probe_stream(&self, mut input: ByteStream) -> Result<MediaMetadata, ProbeError> {
        // Only the first chunk is read, like ffprobe stopping early
        let _ = input.next().await;
        self.probe(Bytes::new()).await
    }
}

pub fn metadata(video_codec: &str, container_format: &str) -> MediaMetadata {
    MediaMetadata {
        container_format: container_format.to_string(),
        duration_seconds: Some(120.0),
        total_bytes: None,
        bitrate: Some(4_000_000),
        video_codec: Some(video_codec.to_string()),
        width: Some(1920),
        height: Some(1080),
        frame_rate: Some(23.976),
        audio_codec: Some("ac3".to_string()),
        sample_rate: Some(48_000),
        channel_count: Some(6),
        mobile_compatible: is_mobile_compatible(Some(video_codec), container_format),
    }
}

/// Router wired to in-memory components.
pub struct Harness {
    pub router: Router,
    pub fetcher: Arc<MemoryFetcher>,
    pub prober: Arc<FixedProber>,
    pub engine: SimulatedEngine,
}

impl Harness {
    pub fn new(metadata: Option<MediaMetadata>) -> Self {
        Self::with(
            TidecastConfig::for_testing(),
            metadata,
            SimulatedEngine::passthrough(),
        )
    }

    pub fn with(
        config: TidecastConfig,
        metadata: Option<MediaMetadata>,
        engine: SimulatedEngine,
    ) -> Self {
        let fetcher = Arc::new(MemoryFetcher::default());
        let prober = Arc::new(FixedProber::new(metadata));
        let service = RelayService::with_components(
            config,
            fetcher.clone(),
            prober.clone(),
            Arc::new(engine.clone()),
        );

        Self {
            router: build_router(AppState::new(service)),
            fetcher,
            prober,
            engine,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn head(&self, uri: &str) -> Response<Body> {
        self.send(Request::head(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Formatted DEBUG output of everything logged on the current thread.
///
/// Tests run on a current-thread runtime, so spawned session tasks log here too.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
