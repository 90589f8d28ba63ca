//! Upstream sources: opening a remote file as a continuous byte stream.
//!
//! A [`SourceStream`] is the exclusive handle on one upstream connection.
//! Dropping it (or the [`ByteStream`] taken from it) closes the socket, which
//! is how every exit path of a request releases the upstream.

pub mod fetcher;
pub mod head;
pub mod redact;

use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

pub use fetcher::HttpSourceFetcher;
pub use head::SourceHead;
pub use redact::redact_url;

/// Continuous upstream body, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Errors raised while opening or reading an upstream source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection, DNS or TLS failure, or no response in time.
    #[error("Upstream unavailable: {reason}")]
    Unavailable {
        /// Description of the transport failure.
        reason: String,
    },

    /// Upstream answered with a non-success status.
    #[error("Upstream responded with HTTP {status}")]
    HttpStatus {
        /// Status code returned by the upstream.
        status: u16,
    },

    /// The body stream broke after the response started.
    #[error("Upstream body failed: {reason}")]
    Body {
        /// Description of the read failure.
        reason: String,
    },
}

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// An open upstream response.
pub struct SourceStream {
    /// Content length advertised by the upstream, if any.
    pub content_length: Option<u64>,
    /// HTTP status of the upstream response.
    pub status: u16,
    /// Advertised content type, if any.
    pub content_type: Option<String>,
    body: ByteStream,
}

impl SourceStream {
    /// Wraps an already-open body stream.
    pub fn new(status: u16, content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            content_length,
            status,
            content_type: None,
            body,
        }
    }

    /// Sets the advertised content type.
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Takes ownership of the body stream.
    pub fn into_body(self) -> ByteStream {
        self.body
    }
}

impl std::fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStream")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Opens upstream sources.
///
/// Implementations perform exactly one request per call and never retry.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Opens a streaming GET against `url`.
    ///
    /// # Errors
    ///
    /// - `SourceError::Unavailable` - Connection, DNS or TLS failure
    /// - `SourceError::HttpStatus` - Upstream answered with a non-2xx status
    async fn open(&self, url: &Url) -> SourceResult<SourceStream>;
}
