//! reqwest-backed source fetcher.

use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use super::{SourceError, SourceFetcher, SourceResult, SourceStream, redact_url};
use crate::config::FetchConfig;

/// Fetches sources over HTTP(S) with a fixed identifying user agent.
#[derive(Debug, Clone)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpSourceFetcher {
    /// Builds the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// - `SourceError::Unavailable` - TLS backend or client construction failed
    pub fn new(config: FetchConfig) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SourceError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn open(&self, url: &Url) -> SourceResult<SourceStream> {
        let label = redact_url(url);
        debug!(source = %label, "Opening upstream");

        let send = self.client.get(url.clone()).send();
        let response = tokio::time::timeout(self.config.response_timeout, send)
            .await
            .map_err(|_| SourceError::Unavailable {
                reason: format!(
                    "no response within {}s",
                    self.config.response_timeout.as_secs()
                ),
            })?
            .map_err(|e| SourceError::Unavailable {
                // reqwest errors embed the full URL; keep credentials out of messages
                reason: describe_transport_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(source = %label, status = status.as_u16(), "Upstream rejected request");
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(
            source = %label,
            status = status.as_u16(),
            content_length = ?content_length,
            "Upstream stream open"
        );

        let body = response
            .bytes_stream()
            .map_err(|e| SourceError::Body {
                reason: describe_transport_error(&e),
            })
            .boxed();

        Ok(SourceStream::new(status.as_u16(), content_length, body).with_content_type(content_type))
    }
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    let kind = if error.is_connect() {
        "connection failed"
    } else if error.is_timeout() {
        "timed out"
    } else if error.is_redirect() {
        "too many redirects"
    } else if error.is_body() || error.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };

    let detail = std::error::Error::source(error)
        .map(|source| source.to_string())
        .unwrap_or_default();

    if detail.is_empty() {
        kind.to_string()
    } else {
        format!("{kind}: {detail}")
    }
}
