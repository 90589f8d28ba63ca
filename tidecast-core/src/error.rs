//! Request-level error taxonomy and its HTTP rendering.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::media::ProbeError;
use crate::source::SourceError;
use crate::transcode::TranscodeError;

/// Every way a relay request can fail before response bytes are sent.
///
/// Once streaming has begun, failures can only terminate the connection and
/// never surface as a `RelayError`.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing required query parameter '{name}'")]
    MissingParameter { name: &'static str },

    #[error("Invalid query parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Upstream responded with HTTP {status}")]
    UpstreamHttpError { status: u16 },

    #[error("Source is {size_mb} MB, above the {limit_mb} MB limit; try a lower-bitrate source")]
    SourceTooLarge { size_mb: u64, limit_mb: u64 },

    #[error("Probe failed: {reason}")]
    ProbeFailed { reason: String },

    #[error("Transcode failed: {reason}")]
    TranscodeFailed { reason: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingParameter { .. } | RelayError::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            RelayError::SourceTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamUnavailable { .. }
            | RelayError::UpstreamHttpError { .. }
            | RelayError::ProbeFailed { .. }
            | RelayError::TranscodeFailed { .. }
            | RelayError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the JSON body.
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::MissingParameter { .. } => "missing_parameter",
            RelayError::InvalidParameter { .. } => "invalid_parameter",
            RelayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            RelayError::UpstreamHttpError { .. } => "upstream_http_error",
            RelayError::SourceTooLarge { .. } => "source_too_large",
            RelayError::ProbeFailed { .. } => "probe_failed",
            RelayError::TranscodeFailed { .. } => "transcode_failed",
            RelayError::Configuration { .. } => "configuration_error",
        }
    }

    /// Checks if this error is due to the caller's request.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<SourceError> for RelayError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::Unavailable { reason } => RelayError::UpstreamUnavailable { reason },
            SourceError::HttpStatus { status } => RelayError::UpstreamHttpError { status },
            SourceError::Body { reason } => RelayError::UpstreamUnavailable { reason },
        }
    }
}

impl From<ProbeError> for RelayError {
    fn from(error: ProbeError) -> Self {
        match error {
            ProbeError::Failed { reason } => RelayError::ProbeFailed { reason },
        }
    }
}

impl From<TranscodeError> for RelayError {
    fn from(error: TranscodeError) -> Self {
        match error {
            TranscodeError::EngineUnavailable { reason } | TranscodeError::Failed { reason } => {
                RelayError::TranscodeFailed { reason }
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });

        match &self {
            RelayError::UpstreamHttpError { status } => {
                body["upstreamStatus"] = json!(status);
            }
            RelayError::SourceTooLarge { size_mb, limit_mb } => {
                body["sizeMb"] = json!(size_mb);
                body["limitMb"] = json!(limit_mb);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn render(error: RelayError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::MissingParameter { name: "url" }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::SourceTooLarge {
                size_mb: 40_000,
                limit_mb: 30_000
            }
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            RelayError::UpstreamHttpError { status: 404 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(
            RelayError::InvalidParameter {
                name: "url",
                reason: "unsupported scheme".to_string()
            }
            .is_client_error()
        );
        assert!(
            !RelayError::ProbeFailed {
                reason: "truncated".to_string()
            }
            .is_client_error()
        );
    }

    #[test]
    fn test_component_errors_convert() {
        let error: RelayError = SourceError::HttpStatus { status: 403 }.into();
        assert!(matches!(error, RelayError::UpstreamHttpError { status: 403 }));

        let error: RelayError = SourceError::Body {
            reason: "reset".to_string(),
        }
        .into();
        assert!(matches!(error, RelayError::UpstreamUnavailable { .. }));

        let error: RelayError = TranscodeError::EngineUnavailable {
            reason: "no ffmpeg".to_string(),
        }
        .into();
        assert_eq!(error.error_code(), "transcode_failed");
    }

    #[tokio::test]
    async fn test_missing_parameter_body() {
        let (status, body) = render(RelayError::MissingParameter { name: "url" }).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_parameter");
        assert!(body["message"].as_str().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn test_size_rejection_body() {
        let (status, body) = render(RelayError::SourceTooLarge {
            size_mb: 31_000,
            limit_mb: 30_000,
        })
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "source_too_large");
        assert_eq!(body["sizeMb"], 31_000);
        assert_eq!(body["limitMb"], 30_000);
        assert!(body["message"].as_str().unwrap().contains("lower-bitrate"));
    }

    #[tokio::test]
    async fn test_upstream_status_body() {
        let (_, body) = render(RelayError::UpstreamHttpError { status: 502 }).await;
        assert_eq!(body["upstreamStatus"], 502);
    }
}
