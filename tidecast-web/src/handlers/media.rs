//! Relay endpoints: streaming transcodes and metadata probes

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tidecast_core::relay::FRAGMENTED_MP4;
use tidecast_core::{MediaMetadata, RelayError, TranscodeMode, TranscodeRequest};

use crate::server::AppState;

/// Query string shared by every relay endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SourceQuery {
    /// Remote file to relay
    pub url: Option<String>,
}

type SourceQueryResult = Result<Query<SourceQuery>, QueryRejection>;

/// `GET /transcode` - full transcode to browser-compatible fragmented MP4.
///
/// # Errors
///
/// - `RelayError` - Rendered as a JSON error before any video bytes are sent
pub async fn transcode(
    State(state): State<AppState>,
    query: SourceQueryResult,
) -> Result<Response, RelayError> {
    relay(&state, query, TranscodeMode::FullTranscode).await
}

/// `GET /audio-remux` - video copied untouched, audio re-encoded to AAC.
///
/// # Errors
///
/// - `RelayError` - Rendered as a JSON error before any video bytes are sent
pub async fn audio_remux(
    State(state): State<AppState>,
    query: SourceQueryResult,
) -> Result<Response, RelayError> {
    relay(&state, query, TranscodeMode::AudioRemuxOnly).await
}

/// `HEAD` on the streaming endpoints. Validates the query and answers with
/// the streaming headers without fetching the source or starting a session.
///
/// # Errors
///
/// - `RelayError` - Missing or invalid url
pub async fn stream_head(query: SourceQueryResult) -> Result<Response, RelayError> {
    let query = source_query(query)?;
    TranscodeRequest::from_query(query.url.as_deref(), TranscodeMode::FullTranscode)?;

    Ok((
        [
            (header::CONTENT_TYPE, FRAGMENTED_MP4),
            (header::ACCEPT_RANGES, "bytes"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        (),
    )
        .into_response())
}

/// `GET /info` - media metadata of the source as JSON.
///
/// # Errors
///
/// - `RelayError` - Missing or invalid url, fetch or probe failure
pub async fn info(
    State(state): State<AppState>,
    query: SourceQueryResult,
) -> Result<Json<MediaMetadata>, RelayError> {
    let query = source_query(query)?;
    let request = TranscodeRequest::from_query(query.url.as_deref(), TranscodeMode::InfoOnly)?;
    let metadata = state.service.inspect(request).await?;
    Ok(Json(metadata))
}

async fn relay(
    state: &AppState,
    query: SourceQueryResult,
    mode: TranscodeMode,
) -> Result<Response, RelayError> {
    let query = source_query(query)?;
    let request = TranscodeRequest::from_query(query.url.as_deref(), mode)?;
    state.service.stream(request).await
}

/// Malformed query strings get the same JSON error shape as a bad url.
fn source_query(query: SourceQueryResult) -> Result<SourceQuery, RelayError> {
    query
        .map(|Query(query)| query)
        .map_err(|rejection| RelayError::InvalidParameter {
            name: "url",
            reason: rejection.body_text(),
        })
}
