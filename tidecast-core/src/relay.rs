//! Output relay: forwards a session's output to the HTTP response.
//!
//! The response is only committed once the engine produced its first bytes.
//! Until then every failure is still a structured error. After that the
//! headers are gone, and a failing engine can only cut the connection short.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, stream};
use tracing::{Instrument, debug, info, warn};

use crate::error::RelayError;
use crate::transcode::{SessionEvent, SessionEvents, TranscodeSession};

/// Content type of every relayed stream.
pub const FRAGMENTED_MP4: &str = "video/mp4";

/// Response header carrying the session id.
pub const SESSION_HEADER: &str = "x-tidecast-session";

/// Turns a started session into a streaming response.
///
/// Waits for the first output chunk. If the session fails or ends without
/// output first, returns `RelayError::TranscodeFailed`. The returned body is
/// backed by the session's bounded output channel, so a slow client stalls
/// the engine instead of growing a buffer, and dropping the body cancels the
/// session.
///
/// # Errors
///
/// - `RelayError::TranscodeFailed` - The engine failed before producing output
pub async fn relay_session(session: TranscodeSession) -> Result<Response, RelayError> {
    let session_id = session.id();
    let (mut events, mut output) = session.into_parts();
    let mut events_open = true;

    let first = loop {
        tokio::select! {
            biased;
            chunk = output.next_chunk() => match chunk {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    let reason = failure_reason(&mut events).await;
                    return Err(RelayError::TranscodeFailed { reason });
                }
            },
            event = events.next_event(), if events_open => match event {
                Some(SessionEvent::Failed { reason }) => {
                    return Err(RelayError::TranscodeFailed { reason });
                }
                Some(event) => debug!(?event, "Session event before first output"),
                None => events_open = false,
            },
        }
    };

    debug!(bytes = first.len(), "First output ready, committing response");
    tokio::spawn(log_remaining_events(events).in_current_span());

    let body = Body::from_stream(stream::once(async move { Ok(first) }).chain(output));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, FRAGMENTED_MP4)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }

    Ok(response)
}

async fn failure_reason(events: &mut SessionEvents) -> String {
    while let Some(event) = events.next_event().await {
        if let SessionEvent::Failed { reason } = event {
            return reason;
        }
    }
    "engine produced no output".to_string()
}

async fn log_remaining_events(mut events: SessionEvents) {
    while let Some(event) = events.next_event().await {
        match event {
            SessionEvent::Progress(progress) => debug!(
                elapsed_secs = progress.elapsed.as_secs_f64(),
                percent = ?progress.percent,
                bytes = ?progress.bytes_written,
                "Relay progress"
            ),
            SessionEvent::Completed => info!("Stream completed"),
            SessionEvent::Failed { reason } if reason == "cancelled" => {
                info!("Client disconnected, session released");
            }
            SessionEvent::Failed { reason } => {
                warn!(phase = "stream", "Stream aborted after response started: {}", reason);
            }
            SessionEvent::Started => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::transcode::session;

    #[tokio::test]
    async fn test_headers_and_body() {
        let (handle, session) = session::open(Uuid::new_v4(), 4);
        let id = session.id();

        tokio::spawn(async move {
            handle.emit(SessionEvent::Started);
            handle.send_chunk(Bytes::from_static(b"ftyp")).await;
            handle.send_chunk(Bytes::from_static(b"moov")).await;
            handle.emit(SessionEvent::Completed);
        });

        let response = relay_session(session).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[SESSION_HEADER], id.to_string().as_str());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"ftypmoov"));
    }

    #[tokio::test]
    async fn test_failure_before_output_is_structured() {
        let (handle, session) = session::open(Uuid::new_v4(), 4);
        handle.emit(SessionEvent::Failed {
            reason: "unsupported codec".to_string(),
        });

        let error = relay_session(session).await.unwrap_err();
        match error {
            RelayError::TranscodeFailed { reason } => assert_eq!(reason, "unsupported codec"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_completion_without_output_is_failure() {
        let (handle, session) = session::open(Uuid::new_v4(), 4);
        handle.emit(SessionEvent::Started);
        handle.emit(SessionEvent::Completed);
        drop(handle);

        let error = relay_session(session).await.unwrap_err();
        assert!(matches!(error, RelayError::TranscodeFailed { .. }));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_aborts_body() {
        let (handle, session) = session::open(Uuid::new_v4(), 4);

        tokio::spawn(async move {
            handle.emit(SessionEvent::Started);
            handle.send_chunk(Bytes::from_static(b"partial")).await;
            handle.fail_output("decoder error").await;
            handle.emit(SessionEvent::Failed {
                reason: "decoder error".to_string(),
            });
        });

        let response = relay_session(session).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }
}
