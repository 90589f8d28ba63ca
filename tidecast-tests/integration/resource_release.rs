use std::time::Duration;

use axum::http::StatusCode;
use futures::StreamExt;
use tidecast_core::TidecastConfig;
use tidecast_core::relay::SESSION_HEADER;
use tidecast_core::transcode::{SimulatedBehavior, SimulatedEngine};

use crate::support::{
    CapturedLogs, Harness, Upstream, body_bytes, eventually, metadata, source_url,
};

const CHUNK: &[u8] = &[0x42; 1024];

#[tokio::test]
async fn test_client_disconnect_releases_session_and_upstream() {
    let harness = Harness::new(Some(metadata("hevc", "matroska,webm")));
    let url = source_url("live.mkv");
    harness.fetcher.add(&url, Upstream::endless(CHUNK));

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.engine.active_sessions(), 1);
    assert_eq!(harness.fetcher.live_connections(), 1);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(body);

    let engine = harness.engine.clone();
    eventually("session release", move || engine.active_sessions() == 0).await;
    let fetcher = harness.fetcher.clone();
    eventually("upstream release", move || fetcher.live_connections() == 0).await;
}

#[tokio::test]
async fn test_slow_client_bounds_upstream_reads() {
    let harness = Harness::new(None);
    let url = source_url("live.mkv");
    harness.fetcher.add(&url, Upstream::endless(CHUNK));

    let response = harness.get(&format!("/audio-remux?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The client never reads; the pipeline must stall instead of buffering
    tokio::time::sleep(Duration::from_millis(200)).await;
    let pulled = harness.fetcher.chunks_pulled();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(pulled <= 16, "pulled {pulled} chunks without a reader");
    assert_eq!(harness.fetcher.chunks_pulled(), pulled);

    drop(response);
    let fetcher = harness.fetcher.clone();
    eventually("upstream release", move || fetcher.live_connections() == 0).await;
}

#[tokio::test]
async fn test_engine_failure_mid_stream_releases_upstream() {
    let harness = Harness::with(
        TidecastConfig::for_testing(),
        None,
        SimulatedEngine::new(SimulatedBehavior::FailAfter {
            bytes: 4 * CHUNK.len(),
            reason: "corrupt frame".to_string(),
        }),
    );
    let url = source_url("live.mkv");
    harness.fetcher.add(&url, Upstream::endless(CHUNK));

    let response = harness.get(&format!("/audio-remux?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut received = 0;
    let mut aborted = false;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => received += chunk.len(),
            Err(_) => {
                aborted = true;
                break;
            }
        }
    }

    assert!(aborted, "body ended cleanly after engine failure");
    assert!(received >= CHUNK.len());
    drop(body);

    let fetcher = harness.fetcher.clone();
    eventually("upstream release", move || fetcher.live_connections() == 0).await;
    let engine = harness.engine.clone();
    eventually("session release", move || engine.active_sessions() == 0).await;
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let (logs, _guard) = CapturedLogs::install();
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));
    let first_url = source_url("first.mp4");
    let second_url = source_url("second.mp4");
    harness
        .fetcher
        .add(&first_url, Upstream::fixed(b"first source bytes", 3));
    harness
        .fetcher
        .add(&second_url, Upstream::fixed(b"the second source, longer", 5));

    let first_uri = format!("/transcode?url={first_url}");
    let second_uri = format!("/transcode?url={second_url}");
    let (first, second) = tokio::join!(harness.get(&first_uri), harness.get(&second_uri));

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    let first_id = first.headers()[SESSION_HEADER].to_str().unwrap().to_string();
    let second_id = second.headers()[SESSION_HEADER].to_str().unwrap().to_string();
    assert_ne!(first_id, second_id);

    let (first_body, second_body) = tokio::join!(body_bytes(first), body_bytes(second));
    assert_eq!(first_body.as_ref(), b"first source bytes");
    assert_eq!(second_body.as_ref(), b"the second source, longer");
    assert_eq!(harness.engine.started_sessions(), 2);

    let completed = logs.clone();
    eventually("both streams completed", move || {
        completed
            .lines()
            .iter()
            .filter(|line| line.contains("Stream completed"))
            .count()
            == 2
    })
    .await;

    // Every session-scoped line names exactly one session, and the right source
    let sessions = [(&first_id, "first.mp4"), (&second_id, "second.mp4")];
    let lines = logs.lines();
    let session_lines: Vec<&String> = lines
        .iter()
        .filter(|line| {
            ["Relay progress", "Stream completed", "Simulated session finished"]
                .iter()
                .any(|message| line.contains(message))
        })
        .collect();

    for line in &session_lines {
        let owners: Vec<_> = sessions
            .iter()
            .filter(|(id, _)| line.contains(id.as_str()))
            .collect();
        assert_eq!(owners.len(), 1, "{line}");
        assert!(line.contains(owners[0].1), "{line}");
    }
    for (id, _) in sessions {
        assert!(
            session_lines
                .iter()
                .any(|line| line.contains("Relay progress") && line.contains(id.as_str())),
            "no progress logged for session {id}"
        );
    }
}
