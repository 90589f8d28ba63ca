use axum::http::{StatusCode, header};
use tidecast_core::policy::{AudioAction, BYTES_PER_MB, VideoAction};
use tidecast_core::relay::SESSION_HEADER;
use tidecast_core::transcode::{SimulatedBehavior, SimulatedEngine};
use tidecast_core::TidecastConfig;

use crate::support::{Harness, Upstream, body_bytes, body_json, metadata, source_url};

const MOVIE: &[u8] = b"pretend this is a whole movie, one chunk at a time";

#[tokio::test]
async fn test_missing_url_is_rejected_on_every_endpoint() {
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));

    for path in ["/transcode", "/audio-remux", "/info", "/transcode?url=", "/info?url=%20"] {
        let response = harness.get(path).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json",
            "{path}"
        );

        let body = body_json(response).await;
        assert_eq!(body["error"], "missing_parameter", "{path}");
        assert!(body["message"].as_str().unwrap().contains("url"), "{path}");
    }

    assert_eq!(harness.fetcher.opened(), 0);
    assert_eq!(harness.engine.started_sessions(), 0);
}

#[tokio::test]
async fn test_unsupported_scheme_is_rejected() {
    let harness = Harness::new(None);

    let response = harness.get("/transcode?url=ftp://files.test/movie.mkv").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_parameter");
    assert_eq!(harness.fetcher.opened(), 0);
}

#[tokio::test]
async fn test_oversized_source_is_rejected_before_transcoding() {
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));
    let url = source_url("huge.mkv");
    harness.fetcher.add(
        &url,
        Upstream::fixed(MOVIE, 8).with_content_length(Some(31_000 * BYTES_PER_MB)),
    );

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body = body_json(response).await;
    assert_eq!(body["error"], "source_too_large");
    assert_eq!(body["sizeMb"], 31_000);
    assert_eq!(body["limitMb"], 30_000);

    assert_eq!(harness.fetcher.opened(), 1);
    assert_eq!(harness.fetcher.live_connections(), 0);
    assert_eq!(harness.prober.calls(), 0);
    assert_eq!(harness.engine.started_sessions(), 0);
}

#[tokio::test]
async fn test_source_exactly_at_limit_is_accepted() {
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));
    let url = source_url("limit.mp4");
    harness.fetcher.add(
        &url,
        Upstream::fixed(MOVIE, 8).with_content_length(Some(30_000 * BYTES_PER_MB)),
    );

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.engine.started_sessions(), 1);
}

#[tokio::test]
async fn test_compatible_source_copies_video() {
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));
    let url = source_url("phone.mp4");
    harness.fetcher.add(&url, Upstream::fixed(MOVIE, 8));

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert!(response.headers().contains_key(SESSION_HEADER));
    assert_eq!(body_bytes(response).await.as_ref(), MOVIE);

    let plans = harness.engine.recorded_plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].strategy.video, VideoAction::Copy);
    assert_eq!(plans[0].strategy.audio, AudioAction::ReencodeAac);
    assert_eq!(plans[0].duration_hint, Some(120.0));
}

#[tokio::test]
async fn test_incompatible_codec_or_container_is_reencoded() {
    for (codec, container) in [("hevc", "matroska,webm"), ("h264", "matroska,webm"), ("hevc", "mov,mp4,m4a,3gp,3g2,mj2")] {
        let harness = Harness::new(Some(metadata(codec, container)));
        let url = source_url("movie.mkv");
        harness.fetcher.add(&url, Upstream::fixed(MOVIE, 8));

        let response = harness.get(&format!("/transcode?url={url}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);

        let plans = harness.engine.recorded_plans();
        assert_eq!(
            plans[0].strategy.video,
            VideoAction::ReencodeH264,
            "{codec} in {container}"
        );
    }
}

#[tokio::test]
async fn test_audio_remux_ignores_size_and_codec() {
    let harness = Harness::new(Some(metadata("hevc", "matroska,webm")));
    let url = source_url("huge.mkv");
    harness.fetcher.add(
        &url,
        Upstream::fixed(MOVIE, 8).with_content_length(Some(100_000 * BYTES_PER_MB)),
    );

    let response = harness.get(&format!("/audio-remux?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), MOVIE);

    let plans = harness.engine.recorded_plans();
    assert_eq!(plans[0].strategy.video, VideoAction::Copy);
    assert_eq!(plans[0].strategy.audio, AudioAction::ReencodeAac);
    assert_eq!(harness.prober.calls(), 0);
}

#[tokio::test]
async fn test_info_reports_metadata() {
    let harness = Harness::new(Some(metadata("h264", "mov,mp4,m4a,3gp,3g2,mj2")));
    let url = source_url("phone.mp4");
    harness.fetcher.add(&url, Upstream::fixed(MOVIE, 8));

    let response = harness.get(&format!("/info?url={url}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["mobileCompatible"], true);
    assert_eq!(body["videoCodec"], "h264");
    assert_eq!(body["width"], 1920);
    assert_eq!(body["durationSeconds"], 120.0);
    assert_eq!(body["totalBytes"], MOVIE.len());

    assert_eq!(harness.engine.started_sessions(), 0);
    assert_eq!(harness.fetcher.chunks_pulled(), 1);
    assert_eq!(harness.fetcher.live_connections(), 0);
}

#[tokio::test]
async fn test_info_probe_failure() {
    let harness = Harness::new(None);
    let url = source_url("garbage.bin");
    harness.fetcher.add(&url, Upstream::fixed(b"not a container", 4));

    let response = harness.get(&format!("/info?url={url}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "probe_failed");
}

#[tokio::test]
async fn test_upstream_status_is_surfaced() {
    let harness = Harness::new(None);
    let url = source_url("gone.mp4");
    harness.fetcher.add(&url, Upstream::status(404));

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"], "upstream_http_error");
    assert_eq!(body["upstreamStatus"], 404);
    assert_eq!(harness.engine.started_sessions(), 0);
}

#[tokio::test]
async fn test_unreachable_upstream() {
    let harness = Harness::new(None);

    let response = harness
        .get(&format!("/audio-remux?url={}", source_url("nowhere.mp4")))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "upstream_unavailable");
}

#[tokio::test]
async fn test_engine_failure_before_output() {
    let harness = Harness::with(
        TidecastConfig::for_testing(),
        Some(metadata("hevc", "matroska,webm")),
        SimulatedEngine::new(SimulatedBehavior::FailBeforeOutput {
            reason: "Unknown encoder 'libx264'".to_string(),
        }),
    );
    let url = source_url("movie.mkv");
    harness.fetcher.add(&url, Upstream::fixed(MOVIE, 8));

    let response = harness.get(&format!("/transcode?url={url}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"], "transcode_failed");
    assert!(body["message"].as_str().unwrap().contains("libx264"));
}

#[tokio::test]
async fn test_head_answers_without_fetching_or_transcoding() {
    let harness = Harness::new(Some(metadata("hevc", "matroska,webm")));
    let url = source_url("movie.mkv");
    harness.fetcher.add(&url, Upstream::endless(MOVIE));

    for endpoint in ["/transcode", "/audio-remux"] {
        let response = harness.head(&format!("{endpoint}?url={url}")).await;
        assert_eq!(response.status(), StatusCode::OK, "{endpoint}");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert!(body_bytes(response).await.is_empty());
    }

    let response = harness.head("/transcode").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(harness.fetcher.opened(), 0);
    assert_eq!(harness.prober.calls(), 0);
    assert_eq!(harness.engine.started_sessions(), 0);
}

#[tokio::test]
async fn test_health_reports_engine() {
    let harness = Harness::with(
        TidecastConfig::for_testing(),
        None,
        SimulatedEngine::unavailable(),
    );

    let response = harness.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["service"], "tidecast");
    assert_eq!(body["engine"], "simulated");
    assert_eq!(body["engineAvailable"], false);
}
