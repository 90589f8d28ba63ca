//! Round trips through the real ffmpeg/ffprobe binaries.
//!
//! Every test returns early when the tools are not on `PATH`.

use std::path::Path;
use std::process::Command;

use axum::Router;
use axum::http::{StatusCode, header};
use tempfile::TempDir;
use tidecast_core::{RelayService, TidecastConfig};
use tidecast_web::{AppState, build_router};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::{body_bytes, body_json};

fn media_tools_installed() -> bool {
    let found = which::which("ffmpeg").is_ok() && which::which("ffprobe").is_ok();
    if !found {
        eprintln!("ffmpeg/ffprobe not found, skipping");
    }
    found
}

fn has_encoder(name: &str) -> bool {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(name))
        .unwrap_or(false)
}

/// Test pattern and tone in MPEG-4 Part 2, which phones will not play
/// natively. Without `faststart` the `moov` index is written after `mdat`,
/// the way most cameras record.
fn render_clip(dir: &Path, seconds: u32, faststart: bool) -> Vec<u8> {
    let output = dir.join("clip.mp4");
    let mut command = Command::new("ffmpeg");
    command
        .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={seconds}:size=320x240:rate=25"))
        .args(["-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=440:duration={seconds}"))
        .args(["-c:v", "mpeg4", "-q:v", "2", "-c:a", "aac", "-shortest"]);
    if faststart {
        command.args(["-movflags", "+faststart"]);
    }
    let status = command.arg("-y").arg(&output).status().unwrap();
    assert!(status.success(), "ffmpeg could not render the test clip");
    std::fs::read(output).unwrap()
}

fn box_offset(body: &[u8], kind: &[u8; 4]) -> Option<usize> {
    body.windows(4).position(|w| w == kind)
}

async fn serve_clip(body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x5a; 64 * 1024]))
        .mount(&server)
        .await;
    server
}

fn router() -> Router {
    let service = RelayService::new(TidecastConfig::for_testing()).unwrap();
    build_router(AppState::new(service))
}

async fn get(router: &Router, uri: String) -> axum::http::Response<axum::body::Body> {
    let request = axum::http::Request::get(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

fn contains_box(body: &[u8], kind: &[u8; 4]) -> bool {
    box_offset(body, kind).is_some()
}

#[tokio::test]
async fn test_info_probes_real_file() {
    if !media_tools_installed() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let clip = render_clip(dir.path(), 2, true);
    let clip_len = clip.len();
    let server = serve_clip(clip).await;

    let response = get(&router(), format!("/info?url={}/clip.mp4", server.uri())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["videoCodec"], "mpeg4");
    assert_eq!(body["audioCodec"], "aac");
    assert_eq!(body["width"], 320);
    assert_eq!(body["height"], 240);
    assert_eq!(body["mobileCompatible"], false);
    assert!(body["containerFormat"].as_str().unwrap().contains("mp4"));

    let duration = body["durationSeconds"].as_f64().unwrap();
    assert!((duration - 2.0).abs() < 0.2, "duration was {duration}");
    let total = body["totalBytes"].as_u64().unwrap();
    assert!(total > 0 && total <= clip_len as u64, "totalBytes was {total}");
}

#[tokio::test]
async fn test_info_reads_index_after_media_data() {
    if !media_tools_installed() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let clip = render_clip(dir.path(), 12, false);
    let config = TidecastConfig::for_testing();
    assert!(
        clip.len() > config.probe.head_bytes,
        "clip of {} bytes fits in the transcode head",
        clip.len()
    );
    let moov = box_offset(&clip, b"moov").unwrap();
    let mdat = box_offset(&clip, b"mdat").unwrap();
    assert!(moov > mdat, "moov was written before mdat");
    let server = serve_clip(clip).await;

    let response = get(&router(), format!("/info?url={}/clip.mp4", server.uri())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["videoCodec"], "mpeg4");
    assert_eq!(body["audioCodec"], "aac");
    assert_eq!(body["width"], 320);
    let duration = body["durationSeconds"].as_f64().unwrap();
    assert!((duration - 12.0).abs() < 0.5, "duration was {duration}");
}

#[tokio::test]
async fn test_audio_remux_produces_fragmented_mp4() {
    if !media_tools_installed() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let server = serve_clip(render_clip(dir.path(), 2, true)).await;

    let response = get(
        &router(),
        format!("/audio-remux?url={}/clip.mp4", server.uri()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");

    let body = body_bytes(response).await;
    assert!(contains_box(&body, b"ftyp"));
    assert!(contains_box(&body, b"moof"));
}

#[tokio::test]
async fn test_transcode_reencodes_to_h264() {
    if !media_tools_installed() || !has_encoder("libx264") {
        return;
    }
    let dir = TempDir::new().unwrap();
    let server = serve_clip(render_clip(dir.path(), 2, true)).await;

    let response = get(&router(), format!("/transcode?url={}/clip.mp4", server.uri())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    assert!(contains_box(&body, b"ftyp"));
    assert!(contains_box(&body, b"moof"));
    assert!(contains_box(&body, b"avcC"));
}

#[tokio::test]
async fn test_unreadable_input_is_transcode_failure() {
    if !media_tools_installed() {
        return;
    }
    let server = serve_clip(Vec::new()).await;

    let response = get(
        &router(),
        format!("/transcode?url={}/garbage.bin", server.uri()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "transcode_failed");
}
