//! Media metadata derived from a probe pass.

use serde::{Deserialize, Serialize};

use super::frame_rate::parse_frame_rate;

/// Container, codec and timing facts about a source.
///
/// Computed once per request from probing and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    /// Container names as reported by the prober (e.g. `mov,mp4,m4a,3gp,3g2,mj2`).
    pub container_format: String,
    pub duration_seconds: Option<f64>,
    pub total_bytes: Option<u64>,
    /// Overall bitrate in bits per second.
    pub bitrate: Option<u64>,
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    /// H.264 video inside an MP4-family container.
    pub mobile_compatible: bool,
}

/// Whether a codec/container pair plays natively on phones and browsers.
///
/// True iff the video codec is exactly `h264` and the container name
/// contains `mp4`. A missing video stream is simply not compatible.
pub fn is_mobile_compatible(video_codec: Option<&str>, container_format: &str) -> bool {
    video_codec == Some("h264") && container_format.contains("mp4")
}

impl MediaMetadata {
    /// Builds metadata from parsed ffprobe output.
    ///
    /// The first video and first audio stream win; absent streams leave their
    /// fields empty rather than failing.
    pub fn from_ffprobe(output: &FfprobeOutput) -> Self {
        let video = output.first_stream("video");
        let audio = output.first_stream("audio");
        let format = output.format.as_ref();

        let container_format = format
            .and_then(|f| f.format_name.clone())
            .unwrap_or_default();
        let video_codec = video.and_then(|v| v.codec_name.clone());

        let duration_seconds = format
            .and_then(|f| parse_number::<f64>(f.duration.as_deref()))
            .or_else(|| video.and_then(|v| parse_number::<f64>(v.duration.as_deref())))
            .filter(|d| d.is_finite() && *d >= 0.0);

        let frame_rate = video.and_then(|v| {
            v.avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
        });

        Self {
            mobile_compatible: is_mobile_compatible(video_codec.as_deref(), &container_format),
            container_format,
            duration_seconds,
            total_bytes: format.and_then(|f| parse_number(f.size.as_deref())),
            bitrate: format.and_then(|f| parse_number(f.bit_rate.as_deref())),
            video_codec,
            width: video.and_then(|v| v.width),
            height: video.and_then(|v| v.height),
            frame_rate,
            audio_codec: audio.and_then(|a| a.codec_name.clone()),
            sample_rate: audio.and_then(|a| parse_number(a.sample_rate.as_deref())),
            channel_count: audio.and_then(|a| a.channels),
        }
    }

    /// Fills `total_bytes` from the upstream content length when the
    /// container did not report a size.
    pub fn with_fallback_size(mut self, content_length: Option<u64>) -> Self {
        if self.total_bytes.is_none() {
            self.total_bytes = content_length;
        }
        self
    }
}

/// Top-level ffprobe `-print_format json -show_format -show_streams` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

impl FfprobeOutput {
    fn first_stream(&self, codec_type: &str) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(codec_type))
    }
}

/// One entry of ffprobe's `streams` array.
///
/// ffprobe prints most numbers as strings, so they stay strings here and are
/// parsed leniently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
}

/// ffprobe's `format` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MP4_H264: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "24000/1001",
                "avg_frame_rate": "24000/1001",
                "duration": "596.458333"
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 2
            }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "596.474195",
            "size": "158008374",
            "bit_rate": "2119203"
        }
    }"#;

    const MKV_HEVC: &str = r#"{
        "streams": [
            {"codec_name": "hevc", "codec_type": "video", "width": 3840, "height": 2160, "r_frame_rate": "24/1"},
            {"codec_name": "eac3", "codec_type": "audio", "sample_rate": "48000", "channels": 6},
            {"codec_name": "subrip", "codec_type": "subtitle"}
        ],
        "format": {"format_name": "matroska,webm", "duration": "7200.000000"}
    }"#;

    fn parse(json: &str) -> MediaMetadata {
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        MediaMetadata::from_ffprobe(&output)
    }

    #[test]
    fn test_h264_mp4_metadata() {
        let meta = parse(MP4_H264);

        assert_eq!(meta.container_format, "mov,mp4,m4a,3gp,3g2,mj2");
        assert_eq!(meta.video_codec.as_deref(), Some("h264"));
        assert_eq!(meta.width, Some(1920));
        assert_eq!(meta.height, Some(1080));
        assert!((meta.duration_seconds.unwrap() - 596.474195).abs() < 1e-6);
        assert!((meta.frame_rate.unwrap() - 23.976).abs() < 0.001);
        assert_eq!(meta.total_bytes, Some(158008374));
        assert_eq!(meta.bitrate, Some(2119203));
        assert_eq!(meta.audio_codec.as_deref(), Some("aac"));
        assert_eq!(meta.sample_rate, Some(48000));
        assert_eq!(meta.channel_count, Some(2));
        assert!(meta.mobile_compatible);
    }

    #[test]
    fn test_hevc_mkv_is_not_mobile_compatible() {
        let meta = parse(MKV_HEVC);

        assert_eq!(meta.video_codec.as_deref(), Some("hevc"));
        assert_eq!(meta.channel_count, Some(6));
        assert_eq!(meta.total_bytes, None);
        assert_eq!(meta.frame_rate, Some(24.0));
        assert!(!meta.mobile_compatible);
    }

    #[test]
    fn test_missing_video_stream_is_not_an_error() {
        let meta = parse(
            r#"{"streams": [{"codec_name": "mp3", "codec_type": "audio"}],
                "format": {"format_name": "mp4"}}"#,
        );

        assert_eq!(meta.video_codec, None);
        assert_eq!(meta.width, None);
        assert!(!meta.mobile_compatible);
    }

    #[test]
    fn test_mobile_compatibility_truth_table() {
        assert!(is_mobile_compatible(Some("h264"), "mov,mp4,m4a,3gp,3g2,mj2"));
        assert!(is_mobile_compatible(Some("h264"), "mp4"));
        assert!(!is_mobile_compatible(Some("h264"), "matroska,webm"));
        assert!(!is_mobile_compatible(Some("hevc"), "mov,mp4,m4a,3gp,3g2,mj2"));
        assert!(!is_mobile_compatible(Some("H264"), "mp4"));
        assert!(!is_mobile_compatible(None, "mp4"));
        assert!(!is_mobile_compatible(Some("h264"), ""));
    }

    #[test]
    fn test_fallback_size_only_fills_gaps() {
        let meta = parse(MKV_HEVC).with_fallback_size(Some(42));
        assert_eq!(meta.total_bytes, Some(42));

        let meta = parse(MP4_H264).with_fallback_size(Some(42));
        assert_eq!(meta.total_bytes, Some(158008374));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(parse(MP4_H264)).unwrap();
        assert_eq!(json["mobileCompatible"], true);
        assert_eq!(json["containerFormat"], "mov,mp4,m4a,3gp,3g2,mj2");
        assert_eq!(json["width"], 1920);
        assert!(json.get("durationSeconds").is_some());
    }
}
