//! ffmpeg command line for streaming transcodes.

use crate::config::EncoderSettings;
use crate::policy::{AudioAction, TranscodeStrategy, VideoAction};

/// Builds the ffmpeg arguments for one strategy.
///
/// Input is read from stdin and fragmented MP4 is written to stdout:
/// fragments start on keyframes and the `moov` box is written up front
/// without sample tables, so playback can begin with the first fragment.
/// `faststart` is not used; it needs a seekable output.
pub fn build_ffmpeg_args(strategy: &TranscodeStrategy, encoder: &EncoderSettings) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:2",
        "-i",
        "pipe:0",
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    match strategy.video {
        VideoAction::Copy => {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        }
        VideoAction::ReencodeH264 => {
            let keyframes = encoder.keyframe_interval.to_string();
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                encoder.video_preset.clone(),
                "-crf".to_string(),
                encoder.crf.to_string(),
                "-maxrate".to_string(),
                format!("{}k", encoder.max_video_bitrate_kbps),
                "-bufsize".to_string(),
                format!("{}k", encoder.buffer_size_kbps),
                "-g".to_string(),
                keyframes.clone(),
                "-keyint_min".to_string(),
                keyframes,
                "-sc_threshold".to_string(),
                "0".to_string(),
                "-pix_fmt".to_string(),
                encoder.pixel_format.clone(),
            ]);
        }
    }

    match strategy.audio {
        AudioAction::ReencodeAac => {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                format!("{}k", encoder.audio_bitrate_kbps),
            ]);
        }
    }

    args.extend([
        "-avoid_negative_ts".to_string(),
        "make_zero".to_string(),
        "-max_muxing_queue_size".to_string(),
        encoder.max_muxing_queue_size.to_string(),
        "-movflags".to_string(),
        "frag_keyframe+empty_moov+default_base_moof".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        "pipe:1".to_string(),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(video: VideoAction) -> TranscodeStrategy {
        TranscodeStrategy {
            video,
            audio: AudioAction::ReencodeAac,
            rejection: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let at = args.iter().position(|a| a == flag)?;
        args.get(at + 1).map(String::as_str)
    }

    #[test]
    fn test_copy_path_keeps_video() {
        let args = build_ffmpeg_args(&strategy(VideoAction::Copy), &EncoderSettings::default());

        assert_eq!(value_after(&args, "-c:v"), Some("copy"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
        assert!(!args.contains(&"libx264".to_string()));
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn test_reencode_path_settings() {
        let args = build_ffmpeg_args(
            &strategy(VideoAction::ReencodeH264),
            &EncoderSettings::default(),
        );

        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("ultrafast"));
        assert_eq!(value_after(&args, "-crf"), Some("23"));
        assert_eq!(value_after(&args, "-maxrate"), Some("5000k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("10000k"));
        assert_eq!(value_after(&args, "-g"), Some("48"));
        assert_eq!(value_after(&args, "-sc_threshold"), Some("0"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
    }

    #[test]
    fn test_streaming_container_flags() {
        let args = build_ffmpeg_args(&strategy(VideoAction::Copy), &EncoderSettings::default());

        assert_eq!(value_after(&args, "-i"), Some("pipe:0"));
        assert_eq!(value_after(&args, "-progress"), Some("pipe:2"));
        assert_eq!(
            value_after(&args, "-movflags"),
            Some("frag_keyframe+empty_moov+default_base_moof")
        );
        assert_eq!(value_after(&args, "-avoid_negative_ts"), Some("make_zero"));
        assert_eq!(value_after(&args, "-max_muxing_queue_size"), Some("1024"));
        assert_eq!(value_after(&args, "-f"), Some("mp4"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_encoder_settings_flow_through() {
        let encoder = EncoderSettings {
            video_preset: "veryfast".to_string(),
            crf: 28,
            audio_bitrate_kbps: 128,
            ..EncoderSettings::default()
        };
        let args = build_ffmpeg_args(&strategy(VideoAction::ReencodeH264), &encoder);

        assert_eq!(value_after(&args, "-preset"), Some("veryfast"));
        assert_eq!(value_after(&args, "-crf"), Some("28"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
    }
}
