//! Parsing of ffmpeg's machine-readable `-progress` output.
//!
//! ffmpeg writes blocks of `key=value` lines terminated by
//! `progress=continue` or `progress=end`. Everything else on the same pipe
//! is a diagnostic message.

use std::time::Duration;

use serde::Serialize;

/// Advisory progress snapshot for one session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Media time written to the output so far.
    pub elapsed: Duration,
    pub bytes_written: Option<u64>,
    /// Encoding speed as a multiple of real time.
    pub speed: Option<f64>,
    /// Share of the source duration already produced, when the duration is known.
    pub percent: Option<f64>,
    pub finished: bool,
}

/// Classification of one line read from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// A progress block was completed.
    Report(Progress),
    /// A `key=value` field that was absorbed into the pending block.
    Field,
    /// Free-form engine output.
    Diagnostic,
}

/// Accumulates `key=value` fields into [`Progress`] reports.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    duration_hint: Option<f64>,
    elapsed: Duration,
    bytes_written: Option<u64>,
    speed: Option<f64>,
}

impl ProgressTracker {
    /// Creates a tracker; `duration_hint` is the source duration in seconds.
    pub fn new(duration_hint: Option<f64>) -> Self {
        Self {
            duration_hint: duration_hint.filter(|d| d.is_finite() && *d > 0.0),
            ..Default::default()
        }
    }

    /// Feeds one line of engine output.
    pub fn feed_line(&mut self, line: &str) -> ProgressLine {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            return ProgressLine::Diagnostic;
        };
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return ProgressLine::Diagnostic;
        }
        let value = value.trim();

        match key {
            // out_time_ms is reported in microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(micros) = value.parse::<u64>() {
                    self.elapsed = Duration::from_micros(micros);
                }
            }
            "out_time" => {
                if let Some(elapsed) = parse_clock(value) {
                    self.elapsed = elapsed;
                }
            }
            "total_size" => {
                if let Ok(bytes) = value.parse::<u64>() {
                    self.bytes_written = Some(bytes);
                }
            }
            "speed" => {
                self.speed = value
                    .trim_end_matches('x')
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite());
            }
            "progress" => return ProgressLine::Report(self.snapshot(value == "end")),
            _ => {}
        }

        ProgressLine::Field
    }

    fn snapshot(&self, finished: bool) -> Progress {
        let percent = self.duration_hint.map(|duration| {
            let done = self.elapsed.as_secs_f64() / duration * 100.0;
            if finished { 100.0 } else { done.min(100.0) }
        });

        Progress {
            elapsed: self.elapsed,
            bytes_written: self.bytes_written,
            speed: self.speed,
            percent,
            finished,
        }
    }
}

// HH:MM:SS.ffffff; ffmpeg prints negative clocks before the first packet
fn parse_clock(value: &str) -> Option<Duration> {
    let mut parts = value.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_block(tracker: &mut ProgressTracker, block: &str) -> Vec<ProgressLine> {
        block.lines().map(|l| tracker.feed_line(l)).collect()
    }

    #[test]
    fn test_progress_block_produces_report() {
        let mut tracker = ProgressTracker::new(Some(10.0));
        let lines = feed_block(
            &mut tracker,
            "frame=120\nfps=60.00\ntotal_size=524288\nout_time_us=2500000\n\
             out_time=00:00:02.500000\nspeed=2.01x\nprogress=continue",
        );

        let report = match lines.last() {
            Some(ProgressLine::Report(p)) => *p,
            other => panic!("expected report, got {other:?}"),
        };
        assert!(lines[..lines.len() - 1].iter().all(|l| *l == ProgressLine::Field));
        assert_eq!(report.elapsed, Duration::from_millis(2500));
        assert_eq!(report.bytes_written, Some(524_288));
        assert_eq!(report.speed, Some(2.01));
        assert_eq!(report.percent, Some(25.0));
        assert!(!report.finished);
    }

    #[test]
    fn test_end_block_is_finished() {
        let mut tracker = ProgressTracker::new(Some(10.0));
        tracker.feed_line("out_time_ms=9980000");

        match tracker.feed_line("progress=end") {
            ProgressLine::Report(p) => {
                assert!(p.finished);
                assert_eq!(p.percent, Some(100.0));
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_duration_has_no_percent() {
        let mut tracker = ProgressTracker::new(None);
        tracker.feed_line("out_time=00:01:30.000000");

        match tracker.feed_line("progress=continue") {
            ProgressLine::Report(p) => {
                assert_eq!(p.elapsed, Duration::from_secs(90));
                assert_eq!(p.percent, None);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_na_values_are_ignored() {
        let mut tracker = ProgressTracker::new(Some(60.0));
        tracker.feed_line("out_time_us=N/A");
        tracker.feed_line("out_time=-577014:32:22.775808");
        tracker.feed_line("speed=N/A");

        match tracker.feed_line("progress=continue") {
            ProgressLine::Report(p) => {
                assert_eq!(p.elapsed, Duration::ZERO);
                assert_eq!(p.speed, None);
                assert_eq!(p.percent, Some(0.0));
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn test_diagnostics_are_not_fields() {
        let mut tracker = ProgressTracker::default();

        assert_eq!(
            tracker.feed_line("pipe:0: Invalid data found when processing input"),
            ProgressLine::Diagnostic
        );
        assert_eq!(
            tracker.feed_line("[h264 @ 0x55d4] mmco: unref short failure, poc=3"),
            ProgressLine::Diagnostic
        );
        assert_eq!(tracker.feed_line(""), ProgressLine::Diagnostic);
    }

    #[test]
    fn test_percent_is_clamped() {
        let mut tracker = ProgressTracker::new(Some(1.0));
        tracker.feed_line("out_time_us=5000000");

        match tracker.feed_line("progress=continue") {
            ProgressLine::Report(p) => assert_eq!(p.percent, Some(100.0)),
            other => panic!("expected report, got {other:?}"),
        }
    }
}
