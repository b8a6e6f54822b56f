//! Production statistics: CPU and render-time maxima, skipped-frame trackers
//! and the session log saved back into the production tool.

use crate::protocol::ObsStats;
use chrono::{DateTime, Utc};
use serde::Serialize;

fn clock(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// The highest reading seen since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub value: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkipNote {
    pub frames: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameCounter {
    pub skipped: u64,
    pub total: u64,
    pub last_skip: Option<SkipNote>,
    pub text: String,
}

/// Skipped frames relative to a user-resettable baseline.
#[derive(Debug, Clone)]
pub struct FrameStats {
    name: &'static str,
    last_skip: u64,
    last_total: u64,
    skip_base: u64,
    total_base: u64,
    last_note: Option<SkipNote>,
}

impl FrameStats {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            last_skip: 0,
            last_total: 0,
            skip_base: 0,
            total_base: 0,
            last_note: None,
        }
    }

    pub fn reinitialize(&mut self) {
        *self = Self::new(self.name);
    }

    /// Make the current counts the new zero point.
    pub fn reset(&mut self) {
        self.skip_base = self.last_skip;
        self.total_base = self.last_total;
        self.last_note = None;
    }

    /// Returns the display counter and, when new frames were skipped, the
    /// line to append to the session log.
    pub fn update(&mut self, skipped: u64, total: u64, at: DateTime<Utc>) -> (FrameCounter, Option<String>) {
        let delta = skipped.saturating_sub(self.last_skip);
        let changed = skipped != self.last_skip;
        if changed && delta > 0 {
            self.last_note = Some(SkipNote { frames: delta, at });
        }
        self.last_skip = skipped;
        self.last_total = total;

        let relative_skipped = skipped.saturating_sub(self.skip_base);
        let relative_total = total.saturating_sub(self.total_base);

        let mut text = format!("{}{} of {}", self.name, relative_skipped, relative_total);
        match self.last_note {
            Some(SkipNote { frames: 1, at }) => {
                text.push_str(&format!(". Last skip at {}", clock(at)));
            }
            Some(SkipNote { frames, at }) => {
                text.push_str(&format!(". Last skip: {} frames at {}", frames, clock(at)));
            }
            None => {}
        }

        let counter = FrameCounter {
            skipped: relative_skipped,
            total: relative_total,
            last_skip: self.last_note,
            text: text.clone(),
        };
        (counter, changed.then_some(text))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cpu_usage: f64,
    pub max_cpu: Option<Peak>,
    pub average_frame_render_ms: f64,
    pub max_render: Option<Peak>,
    pub render: FrameCounter,
    pub output: FrameCounter,
    pub lines: Vec<String>,
}

/// Which output a start/stop entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Record,
    Stream,
}

impl OutputKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Record => "Recording",
            Self::Stream => "Streaming",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsTracker {
    max_cpu: Option<Peak>,
    max_render: Option<Peak>,
    render: FrameStats,
    output: FrameStats,
    log: Vec<String>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self {
            max_cpu: None,
            max_render: None,
            render: FrameStats::new("Render skipped "),
            output: FrameStats::new("Output skipped "),
            log: Vec::new(),
        }
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh connection: drop maxima and frame history. The log is kept.
    pub fn reinitialize(&mut self) {
        self.max_cpu = None;
        self.max_render = None;
        self.render.reinitialize();
        self.output.reinitialize();
    }

    /// User reset: drop maxima and rebase the frame counters.
    pub fn reset(&mut self) {
        self.max_cpu = None;
        self.max_render = None;
        self.render.reset();
        self.output.reset();
    }

    pub fn update(&mut self, stats: &ObsStats, at: DateTime<Utc>) -> StatsSnapshot {
        let mut lines = Vec::with_capacity(4);

        let cpu_peak = raise(&mut self.max_cpu, stats.cpu_usage, at);
        let mut cpu_line = format!("CPU usage {:.1}%", stats.cpu_usage);
        if let Some(peak) = self.max_cpu {
            cpu_line.push_str(&format!(". Maximum {:.1}% at {}", peak.value, clock(peak.at)));
        }
        if cpu_peak {
            self.log.push(cpu_line.clone());
        }
        lines.push(cpu_line);

        let render_peak = raise(&mut self.max_render, stats.average_frame_render_time, at);
        let mut render_line = format!("Average frame render {:.1} msec", stats.average_frame_render_time);
        if let Some(peak) = self.max_render {
            render_line.push_str(&format!(". Maximum {:.1} msec at {}", peak.value, clock(peak.at)));
        }
        if render_peak {
            self.log.push(render_line.clone());
        }
        lines.push(render_line);

        let (render, render_log) = self
            .render
            .update(stats.render_skipped_frames, stats.render_total_frames, at);
        let (output, output_log) = self
            .output
            .update(stats.output_skipped_frames, stats.output_total_frames, at);
        self.log.extend(render_log);
        self.log.extend(output_log);
        lines.push(render.text.clone());
        lines.push(output.text.clone());

        StatsSnapshot {
            cpu_usage: stats.cpu_usage,
            max_cpu: self.max_cpu,
            average_frame_render_ms: stats.average_frame_render_time,
            max_render: self.max_render,
            render,
            output,
            lines,
        }
    }

    pub fn log_output(&mut self, kind: OutputKind, started: bool, at: DateTime<Utc>) {
        let verb = if started { "starting" } else { "stopped" };
        self.log.push(format!("{} {} {}", kind.label(), verb, at.to_rfc2822()));
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    /// The last `count` log lines.
    pub fn recent_log(&self, count: usize) -> &[String] {
        let start = self.log.len().saturating_sub(count);
        &self.log[start..]
    }

    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }
}

fn raise(peak: &mut Option<Peak>, value: f64, at: DateTime<Utc>) -> bool {
    let current = peak.map(|p| p.value).unwrap_or(0.0);
    if value > current {
        *peak = Some(Peak { value, at });
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, secs).unwrap()
    }

    fn sample(cpu: f64, render_time: f64, render_skipped: u64, output_skipped: u64) -> ObsStats {
        ObsStats {
            cpu_usage: cpu,
            average_frame_render_time: render_time,
            render_skipped_frames: render_skipped,
            render_total_frames: 1000,
            output_skipped_frames: output_skipped,
            output_total_frames: 900,
        }
    }

    #[test]
    fn frame_stats_notes_single_and_multiple_skips() {
        let mut stats = FrameStats::new("Render skipped ");
        let (counter, line) = stats.update(0, 100, at(0));
        assert_eq!(counter.text, "Render skipped 0 of 100");
        assert!(line.is_none());

        let (counter, line) = stats.update(1, 200, at(1));
        assert_eq!(counter.text, "Render skipped 1 of 200. Last skip at 10:00:01");
        assert_eq!(line.as_deref(), Some("Render skipped 1 of 200. Last skip at 10:00:01"));

        let (counter, _) = stats.update(4, 300, at(2));
        assert_eq!(counter.last_skip.map(|n| n.frames), Some(3));
        assert!(counter.text.ends_with("Last skip: 3 frames at 10:00:02"));

        // Unchanged counts keep the old note and log nothing.
        let (counter, line) = stats.update(4, 400, at(3));
        assert!(line.is_none());
        assert_eq!(counter.skipped, 4);
    }

    #[test]
    fn frame_stats_reset_rebases() {
        let mut stats = FrameStats::new("Output skipped ");
        stats.update(10, 500, at(0));
        stats.reset();
        let (counter, _) = stats.update(12, 600, at(1));
        assert_eq!(counter.skipped, 2);
        assert_eq!(counter.total, 100);

        stats.reinitialize();
        let (counter, _) = stats.update(12, 600, at(2));
        assert_eq!(counter.skipped, 12);
        assert_eq!(counter.total, 600);
    }

    #[test]
    fn recent_log_is_the_tail() {
        let mut tracker = StatsTracker::new();
        for minute in 0..5 {
            tracker.log_output(OutputKind::Record, minute % 2 == 0, at(minute));
        }
        assert_eq!(tracker.recent_log(2), &tracker.log_lines()[3..]);
        assert_eq!(tracker.recent_log(50).len(), 5);
    }

    #[test]
    fn tracker_logs_new_maxima_only() {
        let mut tracker = StatsTracker::new();
        let snap = tracker.update(&sample(12.34, 3.0, 0, 0), at(0));
        assert_eq!(snap.max_cpu.map(|p| p.value), Some(12.34));
        assert_eq!(snap.lines[0], "CPU usage 12.3%. Maximum 12.3% at 10:00:00");
        assert_eq!(tracker.log_lines().len(), 2);

        tracker.update(&sample(5.0, 2.0, 0, 0), at(1));
        assert_eq!(tracker.log_lines().len(), 2);

        tracker.update(&sample(20.0, 2.0, 0, 1), at(2));
        assert_eq!(tracker.log_lines().len(), 4);

        tracker.reset();
        let snap = tracker.update(&sample(1.0, 1.0, 0, 1), at(3));
        assert_eq!(snap.max_cpu.map(|p| p.value), Some(1.0));
        assert_eq!(snap.output.skipped, 0);
    }

    #[test]
    fn output_transitions_are_logged_and_survive_reinitialize() {
        let mut tracker = StatsTracker::new();
        tracker.log_output(OutputKind::Record, true, at(0));
        tracker.log_output(OutputKind::Stream, false, at(5));
        tracker.reinitialize();

        let text = tracker.log_text();
        assert!(text.starts_with("Recording starting "));
        assert!(text.contains("\nStreaming stopped "));
    }
}
