//! Progress accounting for file-by-file transfers.
//!
//! rsync and tar report their own progress; SFTP copies go through here and
//! are summarized in periodic log lines.

use std::time::{Duration, Instant};

/// Snapshot of a running transfer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferProgress {
    /// Unknown while downloading a tree that was never listed up front
    pub total_bytes: Option<u64>,

    pub transferred_bytes: u64,

    pub files_done: usize,

    /// Average speed since start, in bytes/second
    pub bytes_per_second: u64,
}

impl TransferProgress {
    pub fn percent_complete(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some((self.transferred_bytes as f64 / total as f64) * 100.0),
            None => None,
        }
    }

    pub fn eta_seconds(&self) -> Option<u64> {
        let total = self.total_bytes?;
        if self.bytes_per_second == 0 {
            return None;
        }
        Some(total.saturating_sub(self.transferred_bytes) / self.bytes_per_second)
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} files, {} at {}",
            self.files_done,
            format_bytes(self.transferred_bytes),
            format_speed(self.bytes_per_second)
        );
        if let Some(percent) = self.percent_complete() {
            line.push_str(&format!(" ({percent:.0}%"));
            if let Some(eta) = self.eta_seconds() {
                line.push_str(&format!(", {} left", format_duration(eta)));
            }
            line.push(')');
        }
        line
    }
}

/// Counts files and bytes and says when a report is due
pub struct ProgressTracker {
    start_time: Instant,
    last_report: Instant,
    interval: Duration,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_report: now,
            interval,
            progress: TransferProgress {
                total_bytes,
                ..TransferProgress::default()
            },
        }
    }

    /// Record one finished file. Returns a snapshot when the report interval has elapsed.
    pub fn file_done(&mut self, bytes: u64) -> Option<&TransferProgress> {
        self.progress.files_done += 1;
        self.progress.transferred_bytes += bytes;
        self.refresh_speed();

        if self.last_report.elapsed() >= self.interval {
            self.last_report = Instant::now();
            Some(&self.progress)
        } else {
            None
        }
    }

    fn refresh_speed(&mut self) {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.progress.bytes_per_second = (self.progress.transferred_bytes as f64 / elapsed) as u64;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(mut self) -> TransferProgress {
        self.refresh_speed();
        self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_reports_on_interval() {
        let mut tracker = ProgressTracker::new(Some(1000), Duration::ZERO);
        let snapshot = tracker.file_done(250).cloned().unwrap();
        assert_eq!(snapshot.files_done, 1);
        assert_eq!(snapshot.transferred_bytes, 250);
        assert_eq!(snapshot.percent_complete(), Some(25.0));

        let mut quiet = ProgressTracker::new(None, Duration::from_secs(3600));
        assert!(quiet.file_done(10).is_none());
        let done = quiet.finish();
        assert_eq!(done.files_done, 1);
        assert_eq!(done.percent_complete(), None);
    }

    #[test]
    fn test_summary_without_total() {
        let progress = TransferProgress {
            total_bytes: None,
            transferred_bytes: 2048,
            files_done: 3,
            bytes_per_second: 1024,
        };
        assert_eq!(progress.summary(), "3 files, 2.00 KB at 1.00 KB/s");
    }

    #[test]
    fn test_summary_with_eta() {
        let progress = TransferProgress {
            total_bytes: Some(4096),
            transferred_bytes: 1024,
            files_done: 1,
            bytes_per_second: 1024,
        };
        assert_eq!(progress.summary(), "1 files, 1.00 KB at 1.00 KB/s (25%, 3s left)");
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_speed(1024), "1.00 KB/s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
