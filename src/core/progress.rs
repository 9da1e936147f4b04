//! Progress samples and their human-facing projection.
//!
//! Engines emit a [`ProgressSample`] after every unit of work. The
//! foreground turns samples into a [`ProgressReport`] whenever it redraws;
//! nothing here rate-limits, so samples may arrive as often as engines like.
//!
//! [`ProgressTracker`] keeps only the most recent sample so status queries
//! never have to drain the job's event channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Elapsed time is floored to this so the first sample never divides by zero.
const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Raw counters from a running copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSample {
    pub bytes_copied: u64,
    /// `None` when the source size could not be determined.
    pub total_bytes: Option<u64>,
    pub files_copied: Option<u64>,
    pub total_files: Option<u64>,
    pub elapsed: Duration,
}

/// Percentage, throughput and ETA derived from a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    /// In `[0, 100]`, `None` when the total is unknown.
    pub percent: Option<f64>,
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
    pub bytes_copied: u64,
    pub total_bytes: Option<u64>,
    pub files_copied: Option<u64>,
    pub total_files: Option<u64>,
}

impl ProgressReport {
    pub fn from_sample(sample: &ProgressSample) -> Self {
        let elapsed = sample.elapsed.max(MIN_ELAPSED).as_secs_f64();
        let bytes_per_sec = sample.bytes_copied as f64 / elapsed;

        let percent = sample.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (sample.bytes_copied as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
            }
        });

        let eta = match sample.total_bytes {
            Some(total) if bytes_per_sec > 0.0 => {
                let remaining = total.saturating_sub(sample.bytes_copied);
                Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
            }
            _ => None,
        };

        Self {
            percent,
            bytes_per_sec,
            eta,
            bytes_copied: sample.bytes_copied,
            total_bytes: sample.total_bytes,
            files_copied: sample.files_copied,
            total_files: sample.total_files,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(percent) = self.percent {
            write!(f, "{:.0}% ", percent.floor())?;
        }
        write!(f, "{}", format_bytes(self.bytes_copied))?;
        match self.total_bytes {
            Some(total) => write!(f, " / {}", format_bytes(total))?,
            None => write!(f, " (total unknown)")?,
        }
        write!(f, ", {}/s", format_bytes(self.bytes_per_sec as u64))?;
        if let Some(eta) = self.eta {
            write!(f, ", ETA {}", format_duration(eta.as_secs()))?;
        }
        if let (Some(done), Some(total)) = (self.files_copied, self.total_files) {
            write!(f, " ({done}/{total} files)")?;
        }
        Ok(())
    }
}

/// Holds the most recent sample of the active job.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<Option<ProgressSample>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample from a worker thread.
    ///
    /// Must not be called from within an async context.
    pub fn update_blocking(&self, sample: ProgressSample) {
        *self.inner.blocking_write() = Some(sample);
    }

    /// Forget the previous job's sample. Same threading rule as
    /// [`update_blocking`](Self::update_blocking).
    pub fn clear_blocking(&self) {
        *self.inner.blocking_write() = None;
    }

    pub async fn latest(&self) -> Option<ProgressSample> {
        *self.inner.read().await
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
