//! Human-readable record of what each job did.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Destination for job lifecycle messages.
///
/// Recording never fails the caller; sinks swallow their own errors.
pub trait EventSink: Send + Sync {
    fn record(&self, message: &str);
}

/// Appends `[YYYY-MM-DD HH:MM:SS] message` lines to a text file.
pub struct ActivityLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

pub fn format_entry(message: &str) -> String {
    format!("[{}] {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}

impl EventSink for ActivityLog {
    fn record(&self, message: &str) {
        let _guard = self.lock.lock();
        if let Err(e) = self.append(&format_entry(message)) {
            warn!(path = %self.path.display(), error = %e, "Failed to write activity log");
        }
    }
}

/// Forwards messages to the tracing subscriber.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, message: &str) {
        info!(target: "discdup::activity", "{}", message);
    }
}

/// Keeps messages in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn record(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
