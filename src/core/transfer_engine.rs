use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::progress::{ProgressSample, format_bytes};
use crate::error::CopyError;

pub mod raw_image;
pub mod tree_copy;

pub use raw_image::RawImageEngine;
pub use tree_copy::TreeCopyEngine;

/// Raw image read size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Bit-for-bit image of the raw device
    Image,
    /// File-by-file copy of the mounted filesystem
    Tree,
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyMode::Image => f.write_str("image"),
            CopyMode::Tree => f.write_str("tree"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Completed,
    /// Stopped on request. Partial output is left in place.
    Cancelled,
}

/// A file or directory that could not be copied during a tree copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub relative_path: PathBuf,
    pub message: String,
}

/// BLAKE3 hash of data as it was read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// Relative to the destination root; empty for a raw image.
    pub relative_path: PathBuf,
    pub hash: [u8; 32],
    pub size: u64,
}

/// Updates sent by an engine while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    InProgress(ProgressSample),
    FileFailed(FileFailure),
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub outcome: CopyOutcome,
    pub bytes_copied: u64,
    pub total_bytes: Option<u64>,
    /// Tree copies only.
    pub files_copied: Option<u64>,
    pub total_files: Option<u64>,
    pub failures: Vec<FileFailure>,
    pub duration: Duration,
    /// Present when the engine hashed data for verification.
    pub file_hashes: Option<Vec<FileHash>>,
}

impl TransferResult {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == CopyOutcome::Cancelled
    }

    /// One-line description for logs and the activity log.
    pub fn summary(&self) -> String {
        let verb = match self.outcome {
            CopyOutcome::Completed => "Copied",
            CopyOutcome::Cancelled => "Cancelled after",
        };
        let mut summary = format!("{} {}", verb, format_bytes(self.bytes_copied));
        if let (Some(done), Some(total)) = (self.files_copied, self.total_files) {
            summary.push_str(&format!(" ({}/{} files)", done, total));
        }
        if !self.failures.is_empty() {
            summary.push_str(&format!(", {} failed", self.failures.len()));
        }
        summary
    }
}

/// A copy strategy run on the job's worker thread.
///
/// Implementations check `cancel` between units of work and report through
/// `on_status` after each unit. They block; callers run them off the
/// async runtime.
pub trait TransferEngine: Send + Sync {
    fn transfer(
        &self,
        req: &TransferRequest,
        cancel: &CancellationToken,
        on_status: &mut dyn FnMut(TransferStatus),
    ) -> Result<TransferResult, CopyError>;
}

pub fn create_engine(mode: CopyMode, config: &AppConfig) -> Box<dyn TransferEngine> {
    match mode {
        CopyMode::Image => Box::new(RawImageEngine {
            block_size: config.block_size,
            verify: config.verify,
            sync_file: config.sync_files,
        }),
        CopyMode::Tree => Box::new(TreeCopyEngine {
            preserve_metadata: config.preserve_metadata,
            sync_files: config.sync_files,
            verify: config.verify,
        }),
    }
}
