use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::core::transfer_engine::{CopyMode, TransferStatus};

/// One disc copy, optionally followed by a transcode of the copied tree.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub id: String,
    /// Raw device for image copies, mounted directory for tree copies.
    pub source: PathBuf,
    /// Image file or destination directory.
    pub destination: PathBuf,
    pub mode: CopyMode,
    pub transcode: Option<TranscodeRequest>,
}

impl CopyJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, mode: CopyMode) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            source: source.into(),
            destination: destination.into(),
            mode,
            transcode: None,
        }
    }

    pub fn with_transcode(mut self, request: TranscodeRequest) -> Self {
        self.transcode = Some(request);
        self
    }
}

/// Follow-up conversion of the copied VOB files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// Defaults to the configured file name inside the destination.
    pub output: Option<PathBuf>,
    /// Copy streams instead of re-encoding.
    pub stream_copy: bool,
}

/// Updates delivered to the foreground, in the order the worker produced
/// them.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        job_id: String,
        mode: CopyMode,
        source: PathBuf,
        destination: PathBuf,
    },
    Transfer(TransferStatus),
    TranscodeStarted {
        output: PathBuf,
        files: usize,
    },
    /// Encoder position in the output.
    TranscodeProgress(Duration),
}
