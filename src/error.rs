//! Error types for copy, transcode and job operations.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors that end a copy before it completes.
///
/// Per-file failures during a tree copy are not represented here; they are
/// collected in [`crate::core::transfer_engine::TransferResult::failures`].
#[derive(Error, Debug)]
pub enum CopyError {
    /// The OS refused to open the source. Re-running with elevated
    /// privileges or switching to a tree copy usually helps.
    #[error("Permission denied reading {}. Try running as administrator/root, or copy as a folder instead", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source device or directory does not exist.
    #[error("Source not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The drive exists but holds no readable disc.
    #[error("No disc in drive: {}", path.display())]
    NoMedium {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure, with what was being attempted.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The written data did not match what was read.
    #[error("{0}")]
    VerificationFailed(String),
}

impl CopyError {
    /// Classify an error raised while opening a source path.
    pub fn from_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => CopyError::AccessDenied { path, source },
            io::ErrorKind::NotFound => CopyError::NotFound { path, source },
            _ if is_no_medium(&source) => CopyError::NoMedium { path, source },
            _ => CopyError::Io {
                context: format!("Failed to open {}", path.display()),
                source,
            },
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CopyError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, CopyError::AccessDenied { .. })
    }
}

#[cfg(target_os = "linux")]
fn is_no_medium(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::ENOMEDIUM) | Some(libc::ENXIO) | Some(libc::ENODEV)
    )
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_no_medium(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::ENXIO) | Some(libc::ENODEV))
}

#[cfg(not(unix))]
fn is_no_medium(_error: &io::Error) -> bool {
    false
}

/// Errors from the external encoder step.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Encoder '{0}' not found on this system")]
    EncoderNotFound(String),

    #[error("No VOB files found under {}", .0.display())]
    NoVideoObjects(PathBuf),

    #[error("Encoder exited with {status}:\n{stderr}")]
    EncoderFailed { status: ExitStatus, stderr: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TranscodeError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TranscodeError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors from starting or joining a job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Another copy job is already running ({0})")]
    Busy(String),

    /// The worker thread panicked or was aborted.
    #[error("Copy worker for job {job_id} stopped unexpectedly: {message}")]
    WorkerFailed { job_id: String, message: String },
}
