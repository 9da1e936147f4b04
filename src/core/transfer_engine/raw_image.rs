//! Bit-for-bit copy of a raw device into an image file.

use crate::core::progress::ProgressSample;
use crate::core::transfer_engine::{
    CopyOutcome, DEFAULT_BLOCK_SIZE, FileHash, TransferEngine, TransferRequest, TransferResult,
    TransferStatus,
};
use crate::core::verifier::verify_image;
use crate::error::CopyError;
use crate::logging::LogThrottle;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

#[cfg(target_os = "linux")]
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Options for a raw image copy.
#[derive(Debug, Clone)]
pub struct RawImageOptions {
    pub block_size: usize,
    /// Hash the stream while copying and re-read the image to check it.
    pub verify: bool,
    /// fsync the image before returning.
    pub sync_file: bool,
}

impl Default for RawImageOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            verify: false,
            sync_file: false,
        }
    }
}

/// Transfer engine producing a disc image from a raw device.
#[derive(Debug, Clone)]
pub struct RawImageEngine {
    pub block_size: usize,
    pub verify: bool,
    pub sync_file: bool,
}

impl Default for RawImageEngine {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            verify: false,
            sync_file: false,
        }
    }
}

impl TransferEngine for RawImageEngine {
    fn transfer(
        &self,
        req: &TransferRequest,
        cancel: &CancellationToken,
        on_status: &mut dyn FnMut(TransferStatus),
    ) -> Result<TransferResult, CopyError> {
        let options = RawImageOptions {
            block_size: self.block_size,
            verify: self.verify,
            sync_file: self.sync_file,
        };
        copy_image(&req.source, &req.destination, &options, cancel, on_status)
    }
}

/// Copy `source` to `destination` block by block until end of stream.
///
/// The cancellation token is checked before every block read. A cancelled
/// copy returns [`CopyOutcome::Cancelled`] and leaves the partial image on
/// disk. `on_status` is called after every block written.
///
/// # Errors
///
/// - [`CopyError::AccessDenied`] if the OS refuses to open the source.
/// - [`CopyError::NotFound`] / [`CopyError::NoMedium`] if there is nothing
///   to read.
/// - [`CopyError::Io`] for any failure creating, reading or writing.
/// - [`CopyError::VerificationFailed`] if `verify` is set and the image does
///   not match what was read.
pub fn copy_image(
    source: &Path,
    destination: &Path,
    options: &RawImageOptions,
    cancel: &CancellationToken,
    on_status: &mut dyn FnMut(TransferStatus),
) -> Result<TransferResult, CopyError> {
    let span = info_span!(
        "raw_image",
        source = %source.display(),
        destination = %destination.display()
    );
    let _enter = span.enter();

    info!("Starting raw image copy");
    let start_time = Instant::now();

    let mut source_file = File::open(source).map_err(|e| CopyError::from_open(source, e))?;
    let total_bytes = source_size(&source_file);
    debug!(total_bytes = ?total_bytes, "Source size");

    let mut image_file = File::create(destination).map_err(|e| {
        CopyError::io(format!("Failed to create image {}", destination.display()), e)
    })?;

    let mut buffer = vec![0u8; options.block_size.max(1)];
    let mut hasher = options.verify.then(blake3::Hasher::new);
    let mut throttle = LogThrottle::new(Duration::from_secs(5));
    let mut bytes_copied: u64 = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            warn!(bytes_copied, "Raw image copy cancelled, partial image left in place");
            break CopyOutcome::Cancelled;
        }

        let bytes_read = read_block(&mut source_file, &mut buffer).map_err(|e| {
            CopyError::io(format!("Failed to read from {}", source.display()), e)
        })?;
        if bytes_read == 0 {
            break CopyOutcome::Completed;
        }

        image_file.write_all(&buffer[..bytes_read]).map_err(|e| {
            CopyError::io(format!("Failed to write to {}", destination.display()), e)
        })?;

        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buffer[..bytes_read]);
        }

        bytes_copied += bytes_read as u64;
        on_status(TransferStatus::InProgress(ProgressSample {
            bytes_copied,
            total_bytes,
            files_copied: None,
            total_files: None,
            elapsed: start_time.elapsed(),
        }));

        if throttle.should_log() {
            debug!(bytes_copied, total_bytes = ?total_bytes, "Raw image progress");
        }
    };

    image_file.flush().map_err(|e| {
        CopyError::io(format!("Failed to flush {}", destination.display()), e)
    })?;
    if options.sync_file {
        image_file.sync_all().map_err(|e| {
            CopyError::io(format!("Failed to sync {}", destination.display()), e)
        })?;
    }
    drop(image_file);

    let file_hashes = match (outcome, hasher) {
        (CopyOutcome::Completed, Some(hasher)) => {
            let hash = *hasher.finalize().as_bytes();
            verify_image(destination, &hash, bytes_copied)?;
            Some(vec![FileHash {
                relative_path: PathBuf::new(),
                hash,
                size: bytes_copied,
            }])
        }
        _ => None,
    };

    let duration = start_time.elapsed();
    info!(
        bytes_copied,
        duration_secs = duration.as_secs(),
        cancelled = outcome == CopyOutcome::Cancelled,
        "Raw image copy finished"
    );

    Ok(TransferResult {
        outcome,
        bytes_copied,
        total_bytes,
        files_copied: None,
        total_files: None,
        failures: Vec::new(),
        duration,
        file_hashes,
    })
}

/// Fill `buffer` from `reader`, stopping early only at end of stream.
///
/// Device reads may return short counts; retrying keeps every block but the
/// last exactly `buffer.len()` bytes.
fn read_block(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Size of the source if it can be determined up front.
fn source_size(file: &File) -> Option<u64> {
    let metadata = file.metadata().ok()?;
    if metadata.is_file() {
        return Some(metadata.len());
    }
    block_device_size(file, &metadata)
}

#[cfg(target_os = "linux")]
fn block_device_size(file: &File, metadata: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::io::AsRawFd;

    if !metadata.file_type().is_block_device() {
        return None;
    }

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes exactly one u64 through the pointer.
    match unsafe { blkgetsize64(file.as_raw_fd(), &mut size) } {
        Ok(_) if size > 0 => Some(size),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "BLKGETSIZE64 failed");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn block_device_size(_file: &File, _metadata: &fs::Metadata) -> Option<u64> {
    None
}
