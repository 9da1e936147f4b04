use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::transfer_engine::FileHash;
use crate::error::CopyError;

const BUFFER_SIZE: usize = 128 * 1024;

/// Result of a successful verification
#[derive(Debug)]
pub struct VerifyResult {
    pub files_verified: u64,
    pub bytes_verified: u64,
}

/// Details of a file that failed verification
#[derive(Debug)]
pub struct FileMismatch {
    pub relative_path: PathBuf,
    pub reason: MismatchReason,
}

/// Reason a file failed verification
#[derive(Debug)]
pub enum MismatchReason {
    /// BLAKE3 hash of source and destination differ
    HashMismatch,
    /// File was hashed from the source but is absent in the destination
    MissingInDestination,
}

/// Verify destination files against hashes taken while copying.
///
/// Only the destination is read; the source was hashed as it streamed
/// through the copy.
pub fn verify_from_hashes(
    destination: &Path,
    file_hashes: &[FileHash],
) -> Result<VerifyResult, CopyError> {
    let total = file_hashes.len() as u64;
    info!(total_files = total, "Starting hash verification");

    let mut mismatches: Vec<FileMismatch> = Vec::new();
    let mut bytes_verified: u64 = 0;

    for fh in file_hashes {
        let dest_path = destination.join(&fh.relative_path);
        debug!(file = %fh.relative_path.display(), "Verifying file");

        if !dest_path.exists() {
            mismatches.push(FileMismatch {
                relative_path: fh.relative_path.clone(),
                reason: MismatchReason::MissingInDestination,
            });
            continue;
        }

        match hash_file(&dest_path) {
            Ok((hash, _)) if hash.as_bytes() == &fh.hash => bytes_verified += fh.size,
            Ok(_) => mismatches.push(FileMismatch {
                relative_path: fh.relative_path.clone(),
                reason: MismatchReason::HashMismatch,
            }),
            Err(e) => {
                debug!(
                    file = %fh.relative_path.display(),
                    error = %e,
                    "Failed to hash destination file"
                );
                mismatches.push(FileMismatch {
                    relative_path: fh.relative_path.clone(),
                    reason: MismatchReason::HashMismatch,
                });
            }
        }
    }

    if !mismatches.is_empty() {
        info!(mismatches = mismatches.len(), "Verification failed");
        return Err(CopyError::VerificationFailed(format_mismatch_error(
            &mismatches,
        )));
    }

    info!(files_verified = total, bytes_verified, "Verification complete");
    Ok(VerifyResult {
        files_verified: total,
        bytes_verified,
    })
}

/// Re-read a finished image and compare it with the hash of the stream
/// that produced it.
pub fn verify_image(path: &Path, expected: &[u8; 32], expected_len: u64) -> Result<(), CopyError> {
    info!(path = %path.display(), "Verifying image");

    let (hash, len) = hash_file(path)
        .map_err(|e| CopyError::io(format!("Failed to re-read {}", path.display()), e))?;

    if len != expected_len {
        return Err(CopyError::VerificationFailed(format!(
            "Verification failed: image is {} bytes, expected {}",
            len, expected_len
        )));
    }
    if hash.as_bytes() != expected {
        return Err(CopyError::VerificationFailed(
            "Verification failed: image hash mismatch".to_string(),
        ));
    }

    info!(bytes_verified = len, "Image verified");
    Ok(())
}

/// Hash a file using BLAKE3, streaming in chunks to handle large files.
fn hash_file(path: &Path) -> io::Result<(blake3::Hash, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut len: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        len += bytes_read as u64;
    }

    Ok((hasher.finalize(), len))
}

/// Format mismatch errors into a human-readable message
fn format_mismatch_error(mismatches: &[FileMismatch]) -> String {
    let mut msg = format!(
        "Verification failed: {} file(s) did not match",
        mismatches.len()
    );

    for m in mismatches.iter().take(10) {
        let reason = match &m.reason {
            MismatchReason::HashMismatch => "hash mismatch",
            MismatchReason::MissingInDestination => "missing in destination",
        };
        msg.push_str(&format!("\n  - {}: {}", m.relative_path.display(), reason));
    }

    if mismatches.len() > 10 {
        msg.push_str(&format!("\n  ... and {} more", mismatches.len() - 10));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_hash(relative_path: &str, content: &[u8]) -> FileHash {
        FileHash {
            relative_path: PathBuf::from(relative_path),
            hash: *blake3::hash(content).as_bytes(),
            size: content.len() as u64,
        }
    }

    #[test]
    fn test_verify_from_hashes_success() {
        let temp = tempdir().unwrap();
        let dest = temp.path();
        std::fs::create_dir_all(dest.join("VIDEO_TS")).unwrap();
        std::fs::write(dest.join("VIDEO_TS/VIDEO_TS.IFO"), b"ifo").unwrap();
        std::fs::write(dest.join("empty.txt"), b"").unwrap();

        let hashes = vec![
            make_hash("VIDEO_TS/VIDEO_TS.IFO", b"ifo"),
            make_hash("empty.txt", b""),
        ];

        let result = verify_from_hashes(dest, &hashes).unwrap();
        assert_eq!(result.files_verified, 2);
        assert_eq!(result.bytes_verified, 3);
    }

    #[test]
    fn test_verify_from_hashes_reports_every_mismatch() {
        let temp = tempdir().unwrap();
        let dest = temp.path();
        std::fs::write(dest.join("a.vob"), b"wrong a").unwrap();
        std::fs::write(dest.join("c.vob"), b"content c").unwrap();

        let hashes = vec![
            make_hash("a.vob", b"content a"),
            make_hash("b.vob", b"content b"),
            make_hash("c.vob", b"content c"),
        ];

        let err = verify_from_hashes(dest, &hashes).unwrap_err().to_string();
        assert!(err.contains("2 file(s) did not match"));
        assert!(err.contains("a.vob: hash mismatch"));
        assert!(err.contains("b.vob: missing in destination"));
    }

    #[test]
    fn test_verify_image() {
        let temp = tempdir().unwrap();
        let image = temp.path().join("disc.iso");
        let data = vec![7u8; 5000];
        std::fs::write(&image, &data).unwrap();
        let hash = *blake3::hash(&data).as_bytes();

        assert!(verify_image(&image, &hash, 5000).is_ok());

        let err = verify_image(&image, &hash, 4999).unwrap_err();
        assert!(err.to_string().contains("expected 4999"));

        let other = *blake3::hash(b"other").as_bytes();
        let err = verify_image(&image, &other, 5000).unwrap_err();
        assert!(matches!(err, CopyError::VerificationFailed(_)));
    }
}
