use crate::core::progress::ProgressSample;
use crate::core::transfer_engine::{
    CopyOutcome, FileFailure, FileHash, TransferEngine, TransferRequest, TransferResult,
    TransferStatus,
};
use crate::core::verifier::verify_from_hashes;
use crate::error::CopyError;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

/// Options for a tree copy.
#[derive(Debug, Clone)]
pub struct TreeCopyOptions {
    /// Copy permissions and access/modification times.
    pub preserve_metadata: bool,
    /// fsync each file after writing (safer but slower).
    pub sync_files: bool,
    /// Hash files while copying, then re-check the destination.
    pub verify: bool,
}

impl Default for TreeCopyOptions {
    fn default() -> Self {
        Self {
            preserve_metadata: true,
            sync_files: false,
            verify: false,
        }
    }
}

/// File-by-file copy of a mounted disc.
///
/// - Pre-scan for accurate progress reporting
/// - Large buffered I/O
/// - Metadata preservation (permissions, timestamps)
/// - Per-file failures recorded without stopping the copy
#[derive(Debug, Clone)]
pub struct TreeCopyEngine {
    pub preserve_metadata: bool,
    pub sync_files: bool,
    pub verify: bool,
}

impl Default for TreeCopyEngine {
    fn default() -> Self {
        let options = TreeCopyOptions::default();
        Self {
            preserve_metadata: options.preserve_metadata,
            sync_files: options.sync_files,
            verify: options.verify,
        }
    }
}

impl TransferEngine for TreeCopyEngine {
    fn transfer(
        &self,
        req: &TransferRequest,
        cancel: &CancellationToken,
        on_status: &mut dyn FnMut(TransferStatus),
    ) -> Result<TransferResult, CopyError> {
        let options = TreeCopyOptions {
            preserve_metadata: self.preserve_metadata,
            sync_files: self.sync_files,
            verify: self.verify,
        };
        copy_tree(&req.source, &req.destination, &options, cancel, on_status)
    }
}

/// Copy every file under `source` into `destination`, recreating the
/// relative directory structure.
///
/// The whole tree is scanned first so progress has a known total. The
/// cancellation token is checked before each file. A file that fails to
/// copy is logged, reported as [`TransferStatus::FileFailed`] and recorded
/// in [`TransferResult::failures`]; the copy still completes.
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    options: &TreeCopyOptions,
    cancel: &CancellationToken,
    on_status: &mut dyn FnMut(TransferStatus),
) -> Result<TransferResult, CopyError> {
    let span = info_span!(
        "tree_copy",
        source = %source.display(),
        destination = %destination.display()
    );
    let _enter = span.enter();

    info!("Starting tree copy");
    let start_time = Instant::now();

    // Phase 1: Scan source directory for files and total size
    info!("Scanning source directory");
    let scan = scan_directory(source)?;
    let total_files = scan.files.len() as u64;
    let total_bytes = scan.total_bytes;

    info!(
        total_files,
        total_bytes,
        total_dirs = scan.directories.len(),
        skipped = scan.skipped.len(),
        "Scan complete"
    );

    let mut failures = scan.skipped;
    for failure in &failures {
        on_status(TransferStatus::FileFailed(failure.clone()));
    }

    // Phase 2: Create directory structure
    fs::create_dir_all(destination).map_err(|e| {
        CopyError::io(
            format!("Failed to create destination directory {}", destination.display()),
            e,
        )
    })?;
    unlock_directory(destination);

    // A previous copy may have left read-only directories behind.
    for relative in &scan.directories {
        let dest_dir = destination.join(relative);
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            let failure = FileFailure {
                relative_path: relative.clone(),
                message: format!("Failed to create directory: {}", e),
            };
            warn!(dir = %relative.display(), error = %e, "Failed to create directory");
            on_status(TransferStatus::FileFailed(failure.clone()));
            failures.push(failure);
            continue;
        }
        unlock_directory(&dest_dir);
    }

    // Phase 3: Copy files with progress reporting
    let mut bytes_copied: u64 = 0;
    let mut files_copied: u64 = 0;
    let mut file_hashes = options.verify.then(Vec::new);
    let sample = |bytes_copied, files_copied| ProgressSample {
        bytes_copied,
        total_bytes: Some(total_bytes),
        files_copied: Some(files_copied),
        total_files: Some(total_files),
        elapsed: start_time.elapsed(),
    };

    on_status(TransferStatus::InProgress(sample(0, 0)));

    let mut outcome = CopyOutcome::Completed;
    for file_info in &scan.files {
        if cancel.is_cancelled() {
            warn!(files_copied, total_files, "Tree copy cancelled, partial copy left in place");
            outcome = CopyOutcome::Cancelled;
            break;
        }

        let dest_path = destination.join(&file_info.relative);
        debug!(file = %file_info.relative.display(), size = file_info.size, "Copying file");

        match copy_single_file(&file_info.path, &dest_path, options) {
            Ok(copied) => {
                files_copied += 1;
                bytes_copied += copied.bytes;
                if let (Some(hashes), Some(hash)) = (file_hashes.as_mut(), copied.hash) {
                    hashes.push(FileHash {
                        relative_path: file_info.relative.clone(),
                        hash,
                        size: copied.bytes,
                    });
                }
            }
            Err(message) => {
                warn!(
                    file = %file_info.relative.display(),
                    error = %message,
                    "Failed to copy file"
                );
                let failure = FileFailure {
                    relative_path: file_info.relative.clone(),
                    message,
                };
                on_status(TransferStatus::FileFailed(failure.clone()));
                failures.push(failure);
            }
        }

        on_status(TransferStatus::InProgress(sample(bytes_copied, files_copied)));
    }

    // Phase 4: Directory metadata last, so writing files does not disturb
    // timestamps and read-only source directories do not block the copy.
    if options.preserve_metadata {
        for relative in scan.directories.iter().rev() {
            preserve_metadata(&source.join(relative), &destination.join(relative));
        }
    }

    if outcome == CopyOutcome::Completed {
        if let Some(hashes) = &file_hashes {
            verify_from_hashes(destination, hashes)?;
        }
    }

    let duration = start_time.elapsed();
    info!(
        files_copied,
        total_files,
        bytes_copied,
        failed = failures.len(),
        duration_secs = duration.as_secs(),
        "Tree copy finished"
    );

    Ok(TransferResult {
        outcome,
        bytes_copied,
        total_bytes: Some(total_bytes),
        files_copied: Some(files_copied),
        total_files: Some(total_files),
        failures,
        duration,
        file_hashes,
    })
}

/// Result of scanning a directory
struct ScanResult {
    files: Vec<FileInfo>,
    /// Relative paths, parents before children
    directories: Vec<PathBuf>,
    total_bytes: u64,
    /// Entries that could not be read during the scan
    skipped: Vec<FileFailure>,
}

/// Information about a file to copy
struct FileInfo {
    path: PathBuf,
    relative: PathBuf,
    size: u64,
}

/// Scan a directory recursively, collecting files and directories in name
/// order.
///
/// Only the source root itself is fatal; unreadable entries below it are
/// skipped and reported.
fn scan_directory(source: &Path) -> Result<ScanResult, CopyError> {
    let metadata = fs::metadata(source).map_err(|e| CopyError::from_open(source, e))?;
    if !metadata.is_dir() {
        return Err(CopyError::io(
            format!("Source {} is not a directory", source.display()),
            io::Error::new(ErrorKind::NotADirectory, "not a directory"),
        ));
    }
    // Fail early on an unreadable root rather than reporting an empty copy.
    fs::read_dir(source).map_err(|e| CopyError::from_open(source, e))?;

    let mut result = ScanResult {
        files: Vec::new(),
        directories: Vec::new(),
        total_bytes: 0,
        skipped: Vec::new(),
    };
    scan_directory_recursive(source, source, &mut result);
    Ok(result)
}

fn scan_directory_recursive(base: &Path, current: &Path, result: &mut ScanResult) {
    let relative_of = |path: &Path| path.strip_prefix(base).unwrap_or(path).to_path_buf();

    let mut entries: Vec<PathBuf> = match fs::read_dir(current) {
        Ok(entries) => entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!(dir = %current.display(), error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!(dir = %current.display(), error = %e, "Skipping unreadable directory");
            result.skipped.push(FileFailure {
                relative_path: relative_of(current),
                message: format!("Failed to read directory: {}", e),
            });
            return;
        }
    };
    entries.sort();

    for path in entries {
        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                result.skipped.push(FileFailure {
                    relative_path: relative_of(&path),
                    message: format!("Failed to read metadata: {}", e),
                });
                continue;
            }
        };

        if metadata.is_dir() {
            result.directories.push(relative_of(&path));
            scan_directory_recursive(base, &path, result);
        } else if metadata.is_file() {
            let size = metadata.len();
            result.total_bytes += size;
            result.files.push(FileInfo {
                relative: relative_of(&path),
                path,
                size,
            });
        }
        // Skip symlinks and other special files
    }
}

struct CopiedFile {
    bytes: u64,
    hash: Option<[u8; 32]>,
}

/// Copy a single file, optionally preserving metadata and hashing the data.
fn copy_single_file(
    source: &Path,
    dest: &Path,
    options: &TreeCopyOptions,
) -> Result<CopiedFile, String> {
    let source_file =
        File::open(source).map_err(|e| format!("Failed to open source file: {}", e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create destination directory: {}", e))?;
    }

    let dest_file =
        create_destination(dest).map_err(|e| format!("Failed to create destination file: {}", e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut hasher = options.verify.then(blake3::Hasher::new);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(format!("Failed to read from source: {}", e)),
        };

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| format!("Failed to write to destination: {}", e))?;

        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buffer[..bytes_read]);
        }
        bytes_written += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush destination file: {}", e))?;

    if options.sync_files {
        let inner = writer
            .into_inner()
            .map_err(|e| format!("Failed to get inner file handle: {}", e.error()))?;
        inner
            .sync_all()
            .map_err(|e| format!("Failed to sync file: {}", e))?;
    } else {
        drop(writer);
    }

    if options.preserve_metadata {
        preserve_metadata(source, dest);
    }

    Ok(CopiedFile {
        bytes: bytes_written,
        hash: hasher.map(|h| *h.finalize().as_bytes()),
    })
}

/// Open `dest` for writing, replacing a read-only file left by an earlier copy.
fn create_destination(dest: &Path) -> io::Result<File> {
    match File::create(dest) {
        Err(e) if e.kind() == ErrorKind::PermissionDenied && dest.is_file() => {
            debug!(dest = %dest.display(), "Replacing read-only destination file");
            make_owner_writable(dest)?;
            File::create(dest)
        }
        other => other,
    }
}

fn unlock_directory(dir: &Path) {
    if let Err(e) = make_owner_writable(dir) {
        debug!(dir = %dir.display(), error = %e, "Failed to make directory writable");
    }
}

/// Give the owner write access, leaving other permission bits alone.
#[cfg(unix)]
fn make_owner_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o200 == 0 {
        permissions.set_mode(mode | 0o200);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_owner_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Copy permissions and timestamps where the platform allows; failures are
/// logged and ignored.
fn preserve_metadata(source: &Path, dest: &Path) {
    let metadata = match fs::metadata(source) {
        Ok(m) => m,
        Err(e) => {
            debug!(path = %source.display(), error = %e, "Failed to read source metadata");
            return;
        }
    };

    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve timestamps");
    }

    // Permissions last: a read-only file can still have its times set above.
    if let Err(e) = fs::set_permissions(dest, metadata.permissions()) {
        debug!(dest = %dest.display(), error = %e, "Failed to set permissions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scan_empty_directory() {
        let temp = tempdir().unwrap();
        let result = scan_directory(temp.path()).unwrap();

        assert!(result.files.is_empty());
        assert!(result.directories.is_empty());
        assert_eq!(result.total_bytes, 0);
    }

    #[test]
    fn test_scan_with_files_sorted() {
        let temp = tempdir().unwrap();

        fs::write(temp.path().join("b.txt"), b"world!!!").unwrap();
        fs::write(temp.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();
        fs::write(temp.path().join("subdir/nested.txt"), b"nested").unwrap();
        fs::create_dir(temp.path().join("subdir/empty")).unwrap();

        let result = scan_directory(temp.path()).unwrap();

        let files: Vec<PathBuf> = result.files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("subdir/nested.txt"),
            ]
        );
        assert_eq!(
            result.directories,
            vec![PathBuf::from("subdir"), PathBuf::from("subdir/empty")]
        );
        assert_eq!(result.total_bytes, 5 + 8 + 6);
    }

    #[test]
    fn test_scan_missing_source() {
        let temp = tempdir().unwrap();
        let result = scan_directory(&temp.path().join("nope"));
        assert!(matches!(result, Err(CopyError::NotFound { .. })));
    }

    #[test]
    fn test_scan_file_source_is_not_a_directory() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("disc.iso");
        fs::write(&file, b"x").unwrap();
        let err = scan_directory(&file).err().unwrap();
        assert!(err.to_string().contains("is not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("real.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.txt"), temp.path().join("link.txt"))
            .unwrap();

        let result = scan_directory(temp.path()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative, PathBuf::from("real.txt"));
    }

    #[test]
    fn test_copy_single_file_preserves_content_and_mtime() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.txt");
        let dest = temp.path().join("out/dest.txt");

        let content = b"test file content for copying";
        fs::write(&source, content).unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();

        let options = TreeCopyOptions {
            verify: true,
            sync_files: true,
            ..Default::default()
        };
        let copied = copy_single_file(&source, &dest, &options).unwrap();
        assert_eq!(copied.bytes, content.len() as u64);
        assert_eq!(copied.hash, Some(*blake3::hash(content).as_bytes()));

        assert_eq!(fs::read(&dest).unwrap(), content);
        let dest_meta = fs::metadata(&dest).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&dest_meta), mtime);
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directories_do_not_block_copy() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let source = temp.path().join("disc");
        let dest = temp.path().join("copy");
        fs::create_dir_all(source.join("VIDEO_TS")).unwrap();
        fs::write(source.join("VIDEO_TS/VTS_01_1.VOB"), b"vob").unwrap();
        fs::set_permissions(source.join("VIDEO_TS"), fs::Permissions::from_mode(0o555)).unwrap();

        let cancel = CancellationToken::new();
        let result = copy_tree(
            &source,
            &dest,
            &TreeCopyOptions::default(),
            &cancel,
            &mut |_| {},
        )
        .unwrap();

        assert!(result.failures.is_empty());
        assert_eq!(fs::read(dest.join("VIDEO_TS/VTS_01_1.VOB")).unwrap(), b"vob");
        let mode = fs::metadata(dest.join("VIDEO_TS")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o555);

        // Let tempdir clean up.
        fs::set_permissions(source.join("VIDEO_TS"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(dest.join("VIDEO_TS"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_create_destination_replaces_read_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("VIDEO_TS.IFO");
        fs::write(&dest, b"old").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o444)).unwrap();

        let mut file = create_destination(&dest).unwrap();
        file.write_all(b"new").unwrap();
        drop(file);

        assert_eq!(fs::read(&dest).unwrap(), b"new");
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_make_owner_writable_keeps_other_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let dir = temp.path().join("VIDEO_TS");
        fs::create_dir(&dir).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();

        make_owner_writable(&dir).unwrap();
        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
