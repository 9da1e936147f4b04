use std::fmt;
use std::path::{Path, PathBuf};

/// Text of the single candidate returned when no drive is detected.
pub const NO_DRIVE_FOUND: &str = "No DVD drive found";

/// A mount point or raw device path that may hold a disc.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriveCandidate(String);

impl DriveCandidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The sentinel candidate meaning "nothing was detected".
    pub fn none_found() -> Self {
        Self(NO_DRIVE_FOUND.to_string())
    }

    pub fn is_none_found(&self) -> bool {
        self.0 == NO_DRIVE_FOUND
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for DriveCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriveCandidate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Platform access to optical drives.
///
/// Every method is best-effort: absent hardware is never an error. A wrong
/// guess from [`DriveAdapter::raw_device_path`] surfaces later when the raw
/// copier fails to open it.
pub trait DriveAdapter: Send + Sync {
    /// List disc-capable mounts/devices currently visible to the OS.
    ///
    /// Never empty: when nothing is found the list is exactly
    /// `[DriveCandidate::none_found()]`.
    fn list_drives(&self) -> Vec<DriveCandidate>;

    /// Map a candidate to the raw block-device path used for byte-exact reads.
    fn raw_device_path(&self, drive: &DriveCandidate) -> PathBuf;

    /// Map a candidate to the directory where its filesystem is mounted.
    fn mount_point(&self, drive: &DriveCandidate) -> Option<PathBuf>;
}

/// De-duplicate candidates (first occurrence wins) and apply the
/// "no drive found" sentinel.
pub fn finalize_candidates<I>(candidates: I) -> Vec<DriveCandidate>
where
    I: IntoIterator<Item = DriveCandidate>,
{
    let mut drives: Vec<DriveCandidate> = Vec::new();
    for candidate in candidates {
        if candidate.as_str().is_empty() || candidate.is_none_found() {
            continue;
        }
        if !drives.contains(&candidate) {
            drives.push(candidate);
        }
    }

    if drives.is_empty() {
        drives.push(DriveCandidate::none_found());
    }
    drives
}

/// Build the raw-device namespace path for a drive-letter style candidate,
/// e.g. `D:\` becomes `\\.\D:`.
///
/// Returns `None` if the candidate does not start with an ASCII letter.
pub fn raw_device_path_for_letter(drive: &str) -> Option<String> {
    let letter = drive.chars().next().filter(|c| c.is_ascii_alphabetic())?;
    Some(format!(r"\\.\{}:", letter.to_ascii_uppercase()))
}
