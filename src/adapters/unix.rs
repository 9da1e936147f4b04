use crate::core::hardware::{DriveAdapter, DriveCandidate, finalize_candidates};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem types used by optical media.
const OPTICAL_FILESYSTEMS: &[&str] = &["iso9660", "udf"];

/// Configuration for the Unix drive adapter.
#[derive(Debug, Clone)]
pub struct UnixAdapterConfig {
    /// Mount table to read (`/proc/mounts` on Linux).
    pub mount_table: PathBuf,
    /// Device nodes listed as candidates whenever they exist.
    pub known_devices: Vec<PathBuf>,
    /// Device nodes tried, in order, when a candidate is not a device.
    pub fallback_devices: Vec<PathBuf>,
}

impl Default for UnixAdapterConfig {
    fn default() -> Self {
        Self {
            mount_table: PathBuf::from("/proc/mounts"),
            known_devices: ["/dev/sr0", "/dev/cdrom", "/dev/dvd", "/dev/disk2"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            fallback_devices: ["/dev/sr0", "/dev/cdrom", "/dev/dvd"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: String,
}

impl MountEntry {
    /// Whether this mount looks like an optical disc.
    pub fn is_optical(&self) -> bool {
        let device = self.device.to_lowercase();
        let mount_point = self.mount_point.to_string_lossy().to_lowercase();

        OPTICAL_FILESYSTEMS.contains(&self.fstype.as_str())
            || device.starts_with("/dev/sr")
            || device.contains("cdrom")
            || device.contains("dvd")
            || mount_point.contains("cdrom")
            || mount_point.contains("dvd")
    }
}

pub struct UnixAdapter {
    config: UnixAdapterConfig,
}

impl UnixAdapter {
    pub fn new(config: UnixAdapterConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(UnixAdapterConfig::default())
    }

    /// Read the mount table. An unreadable table yields no entries.
    fn mounts(&self) -> Vec<MountEntry> {
        match fs::read_to_string(&self.config.mount_table) {
            Ok(contents) => parse_mount_table(&contents),
            Err(e) => {
                debug!(
                    path = %self.config.mount_table.display(),
                    error = %e,
                    "Mount table unavailable"
                );
                Vec::new()
            }
        }
    }
}

impl DriveAdapter for UnixAdapter {
    fn list_drives(&self) -> Vec<DriveCandidate> {
        let mounted = self
            .mounts()
            .into_iter()
            .filter(MountEntry::is_optical)
            .map(|m| DriveCandidate::new(m.device));

        let known = self
            .config
            .known_devices
            .iter()
            .filter(|p| p.exists())
            .map(|p| DriveCandidate::new(p.to_string_lossy()));

        finalize_candidates(mounted.chain(known))
    }

    fn raw_device_path(&self, drive: &DriveCandidate) -> PathBuf {
        let path = drive.as_path();
        if drive.as_str().starts_with("/dev") && path.exists() {
            return path.to_path_buf();
        }

        // A mount point: use the device it is mounted from.
        if let Some(entry) = self
            .mounts()
            .into_iter()
            .find(|m| m.device.starts_with("/dev") && same_path(&m.mount_point, path))
        {
            return PathBuf::from(entry.device);
        }

        self.config
            .fallback_devices
            .iter()
            .find(|p| p.exists())
            .cloned()
            .unwrap_or_else(|| path.to_path_buf())
    }

    fn mount_point(&self, drive: &DriveCandidate) -> Option<PathBuf> {
        let path = drive.as_path();
        if path.is_dir() {
            return Some(path.to_path_buf());
        }

        self.mounts()
            .into_iter()
            .find(|m| same_path(Path::new(&m.device), path))
            .map(|m| m.mount_point)
    }
}

/// Compare two paths, following symlinks such as `/dev/cdrom -> sr0` when
/// both sides resolve.
fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Parse `/proc/mounts` style content: `device mount_point fstype options ...`.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                device: unescape_mount_field(device),
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` for space, etc.) the kernel uses in the
/// mount table.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
