use crate::core::hardware::{
    DriveAdapter, DriveCandidate, finalize_candidates, raw_device_path_for_letter,
};
use std::path::{Path, PathBuf};

/// Drive letters probed for optical media. A and B are floppy letters and C
/// is almost always the system disk.
const DRIVE_LETTERS: &str = "DEFGHIJKLMNOPQRSTUVWXYZ";

pub struct WindowsAdapter;

impl DriveAdapter for WindowsAdapter {
    fn list_drives(&self) -> Vec<DriveCandidate> {
        let roots = DRIVE_LETTERS
            .chars()
            .map(|letter| format!("{letter}:\\"))
            .filter(|root| Path::new(root).exists())
            .map(DriveCandidate::new);

        finalize_candidates(roots)
    }

    fn raw_device_path(&self, drive: &DriveCandidate) -> PathBuf {
        raw_device_path_for_letter(drive.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| drive.as_path().to_path_buf())
    }

    fn mount_point(&self, drive: &DriveCandidate) -> Option<PathBuf> {
        let letter = drive.as_str().chars().next()?;
        let root = PathBuf::from(format!("{}:\\", letter.to_ascii_uppercase()));
        root.is_dir().then_some(root)
    }
}
