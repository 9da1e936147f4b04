use std::path::PathBuf;

use crate::config::SimulatedDrive;
use crate::core::hardware::{DriveAdapter, DriveCandidate, finalize_candidates};

/// Drive adapter backed by a fixed list instead of the OS.
///
/// A simulated "device" is usually a disc image file and its "mount point"
/// an extracted folder, which is enough to exercise both copy modes without
/// real hardware.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAdapter {
    drives: Vec<SimulatedDrive>,
}

impl SimulatedAdapter {
    pub fn new(drives: Vec<SimulatedDrive>) -> Self {
        Self { drives }
    }

    pub fn add_drive(&mut self, device: impl Into<PathBuf>, mount_point: Option<PathBuf>) {
        self.drives.push(SimulatedDrive {
            device: device.into(),
            mount_point,
        });
    }

    fn find(&self, drive: &DriveCandidate) -> Option<&SimulatedDrive> {
        self.drives.iter().find(|d| {
            d.device.as_path() == drive.as_path()
                || d.mount_point.as_deref() == Some(drive.as_path())
        })
    }
}

impl DriveAdapter for SimulatedAdapter {
    fn list_drives(&self) -> Vec<DriveCandidate> {
        finalize_candidates(
            self.drives
                .iter()
                .map(|d| DriveCandidate::new(d.device.to_string_lossy())),
        )
    }

    fn raw_device_path(&self, drive: &DriveCandidate) -> PathBuf {
        self.find(drive)
            .map(|d| d.device.clone())
            .unwrap_or_else(|| drive.as_path().to_path_buf())
    }

    fn mount_point(&self, drive: &DriveCandidate) -> Option<PathBuf> {
        self.find(drive).and_then(|d| d.mount_point.clone())
    }
}
