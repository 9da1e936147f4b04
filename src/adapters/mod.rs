use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::hardware::DriveAdapter;

mod simulated;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use simulated::SimulatedAdapter;
#[cfg(unix)]
pub use unix::{MountEntry, UnixAdapter, UnixAdapterConfig, parse_mount_table};
#[cfg(windows)]
pub use windows::WindowsAdapter;

/// Pick the drive adapter for this platform, or the simulator when enabled.
pub fn get_adapter(config: &AppConfig) -> Arc<dyn DriveAdapter> {
    if config.simulation {
        return Arc::new(SimulatedAdapter::new(config.simulated_drives.clone()));
    }

    #[cfg(unix)]
    {
        Arc::new(UnixAdapter::with_defaults())
    }

    #[cfg(windows)]
    {
        Arc::new(WindowsAdapter)
    }
}
