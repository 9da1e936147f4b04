use crate::activity::{ActivityLog, EventSink, TracingSink};
use crate::adapters;
use crate::config::AppConfig;
use crate::core::ProgressTracker;
use crate::core::hardware::DriveAdapter;
use crate::settings::{JsonSettingsStore, SettingsStore};
use std::sync::Arc;

/// Shared state handed to the orchestrator and the CLI.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub adapter: Arc<dyn DriveAdapter>,
    pub settings: Arc<dyn SettingsStore>,
    pub activity: Arc<dyn EventSink>,
    pub progress: ProgressTracker,
}

impl AppContext {
    /// Context backed by the platform adapter and on-disk settings and log.
    ///
    /// Simulated runs report activity through tracing only, leaving the
    /// activity log file untouched.
    pub fn new(config: AppConfig) -> Self {
        let adapter = adapters::get_adapter(&config);
        let settings = Arc::new(JsonSettingsStore::new(&config.settings_path));
        let activity: Arc<dyn EventSink> = if config.simulation {
            Arc::new(TracingSink)
        } else {
            Arc::new(ActivityLog::new(&config.activity_log_path))
        };
        Self::with_parts(config, adapter, settings, activity)
    }

    pub fn with_parts(
        config: AppConfig,
        adapter: Arc<dyn DriveAdapter>,
        settings: Arc<dyn SettingsStore>,
        activity: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            adapter,
            settings,
            activity,
            progress: ProgressTracker::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path, simulation: bool) -> AppConfig {
        AppConfig {
            simulation,
            settings_path: dir.join("settings.json"),
            activity_log_path: dir.join("activity.log"),
            ..Default::default()
        }
    }

    #[test]
    fn test_simulation_leaves_activity_log_alone() {
        let temp = tempdir().unwrap();
        let ctx = AppContext::new(config_in(temp.path(), true));
        ctx.activity.record("Starting tree copy");
        assert!(!temp.path().join("activity.log").exists());
    }

    #[test]
    fn test_real_run_writes_activity_log() {
        let temp = tempdir().unwrap();
        let ctx = AppContext::new(config_in(temp.path(), false));
        ctx.activity.record("Starting tree copy");
        let log = std::fs::read_to_string(temp.path().join("activity.log")).unwrap();
        assert!(log.trim_end().ends_with("Starting tree copy"));
    }
}
