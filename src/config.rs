//! Application configuration.
//!
//! Values are layered, later sources winning: built-in defaults, the TOML
//! config file, `DISCDUP_*` environment variables (nested keys separated by
//! `__`, e.g. `DISCDUP_TRANSCODE__CRF=18`), then command-line arguments.

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::transfer_engine::DEFAULT_BLOCK_SIZE;

const APP_DIR: &str = "discdup";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Read size for raw image copies, in bytes.
    pub block_size: usize,
    /// Hash data while copying and check the destination afterwards.
    pub verify: bool,
    /// fsync each written file.
    pub sync_files: bool,
    /// Copy permissions and timestamps in tree mode.
    pub preserve_metadata: bool,
    pub settings_path: PathBuf,
    pub activity_log_path: PathBuf,
    pub simulation: bool,
    pub simulated_drives: Vec<SimulatedDrive>,
    pub verbose: bool,
    pub json_logs: bool,
    pub transcode: TranscodeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            verify: false,
            sync_files: false,
            preserve_metadata: true,
            settings_path: data_dir.join("settings.json"),
            activity_log_path: data_dir.join("activity.log"),
            simulation: false,
            simulated_drives: Vec::new(),
            verbose: false,
            json_logs: false,
            transcode: TranscodeConfig::default(),
        }
    }
}

/// A fake drive for simulation mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDrive {
    /// Read by image copies, typically an existing disc image.
    pub device: PathBuf,
    /// Read by tree copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,
}

/// Fixed encoder settings for the VOB-to-single-file conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Encoder binary name or path.
    pub encoder: String,
    /// Re-encode instead of stream-copying.
    pub reencode: bool,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// File name written inside the copied tree.
    pub output_name: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            encoder: "ffmpeg".to_string(),
            reencode: true,
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 20,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            output_name: "movie.mp4".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default locations, overlaying `cli_args`.
    ///
    /// `cli_args` should skip unset fields when serialized so that they do
    /// not clobber values from the file or environment.
    pub fn new<T: Serialize>(cli_args: Option<&T>, config_file: Option<&Path>) -> Result<Self> {
        let path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        if config_file.is_some() && !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DISCDUP_").split("__"));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::globals(args));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be greater than zero");
        }
        if self.transcode.encoder.trim().is_empty() {
            bail!("transcode.encoder must not be empty");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("discdup.toml")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
