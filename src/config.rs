use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::telemetry::{FieldOrder, Interpolation};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Analysis server base address; `/upload` is appended.
    pub base_url: String,
    /// Bytes read from the media file per progress tick.
    pub chunk_size: usize,
    /// `0` leaves connecting unbounded, like every other phase of the request.
    pub connect_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            chunk_size: 64 * 1024,
            connect_timeout_secs: 0,
        }
    }
}

impl UploadConfig {
    pub fn endpoint(&self) -> String {
        format!("{}/upload", self.base_url.trim_end_matches('/'))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub results_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let results_dir = project_dirs()
            .map(|dirs| dirs.data_dir().join("results").to_string_lossy().into_owned())
            .unwrap_or_else(|| "~/.moodreel/results".into());
        Self { results_dir }
    }
}

impl StorageConfig {
    pub fn results_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.results_dir).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Playback time covered by one frame.
    pub frame_interval_ms: u64,
    pub field_order: FieldOrder,
    pub interpolation: Interpolation,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 250,
            field_order: FieldOrder::default(),
            interpolation: Interpolation::Linear,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "moodreel")
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or the default location. A missing file at the
    /// default location yields defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read config {}", path.display()))?;
                    Self::from_toml(&content)
                        .with_context(|| format!("Invalid config {}", path.display()))?
                }
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.base_url.trim().is_empty() {
            bail!("upload.base_url must not be empty");
        }
        if self.upload.chunk_size == 0 {
            bail!("upload.chunk_size must be positive");
        }
        if self.telemetry.frame_interval_ms == 0 {
            bail!("telemetry.frame_interval_ms must be positive");
        }
        if !self.telemetry.field_order.is_permutation() {
            bail!("telemetry.field_order must name every emotion exactly once");
        }
        Ok(())
    }
}
