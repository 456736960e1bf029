// Monitor configuration
//
// Resolution order (later wins):
// 1) Built-in defaults (constants.rs)
// 2) JSON config file (--config, or <data dir>/config.json when present)
// 3) Environment variable overrides (ROOMWATCH_*)

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::Scene;
use crate::constants::*;
use crate::engine::EngineConfig;
use crate::error::{MonitorError, Result};

pub const ENV_DATA_DIR: &str = "ROOMWATCH_DATA_DIR";
pub const ENV_MODEL_PATH: &str = "ROOMWATCH_MODEL_PATH";
pub const ENV_DB_PATH: &str = "ROOMWATCH_DB_PATH";
pub const ENV_NOTIFY_URL: &str = "ROOMWATCH_NOTIFY_URL";
pub const ENV_API_KEY: &str = "ROOMWATCH_API_KEY";
pub const ENV_ANALYSIS_INTERVAL: &str = "ROOMWATCH_ANALYSIS_INTERVAL_SECS";
pub const ENV_CYCLE_TIMEOUT: &str = "ROOMWATCH_CYCLE_TIMEOUT_SECS";
pub const ENV_IDLE_AFTER: &str = "ROOMWATCH_IDLE_AFTER_SECS";
pub const ENV_SCENE: &str = "ROOMWATCH_SCENE";

/// Outbound notification endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// No URL means notifications are off
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

/// Synthetic capture settings used by `roomwatch run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub scene: Scene,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub window_ms: u64,
    pub interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            scene: Scene::Still,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_AUDIO_CHANNELS,
            window_ms: DEFAULT_AUDIO_WINDOW_MS,
            interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub data_dir: PathBuf,
    pub analysis_interval_secs: u64,
    pub cycle_timeout_secs: u64,
    pub stale_after_secs: u64,
    /// None keeps long quiet stretches as sleeping
    pub idle_after_secs: Option<u64>,
    pub history_len: usize,
    /// Defaults to <data dir>/activity_model.json
    pub model_path: Option<PathBuf>,
    /// Defaults to <data dir>/activity.db
    pub db_path: Option<PathBuf>,
    pub notify: NotifyConfig,
    pub capture: CaptureConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            analysis_interval_secs: DEFAULT_ANALYSIS_INTERVAL_SECS,
            cycle_timeout_secs: DEFAULT_CYCLE_TIMEOUT_SECS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            idle_after_secs: Some(DEFAULT_IDLE_AFTER_SECS),
            history_len: DEFAULT_HISTORY_LEN,
            model_path: None,
            db_path: None,
            notify: NotifyConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

/// ~/.roomwatch, or ./.roomwatch when there is no home directory
pub fn default_data_dir() -> PathBuf {
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(DATA_DIR_NAME),
        None => PathBuf::from(DATA_DIR_NAME),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| MonitorError::Config(format!("{} must be a whole number of seconds, got '{}'", key, value)))
}

impl MonitorConfig {
    /// Defaults, then the config file, then the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::load_with(config_file, |key| env::var(key).ok())
    }

    /// Same as `load` with an injectable environment lookup.
    pub fn load_with<F>(config_file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let file = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = data_dir.join(CONFIG_FILENAME);
                candidate.exists().then_some(candidate)
            }
        };

        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| MonitorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| MonitorError::Config(format!("invalid {}: {}", path.display(), e)))?;
                let has_data_dir = value.get("data_dir").is_some();
                let mut config: MonitorConfig = serde_json::from_value(value)
                    .map_err(|e| MonitorError::Config(format!("invalid {}: {}", path.display(), e)))?;
                if !has_data_dir {
                    config.data_dir = data_dir;
                }
                log::debug!("Loaded config from {}", path.display());
                config
            }
            None => MonitorConfig {
                data_dir,
                ..MonitorConfig::default()
            },
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply ROOMWATCH_* overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MODEL_PATH) {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_NOTIFY_URL) {
            self.notify.url = Some(v).filter(|u| !u.is_empty());
        }
        if let Some(v) = lookup(ENV_API_KEY) {
            self.notify.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup(ENV_ANALYSIS_INTERVAL) {
            self.analysis_interval_secs = parse_secs(ENV_ANALYSIS_INTERVAL, &v)?;
        }
        if let Some(v) = lookup(ENV_CYCLE_TIMEOUT) {
            self.cycle_timeout_secs = parse_secs(ENV_CYCLE_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_IDLE_AFTER) {
            // 0 turns the sleeping-to-idle conversion off
            let secs = parse_secs(ENV_IDLE_AFTER, &v)?;
            self.idle_after_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup(ENV_SCENE) {
            self.capture.scene = Scene::parse(&v)
                .ok_or_else(|| MonitorError::Config(format!("{}: unknown scene '{}'", ENV_SCENE, v)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_timeout_secs == 0 {
            return Err(MonitorError::Config("cycle_timeout_secs must be positive".to_string()));
        }
        if self.history_len == 0 {
            return Err(MonitorError::Config("history_len must be positive".to_string()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(MonitorError::Config("capture frame size must be non-zero".to_string()));
        }
        if self.capture.sample_rate == 0 || self.capture.channels == 0 {
            return Err(MonitorError::Config("capture audio format must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(MODEL_FILENAME))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| crate::db::get_db_path(&self.data_dir))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            analysis_interval: Duration::from_secs(self.analysis_interval_secs),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            idle_after: self.idle_after_secs.map(Duration::from_secs),
            history_len: self.history_len,
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify.timeout_secs)
    }
}
