//! Runtime settings for the edge process.
//!
//! Load order: defaults, then a TOML file, then `VISIT_*` environment
//! variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::perception::PerceptionConfig;
use crate::session::SessionConfig;
use crate::tracker::TrackerConfig;
use crate::{Error, Result};

/// Top-level settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Frames between periodic statistics log lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_frames: u64,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub perception: PerceptionConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Identity of this screen and its software
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub device_id: u32,

    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,

    #[serde(default = "default_model_version")]
    pub model_version: String,
}

/// Session aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: f64,

    #[serde(default = "default_fps")]
    pub fps: f64,

    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u64,

    #[serde(default = "default_tracker_version")]
    pub tracker_version: String,
}

/// Ingestion API and outbound queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_api_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    300
}

fn default_device_id() -> u32 {
    12
}

fn default_firmware_version() -> String {
    "1.8.2".to_string()
}

fn default_model_version() -> String {
    "yolov8n".to_string()
}

fn default_session_timeout() -> f64 {
    3.0
}

fn default_fps() -> f64 {
    30.0
}

fn default_min_duration() -> u64 {
    1
}

fn default_tracker_version() -> String {
    "SORT".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ingest_timeout() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_interval_frames: default_stats_interval(),
            device: DeviceConfig::default(),
            tracker: TrackerConfig::default(),
            session: SessionSettings::default(),
            perception: PerceptionConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            firmware_version: default_firmware_version(),
            model_version: default_model_version(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            fps: default_fps(),
            min_duration_secs: default_min_duration(),
            tracker_version: default_tracker_version(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            api_key: String::new(),
            timeout_secs: default_ingest_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load with precedence: env vars > config file > defaults, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        settings.apply_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `VISIT_*` environment variable overrides
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VISIT_DEVICE_ID") {
            self.device.device_id = parse_var("VISIT_DEVICE_ID", &v)?;
        }
        if let Some(v) = lookup("VISIT_SESSION_TIMEOUT") {
            self.session.timeout_secs = parse_var("VISIT_SESSION_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("VISIT_MAX_AGE") {
            self.tracker.max_age = parse_var("VISIT_MAX_AGE", &v)?;
        }
        if let Some(v) = lookup("VISIT_MIN_HITS") {
            self.tracker.min_hits = parse_var("VISIT_MIN_HITS", &v)?;
        }
        if let Some(v) = lookup("VISIT_IOU_THRESHOLD") {
            self.tracker.iou_threshold = parse_var("VISIT_IOU_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("VISIT_API_URL") {
            self.ingest.url = v;
        }
        if let Some(v) = lookup("VISIT_API_KEY") {
            self.ingest.api_key = v;
        }
        if let Some(v) = lookup("VISIT_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.session_config().validate()?;
        self.perception.validate()?;
        if self.stats_interval_frames == 0 {
            return Err(Error::InvalidConfig(
                "stats_interval_frames must be at least 1".to_string(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "ingest.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        self.tracker.clone()
    }

    /// Session parameters stamped with this device's identity
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout_secs: self.session.timeout_secs,
            fps: self.session.fps,
            min_duration_secs: self.session.min_duration_secs,
            device_id: self.device.device_id,
            firmware_version: self.device.firmware_version.clone(),
            model_version: self.device.model_version.clone(),
            tracker_version: self.session.tracker_version.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid {key}: {value:?}")))
}
