use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::capture::CaptureConstraints;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::reconcile::DEFAULT_FAILURE_THRESHOLD;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/detect/";
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 15_000;
const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HueWatchConfigFile {
    endpoint: Option<String>,
    sample_interval_ms: Option<u64>,
    submit_timeout_ms: Option<u64>,
    failure_threshold: Option<u32>,
    capture: Option<CaptureConfigFile>,
    connectivity: Option<ConnectivityConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    min_width: Option<u32>,
    min_height: Option<u32>,
    fps: Option<u32>,
    min_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConnectivityConfigFile {
    enabled: Option<bool>,
    probe_interval_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HueWatchConfig {
    pub endpoint: String,
    pub sample_interval: Duration,
    pub submit_timeout: Duration,
    pub failure_threshold: u32,
    pub capture: CaptureSettings,
    pub connectivity: ConnectivitySettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Device id to open; `None` lets the session pick one.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub fps: u32,
    pub min_fps: u32,
    pub jpeg_quality: u8,
}

impl CaptureSettings {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.width,
            height: self.height,
            min_width: self.min_width,
            min_height: self.min_height,
            fps: self.fps,
            min_fps: self.min_fps,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let constraints = CaptureConstraints::default();
        Self {
            device: None,
            width: constraints.width,
            height: constraints.height,
            min_width: constraints.min_width,
            min_height: constraints.min_height,
            fps: constraints.fps,
            min_fps: constraints.min_fps,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivitySettings {
    pub enabled: bool,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HueWatchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            submit_timeout: Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            capture: CaptureSettings::default(),
            connectivity: ConnectivitySettings {
                enabled: true,
                probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
                probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            },
        }
    }
}

impl HueWatchConfig {
    /// Load from the file named by `HUE_WATCH_CONFIG` (if set), then apply
    /// `HUE_WATCH_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HUE_WATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file path taking the place of
    /// `HUE_WATCH_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => HueWatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HueWatchConfigFile) -> Self {
        let defaults = Self::default();
        let capture_file = file.capture.unwrap_or_default();
        let connectivity_file = file.connectivity.unwrap_or_default();
        let capture = CaptureSettings {
            device: capture_file.device.filter(|device| !device.trim().is_empty()),
            width: capture_file.width.unwrap_or(defaults.capture.width),
            height: capture_file.height.unwrap_or(defaults.capture.height),
            min_width: capture_file.min_width.unwrap_or(defaults.capture.min_width),
            min_height: capture_file.min_height.unwrap_or(defaults.capture.min_height),
            fps: capture_file.fps.unwrap_or(defaults.capture.fps),
            min_fps: capture_file.min_fps.unwrap_or(defaults.capture.min_fps),
            jpeg_quality: capture_file
                .jpeg_quality
                .unwrap_or(defaults.capture.jpeg_quality),
        };
        let connectivity = ConnectivitySettings {
            enabled: connectivity_file
                .enabled
                .unwrap_or(defaults.connectivity.enabled),
            probe_interval: connectivity_file
                .probe_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connectivity.probe_interval),
            probe_timeout: connectivity_file
                .probe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connectivity.probe_timeout),
        };
        Self {
            endpoint: file.endpoint.unwrap_or(defaults.endpoint),
            sample_interval: file
                .sample_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sample_interval),
            submit_timeout: file
                .submit_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.submit_timeout),
            failure_threshold: file.failure_threshold.unwrap_or(defaults.failure_threshold),
            capture,
            connectivity,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("HUE_WATCH_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("HUE_WATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = Some(device.trim().to_string());
            }
        }
        if let Some(ms) = env_u64("HUE_WATCH_SAMPLE_INTERVAL_MS")? {
            self.sample_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("HUE_WATCH_SUBMIT_TIMEOUT_MS")? {
            self.submit_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("HUE_WATCH_PROBE_INTERVAL_MS")? {
            self.connectivity.probe_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_u64("HUE_WATCH_FAILURE_THRESHOLD")? {
            self.failure_threshold = u32::try_from(threshold)
                .map_err(|_| anyhow!("HUE_WATCH_FAILURE_THRESHOLD is out of range"))?;
        }
        if let Ok(enabled) = std::env::var("HUE_WATCH_PROBE_ENABLED") {
            self.connectivity.enabled = parse_bool(&enabled).ok_or_else(|| {
                anyhow!("HUE_WATCH_PROBE_ENABLED must be true/false, got '{}'", enabled)
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| anyhow!("endpoint '{}' is not a valid url: {}", self.endpoint, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "endpoint '{}' must use http or https",
                self.endpoint
            ));
        }
        if url.host_str().is_none() {
            return Err(anyhow!("endpoint '{}' has no host", self.endpoint));
        }
        if self.sample_interval.is_zero() {
            return Err(anyhow!("sample interval must be greater than zero"));
        }
        if self.submit_timeout.is_zero() {
            return Err(anyhow!("submit timeout must be greater than zero"));
        }
        if self.failure_threshold == 0 {
            return Err(anyhow!("failure threshold must be at least 1"));
        }
        let capture = &self.capture;
        if capture.min_width == 0 || capture.min_height == 0 || capture.min_fps == 0 {
            return Err(anyhow!("capture minimums must be greater than zero"));
        }
        if capture.width < capture.min_width || capture.height < capture.min_height {
            return Err(anyhow!(
                "capture resolution {}x{} is below the minimum {}x{}",
                capture.width,
                capture.height,
                capture.min_width,
                capture.min_height
            ));
        }
        if capture.fps < capture.min_fps {
            return Err(anyhow!(
                "capture fps {} is below the minimum {}",
                capture.fps,
                capture.min_fps
            ));
        }
        if !(1..=100).contains(&capture.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.connectivity.enabled
            && (self.connectivity.probe_interval.is_zero()
                || self.connectivity.probe_timeout.is_zero())
        {
            return Err(anyhow!(
                "connectivity probe interval and timeout must be greater than zero"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<HueWatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
