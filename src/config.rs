//! Configuration management for skycast
//!
//! Provides loading, saving and validation of the agent configuration. Files
//! are TOML; `load_layered` additionally overlays `SKYCAST__SECTION__KEY`
//! environment variables on top of the file and the built-in defaults.

use crate::errors::StreamError;
use crate::types::DetectionClass;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkycastConfig {
    pub device: DeviceConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub stream: StreamConfig,
    pub signaling: SignalingConfig,
    pub lifecycle: LifecycleConfig,
    pub health: HealthConfig,
    pub publisher: PublisherConfig,
    pub still: StillConfig,
    pub gps: GpsConfig,
    pub bus: BusConfig,
}

/// Identity announced on the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
}

/// Camera capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Device indices tried by the generic backend, in order
    pub device_indices: Vec<u32>,
    /// Camera setup attempts before giving up
    pub setup_attempts: u32,
    /// Delay between setup attempts in milliseconds
    pub setup_retry_delay_ms: u64,
    /// Bounded join for the capture thread in milliseconds
    pub join_timeout_ms: u64,
    /// Use the synthetic pattern source instead of hardware
    pub synthetic: bool,
}

/// Detection worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    /// ONNX model file; an empty path runs without a model
    pub model_path: PathBuf,
    /// Square model input resolution in pixels
    pub input_size: u32,
    pub earth_person_threshold: f32,
    pub sea_person_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Explicit sampling stride; derived from `target_rate_hz` when unset
    pub every_n_frames: Option<u32>,
    pub target_rate_hz: f32,
    /// Bounded join for the worker thread in milliseconds
    pub join_timeout_ms: u64,
}

/// Outgoing video configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Draw detections on the outgoing video
    pub overlay: bool,
    /// Target encoder bitrate in kbps
    pub bitrate_kbps: u32,
}

/// Signaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub ice_gathering_timeout_ms: u64,
    /// Forward candidates gathered after the offer was sent
    pub trickle_local_candidates: bool,
    pub stun_servers: Vec<String>,
}

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    pub cooldown_secs: u64,
    pub stable_dwell_secs: u64,
}

/// Connection health sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub keepalive_interval_secs: u64,
    pub stats_interval_secs: u64,
}

/// Detection report configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub interval_ms: u64,
    pub max_boxes: usize,
    pub snapshot_enabled: bool,
    pub snapshot_interval_secs: u64,
    pub snapshot_jpeg_quality: u8,
}

/// One-shot still capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StillConfig {
    pub output_directory: String,
    pub default_quality: u8,
}

/// Position source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub simulated: bool,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub update_interval_ms: u64,
}

/// Message bus connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "drone-001".to_string(),
            name: "Field Unit 001".to_string(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            device_indices: vec![0, 1],
            setup_attempts: 3,
            setup_retry_delay_ms: 2000,
            join_timeout_ms: 1000,
            synthetic: false,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("model_fp32.onnx"),
            input_size: 640,
            earth_person_threshold: 0.45,
            sea_person_threshold: 0.30,
            iou_threshold: 0.45,
            max_detections: 100,
            every_n_frames: None,
            target_rate_hz: 10.0,
            join_timeout_ms: 1000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            overlay: true,
            bitrate_kbps: 2000,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout_ms: 5000,
            trickle_local_candidates: true,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window_secs: 10,
            cooldown_secs: 30,
            stable_dwell_secs: 20,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 5,
            stats_interval_secs: 10,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_boxes: 20,
            snapshot_enabled: true,
            snapshot_interval_secs: 60,
            snapshot_jpeg_quality: 80,
        }
    }
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            output_directory: "./captures".to_string(),
            default_quality: 95,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            simulated: false,
            start_latitude: 10.762622,
            start_longitude: 106.660172,
            update_interval_ms: 1000,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/ws".to_string(),
            reconnect_attempts: 10,
            reconnect_delay_ms: 5000,
        }
    }
}

impl DetectionConfig {
    /// Confidence threshold for one class
    pub fn threshold_for(&self, class: DetectionClass) -> f32 {
        match class {
            DetectionClass::EarthPerson => self.earth_person_threshold,
            DetectionClass::SeaPerson => self.sea_person_threshold,
        }
    }

    /// Sampling stride: every Nth produced frame goes to detection.
    pub fn stride(&self, fps: u32) -> u32 {
        if let Some(n) = self.every_n_frames {
            return n.max(1);
        }
        if self.target_rate_hz <= 0.0 {
            return 1;
        }
        ((fps as f32 / self.target_rate_hz).round() as u32).max(1)
    }
}

impl LifecycleConfig {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn stable_dwell(&self) -> Duration {
        Duration::from_secs(self.stable_dwell_secs)
    }
}

impl PublisherConfig {
    /// Snapshot interval, never below one minute.
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(crate::publisher::MIN_SNAPSHOT_INTERVAL_SECS))
    }
}

impl SkycastConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SkycastConfig = toml::from_str(&contents)
            .map_err(|e| StreamError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file if present, then `SKYCAST__*` env vars.
    ///
    /// `SKYCAST__CAMERA__FPS=15` overrides `camera.fps`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| StreamError::Config(format!("Failed to build defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("SKYCAST")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("camera.device_indices")
                    .with_list_parse_key("signaling.stun_servers"),
            )
            .build()
            .map_err(|e| StreamError::Config(format!("Failed to load configuration: {}", e)))?;

        let config: SkycastConfig = layered
            .try_deserialize()
            .map_err(|e| StreamError::Config(format!("Invalid configuration: {}", e)))?;

        config.validate().map_err(StreamError::Config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StreamError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    StreamError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| StreamError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("skycast.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.device.id.trim().is_empty() {
            return Err("Device id must not be empty".to_string());
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return Err("Invalid camera FPS (must be 1-240)".to_string());
        }
        if self.camera.setup_attempts == 0 {
            return Err("Camera setup attempts must be at least 1".to_string());
        }

        for (name, value) in [
            ("earth_person_threshold", self.detection.earth_person_threshold),
            ("sea_person_threshold", self.detection.sea_person_threshold),
            ("iou_threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be between 0.0 and 1.0", name));
            }
        }
        if self.detection.input_size < 32 {
            return Err("Detection input_size must be at least 32".to_string());
        }
        if self.detection.max_detections == 0 {
            return Err("max_detections must be at least 1".to_string());
        }
        if self.detection.every_n_frames == Some(0) {
            return Err("every_n_frames must be at least 1".to_string());
        }

        if self.lifecycle.max_restarts == 0 {
            return Err("max_restarts must be at least 1".to_string());
        }
        if self.lifecycle.restart_window_secs == 0 {
            return Err("restart_window_secs must be positive".to_string());
        }

        if self.health.keepalive_interval_secs == 0 || self.health.stats_interval_secs == 0 {
            return Err("Health intervals must be positive".to_string());
        }

        if self.publisher.interval_ms == 0 {
            return Err("Publisher interval must be positive".to_string());
        }
        if self.publisher.snapshot_jpeg_quality == 0 || self.publisher.snapshot_jpeg_quality > 100 {
            return Err("Snapshot JPEG quality must be between 1 and 100".to_string());
        }

        if self.still.default_quality == 0 || self.still.default_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        if self.bus.url.is_empty() {
            return Err("Bus URL must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SkycastConfig::default();
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.camera.setup_attempts, 3);
        assert_eq!(config.detection.earth_person_threshold, 0.45);
        assert_eq!(config.detection.sea_person_threshold, 0.30);
        assert_eq!(config.detection.model_path, PathBuf::from("model_fp32.onnx"));
        assert_eq!(config.detection.input_size, 640);
        assert_eq!(config.lifecycle.max_restarts, 3);
        assert_eq!(config.lifecycle.cooldown(), Duration::from_secs(30));
        assert_eq!(config.bus.reconnect_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = SkycastConfig::default();
        bad.camera.width = 0;
        assert!(bad.validate().is_err());

        let mut bad = SkycastConfig::default();
        bad.detection.sea_person_threshold = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = SkycastConfig::default();
        bad.detection.every_n_frames = Some(0);
        assert!(bad.validate().is_err());

        let mut bad = SkycastConfig::default();
        bad.detection.input_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = SkycastConfig::default();
        bad.still.default_quality = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_stride() {
        let mut detection = DetectionConfig::default();
        assert_eq!(detection.stride(30), 3);
        assert_eq!(detection.stride(5), 1);
        assert_eq!(detection.stride(25), 3);

        detection.every_n_frames = Some(7);
        assert_eq!(detection.stride(30), 7);
    }

    #[test]
    fn test_threshold_for() {
        let detection = DetectionConfig::default();
        assert_eq!(detection.threshold_for(DetectionClass::EarthPerson), 0.45);
        assert_eq!(detection.threshold_for(DetectionClass::SeaPerson), 0.30);
    }

    #[test]
    fn test_snapshot_interval_clamped() {
        let mut publisher = PublisherConfig::default();
        publisher.snapshot_interval_secs = 5;
        assert_eq!(publisher.snapshot_interval(), Duration::from_secs(60));

        publisher.snapshot_interval_secs = 120;
        assert_eq!(publisher.snapshot_interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("skycast.toml");

        let mut config = SkycastConfig::default();
        config.device.id = "drone-042".to_string();
        config.save_to_file(&config_path).unwrap();

        let loaded = SkycastConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&SkycastConfig::default()).unwrap();
        for section in ["[device]", "[camera]", "[detection]", "[lifecycle]", "[bus]"] {
            assert!(toml_string.contains(section), "missing {}", section);
        }
        assert!(toml_string.contains("sea_person_threshold"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("partial.toml");
        fs::write(&config_path, "[camera]\nfps = 15\n").unwrap();

        let loaded = SkycastConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.camera.fps, 15);
        assert_eq!(loaded.camera.width, 640);
        assert_eq!(loaded.lifecycle.cooldown_secs, 30);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = SkycastConfig::load_from_file("nonexistent_file.toml");
        assert_eq!(result.unwrap().camera.fps, 30);
    }

    #[test]
    fn test_load_layered_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("layered.toml");
        fs::write(&config_path, "[lifecycle]\nmax_restarts = 5\n").unwrap();

        let loaded = SkycastConfig::load_layered(&config_path).unwrap();
        assert_eq!(loaded.lifecycle.max_restarts, 5);
        assert_eq!(loaded.lifecycle.restart_window_secs, 10);
    }
}
