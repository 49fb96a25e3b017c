use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::geometry::{DEG_2_RAD, RAD_2_DEG};
use crate::playspace::ManualCalib;
use crate::tracker::TrackerRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file with camera intrinsics and marker boards
    #[serde(default = "default_calibration_path")]
    pub calibration_path: String,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub manual_calib: ManualCalibConfig,
    #[serde(default = "default_trackers")]
    pub trackers: Vec<TrackerConfig>,
}

/// Frame rotation applied in the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameRotation {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "cw")]
    Clockwise,
    #[serde(rename = "180")]
    Half,
    #[serde(rename = "ccw")]
    CounterClockwise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device index ("0") or a URL / file path
    #[serde(default = "default_camera_address")]
    pub address: String,
    /// OpenCV capture backend (0 = any)
    #[serde(default)]
    pub api: i32,
    /// 0 keeps the driver default
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub fps: i32,
    #[serde(default)]
    pub rotate: FrameRotation,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default = "default_true")]
    pub mjpeg: bool,
    #[serde(default)]
    pub extra: CameraExtraConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraExtraConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub exposure: f64,
    #[serde(default)]
    pub auto_exposure: f64,
    #[serde(default)]
    pub gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Camera latency in seconds, added to every time offset sent to the driver
    #[serde(default)]
    pub latency: f64,
    #[serde(default = "default_true")]
    pub circular_window: bool,
    /// Search radius as a fraction of the image height
    #[serde(default = "default_search_window")]
    pub search_window: f64,
    /// Shorter side of the preview image in pixels
    #[serde(default = "default_preview_size")]
    pub preview_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_true")]
    pub use_predictive: bool,
    /// 0 disables depth smoothing
    #[serde(default)]
    pub depth_smoothing: f64,
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f64,
    #[serde(default)]
    pub additional_smoothing: f64,
    #[serde(default = "default_dictionary")]
    pub marker_dictionary: String,
    /// Open playspace calibration when tracking starts
    #[serde(default)]
    pub manual_recalibrate: bool,
    #[serde(default)]
    pub multicam_autocalib: bool,
    #[serde(default)]
    pub lock_height_calib: bool,
    #[serde(default)]
    pub disable_openvr_api: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_saved_frames")]
    pub saved_frames: i32,
    /// Overrides the driver version this build expects
    #[serde(default)]
    pub expected_version: Option<String>,
}

/// Manual playspace calibration in user facing units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualCalibConfig {
    /// centimeters
    #[serde(default)]
    pub pos_offset: [f64; 3],
    /// (pitch, yaw, roll) in degrees
    #[serde(default)]
    pub angle_offset: [f64; 3],
    /// percent, 80..=120
    #[serde(default = "default_scale_percent")]
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub role: TrackerRole,
}

const M_2_CM: f64 = 100.0;
pub const SCALE_PERCENT_MIN: f64 = 80.0;
pub const SCALE_PERCENT_MAX: f64 = 120.0;

fn default_true() -> bool { true }
fn default_camera_address() -> String { "0".to_string() }
fn default_search_window() -> f64 { 0.25 }
fn default_preview_size() -> i32 { 480 }
fn default_smoothing_factor() -> f64 { 0.5 }
fn default_dictionary() -> String { "DICT_4X4_50".to_string() }
fn default_pipe_name() -> String { "AprilTagPipeIn".to_string() }
fn default_timeout_ms() -> u64 { 2000 }
fn default_saved_frames() -> i32 { 120 }
fn default_scale_percent() -> f64 { 100.0 }
fn default_calibration_path() -> String { "calibration.json".to_string() }
fn default_trackers() -> Vec<TrackerConfig> {
    vec![
        TrackerConfig { role: TrackerRole::Waist },
        TrackerConfig { role: TrackerRole::LeftFoot },
        TrackerConfig { role: TrackerRole::RightFoot },
    ]
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            address: default_camera_address(),
            api: 0,
            width: 0,
            height: 0,
            fps: 0,
            rotate: FrameRotation::None,
            mirror: false,
            mjpeg: true,
            extra: CameraExtraConfig::default(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            latency: 0.0,
            circular_window: true,
            search_window: default_search_window(),
            preview_size: default_preview_size(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            use_predictive: true,
            depth_smoothing: 0.0,
            smoothing_factor: default_smoothing_factor(),
            additional_smoothing: 0.0,
            marker_dictionary: default_dictionary(),
            manual_recalibrate: false,
            multicam_autocalib: false,
            lock_height_calib: false,
            disable_openvr_api: false,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pipe_name: default_pipe_name(),
            timeout_ms: default_timeout_ms(),
            saved_frames: default_saved_frames(),
            expected_version: None,
        }
    }
}

impl Default for ManualCalibConfig {
    fn default() -> Self {
        Self {
            pos_offset: [0.0; 3],
            angle_offset: [0.0; 3],
            scale: default_scale_percent(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration_path: default_calibration_path(),
            camera: CameraConfig::default(),
            video: VideoConfig::default(),
            tracking: TrackingConfig::default(),
            driver: DriverConfig::default(),
            manual_calib: ManualCalibConfig::default(),
            trackers: default_trackers(),
        }
    }
}

impl ManualCalibConfig {
    /// Meters, radians and a scale factor.
    pub fn to_real(&self) -> ManualCalib {
        let [px, py, pz] = self.pos_offset;
        let [ax, ay, az] = self.angle_offset;
        ManualCalib {
            pos_offset: Vector3::new(px, py, pz) / M_2_CM,
            angle_offset: Vector3::new(ax, ay, az) * DEG_2_RAD,
            scale: self.scale.clamp(SCALE_PERCENT_MIN, SCALE_PERCENT_MAX) / 100.0,
        }
    }

    pub fn from_real(real: &ManualCalib) -> Self {
        let p = real.pos_offset * M_2_CM;
        let a = real.angle_offset * RAD_2_DEG;
        Self {
            pos_offset: [p.x, p.y, p.z],
            angle_offset: [a.x, a.y, a.z],
            scale: real.scale * 100.0,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.sanitize();
        Ok(config)
    }

    /// Load `path`, falling back to defaults if it is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}, using default config", e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config")?;
        Ok(())
    }

    pub fn roles(&self) -> Vec<TrackerRole> {
        self.trackers.iter().map(|t| t.role).collect()
    }

    /// Clamp values that have a valid range.
    fn sanitize(&mut self) {
        let t = &mut self.tracking;
        t.smoothing_factor = clamp_logged("smoothing_factor", t.smoothing_factor, 0.0, 1.0);
        t.depth_smoothing = clamp_logged("depth_smoothing", t.depth_smoothing, 0.0, 1.0);
        self.video.search_window = clamp_logged("search_window", self.video.search_window, 0.01, 1.0);
        self.manual_calib.scale = clamp_logged(
            "manual_calib.scale",
            self.manual_calib.scale,
            SCALE_PERCENT_MIN,
            SCALE_PERCENT_MAX,
        );
        if self.video.preview_size < 1 {
            warn!(value = self.video.preview_size, "preview_size out of range");
            self.video.preview_size = 1;
        }
        if self.driver.timeout_ms < 1 {
            // sockets reject a zero timeout
            warn!("driver.timeout_ms must be positive");
            self.driver.timeout_ms = 1;
        }
    }
}

fn clamp_logged(name: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(value, clamped, "{} out of range", name);
    }
    clamped
}
