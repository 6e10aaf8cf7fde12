//! Session configuration
//!
//! Every field has a documented default; a config loaded from a partial JSON
//! mapping gets defaults for the missing keys. `validate` is the single place
//! invalid combinations are rejected, and every session calls it before any
//! process or socket is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::ActionBounds;
use crate::error::{DonkeyError, Result};
use crate::levels;

/// `exe_path` value meaning "the simulator is managed elsewhere"
pub const REMOTE_EXE: &str = "remote";

/// Largest lidar grid (sweep points times levels) a session may request
pub const MAX_LIDAR_POINTS: usize = 1 << 16;

/// Configuration for one simulator session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Scene name or environment id to load
    pub level: String,
    /// Simulator host to dial
    pub host: String,
    /// Simulator port
    pub port: u16,
    /// Simulator executable; `None` or `"remote"` dials an external instance
    pub exe_path: Option<String>,
    /// Wait after launching the executable before the first connection attempt
    #[serde(with = "secs")]
    pub start_delay: Duration,
    /// Cross-track error beyond which the episode is over
    pub max_cte: f64,
    /// Simulator ticks per agent step
    pub frame_skip: u32,
    /// Camera sensor
    pub camera: CameraConfig,
    pub steer_limit: f64,
    pub throttle_min: f64,
    pub throttle_max: f64,
    /// Lidar sensor, disabled when absent
    pub lidar: Option<LidarConfig>,
    /// Car appearance
    pub car: CarConfig,
    /// Racer identity
    pub racer: RacerInfo,
    /// Episode ends once this many laps are completed
    pub max_laps: Option<u32>,
    /// Episode ends once simulator time reaches this many seconds
    pub max_episode_time: Option<f64>,
    /// Connection attempts before giving up
    pub connect_retries: u32,
    /// Initial delay between connection attempts, doubled each retry
    #[serde(with = "secs")]
    pub connect_backoff: Duration,
    /// Per-attempt connect timeout
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Bound on the wait for the scene to load
    #[serde(with = "secs")]
    pub load_timeout: Duration,
    /// Bound on the wait for a fresh telemetry frame
    #[serde(with = "secs")]
    pub liveness_timeout: Duration,
    /// Pause around the reset handbrake sequence
    #[serde(with = "secs")]
    pub settle_interval: Duration,
    /// Grace period before a launched simulator is killed
    #[serde(with = "secs")]
    pub quit_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            level: levels::DEFAULT_LEVEL.to_string(),
            host: "127.0.0.1".to_string(),
            port: 9091,
            exe_path: None,
            start_delay: Duration::from_secs(5),
            max_cte: 8.0,
            frame_skip: 1,
            camera: CameraConfig::default(),
            steer_limit: 1.0,
            throttle_min: 0.0,
            throttle_max: 1.0,
            lidar: None,
            car: CarConfig::default(),
            racer: RacerInfo::default(),
            max_laps: None,
            max_episode_time: None,
            connect_retries: 10,
            connect_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(10),
            settle_interval: Duration::from_millis(100),
            quit_grace: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Default configuration for a level (scene name or environment id)
    pub fn for_level(level: &str) -> Self {
        Self {
            level: levels::resolve_scene(level).to_string(),
            ..Default::default()
        }
    }

    /// Parse from a JSON mapping; missing keys take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Scene name sent in the load request
    pub fn scene_name(&self) -> &str {
        levels::resolve_scene(&self.level)
    }

    /// Executable to launch, if this session owns the simulator process
    pub fn launch_path(&self) -> Option<PathBuf> {
        match self.exe_path.as_deref() {
            None | Some("") | Some(REMOTE_EXE) => None,
            Some(path) => Some(PathBuf::from(path)),
        }
    }

    pub fn bounds(&self) -> ActionBounds {
        ActionBounds {
            steer_limit: self.steer_limit,
            throttle_min: self.throttle_min,
            throttle_max: self.throttle_max,
        }
    }

    /// Reject invalid combinations before a session starts
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(invalid("level must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        for (name, value) in [
            ("steer_limit", self.steer_limit),
            ("throttle_min", self.throttle_min),
            ("throttle_max", self.throttle_max),
            ("max_cte", self.max_cte),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{} must be finite, got {}", name, value)));
            }
        }
        if self.steer_limit <= 0.0 {
            return Err(invalid(format!(
                "steer_limit must be positive, got {}",
                self.steer_limit
            )));
        }
        if self.throttle_min > self.throttle_max {
            return Err(invalid(format!(
                "throttle_min ({}) exceeds throttle_max ({})",
                self.throttle_min, self.throttle_max
            )));
        }
        if self.max_cte <= 0.0 {
            return Err(invalid(format!("max_cte must be positive, got {}", self.max_cte)));
        }
        if self.frame_skip == 0 {
            return Err(invalid("frame_skip must be at least 1"));
        }
        if let Some(limit) = self.max_episode_time {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(invalid(format!("max_episode_time must be positive, got {}", limit)));
            }
        }
        if self.connect_retries == 0 {
            return Err(invalid("connect_retries must be at least 1"));
        }
        self.camera.validate()?;
        if let Some(lidar) = &self.lidar {
            lidar.validate()?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> DonkeyError {
    DonkeyError::InvalidConfig(message.into())
}

/// Camera frame dimensions, serialized as `[height, width, channels]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct Resolution {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Resolution {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Bytes in one frame
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(120, 160, 3)
    }
}

impl From<[usize; 3]> for Resolution {
    fn from([height, width, channels]: [usize; 3]) -> Self {
        Self::new(height, width, channels)
    }
}

impl From<Resolution> for [usize; 3] {
    fn from(resolution: Resolution) -> Self {
        resolution.shape()
    }
}

/// Image encoding requested from the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageEncoding {
    #[default]
    Jpg,
    Png,
}

impl ImageEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageEncoding::Jpg => "JPG",
            ImageEncoding::Png => "PNG",
        }
    }
}

/// Camera sensor configuration; unset optics keep the simulator's defaults
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub resolution: Resolution,
    pub encoding: ImageEncoding,
    pub fov: Option<f64>,
    pub fish_eye_x: Option<f64>,
    pub fish_eye_y: Option<f64>,
    /// Mount offset (x, y, z)
    pub offset: Option<[f64; 3]>,
    /// Mount rotation (x, y, z) in degrees
    pub rot: Option<[f64; 3]>,
}

impl CameraConfig {
    fn validate(&self) -> Result<()> {
        let res = self.resolution;
        if res.height == 0 || res.width == 0 {
            return Err(invalid(format!(
                "camera resolution must be non-zero, got {:?}",
                res.shape()
            )));
        }
        if res.channels != 1 && res.channels != 3 {
            return Err(invalid(format!(
                "camera channels must be 1 or 3, got {}",
                res.channels
            )));
        }
        Ok(())
    }
}

/// Lidar sensor geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarConfig {
    /// Horizontal degrees between readings in one sweep
    pub deg_per_sweep_inc: f64,
    /// Downward tilt of the first sweep
    pub deg_ang_down: f64,
    /// Vertical degrees between sweep levels
    pub deg_ang_delta: f64,
    pub num_sweeps_levels: u32,
    pub max_range: f64,
    pub noise: f64,
    /// Mount offset (x, y, z)
    pub offset: [f64; 3],
    pub rot_x: f64,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            deg_per_sweep_inc: 2.0,
            deg_ang_down: 0.0,
            deg_ang_delta: -1.0,
            num_sweeps_levels: 1,
            max_range: 50.0,
            noise: 0.5,
            offset: [0.0, 0.5, 0.5],
            rot_x: 0.0,
        }
    }
}

impl LidarConfig {
    /// Readings in one 360 degree sweep
    pub fn points_per_sweep(&self) -> usize {
        (360.0 / self.deg_per_sweep_inc) as usize
    }

    /// Total readings in one frame
    pub fn total_points(&self) -> usize {
        self.points_per_sweep() * self.num_sweeps_levels as usize
    }

    fn validate(&self) -> Result<()> {
        let values = [
            self.deg_per_sweep_inc,
            self.deg_ang_down,
            self.deg_ang_delta,
            self.max_range,
            self.noise,
            self.rot_x,
        ];
        if values.iter().chain(self.offset.iter()).any(|v| !v.is_finite()) {
            return Err(invalid("lidar geometry must be finite"));
        }
        if self.deg_per_sweep_inc <= 0.0 || self.deg_per_sweep_inc > 360.0 {
            return Err(invalid(format!(
                "lidar deg_per_sweep_inc must be in (0, 360], got {}",
                self.deg_per_sweep_inc
            )));
        }
        if self.deg_ang_delta == 0.0 {
            return Err(invalid("lidar deg_ang_delta must be non-zero"));
        }
        if self.num_sweeps_levels == 0 {
            return Err(invalid("lidar num_sweeps_levels must be at least 1"));
        }
        let grid = (360.0 / self.deg_per_sweep_inc).floor() * f64::from(self.num_sweeps_levels);
        if grid > MAX_LIDAR_POINTS as f64 {
            return Err(invalid(format!(
                "lidar grid of {} points exceeds {}",
                grid, MAX_LIDAR_POINTS
            )));
        }
        if self.max_range <= 0.0 {
            return Err(invalid("lidar max_range must be positive"));
        }
        Ok(())
    }
}

/// Car appearance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarConfig {
    pub body_style: String,
    pub body_rgb: [u8; 3],
    pub car_name: String,
    pub font_size: u32,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            body_style: "donkey".to_string(),
            body_rgb: [128, 128, 128],
            car_name: "car".to_string(),
            font_size: 100,
        }
    }
}

/// Racer identity shown by the simulator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RacerInfo {
    pub racer_name: String,
    pub bio: String,
    pub country: String,
    pub guid: String,
}

/// Durations as fractional seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9091);
        assert_eq!(config.frame_skip, 1);
        assert_eq!(config.max_cte, 8.0);
        assert_eq!(config.start_delay, Duration::from_secs(5));
        assert_eq!(config.camera.resolution.shape(), [120, 160, 3]);
        assert!(config.lidar.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"level": "donkey-warehouse-v0", "port": 9000, "start_delay": 1.5,
                "camera": {"resolution": [64, 80, 1]}, "lidar": {"num_sweeps_levels": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.scene_name(), "warehouse");
        assert_eq!(config.port, 9000);
        assert_eq!(config.start_delay, Duration::from_millis(1500));
        assert_eq!(config.camera.resolution, Resolution::new(64, 80, 1));
        assert_eq!(config.host, "127.0.0.1");
        let lidar = config.lidar.unwrap();
        assert_eq!(lidar.num_sweeps_levels, 2);
        assert_eq!(lidar.deg_per_sweep_inc, 2.0);
        assert_eq!(lidar.total_points(), 360);
    }

    #[test]
    fn test_throttle_order_rejected() {
        let config = SessionConfig {
            throttle_min: 0.8,
            throttle_max: 0.2,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("throttle_min"));
    }

    #[test]
    fn test_non_positive_steer_rejected() {
        let config = SessionConfig {
            steer_limit: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DonkeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let config = SessionConfig {
            max_cte: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let json = r#"{"throttle_min": 0.5, "throttle_max": 0.1}"#;
        assert!(SessionConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"start_delay": -1.0}"#).is_err());
    }

    #[test]
    fn test_bad_camera_rejected() {
        let mut config = SessionConfig::default();
        config.camera.resolution = Resolution::new(120, 160, 4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_lidar_grid_rejected() {
        let mut config = SessionConfig {
            lidar: Some(LidarConfig::default()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        if let Some(lidar) = config.lidar.as_mut() {
            lidar.deg_per_sweep_inc = 1e-9;
        }
        assert!(config.validate().is_err());

        config.lidar = Some(LidarConfig {
            deg_per_sweep_inc: 0.5,
            num_sweeps_levels: 1000,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_launch_path() {
        let mut config = SessionConfig::default();
        assert!(config.launch_path().is_none());

        config.exe_path = Some(REMOTE_EXE.to_string());
        assert!(config.launch_path().is_none());

        config.exe_path = Some("/opt/donkey/donkey_sim.x86_64".to_string());
        assert_eq!(
            config.launch_path(),
            Some(PathBuf::from("/opt/donkey/donkey_sim.x86_64"))
        );
    }

    #[test]
    fn test_for_level() {
        let config = SessionConfig::for_level("donkey-mountain-track-v0");
        assert_eq!(config.level, "mountain_track");
        assert_eq!(config.bounds().high(), [1.0, 1.0]);
    }

    #[test]
    fn test_resolution_serializes_as_array() {
        let json = serde_json::to_string(&Resolution::new(1, 2, 3)).unwrap();
        assert_eq!(json, "[1,2,3]");
    }
}
