//! Decoded telemetry frames

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;

use crate::config::Resolution;

/// Per-step info mapping: every decoded telemetry field by name
pub type Info = HashMap<String, serde_json::Value>;

/// Hit indicator value meaning "no collision"
pub const NO_HIT: &str = "none";

/// Row-major image buffer, one byte per channel
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl Image {
    /// Black image of the given resolution
    pub fn zeros(resolution: Resolution) -> Self {
        Self {
            height: resolution.height,
            width: resolution.width,
            channels: resolution.channels,
            data: vec![0; resolution.len()],
        }
    }

    /// Wrap raw bytes, checking the length matches the shape
    pub fn from_raw(resolution: Resolution, data: Vec<u8>) -> Option<Self> {
        (data.len() == resolution.len()).then(|| Self {
            height: resolution.height,
            width: resolution.width,
            channels: resolution.channels,
            data,
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.height, self.width, self.channels)
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    /// Byte at (row, col, channel)
    pub fn get(&self, row: usize, col: usize, channel: usize) -> Option<u8> {
        if row >= self.height || col >= self.width || channel >= self.channels {
            return None;
        }
        self.data
            .get((row * self.width + col) * self.channels + channel)
            .copied()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("shape", &self.shape())
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One decoded snapshot of simulator state.
///
/// Fields the simulator omits stay at zero, so every syntactically valid
/// telemetry message produces a complete frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryFrame {
    /// Primary camera
    pub image: Image,
    /// Secondary camera, when the simulator sends one
    pub image_b: Option<Image>,
    /// Position (x, y, z)
    pub pos: [f64; 3],
    /// Orientation (roll, pitch, yaw) in degrees
    pub car: [f64; 3],
    /// Linear velocity (x, y, z)
    pub vel: [f64; 3],
    pub speed: f64,
    /// Velocity along the car's heading
    pub forward_vel: f64,
    /// Cross-track error
    pub cte: f64,
    /// Name of the object hit, `"none"` when clear
    pub hit: String,
    pub gyro: [f64; 3],
    pub accel: [f64; 3],
    /// Lidar ranges; negative entries are slots with no return
    pub lidar: Vec<f32>,
    pub lap_count: u32,
    pub last_lap_time: f64,
    /// Steering echoed by the simulator
    pub steering_angle: f64,
    /// Throttle echoed by the simulator
    pub throttle: f64,
    /// Simulator clock in seconds
    pub time: f64,
    pub active_node: i64,
    pub total_nodes: i64,
    pub missed_checkpoint: bool,
    /// Disqualified by race control
    pub dq: bool,
}

impl TelemetryFrame {
    /// Placeholder frame before any telemetry arrives
    pub fn blank(resolution: Resolution) -> Self {
        Self {
            image: Image::zeros(resolution),
            hit: NO_HIT.to_string(),
            ..Default::default()
        }
    }

    /// Whether the car hit something
    pub fn is_collision(&self) -> bool {
        !self.hit.is_empty() && self.hit != NO_HIT
    }

    /// Number of lidar slots that registered a return
    pub fn valid_lidar_readings(&self) -> usize {
        self.lidar.iter().filter(|d| **d >= 0.0).count()
    }

    /// Flat info mapping for logging and analysis
    pub fn info(&self) -> Info {
        let mut info = Info::new();
        info.insert("pos".into(), json!(self.pos));
        info.insert("car".into(), json!(self.car));
        info.insert("vel".into(), json!(self.vel));
        info.insert("speed".into(), json!(self.speed));
        info.insert("forward_vel".into(), json!(self.forward_vel));
        info.insert("cte".into(), json!(self.cte));
        info.insert("hit".into(), json!(self.hit));
        info.insert("gyro".into(), json!(self.gyro));
        info.insert("accel".into(), json!(self.accel));
        info.insert("lidar".into(), json!(self.lidar));
        info.insert("lap_count".into(), json!(self.lap_count));
        info.insert("last_lap_time".into(), json!(self.last_lap_time));
        info.insert("steering_angle".into(), json!(self.steering_angle));
        info.insert("throttle".into(), json!(self.throttle));
        info.insert("time".into(), json!(self.time));
        info.insert("active_node".into(), json!(self.active_node));
        info.insert("total_nodes".into(), json!(self.total_nodes));
        info.insert("missed_checkpoint".into(), json!(self.missed_checkpoint));
        info.insert("dq".into(), json!(self.dq));
        if let Some(image_b) = &self.image_b {
            info.insert(
                "image_b".into(),
                json!({
                    "shape": image_b.shape(),
                    "data": STANDARD.encode(&image_b.data),
                }),
            );
        }
        info
    }
}
