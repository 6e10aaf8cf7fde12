//! Wire protocol for Rust <-> simulator communication
//!
//! Messages are JSON objects internally tagged by `msg_type`, one per line.
//! Format: {"msg_type": "kind", ...fields}
//!
//! The simulator expects numeric command fields as decimal strings, so the
//! outbound variants carry `String`s and are built through the constructors
//! below. Inbound telemetry tolerates missing and unknown fields, and unknown
//! message kinds decode to [`SimMessage::Unknown`].

use donkey_rl_core::{CameraConfig, CarConfig, LidarConfig, RacerInfo};
use serde::{Deserialize, Serialize};

/// Messages exchanged with the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum SimMessage {
    // === Simulator -> Rust ===
    /// One tick of simulator state
    Telemetry(Box<TelemetryPayload>),

    /// Car spawned in the requested scene
    CarLoaded,

    /// Simulator is at the scene selection menu
    SceneSelectionReady,

    /// Scenes available in this build
    SceneNames {
        #[serde(default)]
        scene_names: Vec<String>,
    },

    /// Protocol version reply
    ProtocolVersion {
        #[serde(default)]
        version: serde_json::Value,
    },

    /// Simulator wants the car/camera configuration (re)sent
    NeedCarConfig,

    /// Car skipped a checkpoint
    MissedCheckpoint,

    /// Car crossed the start/finish line
    CollisionWithStartingLine {
        #[serde(default, rename = "timeStamp")]
        time_stamp: f64,
    },

    /// Simulator aborted the scene
    Aborted,

    /// Keepalive
    Ping,

    // === Rust -> Simulator ===
    GetProtocolVersion,

    GetSceneNames,

    LoadScene { scene_name: String },

    /// Steering/throttle/brake command
    Control {
        steering: String,
        throttle: String,
        brake: String,
    },

    ResetCar,

    ExitScene,

    QuitApp,

    CarConfig {
        body_style: String,
        body_r: String,
        body_g: String,
        body_b: String,
        car_name: String,
        font_size: String,
    },

    RacerInfo {
        racer_name: String,
        car_name: String,
        bio: String,
        country: String,
        guid: String,
    },

    CamConfig {
        fov: String,
        fish_eye_x: String,
        fish_eye_y: String,
        img_w: String,
        img_h: String,
        img_d: String,
        img_enc: String,
        offset_x: String,
        offset_y: String,
        offset_z: String,
        rot_x: String,
        rot_y: String,
        rot_z: String,
    },

    LidarConfig {
        #[serde(rename = "degPerSweepInc")]
        deg_per_sweep_inc: String,
        #[serde(rename = "degAngDown")]
        deg_ang_down: String,
        #[serde(rename = "degAngDelta")]
        deg_ang_delta: String,
        #[serde(rename = "numSweepsLevels")]
        num_sweeps_levels: String,
        #[serde(rename = "maxRange")]
        max_range: String,
        noise: String,
        offset_x: String,
        offset_y: String,
        offset_z: String,
        rot_x: String,
    },

    /// Any kind this client does not know about
    #[serde(other)]
    Unknown,
}

/// Raw telemetry fields as sent by the simulator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryPayload {
    pub steering_angle: f64,
    pub throttle: f64,
    pub speed: f64,
    /// Base64 JPEG/PNG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Base64 JPEG/PNG from the secondary camera
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<String>,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    /// Roll, pitch, yaw in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car: Option<[f64; 3]>,
    pub cte: f64,
    pub time: f64,
    #[serde(rename = "activeNode")]
    pub active_node: i64,
    #[serde(rename = "totalNodes")]
    pub total_nodes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_vel: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lap_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lap_time: Option<f64>,
    pub dq: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lidar: Option<Vec<LidarPoint>>,
}

/// One lidar return
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarPoint {
    /// Distance, negative when nothing was hit
    pub d: f64,
    /// Horizontal angle in degrees
    pub rx: f64,
    /// Vertical angle in degrees
    pub ry: f64,
}

impl SimMessage {
    /// Control command
    pub fn control(steering: f64, throttle: f64, brake: f64) -> Self {
        SimMessage::Control {
            steering: steering.to_string(),
            throttle: throttle.to_string(),
            brake: brake.to_string(),
        }
    }

    /// Scene load request
    pub fn load_scene(scene_name: impl Into<String>) -> Self {
        SimMessage::LoadScene {
            scene_name: scene_name.into(),
        }
    }

    pub fn car_config(car: &CarConfig) -> Self {
        let [r, g, b] = car.body_rgb;
        SimMessage::CarConfig {
            body_style: car.body_style.clone(),
            body_r: r.to_string(),
            body_g: g.to_string(),
            body_b: b.to_string(),
            car_name: car.car_name.clone(),
            font_size: car.font_size.to_string(),
        }
    }

    pub fn racer_info(racer: &RacerInfo, car: &CarConfig) -> Self {
        SimMessage::RacerInfo {
            racer_name: racer.racer_name.clone(),
            car_name: car.car_name.clone(),
            bio: racer.bio.clone(),
            country: racer.country.clone(),
            guid: racer.guid.clone(),
        }
    }

    /// Camera config; unset optics are sent as 0, which the simulator reads
    /// as "keep the default"
    pub fn cam_config(camera: &CameraConfig) -> Self {
        let res = camera.resolution;
        let [offset_x, offset_y, offset_z] = camera.offset.unwrap_or_default();
        let [rot_x, rot_y, rot_z] = camera.rot.unwrap_or_default();
        SimMessage::CamConfig {
            fov: camera.fov.unwrap_or(0.0).to_string(),
            fish_eye_x: camera.fish_eye_x.unwrap_or(0.0).to_string(),
            fish_eye_y: camera.fish_eye_y.unwrap_or(0.0).to_string(),
            img_w: res.width.to_string(),
            img_h: res.height.to_string(),
            img_d: res.channels.to_string(),
            img_enc: camera.encoding.as_str().to_string(),
            offset_x: offset_x.to_string(),
            offset_y: offset_y.to_string(),
            offset_z: offset_z.to_string(),
            rot_x: rot_x.to_string(),
            rot_y: rot_y.to_string(),
            rot_z: rot_z.to_string(),
        }
    }

    pub fn lidar_config(lidar: &LidarConfig) -> Self {
        let [offset_x, offset_y, offset_z] = lidar.offset;
        SimMessage::LidarConfig {
            deg_per_sweep_inc: lidar.deg_per_sweep_inc.to_string(),
            deg_ang_down: lidar.deg_ang_down.to_string(),
            deg_ang_delta: lidar.deg_ang_delta.to_string(),
            num_sweeps_levels: lidar.num_sweeps_levels.to_string(),
            max_range: lidar.max_range.to_string(),
            noise: lidar.noise.to_string(),
            offset_x: offset_x.to_string(),
            offset_y: offset_y.to_string(),
            offset_z: offset_z.to_string(),
            rot_x: lidar.rot_x.to_string(),
        }
    }

    /// Parsed (steering, throttle, brake) of a control command
    pub fn control_values(&self) -> Option<(f64, f64, f64)> {
        match self {
            SimMessage::Control {
                steering,
                throttle,
                brake,
            } => Some((
                steering.parse().ok()?,
                throttle.parse().ok()?,
                brake.parse().ok()?,
            )),
            _ => None,
        }
    }

    /// `msg_type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SimMessage::Telemetry(_) => "telemetry",
            SimMessage::CarLoaded => "car_loaded",
            SimMessage::SceneSelectionReady => "scene_selection_ready",
            SimMessage::SceneNames { .. } => "scene_names",
            SimMessage::ProtocolVersion { .. } => "protocol_version",
            SimMessage::NeedCarConfig => "need_car_config",
            SimMessage::MissedCheckpoint => "missed_checkpoint",
            SimMessage::CollisionWithStartingLine { .. } => "collision_with_starting_line",
            SimMessage::Aborted => "aborted",
            SimMessage::Ping => "ping",
            SimMessage::GetProtocolVersion => "get_protocol_version",
            SimMessage::GetSceneNames => "get_scene_names",
            SimMessage::LoadScene { .. } => "load_scene",
            SimMessage::Control { .. } => "control",
            SimMessage::ResetCar => "reset_car",
            SimMessage::ExitScene => "exit_scene",
            SimMessage::QuitApp => "quit_app",
            SimMessage::CarConfig { .. } => "car_config",
            SimMessage::RacerInfo { .. } => "racer_info",
            SimMessage::CamConfig { .. } => "cam_config",
            SimMessage::LidarConfig { .. } => "lidar_config",
            SimMessage::Unknown => "unknown",
        }
    }
}

/// Serialize a message to JSON bytes (without the line terminator)
pub fn serialize(msg: &SimMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

/// Deserialize a single message from JSON bytes
pub fn deserialize(bytes: &[u8]) -> Result<SimMessage, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Decode every message in a chunk.
///
/// The simulator occasionally writes several objects back to back without a
/// separator; they are split here. Decoding stops at the first malformed
/// object in the chunk.
pub fn deserialize_all(bytes: &[u8]) -> Vec<Result<SimMessage, serde_json::Error>> {
    let mut messages = Vec::new();
    for msg in serde_json::Deserializer::from_slice(bytes).into_iter::<SimMessage>() {
        let failed = msg.is_err();
        messages.push(msg);
        if failed {
            break;
        }
    }
    messages
}
