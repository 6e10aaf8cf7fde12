//! Telemetry decoding
//!
//! Turns a raw [`TelemetryPayload`] into a [`TelemetryFrame`]: camera images
//! are base64-decoded and checked against the configured resolution, lidar
//! returns are placed into a fixed grid of sweep slots, and forward velocity
//! is derived from heading when the simulator does not report it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use donkey_rl_core::telemetry::NO_HIT;
use donkey_rl_core::{
    DonkeyError, Image, LidarConfig, Resolution, Result, SessionConfig, TelemetryFrame,
};
use image::{DynamicImage, GenericImageView};
use tracing::warn;

use crate::protocol::{LidarPoint, TelemetryPayload};

/// Lidar slot value for "no return"
pub const LIDAR_NO_RETURN: f32 = -1.0;

/// Decodes payloads for one session's sensor configuration
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    resolution: Resolution,
    lidar: Option<LidarConfig>,
}

impl FrameDecoder {
    pub fn new(resolution: Resolution, lidar: Option<LidarConfig>) -> Self {
        Self { resolution, lidar }
    }

    pub fn for_session(config: &SessionConfig) -> Self {
        Self::new(config.camera.resolution, config.lidar.clone())
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Frame to expose before any telemetry arrives
    pub fn blank(&self) -> TelemetryFrame {
        TelemetryFrame::blank(self.resolution)
    }

    /// Decode one payload
    pub fn decode(&self, payload: TelemetryPayload) -> Result<TelemetryFrame> {
        let image = match payload.image.as_deref() {
            Some(encoded) => decode_image(encoded, self.resolution)?,
            None => Image::zeros(self.resolution),
        };
        // The secondary camera is never configured; take it at whatever size it comes
        let image_b = match payload.image_b.as_deref() {
            Some(encoded) => match decode_image_native(encoded, self.resolution.channels) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!("Ignoring secondary camera image: {}", e);
                    None
                }
            },
            None => None,
        };

        let car = payload.car.unwrap_or_default();
        let vel = [payload.vel_x, payload.vel_y, payload.vel_z];
        let forward_vel = payload
            .forward_vel
            .unwrap_or_else(|| forward_velocity(vel, car[2]));

        let lidar = match &payload.lidar {
            None => Vec::new(),
            Some(points) => match &self.lidar {
                Some(geometry) => reconstruct_lidar(points, geometry),
                // No geometry to place returns with; keep them in arrival order
                None => points.iter().map(|p| p.d as f32).collect(),
            },
        };

        Ok(TelemetryFrame {
            image,
            image_b,
            pos: [payload.pos_x, payload.pos_y, payload.pos_z],
            car,
            vel,
            speed: payload.speed,
            forward_vel,
            cte: payload.cte,
            hit: payload.hit.unwrap_or_else(|| NO_HIT.to_string()),
            gyro: [payload.gyro_x, payload.gyro_y, payload.gyro_z],
            accel: [payload.accel_x, payload.accel_y, payload.accel_z],
            lidar,
            lap_count: payload.lap_count.unwrap_or(0),
            last_lap_time: payload.last_lap_time.unwrap_or(0.0),
            steering_angle: payload.steering_angle,
            throttle: payload.throttle,
            time: payload.time,
            active_node: payload.active_node,
            total_nodes: payload.total_nodes,
            missed_checkpoint: false,
            dq: payload.dq,
        })
    }
}

/// Decode a base64 JPEG/PNG into the configured shape
pub fn decode_image(encoded: &str, resolution: Resolution) -> Result<Image> {
    let decoded = load_encoded(encoded)?;
    let (width, height) = decoded.dimensions();
    let (width, height) = (width as usize, height as usize);
    if width != resolution.width || height != resolution.height {
        return Err(DonkeyError::MalformedFrame(format!(
            "image is {}x{}, expected {}x{}",
            width, height, resolution.width, resolution.height
        )));
    }
    into_image(decoded, resolution)
}

/// Decode a base64 JPEG/PNG at its own size
pub fn decode_image_native(encoded: &str, channels: usize) -> Result<Image> {
    let decoded = load_encoded(encoded)?;
    let (width, height) = decoded.dimensions();
    into_image(
        decoded,
        Resolution::new(height as usize, width as usize, channels),
    )
}

fn load_encoded(encoded: &str) -> Result<DynamicImage> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| DonkeyError::MalformedFrame(format!("image is not base64: {}", e)))?;
    image::load_from_memory(&bytes)
        .map_err(|e| DonkeyError::MalformedFrame(format!("image decode failed: {}", e)))
}

fn into_image(decoded: DynamicImage, resolution: Resolution) -> Result<Image> {
    let data = match resolution.channels {
        1 => decoded.to_luma8().into_raw(),
        _ => decoded.to_rgb8().into_raw(),
    };
    Image::from_raw(resolution, data).ok_or_else(|| {
        DonkeyError::MalformedFrame(format!(
            "image buffer does not match {:?}",
            resolution.shape()
        ))
    })
}

/// Velocity component along the heading given by `yaw_deg`.
///
/// The simulator is y-up, so heading lies in the x/z plane.
pub fn forward_velocity(vel: [f64; 3], yaw_deg: f64) -> f64 {
    let yaw = yaw_deg.to_radians();
    vel[0] * yaw.sin() + vel[2] * yaw.cos()
}

/// Place lidar returns into `num_sweeps_levels * points_per_sweep` slots.
///
/// Slot index is `points_per_sweep * level + step`, where `step` comes from
/// the horizontal angle and `level` from the vertical angle. Empty slots and
/// returns outside the grid are left at [`LIDAR_NO_RETURN`].
pub fn reconstruct_lidar(points: &[LidarPoint], geometry: &LidarConfig) -> Vec<f32> {
    let per_sweep = geometry.points_per_sweep();
    let levels = geometry.num_sweeps_levels as usize;
    let mut slots = vec![LIDAR_NO_RETURN; geometry.total_points()];

    for point in points {
        let (Some(step), Some(level)) = (
            grid_index(point.rx, geometry.deg_per_sweep_inc, per_sweep),
            grid_index(point.ry, geometry.deg_ang_delta, levels),
        ) else {
            continue;
        };
        slots[per_sweep * level + step] = point.d as f32;
    }
    slots
}

/// Index of `angle` on a grid of `count` cells spaced `spacing` apart
fn grid_index(angle: f64, spacing: f64, count: usize) -> Option<usize> {
    let index = (angle / spacing).abs().round();
    if !index.is_finite() || index >= count as f64 {
        return None;
    }
    Some(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        STANDARD.encode(buf)
    }

    #[test]
    fn test_image_decoded_to_configured_shape() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 3), None);
        let payload = TelemetryPayload {
            image: Some(encoded_png(8, 6)),
            ..Default::default()
        };

        let frame = decoder.decode(payload).unwrap();
        assert_eq!(frame.image.shape(), [6, 8, 3]);
        assert_eq!(frame.image.get(5, 7, 1), Some(200));
    }

    #[test]
    fn test_grayscale_camera() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 1), None);
        let payload = TelemetryPayload {
            image: Some(encoded_png(8, 6)),
            ..Default::default()
        };
        let frame = decoder.decode(payload).unwrap();
        assert_eq!(frame.image.shape(), [6, 8, 1]);
        assert_eq!(frame.image.data.len(), 48);
    }

    #[test]
    fn test_wrong_size_image_is_malformed() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 3), None);
        let payload = TelemetryPayload {
            image: Some(encoded_png(16, 12)),
            ..Default::default()
        };
        assert!(matches!(decoder.decode(payload), Err(DonkeyError::MalformedFrame(_))));
    }

    #[test]
    fn test_garbage_image_is_malformed() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 3), None);
        let payload = TelemetryPayload {
            image: Some("%%% not base64 %%%".into()),
            ..Default::default()
        };
        assert!(matches!(decoder.decode(payload), Err(DonkeyError::MalformedFrame(_))));
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let decoder = FrameDecoder::new(Resolution::new(2, 2, 3), None);
        let frame = decoder.decode(TelemetryPayload::default()).unwrap();

        assert_eq!(frame.image.shape(), [2, 2, 3]);
        assert_eq!(frame.pos, [0.0; 3]);
        assert_eq!(frame.hit, "none");
        assert!(frame.lidar.is_empty());
        assert!(frame.image_b.is_none());
        assert_eq!(frame.lap_count, 0);
    }

    #[test]
    fn test_secondary_camera_keeps_native_size() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 3), None);
        let payload = TelemetryPayload {
            image: Some(encoded_png(8, 6)),
            image_b: Some(encoded_png(160, 120)),
            speed: 2.5,
            ..Default::default()
        };
        let frame = decoder.decode(payload).unwrap();
        assert_eq!(frame.image.shape(), [6, 8, 3]);
        assert_eq!(frame.image_b.map(|i| i.shape()), Some([120, 160, 3]));
        assert_eq!(frame.speed, 2.5);
    }

    #[test]
    fn test_bad_secondary_camera_keeps_frame() {
        let decoder = FrameDecoder::new(Resolution::new(6, 8, 3), None);
        let payload = TelemetryPayload {
            image: Some(encoded_png(8, 6)),
            image_b: Some("%%% not base64 %%%".into()),
            cte: 0.75,
            ..Default::default()
        };
        let frame = decoder.decode(payload).unwrap();
        assert!(frame.image_b.is_none());
        assert_eq!(frame.image.get(0, 0, 1), Some(200));
        assert_eq!(frame.cte, 0.75);
    }

    #[test]
    fn test_forward_velocity_from_heading() {
        assert!((forward_velocity([0.0, 0.0, 3.0], 0.0) - 3.0).abs() < 1e-9);
        assert!((forward_velocity([2.0, 0.0, 0.0], 90.0) - 2.0).abs() < 1e-9);
        assert!((forward_velocity([0.0, 0.0, 3.0], 180.0) + 3.0).abs() < 1e-9);

        let decoder = FrameDecoder::new(Resolution::new(1, 1, 3), None);
        let reported = TelemetryPayload {
            vel_z: 5.0,
            forward_vel: Some(1.25),
            ..Default::default()
        };
        assert_eq!(decoder.decode(reported).unwrap().forward_vel, 1.25);
    }

    #[test]
    fn test_lidar_reconstruction() {
        let geometry = LidarConfig {
            deg_per_sweep_inc: 90.0,
            deg_ang_delta: -1.0,
            num_sweeps_levels: 2,
            ..Default::default()
        };
        let points = [
            LidarPoint { d: 3.0, rx: 0.0, ry: 0.0 },
            LidarPoint { d: 4.5, rx: 180.0, ry: 0.0 },
            LidarPoint { d: 7.0, rx: 90.0, ry: -1.0 },
            // outside the grid
            LidarPoint { d: 9.0, rx: 90.0, ry: -5.0 },
        ];

        let slots = reconstruct_lidar(&points, &geometry);
        assert_eq!(slots, vec![3.0, -1.0, 4.5, -1.0, -1.0, 7.0, -1.0, -1.0]);
    }

    #[test]
    fn test_lidar_angles_off_the_grid_are_skipped() {
        let geometry = LidarConfig::default();
        let points = [
            LidarPoint { d: 1.0, rx: 0.0, ry: 1e30 },
            LidarPoint { d: 2.0, rx: 1e30, ry: 0.0 },
            LidarPoint { d: 3.0, rx: f64::NAN, ry: 0.0 },
            LidarPoint { d: 4.0, rx: 0.0, ry: f64::INFINITY },
            LidarPoint { d: 5.0, rx: 4.0, ry: 0.0 },
        ];

        let slots = reconstruct_lidar(&points, &geometry);
        assert_eq!(slots.len(), 180);
        assert_eq!(slots[2], 5.0);
        assert_eq!(slots.iter().filter(|d| **d >= 0.0).count(), 1);
    }

    #[test]
    fn test_all_negative_lidar_has_no_valid_readings() {
        let decoder = FrameDecoder::new(Resolution::new(1, 1, 3), Some(LidarConfig::default()));
        let payload = TelemetryPayload {
            lidar: Some(vec![
                LidarPoint { d: -1.0, rx: 0.0, ry: 0.0 },
                LidarPoint { d: -1.0, rx: 2.0, ry: 0.0 },
            ]),
            ..Default::default()
        };

        let frame = decoder.decode(payload).unwrap();
        assert_eq!(frame.lidar.len(), 180);
        assert_eq!(frame.valid_lidar_readings(), 0);
    }

    #[test]
    fn test_lidar_absent_is_empty_even_when_configured() {
        let decoder = FrameDecoder::new(Resolution::new(1, 1, 3), Some(LidarConfig::default()));
        let frame = decoder.decode(TelemetryPayload::default()).unwrap();
        assert!(frame.lidar.is_empty());
        assert_eq!(frame.info()["lidar"], serde_json::json!([]));
    }
}
