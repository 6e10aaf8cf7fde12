//! Scripted stand-in for the simulator, for tests
//!
//! Speaks the wire protocol in lockstep: every control command is answered
//! with one telemetry frame. Speed follows throttle (zero while the
//! brake is held) and cross-track error grows by `cte_per_frame` for every
//! driven frame since the last reset.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use donkey_bridge::protocol::{SimMessage, deserialize};
use donkey_bridge::{
    AsyncReader, AsyncWriter, FrameDecoder, LineReader, LineWriter, ProtocolClient,
};
use donkey_rl_core::{Resolution, SessionConfig};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, duplex, split};

#[derive(Debug, Clone, Default)]
pub struct FakeSimOptions {
    pub cte_per_frame: f64,
    /// Drop the connection after this many telemetry frames
    pub close_after_frames: Option<usize>,
    /// Attach a camera image of this size to every frame
    pub image: Option<Resolution>,
    /// Report a collision once this many driven frames have passed
    pub hit_after: Option<usize>,
    /// Keep the connection open but stop sending telemetry after this many frames
    pub stall_after_frames: Option<usize>,
    /// Never acknowledge `load_scene`
    pub ignore_load: bool,
}

#[derive(Debug, Default)]
pub struct SimLog {
    pub controls: Vec<(f64, f64, f64)>,
    pub resets: usize,
    pub loads: Vec<String>,
    pub exits: usize,
    pub quits: usize,
    pub scene_requests: usize,
    /// Kinds of every other command received, in order
    pub other: Vec<&'static str>,
}

pub type SharedLog = Arc<Mutex<SimLog>>;

fn encoded_png(resolution: Resolution) -> String {
    let img = RgbImage::from_pixel(
        resolution.width as u32,
        resolution.height as u32,
        Rgb([40, 80, 120]),
    );
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf)
}

/// Serve one connection until the peer hangs up or `quit_app` arrives
pub async fn serve<S>(stream: S, options: FakeSimOptions, log: SharedLog)
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let (rd, wr) = split(stream);
    let mut reader = LineReader::new(rd);
    let mut writer = LineWriter::new(wr);
    let image = options.image.map(encoded_png);

    let mut sent = 0usize;
    let mut driven = 0usize;
    let mut speed = 0.0;

    while let Ok(line) = reader.read_message().await {
        let Ok(msg) = deserialize(&line) else {
            continue;
        };

        let reply = match &msg {
            SimMessage::GetProtocolVersion => {
                Some(json!({"msg_type": "protocol_version", "version": "2"}))
            }
            SimMessage::GetSceneNames => {
                log.lock().unwrap().scene_requests += 1;
                Some(json!({
                    "msg_type": "scene_names",
                    "scene_names": ["generated_track", "warehouse"],
                }))
            }
            SimMessage::LoadScene { scene_name } => {
                log.lock().unwrap().loads.push(scene_name.clone());
                if options.ignore_load {
                    continue;
                }
                Some(json!({"msg_type": "car_loaded"}))
            }
            SimMessage::ExitScene => {
                log.lock().unwrap().exits += 1;
                Some(json!({"msg_type": "scene_selection_ready"}))
            }
            SimMessage::QuitApp => {
                log.lock().unwrap().quits += 1;
                break;
            }
            SimMessage::Control { .. } => {
                let (steering, throttle, brake) = msg.control_values().unwrap();
                log.lock().unwrap().controls.push((steering, throttle, brake));
                if options.stall_after_frames.is_some_and(|limit| sent >= limit) {
                    continue;
                }
                if brake > 0.0 {
                    speed = 0.0;
                } else {
                    speed = throttle * 10.0;
                    driven += 1;
                }
                None
            }
            SimMessage::ResetCar => {
                log.lock().unwrap().resets += 1;
                speed = 0.0;
                driven = 0;
                continue;
            }
            other => {
                log.lock().unwrap().other.push(other.kind());
                continue;
            }
        };

        let message = match reply {
            Some(message) => message,
            None => {
                let hit = match options.hit_after {
                    Some(n) if driven >= n => "wall",
                    _ => "none",
                };
                let mut telemetry = json!({
                    "msg_type": "telemetry",
                    "speed": speed,
                    "vel_z": speed,
                    "cte": driven as f64 * options.cte_per_frame,
                    "hit": hit,
                    "time": sent as f64 * 0.05,
                });
                if let Some(image) = &image {
                    telemetry["image"] = json!(image);
                }
                sent += 1;
                telemetry
            }
        };

        let bytes = serde_json::to_vec(&message).unwrap();
        if writer.write_message(&bytes).await.is_err() {
            break;
        }
        if let Some(limit) = options.close_after_frames {
            if sent >= limit {
                break;
            }
        }
    }
}

/// In-memory client wired to a fake simulator task
pub fn connect_pair(
    config: &SessionConfig,
    options: FakeSimOptions,
) -> (ProtocolClient, SharedLog) {
    let (ours, theirs) = duplex(1 << 20);
    let log = SharedLog::default();
    tokio::spawn(serve(theirs, options, log.clone()));

    let (rd, wr) = split(ours);
    let client = ProtocolClient::from_transport(
        LineReader::new(rd),
        LineWriter::new(wr),
        FrameDecoder::for_session(config),
    );
    (client, log)
}

/// Fake simulator listening on a loopback port, on its own thread and runtime
pub fn spawn_tcp(options: FakeSimOptions) -> (u16, SharedLog, std::thread::JoinHandle<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();
    let log = SharedLog::default();

    let server_log = log.clone();
    let handle = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, options, server_log).await;
        });
    });
    (port, log, handle)
}
