//! Shared session state and the background receive loop
//!
//! The receive loop is the only writer of the latest-telemetry slot and the
//! scene signals; the client side only reads them. Everything else the loop
//! learns (scene names, lap events, config requests) lands in
//! [`SessionEvents`] behind a short-lived mutex.

use donkey_rl_core::TelemetryFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::frame::FrameDecoder;
use crate::protocol::{SimMessage, deserialize_all};
use crate::transport::AsyncReader;

/// Counts of scene lifecycle signals seen on this connection.
///
/// Counters rather than flags, so a waiter can ask for "a signal newer than
/// the one I already saw".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneSignals {
    /// `scene_selection_ready` messages received
    pub menu_ready: u64,
    /// `car_loaded` messages received
    pub car_loaded: u64,
}

/// One-shot and episode-scoped facts reported by the simulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEvents {
    pub scene_names: Vec<String>,
    pub protocol_version: Option<String>,
    /// Simulator asked for the car config; serviced by the controller
    pub need_car_config: bool,
    pub missed_checkpoint: bool,
    /// Laps counted from start-line crossings
    pub lap_count: u32,
    pub last_lap_time: Option<f64>,
    lap_started_at: Option<f64>,
}

impl SessionEvents {
    fn record_start_line(&mut self, time_stamp: f64) {
        if let Some(started) = self.lap_started_at {
            self.lap_count += 1;
            self.last_lap_time = Some(time_stamp - started);
        }
        self.lap_started_at = Some(time_stamp);
    }

    /// Forget everything scoped to the current episode
    pub fn clear_episode(&mut self) {
        self.missed_checkpoint = false;
        self.lap_count = 0;
        self.last_lap_time = None;
        self.lap_started_at = None;
    }
}

/// Connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub messages_sent: u64,
    pub controls_sent: u64,
    pub messages_received: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_sent: AtomicU64,
    controls_sent: AtomicU64,
    messages_received: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// State shared between the receive loop and the client
#[derive(Debug, Default)]
pub struct SessionShared {
    faulted: AtomicBool,
    fault: Mutex<Option<String>>,
    events: Mutex<SessionEvents>,
    counters: Counters,
}

impl SessionShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection-level failure; the first reason wins
    pub fn set_fault(&self, reason: impl Into<String>) {
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            *fault = Some(reason.into());
        }
        self.faulted.store(true, Ordering::SeqCst);
    }

    /// Reason the connection failed, if it has
    pub fn fault(&self) -> Option<String> {
        if !self.faulted.load(Ordering::SeqCst) {
            return None;
        }
        lock(&self.fault).clone()
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> SessionEvents {
        lock(&self.events).clone()
    }

    /// Return and clear the pending config request
    pub fn take_config_request(&self) -> bool {
        std::mem::take(&mut lock(&self.events).need_car_config)
    }

    pub fn clear_episode(&self) {
        lock(&self.events).clear_episode();
    }

    pub fn record_sent(&self, msg: &SimMessage) {
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        if matches!(msg, SimMessage::Control { .. }) {
            self.counters.controls_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> ClientStats {
        let c = &self.counters;
        ClientStats {
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            controls_sent: c.controls_sent.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

// A panic while holding one of these locks cannot leave the data half
// written, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background receive loop
///
/// This task:
/// - Reads framed messages from the simulator
/// - Decodes telemetry and atomically replaces the latest frame
/// - Bumps scene signals on `scene_selection_ready` / `car_loaded`
/// - Records other events in the shared session
///
/// On any transport error it records the fault and exits, dropping both
/// senders so waiters observe the closed channel.
pub async fn reader_task<R: AsyncReader>(
    mut reader: R,
    decoder: FrameDecoder,
    shared: Arc<SessionShared>,
    telemetry_tx: watch::Sender<Arc<TelemetryFrame>>,
    scene_tx: watch::Sender<SceneSignals>,
) {
    loop {
        let data = match reader.read_message().await {
            Ok(data) => data,
            Err(e) => {
                error!("Receive loop stopped: {}", e);
                shared.set_fault(e.to_string());
                break;
            }
        };

        for result in deserialize_all(&data) {
            shared.counters.messages_received.fetch_add(1, Ordering::Relaxed);
            match result {
                Ok(msg) => {
                    let dispatched = dispatch(msg, &decoder, &shared, &telemetry_tx, &scene_tx);
                    if let Err(reason) = dispatched {
                        shared.set_fault(reason);
                        return;
                    }
                }
                Err(e) => {
                    shared.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                    let preview: String =
                        String::from_utf8_lossy(&data).chars().take(200).collect();
                    warn!(error = %e, "Dropping malformed message: {}", preview);
                }
            }
        }
    }
}

/// Apply one inbound message; `Err` ends the session
fn dispatch(
    msg: SimMessage,
    decoder: &FrameDecoder,
    shared: &SessionShared,
    telemetry_tx: &watch::Sender<Arc<TelemetryFrame>>,
    scene_tx: &watch::Sender<SceneSignals>,
) -> Result<(), String> {
    match msg {
        SimMessage::Telemetry(payload) => {
            let has_laps = payload.lap_count.is_some();
            let has_lap_time = payload.last_lap_time.is_some();
            match decoder.decode(*payload) {
                Ok(mut frame) => {
                    {
                        let events = lock(&shared.events);
                        frame.missed_checkpoint = events.missed_checkpoint;
                        if !has_laps {
                            frame.lap_count = events.lap_count;
                        }
                        if !has_lap_time {
                            frame.last_lap_time = events.last_lap_time.unwrap_or(0.0);
                        }
                    }
                    trace!(speed = frame.speed, cte = frame.cte, "telemetry");
                    telemetry_tx.send_replace(Arc::new(frame));
                    shared.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // previous frame stays the latest snapshot
                    shared.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping telemetry frame: {}", e);
                }
            }
        }
        SimMessage::CarLoaded => {
            info!("Car loaded");
            scene_tx.send_modify(|s| s.car_loaded += 1);
        }
        SimMessage::SceneSelectionReady => {
            debug!("Simulator at scene selection");
            scene_tx.send_modify(|s| s.menu_ready += 1);
        }
        SimMessage::SceneNames { scene_names } => {
            debug!("Scenes available: {:?}", scene_names);
            lock(&shared.events).scene_names = scene_names;
        }
        SimMessage::ProtocolVersion { version } => {
            let version = match version {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            info!("Simulator protocol version {}", version);
            lock(&shared.events).protocol_version = Some(version);
        }
        SimMessage::NeedCarConfig => {
            debug!("Simulator requested car config");
            lock(&shared.events).need_car_config = true;
        }
        SimMessage::MissedCheckpoint => {
            info!("Missed checkpoint");
            lock(&shared.events).missed_checkpoint = true;
        }
        SimMessage::CollisionWithStartingLine { time_stamp } => {
            let mut events = lock(&shared.events);
            events.record_start_line(time_stamp);
            if let Some(lap_time) = events.last_lap_time {
                info!(lap = events.lap_count, "Lap time {:.2}s", lap_time);
            }
        }
        SimMessage::Aborted => {
            warn!("Simulator aborted the scene");
            return Err("simulator aborted the scene".to_string());
        }
        SimMessage::Ping => trace!("ping"),
        SimMessage::Unknown => debug!("Ignoring unknown message kind"),
        other => warn!("Unexpected {} message from simulator", other.kind()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LineReader;
    use donkey_rl_core::Resolution;
    use tokio::io::{AsyncWriteExt, duplex};

    fn start(
        stream: tokio::io::DuplexStream,
    ) -> (
        Arc<SessionShared>,
        watch::Receiver<Arc<TelemetryFrame>>,
        watch::Receiver<SceneSignals>,
        tokio::task::JoinHandle<()>,
    ) {
        let decoder = FrameDecoder::new(Resolution::new(2, 2, 3), None);
        let shared = Arc::new(SessionShared::new());
        let (telemetry_tx, telemetry_rx) = watch::channel(Arc::new(decoder.blank()));
        let (scene_tx, scene_rx) = watch::channel(SceneSignals::default());
        let handle = tokio::spawn(reader_task(
            LineReader::new(stream),
            decoder,
            shared.clone(),
            telemetry_tx,
            scene_tx,
        ));
        (shared, telemetry_rx, scene_rx, handle)
    }

    #[tokio::test]
    async fn test_telemetry_replaces_latest_and_malformed_is_dropped() {
        let (mut sim, ours) = duplex(4096);
        let (shared, mut telemetry, _scene, handle) = start(ours);

        sim.write_all(b"{\"msg_type\":\"telemetry\",\"speed\":3.0,\"cte\":0.5}\n")
            .await
            .unwrap();
        sim.write_all(b"{\"msg_type\":\"telemetry\",\"speed\":\"fast\"}\n")
            .await
            .unwrap();
        sim.write_all(b"not json at all\n").await.unwrap();
        drop(sim);
        handle.await.unwrap();

        let frame = telemetry.borrow_and_update().clone();
        assert_eq!(frame.speed, 3.0);
        assert_eq!(frame.cte, 0.5);

        let stats = shared.stats();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.malformed_frames, 2);
        assert!(shared.fault().is_some());
    }

    #[tokio::test]
    async fn test_scene_signals_and_events() {
        let (mut sim, ours) = duplex(4096);
        let (shared, _telemetry, mut scene, _handle) = start(ours);

        sim.write_all(
            b"{\"msg_type\":\"scene_selection_ready\"}\n\
              {\"msg_type\":\"scene_names\",\"scene_names\":[\"warehouse\",\"warren\"]}\n\
              {\"msg_type\":\"need_car_config\"}{\"msg_type\":\"car_loaded\"}\n",
        )
        .await
        .unwrap();

        let signals = *scene.wait_for(|s| s.car_loaded > 0).await.unwrap();
        assert_eq!(signals, SceneSignals { menu_ready: 1, car_loaded: 1 });
        assert_eq!(shared.events().scene_names, vec!["warehouse", "warren"]);
        assert!(shared.take_config_request());
        assert!(!shared.take_config_request());
    }

    #[tokio::test]
    async fn test_lap_timing_merged_into_frames() {
        let (mut sim, ours) = duplex(4096);
        let (shared, mut telemetry, _scene, handle) = start(ours);

        sim.write_all(
            b"{\"msg_type\":\"collision_with_starting_line\",\"timeStamp\":10.0}\n\
              {\"msg_type\":\"collision_with_starting_line\",\"timeStamp\":52.5}\n\
              {\"msg_type\":\"missed_checkpoint\"}\n\
              {\"msg_type\":\"telemetry\",\"speed\":1.0}\n",
        )
        .await
        .unwrap();
        drop(sim);
        handle.await.unwrap();

        let frame = telemetry.borrow_and_update().clone();
        assert_eq!(frame.lap_count, 1);
        assert_eq!(frame.last_lap_time, 42.5);
        assert!(frame.missed_checkpoint);

        shared.clear_episode();
        let events = shared.events();
        assert_eq!(events.lap_count, 0);
        assert!(!events.missed_checkpoint);
    }

    #[tokio::test]
    async fn test_abort_faults_session() {
        let (mut sim, ours) = duplex(4096);
        let (shared, mut telemetry, _scene, handle) = start(ours);

        sim.write_all(b"{\"msg_type\":\"aborted\"}\n").await.unwrap();
        handle.await.unwrap();

        assert_eq!(shared.fault().as_deref(), Some("simulator aborted the scene"));
        assert!(telemetry.changed().await.is_err());
    }
}
