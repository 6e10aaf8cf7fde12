//! Session state machine
//!
//! Drives one simulator connection from handshake through episodes:
//! scene load, per-step control, telemetry reduction into
//! observation/reward/done, and the handbrake reset sequence.

use donkey_bridge::{ClientStats, ProtocolClient, SessionEvents, SimMessage};
use donkey_rl_core::{
    Action, ActionSpace, DefaultPolicy, DonkeyError, EpisodePolicy, Info, Observation,
    ObservationSpace, Result, SessionConfig, StepResult, TelemetryFrame,
};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingLoad,
    Ready,
    EpisodeActive,
    Resetting,
    Terminated,
}

/// Controls one simulator session
pub struct SimController {
    config: Arc<SessionConfig>,
    client: ProtocolClient,
    state: SessionState,
    policy: Box<dyn EpisodePolicy>,
    game_over: bool,
    last_frame: Option<Arc<TelemetryFrame>>,
    /// `car_loaded` count the next load has to exceed
    loaded_seen: u64,
    /// Set after `exit_scene`: menu signal count the next load waits past
    menu_seen: Option<u64>,
}

impl SimController {
    /// Dial the simulator (with retries) and load the configured scene
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        debug!(state = ?SessionState::Connecting, "Connecting to {}:{}", config.host, config.port);
        let client = ProtocolClient::connect_with_retry(&config).await?;
        Self::from_client(config, client).await
    }

    /// Run the load handshake over an established client
    pub async fn from_client(config: SessionConfig, client: ProtocolClient) -> Result<Self> {
        let mut controller = Self {
            config: Arc::new(config),
            client,
            state: SessionState::AwaitingLoad,
            policy: Box::new(DefaultPolicy),
            game_over: false,
            last_frame: None,
            loaded_seen: 0,
            menu_seen: None,
        };

        controller.client.send(&SimMessage::GetProtocolVersion).await?;
        controller.client.send(&SimMessage::GetSceneNames).await?;
        controller.load_scene().await?;
        Ok(controller)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn action_space(&self) -> ActionSpace {
        self.config.bounds().space()
    }

    /// Fixed by the camera resolution for the whole session
    pub fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::for_resolution(self.config.camera.resolution)
    }

    /// Replace the reward / termination policy
    pub fn set_policy(&mut self, policy: Box<dyn EpisodePolicy>) {
        self.policy = policy;
    }

    /// Termination verdict of the last observed frame
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn stats(&self) -> ClientStats {
        self.client.stats()
    }

    pub fn events(&self) -> SessionEvents {
        self.client.events()
    }

    /// Last frame returned by `observe`
    pub fn last_frame(&self) -> Option<Arc<TelemetryFrame>> {
        self.last_frame.clone()
    }

    /// Load the configured scene and wait for the car.
    ///
    /// After `exit_scene` this first waits for the simulator to return to
    /// scene selection.
    pub async fn load_scene(&mut self) -> Result<()> {
        let result = self.load_scene_inner().await;
        self.check(result)
    }

    async fn load_scene_inner(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.state = SessionState::AwaitingLoad;
        let within = self.config.load_timeout;

        if let Some(menu_seen) = self.menu_seen {
            self.client
                .wait_for_scene(within, |s| s.menu_ready > menu_seen)
                .await?;
        }

        let scene = self.config.scene_name().to_string();
        info!("Loading scene {}", scene);
        self.client.send(&SimMessage::load_scene(scene.as_str())).await?;

        let loaded_seen = self.loaded_seen;
        let signals = self
            .client
            .wait_for_scene(within, |s| s.car_loaded > loaded_seen)
            .await?;
        self.loaded_seen = signals.car_loaded;
        self.menu_seen = None;

        self.send_config().await?;
        self.client.mark_frames_seen();
        self.state = SessionState::Ready;
        info!("Scene {} ready", scene);
        Ok(())
    }

    /// Send car, racer, camera and (when enabled) lidar configuration
    async fn send_config(&mut self) -> Result<()> {
        let config = self.config.clone();
        self.client.send(&SimMessage::car_config(&config.car)).await?;
        self.client
            .send(&SimMessage::racer_info(&config.racer, &config.car))
            .await?;
        self.client.send(&SimMessage::cam_config(&config.camera)).await?;
        if let Some(lidar) = &config.lidar {
            self.client.send(&SimMessage::lidar_config(lidar)).await?;
        }
        debug!("Sent session configuration");
        Ok(())
    }

    /// Clamp and transmit one control command; returns what was sent
    pub async fn take_action(&mut self, action: Action) -> Result<Action> {
        let result = self.take_action_inner(action).await;
        self.check(result)
    }

    async fn take_action_inner(&mut self, action: Action) -> Result<Action> {
        self.ensure_ready("take_action")?;
        let clamped = self.config.bounds().clamp(action);
        if !action.steering.is_finite() || !action.throttle.is_finite() {
            warn!(
                "Non-finite action ({}, {}) replaced before sending",
                action.steering, action.throttle
            );
        } else if clamped != action {
            debug!(
                "Clamped action ({}, {}) to ({}, {})",
                action.steering, action.throttle, clamped.steering, clamped.throttle
            );
        }
        self.client
            .send(&SimMessage::control(clamped.steering, clamped.throttle, 0.0))
            .await?;
        Ok(clamped)
    }

    /// Wait for a fresh frame and reduce it to observation, reward and done
    pub async fn observe(&mut self) -> Result<StepResult> {
        let result = self.observe_inner().await;
        self.check(result)
    }

    async fn observe_inner(&mut self) -> Result<StepResult> {
        self.ensure_ready("observe")?;
        if self.client.take_config_request() {
            self.send_config().await?;
        }

        let frame = self.client.next_frame(self.config.liveness_timeout).await?;
        let done = self.policy.episode_over(&frame, &self.config);
        let reward = self.policy.reward(&frame, done, &self.config);
        if done && !self.game_over {
            info!(cte = frame.cte, hit = %frame.hit, lap = frame.lap_count, "Episode over");
        }
        self.game_over = done;

        let result = StepResult {
            observation: frame.image.clone(),
            reward,
            terminated: done,
            truncated: false,
            info: frame.info(),
        };
        self.last_frame = Some(frame);
        Ok(result)
    }

    /// Hold `action` for `frame_skip` simulator frames; returns the last
    pub async fn step(&mut self, action: Action) -> Result<StepResult> {
        match self.state {
            SessionState::EpisodeActive => {}
            SessionState::Ready => {
                return Err(DonkeyError::NotReady("call reset before step".into()));
            }
            _ => self.ensure_ready("step")?,
        }

        let mut last = None;
        for _ in 0..self.config.frame_skip.max(1) {
            self.take_action(action).await?;
            last = Some(self.observe().await?);
        }
        last.ok_or_else(|| DonkeyError::NotReady("no frame observed".into()))
    }

    /// Stop the car, reset it to the start and hand back the first frame
    pub async fn reset(&mut self) -> Result<(Observation, Info)> {
        let result = self.reset_inner().await;
        self.check(result)
    }

    async fn reset_inner(&mut self) -> Result<(Observation, Info)> {
        match self.state {
            SessionState::AwaitingLoad => self.load_scene_inner().await?,
            _ => self.ensure_ready("reset")?,
        }

        self.state = SessionState::Resetting;
        let settle = self.config.settle_interval;
        debug!("Handbrake reset");

        self.client.send(&SimMessage::control(0.0, 0.0, 1.0)).await?;
        sleep(settle).await;
        self.client.send(&SimMessage::ResetCar).await?;
        self.client.clear_episode();
        sleep(settle).await;

        // Only frames produced after the settle count
        self.client.mark_frames_seen();
        self.client.send(&SimMessage::control(0.0, 0.0, 1.0)).await?;

        self.game_over = false;
        let first = self.observe_inner().await?;
        self.state = SessionState::EpisodeActive;
        Ok((first.observation, first.info))
    }

    /// Leave the current scene and return to scene selection
    pub async fn exit_scene(&mut self) -> Result<()> {
        self.ensure_ready("exit_scene")?;
        let signals = self.client.scene_signals();
        let result = self.client.send(&SimMessage::ExitScene).await;
        self.check(result)?;

        self.menu_seen = Some(signals.menu_ready);
        self.loaded_seen = signals.car_loaded;
        self.state = SessionState::AwaitingLoad;
        info!("Exited scene");
        Ok(())
    }

    /// Ask the simulator application to quit
    pub async fn quit_app(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let result = self.client.send(&SimMessage::QuitApp).await;
        self.check(result)
    }

    /// Disconnect and end the session. Idempotent.
    pub async fn close(&mut self) {
        if self.client.is_closed() {
            self.state = SessionState::Terminated;
            return;
        }
        self.client.disconnect().await;
        self.state = SessionState::Terminated;
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.client.is_closed() {
            return Err(DonkeyError::SessionClosed);
        }
        if self.state == SessionState::Terminated {
            return Err(match self.client.fault() {
                Some(reason) => DonkeyError::ConnectionLost(reason),
                None => DonkeyError::SessionClosed,
            });
        }
        Ok(())
    }

    fn ensure_ready(&self, op: &str) -> Result<()> {
        self.ensure_connected()?;
        match self.state {
            SessionState::Ready | SessionState::EpisodeActive | SessionState::Resetting => Ok(()),
            state => Err(DonkeyError::NotReady(format!(
                "{} requires a loaded scene (state {:?})",
                op, state
            ))),
        }
    }

    /// Fatal errors end the session
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("Session failed: {}", e);
                self.client.fail(e.to_string());
                self.state = SessionState::Terminated;
            } else {
                warn!("{}", e);
            }
        }
        result
    }
}
