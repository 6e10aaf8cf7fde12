//! Blocking environment over one simulator session
//!
//! `DonkeyEnv` owns the session end to end: the optional simulator process,
//! the controller and the tokio runtime the connection runs on.

use donkey_bridge::{ClientStats, ProcessSupervisor, SessionEvents};
use donkey_rl_core::{
    Action, ActionSpace, DonkeyError, EpisodePolicy, Info, Observation, ObservationSpace, Result,
    SessionConfig, StepResult,
};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::controller::{SessionState, SimController};
use crate::environment::{Environment, RenderMode};

/// Listen address handed to a launched simulator
const LAUNCH_HOST: &str = "0.0.0.0";

/// Donkey simulator environment
pub struct DonkeyEnv {
    controller: SimController,
    process: Option<ProcessSupervisor>,
    seed: Option<u64>,
    closed: bool,
    // Dropped last: the connection's tasks live on it
    runtime: Runtime,
}

impl DonkeyEnv {
    /// Validate `config`, launch the simulator if one is configured, then
    /// connect and load the level.
    ///
    /// Must not be called from inside an async context.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("donkey-rl")
            .enable_all()
            .build()?;

        let mut process = match config.launch_path() {
            Some(path) => {
                let _guard = runtime.enter();
                let process = ProcessSupervisor::start(&path, LAUNCH_HOST, config.port)?
                    .with_grace(config.quit_grace);
                info!("Waiting {:?} for the simulator to boot", config.start_delay);
                std::thread::sleep(config.start_delay);
                Some(process)
            }
            None => {
                debug!("No executable configured; dialing an external simulator");
                None
            }
        };

        let controller = match runtime.block_on(SimController::connect(config)) {
            Ok(controller) => controller,
            Err(e) => {
                if let Some(process) = process.as_mut() {
                    if let Err(quit_err) = runtime.block_on(process.quit()) {
                        warn!("Failed to stop simulator: {}", quit_err);
                    }
                }
                return Err(e);
            }
        };

        Ok(Self {
            controller,
            process,
            seed: None,
            closed: false,
            runtime,
        })
    }

    /// Default configuration for a registered level (scene name or env id)
    pub fn for_level(level: &str) -> Result<Self> {
        Self::new(SessionConfig::for_level(level))
    }

    /// Replace the reward / termination policy
    pub fn set_policy(&mut self, policy: impl EpisodePolicy + 'static) {
        self.controller.set_policy(Box::new(policy));
    }

    pub fn is_game_over(&self) -> bool {
        self.controller.is_game_over()
    }

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    pub fn config(&self) -> &SessionConfig {
        self.controller.config()
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn stats(&self) -> ClientStats {
        self.controller.stats()
    }

    /// Scene names, lap events and other simulator reports
    pub fn events(&self) -> SessionEvents {
        self.controller.events()
    }

    /// Return the simulator to scene selection; the next `reset` reloads
    pub fn exit_scene(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.runtime.block_on(self.controller.exit_scene())
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.closed {
            return Err(DonkeyError::SessionClosed);
        }
        if let Some(process) = self.process.as_mut() {
            if let Some(status) = process.poll_exit() {
                return Err(DonkeyError::ConnectionLost(format!(
                    "simulator exited with {}",
                    status
                )));
            }
        }
        Ok(())
    }
}

impl Environment for DonkeyEnv {
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        self.ensure_open()?;
        if let Some(seed) = seed {
            debug!("Recording seed {}; the simulator is not seedable", seed);
            self.seed = Some(seed);
        }
        self.runtime.block_on(self.controller.reset())
    }

    fn step(&mut self, action: Action) -> Result<StepResult> {
        self.ensure_open()?;
        self.runtime.block_on(self.controller.step(action))
    }

    fn render(&mut self, mode: RenderMode) -> Option<Observation> {
        match mode {
            RenderMode::RgbArray => self.controller.last_frame().map(|f| f.image.clone()),
            RenderMode::Human => None,
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.process.is_some() && self.controller.state() != SessionState::Terminated {
            if let Err(e) = self.runtime.block_on(self.controller.quit_app()) {
                debug!("quit_app not delivered: {}", e);
            }
        }
        self.runtime.block_on(self.controller.close());

        if let Some(mut process) = self.process.take() {
            self.runtime.block_on(process.quit())?;
        }
        info!("Environment closed");
        Ok(())
    }

    fn action_space(&self) -> ActionSpace {
        self.controller.action_space()
    }

    fn observation_space(&self) -> ObservationSpace {
        self.controller.observation_space()
    }
}

impl Drop for DonkeyEnv {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // block_on panics inside another runtime; kill-on-drop covers the
        // process there
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!("DonkeyEnv dropped inside an async context without close()");
            return;
        }
        if let Err(e) = self.close() {
            warn!("Error closing environment: {}", e);
        }
    }
}
