//! Agent-facing environment trait

use donkey_rl_core::{Action, ActionSpace, Info, Observation, ObservationSpace, Result, StepResult};

/// How `render` should present the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Return the camera image
    #[default]
    RgbArray,
    /// The simulator window is the display; nothing is returned
    Human,
}

/// Standard reinforcement-learning call surface
///
/// Calls are synchronous and never reentrant; one agent drives one
/// environment.
pub trait Environment {
    /// Start a new episode. `seed` is recorded only.
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)>;

    /// Apply an action and advance the simulation
    fn step(&mut self, action: Action) -> Result<StepResult>;

    /// Current camera frame, if the mode returns one
    fn render(&mut self, mode: RenderMode) -> Option<Observation>;

    /// Release the session. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn action_space(&self) -> ActionSpace;

    fn observation_space(&self) -> ObservationSpace;
}
