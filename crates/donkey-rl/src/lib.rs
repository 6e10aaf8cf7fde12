//! # donkey-rl
//!
//! Drive the Donkey car simulator as a reinforcement-learning environment.
//!
//! [`DonkeyEnv`] launches (or dials) a simulator, loads a level and exposes
//! the blocking [`Environment`] interface. [`SimController`] is the async
//! session state machine underneath it.
//!
//! ```no_run
//! use donkey_rl::{Action, DonkeyEnv, Environment};
//!
//! let mut env = DonkeyEnv::for_level("donkey-generated-track-v0")?;
//! let (_obs, _info) = env.reset(None)?;
//! loop {
//!     let result = env.step(Action::new(0.0, 0.3))?;
//!     if result.terminated {
//!         break;
//!     }
//! }
//! env.close()?;
//! # Ok::<(), donkey_rl::DonkeyError>(())
//! ```

pub mod controller;
pub mod env;
pub mod environment;

#[cfg(test)]
mod fake_sim;

pub use controller::{SessionState, SimController};
pub use env::DonkeyEnv;
pub use environment::{Environment, RenderMode};

pub use donkey_rl_core::{
    Action, ActionSpace, DefaultPolicy, DonkeyError, EpisodePolicy, FnPolicy, Info, Observation,
    ObservationSpace, Result, SessionConfig, StepResult, TelemetryFrame,
};
