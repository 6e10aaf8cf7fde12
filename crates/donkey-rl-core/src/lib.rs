//! # donkey-rl-core
//!
//! Core types for driving the Donkey simulator as an RL environment.
//!
//! This crate provides the foundational types shared by the bridge and the
//! environment:
//! - Session configuration and the level registry
//! - Actions and action bounds
//! - Decoded telemetry frames and the info mapping
//! - Reward / episode-termination policy
//! - Error taxonomy

pub mod action;
pub mod config;
pub mod error;
pub mod levels;
pub mod observation;
pub mod reward;
pub mod telemetry;

pub use action::{Action, ActionBounds, ActionSpace};
pub use config::{
    CameraConfig, CarConfig, ImageEncoding, LidarConfig, RacerInfo, Resolution, SessionConfig,
};
pub use error::{DonkeyError, Result};
pub use observation::{Observation, ObservationSpace, StepResult};
pub use reward::{DefaultPolicy, EpisodePolicy, FnPolicy};
pub use telemetry::{Image, Info, TelemetryFrame};
