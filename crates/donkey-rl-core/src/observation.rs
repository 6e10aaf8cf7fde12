//! Observation types

use serde::{Deserialize, Serialize};

use crate::config::Resolution;
use crate::telemetry::{Image, Info};

/// Camera image handed to the agent
pub type Observation = Image;

/// Result of one agent-visible step
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Camera image from the final simulator frame of the step
    pub observation: Observation,

    /// Scalar reward signal
    pub reward: f64,

    /// Episode terminated (crash, off track, lap or time budget)
    pub terminated: bool,

    /// Episode truncated by the caller's time limit
    pub truncated: bool,

    /// Decoded telemetry fields
    pub info: Info,
}

/// Description of the image observation space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSpace {
    /// `[height, width, channels]`
    pub shape: [usize; 3],
    /// Lowest pixel value
    pub low: u8,
    /// Highest pixel value
    pub high: u8,
}

impl ObservationSpace {
    pub fn for_resolution(resolution: Resolution) -> Self {
        Self {
            shape: resolution.shape(),
            low: 0,
            high: u8::MAX,
        }
    }

    pub fn contains(&self, observation: &Observation) -> bool {
        observation.shape() == self.shape
            && observation.data.len() == self.shape.iter().product::<usize>()
    }
}
