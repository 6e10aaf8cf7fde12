//! Action types and the steering/throttle action space

use serde::{Deserialize, Serialize};

/// Names of the action components, in order
pub const ACTION_NAMES: [&str; 2] = ["steer", "throttle"];

/// A driving command issued by the agent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    /// Steering, negative is left
    pub steering: f64,
    /// Throttle, negative is reverse
    pub throttle: f64,
}

impl Action {
    pub fn new(steering: f64, throttle: f64) -> Self {
        Self { steering, throttle }
    }

    /// Build from a flat `[steer, throttle]` vector
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [steering, throttle] => Some(Self::new(*steering, *throttle)),
            _ => None,
        }
    }
}

impl From<[f64; 2]> for Action {
    fn from(values: [f64; 2]) -> Self {
        Self::new(values[0], values[1])
    }
}

impl From<(f64, f64)> for Action {
    fn from((steering, throttle): (f64, f64)) -> Self {
        Self::new(steering, throttle)
    }
}

/// Component-wise bounds applied to every action before transmission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionBounds {
    pub steer_limit: f64,
    pub throttle_min: f64,
    pub throttle_max: f64,
}

impl Default for ActionBounds {
    fn default() -> Self {
        Self {
            steer_limit: 1.0,
            throttle_min: 0.0,
            throttle_max: 1.0,
        }
    }
}

impl ActionBounds {
    /// Clamp an action into bounds.
    ///
    /// Agents routinely sample slightly outside the box while exploring, so
    /// out-of-range values are pulled back rather than rejected. Non-finite
    /// components are treated as zero before clamping.
    pub fn clamp(&self, action: Action) -> Action {
        let steering = finite_or_zero(action.steering).clamp(-self.steer_limit, self.steer_limit);
        let throttle = finite_or_zero(action.throttle).clamp(self.throttle_min, self.throttle_max);
        Action { steering, throttle }
    }

    /// Whether the action is already within bounds
    pub fn contains(&self, action: Action) -> bool {
        action.steering.is_finite()
            && action.throttle.is_finite()
            && action.steering.abs() <= self.steer_limit
            && (self.throttle_min..=self.throttle_max).contains(&action.throttle)
    }

    pub fn low(&self) -> [f64; 2] {
        [-self.steer_limit, self.throttle_min]
    }

    pub fn high(&self) -> [f64; 2] {
        [self.steer_limit, self.throttle_max]
    }

    /// Describe these bounds as a box action space
    pub fn space(&self) -> ActionSpace {
        ActionSpace {
            shape: vec![2],
            low: self.low().to_vec(),
            high: self.high().to_vec(),
            names: ACTION_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Continuous (box) action space description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpace {
    /// Action vector shape
    pub shape: Vec<usize>,
    /// Lower bounds
    pub low: Vec<f64>,
    /// Upper bounds
    pub high: Vec<f64>,
    /// Component names
    #[serde(default)]
    pub names: Vec<String>,
}
