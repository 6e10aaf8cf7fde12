//! Reward and episode-termination policy

use crate::config::SessionConfig;
use crate::telemetry::TelemetryFrame;

/// Evaluates reward and termination for each observed frame.
///
/// Sessions use [`DefaultPolicy`] unless the caller installs another one.
pub trait EpisodePolicy: Send + Sync {
    /// Reward for `frame`; `done` is this frame's termination verdict
    fn reward(&self, frame: &TelemetryFrame, done: bool, config: &SessionConfig) -> f64;

    /// Whether the episode is over at `frame`
    fn episode_over(&self, frame: &TelemetryFrame, config: &SessionConfig) -> bool;
}

/// Stock policy: stay centered and keep moving forward.
///
/// Over on leaving the track (`|cte| > max_cte`), any collision, a missed
/// checkpoint, disqualification, or exhausting the optional lap/time budget.
/// Reward is `(1 - |cte| / max_cte) * forward_vel` while moving forward, the
/// raw forward velocity in reverse (no centering bonus, which would otherwise
/// be exploitable), -1 on termination and -2 on a collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl EpisodePolicy for DefaultPolicy {
    fn reward(&self, frame: &TelemetryFrame, done: bool, config: &SessionConfig) -> f64 {
        if frame.is_collision() {
            return -2.0;
        }
        if done || frame.cte.abs() > config.max_cte {
            return -1.0;
        }
        if frame.forward_vel > 0.0 {
            return (1.0 - frame.cte.abs() / config.max_cte) * frame.forward_vel;
        }
        frame.forward_vel
    }

    fn episode_over(&self, frame: &TelemetryFrame, config: &SessionConfig) -> bool {
        if frame.cte.abs() > config.max_cte {
            return true;
        }
        if frame.is_collision() || frame.missed_checkpoint || frame.dq {
            return true;
        }
        if let Some(max_laps) = config.max_laps {
            if frame.lap_count >= max_laps {
                return true;
            }
        }
        if let Some(limit) = config.max_episode_time {
            if frame.time >= limit {
                return true;
            }
        }
        false
    }
}

/// Reward hook signature
pub type RewardFn = dyn Fn(&TelemetryFrame, bool, &SessionConfig) -> f64 + Send + Sync;

/// Episode-over hook signature
pub type EpisodeOverFn = dyn Fn(&TelemetryFrame, &SessionConfig) -> bool + Send + Sync;

/// Policy built from optional closures, falling back to [`DefaultPolicy`]
#[derive(Default)]
pub struct FnPolicy {
    reward: Option<Box<RewardFn>>,
    episode_over: Option<Box<EpisodeOverFn>>,
}

impl FnPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reward(
        mut self,
        f: impl Fn(&TelemetryFrame, bool, &SessionConfig) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.reward = Some(Box::new(f));
        self
    }

    pub fn with_episode_over(
        mut self,
        f: impl Fn(&TelemetryFrame, &SessionConfig) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.episode_over = Some(Box::new(f));
        self
    }
}

impl EpisodePolicy for FnPolicy {
    fn reward(&self, frame: &TelemetryFrame, done: bool, config: &SessionConfig) -> f64 {
        match &self.reward {
            Some(f) => f(frame, done, config),
            None => DefaultPolicy.reward(frame, done, config),
        }
    }

    fn episode_over(&self, frame: &TelemetryFrame, config: &SessionConfig) -> bool {
        match &self.episode_over {
            Some(f) => f(frame, config),
            None => DefaultPolicy.episode_over(frame, config),
        }
    }
}
