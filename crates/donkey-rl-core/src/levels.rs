//! Registry of simulator levels
//!
//! Maps both the simulator scene name and the registered environment id to a
//! single level entry, so callers can construct a session from either.

/// A level known to the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    /// Scene name sent in the load request
    pub scene: &'static str,
    /// Environment id used by training code
    pub env_id: &'static str,
}

/// All stock levels shipped with the simulator
pub const LEVELS: &[Level] = &[
    Level {
        scene: "generated_road",
        env_id: "donkey-generated-roads-v0",
    },
    Level {
        scene: "warehouse",
        env_id: "donkey-warehouse-v0",
    },
    Level {
        scene: "sparkfun_avc",
        env_id: "donkey-avc-sparkfun-v0",
    },
    Level {
        scene: "generated_track",
        env_id: "donkey-generated-track-v0",
    },
    Level {
        scene: "mountain_track",
        env_id: "donkey-mountain-track-v0",
    },
    Level {
        scene: "roboracingleague_1",
        env_id: "donkey-roboracingleague-track-v0",
    },
    Level {
        scene: "waveshare",
        env_id: "donkey-waveshare-v0",
    },
    Level {
        scene: "mini_monaco",
        env_id: "donkey-minimonaco-track-v0",
    },
    Level {
        scene: "warren",
        env_id: "donkey-warren-track-v0",
    },
    Level {
        scene: "thunderhill",
        env_id: "donkey-thunderhill-track-v0",
    },
    Level {
        scene: "circuit_launch",
        env_id: "donkey-circuit-launch-track-v0",
    },
];

/// Default level when none is given
pub const DEFAULT_LEVEL: &str = "generated_track";

/// Look up a level by scene name or environment id
pub fn lookup(name: &str) -> Option<&'static Level> {
    LEVELS
        .iter()
        .find(|level| level.scene == name || level.env_id == name)
}

/// Resolve a name to the scene name to request.
///
/// Unknown names are passed through untouched: custom simulator builds can
/// ship scenes this registry does not know about.
pub fn resolve_scene(name: &str) -> &str {
    lookup(name).map(|level| level.scene).unwrap_or(name)
}
