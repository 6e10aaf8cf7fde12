//! donkey-drive
//!
//! Launches (or dials) the Donkey simulator and drives a few episodes with a
//! scripted weaving policy, logging per-episode summaries.
//!
//! Usage: `donkey-drive [level] [config.json]`
//!
//! Environment:
//! - `DONKEY_SIM_PATH`: simulator executable (`remote` or unset dials an external one)
//! - `DONKEY_HOST`, `DONKEY_PORT`: simulator address
//! - `DONKEY_EPISODES`: episodes to run (default 1)
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::{Context, Result, bail};
use donkey_rl::{Action, DonkeyEnv, Environment, SessionConfig};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Step cap per episode
const MAX_STEPS: usize = 2000;

fn load_config(args: &[String]) -> Result<SessionConfig> {
    let mut config = match args.get(2) {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path))?,
        None => SessionConfig::default(),
    };
    if let Some(level) = args.get(1) {
        config.level = level.clone();
    }

    if let Ok(path) = std::env::var("DONKEY_SIM_PATH") {
        config.exe_path = Some(path);
    }
    if let Ok(host) = std::env::var("DONKEY_HOST") {
        config.host = host;
    }
    if let Ok(port) = std::env::var("DONKEY_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("DONKEY_PORT is not a port: {}", port))?;
    }
    config.validate()?;
    Ok(config)
}

/// Gentle sinusoidal weave at a fixed throttle
fn scripted_action(step: usize) -> Action {
    Action::new((step as f64 * 0.05).sin() * 0.3, 0.3)
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("usage: donkey-drive [level] [config.json]");
        return Ok(());
    }
    if args.len() > 3 {
        bail!("usage: donkey-drive [level] [config.json]");
    }

    let config = load_config(&args)?;
    let episodes: usize = match std::env::var("DONKEY_EPISODES") {
        Ok(n) => n.parse().context("DONKEY_EPISODES is not a number")?,
        Err(_) => 1,
    };

    info!("Starting {} on {}:{}", config.scene_name(), config.host, config.port);
    let mut env = DonkeyEnv::new(config)?;

    for episode in 1..=episodes {
        env.reset(None)?;
        let mut total = 0.0;
        let mut steps = 0;
        let mut last_info = None;

        while steps < MAX_STEPS {
            let result = env.step(scripted_action(steps))?;
            total += result.reward;
            steps += 1;
            let done = result.terminated || result.truncated;
            last_info = Some(result.info);
            if done {
                break;
            }
        }

        if steps == MAX_STEPS {
            warn!("Episode {} hit the {}-step cap", episode, MAX_STEPS);
        }
        let (cte, hit) = last_info
            .map(|info| (info["cte"].clone(), info["hit"].clone()))
            .unwrap_or_default();
        info!(
            episode,
            steps,
            reward = total,
            %cte,
            %hit,
            "Episode finished"
        );
    }

    let stats = env.stats();
    info!(
        sent = stats.messages_sent,
        frames = stats.frames_received,
        dropped = stats.malformed_frames,
        "Session stats"
    );
    env.close()?;
    Ok(())
}
