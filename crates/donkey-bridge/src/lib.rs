//! Simulator-facing plumbing for donkey-rl
//!
//! This crate provides:
//! - Wire protocol for the simulator's JSON messages
//! - Newline-delimited transport (AsyncReader/AsyncWriter traits)
//! - Telemetry decoding (camera images, lidar, derived velocity)
//! - Background receive loop and the protocol client
//! - Simulator process supervision

pub mod client;
pub mod frame;
pub mod process;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::ProtocolClient;
pub use frame::FrameDecoder;
pub use process::ProcessSupervisor;
pub use protocol::{SimMessage, TelemetryPayload, deserialize, serialize};
pub use session::{ClientStats, SceneSignals, SessionEvents};
pub use transport::{AsyncReader, AsyncWriter, LineReader, LineWriter};
