//! Motion Party - motion-to-game-event pipeline for phone-controlled party games
//!
//! A phone acts as the controller (accelerometer or pose camera) while a
//! shared screen renders the game. This crate turns noisy sensor streams into
//! discrete validated motion events, runs the authoritative game session that
//! scores them, and carries both over WebSocket.
//!
//! ## Modules
//!
//! - **Detectors**: compression, push-up, squat, gesture and lean state machines
//! - **Session**: phase machine, scoring, timers and snapshots, free of I/O
//! - **Server / Transport**: axum session server and reconnecting controller link

pub mod calibration;
pub mod config;
pub mod controller;
pub mod detector;
pub mod error;
pub mod filters;
pub mod pipeline;
pub mod protocol;
pub mod scoring;
pub mod session;
pub mod types;

#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod transport;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::PartyConfig;
pub use controller::{Controller, ControllerStatus, PoseEstimator};
pub use detector::{Detector, DetectorOutput, MotionDetector};
pub use error::PartyError;
pub use pipeline::{LocalPipeline, SessionDriver};
pub use protocol::{ControllerMessage, ServerMessage};
pub use session::{GamePhase, GameSession, Role, StateSnapshot};
pub use types::{GameMode, MotionEvent, MotionKind, SensorSample};

/// Crate version reported by `/health`, the CLI and the FFI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
