//! Authoritative game session
//!
//! One [`GameSession`] per display group. It is a plain owned value: the
//! server actor, the in-process pipeline and the tests all drive it through
//! [`GameSession::handle`].

pub mod game;
pub mod phase;
pub mod player;
pub mod snapshot;
pub mod stats;
pub mod timers;

pub use game::{Audience, Effect, GameSession, SessionInput, KEEP_GOING};
pub use phase::GamePhase;
pub use player::{ConnectionId, Player, Role};
pub use snapshot::{FeedbackKind, GameOverReason, PlayerResult, PlayerSnapshot, StateSnapshot};
pub use stats::{HistoryPoint, RepStats};
pub use timers::{TimerKind, TimerSchedule, TimerSpec, TimerWheel};
