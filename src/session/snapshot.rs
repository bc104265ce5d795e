//! Serializable projections of a session for displays

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::GamePhase;
use super::player::Role;
use super::stats::HistoryPoint;
use crate::scoring::Grade;
use crate::types::{Direction, GameMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    #[default]
    Info,
    Good,
    Warning,
}

/// Live repetition figures
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepSnapshot {
    pub count: u64,
    pub rate: Option<f64>,
    pub last_amplitude: Option<f64>,
    pub avg_amplitude: Option<f64>,
    pub avg_form: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub score: f64,
    pub grade: Grade,
    pub combo: u32,
    pub max_combo: u32,
    pub consistency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub role: Role,
    pub connected: bool,
    pub ready: bool,
    pub reps: RepSnapshot,
    pub scoring: ScoreSnapshot,
    pub aim: Direction,
    pub yaw: f64,
    pub deploys: u64,
    pub waveform: Vec<HistoryPoint>,
}

/// Broadcast on every tick and phase transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub session_id: String,
    pub mode: GameMode,
    pub phase: GamePhase,
    /// Game seconds remaining
    pub timer: u32,
    /// Tutorial or countdown seconds remaining
    pub countdown_timer: u32,
    pub players: Vec<PlayerSnapshot>,
    pub feedback: String,
    pub feedback_type: FeedbackKind,
    pub generated_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn player(&self, role: Role) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.role == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameOverReason {
    TimeUp,
    /// A controller left while the game was running
    Forfeit,
}

/// One player's final figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub role: Role,
    pub count: u64,
    pub score: f64,
    pub grade: Grade,
    pub avg_rate: Option<f64>,
    pub avg_amplitude: Option<f64>,
    pub avg_form: Option<f64>,
    pub max_combo: u32,
    pub tips: Vec<String>,
    pub forfeited: bool,
}
