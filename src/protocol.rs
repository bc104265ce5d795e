//! Wire protocol between controllers, displays and the session server
//!
//! Every message is a JSON object tagged by `type`. Parsing is per message:
//! a malformed frame yields an error for that frame only and never poisons
//! the connection that carried it.

use serde::{Deserialize, Serialize};

use crate::error::PartyError;
use crate::scoring::Grade;
use crate::session::{GameOverReason, PlayerResult, Role, StateSnapshot};
use crate::types::{Direction, DirectionEvent, GestureKind, MotionEvent, MotionKind};

/// Quality fields a controller reports with one repetition.
///
/// All optional: the server treats them as untrusted and re-bounds them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MotionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoil: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beat_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl MotionReport {
    /// Reported form, falling back to recoil for compressions
    pub fn form_or_recoil(&self) -> Option<f64> {
        self.form.or(self.recoil)
    }
}

/// Controller (and display) to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControllerMessage {
    Ready,
    StartGame,
    Compression(MotionReport),
    Pushup(MotionReport),
    Squat(MotionReport),
    Gesture {
        gesture: GestureKind,
    },
    HeadDirection {
        direction: Direction,
        #[serde(default)]
        yaw: f64,
    },
    ManualDeploy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
    /// No subject in view past the detector timeout; forfeits while playing
    SubjectLost,
    Reset,
    Ping,
}

impl ControllerMessage {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self, PartyError> {
        if text.trim().is_empty() {
            return Err(PartyError::InvalidMessage("empty frame".to_string()));
        }
        serde_json::from_str(text).map_err(|e| PartyError::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, PartyError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire form of a detector event
    pub fn from_event(event: &MotionEvent) -> Self {
        let q = &event.quality;
        let base = MotionReport {
            depth: Some(q.amplitude),
            count: Some(event.sequence),
            duration_ms: Some(event.duration_ms),
            ..MotionReport::default()
        };
        match event.kind {
            MotionKind::Compression => ControllerMessage::Compression(MotionReport {
                recoil: Some(q.form),
                ..base
            }),
            MotionKind::PushUp => ControllerMessage::Pushup(MotionReport {
                form: Some(q.form),
                angle: q.angle_deg,
                ..base
            }),
            MotionKind::Squat => ControllerMessage::Squat(MotionReport {
                form: Some(q.form),
                beat_offset: q.beat_offset_ms,
                ..base
            }),
            MotionKind::Gesture(gesture) => ControllerMessage::Gesture { gesture },
        }
    }

    pub fn from_direction(event: &DirectionEvent) -> Self {
        ControllerMessage::HeadDirection {
            direction: event.direction,
            yaw: event.yaw_deg,
        }
    }

    /// Motion kind and report for repetition and gesture messages
    pub fn motion(&self) -> Option<(MotionKind, MotionReport)> {
        match self {
            ControllerMessage::Compression(r) => Some((MotionKind::Compression, *r)),
            ControllerMessage::Pushup(r) => Some((MotionKind::PushUp, *r)),
            ControllerMessage::Squat(r) => Some((MotionKind::Squat, *r)),
            ControllerMessage::Gesture { gesture } => {
                Some((MotionKind::Gesture(*gesture), MotionReport::default()))
            }
            _ => None,
        }
    }

    /// Messages a display connection may send
    pub fn allowed_from_display(&self) -> bool {
        matches!(self, ControllerMessage::Reset | ControllerMessage::Ping)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ControllerMessage::Ready => "ready",
            ControllerMessage::StartGame => "startGame",
            ControllerMessage::Compression(_) => "compression",
            ControllerMessage::Pushup(_) => "pushup",
            ControllerMessage::Squat(_) => "squat",
            ControllerMessage::Gesture { .. } => "gesture",
            ControllerMessage::HeadDirection { .. } => "headDirection",
            ControllerMessage::ManualDeploy { .. } => "manualDeploy",
            ControllerMessage::SubjectLost => "subjectLost",
            ControllerMessage::Reset => "reset",
            ControllerMessage::Ping => "ping",
        }
    }
}

/// Final results broadcast once when a game ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverSummary {
    pub reason: GameOverReason,
    pub score: f64,
    pub grade: Grade,
    pub tips: Vec<String>,
    pub results: Vec<PlayerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Role>,
}

/// Server to controllers and displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Session {
        session_id: String,
        join_url: String,
    },
    Joined {
        role: Role,
        token: String,
    },
    GameState(Box<StateSnapshot>),
    Countdown {
        value: u32,
    },
    GameStart {
        timer: u32,
    },
    GameOver(Box<GameOverSummary>),
    Error {
        message: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(err: &PartyError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, PartyError> {
        serde_json::from_str(text).map_err(|e| PartyError::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, PartyError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Session { .. } => "session",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::GameState(_) => "gameState",
            ServerMessage::Countdown { .. } => "countdown",
            ServerMessage::GameStart { .. } => "gameStart",
            ServerMessage::GameOver(_) => "gameOver",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
        }
    }
}
