//! Session phases and their allowed transitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    #[default]
    Lobby,
    Tutorial,
    Countdown,
    Playing,
    GameOver,
}

impl GamePhase {
    /// Forward edges only; leaving `GameOver` is a reset, not a transition.
    pub fn can_transition_to(&self, next: GamePhase) -> bool {
        use GamePhase::*;
        matches!(
            (self, next),
            (Lobby, Tutorial)
                | (Lobby, Countdown)
                | (Tutorial, Countdown)
                | (Countdown, Playing)
                | (Playing, GameOver)
        )
    }

    pub fn accepts_motion(&self) -> bool {
        *self == GamePhase::Playing
    }

    pub fn is_terminal(&self) -> bool {
        *self == GamePhase::GameOver
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Lobby => "lobby",
            GamePhase::Tutorial => "tutorial",
            GamePhase::Countdown => "countdown",
            GamePhase::Playing => "playing",
            GamePhase::GameOver => "gameover",
        }
    }
}
