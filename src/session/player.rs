//! Player slots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::stats::RepStats;
use crate::config::{ScoringConfig, SessionConfig};
use crate::error::PartyError;
use crate::types::Direction;

/// Identifies one socket connection for the lifetime of that socket
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player1,
    Player2,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Player1, Role::Player2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player1 => "player1",
            Role::Player2 => "player2",
        }
    }

    /// Zero-based slot index
    pub fn index(&self) -> usize {
        match self {
            Role::Player1 => 0,
            Role::Player2 => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PartyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "player1" | "p1" => Ok(Role::Player1),
            "player2" | "p2" => Ok(Role::Player2),
            other => Err(PartyError::UnknownRole(other.to_string())),
        }
    }
}

/// One controller slot in a session
#[derive(Debug, Clone)]
pub struct Player {
    pub role: Role,
    /// Current socket, `None` while disconnected
    pub connection: Option<ConnectionId>,
    /// Secret handed out on join; presenting it reclaims the slot
    pub token: String,
    pub ready: bool,
    pub stats: RepStats,
    pub aim: Direction,
    pub yaw_deg: f64,
    pub deploys: u64,
    pub last_deploy_ms: Option<u64>,
    /// Controller reported its subject out of view for too long
    pub left_view: bool,
}

impl Player {
    pub fn new(
        role: Role,
        connection: ConnectionId,
        session: &SessionConfig,
        scoring: &ScoringConfig,
    ) -> Self {
        Self {
            role,
            connection: Some(connection),
            token: Uuid::new_v4().to_string(),
            ready: false,
            stats: RepStats::new(scoring.rolling_intervals, session.history_len),
            aim: Direction::Center,
            yaw_deg: 0.0,
            deploys: 0,
            last_deploy_ms: None,
            left_view: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Same connection and token, everything else back to a fresh game
    pub fn fresh(&self, session: &SessionConfig, scoring: &ScoringConfig) -> Self {
        Self {
            role: self.role,
            connection: self.connection,
            token: self.token.clone(),
            ready: false,
            stats: RepStats::new(scoring.rolling_intervals, session.history_len),
            aim: Direction::Center,
            yaw_deg: 0.0,
            deploys: 0,
            last_deploy_ms: None,
            left_view: false,
        }
    }

    /// Counts a manual deploy unless it falls inside the cooldown
    pub fn try_deploy(&mut self, now_ms: u64, cooldown_ms: u64) -> bool {
        if self
            .last_deploy_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < cooldown_ms)
        {
            return false;
        }
        self.last_deploy_ms = Some(now_ms);
        self.deploys += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("player1".parse::<Role>().unwrap(), Role::Player1);
        assert_eq!("Player2".parse::<Role>().unwrap(), Role::Player2);
        assert!(matches!("display".parse::<Role>(), Err(PartyError::UnknownRole(_))));
        assert_eq!(serde_json::to_string(&Role::Player2).unwrap(), "\"player2\"");
    }

    #[test]
    fn test_deploy_cooldown() {
        let mut player = Player::new(
            Role::Player1,
            Uuid::new_v4(),
            &SessionConfig::default(),
            &ScoringConfig::default(),
        );
        assert!(player.try_deploy(1_000, 500));
        assert!(!player.try_deploy(1_300, 500));
        assert!(player.try_deploy(1_500, 500));
        assert_eq!(player.deploys, 2);
    }

    #[test]
    fn test_fresh_keeps_connection_and_token() {
        let session = SessionConfig::default();
        let scoring = ScoringConfig::default();
        let mut player = Player::new(Role::Player1, Uuid::new_v4(), &session, &scoring);
        player.ready = true;
        player.stats.push(0, Some(5.0), None);
        let fresh = player.fresh(&session, &scoring);
        assert_eq!(fresh.token, player.token);
        assert_eq!(fresh.connection, player.connection);
        assert!(!fresh.ready);
        assert_eq!(fresh.stats.count(), 0);
    }
}
