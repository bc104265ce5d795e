//! Authoritative game session
//!
//! `GameSession::handle` is the single transition function: every socket
//! message, join, leave and timer tick is a [`SessionInput`], and everything
//! the session wants done in the outside world comes back as [`Effect`]s.
//! The session itself performs no I/O and owns no timers.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::phase::GamePhase;
use super::player::{ConnectionId, Player, Role};
use super::snapshot::{
    FeedbackKind, GameOverReason, PlayerResult, PlayerSnapshot, RepSnapshot, ScoreSnapshot,
    StateSnapshot,
};
use super::timers::{TimerKind, TimerSchedule};
use crate::config::{Band, PartyConfig, ScoringConfig, SessionConfig};
use crate::error::PartyError;
use crate::protocol::{ControllerMessage, GameOverSummary, MotionReport, ServerMessage};
use crate::scoring::{band_score, consistency_score, tips, DimensionScores, Grade};
use crate::types::{GameMode, MotionKind, RejectReason};

/// Idle prompt shown when no event arrived for a while
pub const KEEP_GOING: &str = "Keep going!";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// A controller socket asks for a role
    JoinController {
        connection: ConnectionId,
        role: Role,
        token: Option<String>,
    },
    JoinDisplay {
        connection: ConnectionId,
    },
    /// Any socket closed
    Leave {
        connection: ConnectionId,
    },
    Message {
        connection: ConnectionId,
        message: ControllerMessage,
    },
    Tick {
        generation: u64,
        timer: TimerKind,
    },
}

/// Who a message goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Displays,
    Controllers,
    Everyone,
    Connection(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { to: Audience, message: ServerMessage },
    /// Replace every running timer with this schedule
    Timers(TimerSchedule),
    /// Close a socket whose join was refused
    Close(ConnectionId),
}

#[derive(Debug, Clone)]
pub struct GameSession {
    id: String,
    config: SessionConfig,
    scoring: ScoringConfig,
    phase: GamePhase,
    players: Vec<Player>,
    tutorial_left: u32,
    countdown_left: u32,
    game_left: u32,
    generation: u64,
    feedback: String,
    feedback_kind: FeedbackKind,
    game_started_ms: u64,
    last_activity_ms: u64,
    summary: Option<GameOverSummary>,
    created_at: DateTime<Utc>,
}

impl GameSession {
    pub fn new(id: impl Into<String>, config: &PartyConfig) -> Self {
        Self {
            id: id.into(),
            config: config.session.clone(),
            scoring: config.scoring(),
            phase: GamePhase::Lobby,
            players: Vec::new(),
            tutorial_left: 0,
            countdown_left: 0,
            game_left: config.session.game_secs,
            generation: 0,
            feedback: String::new(),
            feedback_kind: FeedbackKind::Info,
            game_started_ms: 0,
            last_activity_ms: 0,
            summary: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn mode(&self) -> GameMode {
        self.config.mode
    }

    /// Generation of the timer schedule currently in force
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, role: Role) -> Option<&Player> {
        self.players.iter().find(|p| p.role == role)
    }

    /// Role held by a connection, if it is a controller
    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        self.players
            .iter()
            .find(|p| p.connection == Some(connection))
            .map(|p| p.role)
    }

    pub fn summary(&self) -> Option<&GameOverSummary> {
        self.summary.as_ref()
    }

    pub fn feedback(&self) -> (&str, FeedbackKind) {
        (&self.feedback, self.feedback_kind)
    }

    pub fn handle(&mut self, input: SessionInput, now_ms: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            SessionInput::JoinController { connection, role, token } => {
                if let Err(err) = self.join_controller(connection, role, token, &mut fx) {
                    warn!(session = %self.id, %role, error = %err, "controller join refused");
                    fx.push(Effect::Send {
                        to: Audience::Connection(connection),
                        message: ServerMessage::error(&err),
                    });
                    fx.push(Effect::Close(connection));
                }
            }
            SessionInput::JoinDisplay { connection } => {
                debug!(session = %self.id, %connection, "display joined");
                fx.push(Effect::Send {
                    to: Audience::Connection(connection),
                    message: self.state_message(),
                });
            }
            SessionInput::Leave { connection } => self.leave(connection, now_ms, &mut fx),
            SessionInput::Message { connection, message } => {
                self.on_message(connection, message, now_ms, &mut fx)
            }
            SessionInput::Tick { generation, timer } => {
                self.on_tick(generation, timer, now_ms, &mut fx)
            }
        }
        fx
    }

    fn join_controller(
        &mut self,
        connection: ConnectionId,
        role: Role,
        token: Option<String>,
        fx: &mut Vec<Effect>,
    ) -> Result<(), PartyError> {
        if role.index() >= self.config.max_players {
            return Err(PartyError::UnknownRole(format!(
                "{} (session allows {} player(s))",
                role, self.config.max_players
            )));
        }
        let phase = self.phase;

        let slot = self.players.iter().position(|p| p.role == role);
        let token = match slot.map(|i| &mut self.players[i]) {
            Some(p) if p.is_connected() => return Err(PartyError::RoleTaken(role.to_string())),
            Some(p) => {
                let token_matches = token.as_deref() == Some(p.token.as_str());
                let fresh_lobby_claim = token.is_none() && phase == GamePhase::Lobby;
                if !token_matches && !fresh_lobby_claim {
                    return Err(PartyError::RoleReserved(role.to_string()));
                }
                if fresh_lobby_claim {
                    p.token = Uuid::new_v4().to_string();
                    p.ready = false;
                }
                p.connection = Some(connection);
                info!(session = %self.id, %role, phase = phase.as_str(), "controller re-attached");
                p.token.clone()
            }
            None => {
                if phase != GamePhase::Lobby {
                    return Err(PartyError::GameInProgress(role.to_string()));
                }
                let player = Player::new(role, connection, &self.config, &self.scoring);
                let token = player.token.clone();
                self.players.push(player);
                self.players.sort_by_key(|p| p.role);
                info!(session = %self.id, %role, "controller joined");
                token
            }
        };

        fx.push(Effect::Send {
            to: Audience::Connection(connection),
            message: ServerMessage::Joined { role, token },
        });
        self.push_state(fx);
        Ok(())
    }

    fn leave(&mut self, connection: ConnectionId, now_ms: u64, fx: &mut Vec<Effect>) {
        let Some(player) = self.players.iter_mut().find(|p| p.connection == Some(connection)) else {
            debug!(session = %self.id, %connection, "display left");
            return;
        };
        player.connection = None;
        let role = player.role;
        info!(session = %self.id, %role, phase = self.phase.as_str(), "controller disconnected");

        if self.phase == GamePhase::Playing {
            self.finish(GameOverReason::Forfeit, now_ms, fx);
        } else {
            self.push_state(fx);
        }
    }

    fn on_message(
        &mut self,
        connection: ConnectionId,
        message: ControllerMessage,
        now_ms: u64,
        fx: &mut Vec<Effect>,
    ) {
        match message {
            ControllerMessage::Ping => {
                fx.push(Effect::Send {
                    to: Audience::Connection(connection),
                    message: ServerMessage::Pong,
                });
                return;
            }
            ControllerMessage::Reset => {
                self.reset(fx);
                return;
            }
            _ => {}
        }

        let Some(index) = self.players.iter().position(|p| p.connection == Some(connection)) else {
            warn!(
                session = %self.id,
                kind = message.type_name(),
                "message from a non-controller dropped"
            );
            return;
        };

        match message {
            ControllerMessage::Ready => {
                if self.phase == GamePhase::Lobby {
                    self.players[index].ready = true;
                    self.push_state(fx);
                }
            }
            ControllerMessage::StartGame => self.start_game(connection, now_ms, fx),
            ControllerMessage::SubjectLost => {
                let role = self.players[index].role;
                if self.phase == GamePhase::Playing {
                    info!(session = %self.id, %role, "subject out of view, forfeiting");
                    self.players[index].left_view = true;
                    self.finish(GameOverReason::Forfeit, now_ms, fx);
                } else {
                    debug!(
                        session = %self.id,
                        %role,
                        phase = self.phase.as_str(),
                        "subject lost outside play"
                    );
                }
            }
            ControllerMessage::HeadDirection { direction, yaw } => {
                if !self.phase.is_terminal() {
                    let player = &mut self.players[index];
                    player.aim = direction;
                    if yaw.is_finite() {
                        player.yaw_deg = yaw.clamp(-90.0, 90.0);
                    }
                }
            }
            ControllerMessage::ManualDeploy { .. } => {
                let cooldown = self.config.deploy_cooldown_ms;
                if self.phase == GamePhase::Playing
                    && self.players[index].try_deploy(now_ms, cooldown)
                {
                    debug!(session = %self.id, role = %self.players[index].role, "manual deploy");
                    self.last_activity_ms = now_ms;
                }
            }
            other => {
                if let Some((kind, report)) = other.motion() {
                    self.on_motion(index, kind, report, now_ms);
                }
            }
        }
    }

    fn start_game(&mut self, connection: ConnectionId, now_ms: u64, fx: &mut Vec<Effect>) {
        match self.phase {
            GamePhase::Lobby => {
                let connected: Vec<&Player> =
                    self.players.iter().filter(|p| p.is_connected()).collect();
                if connected.is_empty() || !connected.iter().all(|p| p.ready) {
                    fx.push(Effect::Send {
                        to: Audience::Connection(connection),
                        message: ServerMessage::Error {
                            message: "All connected players must be ready".to_string(),
                        },
                    });
                    return;
                }
                if self.config.tutorial_secs > 0 {
                    self.enter(GamePhase::Tutorial, now_ms, fx);
                } else {
                    self.enter(GamePhase::Countdown, now_ms, fx);
                }
            }
            GamePhase::Tutorial => self.enter(GamePhase::Countdown, now_ms, fx),
            other => debug!(session = %self.id, phase = other.as_str(), "startGame ignored"),
        }
    }

    /// Move to `next`, replacing the timer schedule; false if the edge is not allowed
    fn advance(&mut self, next: GamePhase, fx: &mut Vec<Effect>) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(
                session = %self.id,
                from = self.phase.as_str(),
                to = next.as_str(),
                "illegal phase transition"
            );
            return false;
        }
        info!(
            session = %self.id,
            from = self.phase.as_str(),
            to = next.as_str(),
            "phase transition"
        );
        self.phase = next;
        self.generation += 1;
        fx.push(Effect::Timers(TimerSchedule::for_phase(next, self.generation, &self.config)));
        true
    }

    fn enter(&mut self, next: GamePhase, now_ms: u64, fx: &mut Vec<Effect>) {
        if !self.advance(next, fx) {
            return;
        }
        match next {
            GamePhase::Tutorial => {
                self.tutorial_left = self.config.tutorial_secs;
                self.set_feedback("Get into position", FeedbackKind::Info);
            }
            GamePhase::Countdown => {
                self.countdown_left = self.config.countdown_secs;
                self.set_feedback("Get ready", FeedbackKind::Info);
                fx.push(Effect::Send {
                    to: Audience::Everyone,
                    message: ServerMessage::Countdown {
                        value: self.countdown_left,
                    },
                });
                if self.countdown_left == 0 {
                    self.push_state(fx);
                    self.enter(GamePhase::Playing, now_ms, fx);
                    return;
                }
            }
            GamePhase::Playing => {
                self.game_left = self.config.game_secs;
                self.game_started_ms = now_ms;
                self.last_activity_ms = now_ms;
                self.set_feedback("Go!", FeedbackKind::Good);
                fx.push(Effect::Send {
                    to: Audience::Everyone,
                    message: ServerMessage::GameStart { timer: self.game_left },
                });
                if self.players.iter().any(|p| !p.is_connected()) {
                    self.push_state(fx);
                    self.finish(GameOverReason::Forfeit, now_ms, fx);
                    return;
                }
            }
            GamePhase::Lobby | GamePhase::GameOver => {}
        }
        self.push_state(fx);
    }

    fn finish(&mut self, reason: GameOverReason, now_ms: u64, fx: &mut Vec<Effect>) {
        if !self.advance(GamePhase::GameOver, fx) {
            return;
        }
        let summary = self.summarize(reason);
        info!(
            session = %self.id,
            reason = ?reason,
            score = summary.score,
            grade = summary.grade.as_str(),
            elapsed_ms = now_ms.saturating_sub(self.game_started_ms),
            "game over"
        );
        self.set_feedback(
            match reason {
                GameOverReason::TimeUp => "Time's up!",
                GameOverReason::Forfeit => "Player disconnected",
            },
            FeedbackKind::Info,
        );
        self.summary = Some(summary.clone());
        fx.push(Effect::Send {
            to: Audience::Everyone,
            message: ServerMessage::GameOver(Box::new(summary)),
        });
        self.push_state(fx);
    }

    fn summarize(&self, reason: GameOverReason) -> GameOverSummary {
        let results: Vec<PlayerResult> = self
            .players
            .iter()
            .map(|p| {
                let agg = p.stats.aggregates();
                let score = agg.score(&self.scoring);
                PlayerResult {
                    role: p.role,
                    count: agg.events,
                    score,
                    grade: Grade::from_score(score),
                    avg_rate: agg.avg_rate,
                    avg_amplitude: agg.avg_amplitude,
                    avg_form: agg.avg_form,
                    max_combo: p.stats.max_combo(),
                    tips: tips(self.config.mode, &agg, &self.scoring),
                    forfeited: reason == GameOverReason::Forfeit
                        && (!p.is_connected() || p.left_view),
                }
            })
            .collect();

        let winner = if results.len() < 2 {
            None
        } else if reason == GameOverReason::Forfeit {
            let mut remaining = results.iter().filter(|r| !r.forfeited);
            match (remaining.next(), remaining.next()) {
                (Some(only), None) => Some(only.role),
                _ => None,
            }
        } else {
            let best = results.iter().map(|r| r.score).fold(f64::MIN, f64::max);
            let mut leaders = results.iter().filter(|r| r.score == best);
            match (leaders.next(), leaders.next()) {
                (Some(only), None) => Some(only.role),
                _ => None,
            }
        };

        let headline = winner
            .and_then(|role| results.iter().find(|r| r.role == role))
            .or_else(|| results.first());
        let (score, tips) = headline
            .map(|r| (r.score, r.tips.clone()))
            .unwrap_or((0.0, Vec::new()));

        GameOverSummary {
            reason,
            score,
            grade: Grade::from_score(score),
            tips,
            results,
            winner,
        }
    }

    fn on_tick(&mut self, generation: u64, timer: TimerKind, now_ms: u64, fx: &mut Vec<Effect>) {
        if generation != self.generation {
            debug!(
                session = %self.id,
                generation,
                current = self.generation,
                ?timer,
                "stale tick ignored"
            );
            return;
        }
        match timer {
            TimerKind::Tutorial => {
                self.tutorial_left = self.tutorial_left.saturating_sub(1);
                if self.tutorial_left == 0 {
                    self.enter(GamePhase::Countdown, now_ms, fx);
                } else {
                    self.push_state(fx);
                }
            }
            TimerKind::Countdown => {
                self.countdown_left = self.countdown_left.saturating_sub(1);
                fx.push(Effect::Send {
                    to: Audience::Everyone,
                    message: ServerMessage::Countdown {
                        value: self.countdown_left,
                    },
                });
                if self.countdown_left == 0 {
                    self.enter(GamePhase::Playing, now_ms, fx);
                } else {
                    self.push_state(fx);
                }
            }
            TimerKind::GameClock => {
                self.game_left = self.game_left.saturating_sub(1);
                if self.game_left == 0 {
                    self.finish(GameOverReason::TimeUp, now_ms, fx);
                }
            }
            TimerKind::Broadcast => {
                let idle =
                    now_ms.saturating_sub(self.last_activity_ms) >= self.config.idle_feedback_ms;
                if idle && self.feedback != KEEP_GOING {
                    self.set_feedback(KEEP_GOING, FeedbackKind::Info);
                }
                self.push_state(fx);
            }
        }
    }

    fn on_motion(&mut self, index: usize, kind: MotionKind, report: MotionReport, now_ms: u64) {
        if !self.phase.accepts_motion() {
            debug!(
                session = %self.id,
                kind = kind.as_str(),
                phase = self.phase.as_str(),
                "motion outside play ignored"
            );
            return;
        }
        if !self.config.mode.accepts(kind) {
            debug!(
                session = %self.id,
                kind = kind.as_str(),
                mode = self.config.mode.as_str(),
                "motion kind not played in this mode"
            );
            return;
        }

        let gap = self.config.min_event_gap_ms;
        let scoring = &self.scoring;
        let player = &mut self.players[index];
        if player
            .stats
            .last_event_ms()
            .is_some_and(|last| now_ms.saturating_sub(last) < gap)
        {
            debug!(
                session = %self.id,
                role = %player.role,
                "motion event too close to the previous one"
            );
            return;
        }

        let (amplitude, form) = match kind {
            MotionKind::Gesture(_) => (None, None),
            _ => (
                bounded(report.depth, scoring.amplitude_limits),
                bounded(report.form_or_recoil(), (0.0, 1.0)),
            ),
        };
        player.stats.push(now_ms, amplitude, form);

        let rate = player.stats.live_rate();
        let dims = DimensionScores {
            rate: rate.map(|r| band_score(r, &scoring.rate)),
            amplitude: amplitude.map(|a| band_score(a, &scoring.amplitude)),
            form: form.map(|f| band_score(f, &scoring.form)),
            consistency: player.stats.live_cv().map(|cv| consistency_score(cv, scoring.cv_ceiling)),
        };
        let quality = dims.combined(&scoring.weights).unwrap_or(1.0);
        let at_ms = now_ms.saturating_sub(self.game_started_ms);
        player.stats.record_quality(quality, scoring.combo_threshold, at_ms);

        let (text, feedback_kind) = if quality >= scoring.combo_threshold {
            ("Great!", FeedbackKind::Good)
        } else {
            (
                event_feedback(kind, scoring, rate, amplitude, form),
                FeedbackKind::Warning,
            )
        };
        self.set_feedback(text, feedback_kind);
        self.last_activity_ms = now_ms;
    }

    fn reset(&mut self, fx: &mut Vec<Effect>) {
        info!(session = %self.id, phase = self.phase.as_str(), "session reset");
        self.players = self
            .players
            .iter()
            .filter(|p| p.is_connected())
            .map(|p| p.fresh(&self.config, &self.scoring))
            .collect();
        self.phase = GamePhase::Lobby;
        self.tutorial_left = 0;
        self.countdown_left = 0;
        self.game_left = self.config.game_secs;
        self.generation += 1;
        self.summary = None;
        self.set_feedback("", FeedbackKind::Info);
        fx.push(Effect::Timers(TimerSchedule::for_phase(
            GamePhase::Lobby,
            self.generation,
            &self.config,
        )));
        self.push_state(fx);
    }

    fn set_feedback(&mut self, text: &str, kind: FeedbackKind) {
        self.feedback.clear();
        self.feedback.push_str(text);
        self.feedback_kind = kind;
    }

    fn push_state(&self, fx: &mut Vec<Effect>) {
        fx.push(Effect::Send {
            to: Audience::Displays,
            message: self.state_message(),
        });
    }

    fn state_message(&self) -> ServerMessage {
        ServerMessage::GameState(Box::new(self.snapshot()))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let players = self
            .players
            .iter()
            .map(|p| {
                let agg = p.stats.aggregates();
                let score = agg.score(&self.scoring);
                PlayerSnapshot {
                    role: p.role,
                    connected: p.is_connected(),
                    ready: p.ready,
                    reps: RepSnapshot {
                        count: agg.events,
                        rate: p.stats.live_rate(),
                        last_amplitude: p.stats.last_amplitude(),
                        avg_amplitude: agg.avg_amplitude,
                        avg_form: agg.avg_form,
                    },
                    scoring: ScoreSnapshot {
                        score,
                        grade: Grade::from_score(score),
                        combo: p.stats.combo(),
                        max_combo: p.stats.max_combo(),
                        consistency: p
                            .stats
                            .live_cv()
                            .map(|cv| consistency_score(cv, self.scoring.cv_ceiling)),
                    },
                    aim: p.aim,
                    yaw: p.yaw_deg,
                    deploys: p.deploys,
                    waveform: p.stats.history(),
                }
            })
            .collect();

        StateSnapshot {
            session_id: self.id.clone(),
            mode: self.config.mode,
            phase: self.phase,
            timer: self.game_left,
            countdown_timer: match self.phase {
                GamePhase::Tutorial => self.tutorial_left,
                GamePhase::Countdown => self.countdown_left,
                _ => 0,
            },
            players,
            feedback: self.feedback.clone(),
            feedback_type: self.feedback_kind,
            generated_at: Utc::now(),
        }
    }
}

/// Drop non-finite client values and clamp the rest into `limits`
fn bounded(value: Option<f64>, limits: (f64, f64)) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| v.clamp(limits.0, limits.1))
}

fn outside(value: Option<f64>, band: &Band) -> Option<std::cmp::Ordering> {
    let v = value?;
    if v < band.low {
        Some(std::cmp::Ordering::Less)
    } else if v > band.high {
        Some(std::cmp::Ordering::Greater)
    } else {
        None
    }
}

/// Short hint for a below-threshold event, most important dimension first
fn event_feedback(
    kind: MotionKind,
    scoring: &ScoringConfig,
    rate: Option<f64>,
    amplitude: Option<f64>,
    form: Option<f64>,
) -> &'static str {
    use std::cmp::Ordering::{Greater, Less};

    match outside(amplitude, &scoring.amplitude) {
        Some(Less) => return RejectReason::TooShallow.feedback(kind),
        Some(Greater) if kind == MotionKind::Compression => return "Not so deep",
        _ => {}
    }
    match outside(rate, &scoring.rate) {
        Some(Less) => return "Faster!",
        Some(Greater) => return "Slower!",
        _ => {}
    }
    if outside(form, &scoring.form) == Some(Less) {
        return match kind {
            MotionKind::Compression => "Let the chest rise",
            _ => RejectReason::PoorForm.feedback(kind),
        };
    }
    "Keep a steady rhythm"
}
