//! One task per session
//!
//! All inputs for a session (socket joins, messages, closes, timer ticks) go
//! through a single channel, so the [`GameSession`] runs each input to
//! completion without locks. Timer schedules emitted by the session are
//! realised as interval tasks; a new schedule aborts every previous one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PartyConfig;
use crate::error::PartyError;
use crate::protocol::{ControllerMessage, ServerMessage};
use crate::session::{
    Audience, ConnectionId, Effect, GameSession, Role, SessionInput, TimerKind, TimerSchedule,
};

/// How long a session waits for its first socket
pub const ATTACH_GRACE: Duration = Duration::from_secs(10);

/// Outgoing JSON frames for one socket
pub type Outbox = mpsc::UnboundedSender<String>;

/// What a socket attaches as
#[derive(Debug, Clone, PartialEq)]
pub enum Join {
    Display,
    Controller { role: Role, token: Option<String> },
}

#[derive(Debug)]
pub enum Command {
    Attach {
        connection: ConnectionId,
        join: Join,
        outbox: Outbox,
    },
    /// Raw text frame from a socket
    Text { connection: ConnectionId, text: String },
    Detach { connection: ConnectionId },
    Tick { generation: u64, timer: TimerKind },
}

/// Cloneable sender side of a session actor
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), PartyError> {
        self.tx
            .send(command)
            .map_err(|_| PartyError::SessionNotFound(self.id.clone()))
    }

    pub fn attach(
        &self,
        connection: ConnectionId,
        join: Join,
        outbox: Outbox,
    ) -> Result<(), PartyError> {
        self.send(Command::Attach {
            connection,
            join,
            outbox,
        })
    }

    pub fn text(&self, connection: ConnectionId, text: String) -> Result<(), PartyError> {
        self.send(Command::Text { connection, text })
    }

    pub fn detach(&self, connection: ConnectionId) {
        let _ = self.send(Command::Detach { connection });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Display,
    Controller,
}

struct SessionActor {
    session: GameSession,
    sockets: HashMap<ConnectionId, (SocketKind, Outbox)>,
    timers: Vec<JoinHandle<()>>,
    ticks: mpsc::WeakUnboundedSender<Command>,
    started: Instant,
}

/// Start the actor for a new session
pub fn spawn(id: String, config: &PartyConfig) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = SessionActor {
        session: GameSession::new(id.clone(), config),
        sockets: HashMap::new(),
        timers: Vec::new(),
        ticks: tx.downgrade(),
        started: Instant::now(),
    };
    tokio::spawn(actor.run(rx));
    SessionHandle { id, tx }
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(session = %self.session.id(), mode = self.session.mode().as_str(), "session started");
        // only armed while no socket is attached
        let grace = tokio::time::sleep(ATTACH_GRACE);
        tokio::pin!(grace);
        loop {
            let command = tokio::select! {
                command = rx.recv() => command,
                _ = &mut grace, if self.sockets.is_empty() => {
                    info!(session = %self.session.id(), "no socket attached, closing");
                    break;
                }
            };
            let Some(command) = command else { break };
            let now_ms = self.started.elapsed().as_millis() as u64;
            match command {
                Command::Attach {
                    connection,
                    join,
                    outbox,
                } => {
                    let (kind, input) = match join {
                        Join::Display => {
                            (SocketKind::Display, SessionInput::JoinDisplay { connection })
                        }
                        Join::Controller { role, token } => (
                            SocketKind::Controller,
                            SessionInput::JoinController {
                                connection,
                                role,
                                token,
                            },
                        ),
                    };
                    self.sockets.insert(connection, (kind, outbox));
                    self.dispatch(input, now_ms);
                }
                Command::Text { connection, text } => {
                    if !self.sockets.contains_key(&connection) {
                        continue;
                    }
                    match ControllerMessage::parse(&text) {
                        Ok(message) => {
                            self.dispatch(SessionInput::Message { connection, message }, now_ms)
                        }
                        Err(err) => warn!(
                            session = %self.session.id(),
                            %connection,
                            error = %err,
                            "dropping malformed message"
                        ),
                    }
                }
                Command::Detach { connection } => {
                    if self.sockets.remove(&connection).is_none() {
                        continue;
                    }
                    self.dispatch(SessionInput::Leave { connection }, now_ms);
                    if self.sockets.is_empty() {
                        break;
                    }
                }
                Command::Tick { generation, timer } => {
                    self.dispatch(SessionInput::Tick { generation, timer }, now_ms);
                }
            }
        }
        self.abort_timers();
        info!(session = %self.session.id(), "session closed");
    }

    fn dispatch(&mut self, input: SessionInput, now_ms: u64) {
        for effect in self.session.handle(input, now_ms) {
            match effect {
                Effect::Send { to, message } => self.deliver(to, &message),
                Effect::Timers(schedule) => self.install(&schedule),
                Effect::Close(connection) => {
                    // dropping the outbox closes the socket once queued frames are flushed
                    self.sockets.remove(&connection);
                }
            }
        }
    }

    fn deliver(&mut self, to: Audience, message: &ServerMessage) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, kind = message.type_name(), "failed to encode message");
                return;
            }
        };
        for (connection, (kind, outbox)) in &self.sockets {
            let wanted = match to {
                Audience::Everyone => true,
                Audience::Displays => *kind == SocketKind::Display,
                Audience::Controllers => *kind == SocketKind::Controller,
                Audience::Connection(id) => id == *connection,
            };
            // a closed outbox means the socket is going away; its Detach follows
            if wanted && outbox.send(json.clone()).is_err() {
                debug!(%connection, "outbox closed");
            }
        }
    }

    fn abort_timers(&mut self) {
        for handle in self.timers.drain(..) {
            handle.abort();
        }
    }

    fn install(&mut self, schedule: &TimerSchedule) {
        self.abort_timers();
        for spec in &schedule.timers {
            let period = Duration::from_millis(spec.period_ms.max(1));
            let generation = schedule.generation;
            let timer = spec.kind;
            let ticks = self.ticks.clone();
            self.timers.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let Some(tx) = ticks.upgrade() else { break };
                    if tx.send(Command::Tick { generation, timer }).is_err() {
                        break;
                    }
                }
            }));
        }
        debug!(
            session = %self.session.id(),
            generation = schedule.generation,
            timers = schedule.timers.len(),
            "timer schedule installed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GameOverReason, GamePhase};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn config(game_secs: u32) -> PartyConfig {
        let mut config = PartyConfig::default();
        config.session.tutorial_secs = 0;
        config.session.game_secs = game_secs;
        config
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(json) = rx.try_recv() {
            out.push(ServerMessage::parse(&json).unwrap());
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// A display and a ready controller, game started
    async fn started(
        game_secs: u32,
    ) -> (
        SessionHandle,
        ConnectionId,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let handle = spawn("actor-test".to_string(), &config(game_secs));
        let (display_tx, display_rx) = mpsc::unbounded_channel();
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let display = Uuid::new_v4();
        let controller = Uuid::new_v4();
        handle.attach(display, Join::Display, display_tx).unwrap();
        handle
            .attach(
                controller,
                Join::Controller {
                    role: Role::Player1,
                    token: None,
                },
                controller_tx,
            )
            .unwrap();
        handle.text(controller, r#"{"type":"ready"}"#.to_string()).unwrap();
        handle.text(controller, r#"{"type":"startGame"}"#.to_string()).unwrap();
        settle().await;
        (handle, controller, display_rx, controller_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_drive_game_to_time_up() {
        let (_handle, _controller, mut display, _phone) = started(2).await;

        tokio::time::sleep(Duration::from_millis(3_000 + 2_000 + 50)).await;
        let messages = drain(&mut display);

        let countdowns: Vec<u32> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Countdown { value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![3, 2, 1, 0]);
        assert!(messages.contains(&ServerMessage::GameStart { timer: 2 }));
        let over = messages.iter().find_map(|m| match m {
            ServerMessage::GameOver(summary) => Some(summary.reason),
            _ => None,
        });
        assert_eq!(over, Some(GameOverReason::TimeUp));

        // broadcasts at 10 Hz while playing
        let playing_states = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::GameState(s) if s.phase == GamePhase::Playing))
            .count();
        assert!(playing_states >= 15, "only {} playing snapshots", playing_states);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forfeit_stops_all_timers() {
        let (handle, controller, mut display, _phone) = started(60).await;
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        drain(&mut display);

        handle.detach(controller);
        settle().await;
        let messages = drain(&mut display);
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::GameOver(summary) if summary.reason == GameOverReason::Forfeit
        )));

        // the old schedule was aborted: nothing else arrives
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut display).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_isolated() {
        let handle = spawn("actor-test".to_string(), &config(60));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let display = Uuid::new_v4();
        handle.attach(display, Join::Display, tx).unwrap();
        handle.text(display, "{not json".to_string()).unwrap();
        handle.text(display, r#"{"type":"ping"}"#.to_string()).unwrap();
        settle().await;

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::GameState(_)));
        assert_eq!(messages.last(), Some(&ServerMessage::Pong));
        assert!(!handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_role_closes_newcomer() {
        let (handle, _controller, _display, _phone) = started(60).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .attach(
                Uuid::new_v4(),
                Join::Controller {
                    role: Role::Player1,
                    token: None,
                },
                tx,
            )
            .unwrap();
        settle().await;

        assert!(matches!(
            ServerMessage::parse(&rx.recv().await.unwrap()).unwrap(),
            ServerMessage::Error { .. }
        ));
        // outbox dropped by the actor
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_stops_when_last_socket_leaves() {
        let handle = spawn("actor-test".to_string(), &config(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let display = Uuid::new_v4();
        handle.attach(display, Join::Display, tx).unwrap();
        handle.detach(display);
        settle().await;
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_stops_when_nothing_attaches() {
        let handle = spawn("actor-test".to_string(), &config(60));
        tokio::time::sleep(ATTACH_GRACE - Duration::from_millis(100)).await;
        assert!(!handle.is_closed());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_closed());
    }
}
