//! In-process pipeline
//!
//! Runs the whole motion-to-game-event path without sockets or real timers:
//! sensor samples go through a detector, accepted events are converted to
//! wire messages, and a [`GameSession`] consumes them on a virtual clock.
//! Used by the `replay` and `simulate` commands and by end-to-end tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PartyConfig;
use crate::detector::{Detector, DetectorOutput};
use crate::error::PartyError;
use crate::protocol::{ControllerMessage, GameOverSummary, MotionReport, ServerMessage};
use crate::session::{
    Audience, ConnectionId, Effect, GamePhase, GameSession, Role, SessionInput, TimerKind,
    TimerWheel,
};
use crate::types::{GameMode, MotionEvent, RejectReason, SensorSample};

/// Drives one session on a virtual clock.
///
/// Applies the session's effects the way the server actor does: timer
/// schedules replace the wheel, messages are collected in order.
#[derive(Debug)]
pub struct SessionDriver {
    session: GameSession,
    wheel: TimerWheel,
    now_ms: u64,
    sent: Vec<(Audience, ServerMessage)>,
    closed: Vec<ConnectionId>,
    phases: Vec<GamePhase>,
}

impl SessionDriver {
    pub fn new(session: GameSession) -> Self {
        Self {
            session,
            wheel: TimerWheel::new(),
            now_ms: 0,
            sent: Vec::new(),
            closed: Vec::new(),
            phases: Vec::new(),
        }
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// Every message sent so far, in order
    pub fn sent(&self) -> &[(Audience, ServerMessage)] {
        &self.sent
    }

    pub fn closed(&self) -> &[ConnectionId] {
        &self.closed
    }

    /// Phases entered so far
    pub fn phases(&self) -> Vec<GamePhase> {
        self.phases.clone()
    }

    pub fn wheel_idle(&self) -> bool {
        self.wheel.is_idle()
    }

    pub fn input(&mut self, input: SessionInput) -> Vec<Effect> {
        let fx = self.session.handle(input, self.now_ms);
        self.apply(&fx);
        fx
    }

    pub fn join(
        &mut self,
        connection: ConnectionId,
        role: Role,
        token: Option<String>,
    ) -> Vec<Effect> {
        self.input(SessionInput::JoinController { connection, role, token })
    }

    pub fn join_display(&mut self, connection: ConnectionId) -> Vec<Effect> {
        self.input(SessionInput::JoinDisplay { connection })
    }

    pub fn leave(&mut self, connection: ConnectionId) -> Vec<Effect> {
        self.input(SessionInput::Leave { connection })
    }

    pub fn send(&mut self, connection: ConnectionId, message: ControllerMessage) -> Vec<Effect> {
        self.input(SessionInput::Message { connection, message })
    }

    /// Deliver a tick directly, without advancing the clock
    pub fn tick(&mut self, generation: u64, timer: TimerKind) -> Vec<Effect> {
        self.input(SessionInput::Tick { generation, timer })
    }

    /// Fire every timer due up to `t_ms`, then move the clock there
    pub fn advance_to(&mut self, t_ms: u64) {
        while let Some((at, generation, timer)) = self.wheel.pop_due(t_ms) {
            self.now_ms = at;
            let fx = self.session.handle(SessionInput::Tick { generation, timer }, at);
            self.apply(&fx);
        }
        self.now_ms = self.now_ms.max(t_ms);
    }

    pub fn advance_by(&mut self, ms: u64) {
        self.advance_to(self.now_ms + ms);
    }

    /// Run timers until `done` holds or `max_ms` of virtual time has passed
    pub fn run_until(&mut self, done: impl Fn(&GameSession) -> bool, max_ms: u64) {
        let deadline = self.now_ms + max_ms;
        while !done(&self.session) {
            match self.wheel.next_due() {
                Some(next) if next <= deadline => self.advance_to(next),
                _ => break,
            }
        }
    }

    fn apply(&mut self, fx: &[Effect]) {
        for effect in fx {
            match effect {
                Effect::Send { to, message } => self.sent.push((*to, message.clone())),
                Effect::Timers(schedule) => self.wheel.install(schedule, self.now_ms),
                Effect::Close(connection) => self.closed.push(*connection),
            }
        }
        let phase = self.session.phase();
        if self.phases.last().map_or(phase != GamePhase::Lobby, |last| *last != phase) {
            self.phases.push(phase);
        }
    }
}

/// Device and server in one process for a single player.
pub struct LocalPipeline {
    detector: Detector,
    driver: SessionDriver,
    controller: ConnectionId,
    events: Vec<MotionEvent>,
    rejections: Vec<RejectReason>,
}

impl LocalPipeline {
    /// Session in the lobby with one controller (player1) and one display attached
    pub fn new(config: &PartyConfig) -> Self {
        let mode = config.session.mode;
        let id = Uuid::new_v4().simple().to_string();
        let mut driver = SessionDriver::new(GameSession::new(id, config));
        let controller = Uuid::new_v4();
        driver.join(controller, Role::Player1, None);
        driver.join_display(Uuid::new_v4());
        Self {
            detector: Detector::for_mode(mode, config),
            driver,
            controller,
            events: Vec::new(),
            rejections: Vec::new(),
        }
    }

    /// Ready up and start; returns the virtual time at which play began.
    pub fn start_game(&mut self, max_wait_ms: u64) -> Result<u64, PartyError> {
        self.driver.send(self.controller, ControllerMessage::Ready);
        self.driver.send(self.controller, ControllerMessage::StartGame);
        self.driver.run_until(|s| s.phase() == GamePhase::Playing, max_wait_ms);
        if self.driver.session().phase() != GamePhase::Playing {
            return Err(PartyError::InvalidConfig(format!(
                "game did not start within {} ms",
                max_wait_ms
            )));
        }
        Ok(self.driver.now())
    }

    /// Feed one sensor sample at its own timestamp.
    ///
    /// The session clock follows the sample timestamps, so samples must be
    /// given in time order.
    pub fn push(&mut self, sample: &SensorSample) -> DetectorOutput {
        self.driver.advance_to(sample.timestamp_ms());
        let output = self.detector.process(sample);
        match &output {
            DetectorOutput::Event { event } => {
                self.driver
                    .send(self.controller, ControllerMessage::from_event(event));
                self.events.push(event.clone());
            }
            DetectorOutput::Rejected { reason, .. } => self.rejections.push(*reason),
            DetectorOutput::SubjectLost => {
                self.driver.send(self.controller, ControllerMessage::SubjectLost);
            }
            _ => {}
        }
        output
    }

    /// Let the game clock run out; returns the final summary
    pub fn finish(&mut self) -> Option<GameOverSummary> {
        self.driver.run_until(|s| s.phase() == GamePhase::GameOver, u64::from(u32::MAX));
        self.driver.session().summary().cloned()
    }

    pub fn events(&self) -> &[MotionEvent] {
        &self.events
    }

    pub fn rejections(&self) -> &[RejectReason] {
        &self.rejections
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn driver(&self) -> &SessionDriver {
        &self.driver
    }
}

/// Run a sample stream through a fresh detector for `mode`.
///
/// # Arguments
/// * `config` - Detector thresholds
/// * `mode` - Game mode selecting the detector
/// * `samples` - Samples in time order
///
/// # Returns
/// One output per sample
pub fn detect(
    config: &PartyConfig,
    mode: GameMode,
    samples: &[SensorSample],
) -> Vec<DetectorOutput> {
    let mut detector = Detector::for_mode(mode, config);
    samples.iter().map(|s| detector.process(s)).collect()
}

/// Parse newline-delimited JSON sensor samples; blank lines are skipped
pub fn parse_samples(jsonl: &str) -> Result<Vec<SensorSample>, PartyError> {
    jsonl
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| PartyError::ParseError(format!("line {}: {}", i + 1, e)))
        })
        .collect()
}

/// A problem found in a sample file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleIssue {
    /// 1-based line number
    pub line: usize,
    pub problem: String,
}

/// Check a newline-delimited sample file without running a detector.
///
/// Returns the number of samples read and every problem found: unparsable
/// lines, non-finite values and timestamps that do not increase per sensor.
pub fn check_samples(jsonl: &str) -> (usize, Vec<SampleIssue>) {
    let mut issues = Vec::new();
    let mut count = 0;
    let mut last_accel: Option<u64> = None;
    let mut last_pose: Option<u64> = None;

    for (i, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = i + 1;
        let sample: SensorSample = match serde_json::from_str(line) {
            Ok(sample) => sample,
            Err(e) => {
                issues.push(SampleIssue {
                    line: line_no,
                    problem: e.to_string(),
                });
                continue;
            }
        };
        count += 1;

        let (finite, last) = match &sample {
            SensorSample::Accel(s) => (s.is_finite(), &mut last_accel),
            SensorSample::Pose(f) => (f.landmarks.iter().all(|lm| lm.is_finite()), &mut last_pose),
        };
        if !finite {
            issues.push(SampleIssue {
                line: line_no,
                problem: "non-finite value".to_string(),
            });
        }
        let ts = sample.timestamp_ms();
        match *last {
            Some(prev) if ts <= prev => issues.push(SampleIssue {
                line: line_no,
                problem: format!("timestamp {} does not follow {}", ts, prev),
            }),
            _ => *last = Some(ts),
        }
    }
    (count, issues)
}

/// A scripted controller for `simulate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationPlan {
    /// Events per minute
    pub rate_per_min: f64,
    pub amplitude: f64,
    pub form: f64,
    /// Stop sending after this many events
    pub events: Option<u32>,
    /// Drop the controller this long after play starts
    pub disconnect_after_ms: Option<u64>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            rate_per_min: 110.0,
            amplitude: 5.5,
            form: 0.95,
            events: None,
            disconnect_after_ms: None,
        }
    }
}

fn scripted_message(mode: GameMode, plan: &SimulationPlan) -> ControllerMessage {
    let report = MotionReport {
        depth: Some(plan.amplitude),
        form: Some(plan.form),
        ..MotionReport::default()
    };
    match mode {
        GameMode::Cpr => ControllerMessage::Compression(MotionReport {
            form: None,
            recoil: Some(plan.form),
            ..report
        }),
        GameMode::Pushup => ControllerMessage::Pushup(report),
        GameMode::Squat => ControllerMessage::Squat(report),
        GameMode::Puzzle => ControllerMessage::Gesture {
            gesture: crate::types::GestureKind::Rotate,
        },
    }
}

/// Play one full game with a scripted controller sending wire-level events
pub fn simulate_game(
    config: &PartyConfig,
    plan: &SimulationPlan,
) -> Result<GameOverSummary, PartyError> {
    if !(plan.rate_per_min.is_finite() && plan.rate_per_min > 0.0) {
        return Err(PartyError::InvalidConfig("simulation rate must be positive".to_string()));
    }
    let mode = config.session.mode;
    let mut pipeline = LocalPipeline::new(config);
    let started = pipeline.start_game(60_000)?;
    let period = (60_000.0 / plan.rate_per_min).round().max(1.0) as u64;
    let game_end = started + u64::from(config.session.game_secs) * 1_000;
    let disconnect_at = plan.disconnect_after_ms.map(|d| started + d);
    let message = scripted_message(mode, plan);

    let mut sent = 0u32;
    let mut t = started + period;
    while t < game_end && plan.events.map_or(true, |n| sent < n) {
        if disconnect_at.is_some_and(|d| d <= t) {
            break;
        }
        pipeline.driver.advance_to(t);
        pipeline.driver.send(pipeline.controller, message.clone());
        sent += 1;
        t += period;
    }
    if let Some(d) = disconnect_at.filter(|d| *d < game_end) {
        pipeline.driver.advance_to(d);
        pipeline.driver.leave(pipeline.controller);
    }

    pipeline
        .finish()
        .ok_or_else(|| PartyError::InvalidConfig("game did not finish".to_string()))
}
