//! Device-side controller glue
//!
//! Owns the detectors running on the phone, turns their outputs into wire
//! messages and keeps a user-facing status line. Sensor access and pose
//! inference live outside the crate; the pose model is plugged in through
//! [`PoseEstimator`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationStatus;
use crate::config::PartyConfig;
use crate::detector::{Detector, DetectorOutput, LeanDetector, MotionDetector};
use crate::error::PartyError;
use crate::protocol::ControllerMessage;
use crate::types::{GameMode, PoseFrame, SensorSample};

/// Pose model collaborator: one camera frame in, landmarks out
pub trait PoseEstimator {
    type Frame;

    fn detect(&mut self, frame: &Self::Frame, timestamp_ms: u64) -> Result<PoseFrame, PartyError>;
}

/// Controller connection state as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The server refused the join; the link has stopped
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    Starting,
    Calibrating,
    Connecting,
    Ready,
    /// The server refused this controller's role
    JoinRefused,
    /// Fatal for this detector session
    SensorError,
}

/// Status line shown on the phone: a headline plus an actionable detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub status: StatusKind,
    pub sub_status: String,
}

impl ControllerStatus {
    fn new(status: StatusKind, sub_status: impl Into<String>) -> Self {
        Self {
            status,
            sub_status: sub_status.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SensorState {
    Starting,
    Calibrating { collected: usize, required: usize },
    Unstable,
    Ready,
    Unavailable(String),
    Denied(String),
}

/// Detectors plus status for one phone
pub struct Controller {
    mode: GameMode,
    detector: Detector,
    lean: Option<LeanDetector>,
    sensor: SensorState,
    link: LinkState,
    calibration_timed_out: bool,
}

impl Controller {
    pub fn new(config: &PartyConfig) -> Self {
        let mode = config.session.mode;
        Self {
            mode,
            detector: Detector::for_mode(mode, config),
            lean: None,
            sensor: SensorState::Starting,
            link: LinkState::Disconnected,
            calibration_timed_out: false,
        }
    }

    /// Also run the lean detector on pose frames and report head direction
    pub fn with_lean(mut self, config: &PartyConfig) -> Self {
        self.lean = Some(LeanDetector::new(config.lean.clone()));
        self
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn set_link(&mut self, link: LinkState) {
        if link != self.link {
            info!(from = ?self.link, to = ?link, "controller link");
            self.link = link;
        }
    }

    /// True once a sensor error has ended the detector session
    pub fn is_stopped(&self) -> bool {
        matches!(self.sensor, SensorState::Unavailable(_) | SensorState::Denied(_))
    }

    /// Record a sensor-side failure. Returns true when it is fatal.
    pub fn on_sensor_error(&mut self, err: &PartyError) -> bool {
        match err {
            PartyError::SensorUnavailable(what) => {
                warn!(%what, "sensor unavailable");
                self.sensor = SensorState::Unavailable(what.clone());
            }
            PartyError::PermissionDenied(what) => {
                warn!(%what, "sensor permission denied");
                self.sensor = SensorState::Denied(what.clone());
            }
            other => {
                debug!(error = %other, "non-fatal sensor error");
                return false;
            }
        }
        true
    }

    /// Feed one sample; returns the messages to send to the server.
    pub fn on_sample(&mut self, sample: &SensorSample) -> Vec<ControllerMessage> {
        if self.is_stopped() {
            return Vec::new();
        }
        let mut out = Vec::new();

        let output = self.detector.process(sample);
        self.track(&output);
        match &output {
            DetectorOutput::Event { event } => out.push(ControllerMessage::from_event(event)),
            DetectorOutput::SubjectLost => {
                info!(mode = self.mode.as_str(), "subject out of view past timeout");
                out.push(ControllerMessage::SubjectLost);
            }
            _ => {}
        }

        if let (Some(lean), SensorSample::Pose(frame)) = (self.lean.as_mut(), sample) {
            if let DetectorOutput::Direction { event } = lean.process_sample(frame) {
                out.push(ControllerMessage::from_direction(&event));
            }
        }
        out
    }

    /// Run the pose model on a camera frame and feed the result
    pub fn on_frame<E: PoseEstimator>(
        &mut self,
        estimator: &mut E,
        frame: &E::Frame,
        timestamp_ms: u64,
    ) -> Result<Vec<ControllerMessage>, PartyError> {
        match estimator.detect(frame, timestamp_ms) {
            Ok(pose) => Ok(self.on_sample(&SensorSample::Pose(pose))),
            Err(err) => {
                self.on_sensor_error(&err);
                Err(err)
            }
        }
    }

    fn track(&mut self, output: &DetectorOutput) {
        match output {
            DetectorOutput::Calibration { status } => match status {
                CalibrationStatus::Collecting { collected, required } => {
                    self.sensor = SensorState::Calibrating {
                        collected: *collected,
                        required: *required,
                    };
                }
                CalibrationStatus::Unstable => self.sensor = SensorState::Unstable,
                CalibrationStatus::TimedOut => self.calibration_timed_out = true,
                CalibrationStatus::Complete => {
                    self.sensor = SensorState::Ready;
                    self.calibration_timed_out = false;
                }
            },
            DetectorOutput::Skipped => {}
            _ if self.detector.is_calibrated() => self.sensor = SensorState::Ready,
            _ => {}
        }
    }

    /// Recalibrate from scratch, keeping the link
    pub fn recalibrate(&mut self) {
        self.detector.reset();
        if let Some(lean) = self.lean.as_mut() {
            lean.reset();
        }
        if !self.is_stopped() {
            self.sensor = SensorState::Starting;
        }
        self.calibration_timed_out = false;
    }

    pub fn status(&self) -> ControllerStatus {
        match &self.sensor {
            SensorState::Denied(what) => {
                return ControllerStatus::new(
                    StatusKind::SensorError,
                    format!(
                        "Access to {} was denied. Allow it in the browser settings and reload",
                        what
                    ),
                )
            }
            SensorState::Unavailable(what) => {
                return ControllerStatus::new(
                    StatusKind::SensorError,
                    format!("This device has no usable {}. Try another phone", what),
                )
            }
            _ => {}
        }

        match self.link {
            LinkState::Connected => {}
            LinkState::Reconnecting { attempt } => {
                return ControllerStatus::new(
                    StatusKind::Connecting,
                    format!("Connection lost, retrying (attempt {})", attempt),
                )
            }
            LinkState::Rejected => {
                return ControllerStatus::new(
                    StatusKind::JoinRefused,
                    "This player slot is taken. Rejoin from the game screen or pick another player",
                )
            }
            LinkState::Connecting | LinkState::Disconnected => {
                return ControllerStatus::new(StatusKind::Connecting, "Connecting to the game")
            }
        }

        let hold_still = match self.mode {
            GameMode::Cpr => "Place the phone on the chest and hold still",
            _ => "Step into view and hold still",
        };
        match &self.sensor {
            SensorState::Ready => ControllerStatus::new(
                StatusKind::Ready,
                self.detector.feedback().unwrap_or("Ready"),
            ),
            _ if self.calibration_timed_out => ControllerStatus::new(
                StatusKind::Calibrating,
                format!("Calibration is taking too long. {}", hold_still),
            ),
            SensorState::Calibrating { collected, required } => ControllerStatus::new(
                StatusKind::Calibrating,
                format!("{} ({}/{})", hold_still, collected, required),
            ),
            SensorState::Unstable => ControllerStatus::new(
                StatusKind::Calibrating,
                "Too much movement, calibration restarted",
            ),
            _ => ControllerStatus::new(StatusKind::Starting, hold_still),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::geometry::fixtures::standing_frame;
    use crate::types::{AccelSample, Direction};
    use pretty_assertions::assert_eq;

    fn accel(t: u64, z: f64) -> SensorSample {
        SensorSample::Accel(AccelSample::linear_z(t, z))
    }

    fn connected(config: &PartyConfig) -> Controller {
        let mut controller = Controller::new(config);
        controller.set_link(LinkState::Connected);
        controller
    }

    #[test]
    fn test_calibration_then_compression_message() {
        let mut controller = connected(&PartyConfig::default());
        assert_eq!(controller.status().status, StatusKind::Starting);

        let mut t = 1_000;
        let mut sent = Vec::new();
        for i in 0..30 {
            sent.extend(controller.on_sample(&accel(t, if i % 2 == 1 { 0.05 } else { -0.05 })));
            t += 20;
            if i == 10 {
                let status = controller.status();
                assert_eq!(status.status, StatusKind::Calibrating);
                assert!(status.sub_status.contains("/30)"));
            }
        }
        assert_eq!(controller.status().status, StatusKind::Ready);

        for (value, count) in [(-5.0, 5), (0.0, 31), (4.0, 6), (0.0, 15)] {
            for _ in 0..count {
                sent.extend(controller.on_sample(&accel(t, value)));
                t += 20;
            }
        }
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ControllerMessage::Compression(report) => {
                let depth = report.depth.unwrap();
                assert!((4.0..=7.0).contains(&depth), "depth {}", depth);
                assert_eq!(report.count, Some(1));
                assert_eq!(report.duration_ms, Some(900));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_permission_denied_stops_detection() {
        let mut controller = connected(&PartyConfig::default());
        assert!(controller.on_sensor_error(&PartyError::PermissionDenied("motion sensors".into())));
        assert!(controller.is_stopped());
        let status = controller.status();
        assert_eq!(status.status, StatusKind::SensorError);
        assert!(status.sub_status.contains("motion sensors"));
        assert!(controller.on_sample(&accel(0, -5.0)).is_empty());

        // a transport hiccup is not a sensor failure
        let mut controller = connected(&PartyConfig::default());
        assert!(!controller.on_sensor_error(&PartyError::Transport("closed".into())));
        assert!(!controller.is_stopped());
    }

    #[test]
    fn test_link_state_shown_before_calibration() {
        let mut controller = Controller::new(&PartyConfig::default());
        assert_eq!(controller.status().sub_status, "Connecting to the game");
        controller.set_link(LinkState::Reconnecting { attempt: 3 });
        assert!(controller.status().sub_status.contains("attempt 3"));
        controller.set_link(LinkState::Connected);
        assert_eq!(controller.status().status, StatusKind::Starting);
        controller.set_link(LinkState::Rejected);
        let status = controller.status();
        assert_eq!(status.status, StatusKind::JoinRefused);
        assert!(status.sub_status.contains("slot is taken"));
    }

    #[test]
    fn test_subject_lost_is_sent_once() {
        let mut config = PartyConfig::default();
        config.session.mode = GameMode::Squat;
        let mut controller = connected(&config);

        let mut t = 1_000;
        for _ in 0..30 {
            let frame = SensorSample::Pose(standing_frame(t, 0.0, 0.0));
            assert!(controller.on_sample(&frame).is_empty());
            t += 33;
        }
        assert_eq!(controller.status().status, StatusKind::Ready);

        // 9.9 s with nobody in frame, default timeout is 5 s
        let mut sent = Vec::new();
        for _ in 0..300 {
            sent.extend(controller.on_sample(&SensorSample::Pose(PoseFrame::empty(t))));
            t += 33;
        }
        assert_eq!(sent, vec![ControllerMessage::SubjectLost]);
    }

    struct FakeEstimator {
        fail: bool,
    }

    impl PoseEstimator for FakeEstimator {
        /// Sideways lean of a standing figure
        type Frame = f64;

        fn detect(&mut self, lean: &f64, timestamp_ms: u64) -> Result<PoseFrame, PartyError> {
            if self.fail {
                return Err(PartyError::SensorUnavailable("camera".into()));
            }
            Ok(standing_frame(timestamp_ms, 0.0, *lean))
        }
    }

    #[test]
    fn test_pose_frames_report_head_direction() {
        let mut config = PartyConfig::default();
        config.session.mode = GameMode::Squat;
        let mut controller = connected(&config).with_lean(&config);
        let mut estimator = FakeEstimator { fail: false };

        let mut sent = Vec::new();
        for i in 0..20u64 {
            sent.extend(controller.on_frame(&mut estimator, &0.1, i * 33).unwrap());
        }
        let directions: Vec<Direction> = sent
            .iter()
            .filter_map(|m| match m {
                ControllerMessage::HeadDirection { direction, .. } => Some(*direction),
                _ => None,
            })
            .collect();
        assert_eq!(directions, vec![Direction::Right]);

        estimator.fail = true;
        assert!(controller.on_frame(&mut estimator, &0.0, 700).is_err());
        assert_eq!(controller.status().status, StatusKind::SensorError);
    }
}
