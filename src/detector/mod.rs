//! Motion detectors
//!
//! Each detector turns a continuous sensor stream into discrete, validated
//! motion events. Detectors are single-threaded state machines owned by the
//! device loop; every call processes exactly one sample and yields at most one
//! event.

pub mod compression;
pub mod geometry;
pub mod gesture;
pub mod lean;
pub mod pushup;
pub mod rep;
pub mod squat;

use serde::Serialize;

use crate::calibration::CalibrationStatus;
use crate::config::PartyConfig;
use crate::types::{DirectionEvent, GameMode, MotionEvent, RejectReason, SensorSample};

pub use compression::CompressionDetector;
pub use gesture::GestureDetector;
pub use lean::LeanDetector;
pub use pushup::PushUpDetector;
pub use squat::SquatDetector;

/// Result of feeding one sample to a detector
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "output", rename_all = "camelCase")]
pub enum DetectorOutput {
    /// Sample consumed, nothing to report
    Idle,
    /// Sample dropped as malformed (non-finite or out of order)
    Skipped,
    Calibration { status: CalibrationStatus },
    Event { event: MotionEvent },
    /// A candidate repetition failed a gate
    Rejected { reason: RejectReason, duration_ms: u64 },
    /// No subject seen for longer than the configured timeout
    SubjectLost,
    Direction { event: DirectionEvent },
}

impl DetectorOutput {
    pub fn event(&self) -> Option<&MotionEvent> {
        match self {
            DetectorOutput::Event { event } => Some(event),
            _ => None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.event().is_some()
    }
}

/// Common detector contract
pub trait MotionDetector {
    type Sample;

    fn process_sample(&mut self, sample: &Self::Sample) -> DetectorOutput;

    /// Name of the current state-machine state
    fn state_name(&self) -> &'static str;

    fn is_calibrated(&self) -> bool;

    /// Latest short feedback line for the player, if any
    fn feedback(&self) -> Option<&'static str>;

    /// Forget calibration and all in-flight state
    fn reset(&mut self);
}

/// A detector of any kind, dispatched on the sample type
#[derive(Debug, Clone)]
pub enum Detector {
    Compression(CompressionDetector),
    PushUp(PushUpDetector),
    Squat(SquatDetector),
    Gesture(GestureDetector),
}

impl Detector {
    /// The detector a game mode is played with
    pub fn for_mode(mode: GameMode, config: &PartyConfig) -> Self {
        match mode {
            GameMode::Cpr => {
                Detector::Compression(CompressionDetector::new(config.compression.clone()))
            }
            GameMode::Pushup => Detector::PushUp(PushUpDetector::new(config.pushup.clone())),
            GameMode::Squat => Detector::Squat(SquatDetector::new(config.squat.clone())),
            GameMode::Puzzle => Detector::Gesture(GestureDetector::new(config.gesture.clone())),
        }
    }

    /// Feed a sample; samples of the wrong sensor kind are skipped.
    pub fn process(&mut self, sample: &SensorSample) -> DetectorOutput {
        match (self, sample) {
            (Detector::Compression(d), SensorSample::Accel(s)) => d.process_sample(s),
            (Detector::PushUp(d), SensorSample::Pose(f)) => d.process_sample(f),
            (Detector::Squat(d), SensorSample::Pose(f)) => d.process_sample(f),
            (Detector::Gesture(d), SensorSample::Pose(f)) => d.process_sample(f),
            _ => DetectorOutput::Skipped,
        }
    }

    pub fn uses_pose(&self) -> bool {
        !matches!(self, Detector::Compression(_))
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            Detector::Compression(d) => d.state_name(),
            Detector::PushUp(d) => d.state_name(),
            Detector::Squat(d) => d.state_name(),
            Detector::Gesture(d) => d.state_name(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        match self {
            Detector::Compression(d) => d.is_calibrated(),
            Detector::PushUp(d) => d.is_calibrated(),
            Detector::Squat(d) => d.is_calibrated(),
            Detector::Gesture(d) => d.is_calibrated(),
        }
    }

    pub fn feedback(&self) -> Option<&'static str> {
        match self {
            Detector::Compression(d) => d.feedback(),
            Detector::PushUp(d) => d.feedback(),
            Detector::Squat(d) => d.feedback(),
            Detector::Gesture(d) => d.feedback(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Detector::Compression(d) => d.reset(),
            Detector::PushUp(d) => d.reset(),
            Detector::Squat(d) => d.reset(),
            Detector::Gesture(d) => d.reset(),
        }
    }
}

/// Time step in seconds between two samples, clamped to [1 ms, 100 ms].
///
/// The first sample uses a nominal 20 ms step.
pub(crate) fn step_secs(last_ms: Option<u64>, now_ms: u64) -> f64 {
    match last_ms {
        Some(last) => (now_ms.saturating_sub(last) as f64 / 1000.0).clamp(0.001, 0.1),
        None => 0.02,
    }
}

/// True when `now_ms` is strictly after the previous sample
pub(crate) fn is_monotonic(last_ms: Option<u64>, now_ms: u64) -> bool {
    last_ms.map_or(true, |last| now_ms > last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccelSample, PoseFrame};

    #[test]
    fn test_wrong_sample_kind_is_skipped() {
        let config = PartyConfig::default();
        let mut detector = Detector::for_mode(GameMode::Cpr, &config);
        let out = detector.process(&SensorSample::Pose(PoseFrame::empty(0)));
        assert_eq!(out, DetectorOutput::Skipped);

        let mut detector = Detector::for_mode(GameMode::Squat, &config);
        let out = detector.process(&SensorSample::Accel(AccelSample::linear_z(0, 0.0)));
        assert_eq!(out, DetectorOutput::Skipped);
        assert!(detector.uses_pose());
    }

    #[test]
    fn test_step_secs_clamped() {
        assert_eq!(step_secs(None, 100), 0.02);
        assert_eq!(step_secs(Some(100), 100), 0.001);
        assert_eq!(step_secs(Some(0), 5_000), 0.1);
        assert!((step_secs(Some(0), 10) - 0.01).abs() < 1e-12);
    }
}
