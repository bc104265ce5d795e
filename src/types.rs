//! Core types for the Motion Party pipeline
//!
//! This module defines the data that flows from the device sensors through the
//! detectors: raw samples, pose landmarks, and the discrete motion events the
//! detectors emit.

use serde::{Deserialize, Serialize};

/// One accelerometer reading.
///
/// `linear` marks samples where the OS already removed gravity, in which case
/// the detector skips its own high-pass stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub timestamp_ms: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub linear: bool,
}

impl AccelSample {
    /// Raw reading including gravity
    pub fn new(timestamp_ms: u64, x: f64, y: f64, z: f64) -> Self {
        Self {
            timestamp_ms,
            x,
            y,
            z,
            linear: false,
        }
    }

    /// Gravity-free Z-axis reading
    pub fn linear_z(timestamp_ms: u64, z: f64) -> Self {
        Self {
            timestamp_ms,
            x: 0.0,
            y: 0.0,
            z,
            linear: true,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// MediaPipe pose landmark indices used by the detectors.
pub mod landmarks {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_ELBOW: usize = 13;
    pub const RIGHT_ELBOW: usize = 14;
    pub const LEFT_WRIST: usize = 15;
    pub const RIGHT_WRIST: usize = 16;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LEFT_KNEE: usize = 25;
    pub const RIGHT_KNEE: usize = 26;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;

    /// Landmarks per frame
    pub const COUNT: usize = 33;
}

fn default_visibility() -> f64 {
    1.0
}

/// A single pose landmark in normalized image coordinates (y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_visibility")]
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, visibility: f64) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
            && self.visibility.is_finite()
    }
}

/// One pose-estimation frame. An empty landmark list means no subject was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

impl PoseFrame {
    pub fn new(timestamp_ms: u64, landmarks: Vec<Landmark>) -> Self {
        Self {
            timestamp_ms,
            landmarks,
        }
    }

    /// Frame with no detected subject
    pub fn empty(timestamp_ms: u64) -> Self {
        Self::new(timestamp_ms, Vec::new())
    }

    /// Landmark at `index` if present and at least `min_visibility` visible
    pub fn visible(&self, index: usize, min_visibility: f64) -> Option<Landmark> {
        self.landmarks
            .get(index)
            .copied()
            .filter(|lm| lm.is_finite() && lm.visibility >= min_visibility)
    }

    pub fn has_subject(&self) -> bool {
        !self.landmarks.is_empty()
    }
}

/// A sensor reading of either kind, as carried in replay files and the FFI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorSample {
    Accel(AccelSample),
    Pose(PoseFrame),
}

impl SensorSample {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            SensorSample::Accel(s) => s.timestamp_ms,
            SensorSample::Pose(f) => f.timestamp_ms,
        }
    }
}

/// Discrete puzzle-game gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GestureKind {
    Left,
    Right,
    Rotate,
    HardDrop,
}

impl GestureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::Left => "left",
            GestureKind::Right => "right",
            GestureKind::Rotate => "rotate",
            GestureKind::HardDrop => "hardDrop",
        }
    }
}

/// What kind of motion an event represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionKind {
    Compression,
    PushUp,
    Squat,
    Gesture(GestureKind),
}

impl MotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionKind::Compression => "compression",
            MotionKind::PushUp => "pushup",
            MotionKind::Squat => "squat",
            MotionKind::Gesture(_) => "gesture",
        }
    }
}

/// Quality measures attached to an accepted repetition.
///
/// `amplitude` is depth in cm for compressions, elbow flexion in degrees for
/// push-ups, and hip drop as a fraction of leg length for squats. `form` is
/// the recoil ratio for compressions and an alignment quality for pose reps,
/// both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionQuality {
    pub amplitude: f64,
    pub form: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_offset_ms: Option<i64>,
}

/// A validated discrete motion. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionEvent {
    pub kind: MotionKind,
    /// 1-based count of accepted events from this detector
    pub sequence: u64,
    pub started_ms: u64,
    pub timestamp_ms: u64,
    pub duration_ms: u64,
    pub quality: MotionQuality,
}

/// Lean / pointing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    #[default]
    Center,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Center => "center",
            Direction::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionEvent {
    pub direction: Direction,
    pub yaw_deg: f64,
    pub timestamp_ms: u64,
}

/// Why a candidate repetition was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    TooFast,
    TooSlow,
    TooShallow,
    RateLimited,
    PoorForm,
}

impl RejectReason {
    /// Short on-screen feedback for the player
    pub fn feedback(&self, kind: MotionKind) -> &'static str {
        match (self, kind) {
            (RejectReason::TooFast, _) => "Too fast",
            (RejectReason::TooSlow, _) => "Too slow",
            (RejectReason::TooShallow, MotionKind::Compression) => "Push harder",
            (RejectReason::TooShallow, _) => "Go lower",
            (RejectReason::RateLimited, _) => "Slow down",
            (RejectReason::PoorForm, MotionKind::Squat) => "Keep your chest up",
            (RejectReason::PoorForm, _) => "Keep your body straight",
        }
    }
}

/// Which game a session runs; decides which motion events count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Cpr,
    Pushup,
    Squat,
    Puzzle,
}

impl GameMode {
    pub fn accepts(&self, kind: MotionKind) -> bool {
        matches!(
            (self, kind),
            (GameMode::Cpr, MotionKind::Compression)
                | (GameMode::Pushup, MotionKind::PushUp)
                | (GameMode::Squat, MotionKind::Squat)
                | (GameMode::Puzzle, MotionKind::Gesture(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Cpr => "cpr",
            GameMode::Pushup => "pushup",
            GameMode::Squat => "squat",
            GameMode::Puzzle => "puzzle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_sample_tagged_json() {
        let sample: SensorSample =
            serde_json::from_str(r#"{"kind":"accel","timestamp_ms":10,"x":0.0,"y":0.0,"z":9.8}"#)
                .unwrap();
        assert_eq!(sample.timestamp_ms(), 10);
        match sample {
            SensorSample::Accel(a) => assert!(!a.linear),
            _ => panic!("expected accel"),
        }
    }

    #[test]
    fn test_pose_frame_visibility_filter() {
        let mut points = vec![Landmark::new(0.5, 0.5, 1.0); landmarks::COUNT];
        points[landmarks::LEFT_WRIST].visibility = 0.2;
        let frame = PoseFrame::new(0, points);

        assert!(frame.visible(landmarks::NOSE, 0.5).is_some());
        assert!(frame.visible(landmarks::LEFT_WRIST, 0.5).is_none());
        assert!(frame.visible(99, 0.0).is_none());
        assert!(!PoseFrame::empty(0).has_subject());
    }

    #[test]
    fn test_game_mode_accepts_matching_kind() {
        assert!(GameMode::Cpr.accepts(MotionKind::Compression));
        assert!(!GameMode::Cpr.accepts(MotionKind::Squat));
        assert!(GameMode::Puzzle.accepts(MotionKind::Gesture(GestureKind::Rotate)));
    }
}
