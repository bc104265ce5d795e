//! Discrete gesture detector for the puzzle game
//!
//! Classifies each front-view frame into one of the puzzle gestures or
//! neutral:
//!
//! - both wrists above the nose: hard drop
//! - one wrist above the nose: rotate
//! - a wrist reaching sideways past the shoulders: left / right
//!
//! A gesture fires once it has been held for the debounce count, and the pose
//! must return to neutral before the next one can fire.

use std::collections::HashMap;

use tracing::debug;

use super::geometry::{body_centers, BodyCenters};
use super::rep::SubjectWatch;
use super::{is_monotonic, DetectorOutput, MotionDetector};
use crate::config::GestureConfig;
use crate::types::{
    landmarks, GestureKind, Landmark, MotionEvent, MotionKind, MotionQuality, PoseFrame,
};

#[derive(Debug, Clone)]
pub struct GestureDetector {
    config: GestureConfig,
    candidate: Option<GestureKind>,
    run: u32,
    run_start_ms: u64,
    armed: bool,
    last_fired: HashMap<GestureKind, u64>,
    watch: SubjectWatch,
    last_ms: Option<u64>,
    sequence: u64,
    feedback: Option<&'static str>,
}

impl GestureDetector {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            candidate: None,
            run: 0,
            run_start_ms: 0,
            armed: true,
            last_fired: HashMap::new(),
            watch: SubjectWatch::new(config.no_subject_timeout_ms),
            last_ms: None,
            sequence: 0,
            feedback: None,
            config,
        }
    }

    pub fn count(&self) -> u64 {
        self.sequence
    }

    fn classify(&self, frame: &PoseFrame, body: &BodyCenters) -> Option<GestureKind> {
        let c = &self.config;
        let left = frame.visible(landmarks::LEFT_WRIST, c.min_visibility);
        let right = frame.visible(landmarks::RIGHT_WRIST, c.min_visibility);
        let raised = |w: &Option<Landmark>| w.is_some_and(|w| w.y < body.nose.y);

        match (raised(&left), raised(&right)) {
            (true, true) => return Some(GestureKind::HardDrop),
            (true, false) | (false, true) => return Some(GestureKind::Rotate),
            (false, false) => {}
        }

        let half = body.shoulder_width / 2.0;
        let reach = c.lateral_reach * body.shoulder_width;
        let image_left = body.shoulder.x - half - reach;
        let image_right = body.shoulder.x + half + reach;
        let wrists = [left, right];
        let (to_left, to_right) = (
            wrists.iter().flatten().any(|w| w.x < image_left),
            wrists.iter().flatten().any(|w| w.x > image_right),
        );
        let (left_kind, right_kind) = if c.mirror {
            (GestureKind::Right, GestureKind::Left)
        } else {
            (GestureKind::Left, GestureKind::Right)
        };
        match (to_left, to_right) {
            (true, false) => Some(left_kind),
            (false, true) => Some(right_kind),
            _ => None,
        }
    }

    fn cooled_down(&self, kind: GestureKind, now_ms: u64) -> bool {
        self.last_fired
            .get(&kind)
            .map_or(true, |last| now_ms.saturating_sub(*last) >= self.config.cooldown_ms)
    }
}

impl MotionDetector for GestureDetector {
    type Sample = PoseFrame;

    fn process_sample(&mut self, frame: &PoseFrame) -> DetectorOutput {
        let now = frame.timestamp_ms;
        if !is_monotonic(self.last_ms, now) {
            return DetectorOutput::Skipped;
        }
        self.last_ms = Some(now);

        let Some(body) = body_centers(frame, self.config.min_visibility) else {
            self.candidate = None;
            self.run = 0;
            if self.watch.missing(now) {
                self.feedback = Some("Step back into view");
                return DetectorOutput::SubjectLost;
            }
            return DetectorOutput::Idle;
        };
        self.watch.seen(now);
        self.feedback = None;

        let gesture = self.classify(frame, &body);
        if gesture == self.candidate && self.run > 0 {
            self.run = self.run.saturating_add(1);
        } else {
            self.candidate = gesture;
            self.run = 1;
            self.run_start_ms = now;
        }
        if self.run < self.config.debounce_samples {
            return DetectorOutput::Idle;
        }

        let Some(kind) = gesture else {
            self.armed = true;
            return DetectorOutput::Idle;
        };
        if !self.armed || !self.cooled_down(kind, now) {
            return DetectorOutput::Idle;
        }

        self.armed = false;
        self.last_fired.insert(kind, now);
        self.sequence += 1;
        debug!(gesture = kind.as_str(), sequence = self.sequence, "gesture");

        DetectorOutput::Event {
            event: MotionEvent {
                kind: MotionKind::Gesture(kind),
                sequence: self.sequence,
                started_ms: self.run_start_ms,
                timestamp_ms: now,
                duration_ms: now.saturating_sub(self.run_start_ms),
                quality: MotionQuality {
                    amplitude: 1.0,
                    form: 1.0,
                    ..MotionQuality::default()
                },
            },
        }
    }

    fn state_name(&self) -> &'static str {
        if self.armed {
            "armed"
        } else {
            "awaitingNeutral"
        }
    }

    fn is_calibrated(&self) -> bool {
        true
    }

    fn feedback(&self) -> Option<&'static str> {
        self.feedback
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::geometry::fixtures::standing_frame;
    use pretty_assertions::assert_eq;

    const FRAME_MS: u64 = 33;

    #[derive(Clone, Copy)]
    enum Pose {
        Neutral,
        OneUp,
        BothUp,
        ReachRight,
        ReachLeft,
    }

    fn frame(t: u64, pose: Pose) -> PoseFrame {
        let mut frame = standing_frame(t, 0.0, 0.0);
        let (left, right) = match pose {
            Pose::Neutral => ((0.65, 0.5), (0.35, 0.5)),
            Pose::OneUp => ((0.65, 0.05), (0.35, 0.5)),
            Pose::BothUp => ((0.65, 0.05), (0.35, 0.05)),
            Pose::ReachRight => ((0.85, 0.25), (0.35, 0.5)),
            Pose::ReachLeft => ((0.65, 0.5), (0.15, 0.25)),
        };
        frame.landmarks[landmarks::LEFT_WRIST] = Landmark::new(left.0, left.1, 0.95);
        frame.landmarks[landmarks::RIGHT_WRIST] = Landmark::new(right.0, right.1, 0.95);
        frame
    }

    fn run(det: &mut GestureDetector, parts: &[(Pose, usize)]) -> Vec<MotionEvent> {
        let mut t = 0;
        let mut events = Vec::new();
        for &(pose, count) in parts {
            for _ in 0..count {
                if let Some(e) = det.process_sample(&frame(t, pose)).event() {
                    events.push(e.clone());
                }
                t += FRAME_MS;
            }
        }
        events
    }

    fn kinds(events: &[MotionEvent]) -> Vec<MotionKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_rotate_fires_once_while_held() {
        let mut det = GestureDetector::new(GestureConfig::default());
        let events = run(&mut det, &[(Pose::Neutral, 5), (Pose::OneUp, 30)]);
        assert_eq!(kinds(&events), vec![MotionKind::Gesture(GestureKind::Rotate)]);
        assert_eq!(events[0].started_ms, 5 * FRAME_MS);
        assert_eq!(events[0].timestamp_ms, 7 * FRAME_MS);
        assert_eq!(det.state_name(), "awaitingNeutral");
    }

    #[test]
    fn test_neutral_rearms_detector() {
        let mut det = GestureDetector::new(GestureConfig::default());
        let events = run(
            &mut det,
            &[(Pose::Neutral, 5), (Pose::OneUp, 5), (Pose::Neutral, 10), (Pose::OneUp, 5)],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence, 2);
    }

    #[test]
    fn test_same_gesture_inside_cooldown_is_dropped() {
        let mut det = GestureDetector::new(GestureConfig::default());
        let events = run(
            &mut det,
            &[(Pose::Neutral, 3), (Pose::OneUp, 3), (Pose::Neutral, 3), (Pose::OneUp, 3)],
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_flicker_shorter_than_debounce_ignored() {
        let mut det = GestureDetector::new(GestureConfig::default());
        let events = run(&mut det, &[(Pose::Neutral, 5), (Pose::BothUp, 2), (Pose::Neutral, 5)]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_all_gesture_kinds() {
        let mut det = GestureDetector::new(GestureConfig::default());
        let events = run(
            &mut det,
            &[
                (Pose::BothUp, 4),
                (Pose::Neutral, 4),
                (Pose::ReachRight, 4),
                (Pose::Neutral, 4),
                (Pose::ReachLeft, 4),
            ],
        );
        assert_eq!(
            kinds(&events),
            vec![
                MotionKind::Gesture(GestureKind::HardDrop),
                MotionKind::Gesture(GestureKind::Right),
                MotionKind::Gesture(GestureKind::Left),
            ]
        );
    }

    #[test]
    fn test_mirror_swaps_sides() {
        let config = GestureConfig {
            mirror: true,
            ..GestureConfig::default()
        };
        let mut det = GestureDetector::new(config);
        let events = run(&mut det, &[(Pose::ReachRight, 4)]);
        assert_eq!(kinds(&events), vec![MotionKind::Gesture(GestureKind::Left)]);
    }

    #[test]
    fn test_missing_subject_reported_once() {
        let mut det = GestureDetector::new(GestureConfig::default());
        det.process_sample(&frame(0, Pose::Neutral));
        let lost = (1..300u64)
            .filter(|i| {
                det.process_sample(&PoseFrame::empty(i * FRAME_MS)) == DetectorOutput::SubjectLost
            })
            .count();
        assert_eq!(lost, 1);
        assert_eq!(det.feedback(), Some("Step back into view"));
    }
}
