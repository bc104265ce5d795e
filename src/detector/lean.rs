//! Lean / pointing sub-detector
//!
//! Emits a discrete left/center/right direction from the horizontal offset of
//! the nose relative to the hip center, measured in shoulder widths. Runs next
//! to the main detector to steer games that need a direction.

use tracing::debug;

use super::geometry::body_centers;
use super::{is_monotonic, DetectorOutput, MotionDetector};
use crate::config::LeanConfig;
use crate::filters::Ema;
use crate::types::{Direction, DirectionEvent, PoseFrame};

#[derive(Debug, Clone)]
pub struct LeanDetector {
    config: LeanConfig,
    smoother: Ema,
    direction: Direction,
    last_change_ms: Option<u64>,
    last_ms: Option<u64>,
}

impl LeanDetector {
    pub fn new(config: LeanConfig) -> Self {
        Self {
            smoother: Ema::new(config.smoothing_alpha),
            direction: Direction::Center,
            last_change_ms: None,
            last_ms: None,
            config,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Smoothed offset in shoulder widths, positive to the right
    pub fn offset(&self) -> Option<f64> {
        self.smoother.value()
    }

    fn classify(&self, offset: f64) -> Direction {
        let c = &self.config;
        if offset > c.enter_threshold {
            Direction::Right
        } else if offset < -c.enter_threshold {
            Direction::Left
        } else if offset.abs() < c.exit_threshold {
            Direction::Center
        } else {
            self.direction
        }
    }
}

impl MotionDetector for LeanDetector {
    type Sample = PoseFrame;

    fn process_sample(&mut self, frame: &PoseFrame) -> DetectorOutput {
        let now = frame.timestamp_ms;
        if !is_monotonic(self.last_ms, now) {
            return DetectorOutput::Skipped;
        }
        self.last_ms = Some(now);

        let Some(body) = body_centers(frame, self.config.min_visibility) else {
            return DetectorOutput::Idle;
        };
        let mut raw = (body.nose.x - body.hip.x) / body.shoulder_width;
        if self.config.mirror {
            raw = -raw;
        }
        let offset = self.smoother.update(raw);

        let next = self.classify(offset);
        if next == self.direction {
            return DetectorOutput::Idle;
        }
        // held back, not dropped: the next frame re-evaluates
        if self
            .last_change_ms
            .is_some_and(|last| now.saturating_sub(last) < self.config.cooldown_ms)
        {
            return DetectorOutput::Idle;
        }

        debug!(from = ?self.direction, to = ?next, offset, "direction change");
        self.direction = next;
        self.last_change_ms = Some(now);
        DetectorOutput::Direction {
            event: DirectionEvent {
                direction: next,
                yaw_deg: offset.atan().to_degrees(),
                timestamp_ms: now,
            },
        }
    }

    fn state_name(&self) -> &'static str {
        match self.direction {
            Direction::Left => "left",
            Direction::Center => "center",
            Direction::Right => "right",
        }
    }

    fn is_calibrated(&self) -> bool {
        true
    }

    fn feedback(&self) -> Option<&'static str> {
        None
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

    fn directions(det: &mut LeanDetector, t: &mut u64, parts: &[(f64, usize)]) -> Vec<Direction> {
        let mut out = Vec::new();
        for &(lean, count) in parts {
            for _ in 0..count {
                let output = det.process_sample(&standing_frame(*t, 0.0, lean));
                if let DetectorOutput::Direction { event } = output {
                    out.push(event.direction);
                }
                *t += FRAME_MS;
            }
        }
        out
    }

    #[test]
    fn test_lean_right_center_left() {
        let mut det = LeanDetector::new(LeanConfig::default());
        let mut t = 0;
        let seen = directions(&mut det, &mut t, &[(0.1, 20), (0.0, 30), (-0.1, 20)]);
        assert_eq!(seen, vec![Direction::Right, Direction::Center, Direction::Left]);
        assert_eq!(det.direction(), Direction::Left);
        assert_eq!(det.state_name(), "left");
    }

    #[test]
    fn test_small_offsets_stay_centered() {
        let mut det = LeanDetector::new(LeanConfig::default());
        let mut t = 0;
        let seen = directions(&mut det, &mut t, &[(0.03, 40), (-0.03, 40)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_hysteresis_holds_direction() {
        let mut det = LeanDetector::new(LeanConfig::default());
        let mut t = 0;
        // 0.2 shoulder widths sits between the exit and enter thresholds
        let seen = directions(&mut det, &mut t, &[(0.1, 30), (0.04, 60)]);
        assert_eq!(seen, vec![Direction::Right]);
    }

    #[test]
    fn test_mirror_flips_direction() {
        let config = LeanConfig {
            mirror: true,
            ..LeanConfig::default()
        };
        let mut det = LeanDetector::new(config);
        let mut t = 0;
        let seen = directions(&mut det, &mut t, &[(0.1, 20)]);
        assert_eq!(seen, vec![Direction::Left]);
    }

    #[test]
    fn test_yaw_follows_offset_sign() {
        let mut det = LeanDetector::new(LeanConfig::default());
        let mut yaw = None;
        for i in 0..20 {
            let output = det.process_sample(&standing_frame(i * FRAME_MS, 0.0, -0.1));
            if let DetectorOutput::Direction { event } = output {
                yaw = Some(event.yaw_deg);
            }
        }
        let yaw = yaw.unwrap();
        assert!(yaw < -10.0 && yaw > -30.0);
    }
}
