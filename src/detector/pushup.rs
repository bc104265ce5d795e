//! Push-up detector (side-view pose landmarks)
//!
//! Tracks the elbow angle (shoulder-elbow-wrist) of the better-visible side.
//! The repetition machine runs on elbow flexion (`180 - angle`), so the
//! angle thresholds map as `flexion > 180 - start_down_angle` and so on.
//! Body alignment (shoulder-hip-ankle) is checked over the whole rep.

use tracing::debug;

use super::geometry::best_side;
use super::rep::{RepCycle, RepPhase, RepSpan, RepStep, RepThresholds, SubjectWatch};
use super::{is_monotonic, DetectorOutput, MotionDetector};
use crate::calibration::{Baseline, CalibrationStatus, Calibrator};
use crate::config::PushUpConfig;
use crate::filters::Ema;
use crate::types::{MotionEvent, MotionKind, MotionQuality, PoseFrame, RejectReason};

/// Alignment deviation at which form quality reaches zero
const FORM_ZERO_DEVIATION_DEG: f64 = 45.0;

#[derive(Debug, Clone)]
pub struct PushUpDetector {
    config: PushUpConfig,
    calibrator: Calibrator,
    smoother: Ema,
    cycle: RepCycle,
    watch: SubjectWatch,
    max_deviation: f64,
    last_ms: Option<u64>,
    last_accepted_end_ms: Option<u64>,
    sequence: u64,
    feedback: Option<&'static str>,
}

impl PushUpDetector {
    pub fn new(config: PushUpConfig) -> Self {
        let thresholds = RepThresholds {
            enter: 180.0 - config.start_down_angle,
            bottom: 180.0 - config.down_confirm_angle,
            rise: 180.0 - config.up_start_angle,
            finish: 180.0 - config.up_confirm_angle,
            abort: 180.0 - config.abort_angle,
        };
        Self {
            calibrator: Calibrator::new(
                config.calibration_samples,
                config.calibration_max_variance,
                config.calibration_timeout_ms,
            ),
            smoother: Ema::new(config.smoothing_alpha),
            cycle: RepCycle::new(thresholds, config.debounce_samples, config.max_rep_ms),
            watch: SubjectWatch::new(config.no_subject_timeout_ms),
            max_deviation: 0.0,
            last_ms: None,
            last_accepted_end_ms: None,
            sequence: 0,
            feedback: None,
            config,
        }
    }

    /// Plank-position baseline: shoulder, hip and ankle heights
    pub fn baseline(&self) -> Option<&Baseline> {
        self.calibrator.baseline()
    }

    pub fn count(&self) -> u64 {
        self.sequence
    }

    fn reject(&mut self, reason: RejectReason, duration_ms: u64) -> DetectorOutput {
        debug!(?reason, duration_ms, "push-up rejected");
        self.feedback = Some(reason.feedback(MotionKind::PushUp));
        DetectorOutput::Rejected {
            reason,
            duration_ms,
        }
    }

    fn finish(&mut self, span: RepSpan) -> DetectorOutput {
        let c = &self.config;
        let duration_ms = span.duration_ms();

        let reason = if duration_ms < c.min_rep_ms {
            Some(RejectReason::TooFast)
        } else if duration_ms > c.max_rep_ms {
            Some(RejectReason::TooSlow)
        } else if self.max_deviation > c.max_alignment_deviation_deg {
            Some(RejectReason::PoorForm)
        } else if self
            .last_accepted_end_ms
            .is_some_and(|last| span.end_ms.saturating_sub(last) < c.cooldown_ms)
        {
            Some(RejectReason::RateLimited)
        } else {
            None
        };
        if let Some(reason) = reason {
            return self.reject(reason, duration_ms);
        }

        let min_angle = 180.0 - span.peak;
        self.last_accepted_end_ms = Some(span.end_ms);
        self.sequence += 1;
        self.feedback = None;

        DetectorOutput::Event {
            event: MotionEvent {
                kind: MotionKind::PushUp,
                sequence: self.sequence,
                started_ms: span.start_ms,
                timestamp_ms: span.end_ms,
                duration_ms,
                quality: MotionQuality {
                    amplitude: span.peak,
                    form: (1.0 - self.max_deviation / FORM_ZERO_DEVIATION_DEG).clamp(0.0, 1.0),
                    angle_deg: Some(min_angle),
                    beat_offset_ms: None,
                },
            },
        }
    }
}

impl MotionDetector for PushUpDetector {
    type Sample = PoseFrame;

    fn process_sample(&mut self, frame: &PoseFrame) -> DetectorOutput {
        let now = frame.timestamp_ms;
        if !is_monotonic(self.last_ms, now) {
            return DetectorOutput::Skipped;
        }
        self.last_ms = Some(now);

        let side = best_side(frame, self.config.min_visibility);
        let (side, elbow) = match side.and_then(|s| s.elbow_angle().map(|a| (s, a))) {
            Some(found) => found,
            None => {
                if !self.calibrator.is_complete() {
                    self.calibrator.restart_window();
                    return DetectorOutput::Idle;
                }
                if self.watch.missing(now) {
                    self.cycle.reset();
                    self.feedback = Some("Step back into view");
                    return DetectorOutput::SubjectLost;
                }
                return DetectorOutput::Idle;
            }
        };
        self.watch.seen(now);
        let smoothed = self.smoother.update(elbow);

        if !self.calibrator.is_complete() {
            if elbow < self.config.start_down_angle {
                self.calibrator.restart_window();
                return DetectorOutput::Calibration {
                    status: CalibrationStatus::Collecting {
                        collected: 0,
                        required: self.config.calibration_samples,
                    },
                };
            }
            let status = self
                .calibrator
                .push(&[side.shoulder.y, side.hip.y, side.ankle.y], now);
            return DetectorOutput::Calibration { status };
        }

        let deviation = side.body_deviation().unwrap_or(0.0);
        let step = self.cycle.update(180.0 - smoothed, now);
        match step {
            RepStep::Continue => {
                if self.cycle.phase() != RepPhase::Up {
                    self.max_deviation = self.max_deviation.max(deviation);
                }
                DetectorOutput::Idle
            }
            RepStep::Started => {
                self.max_deviation = deviation;
                DetectorOutput::Idle
            }
            RepStep::Completed(span) => {
                self.max_deviation = self.max_deviation.max(deviation);
                self.finish(span)
            }
            RepStep::Aborted(span) => self.reject(RejectReason::TooShallow, span.duration_ms()),
            RepStep::Stale(span) => self.reject(RejectReason::TooSlow, span.duration_ms()),
        }
    }

    fn state_name(&self) -> &'static str {
        self.cycle.phase().as_str()
    }

    fn is_calibrated(&self) -> bool {
        self.calibrator.is_complete()
    }

    fn feedback(&self) -> Option<&'static str> {
        if !self.calibrator.is_complete() {
            return Some("Hold a plank with straight arms");
        }
        self.feedback
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use crate::detector::geometry::fixtures::pushup_frame;
    use super::*;
    use pretty_assertions::assert_eq;

    const FRAME_MS: u64 = 33;

    fn calibrated() -> (PushUpDetector, u64) {
        let mut det = PushUpDetector::new(PushUpConfig::default());
        let mut t = 1000;
        for _ in 0..30 {
            det.process_sample(&pushup_frame(t, 170.0, 0.0));
            t += FRAME_MS;
        }
        assert!(det.is_calibrated());
        (det, t)
    }

    /// Segments of (elbow angle, hip sag, frame count)
    fn feed(
        det: &mut PushUpDetector,
        t: &mut u64,
        parts: &[(f64, f64, usize)],
    ) -> Vec<DetectorOutput> {
        let mut outputs = Vec::new();
        for &(angle, sag, count) in parts {
            for _ in 0..count {
                outputs.push(det.process_sample(&pushup_frame(*t, angle, sag)));
                *t += FRAME_MS;
            }
        }
        outputs
    }

    fn events(outputs: &[DetectorOutput]) -> Vec<MotionEvent> {
        outputs.iter().filter_map(|o| o.event().cloned()).collect()
    }

    fn rejections(outputs: &[DetectorOutput]) -> Vec<RejectReason> {
        outputs
            .iter()
            .filter_map(|o| match o {
                DetectorOutput::Rejected { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_pushup_counted() {
        let (mut det, mut t) = calibrated();
        let outputs = feed(&mut det, &mut t, &[(80.0, 0.0, 25), (170.0, 0.0, 20)]);
        let events = events(&outputs);
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.kind, MotionKind::PushUp);
        assert_eq!(event.started_ms, 1990);
        assert_eq!(event.timestamp_ms, 2980);
        assert_eq!(event.duration_ms, 990);
        assert!((event.quality.amplitude - 100.0).abs() < 0.5);
        assert!(event.quality.form > 0.95);
        assert!((event.quality.angle_deg.unwrap() - 80.0).abs() < 0.5);
    }

    #[test]
    fn test_two_pushups_in_a_row() {
        let (mut det, mut t) = calibrated();
        let rep = [(80.0, 0.0, 25), (170.0, 0.0, 20)];
        let mut outputs = feed(&mut det, &mut t, &rep);
        outputs.extend(feed(&mut det, &mut t, &rep));
        let sequences: Vec<u64> = events(&outputs).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_partial_pushup_rejected_as_shallow() {
        let (mut det, mut t) = calibrated();
        let outputs = feed(&mut det, &mut t, &[(125.0, 0.0, 15), (170.0, 0.0, 20)]);
        assert!(events(&outputs).is_empty());
        assert_eq!(rejections(&outputs), vec![RejectReason::TooShallow]);
        assert_eq!(det.feedback(), Some("Go lower"));
    }

    #[test]
    fn test_bouncing_pushup_rejected_as_too_fast() {
        let (mut det, mut t) = calibrated();
        let outputs = feed(&mut det, &mut t, &[(80.0, 0.0, 6), (170.0, 0.0, 20)]);
        assert_eq!(rejections(&outputs), vec![RejectReason::TooFast]);
    }

    #[test]
    fn test_sagging_hips_rejected_as_poor_form() {
        let (mut det, mut t) = calibrated();
        let outputs = feed(&mut det, &mut t, &[(80.0, 0.15, 25), (170.0, 0.0, 20)]);
        assert!(events(&outputs).is_empty());
        assert_eq!(rejections(&outputs), vec![RejectReason::PoorForm]);
    }

    #[test]
    fn test_calibration_waits_for_straight_arms() {
        let mut det = PushUpDetector::new(PushUpConfig::default());
        let mut t = 0;
        for _ in 0..40 {
            det.process_sample(&pushup_frame(t, 120.0, 0.0));
            t += FRAME_MS;
        }
        assert!(!det.is_calibrated());
        assert_eq!(det.feedback(), Some("Hold a plank with straight arms"));
    }

    #[test]
    fn test_subject_lost_reported_once() {
        let (mut det, mut t) = calibrated();
        let mut lost = 0;
        for _ in 0..200 {
            if det.process_sample(&PoseFrame::empty(t)) == DetectorOutput::SubjectLost {
                lost += 1;
            }
            t += FRAME_MS;
        }
        assert_eq!(lost, 1);
    }
}
