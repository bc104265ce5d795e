//! Squat detector for the rhythm games (front or side pose landmarks)
//!
//! Depth is the hip drop below the calibrated standing height, as a fraction
//! of the standing hip-to-ankle distance. Torso lean from vertical is the
//! form check. With a beat clock configured, each accepted squat carries its
//! signed offset from the nearest beat.

use tracing::debug;

use super::geometry::{body_centers, lean_from_vertical_deg};
use super::rep::{RepCycle, RepPhase, RepSpan, RepStep, RepThresholds, SubjectWatch};
use super::{is_monotonic, DetectorOutput, MotionDetector};
use crate::calibration::Calibrator;
use crate::config::SquatConfig;
use crate::filters::Ema;
use crate::types::{landmarks, MotionEvent, MotionKind, MotionQuality, PoseFrame, RejectReason};

const FORM_ZERO_LEAN_DEG: f64 = 60.0;
const MIN_LEG_LENGTH: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct SquatDetector {
    config: SquatConfig,
    calibrator: Calibrator,
    smoother: Ema,
    cycle: RepCycle,
    watch: SubjectWatch,
    max_lean: f64,
    min_knee: Option<f64>,
    last_ms: Option<u64>,
    last_accepted_end_ms: Option<u64>,
    sequence: u64,
    feedback: Option<&'static str>,
}

impl SquatDetector {
    pub fn new(config: SquatConfig) -> Self {
        let thresholds = RepThresholds {
            enter: config.start_down_ratio,
            bottom: config.down_confirm_ratio,
            rise: config.up_start_ratio,
            finish: config.up_confirm_ratio,
            abort: config.up_confirm_ratio,
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
            max_lean: 0.0,
            min_knee: None,
            last_ms: None,
            last_accepted_end_ms: None,
            sequence: 0,
            feedback: None,
            config,
        }
    }

    pub fn count(&self) -> u64 {
        self.sequence
    }

    /// Signed distance from `timestamp_ms` to the nearest beat
    pub fn beat_offset_ms(&self, timestamp_ms: u64) -> Option<i64> {
        let period = self.config.beat_period_ms.filter(|p| *p > 0)? as i64;
        let since_origin = timestamp_ms as i64 - self.config.beat_origin_ms as i64;
        let phase = since_origin.rem_euclid(period);
        Some(if phase * 2 > period { phase - period } else { phase })
    }

    fn reject(&mut self, reason: RejectReason, duration_ms: u64) -> DetectorOutput {
        debug!(?reason, duration_ms, "squat rejected");
        self.feedback = Some(reason.feedback(MotionKind::Squat));
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
        } else if self.max_lean > c.max_torso_lean_deg {
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

        self.last_accepted_end_ms = Some(span.end_ms);
        self.sequence += 1;
        self.feedback = None;

        DetectorOutput::Event {
            event: MotionEvent {
                kind: MotionKind::Squat,
                sequence: self.sequence,
                started_ms: span.start_ms,
                timestamp_ms: span.end_ms,
                duration_ms,
                quality: MotionQuality {
                    amplitude: span.peak,
                    form: (1.0 - self.max_lean / FORM_ZERO_LEAN_DEG).clamp(0.0, 1.0),
                    angle_deg: self.min_knee,
                    beat_offset_ms: self.beat_offset_ms(span.end_ms),
                },
            },
        }
    }

    fn knee_angle(frame: &PoseFrame, min_visibility: f64) -> Option<f64> {
        let hip = frame.visible(landmarks::LEFT_HIP, min_visibility)?;
        let knee = frame.visible(landmarks::LEFT_KNEE, min_visibility)?;
        let ankle = frame.visible(landmarks::LEFT_ANKLE, min_visibility)?;
        super::geometry::angle_deg(&hip, &knee, &ankle)
    }
}

impl MotionDetector for SquatDetector {
    type Sample = PoseFrame;

    fn process_sample(&mut self, frame: &PoseFrame) -> DetectorOutput {
        let now = frame.timestamp_ms;
        if !is_monotonic(self.last_ms, now) {
            return DetectorOutput::Skipped;
        }
        self.last_ms = Some(now);

        let Some(body) = body_centers(frame, self.config.min_visibility) else {
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
        };
        self.watch.seen(now);

        let Some(baseline) = self.calibrator.baseline().cloned() else {
            let Some(ankle) = body.ankle else {
                self.calibrator.restart_window();
                return DetectorOutput::Idle;
            };
            let status = self
                .calibrator
                .push(&[body.hip.y, ankle.y, body.shoulder.y], now);
            if self.calibrator.is_complete() {
                // depth starts from the calibrated standing position
                self.smoother.update(0.0);
            }
            return DetectorOutput::Calibration { status };
        };

        let base_hip = baseline.channel(0);
        let leg = (baseline.channel(1) - base_hip).max(MIN_LEG_LENGTH);
        let depth = self.smoother.update((body.hip.y - base_hip) / leg);
        let lean = lean_from_vertical_deg(&body.shoulder, &body.hip);
        let knee = Self::knee_angle(frame, self.config.min_visibility);

        match self.cycle.update(depth, now) {
            RepStep::Continue => {
                if self.cycle.phase() != RepPhase::Up {
                    self.max_lean = self.max_lean.max(lean);
                    self.min_knee = match (self.min_knee, knee) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                DetectorOutput::Idle
            }
            RepStep::Started => {
                self.max_lean = lean;
                self.min_knee = knee;
                DetectorOutput::Idle
            }
            RepStep::Completed(span) => self.finish(span),
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
            return Some("Stand still, full body in view");
        }
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

    fn calibrated(config: SquatConfig) -> (SquatDetector, u64) {
        let mut det = SquatDetector::new(config);
        let mut t = 1000;
        for _ in 0..30 {
            det.process_sample(&standing_frame(t, 0.0, 0.0));
            t += FRAME_MS;
        }
        assert!(det.is_calibrated());
        (det, t)
    }

    /// Segments of (hip drop, torso shift, frame count)
    fn feed(
        det: &mut SquatDetector,
        t: &mut u64,
        parts: &[(f64, f64, usize)],
    ) -> Vec<DetectorOutput> {
        let mut outputs = Vec::new();
        for &(drop, lean, count) in parts {
            for _ in 0..count {
                outputs.push(det.process_sample(&standing_frame(*t, drop, lean)));
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

    const SQUAT: [(f64, f64, usize); 2] = [(0.4, 0.0, 15), (0.0, 0.0, 15)];

    #[test]
    fn test_full_squat_counted() {
        let (mut det, mut t) = calibrated(SquatConfig::default());
        let outputs = feed(&mut det, &mut t, &SQUAT);
        let events = events(&outputs);
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.kind, MotionKind::Squat);
        assert_eq!(event.started_ms, 1990);
        assert_eq!(event.timestamp_ms, 2650);
        assert!((event.quality.amplitude - 0.4).abs() < 0.01);
        assert!(event.quality.form > 0.99);
        assert_eq!(event.quality.beat_offset_ms, None);
    }

    #[test]
    fn test_consecutive_squats() {
        let (mut det, mut t) = calibrated(SquatConfig::default());
        let mut outputs = feed(&mut det, &mut t, &SQUAT);
        outputs.extend(feed(&mut det, &mut t, &SQUAT));
        let ends: Vec<u64> = events(&outputs).iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(ends, vec![2650, 3640]);
    }

    #[test]
    fn test_half_squat_rejected() {
        let (mut det, mut t) = calibrated(SquatConfig::default());
        let outputs = feed(&mut det, &mut t, &[(0.15, 0.0, 10), (0.0, 0.0, 10)]);
        assert!(events(&outputs).is_empty());
        assert_eq!(rejections(&outputs), vec![RejectReason::TooShallow]);
    }

    #[test]
    fn test_leaning_torso_rejected() {
        let (mut det, mut t) = calibrated(SquatConfig::default());
        let outputs = feed(&mut det, &mut t, &[(0.4, 0.4, 15), (0.0, 0.0, 15)]);
        assert_eq!(rejections(&outputs), vec![RejectReason::PoorForm]);
        assert_eq!(det.feedback(), Some("Keep your chest up"));
    }

    #[test]
    fn test_beat_offset_attached() {
        let config = SquatConfig {
            beat_period_ms: Some(500),
            beat_origin_ms: 0,
            ..SquatConfig::default()
        };
        let (mut det, mut t) = calibrated(config);
        let outputs = feed(&mut det, &mut t, &SQUAT);
        let events = events(&outputs);
        assert_eq!(events[0].quality.beat_offset_ms, Some(150));
    }

    #[test]
    fn test_beat_offset_is_signed() {
        let det = SquatDetector::new(SquatConfig {
            beat_period_ms: Some(500),
            beat_origin_ms: 100,
            ..SquatConfig::default()
        });
        assert_eq!(det.beat_offset_ms(590), Some(-10));
        assert_eq!(det.beat_offset_ms(650), Some(50));
        assert_eq!(det.beat_offset_ms(50), Some(-50));
    }

    #[test]
    fn test_subject_lost_after_timeout() {
        let (mut det, mut t) = calibrated(SquatConfig::default());
        let mut outputs = Vec::new();
        for _ in 0..200 {
            outputs.push(det.process_sample(&PoseFrame::empty(t)));
            t += FRAME_MS;
        }
        assert_eq!(
            outputs.iter().filter(|o| **o == DetectorOutput::SubjectLost).count(),
            1
        );
    }
}
