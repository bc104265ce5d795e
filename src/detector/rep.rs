//! Repetition state machine shared by the pose detectors
//!
//! Works on a "depth" signal where larger means further into the movement
//! (elbow flexion for push-ups, hip drop for squats):
//!
//! ```text
//! Up --depth > enter--> GoingDown --depth > bottom--> Down
//! Down --depth < rise--> GoingUp --depth < finish--> Up (completed)
//! GoingDown --depth < abort--> Up (aborted, never reached the bottom)
//! GoingUp --depth > bottom--> Down (bounce)
//! ```
//!
//! Every edge is debounced.

use crate::filters::Debounce;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepThresholds {
    pub enter: f64,
    pub bottom: f64,
    pub rise: f64,
    pub finish: f64,
    pub abort: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepPhase {
    Up,
    GoingDown,
    Down,
    GoingUp,
}

impl RepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepPhase::Up => "up",
            RepPhase::GoingDown => "goingDown",
            RepPhase::Down => "down",
            RepPhase::GoingUp => "goingUp",
        }
    }
}

/// Time span and deepest point of one repetition attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepSpan {
    pub start_ms: u64,
    pub end_ms: u64,
    pub peak: f64,
}

impl RepSpan {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepStep {
    Continue,
    /// A new attempt began on this sample
    Started,
    Completed(RepSpan),
    Aborted(RepSpan),
    /// The attempt ran past the maximum duration
    Stale(RepSpan),
}

#[derive(Debug, Clone)]
pub struct RepCycle {
    thresholds: RepThresholds,
    max_ms: u64,
    phase: RepPhase,
    primary: Debounce,
    secondary: Debounce,
    start_ms: u64,
    peak: f64,
}

impl RepCycle {
    pub fn new(thresholds: RepThresholds, debounce_samples: u32, max_ms: u64) -> Self {
        Self {
            thresholds,
            max_ms,
            phase: RepPhase::Up,
            primary: Debounce::new(debounce_samples),
            secondary: Debounce::new(debounce_samples),
            start_ms: 0,
            peak: 0.0,
        }
    }

    pub fn phase(&self) -> RepPhase {
        self.phase
    }

    fn enter(&mut self, phase: RepPhase) {
        self.phase = phase;
        self.primary.reset();
        self.secondary.reset();
    }

    fn span(&self, now_ms: u64) -> RepSpan {
        RepSpan {
            start_ms: self.start_ms,
            end_ms: now_ms,
            peak: self.peak,
        }
    }

    pub fn update(&mut self, depth: f64, now_ms: u64) -> RepStep {
        let t = self.thresholds;

        if self.phase != RepPhase::Up && now_ms.saturating_sub(self.start_ms) > self.max_ms {
            self.enter(RepPhase::Up);
            return RepStep::Stale(self.span(now_ms));
        }
        if self.phase != RepPhase::Up {
            self.peak = self.peak.max(depth);
        }

        match self.phase {
            RepPhase::Up => {
                if self.primary.update(depth > t.enter, now_ms) {
                    self.start_ms = self.primary.run_start_ms();
                    self.peak = depth;
                    self.enter(RepPhase::GoingDown);
                    return RepStep::Started;
                }
            }
            RepPhase::GoingDown => {
                if self.primary.update(depth > t.bottom, now_ms) {
                    self.enter(RepPhase::Down);
                } else if self.secondary.update(depth < t.abort, now_ms) {
                    self.enter(RepPhase::Up);
                    return RepStep::Aborted(self.span(now_ms));
                }
            }
            RepPhase::Down => {
                if self.primary.update(depth < t.rise, now_ms) {
                    self.enter(RepPhase::GoingUp);
                }
            }
            RepPhase::GoingUp => {
                if self.primary.update(depth < t.finish, now_ms) {
                    self.enter(RepPhase::Up);
                    return RepStep::Completed(self.span(now_ms));
                } else if self.secondary.update(depth > t.bottom, now_ms) {
                    self.enter(RepPhase::Down);
                }
            }
        }
        RepStep::Continue
    }

    pub fn reset(&mut self) {
        self.enter(RepPhase::Up);
    }
}

/// Raises one signal when no subject has been seen for `timeout_ms`.
#[derive(Debug, Clone)]
pub struct SubjectWatch {
    timeout_ms: u64,
    last_seen_ms: Option<u64>,
    reported: bool,
}

impl SubjectWatch {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_seen_ms: None,
            reported: false,
        }
    }

    pub fn seen(&mut self, now_ms: u64) {
        self.last_seen_ms = Some(now_ms);
        self.reported = false;
    }

    /// True exactly once per absence longer than the timeout
    pub fn missing(&mut self, now_ms: u64) -> bool {
        let Some(last) = self.last_seen_ms else {
            return false;
        };
        if !self.reported && now_ms.saturating_sub(last) > self.timeout_ms {
            self.reported = true;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.last_seen_ms = None;
        self.reported = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle() -> RepCycle {
        RepCycle::new(
            RepThresholds {
                enter: 0.1,
                bottom: 0.5,
                rise: 0.4,
                finish: 0.1,
                abort: 0.05,
            },
            2,
            5_000,
        )
    }

    fn drive(cycle: &mut RepCycle, values: &[f64], t0: u64) -> Vec<RepStep> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| cycle.update(*v, t0 + i as u64 * 100))
            .filter(|s| *s != RepStep::Continue)
            .collect()
    }

    #[test]
    fn test_full_repetition_completes() {
        let mut c = cycle();
        let steps = drive(&mut c, &[0.0, 0.2, 0.3, 0.6, 0.7, 0.3, 0.2, 0.0, 0.0], 0);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], RepStep::Started);
        match steps[1] {
            RepStep::Completed(span) => {
                assert_eq!(span.start_ms, 100);
                assert_eq!(span.end_ms, 800);
                assert!((span.peak - 0.7).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(c.phase(), RepPhase::Up);
    }

    #[test]
    fn test_shallow_attempt_aborts() {
        let mut c = cycle();
        let steps = drive(&mut c, &[0.2, 0.3, 0.3, 0.0, 0.0], 0);
        assert!(matches!(steps.last(), Some(RepStep::Aborted(_))));
    }

    #[test]
    fn test_stale_attempt_resets() {
        let mut c = cycle();
        let mut values = vec![0.2, 0.3];
        values.extend(std::iter::repeat(0.3).take(60));
        let steps = drive(&mut c, &values, 0);
        assert!(steps.iter().any(|s| matches!(s, RepStep::Stale(_))));
    }

    #[test]
    fn test_subject_watch_fires_once() {
        let mut watch = SubjectWatch::new(1_000);
        assert!(!watch.missing(10_000));
        watch.seen(0);
        assert!(!watch.missing(900));
        assert!(watch.missing(1_100));
        assert!(!watch.missing(5_000));
        watch.seen(6_000);
        assert!(watch.missing(7_500));
    }
}
