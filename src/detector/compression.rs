//! Chest-compression detector (phone accelerometer, Z axis)
//!
//! Signal chain per sample:
//!
//! ```text
//! raw z -> high-pass (gravity removal) -> low-pass EMA -> minus baseline -> a
//! ```
//!
//! A compression cycle is `Idle -> Pressing -> Releasing -> Idle`, each edge
//! requiring the threshold condition for `debounce_samples` consecutive
//! samples. Depth comes from double-integrating `a` over the cycle.

use tracing::debug;

use super::{is_monotonic, step_secs, DetectorOutput, MotionDetector};
use crate::calibration::Calibrator;
use crate::config::CompressionConfig;
use crate::filters::{Debounce, DriftIntegrator, Ema, HighPass};
use crate::types::{AccelSample, MotionEvent, MotionKind, MotionQuality, RejectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionState {
    Idle,
    Pressing,
    Releasing,
}

impl CompressionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionState::Idle => "idle",
            CompressionState::Pressing => "pressing",
            CompressionState::Releasing => "releasing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionDetector {
    config: CompressionConfig,
    high_pass: HighPass,
    smoother: Ema,
    calibrator: Calibrator,
    baseline: f64,
    state: CompressionState,
    debounce: Debounce,
    /// Samples of the current press run, integrated once the press is confirmed
    pending: Vec<(f64, f64)>,
    integrator: DriftIntegrator,
    cycle_start_ms: u64,
    depth_m: f64,
    peak_m: f64,
    release_min_m: f64,
    last_ms: Option<u64>,
    last_accepted_start_ms: Option<u64>,
    sequence: u64,
    feedback: Option<&'static str>,
}

impl CompressionDetector {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            high_pass: HighPass::new(config.hp_alpha),
            smoother: Ema::new(config.lp_alpha),
            calibrator: Calibrator::new(
                config.calibration_samples,
                config.calibration_max_variance,
                config.calibration_timeout_ms,
            ),
            baseline: 0.0,
            state: CompressionState::Idle,
            debounce: Debounce::new(config.debounce_samples),
            pending: Vec::new(),
            integrator: DriftIntegrator::new(config.integration_decay),
            cycle_start_ms: 0,
            depth_m: 0.0,
            peak_m: 0.0,
            release_min_m: 0.0,
            last_ms: None,
            last_accepted_start_ms: None,
            sequence: 0,
            feedback: None,
            config,
        }
    }

    pub fn state(&self) -> CompressionState {
        self.state
    }

    pub fn baseline(&self) -> Option<f64> {
        self.calibrator.is_complete().then_some(self.baseline)
    }

    /// Accepted compressions so far
    pub fn count(&self) -> u64 {
        self.sequence
    }

    fn integrate(&mut self, a: f64, dt: f64) {
        let d = self.integrator.step(a, dt);
        self.depth_m = self.depth_m.max(-d);
    }

    fn abandon(&mut self) {
        self.state = CompressionState::Idle;
        self.debounce.reset();
        self.pending.clear();
    }

    fn finish_cycle(&mut self, now_ms: u64) -> DetectorOutput {
        self.abandon();

        let c = &self.config;
        let duration_ms = now_ms.saturating_sub(self.cycle_start_ms);
        let depth_cm = (self.peak_m * 100.0 * c.depth_scale).min(c.max_depth_cm);
        let recoil = if self.peak_m > 0.0 {
            ((self.peak_m - self.release_min_m) / self.peak_m).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let rejection = if duration_ms < c.min_cycle_ms {
            Some(RejectReason::TooFast)
        } else if duration_ms > c.max_cycle_ms {
            Some(RejectReason::TooSlow)
        } else if depth_cm < c.min_depth_cm {
            Some(RejectReason::TooShallow)
        } else if self
            .last_accepted_start_ms
            .is_some_and(|last| self.cycle_start_ms.saturating_sub(last) < c.min_interval_ms)
        {
            Some(RejectReason::RateLimited)
        } else {
            None
        };

        if let Some(reason) = rejection {
            debug!(?reason, duration_ms, depth_cm, "compression rejected");
            self.feedback = Some(reason.feedback(MotionKind::Compression));
            return DetectorOutput::Rejected {
                reason,
                duration_ms,
            };
        }

        self.last_accepted_start_ms = Some(self.cycle_start_ms);
        self.sequence += 1;
        self.feedback = None;

        DetectorOutput::Event {
            event: MotionEvent {
                kind: MotionKind::Compression,
                sequence: self.sequence,
                started_ms: self.cycle_start_ms,
                timestamp_ms: now_ms,
                duration_ms,
                quality: MotionQuality {
                    amplitude: depth_cm,
                    form: recoil,
                    angle_deg: None,
                    beat_offset_ms: None,
                },
            },
        }
    }
}

impl MotionDetector for CompressionDetector {
    type Sample = AccelSample;

    fn process_sample(&mut self, sample: &AccelSample) -> DetectorOutput {
        let now = sample.timestamp_ms;
        if !sample.is_finite() || !is_monotonic(self.last_ms, now) {
            return DetectorOutput::Skipped;
        }
        let dt = step_secs(self.last_ms, now);
        self.last_ms = Some(now);

        let hp = if sample.linear {
            sample.z
        } else {
            self.high_pass.update(sample.z)
        };
        let smoothed = self.smoother.update(hp);

        if !self.calibrator.is_complete() {
            let status = self.calibrator.push(&[smoothed], now);
            if let Some(baseline) = self.calibrator.baseline() {
                self.baseline = baseline.mean();
            }
            return DetectorOutput::Calibration { status };
        }

        let a = smoothed - self.baseline;
        let press_threshold = self.config.press_threshold;
        let release_threshold = self.config.release_threshold;
        let settle_band = self.config.settle_band;

        if self.state != CompressionState::Idle
            && now.saturating_sub(self.cycle_start_ms) > self.config.max_cycle_ms
        {
            let duration_ms = now - self.cycle_start_ms;
            self.abandon();
            self.feedback = Some(RejectReason::TooSlow.feedback(MotionKind::Compression));
            debug!(duration_ms, "compression abandoned");
            return DetectorOutput::Rejected {
                reason: RejectReason::TooSlow,
                duration_ms,
            };
        }

        match self.state {
            CompressionState::Idle => {
                let pressing = a < press_threshold;
                let confirmed = self.debounce.update(pressing, now);
                if pressing {
                    if self.debounce.run() == 1 {
                        self.pending.clear();
                    }
                    self.pending.push((a, dt));
                } else if a.abs() < settle_band {
                    self.baseline += self.config.drift_alpha * (smoothed - self.baseline);
                }

                if confirmed {
                    self.state = CompressionState::Pressing;
                    self.cycle_start_ms = self.debounce.run_start_ms();
                    self.debounce.reset();
                    self.integrator.reset();
                    self.depth_m = 0.0;
                    let pending = std::mem::take(&mut self.pending);
                    for (pa, pdt) in pending {
                        self.integrate(pa, pdt);
                    }
                }
                DetectorOutput::Idle
            }
            CompressionState::Pressing => {
                self.integrate(a, dt);
                if self.debounce.update(a > release_threshold, now) {
                    self.state = CompressionState::Releasing;
                    self.debounce.reset();
                    self.peak_m = self.depth_m;
                    self.release_min_m = self.depth_m;
                }
                DetectorOutput::Idle
            }
            CompressionState::Releasing => {
                self.integrate(a, dt);
                let current = (-self.integrator.displacement()).max(0.0);
                self.release_min_m = self.release_min_m.min(current);
                if self.debounce.update(a.abs() < settle_band, now) {
                    return self.finish_cycle(now);
                }
                DetectorOutput::Idle
            }
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.as_str()
    }

    fn is_calibrated(&self) -> bool {
        self.calibrator.is_complete()
    }

    fn feedback(&self) -> Option<&'static str> {
        if !self.calibrator.is_complete() {
            return Some("Hold the phone still");
        }
        self.feedback
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
