//! Resting-baseline calibration
//!
//! A calibrator collects a fixed window of samples while the user holds
//! still. If every channel's variance stays under the ceiling the window
//! means become the baseline; otherwise the window is thrown away and
//! collection restarts. Calibration completes at most once.

use serde::{Deserialize, Serialize};

/// Progress report from a calibrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CalibrationStatus {
    Collecting { collected: usize, required: usize },
    /// The last window moved too much and was discarded
    Unstable,
    /// Reported once when calibration runs past its deadline
    TimedOut,
    Complete,
}

/// Per-channel statistics of an accepted calibration window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub samples: usize,
}

impl Baseline {
    /// Mean of the first channel
    pub fn mean(&self) -> f64 {
        self.means.first().copied().unwrap_or(0.0)
    }

    pub fn channel(&self, index: usize) -> f64 {
        self.means.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    required: usize,
    max_variance: f64,
    timeout_ms: u64,
    window: Vec<Vec<f64>>,
    started_ms: Option<u64>,
    timeout_reported: bool,
    baseline: Option<Baseline>,
}

impl Calibrator {
    pub fn new(required: usize, max_variance: f64, timeout_ms: u64) -> Self {
        let required = required.max(2);
        Self {
            required,
            max_variance,
            timeout_ms,
            window: Vec::with_capacity(required),
            started_ms: None,
            timeout_reported: false,
            baseline: None,
        }
    }

    /// Add one multi-channel sample.
    ///
    /// Samples whose channel count differs from the current window restart it.
    pub fn push(&mut self, channels: &[f64], timestamp_ms: u64) -> CalibrationStatus {
        if self.baseline.is_some() {
            return CalibrationStatus::Complete;
        }

        let started = *self.started_ms.get_or_insert(timestamp_ms);

        if self
            .window
            .first()
            .is_some_and(|first| first.len() != channels.len())
        {
            self.window.clear();
        }
        self.window.push(channels.to_vec());

        if self.window.len() >= self.required {
            let baseline = window_stats(&self.window);
            self.window.clear();
            if baseline.variances.iter().all(|v| *v <= self.max_variance) {
                self.baseline = Some(baseline);
                return CalibrationStatus::Complete;
            }
            return CalibrationStatus::Unstable;
        }

        if !self.timeout_reported && timestamp_ms.saturating_sub(started) > self.timeout_ms {
            self.timeout_reported = true;
            return CalibrationStatus::TimedOut;
        }

        CalibrationStatus::Collecting {
            collected: self.window.len(),
            required: self.required,
        }
    }

    /// Discard a partially collected window (e.g. the subject moved out of frame)
    pub fn restart_window(&mut self) {
        self.window.clear();
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn baseline_mut(&mut self) -> Option<&mut Baseline> {
        self.baseline.as_mut()
    }

    pub fn is_complete(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.started_ms = None;
        self.timeout_reported = false;
        self.baseline = None;
    }
}

/// Population mean and variance per channel
fn window_stats(window: &[Vec<f64>]) -> Baseline {
    let n = window.len() as f64;
    let channels = window.first().map(|s| s.len()).unwrap_or(0);

    let means: Vec<f64> = (0..channels)
        .map(|c| window.iter().map(|s| s[c]).sum::<f64>() / n)
        .collect();
    let variances: Vec<f64> = (0..channels)
        .map(|c| {
            window
                .iter()
                .map(|s| (s[c] - means[c]).powi(2))
                .sum::<f64>()
                / n
        })
        .collect();

    Baseline {
        means,
        variances,
        samples: window.len(),
    }
}
