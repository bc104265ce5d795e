//! Per-player repetition statistics
//!
//! Keeps rolling windows for live figures (rate, consistency, waveform) and
//! running totals for the end-of-game aggregates.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::scoring::Aggregates;

/// One point of the waveform history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    /// Milliseconds since the game started
    pub at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    pub quality: f64,
}

/// Running mean and variance (Welford)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population coefficient of variation; needs two values
    pub fn cv(&self) -> Option<f64> {
        if self.count < 2 || self.mean <= 0.0 {
            return None;
        }
        let variance = self.m2 / self.count as f64;
        Some(variance.max(0.0).sqrt() / self.mean)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepStats {
    /// Recent inter-event intervals (ms)
    intervals: VecDeque<f64>,
    history: VecDeque<HistoryPoint>,
    interval_window: usize,
    history_len: usize,
    last_event_ms: Option<u64>,
    last_amplitude: Option<f64>,
    all_intervals: RunningStats,
    amplitudes: RunningStats,
    forms: RunningStats,
    count: u64,
    combo: u32,
    max_combo: u32,
}

impl RepStats {
    pub fn new(interval_window: usize, history_len: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(interval_window),
            history: VecDeque::with_capacity(history_len),
            interval_window: interval_window.max(1),
            history_len,
            last_event_ms: None,
            last_amplitude: None,
            all_intervals: RunningStats::default(),
            amplitudes: RunningStats::default(),
            forms: RunningStats::default(),
            count: 0,
            combo: 0,
            max_combo: 0,
        }
    }

    /// Record an accepted event received at `at_ms`
    pub fn push(&mut self, at_ms: u64, amplitude: Option<f64>, form: Option<f64>) {
        if let Some(last) = self.last_event_ms {
            let interval = at_ms.saturating_sub(last) as f64;
            self.intervals.push_back(interval);
            while self.intervals.len() > self.interval_window {
                self.intervals.pop_front();
            }
            self.all_intervals.push(interval);
        }
        if let Some(a) = amplitude {
            self.amplitudes.push(a);
        }
        if let Some(f) = form {
            self.forms.push(f);
        }
        self.last_event_ms = Some(at_ms);
        self.last_amplitude = amplitude;
        self.count += 1;
    }

    /// Update the combo with the quality of the event just pushed
    pub fn record_quality(&mut self, quality: f64, combo_threshold: f64, at_ms: u64) {
        if quality >= combo_threshold {
            self.combo += 1;
            self.max_combo = self.max_combo.max(self.combo);
        } else {
            self.combo = 0;
        }
        if self.history_len == 0 {
            return;
        }
        self.history.push_back(HistoryPoint {
            at_ms,
            amplitude: self.last_amplitude,
            quality,
        });
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
    }

    /// Events per minute over the rolling window
    pub fn live_rate(&self) -> Option<f64> {
        let mean = Self::rolling_average(&self.intervals)?;
        (mean > 0.0).then(|| 60_000.0 / mean)
    }

    /// Coefficient of variation over the rolling window
    pub fn live_cv(&self) -> Option<f64> {
        if self.intervals.len() < 2 {
            return None;
        }
        let mut stats = RunningStats::default();
        self.intervals.iter().for_each(|i| stats.push(*i));
        stats.cv()
    }

    fn rolling_average(queue: &VecDeque<f64>) -> Option<f64> {
        if queue.is_empty() {
            return None;
        }
        let sum: f64 = queue.iter().sum();
        Some(sum / queue.len() as f64)
    }

    pub fn aggregates(&self) -> Aggregates {
        Aggregates {
            events: self.count,
            avg_rate: self
                .all_intervals
                .mean()
                .filter(|m| *m > 0.0)
                .map(|m| 60_000.0 / m),
            avg_amplitude: self.amplitudes.mean(),
            avg_form: self.forms.mean(),
            interval_cv: self.all_intervals.cv(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn combo(&self) -> u32 {
        self.combo
    }

    pub fn max_combo(&self) -> u32 {
        self.max_combo
    }

    pub fn last_event_ms(&self) -> Option<u64> {
        self.last_event_ms
    }

    pub fn last_amplitude(&self) -> Option<f64> {
        self.last_amplitude
    }

    pub fn history(&self) -> Vec<HistoryPoint> {
        self.history.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_live_rate_from_rolling_intervals() {
        let mut stats = RepStats::new(10, 30);
        assert_eq!(stats.live_rate(), None);
        for i in 0..5 {
            stats.push(i * 500, Some(5.0), Some(1.0));
        }
        assert!((stats.live_rate().unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(stats.live_cv(), Some(0.0));
    }

    #[test]
    fn test_rolling_window_is_bounded() {
        let mut stats = RepStats::new(3, 30);
        // two slow intervals, then three fast ones push them out
        for t in [0, 2_000, 4_000, 4_500, 5_000, 5_500] {
            stats.push(t, None, None);
        }
        assert!((stats.live_rate().unwrap() - 120.0).abs() < 1e-9);
        // overall average still sees every interval
        let avg = stats.aggregates().avg_rate.unwrap();
        assert!((avg - 60_000.0 / 1_100.0).abs() < 1e-9);
    }

    #[test]
    fn test_combo_tracking() {
        let mut stats = RepStats::new(10, 30);
        for (i, q) in [0.9, 0.8, 0.75, 0.3, 0.9].iter().enumerate() {
            stats.push(i as u64 * 500, Some(5.0), None);
            stats.record_quality(*q, 0.7, i as u64 * 500);
        }
        assert_eq!(stats.combo(), 1);
        assert_eq!(stats.max_combo(), 3);
    }

    #[test]
    fn test_history_bounded() {
        let mut stats = RepStats::new(10, 4);
        for i in 0..10u64 {
            stats.push(i * 600, Some(i as f64), Some(1.0));
            stats.record_quality(1.0, 0.7, i * 600);
        }
        let history = stats.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].amplitude, Some(6.0));
        assert_eq!(history[3].at_ms, 5_400);
    }

    #[test]
    fn test_aggregates() {
        let mut stats = RepStats::new(10, 30);
        stats.push(0, Some(4.0), Some(0.8));
        stats.push(600, Some(6.0), Some(1.0));
        stats.push(1_000, None, None);
        let agg = stats.aggregates();
        assert_eq!(agg.events, 3);
        assert!((agg.avg_amplitude.unwrap() - 5.0).abs() < 1e-12);
        assert!((agg.avg_form.unwrap() - 0.9).abs() < 1e-12);
        // intervals 600 and 400: mean 500, sd 100
        assert!((agg.interval_cv.unwrap() - 0.2).abs() < 1e-12);
        assert!((agg.avg_rate.unwrap() - 120.0).abs() < 1e-9);
    }
}
