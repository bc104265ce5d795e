//! Configuration for detectors, scoring and session timing
//!
//! One `PartyConfig` is shared by the device-side detectors and the server.
//! The server uses the same thresholds to re-check what controllers report.

use serde::{Deserialize, Serialize};

use crate::error::PartyError;
use crate::types::GameMode;

/// Accelerometer compression detector thresholds (units: m/s², ms, cm)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Gravity tracker weight on the previous estimate
    pub hp_alpha: f64,
    /// Low-pass weight on the new sample
    pub lp_alpha: f64,
    /// Idle baseline tracking rate
    pub drift_alpha: f64,
    pub calibration_samples: usize,
    pub calibration_max_variance: f64,
    pub calibration_timeout_ms: u64,
    pub press_threshold: f64,
    pub release_threshold: f64,
    pub settle_band: f64,
    pub debounce_samples: u32,
    /// Velocity/displacement decay per 20 ms step
    pub integration_decay: f64,
    pub depth_scale: f64,
    pub max_depth_cm: f64,
    pub min_depth_cm: f64,
    pub min_cycle_ms: u64,
    pub max_cycle_ms: u64,
    /// Minimum start-to-start spacing between accepted compressions
    pub min_interval_ms: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            hp_alpha: 0.8,
            lp_alpha: 0.3,
            drift_alpha: 0.01,
            calibration_samples: 30,
            calibration_max_variance: 0.25,
            calibration_timeout_ms: 10_000,
            press_threshold: -3.0,
            release_threshold: 2.0,
            settle_band: 1.0,
            debounce_samples: 3,
            integration_decay: 0.95,
            depth_scale: 1.0,
            max_depth_cm: 15.0,
            min_depth_cm: 2.0,
            min_cycle_ms: 150,
            max_cycle_ms: 8_000,
            min_interval_ms: 300,
        }
    }
}

/// Push-up detector thresholds (elbow angles in degrees)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushUpConfig {
    pub smoothing_alpha: f64,
    pub min_visibility: f64,
    pub start_down_angle: f64,
    pub down_confirm_angle: f64,
    pub up_start_angle: f64,
    pub up_confirm_angle: f64,
    /// Returning above this before reaching the bottom aborts the rep
    pub abort_angle: f64,
    pub debounce_samples: u32,
    pub min_rep_ms: u64,
    pub max_rep_ms: u64,
    pub max_alignment_deviation_deg: f64,
    pub cooldown_ms: u64,
    pub calibration_samples: usize,
    pub calibration_max_variance: f64,
    pub calibration_timeout_ms: u64,
    pub no_subject_timeout_ms: u64,
}

impl Default for PushUpConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.4,
            min_visibility: 0.5,
            start_down_angle: 150.0,
            down_confirm_angle: 100.0,
            up_start_angle: 110.0,
            up_confirm_angle: 155.0,
            abort_angle: 160.0,
            debounce_samples: 3,
            min_rep_ms: 800,
            max_rep_ms: 8_000,
            max_alignment_deviation_deg: 35.0,
            cooldown_ms: 500,
            calibration_samples: 30,
            calibration_max_variance: 0.0004,
            calibration_timeout_ms: 10_000,
            no_subject_timeout_ms: 5_000,
        }
    }
}

/// Squat detector thresholds (hip drop as a fraction of leg length)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquatConfig {
    pub smoothing_alpha: f64,
    pub min_visibility: f64,
    pub start_down_ratio: f64,
    pub down_confirm_ratio: f64,
    pub up_start_ratio: f64,
    pub up_confirm_ratio: f64,
    pub debounce_samples: u32,
    pub min_rep_ms: u64,
    pub max_rep_ms: u64,
    pub max_torso_lean_deg: f64,
    pub cooldown_ms: u64,
    pub calibration_samples: usize,
    pub calibration_max_variance: f64,
    pub calibration_timeout_ms: u64,
    pub no_subject_timeout_ms: u64,
    /// Music beat period for rhythm games; offsets are reported when set
    pub beat_period_ms: Option<u64>,
    pub beat_origin_ms: u64,
}

impl Default for SquatConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.5,
            min_visibility: 0.5,
            start_down_ratio: 0.08,
            down_confirm_ratio: 0.25,
            up_start_ratio: 0.20,
            up_confirm_ratio: 0.08,
            debounce_samples: 3,
            min_rep_ms: 600,
            max_rep_ms: 8_000,
            max_torso_lean_deg: 50.0,
            cooldown_ms: 400,
            calibration_samples: 30,
            calibration_max_variance: 0.0004,
            calibration_timeout_ms: 10_000,
            no_subject_timeout_ms: 5_000,
            beat_period_ms: None,
            beat_origin_ms: 0,
        }
    }
}

/// Lean / pointing sub-detector (offsets in shoulder widths)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeanConfig {
    pub smoothing_alpha: f64,
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub cooldown_ms: u64,
    /// Flip left/right for front-facing cameras
    pub mirror: bool,
    pub min_visibility: f64,
}

impl Default for LeanConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.15,
            enter_threshold: 0.25,
            exit_threshold: 0.12,
            cooldown_ms: 300,
            mirror: false,
            min_visibility: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub min_visibility: f64,
    pub debounce_samples: u32,
    pub cooldown_ms: u64,
    /// Lateral wrist reach beyond the shoulder, in shoulder widths
    pub lateral_reach: f64,
    pub mirror: bool,
    pub no_subject_timeout_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            min_visibility: 0.5,
            debounce_samples: 3,
            cooldown_ms: 400,
            lateral_reach: 0.8,
            mirror: false,
            no_subject_timeout_ms: 5_000,
        }
    }
}

/// Target band for one scored dimension.
///
/// Values inside `[low, high]` score near 1; outside, the score falls off
/// quadratically and reaches 0 at `cutoff` beyond the nearer edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
    pub cutoff: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64, cutoff: f64) -> Self {
        Self { low, high, cutoff }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub rate: f64,
    pub amplitude: f64,
    pub form: f64,
    pub consistency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            rate: 0.35,
            amplitude: 0.35,
            form: 0.15,
            consistency: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.rate + self.amplitude + self.form + self.consistency
    }
}

/// Scoring bands and plausibility limits for one game mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Events per minute
    pub rate: Band,
    pub amplitude: Band,
    pub form: Band,
    pub weights: ScoreWeights,
    /// Coefficient of variation at which consistency reaches 0
    pub cv_ceiling: f64,
    /// Per-event quality that keeps a combo going
    pub combo_threshold: f64,
    /// Client-reported amplitudes are clamped into this range
    pub amplitude_limits: (f64, f64),
    /// Intervals kept for the live rate and consistency
    pub rolling_intervals: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self::for_mode(GameMode::Cpr)
    }
}

impl ScoringConfig {
    /// Default bands for a game mode
    pub fn for_mode(mode: GameMode) -> Self {
        let (rate, amplitude, form, amplitude_limits) = match mode {
            GameMode::Cpr => (
                Band::new(100.0, 120.0, 40.0),
                Band::new(5.0, 6.0, 3.0),
                Band::new(0.9, 1.0, 0.5),
                (0.0, 15.0),
            ),
            GameMode::Pushup => (
                Band::new(20.0, 40.0, 20.0),
                Band::new(80.0, 110.0, 40.0),
                Band::new(0.8, 1.0, 0.5),
                (0.0, 180.0),
            ),
            GameMode::Squat => (
                Band::new(20.0, 40.0, 20.0),
                Band::new(0.25, 0.45, 0.2),
                Band::new(0.8, 1.0, 0.5),
                (0.0, 1.5),
            ),
            GameMode::Puzzle => (
                Band::new(20.0, 90.0, 40.0),
                Band::new(0.0, 1.0, 1.0),
                Band::new(0.0, 1.0, 1.0),
                (0.0, 1.0),
            ),
        };

        Self {
            rate,
            amplitude,
            form,
            weights: ScoreWeights::default(),
            cv_ceiling: 0.5,
            combo_threshold: 0.7,
            amplitude_limits,
            rolling_intervals: 10,
        }
    }
}

/// Session phase timing and server-side limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: GameMode,
    pub max_players: usize,
    /// Zero skips the tutorial phase
    pub tutorial_secs: u32,
    pub countdown_secs: u32,
    pub game_secs: u32,
    pub broadcast_hz: u32,
    pub idle_feedback_ms: u64,
    /// Motion messages closer than this (server receive time) are dropped
    pub min_event_gap_ms: u64,
    pub deploy_cooldown_ms: u64,
    pub history_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::Cpr,
            max_players: 1,
            tutorial_secs: 5,
            countdown_secs: 3,
            game_secs: 60,
            broadcast_hz: 10,
            idle_feedback_ms: 1_500,
            min_event_gap_ms: 150,
            deploy_cooldown_ms: 500,
            history_len: 30,
        }
    }
}

impl SessionConfig {
    pub fn broadcast_period_ms(&self) -> u64 {
        1_000 / u64::from(self.broadcast_hz.max(1))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    pub compression: CompressionConfig,
    pub pushup: PushUpConfig,
    pub squat: SquatConfig,
    pub lean: LeanConfig,
    pub gesture: GestureConfig,
    pub session: SessionConfig,
    /// Overrides the mode's default bands when present
    pub scoring: Option<ScoringConfig>,
}

impl PartyConfig {
    /// Scoring bands in effect for the configured game mode
    pub fn scoring(&self) -> ScoringConfig {
        self.scoring
            .clone()
            .unwrap_or_else(|| ScoringConfig::for_mode(self.session.mode))
    }

    pub fn from_json(json: &str) -> Result<Self, PartyError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, PartyError> {
        serde_json::to_string_pretty(self).map_err(PartyError::from)
    }

    /// Reject configurations that would make detectors or scoring misbehave
    pub fn validate(&self) -> Result<(), PartyError> {
        let c = &self.compression;
        if !(c.press_threshold < 0.0 && c.release_threshold > 0.0) {
            return Err(invalid("compression thresholds must straddle zero"));
        }
        if c.settle_band <= 0.0 || c.settle_band >= c.release_threshold {
            return Err(invalid("compression settle band must be inside the release threshold"));
        }
        if c.min_cycle_ms >= c.max_cycle_ms {
            return Err(invalid("compression min_cycle_ms must be below max_cycle_ms"));
        }
        if c.depth_scale <= 0.0 || !(0.0..=1.0).contains(&c.integration_decay) {
            return Err(invalid("compression depth_scale and integration_decay out of range"));
        }
        for (name, samples, debounce) in [
            ("compression", c.calibration_samples, c.debounce_samples),
            ("pushup", self.pushup.calibration_samples, self.pushup.debounce_samples),
            ("squat", self.squat.calibration_samples, self.squat.debounce_samples),
        ] {
            if samples < 2 {
                return Err(invalid(&format!("{} calibration needs at least 2 samples", name)));
            }
            if debounce == 0 {
                return Err(invalid(&format!("{} debounce must be at least 1", name)));
            }
        }

        let p = &self.pushup;
        if !(p.down_confirm_angle < p.up_start_angle
            && p.up_start_angle < p.up_confirm_angle
            && p.down_confirm_angle < p.start_down_angle
            && p.start_down_angle < p.abort_angle)
        {
            return Err(invalid("pushup angle thresholds are not ordered"));
        }

        let s = &self.squat;
        if !(s.up_confirm_ratio < s.up_start_ratio && s.up_start_ratio < s.down_confirm_ratio)
            || s.start_down_ratio >= s.down_confirm_ratio
        {
            return Err(invalid("squat ratio thresholds are not ordered"));
        }
        if s.beat_period_ms == Some(0) {
            return Err(invalid("squat beat_period_ms must be positive"));
        }

        if self.lean.exit_threshold >= self.lean.enter_threshold {
            return Err(invalid("lean exit threshold must be below the enter threshold"));
        }

        let scoring = self.scoring();
        if (scoring.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(invalid("score weights must sum to 1"));
        }
        for (name, band) in [
            ("rate", scoring.rate),
            ("amplitude", scoring.amplitude),
            ("form", scoring.form),
        ] {
            if band.low > band.high || band.cutoff <= 0.0 {
                return Err(invalid(&format!("{} band is malformed", name)));
            }
        }
        if scoring.cv_ceiling <= 0.0 || scoring.rolling_intervals < 2 {
            return Err(invalid("consistency window is malformed"));
        }

        let session = &self.session;
        if session.max_players == 0 || session.max_players > 2 {
            return Err(invalid("max_players must be 1 or 2"));
        }
        if session.game_secs == 0 || session.broadcast_hz == 0 || session.broadcast_hz > 60 {
            return Err(invalid("game_secs must be positive and broadcast_hz in 1..=60"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> PartyError {
    PartyError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        PartyConfig::default().validate().unwrap();
    }

    #[test]
    fn test_json_round_trip_and_partial_override() {
        let config = PartyConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(PartyConfig::from_json(&json).unwrap(), config);

        let partial =
            PartyConfig::from_json(r#"{"session": {"mode": "squat", "game_secs": 30}}"#).unwrap();
        assert_eq!(partial.session.mode, GameMode::Squat);
        assert_eq!(partial.session.game_secs, 30);
        assert_eq!(partial.session.countdown_secs, 3);
        assert_eq!(partial.scoring().amplitude, Band::new(0.25, 0.45, 0.2));
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = PartyConfig::default();
        let mut scoring = ScoringConfig::default();
        scoring.weights.rate = 0.5;
        config.scoring = Some(scoring);
        assert!(matches!(config.validate(), Err(PartyError::InvalidConfig(_))));
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = PartyConfig::default();
        config.compression.press_threshold = 1.0;
        assert!(config.validate().is_err());

        let mut config = PartyConfig::default();
        config.pushup.down_confirm_angle = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broadcast_period() {
        let session = SessionConfig::default();
        assert_eq!(session.broadcast_period_ms(), 100);
    }
}
