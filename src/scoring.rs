//! Scoring
//!
//! Each dimension (rate, amplitude, form, consistency) is scored in [0, 1]
//! and combined with fixed weights. Dimensions a given event or game cannot
//! measure are left out and the remaining weights are renormalized.

use serde::{Deserialize, Serialize};

use crate::config::{Band, ScoreWeights, ScoringConfig};
use crate::types::GameMode;

/// Score of `value` against a target band.
///
/// ```text
/// inside:  1 - 0.1 * ((v - center) / half)^2      (0.9 at the edges)
/// outside: 0.9 * (1 - d / cutoff)^2  for d < cutoff, else 0
/// ```
/// where `d` is the distance to the nearer band edge.
pub fn band_score(value: f64, band: &Band) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    if band.contains(value) {
        let half = (band.high - band.low) / 2.0;
        if half <= 0.0 {
            return 1.0;
        }
        let center = (band.high + band.low) / 2.0;
        let off = (value - center) / half;
        return 1.0 - 0.1 * off * off;
    }

    let d = if value < band.low {
        band.low - value
    } else {
        value - band.high
    };
    if band.cutoff <= 0.0 || d >= band.cutoff {
        return 0.0;
    }
    let r = 1.0 - d / band.cutoff;
    0.9 * r * r
}

/// Consistency from a coefficient of variation; 1 at CV 0, 0 at the ceiling
pub fn consistency_score(cv: f64, cv_ceiling: f64) -> f64 {
    if !cv.is_finite() || cv_ceiling <= 0.0 {
        return 0.0;
    }
    (1.0 - cv / cv_ceiling).clamp(0.0, 1.0)
}

/// Per-dimension scores, each optional
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionScores {
    pub rate: Option<f64>,
    pub amplitude: Option<f64>,
    pub form: Option<f64>,
    pub consistency: Option<f64>,
}

impl DimensionScores {
    /// Weighted mean over the dimensions present
    pub fn combined(&self, weights: &ScoreWeights) -> Option<f64> {
        let parts = [
            (self.rate, weights.rate),
            (self.amplitude, weights.amplitude),
            (self.form, weights.form),
            (self.consistency, weights.consistency),
        ];
        let (sum, total) = parts
            .iter()
            .filter_map(|(score, w)| score.map(|s| (s * w, *w)))
            .fold((0.0, 0.0), |(sum, total), (s, w)| (sum + s, total + w));
        if total <= 0.0 {
            return None;
        }
        Some((sum / total).clamp(0.0, 1.0))
    }
}

/// Summary figures for one player's game
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub events: u64,
    /// Events per minute
    pub avg_rate: Option<f64>,
    pub avg_amplitude: Option<f64>,
    pub avg_form: Option<f64>,
    /// Coefficient of variation of the intervals between events
    pub interval_cv: Option<f64>,
}

impl Aggregates {
    pub fn dimension_scores(&self, config: &ScoringConfig) -> DimensionScores {
        DimensionScores {
            rate: self.avg_rate.map(|r| band_score(r, &config.rate)),
            amplitude: self.avg_amplitude.map(|a| band_score(a, &config.amplitude)),
            form: self.avg_form.map(|f| band_score(f, &config.form)),
            consistency: self.interval_cv.map(|cv| consistency_score(cv, config.cv_ceiling)),
        }
    }

    /// Overall score in [0, 1]; zero when nothing was counted
    pub fn score(&self, config: &ScoringConfig) -> f64 {
        if self.events == 0 {
            return 0.0;
        }
        self.dimension_scores(config)
            .combined(&config.weights)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            Grade::A
        } else if score >= 0.75 {
            Grade::B
        } else if score >= 0.60 {
            Grade::C
        } else if score >= 0.40 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

/// Consistency score below which a steadiness tip is given
const CONSISTENCY_TIP_BELOW: f64 = 0.5;

const MAX_TIPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Miss {
    Low,
    High,
}

fn miss(value: Option<f64>, band: &Band) -> Option<Miss> {
    let v = value?;
    if v < band.low {
        Some(Miss::Low)
    } else if v > band.high {
        Some(Miss::High)
    } else {
        None
    }
}

fn unit(mode: GameMode) -> &'static str {
    match mode {
        GameMode::Cpr => "compressions",
        GameMode::Pushup => "push-ups",
        GameMode::Squat => "squats",
        GameMode::Puzzle => "moves",
    }
}

fn rate_tip(mode: GameMode, miss: Miss, band: &Band) -> String {
    match (mode, miss) {
        (GameMode::Puzzle, Miss::Low) => "Try to make your moves a little quicker".to_string(),
        (GameMode::Puzzle, Miss::High) => "Take a moment to plan your moves".to_string(),
        (_, Miss::Low) => format!(
            "Speed up: aim for {:.0}-{:.0} {} per minute",
            band.low,
            band.high,
            unit(mode)
        ),
        (_, Miss::High) => format!(
            "Slow down: aim for {:.0}-{:.0} {} per minute",
            band.low,
            band.high,
            unit(mode)
        ),
    }
}

fn amplitude_tip(mode: GameMode, miss: Miss, band: &Band) -> Option<String> {
    let tip = match (mode, miss) {
        (GameMode::Cpr, Miss::Low) => {
            return Some(format!("Push deeper: aim for {:.0}-{:.0} cm", band.low, band.high))
        }
        (GameMode::Cpr, Miss::High) => {
            return Some(format!("Ease off: deeper than {:.0} cm is too much", band.high))
        }
        (GameMode::Pushup, Miss::Low) => "Go lower: bend your elbows to about 90 degrees",
        (GameMode::Pushup, Miss::High) => "No need to touch the floor, stop just above it",
        (GameMode::Squat, Miss::Low) => "Squat deeper: bring your hips toward knee height",
        (GameMode::Squat, Miss::High) => "No need to go that low, keep it controlled",
        (GameMode::Puzzle, _) => return None,
    };
    Some(tip.to_string())
}

fn form_tip(mode: GameMode) -> Option<String> {
    let tip = match mode {
        GameMode::Cpr => "Let the chest come all the way back up between compressions",
        GameMode::Pushup => "Keep your body in a straight line from shoulders to ankles",
        GameMode::Squat => "Keep your chest up and your back straight",
        GameMode::Puzzle => return None,
    };
    Some(tip.to_string())
}

fn consistency_tip(mode: GameMode) -> String {
    match mode {
        GameMode::Cpr => "Keep a steady rhythm, like the beat of a song",
        GameMode::Pushup | GameMode::Squat => "Keep a steady tempo from rep to rep",
        GameMode::Puzzle => "Keep a steady pace",
    }
    .to_string()
}

/// Improvement tips, at most three, in dimension order
pub fn tips(mode: GameMode, aggregates: &Aggregates, config: &ScoringConfig) -> Vec<String> {
    if aggregates.events == 0 {
        return vec![format!(
            "No {} were counted, make sure your controller is connected",
            unit(mode)
        )];
    }

    let mut tips = Vec::new();
    if let Some(m) = miss(aggregates.avg_rate, &config.rate) {
        tips.push(rate_tip(mode, m, &config.rate));
    }
    if let Some(m) = miss(aggregates.avg_amplitude, &config.amplitude) {
        tips.extend(amplitude_tip(mode, m, &config.amplitude));
    }
    if miss(aggregates.avg_form, &config.form) == Some(Miss::Low) {
        tips.extend(form_tip(mode));
    }
    let steady = aggregates
        .interval_cv
        .map(|cv| consistency_score(cv, config.cv_ceiling));
    if steady.is_some_and(|s| s < CONSISTENCY_TIP_BELOW) {
        tips.push(consistency_tip(mode));
    }

    if tips.is_empty() {
        tips.push("Great job! You hit every target.".to_string());
    }
    tips.truncate(MAX_TIPS);
    tips
}
