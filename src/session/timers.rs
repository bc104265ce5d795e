//! Timer schedules
//!
//! A session never owns running timers. Each phase transition describes the
//! complete set of timers it needs as a [`TimerSchedule`] stamped with a new
//! generation; whoever runs the session replaces all previous timers with it.
//! Ticks carry their generation so late ticks from a replaced schedule can be
//! recognised and ignored.

use serde::{Deserialize, Serialize};

use super::phase::GamePhase;
use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerKind {
    /// 1 Hz tutorial countdown
    Tutorial,
    /// 1 Hz pre-game countdown
    Countdown,
    /// 1 Hz game clock
    GameClock,
    /// Snapshot broadcast and idle feedback
    Broadcast,
}

/// One repeating timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSpec {
    pub kind: TimerKind,
    pub period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSchedule {
    pub generation: u64,
    pub timers: Vec<TimerSpec>,
}

impl TimerSchedule {
    pub fn for_phase(phase: GamePhase, generation: u64, config: &SessionConfig) -> Self {
        let second = |kind| TimerSpec { kind, period_ms: 1_000 };
        let timers = match phase {
            GamePhase::Lobby | GamePhase::GameOver => Vec::new(),
            GamePhase::Tutorial => vec![second(TimerKind::Tutorial)],
            GamePhase::Countdown => vec![second(TimerKind::Countdown)],
            GamePhase::Playing => vec![
                second(TimerKind::GameClock),
                TimerSpec {
                    kind: TimerKind::Broadcast,
                    period_ms: config.broadcast_period_ms(),
                },
            ],
        };
        Self { generation, timers }
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[derive(Debug, Clone)]
struct WheelEntry {
    spec: TimerSpec,
    next_ms: u64,
}

/// Virtual-time executor for timer schedules.
///
/// Used by the in-process pipeline and the replay tooling to drive a session
/// deterministically without sleeping.
#[derive(Debug, Clone, Default)]
pub struct TimerWheel {
    generation: u64,
    entries: Vec<WheelEntry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every pending timer with `schedule`, first firing one period after `now_ms`
    pub fn install(&mut self, schedule: &TimerSchedule, now_ms: u64) {
        self.generation = schedule.generation;
        self.entries = schedule
            .timers
            .iter()
            .map(|spec| WheelEntry {
                spec: *spec,
                next_ms: now_ms + spec.period_ms.max(1),
            })
            .collect();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_idle(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest due time; ties go to the timer listed first
    pub fn next_due(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.next_ms).min()
    }

    /// Pop the next tick due at or before `until_ms`
    pub fn pop_due(&mut self, until_ms: u64) -> Option<(u64, u64, TimerKind)> {
        let due = self.next_due().filter(|t| *t <= until_ms)?;
        let entry = self.entries.iter_mut().find(|e| e.next_ms == due)?;
        entry.next_ms += entry.spec.period_ms.max(1);
        Some((due, self.generation, entry.spec.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_schedule_per_phase() {
        let config = SessionConfig::default();
        assert!(TimerSchedule::for_phase(GamePhase::Lobby, 1, &config).is_empty());
        assert!(TimerSchedule::for_phase(GamePhase::GameOver, 1, &config).is_empty());
        let playing = TimerSchedule::for_phase(GamePhase::Playing, 4, &config);
        assert_eq!(playing.generation, 4);
        assert_eq!(
            playing.timers,
            vec![
                TimerSpec {
                    kind: TimerKind::GameClock,
                    period_ms: 1_000
                },
                TimerSpec {
                    kind: TimerKind::Broadcast,
                    period_ms: 100
                },
            ]
        );
    }

    #[test]
    fn test_wheel_fires_in_time_order() {
        let config = SessionConfig {
            broadcast_hz: 2,
            ..SessionConfig::default()
        };
        let mut wheel = TimerWheel::new();
        wheel.install(&TimerSchedule::for_phase(GamePhase::Playing, 7, &config), 0);
        let mut fired = Vec::new();
        while let Some((at, generation, kind)) = wheel.pop_due(2_000) {
            assert_eq!(generation, 7);
            fired.push((at, kind));
        }
        assert_eq!(
            fired,
            vec![
                (500, TimerKind::Broadcast),
                (1_000, TimerKind::GameClock),
                (1_000, TimerKind::Broadcast),
                (1_500, TimerKind::Broadcast),
                (2_000, TimerKind::GameClock),
                (2_000, TimerKind::Broadcast),
            ]
        );
    }

    #[test]
    fn test_install_replaces_previous_timers() {
        let config = SessionConfig::default();
        let mut wheel = TimerWheel::new();
        wheel.install(&TimerSchedule::for_phase(GamePhase::Countdown, 1, &config), 0);
        wheel.install(&TimerSchedule::for_phase(GamePhase::GameOver, 2, &config), 500);
        assert!(wheel.is_idle());
        assert_eq!(wheel.pop_due(10_000), None);
        assert_eq!(wheel.generation(), 2);
    }
}
