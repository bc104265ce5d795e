//! Signal conditioning primitives shared by the detectors
//!
//! All filters are plain structs with explicit state so detectors stay
//! deterministic: the same input sequence always yields the same output.

/// Exponential moving average: `s = alpha * x + (1 - alpha) * s`.
///
/// The first sample initializes the state directly.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Gravity removal: tracks the slow component and returns `raw - gravity`.
#[derive(Debug, Clone)]
pub struct HighPass {
    /// Weight on the previous gravity estimate
    alpha: f64,
    gravity: Option<f64>,
}

impl HighPass {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            gravity: None,
        }
    }

    pub fn update(&mut self, raw: f64) -> f64 {
        let gravity = match self.gravity {
            Some(g) => self.alpha * g + (1.0 - self.alpha) * raw,
            None => raw,
        };
        self.gravity = Some(gravity);
        raw - gravity
    }

    pub fn reset(&mut self) {
        self.gravity = None;
    }
}

/// Counts consecutive samples that satisfy a threshold condition.
///
/// Remembers the timestamp of the first sample of the current run so a state
/// transition can be dated to when the crossing actually began.
#[derive(Debug, Clone)]
pub struct Debounce {
    required: u32,
    run: u32,
    run_start_ms: u64,
}

impl Debounce {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            run: 0,
            run_start_ms: 0,
        }
    }

    /// Feed one sample; returns true once the run reaches the required length.
    pub fn update(&mut self, condition: bool, timestamp_ms: u64) -> bool {
        if !condition {
            self.run = 0;
            return false;
        }
        if self.run == 0 {
            self.run_start_ms = timestamp_ms;
        }
        self.run += 1;
        self.run >= self.required
    }

    /// Current run length
    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn run_start_ms(&self) -> u64 {
        self.run_start_ms
    }

    pub fn reset(&mut self) {
        self.run = 0;
    }
}

/// Reference step for the integrator decay (50 Hz)
const DECAY_REFERENCE_SECS: f64 = 0.02;

/// Double integrator from acceleration to displacement with leaky decay.
///
/// ```text
/// k = decay ^ (dt / 0.02)
/// v = (v + a * dt) * k
/// d = (d + v * dt) * k
/// ```
///
/// The decay is expressed per 20 ms so the drift correction does not depend
/// on the sensor rate.
#[derive(Debug, Clone)]
pub struct DriftIntegrator {
    decay: f64,
    velocity: f64,
    displacement: f64,
}

impl DriftIntegrator {
    pub fn new(decay: f64) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            velocity: 0.0,
            displacement: 0.0,
        }
    }

    /// Integrate one acceleration sample (m/s²) over `dt_secs`; returns displacement (m).
    pub fn step(&mut self, accel: f64, dt_secs: f64) -> f64 {
        let k = self.decay.powf(dt_secs / DECAY_REFERENCE_SECS);
        self.velocity = (self.velocity + accel * dt_secs) * k;
        self.displacement = (self.displacement + self.velocity * dt_secs) * k;
        self.displacement
    }

    pub fn displacement(&self) -> f64 {
        self.displacement
    }

    pub fn reset(&mut self) {
        self.velocity = 0.0;
        self.displacement = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_first_sample_initializes() {
        let mut ema = Ema::new(0.3);
        assert_eq!(ema.update(10.0), 10.0);
        let next = ema.update(0.0);
        assert!((next - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_high_pass_removes_constant_gravity() {
        let mut hp = HighPass::new(0.8);
        let mut last = 1.0;
        for _ in 0..200 {
            last = hp.update(9.81);
        }
        assert!(last.abs() < 1e-9);
    }

    #[test]
    fn test_debounce_requires_consecutive_run() {
        let mut db = Debounce::new(3);
        assert!(!db.update(true, 10));
        assert!(!db.update(true, 20));
        assert!(!db.update(false, 30));
        assert!(!db.update(true, 40));
        assert!(!db.update(true, 50));
        assert!(db.update(true, 60));
        assert_eq!(db.run_start_ms(), 40);
    }

    #[test]
    fn test_integrator_decay_is_rate_independent() {
        // Same constant push for 200 ms at 50 Hz and at 100 Hz
        let mut slow = DriftIntegrator::new(0.95);
        for _ in 0..10 {
            slow.step(-5.0, 0.02);
        }
        let mut fast = DriftIntegrator::new(0.95);
        for _ in 0..20 {
            fast.step(-5.0, 0.01);
        }
        let ratio = slow.displacement() / fast.displacement();
        assert!(ratio > 0.8 && ratio < 1.25, "ratio {}", ratio);
    }

    #[test]
    fn test_integrator_without_input_decays_to_zero() {
        let mut integ = DriftIntegrator::new(0.95);
        integ.step(-10.0, 0.02);
        for _ in 0..500 {
            integ.step(0.0, 0.02);
        }
        assert!(integ.displacement().abs() < 1e-6);
    }
}
