//! Frame-rate and modulation-frequency estimators.

use std::time::Instant;

/// Acquisition rate from the spacing of consecutive frames.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    last_frame: Instant,
    fps: f64,
}

impl FpsMeter {
    pub fn new(started_at: Instant) -> Self {
        Self {
            last_frame: started_at,
            fps: 0.0,
        }
    }

    /// Register a frame arriving at `now` and return the current estimate.
    /// A zero interval keeps the previous estimate.
    pub fn tick(&mut self, now: Instant) -> f64 {
        let delta = now.saturating_duration_since(self.last_frame).as_secs_f64();
        if delta != 0.0 {
            self.fps = 1.0 / delta;
        }
        self.last_frame = now;
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Estimates the on/off modulation frequency from rising edges of the
/// detected power.
///
/// The estimate only changes on a false → true transition; frames where the
/// beam stays on, stays off, or switches off leave it untouched.
#[derive(Debug, Clone)]
pub struct CycleDetector {
    last_on: bool,
    cycle_start: Instant,
    frequency: f64,
}

impl CycleDetector {
    pub fn new(started_at: Instant) -> Self {
        Self {
            last_on: false,
            cycle_start: started_at,
            frequency: 0.0,
        }
    }

    /// Feed the on-state of a frame taken at `now`.  Returns the new estimate
    /// when this frame was a rising edge with a non-zero period.
    pub fn observe(&mut self, on: bool, now: Instant) -> Option<f64> {
        let rising = on && !self.last_on;
        self.last_on = on;
        if !rising {
            return None;
        }
        let delta = now.saturating_duration_since(self.cycle_start).as_secs_f64();
        if delta == 0.0 {
            return None;
        }
        self.frequency = 1.0 / delta;
        self.cycle_start = now;
        Some(self.frequency)
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn is_on(&self) -> bool {
        self.last_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fps_from_frame_spacing() {
        let t0 = Instant::now();
        let mut meter = FpsMeter::new(t0);
        assert!((meter.tick(t0 + Duration::from_millis(50)) - 20.0).abs() < 1e-9);
        assert!((meter.tick(t0 + Duration::from_millis(150)) - 10.0).abs() < 1e-9);
        // Same instant again: estimate unchanged.
        let before = meter.fps();
        assert_eq!(meter.tick(t0 + Duration::from_millis(150)), before);
    }

    #[test]
    fn frequency_updates_on_rising_edges_only() {
        let t0 = Instant::now();
        let mut cycle = CycleDetector::new(t0);
        let powers = [0.0, 0.0, 20.0, 20.0, 0.0, 20.0];
        let on_threshold = 17.0;

        let updated: Vec<usize> = powers
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| {
                let now = t0 + Duration::from_millis(100 * (i as u64 + 1));
                cycle.observe(p > on_threshold, now).map(|_| i)
            })
            .collect();

        assert_eq!(updated, vec![2, 5]);
        // Rising edges at 300 ms and 600 ms.
        assert!((cycle.frequency() - 1.0 / 0.3).abs() < 1e-9);
    }

    #[test]
    fn steady_on_leaves_frequency_unchanged() {
        let t0 = Instant::now();
        let mut cycle = CycleDetector::new(t0);
        cycle.observe(true, t0 + Duration::from_millis(500));
        let f = cycle.frequency();
        for i in 2..10 {
            assert!(cycle.observe(true, t0 + Duration::from_millis(500 * i)).is_none());
        }
        assert_eq!(cycle.frequency(), f);
    }
}
