//! Fixed-rate accumulator driven by wall-clock deltas

use crate::consts::MAX_CATCH_UP_STEPS;

/// Turns variable frame deltas into a whole number of fixed steps
///
/// A slow frame runs several steps back to back. At most `max_steps` run
/// per [`advance`](Self::advance); anything beyond stays accumulated for the
/// next call, so game time is delayed but never dropped.
#[derive(Debug, Clone)]
pub struct FixedTicker {
    step: f32,
    accumulator: f32,
    max_steps: u32,
}

impl FixedTicker {
    pub fn new(hz: f32) -> Self {
        Self {
            step: 1.0 / hz,
            accumulator: 0.0,
            max_steps: MAX_CATCH_UP_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Time accumulated but not yet stepped
    pub fn backlog(&self) -> f32 {
        self.accumulator
    }

    /// Feed a wall-clock delta, returning how many fixed steps are due
    pub fn advance(&mut self, dt: f32) -> u32 {
        if dt.is_finite() && dt > 0.0 {
            self.accumulator += dt;
        }
        let mut steps = 0;
        while self.accumulator >= self.step && steps < self.max_steps {
            self.accumulator -= self.step;
            steps += 1;
        }
        steps
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
