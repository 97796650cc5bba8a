//! Dead reckoning for remote actors
//!
//! Snapshots arrive at the network rate, late and sometimes out of order.
//! Between them each remote actor keeps moving with a velocity that blends
//! from the previous target to the newest one over one snapshot interval.

use glam::Vec2;

/// Authoritative sample of a remote actor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
    /// Absent for actors whose spin is not replicated
    pub angular_velocity: Option<f32>,
    /// Server milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DeadReckonState {
    last: Option<Snapshot>,
    has_fresh_update: bool,
    position: Vec2,
    rotation: f32,
    angular_velocity: f32,
    curr_velocity: Vec2,
    target_velocity: Vec2,
    blend_elapsed: f32,
    blend_duration: f32,
}

impl DeadReckonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn last_update(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Whether an update arrived since the last call; clears the flag
    pub fn take_fresh_update(&mut self) -> bool {
        std::mem::take(&mut self.has_fresh_update)
    }

    /// Velocity currently being extrapolated with
    pub fn velocity(&self) -> Vec2 {
        if self.blend_duration <= 0.0 || self.blend_elapsed >= self.blend_duration {
            return self.target_velocity;
        }
        self.curr_velocity
            .lerp(self.target_velocity, self.blend_elapsed / self.blend_duration)
    }

    /// Accept a snapshot; returns false if it is not newer than the last one
    pub fn apply_update(&mut self, snapshot: Snapshot) -> bool {
        let latency_secs = match &self.last {
            Some(last) if snapshot.timestamp <= last.timestamp => return false,
            Some(last) => (snapshot.timestamp - last.timestamp) as f32 / 1000.0,
            None => 0.0,
        };
        let angular_velocity = snapshot.angular_velocity.unwrap_or(0.0);

        if self.last.is_some() {
            self.position = snapshot.position + snapshot.velocity * latency_secs;
            self.rotation = snapshot.rotation + angular_velocity * latency_secs;
            self.curr_velocity = self.target_velocity;
        } else {
            self.position = snapshot.position;
            self.rotation = snapshot.rotation;
            self.curr_velocity = snapshot.velocity;
        }
        self.target_velocity = snapshot.velocity;
        self.angular_velocity = angular_velocity;
        self.blend_elapsed = 0.0;
        self.blend_duration = latency_secs;
        self.last = Some(snapshot);
        self.has_fresh_update = true;
        true
    }

    /// Extrapolate one client tick
    pub fn tick(&mut self, dt: f32) {
        if self.last.is_none() {
            return;
        }
        self.blend_elapsed = (self.blend_elapsed + dt).min(self.blend_duration);
        self.position += self.velocity() * dt;
        self.rotation += self.angular_velocity * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(timestamp: i64, position: Vec2, velocity: Vec2) -> Snapshot {
        Snapshot {
            position,
            velocity,
            rotation: 0.0,
            angular_velocity: None,
            timestamp,
        }
    }

    #[test]
    fn test_first_update_snaps() {
        let mut state = DeadReckonState::new();
        assert!(state.apply_update(snapshot(1000, Vec2::new(5.0, 5.0), Vec2::new(10.0, 0.0))));
        assert_eq!(state.position(), Vec2::new(5.0, 5.0));
        assert_eq!(state.velocity(), Vec2::new(10.0, 0.0));
        assert!(state.take_fresh_update());
        assert!(!state.take_fresh_update());
    }

    #[test]
    fn test_latency_compensation() {
        let mut state = DeadReckonState::new();
        state.apply_update(snapshot(0, Vec2::ZERO, Vec2::new(10.0, 0.0)));
        state.apply_update(snapshot(100, Vec2::new(1.0, 0.0), Vec2::new(0.0, 20.0)));
        // Snapped, then pushed forward by 100ms at the new velocity
        assert!((state.position() - Vec2::new(1.0, 2.0)).length() < 1e-5);
        // Blend starts from the previous target
        assert_eq!(state.velocity(), Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_blend_converges_to_target() {
        let mut state = DeadReckonState::new();
        state.apply_update(snapshot(0, Vec2::ZERO, Vec2::new(10.0, 0.0)));
        state.apply_update(snapshot(125, Vec2::ZERO, Vec2::new(0.0, 10.0)));
        let target = Vec2::new(0.0, 10.0);

        let dt = 1.0 / 32.0;
        for _ in 0..3 {
            state.tick(dt);
            assert_ne!(state.velocity(), target);
        }
        state.tick(dt);
        assert_eq!(state.velocity(), target);

        // From here on motion is driven purely by the target velocity
        let before = state.position();
        state.tick(dt);
        assert_eq!(state.position(), before + target * dt);
    }

    #[test]
    fn test_stale_updates_ignored() {
        let mut state = DeadReckonState::new();
        state.apply_update(snapshot(200, Vec2::new(3.0, 0.0), Vec2::ZERO));
        state.take_fresh_update();
        assert!(!state.apply_update(snapshot(200, Vec2::new(9.0, 9.0), Vec2::ONE)));
        assert!(!state.apply_update(snapshot(150, Vec2::new(9.0, 9.0), Vec2::ONE)));
        assert_eq!(state.position(), Vec2::new(3.0, 0.0));
        assert!(!state.take_fresh_update());
    }

    #[test]
    fn test_rotation_follows_angular_velocity() {
        let mut state = DeadReckonState::new();
        let mut first = snapshot(0, Vec2::ZERO, Vec2::ZERO);
        first.angular_velocity = Some(1.0);
        state.apply_update(first);
        let second = Snapshot {
            rotation: 0.5,
            timestamp: 500,
            ..first
        };
        state.apply_update(second);
        assert!((state.rotation() - 1.0).abs() < 1e-6);
        state.tick(0.25);
        assert!((state.rotation() - 1.25).abs() < 1e-6);
    }
}
