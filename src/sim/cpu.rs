//! CPU drivers
//!
//! A CPU player is just another source of [`Input`]s: one per simulation
//! tick, recorded into its actor's history and integrated like any client's.

use super::actor::Actor;
use super::input::{Input, InputFlags};
use super::track::Track;
use crate::normalize_angle;
use crate::settings::VehicleSettings;

/// Waypoint-following steering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuDriver {
    /// Distance along the ring to the steering target
    pub look_ahead: f32,
    /// Heading error ignored, radians
    pub dead_zone: f32,
    /// Heading error above which the driver brakes at speed
    pub brake_angle: f32,
    /// Fraction of top speed above which braking is allowed
    pub brake_speed: f32,
}

impl Default for CpuDriver {
    fn default() -> Self {
        Self::with_skill(0.5)
    }
}

impl CpuDriver {
    /// `skill` in [0, 1]; better drivers look further ahead
    pub fn with_skill(skill: f32) -> Self {
        let skill = skill.clamp(0.0, 1.0);
        Self {
            look_ahead: 120.0 + 80.0 * skill,
            dead_zone: 0.05,
            brake_angle: 1.0 - 0.3 * skill,
            brake_speed: 0.5,
        }
    }

    /// Input for a tick of length `dt`, steering along the segment leaving `waypoint`
    pub fn drive(
        &self,
        actor: &Actor,
        settings: &VehicleSettings,
        track: &Track,
        waypoint: u32,
        timestamp: i64,
        dt: f32,
    ) -> Input {
        let target = track.point_ahead(waypoint, actor.position, self.look_ahead);
        let to_target = target - actor.position;
        let mut flags = InputFlags::empty();
        if to_target.length_squared() <= f32::EPSILON {
            flags.set(InputFlags::ACCELERATE, true);
            return Input::new(timestamp, flags);
        }

        let desired = to_target.y.atan2(to_target.x);
        let error = normalize_angle(desired - actor.rotation);

        // Rotation still to come from the current angular velocity once released
        let coast = if settings.angular_drag < 1.0 {
            settings.angular_drag / (1.0 - settings.angular_drag)
        } else {
            0.0
        };
        let predicted = error - actor.angular_velocity * coast * dt;

        if predicted > self.dead_zone {
            flags.set(InputFlags::RIGHT, true);
        } else if predicted < -self.dead_zone {
            flags.set(InputFlags::LEFT, true);
        }

        let speed = actor.velocity.length();
        if error.abs() > self.brake_angle && speed > settings.max_speed() * self.brake_speed {
            flags.set(InputFlags::BRAKE, true);
        } else {
            flags.set(InputFlags::ACCELERATE, true);
        }
        Input::new(timestamp, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::settings::VehicleTuning;
    use crate::sim::actor::{ActorKind, Pose, StateFlags};
    use crate::sim::track::MapDescriptor;
    use crate::sim::vehicle::apply_input;
    use glam::Vec2;

    fn track() -> Track {
        Track::from_descriptor(&MapDescriptor::oval(Vec2::new(1200.0, 700.0), 24, 200.0)).unwrap()
    }

    #[test]
    fn test_steers_toward_target() {
        let track = track();
        let settings = VehicleTuning::default().car;
        let driver = CpuDriver::default();

        // On waypoint 0 facing outward, track heads up and to the left
        let mut actor = Actor::vehicle(
            1,
            0,
            ActorKind::Car,
            &settings,
            Pose {
                position: Vec2::new(1200.0, 0.0),
                rotation: 0.0,
            },
        );
        actor.state = StateFlags::normal();
        let input = driver.drive(&actor, &settings, &track, 0, 0, SIM_DT);
        assert!(input.flags.right());
        assert!(input.flags.accelerate());
    }

    #[test]
    fn test_turn_damping_follows_tick_length() {
        let track = track();
        let settings = VehicleTuning::default().car;
        let driver = CpuDriver::default();
        let position = Vec2::new(1200.0, 0.0);
        let target = track.point_ahead(0, position, driver.look_ahead) - position;

        let mut actor = Actor::vehicle(
            1,
            0,
            ActorKind::Car,
            &settings,
            Pose {
                position,
                rotation: target.y.atan2(target.x) - 0.1,
            },
        );
        actor.state = StateFlags::normal();
        actor.angular_velocity = 0.5;

        let fast = driver.drive(&actor, &settings, &track, 0, 0, 1.0 / 60.0);
        assert!(fast.flags.right());

        // Longer ticks carry more of the spin, so the driver lets go
        let slow = driver.drive(&actor, &settings, &track, 0, 0, 1.0 / 20.0);
        assert!(!slow.flags.right());
        assert!(!slow.flags.left());
    }

    #[test]
    fn test_laps_the_oval() {
        let track = track();
        let settings = VehicleTuning::default().car;
        let driver = CpuDriver::default();
        let pose = track.waypoint(0).spawn_pose();
        let mut actor = Actor::vehicle(1, 0, ActorKind::Car, &settings, pose);
        actor.state = StateFlags::normal();

        let mut waypoint = 0;
        let mut crossings = 0;
        for tick in 0..60 * 60 {
            let input = driver.drive(&actor, &settings, &track, waypoint, tick, SIM_DT);
            apply_input(&mut actor, &settings, &input, SIM_DT);
            let (next, crossed) = track.advance(waypoint, actor.position);
            assert!(!track.is_off_track(next, actor.position), "left the track at tick {tick}");
            waypoint = next;
            crossings += crossed;
        }
        assert!(crossings >= 1, "no lap completed");
    }
}
