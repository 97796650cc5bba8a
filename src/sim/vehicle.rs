//! Vehicle integrator
//!
//! One call per consumed input slot. Server, client prediction and
//! reconciliation replay all go through [`apply_input`], so the same input
//! sequence from the same state yields the same trajectory everywhere.

use super::actor::{Actor, StateFlags};
use super::input::{Input, InputHistory};
use crate::consts::MIN_ROTATION_MULTIPLIER;
use crate::forward_vector;
use crate::settings::VehicleSettings;

/// Turn responsiveness scale for the current speed
///
/// Ranges from `MIN_ROTATION_MULTIPLIER` at standstill to 1 at top speed.
#[inline]
pub fn rotation_multiplier(speed_sq: f32, max_speed: f32) -> f32 {
    let ratio = if max_speed > 0.0 {
        (speed_sq / (max_speed * max_speed)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    MIN_ROTATION_MULTIPLIER + (1.0 - MIN_ROTATION_MULTIPLIER) * ratio
}

/// Advance a vehicle by one input slot
pub fn apply_input(actor: &mut Actor, settings: &VehicleSettings, input: &Input, dt: f32) {
    let flags = input.flags;
    let max_speed = settings.max_speed();

    // Acceleration is a per-tick velocity delta
    let throttle = if flags.accelerate() { 1.0 } else { 0.0 };
    let brake = if flags.brake() { 1.0 } else { 0.0 };
    let acceleration = (settings.acceleration * throttle
        - settings.acceleration * settings.brake_strength * brake)
        * input.acceleration_multiplier;
    actor.velocity += forward_vector(actor.rotation) * acceleration;

    let right = if flags.right() { 1.0 } else { 0.0 };
    let left = if flags.left() { 1.0 } else { 0.0 };
    actor.angular_velocity +=
        (settings.turn_speed * right - settings.turn_speed * left) * input.steering_multiplier;

    actor.position += actor.velocity * dt;
    actor.velocity *= settings.drag;

    let multiplier = rotation_multiplier(actor.velocity.length_squared(), max_speed);
    actor.rotation += actor.angular_velocity * multiplier * dt;
    actor.angular_velocity *= settings.angular_drag;
}

/// Integrate one input under the actor's control state
///
/// Actors that may not be steered coast under drag; eliminated actors ignore
/// the input entirely.
pub fn integrate_input(actor: &mut Actor, settings: &VehicleSettings, input: &Input, dt: f32) {
    if actor.state.contains(StateFlags::ELIMINATED) {
        return;
    }
    if actor.state.accepts_control() {
        apply_input(actor, settings, input, dt);
    } else {
        apply_input(actor, settings, &input.without_control(), dt);
    }
}

/// Consume every pending input of `history` through [`integrate_input`]
///
/// Returns the number consumed.
pub fn integrate_history(
    actor: &mut Actor,
    settings: &VehicleSettings,
    history: &mut InputHistory,
    dt: f32,
) -> usize {
    let mut consumed = 0;
    for input in history.drain() {
        consumed += 1;
        integrate_input(actor, settings, &input, dt);
    }
    consumed
}

/// Speed as a fraction of top speed, for the engine audio collaborator
pub fn engine_pitch(actor: &Actor, settings: &VehicleSettings) -> f32 {
    let max_speed = settings.max_speed();
    if max_speed <= 0.0 {
        return 0.0;
    }
    (actor.velocity.length() / max_speed).clamp(0.0, 1.0)
}
