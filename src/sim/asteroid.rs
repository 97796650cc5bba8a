//! Asteroid integrator and field generation
//!
//! Asteroids drift at constant velocity, bounce off the field bounds and
//! collide elastically as circles with each other and with vehicles.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::actor::{Actor, ActorId, collision_flags};
use super::geometry::{ContactBody, intersect_circles, resolve_contact};
use super::spatial::Aabb;
use crate::settings::AsteroidField;

/// Advance one asteroid by `dt`, reflecting off `bounds`
pub fn integrate(actor: &mut Actor, dt: f32, bounds: &Aabb) {
    actor.position += actor.velocity * dt;
    actor.rotation += actor.angular_velocity * dt;

    let r = actor.radius;
    let mut bounced = false;
    if actor.position.x - r < bounds.min.x && actor.velocity.x < 0.0 {
        actor.position.x = bounds.min.x + r;
        actor.velocity.x = -actor.velocity.x;
        bounced = true;
    } else if actor.position.x + r > bounds.max.x && actor.velocity.x > 0.0 {
        actor.position.x = bounds.max.x - r;
        actor.velocity.x = -actor.velocity.x;
        bounced = true;
    }
    if actor.position.y - r < bounds.min.y && actor.velocity.y < 0.0 {
        actor.position.y = bounds.min.y + r;
        actor.velocity.y = -actor.velocity.y;
        bounced = true;
    } else if actor.position.y + r > bounds.max.y && actor.velocity.y > 0.0 {
        actor.position.y = bounds.max.y - r;
        actor.velocity.y = -actor.velocity.y;
        bounced = true;
    }
    if bounced {
        actor.collision_flags |= collision_flags::BOUNDARY;
    }
}

/// Resolve two bodies as circles; returns whether they overlapped
pub fn resolve_circles(a: &mut Actor, b: &mut Actor) -> bool {
    let Some(manifold) = intersect_circles(a.position, a.radius, b.position, b.radius) else {
        return false;
    };
    let (mass_a, mass_b) = (a.mass(), b.mass());
    resolve_contact(
        ContactBody {
            position: &mut a.position,
            velocity: &mut a.velocity,
            mass: mass_a,
        },
        ContactBody {
            position: &mut b.position,
            velocity: &mut b.velocity,
            mass: mass_b,
        },
        &manifold,
    );
    true
}

/// Generate a deterministic asteroid field
///
/// Asteroids never spawn within `clearance` of any point in `keep_clear`
/// (start grid, waypoints). Placement gives up on a rock after a bounded
/// number of attempts, so the field may hold fewer than `field.count`.
pub fn generate_field(
    field: &AsteroidField,
    seed: u64,
    first_id: ActorId,
    keep_clear: &[Vec2],
    clearance: f32,
) -> Vec<Actor> {
    const MAX_ATTEMPTS: u32 = 32;

    let mut rng = Pcg32::seed_from_u64(seed);
    let mut asteroids: Vec<Actor> = Vec::with_capacity(field.count as usize);
    let half = field.half_extents;

    for i in 0..field.count {
        let radius = if field.max_radius > field.min_radius {
            rng.random_range(field.min_radius..field.max_radius)
        } else {
            field.min_radius
        };

        if half.x <= radius || half.y <= radius {
            log::warn!("Asteroid radius {} does not fit field {:?}, skipping", radius, half);
            continue;
        }

        let mut placed = None;
        for _ in 0..MAX_ATTEMPTS {
            let position = Vec2::new(
                rng.random_range(-half.x + radius..half.x - radius),
                rng.random_range(-half.y + radius..half.y - radius),
            );
            let clear_of_track = keep_clear
                .iter()
                .all(|p| p.distance(position) > clearance + radius);
            let clear_of_rocks = asteroids
                .iter()
                .all(|a| a.position.distance(position) > a.radius + radius);
            if clear_of_track && clear_of_rocks {
                placed = Some(position);
                break;
            }
        }
        let Some(position) = placed else {
            log::debug!("Asteroid {} could not be placed, skipping", i);
            continue;
        };

        let heading = rng.random_range(-std::f32::consts::PI..std::f32::consts::PI);
        let speed = rng.random_range(0.0..=field.max_speed.max(0.0));
        let spin = rng.random_range(-1.0f32..=1.0);
        asteroids.push(Actor::asteroid(
            first_id + i,
            position,
            Vec2::from_angle(heading) * speed,
            spin,
            radius,
            field.density,
        ));
    }

    log::info!("Generated {} asteroids (seed {})", asteroids.len(), seed);
    asteroids
}
