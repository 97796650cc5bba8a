//! Simulation world
//!
//! Owns every actor and every input history. One [`World::step`] is one fixed
//! simulation tick:
//! 1. Vehicles consume their pending inputs through the integrator
//! 2. Asteroids drift and bounce
//! 3. Broad phase, then pairwise resolution in ascending id order

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec2;

use super::actor::{Actor, ActorId, ActorKind, Pose, collision_flags};
use super::asteroid;
use super::geometry::{ContactBody, intersect_polygons, mass_for_radius, resolve_contact};
use super::input::{Input, InputHistory};
use super::spatial::{Aabb, SpatialGrid};
use super::track::Track;
use super::vehicle;
use crate::consts::SPATIAL_CELL_SIZE;
use crate::forward_vector;
use crate::settings::{ServerSettings, VehicleTuning};

/// Centres closer than this are treated as a tunneling overlap
const TUNNEL_EPSILON: f32 = 1e-3;

/// Keep asteroids this far from the racing line when generating a field
const ASTEROID_TRACK_CLEARANCE: f32 = 120.0;

/// Read-only data shared by every part of the simulation
#[derive(Debug, Clone)]
pub struct SimContext {
    pub tuning: Arc<VehicleTuning>,
    pub track: Arc<Track>,
}

impl SimContext {
    pub fn new(tuning: VehicleTuning, track: Track) -> Self {
        Self {
            tuning: Arc::new(tuning),
            track: Arc::new(track),
        }
    }
}

#[derive(Debug, Clone)]
pub struct World {
    context: SimContext,
    /// Sorted by `server_id`
    actors: Vec<Actor>,
    histories: BTreeMap<ActorId, InputHistory>,
    grid: SpatialGrid,
    field_bounds: Aabb,
    collision_iterations: u32,
    next_id: ActorId,
    tick: u64,
}

impl World {
    pub fn new(context: SimContext, settings: &ServerSettings) -> Self {
        Self {
            context,
            actors: Vec::new(),
            histories: BTreeMap::new(),
            grid: SpatialGrid::new(SPATIAL_CELL_SIZE),
            field_bounds: Aabb::from_center_half_extents(Vec2::ZERO, settings.asteroids.half_extents),
            collision_iterations: settings.collision_iterations.max(1),
            next_id: 1,
            tick: 0,
        }
    }

    pub fn context(&self) -> &SimContext {
        &self.context
    }

    pub fn track(&self) -> &Track {
        &self.context.track
    }

    pub fn tuning(&self) -> &VehicleTuning {
        &self.context.tuning
    }

    /// Ticks stepped so far
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.actors.iter().filter(|a| a.is_vehicle())
    }

    fn index_of(&self, id: ActorId) -> Option<usize> {
        self.actors.binary_search_by_key(&id, |a| a.server_id).ok()
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.index_of(id).map(|i| &self.actors[i])
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.index_of(id).map(move |i| &mut self.actors[i])
    }

    /// Spawn a vehicle (disabled) with an empty input history
    pub fn spawn_vehicle(&mut self, kind: ActorKind, colour_id: u8, pose: Pose) -> Option<ActorId> {
        let settings = *self.context.tuning.for_kind(kind)?;
        let id = self.next_id;
        self.next_id += 1;
        self.insert(Actor::vehicle(id, colour_id, kind, &settings, pose));
        self.histories.insert(id, InputHistory::default());
        log::debug!("Spawned {} {} at {:?}", kind.as_str(), id, pose.position);
        Some(id)
    }

    /// Generate the asteroid field clear of the racing line
    pub fn spawn_asteroids(&mut self, settings: &ServerSettings, grid_slots: usize) -> usize {
        let track = &self.context.track;
        let mut keep_clear: Vec<Vec2> = track.waypoints().iter().map(|w| w.position).collect();
        // Midpoints too, so long straights stay clear
        keep_clear.extend(
            track
                .waypoints()
                .iter()
                .map(|w| w.position + w.next_direction * (w.next_distance / 2.0)),
        );
        keep_clear.extend(track.start_grid(grid_slots).iter().map(|p| p.position));

        let asteroids = asteroid::generate_field(
            &settings.asteroids,
            settings.seed,
            self.next_id,
            &keep_clear,
            ASTEROID_TRACK_CLEARANCE.max(track.half_width()),
        );
        let count = asteroids.len();
        self.next_id += settings.asteroids.count;
        for rock in asteroids {
            self.insert(rock);
        }
        count
    }

    fn insert(&mut self, actor: Actor) {
        match self.actors.binary_search_by_key(&actor.server_id, |a| a.server_id) {
            Ok(i) => self.actors[i] = actor,
            Err(i) => self.actors.insert(i, actor),
        }
    }

    /// Remove an actor and any queued inputs for it
    pub fn despawn(&mut self, id: ActorId) -> Option<Actor> {
        self.histories.remove(&id);
        self.grid.remove(id);
        let index = self.index_of(id)?;
        Some(self.actors.remove(index))
    }

    pub fn history(&self, id: ActorId) -> Option<&InputHistory> {
        self.histories.get(&id)
    }

    pub fn history_mut(&mut self, id: ActorId) -> Option<&mut InputHistory> {
        self.histories.get_mut(&id)
    }

    /// Queue a control input; stale or duplicate timestamps are dropped
    pub fn record_input(&mut self, id: ActorId, input: Input) -> bool {
        self.histories
            .get_mut(&id)
            .is_some_and(|history| history.record_if_newer(input))
    }

    /// Timestamp of the last input applied to `id`
    pub fn last_applied_input(&self, id: ActorId) -> Option<i64> {
        self.histories.get(&id)?.last_consumed_timestamp()
    }

    /// Actors whose bounds overlap `area`, as of the last step
    pub fn query(&self, area: Aabb) -> Vec<ActorId> {
        self.grid.query(area)
    }

    /// Advance the world by one fixed tick
    pub fn step(&mut self, dt: f32) {
        for actor in &mut self.actors {
            actor.collision_flags = 0;
        }

        let tuning = Arc::clone(&self.context.tuning);
        for actor in &mut self.actors {
            if actor.is_vehicle() {
                let (Some(settings), Some(history)) =
                    (tuning.for_kind(actor.kind), self.histories.get_mut(&actor.server_id))
                else {
                    continue;
                };
                vehicle::integrate_history(actor, settings, history, dt);
            } else {
                asteroid::integrate(actor, dt, &self.field_bounds);
            }
        }

        for _ in 0..self.collision_iterations {
            self.rebuild_grid();
            for (lo, hi) in self.grid.candidate_pairs() {
                let (Some(i), Some(j)) = (self.index_of(lo), self.index_of(hi)) else {
                    continue;
                };
                let (head, tail) = self.actors.split_at_mut(j);
                resolve_pair(&mut head[i], &mut tail[0]);
            }
        }
        self.rebuild_grid();

        self.tick += 1;
    }

    fn rebuild_grid(&mut self) {
        self.grid.clear();
        for actor in self.actors.iter().filter(|a| a.is_active()) {
            self.grid.insert(actor.server_id, actor.bounds());
        }
    }
}

fn contact_flag(other: &Actor) -> u8 {
    if other.is_vehicle() {
        collision_flags::VEHICLE
    } else {
        collision_flags::ASTEROID
    }
}

/// Resolve one candidate pair; `a` has the lower id
fn resolve_pair(a: &mut Actor, b: &mut Actor) -> bool {
    let touched = match (a.world_polygon(), b.world_polygon()) {
        (Some(poly_a), Some(poly_b)) => {
            let Some(manifold) = intersect_polygons(&poly_a, &poly_b) else {
                return false;
            };
            let separation = a.position.distance(b.position);
            if separation < TUNNEL_EPSILON || manifold.penetration > a.radius.min(b.radius) {
                evict(a, b, separation);
            } else {
                let (mass_a, mass_b) = (
                    mass_for_radius(a.density, a.radius),
                    mass_for_radius(b.density, b.radius),
                );
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
            }
            true
        }
        _ => asteroid::resolve_circles(a, b),
    };

    if touched {
        a.collision_flags |= contact_flag(b);
        b.collision_flags |= contact_flag(a);
    }
    touched
}

/// Push the prior occupant `a` out along the newcomer's forward axis
fn evict(a: &mut Actor, b: &Actor, separation: f32) {
    let depth = (a.radius + b.radius - separation).max(0.0);
    log::warn!(
        "Vehicle {} tunneled into {} (separation {:.3}), evicting {} by {:.1}",
        b.server_id,
        a.server_id,
        separation,
        a.server_id,
        depth
    );
    a.position += forward_vector(b.rotation) * depth;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::settings::AsteroidField;
    use crate::sim::actor::StateFlags;
    use crate::sim::input::InputFlags;
    use crate::sim::track::MapDescriptor;

    fn world() -> World {
        let track = Track::from_descriptor(&MapDescriptor::oval(Vec2::new(800.0, 500.0), 16, 160.0))
            .unwrap();
        World::new(
            SimContext::new(VehicleTuning::default(), track),
            &ServerSettings::default(),
        )
    }

    #[test]
    fn test_actors_stay_sorted_by_id() {
        let mut world = world();
        let a = world.spawn_vehicle(ActorKind::Car, 0, Pose::default()).unwrap();
        let b = world.spawn_vehicle(ActorKind::Bike, 1, Pose::default()).unwrap();
        assert!(world.spawn_vehicle(ActorKind::Asteroid, 0, Pose::default()).is_none());
        assert!(a < b);

        world.despawn(a);
        assert!(world.actor(a).is_none());
        assert!(world.history(a).is_none());
        assert!(!world.record_input(a, Input::new(1, InputFlags::empty())));
        let ids: Vec<ActorId> = world.actors().iter().map(|x| x.server_id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn test_step_consumes_inputs() {
        let mut world = world();
        let id = world.spawn_vehicle(ActorKind::Car, 0, Pose::default()).unwrap();
        world.actor_mut(id).unwrap().state = StateFlags::normal();

        for ts in 1..=3 {
            assert!(world.record_input(id, Input::new(ts, InputFlags::from_bits(InputFlags::ACCELERATE))));
        }
        assert!(!world.record_input(id, Input::new(2, InputFlags::empty())));
        world.step(SIM_DT);

        assert!(world.actor(id).unwrap().position.x > 0.0);
        assert_eq!(world.last_applied_input(id), Some(3));
        assert_eq!(world.history(id).unwrap().pending(), 0);
        assert_eq!(world.tick(), 1);
    }

    #[test]
    fn test_overlapping_vehicles_are_pushed_apart() {
        let mut world = world();
        let a = world.spawn_vehicle(ActorKind::Car, 0, Pose::default()).unwrap();
        let b = world
            .spawn_vehicle(
                ActorKind::Car,
                1,
                Pose {
                    position: Vec2::new(0.0, 12.0),
                    rotation: 0.0,
                },
            )
            .unwrap();

        world.step(SIM_DT);
        let (pa, pb) = (world.actor(a).unwrap(), world.actor(b).unwrap());
        assert!(pb.position.y - pa.position.y >= 16.0 - 1e-3);
        assert_ne!(pa.collision_flags & collision_flags::VEHICLE, 0);
        assert_ne!(pb.collision_flags & collision_flags::VEHICLE, 0);
    }

    #[test]
    fn test_stacked_vehicles_are_evicted_forward() {
        let mut world = world();
        let a = world.spawn_vehicle(ActorKind::Car, 0, Pose::default()).unwrap();
        let b = world.spawn_vehicle(ActorKind::Car, 1, Pose::default()).unwrap();

        world.step(SIM_DT);
        let (pa, pb) = (world.actor(a).unwrap(), world.actor(b).unwrap());
        assert!(pa.position.x > 0.0);
        assert_eq!(pb.position, Vec2::ZERO);
    }

    #[test]
    fn test_asteroid_field_spawns_clear_of_track() {
        let mut world = world();
        let settings = ServerSettings {
            asteroids: AsteroidField {
                count: 10,
                ..AsteroidField::default()
            },
            ..ServerSettings::default()
        };
        let spawned = world.spawn_asteroids(&settings, 4);
        assert_eq!(world.actors().len(), spawned);

        let vehicle = world.spawn_vehicle(ActorKind::Car, 0, Pose::default()).unwrap();
        assert!(world.actors().iter().all(|a| a.is_vehicle() || a.server_id < vehicle));

        for _ in 0..60 {
            world.step(SIM_DT);
        }
        let bounds = Aabb::from_center_half_extents(Vec2::ZERO, settings.asteroids.half_extents);
        for rock in world.actors().iter().filter(|a| !a.is_vehicle()) {
            assert!(bounds.contains_point(rock.position));
        }
    }
}
