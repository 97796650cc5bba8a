//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only
//! - Stable iteration order (by actor ID)
//! - No network or platform dependencies

pub mod actor;
pub mod asteroid;
pub mod cpu;
pub mod events;
pub mod geometry;
pub mod input;
pub mod race;
pub mod spatial;
pub mod ticker;
pub mod track;
pub mod vehicle;
pub mod world;

pub use actor::{Actor, ActorId, ActorKind, Pose, Shape, StateFlags, collision_flags};
pub use cpu::CpuDriver;
pub use events::{EventQueue, EventSubscriber, RaceEvent, Standing};
pub use geometry::{CollisionGeometry, GeometryError, Manifold, intersect_circles, intersect_polygons};
pub use input::{Input, InputFlags, InputHistory};
pub use race::{PlayerProgress, RacePhase, RaceSession};
pub use spatial::{Aabb, SpatialGrid};
pub use ticker::FixedTicker;
pub use track::{MapDescriptor, MapLayer, MapObject, ObjectShape, Track, TrackError, WayPoint};
pub use world::{SimContext, World};
