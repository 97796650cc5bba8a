//! Simulated bodies: vehicles and asteroids

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::geometry::{CollisionGeometry, WorldPolygon, mass_for_radius};
use super::spatial::Aabb;
use crate::settings::VehicleSettings;

/// Server-assigned actor identity
pub type ActorId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Car,
    Bike,
    Ship,
    Asteroid,
}

impl ActorKind {
    pub fn is_vehicle(&self) -> bool {
        !matches!(self, ActorKind::Asteroid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Car => "Car",
            ActorKind::Bike => "Bike",
            ActorKind::Ship => "Ship",
            ActorKind::Asteroid => "Asteroid",
        }
    }
}

/// Actor state bitfield
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFlags {
    pub bits: u8,
}

impl StateFlags {
    pub const NORMAL: u8 = 0;
    pub const DISABLED: u8 = 1 << 0;
    pub const CELEBRATING: u8 = 1 << 1;
    pub const ELIMINATED: u8 = 1 << 2;

    pub const fn from_bits(bits: u8) -> Self {
        Self { bits }
    }

    pub const fn normal() -> Self {
        Self { bits: Self::NORMAL }
    }

    #[inline]
    pub const fn contains(&self, flag: u8) -> bool {
        self.bits & flag != 0
    }

    #[inline]
    pub const fn is_normal(&self) -> bool {
        self.bits == Self::NORMAL
    }

    #[inline]
    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.bits |= flag;
        } else {
            self.bits &= !flag;
        }
    }

    /// Whether control input should steer this actor
    #[inline]
    pub const fn accepts_control(&self) -> bool {
        !self.contains(Self::DISABLED | Self::CELEBRATING | Self::ELIMINATED)
    }
}

/// Collision flags reported back to the owning client
pub mod collision_flags {
    pub const VEHICLE: u8 = 1 << 0;
    pub const ASTEROID: u8 = 1 << 1;
    pub const BOUNDARY: u8 = 1 << 2;
}

/// Collision shape of an actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Polygon(CollisionGeometry),
    Circle { radius: f32 },
}

/// Position, heading and orientation needed to place an actor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec2,
    pub rotation: f32,
}

/// A simulated body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub server_id: ActorId,
    pub colour_id: u8,
    pub kind: ActorKind,
    pub position: Vec2,
    /// Heading in radians (0 = +X)
    pub rotation: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
    pub state: StateFlags,
    pub shape: Shape,
    /// Bounding circle radius (broad phase, circle fallback, mass)
    pub radius: f32,
    pub density: f32,
    /// Contacts touched during the last step
    #[serde(default)]
    pub collision_flags: u8,
}

impl Actor {
    /// Spawn a vehicle, disabled until the race starts
    pub fn vehicle(
        server_id: ActorId,
        colour_id: u8,
        kind: ActorKind,
        settings: &VehicleSettings,
        pose: Pose,
    ) -> Self {
        let hull = CollisionGeometry::rectangle(settings.length, settings.width);
        Self {
            server_id,
            colour_id,
            kind,
            position: pose.position,
            rotation: pose.rotation,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            state: StateFlags::from_bits(StateFlags::DISABLED),
            radius: hull.bounding_radius(),
            shape: Shape::Polygon(hull),
            density: settings.density,
            collision_flags: 0,
        }
    }

    pub fn asteroid(
        server_id: ActorId,
        position: Vec2,
        velocity: Vec2,
        angular_velocity: f32,
        radius: f32,
        density: f32,
    ) -> Self {
        Self {
            server_id,
            colour_id: 0,
            kind: ActorKind::Asteroid,
            position,
            rotation: 0.0,
            velocity,
            angular_velocity,
            state: StateFlags::normal(),
            shape: Shape::Circle { radius },
            radius,
            density,
            collision_flags: 0,
        }
    }

    pub fn is_vehicle(&self) -> bool {
        self.kind.is_vehicle()
    }

    /// Eliminated actors take no part in physics
    pub fn is_active(&self) -> bool {
        !self.state.contains(StateFlags::ELIMINATED)
    }

    pub fn mass(&self) -> f32 {
        mass_for_radius(self.density, self.radius)
    }

    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation,
        }
    }

    /// Place the actor and zero its motion
    pub fn respawn_at(&mut self, pose: Pose) {
        self.position = pose.position;
        self.rotation = pose.rotation;
        self.velocity = Vec2::ZERO;
        self.angular_velocity = 0.0;
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_circle(self.position, self.radius)
    }

    /// World-space hull, if the actor has one
    pub fn world_polygon(&self) -> Option<WorldPolygon> {
        match &self.shape {
            Shape::Polygon(geometry) => Some(geometry.to_world(self.position, self.rotation)),
            Shape::Circle { .. } => None,
        }
    }
}
