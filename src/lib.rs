//! Space Racers - networked vehicle racing simulation core
//!
//! Core modules:
//! - `sim`: Deterministic simulation (integrators, collisions, track, race session)
//! - `net`: Message contracts, dead reckoning and client reconciliation
//! - `server`: Authoritative server session and its async runner
//! - `client`: Client session (local prediction + remote extrapolation)
//! - `settings`: Data-driven vehicle tuning and server settings

pub mod client;
pub mod net;
pub mod server;
pub mod settings;
pub mod sim;

pub use settings::{ServerSettings, SettingsError, VehicleSettings, VehicleTuning};

use glam::Vec2;

/// Simulation configuration constants
pub mod consts {
    /// Simulation tick rate (physics and race state machine)
    pub const SIM_HZ: f32 = 60.0;
    /// Fixed simulation timestep
    pub const SIM_DT: f32 = 1.0 / SIM_HZ;
    /// Network snapshot rate
    pub const NET_HZ: f32 = 10.0;
    /// Maximum fixed steps a ticker runs per call; the rest stays accumulated
    pub const MAX_CATCH_UP_STEPS: u32 = 8;

    /// Slots in each actor's input history (2 seconds at 60 Hz)
    pub const INPUT_HISTORY_CAPACITY: usize = 120;

    /// Race defaults
    pub const DEFAULT_LAP_COUNT: u32 = 3;
    pub const COUNTDOWN_SECS: f32 = 3.0;
    /// Time allowed to the rest of the field after the first finisher
    pub const FINISH_TIMEOUT_SECS: f32 = 60.0;
    pub const RESPAWN_DELAY_SECS: f32 = 1.0;
    pub const RESPAWN_INVINCIBILITY_SECS: f32 = 2.0;
    /// Total pause time allowed per session before play resumes on its own
    pub const PAUSE_BUDGET_SECS: f32 = 30.0;

    /// Rotation responsiveness floor at standstill (see vehicle integrator)
    pub const MIN_ROTATION_MULTIPLIER: f32 = 0.1;

    /// Reconciliation thresholds
    pub const RECONCILIATION_THRESHOLD: f32 = 4.0;
    pub const VELOCITY_THRESHOLD: f32 = 40.0;

    /// Broad-phase cell size (world units)
    pub const SPATIAL_CELL_SIZE: f32 = 128.0;
}

/// Normalized angle to [-π, π)
#[inline]
pub fn normalize_angle(mut angle: f32) -> f32 {
    use std::f32::consts::PI;
    while angle >= PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Unit forward vector for a rotation in radians (0 = +X, counter-clockwise)
#[inline]
pub fn forward_vector(rotation: f32) -> Vec2 {
    Vec2::new(rotation.cos(), rotation.sin())
}

/// Rotate a local-space vector into world space
#[inline]
pub fn rotate_vec(v: Vec2, rotation: f32) -> Vec2 {
    Vec2::from_angle(rotation).rotate(v)
}
