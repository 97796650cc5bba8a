//! Vehicle tuning and server settings
//!
//! Loaded once from JSON at startup and shared read-only afterwards. Every
//! field has a default so a settings file only needs the values it overrides.

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::*;
use crate::sim::actor::ActorKind;

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Immutable per-vehicle-kind tuning
///
/// Units are per logical tick: `acceleration` is the velocity delta added per
/// tick while accelerating, `turn_speed` the angular velocity delta per tick.
/// `drag` and `angular_drag` are multiplicative per-tick retention factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleSettings {
    pub angular_drag: f32,
    pub turn_speed: f32,
    pub drag: f32,
    pub acceleration: f32,
    pub brake_strength: f32,
    /// Hull length along the forward axis
    #[serde(default = "default_hull_length")]
    pub length: f32,
    /// Hull width across the forward axis
    #[serde(default = "default_hull_width")]
    pub width: f32,
    #[serde(default = "default_density")]
    pub density: f32,
}

fn default_hull_length() -> f32 {
    32.0
}

fn default_hull_width() -> f32 {
    16.0
}

fn default_density() -> f32 {
    1.0
}

impl VehicleSettings {
    /// Terminal speed of the drag recurrence `v' = (v + a) * drag`
    ///
    /// The geometric series of the recurrence converges to
    /// `drag * acceleration / (1 - drag)`.
    pub fn max_speed(&self) -> f32 {
        self.drag * self.acceleration / (1.0 - self.drag)
    }

    /// Radius of the circle enclosing the hull
    pub fn bounding_radius(&self) -> f32 {
        Vec2::new(self.length, self.width).length() / 2.0
    }

    fn validate(&self, name: &'static str) -> Result<(), SettingsError> {
        if !(self.drag > 0.0 && self.drag < 1.0) {
            return Err(SettingsError::Invalid {
                field: name,
                reason: format!("drag must be in (0, 1), got {}", self.drag),
            });
        }
        if !(0.0..1.0).contains(&self.angular_drag) {
            return Err(SettingsError::Invalid {
                field: name,
                reason: format!("angular_drag must be in [0, 1), got {}", self.angular_drag),
            });
        }
        if self.acceleration <= 0.0 || self.turn_speed < 0.0 || self.brake_strength < 0.0 {
            return Err(SettingsError::Invalid {
                field: name,
                reason: "acceleration must be positive, turn_speed and brake_strength non-negative"
                    .into(),
            });
        }
        if self.length <= 0.0 || self.width <= 0.0 || self.density <= 0.0 {
            return Err(SettingsError::Invalid {
                field: name,
                reason: "hull dimensions and density must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Tuning table for every vehicle kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleTuning {
    pub car: VehicleSettings,
    pub bike: VehicleSettings,
    pub ship: VehicleSettings,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            car: VehicleSettings {
                angular_drag: 0.8,
                turn_speed: 0.9,
                drag: 0.97,
                acceleration: 6.0,
                brake_strength: 0.6,
                length: 32.0,
                width: 16.0,
                density: 1.0,
            },
            bike: VehicleSettings {
                angular_drag: 0.78,
                turn_speed: 1.1,
                drag: 0.965,
                acceleration: 7.0,
                brake_strength: 0.7,
                length: 26.0,
                width: 10.0,
                density: 0.8,
            },
            ship: VehicleSettings {
                angular_drag: 0.82,
                turn_speed: 0.8,
                drag: 0.975,
                acceleration: 5.5,
                brake_strength: 0.4,
                length: 36.0,
                width: 24.0,
                density: 1.2,
            },
        }
    }
}

impl VehicleTuning {
    /// Settings for a vehicle kind (`None` for asteroids)
    pub fn for_kind(&self, kind: ActorKind) -> Option<&VehicleSettings> {
        match kind {
            ActorKind::Car => Some(&self.car),
            ActorKind::Bike => Some(&self.bike),
            ActorKind::Ship => Some(&self.ship),
            ActorKind::Asteroid => None,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.car.validate("tuning.car")?;
        self.bike.validate("tuning.bike")?;
        self.ship.validate("tuning.ship")?;
        Ok(())
    }
}

/// Session game mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    /// First to complete the lap count wins
    #[default]
    Race,
    /// Trailing actors outside the leader's view are knocked out
    Elimination,
    /// Lap times are the result; usually a single racer
    TimeTrial,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Race => "Race",
            GameMode::Elimination => "Elimination",
            GameMode::TimeTrial => "TimeTrial",
        }
    }
}

/// Ambient hazard generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsteroidField {
    pub count: u32,
    pub min_radius: f32,
    pub max_radius: f32,
    pub max_speed: f32,
    pub density: f32,
    /// Half extents of the region asteroids bounce within, centred on the origin
    pub half_extents: Vec2,
}

impl Default for AsteroidField {
    fn default() -> Self {
        Self {
            count: 0,
            min_radius: 10.0,
            max_radius: 30.0,
            max_speed: 40.0,
            density: 0.5,
            half_extents: Vec2::new(1500.0, 1500.0),
        }
    }
}

/// Server session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Seed for asteroid generation
    pub seed: u64,
    pub sim_hz: f32,
    pub net_hz: f32,
    pub mode: GameMode,
    pub lap_count: u32,
    pub countdown_secs: f32,
    pub finish_timeout_secs: f32,
    pub respawn_delay_secs: f32,
    pub respawn_invincibility_secs: f32,
    /// Total seconds the race may spend paused
    pub pause_budget_secs: f32,
    pub elimination_points_to_win: u32,
    /// Half extents of the authoritative camera view used by elimination
    pub elimination_view_half_extents: Vec2,
    /// Pairwise collision passes per step (1 = single sequential pass)
    pub collision_iterations: u32,
    pub max_players: usize,
    pub asteroids: AsteroidField,
    pub tuning: VehicleTuning,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            sim_hz: SIM_HZ,
            net_hz: NET_HZ,
            mode: GameMode::Race,
            lap_count: DEFAULT_LAP_COUNT,
            countdown_secs: COUNTDOWN_SECS,
            finish_timeout_secs: FINISH_TIMEOUT_SECS,
            respawn_delay_secs: RESPAWN_DELAY_SECS,
            respawn_invincibility_secs: RESPAWN_INVINCIBILITY_SECS,
            pause_budget_secs: PAUSE_BUDGET_SECS,
            elimination_points_to_win: 3,
            elimination_view_half_extents: Vec2::new(640.0, 360.0),
            collision_iterations: 1,
            max_players: 8,
            asteroids: AsteroidField::default(),
            tuning: VehicleTuning::default(),
        }
    }
}

impl ServerSettings {
    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sim_hz <= 0.0 || self.net_hz <= 0.0 {
            return Err(SettingsError::Invalid {
                field: "sim_hz/net_hz",
                reason: "tick rates must be positive".into(),
            });
        }
        if self.lap_count == 0 {
            return Err(SettingsError::Invalid {
                field: "lap_count",
                reason: "at least one lap is required".into(),
            });
        }
        if self.collision_iterations == 0 {
            return Err(SettingsError::Invalid {
                field: "collision_iterations",
                reason: "at least one collision pass is required".into(),
            });
        }
        let field = &self.asteroids;
        if field.count > 0 && !(field.min_radius > 0.0 && field.min_radius <= field.max_radius) {
            return Err(SettingsError::Invalid {
                field: "asteroids",
                reason: "radius range must be positive and ordered".into(),
            });
        }
        if field.count > 0
            && !(field.half_extents.x > field.max_radius && field.half_extents.y > field.max_radius)
        {
            return Err(SettingsError::Invalid {
                field: "asteroids.half_extents",
                reason: format!(
                    "field {:?} must be wider than max_radius {} on both axes",
                    field.half_extents, field.max_radius
                ),
            });
        }
        if !(field.max_speed >= 0.0 && field.max_speed.is_finite()) {
            return Err(SettingsError::Invalid {
                field: "asteroids.max_speed",
                reason: "speed must be finite and non-negative".into(),
            });
        }
        self.tuning.validate()
    }

    pub fn sim_dt(&self) -> f32 {
        1.0 / self.sim_hz
    }

    pub fn net_dt(&self) -> f32 {
        1.0 / self.net_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ServerSettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = ServerSettings::from_json(r#"{ "lap_count": 5, "mode": "Elimination" }"#)
            .expect("valid settings");
        assert_eq!(settings.lap_count, 5);
        assert_eq!(settings.mode, GameMode::Elimination);
        assert_eq!(settings.countdown_secs, COUNTDOWN_SECS);
        assert_eq!(settings.tuning, VehicleTuning::default());
    }

    #[test]
    fn test_invalid_drag_rejected() {
        let json = r#"{ "tuning": { "car": {
            "angular_drag": 0.8, "turn_speed": 0.9, "drag": 1.0,
            "acceleration": 6.0, "brake_strength": 0.5 } } }"#;
        let err = ServerSettings::from_json(json).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "tuning.car", .. }));
    }

    #[test]
    fn test_asteroid_field_smaller_than_rocks_rejected() {
        let json = r#"{ "asteroids": { "count": 3, "min_radius": 10, "max_radius": 30,
            "half_extents": [20, 20] } }"#;
        let err = ServerSettings::from_json(json).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "asteroids.half_extents", .. }));
    }

    #[test]
    fn test_negative_asteroid_speed_rejected() {
        let json = r#"{ "asteroids": { "count": 3, "max_speed": -5 } }"#;
        let err = ServerSettings::from_json(json).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "asteroids.max_speed", .. }));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = ServerSettings::from_json("{ lap_count: ").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_max_speed_formula() {
        let car = VehicleTuning::default().car;
        let expected = 0.97 * 6.0 / (1.0 - 0.97);
        assert!((car.max_speed() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_asteroids_have_no_vehicle_settings() {
        let tuning = VehicleTuning::default();
        assert!(tuning.for_kind(ActorKind::Asteroid).is_none());
        assert_eq!(tuning.for_kind(ActorKind::Bike), Some(&tuning.bike));
    }
}
