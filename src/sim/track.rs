//! Track: waypoint ring built from a tile-map object export
//!
//! The map loader collaborator hands over a [`MapDescriptor`] (layers of
//! named objects). Waypoints come from the `"waypoints"` layer, the start
//! grid is anchored on the single `"finish"` object. Everything is validated
//! up front; a track is either fully built or not built at all.

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::actor::Pose;

pub const WAYPOINT_LAYER: &str = "waypoints";
pub const FINISH_KIND: &str = "finish";

const MIN_WAYPOINTS: usize = 3;
const GRID_ROW_SPACING: f32 = 56.0;
const GRID_COLUMN_SPACING: f32 = 40.0;

fn default_half_width() -> f32 {
    160.0
}

/// Track load failures
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to read map: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse map: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("map has no `{0}` layer")]
    MissingLayer(&'static str),

    #[error("track needs at least 3 waypoints, found {0}")]
    TooFewWaypoints(usize),

    #[error("waypoint name `{0}` is not a numeric id")]
    InvalidWaypointId(String),

    #[error("waypoint {0} is defined more than once")]
    DuplicateWaypoint(u32),

    #[error("waypoint ids must be contiguous: expected {expected}, found {found}")]
    WaypointGap { expected: u32, found: u32 },

    #[error("waypoint {id} must be a point, found {shape:?}")]
    WaypointShape { id: u32, shape: ObjectShape },

    #[error("waypoint {0} coincides with the next waypoint")]
    DegenerateSegment(u32),

    #[error("map has no finish marker")]
    MissingFinish,

    #[error("map has {0} finish markers, expected exactly one")]
    MultipleFinish(usize),
}

/// Shape of a map object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectShape {
    #[default]
    Point,
    Rectangle,
    Polygon,
    Ellipse,
}

/// One object of a map layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub shape: ObjectShape,
}

impl MapObject {
    pub fn point(name: impl Into<String>, position: Vec2) -> Self {
        Self {
            name: name.into(),
            kind: String::new(),
            x: position.x,
            y: position.y,
            shape: ObjectShape::Point,
        }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayer {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<MapObject>,
}

/// Map export as handed over by the tile-map loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDescriptor {
    /// Distance from the racing line beyond which a vehicle falls off
    #[serde(default = "default_half_width")]
    pub track_half_width: f32,
    #[serde(default)]
    pub layers: Vec<MapLayer>,
}

impl MapDescriptor {
    /// Elliptical circuit with evenly spaced waypoints, finish on waypoint 0
    pub fn oval(radii: Vec2, waypoint_count: u32, half_width: f32) -> Self {
        let waypoints = (0..waypoint_count)
            .map(|i| {
                let angle = i as f32 / waypoint_count as f32 * std::f32::consts::TAU;
                let position = Vec2::new(radii.x * angle.cos(), radii.y * angle.sin());
                MapObject::point(i.to_string(), position)
            })
            .collect();
        let finish = MapObject {
            kind: FINISH_KIND.into(),
            ..MapObject::point("finish", Vec2::new(radii.x, 0.0))
        };
        Self {
            track_half_width: half_width,
            layers: vec![
                MapLayer {
                    name: WAYPOINT_LAYER.into(),
                    objects: waypoints,
                },
                MapLayer {
                    name: "markers".into(),
                    objects: vec![finish],
                },
            ],
        }
    }
}

/// Track checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WayPoint {
    pub id: u32,
    pub position: Vec2,
    /// Heading of a vehicle respawned here (towards the next waypoint)
    pub spawn_rotation: f32,
    /// Unit vector towards the next waypoint
    pub next_direction: Vec2,
    pub next_distance: f32,
    /// Distance from the start line along the ring
    pub track_distance: f32,
}

impl WayPoint {
    pub fn spawn_pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.spawn_rotation,
        }
    }
}

/// Validated, read-only waypoint ring
#[derive(Debug, Clone)]
pub struct Track {
    waypoints: Vec<WayPoint>,
    length: f32,
    half_width: f32,
    finish: Vec2,
}

impl Track {
    /// Load a map export from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let track = Self::from_json(&json)?;
        log::info!(
            "Loaded track {} ({} waypoints, length {:.0})",
            path.display(),
            track.len(),
            track.track_length()
        );
        Ok(track)
    }

    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        let descriptor: MapDescriptor = serde_json::from_str(json)?;
        Self::from_descriptor(&descriptor)
    }

    pub fn from_descriptor(descriptor: &MapDescriptor) -> Result<Self, TrackError> {
        let layer = descriptor
            .layers
            .iter()
            .find(|l| l.name == WAYPOINT_LAYER)
            .ok_or(TrackError::MissingLayer(WAYPOINT_LAYER))?;

        let mut points = Vec::with_capacity(layer.objects.len());
        for object in &layer.objects {
            let id: u32 = object
                .name
                .trim()
                .parse()
                .map_err(|_| TrackError::InvalidWaypointId(object.name.clone()))?;
            if object.shape != ObjectShape::Point {
                return Err(TrackError::WaypointShape {
                    id,
                    shape: object.shape,
                });
            }
            points.push((id, object.position()));
        }
        if points.len() < MIN_WAYPOINTS {
            return Err(TrackError::TooFewWaypoints(points.len()));
        }

        // Stable: equal ids keep map order, and are rejected just below
        points.sort_by_key(|(id, _)| *id);
        if points[0].0 != 0 {
            return Err(TrackError::WaypointGap {
                expected: 0,
                found: points[0].0,
            });
        }
        for (expected, window) in points.windows(2).enumerate() {
            if window[0].0 == window[1].0 {
                return Err(TrackError::DuplicateWaypoint(window[0].0));
            }
            let expected = expected as u32 + 1;
            if window[1].0 != expected {
                return Err(TrackError::WaypointGap {
                    expected,
                    found: window[1].0,
                });
            }
        }

        let finishes: Vec<&MapObject> = descriptor
            .layers
            .iter()
            .flat_map(|l| l.objects.iter())
            .filter(|o| o.kind == FINISH_KIND)
            .collect();
        let finish = match finishes.as_slice() {
            [] => return Err(TrackError::MissingFinish),
            [one] => one.position(),
            many => return Err(TrackError::MultipleFinish(many.len())),
        };

        let count = points.len();
        let mut waypoints = Vec::with_capacity(count);
        let mut distance = 0.0;
        for (i, (id, position)) in points.iter().enumerate() {
            let next = points[(i + 1) % count].1;
            let delta = next - *position;
            let next_distance = delta.length();
            if next_distance <= f32::EPSILON {
                return Err(TrackError::DegenerateSegment(*id));
            }
            let next_direction = delta / next_distance;
            waypoints.push(WayPoint {
                id: *id,
                position: *position,
                spawn_rotation: next_direction.y.atan2(next_direction.x),
                next_direction,
                next_distance,
                track_distance: distance,
            });
            distance += next_distance;
        }

        Ok(Self {
            waypoints,
            length: distance,
            half_width: descriptor.track_half_width.max(1.0),
            finish,
        })
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[WayPoint] {
        &self.waypoints
    }

    /// Waypoint by id, wrapping around the ring
    pub fn waypoint(&self, id: u32) -> &WayPoint {
        &self.waypoints[id as usize % self.waypoints.len()]
    }

    pub fn next_id(&self, id: u32) -> u32 {
        ((id as usize + 1) % self.waypoints.len()) as u32
    }

    /// Total ring length, the sum of every `next_distance`
    pub fn track_length(&self) -> f32 {
        self.length
    }

    pub fn half_width(&self) -> f32 {
        self.half_width
    }

    pub fn finish_position(&self) -> Vec2 {
        self.finish
    }

    /// Distance travelled along the segment leaving `id`, clamped to it
    pub fn segment_progress(&self, id: u32, position: Vec2) -> f32 {
        let wp = self.waypoint(id);
        (position - wp.position)
            .dot(wp.next_direction)
            .clamp(0.0, wp.next_distance)
    }

    /// Distance from the start line: `track_distance + segment projection`
    pub fn progress(&self, id: u32, position: Vec2) -> f32 {
        self.waypoint(id).track_distance + self.segment_progress(id, position)
    }

    /// Distance from the segment leaving `id`
    pub fn distance_from_segment(&self, id: u32, position: Vec2) -> f32 {
        let wp = self.waypoint(id);
        let closest = wp.position + wp.next_direction * self.segment_progress(id, position);
        closest.distance(position)
    }

    /// Whether `position` is too far from the segment leaving `id`
    pub fn is_off_track(&self, id: u32, position: Vec2) -> bool {
        self.distance_from_segment(id, position) > self.half_width
    }

    /// Point `distance` further along the ring from `position`'s projection
    /// onto the segment leaving `id`
    pub fn point_ahead(&self, id: u32, position: Vec2, distance: f32) -> Vec2 {
        let mut id = id;
        let mut along = self.segment_progress(id, position);
        let mut remaining = distance.max(0.0);
        for _ in 0..=self.waypoints.len() {
            let wp = self.waypoint(id);
            let left_on_segment = wp.next_distance - along;
            if remaining <= left_on_segment {
                return wp.position + wp.next_direction * (along + remaining);
            }
            remaining -= left_on_segment;
            id = self.next_id(id);
            along = 0.0;
        }
        self.waypoint(id).position
    }

    /// Segment closest to `position` (lowest id on ties)
    pub fn closest_segment(&self, position: Vec2) -> u32 {
        let mut best = (0, f32::INFINITY);
        for wp in &self.waypoints {
            let d = self.distance_from_segment(wp.id, position);
            if d < best.1 {
                best = (wp.id, d);
            }
        }
        best.0
    }

    /// Advance `current` past every waypoint the position has reached
    ///
    /// Returns the new waypoint and how many times waypoint 0 was passed.
    pub fn advance(&self, mut current: u32, position: Vec2) -> (u32, u32) {
        let mut line_crossings = 0;
        for _ in 0..self.waypoints.len() {
            let wp = self.waypoint(current);
            let along = (position - wp.position).dot(wp.next_direction);
            if along < wp.next_distance {
                break;
            }
            // Only step to the next waypoint when the vehicle is near it
            let next = self.next_id(current);
            if self.distance_from_segment(next, position) > self.half_width * 2.0 {
                break;
            }
            current = next;
            if current == 0 {
                line_crossings += 1;
            }
        }
        (current, line_crossings)
    }

    /// `count` staggered spawn poses behind the finish marker, two per row
    pub fn start_grid(&self, count: usize) -> Vec<Pose> {
        let segment = self.closest_segment(self.finish);
        self.grid_behind(self.finish, self.waypoint(segment).next_direction, count)
    }

    /// `count` staggered spawn poses behind waypoint `id`
    pub fn respawn_grid(&self, id: u32, count: usize) -> Vec<Pose> {
        let wp = self.waypoint(id);
        // First row sits on the waypoint itself so nobody lands on the previous segment
        let anchor = wp.position + wp.next_direction * GRID_ROW_SPACING;
        self.grid_behind(anchor, wp.next_direction, count)
    }

    fn grid_behind(&self, anchor: Vec2, heading: Vec2, count: usize) -> Vec<Pose> {
        let rotation = heading.y.atan2(heading.x);
        let right = heading.perp();
        let column_offset = (GRID_COLUMN_SPACING / 2.0).min(self.half_width / 2.0);

        (0..count)
            .map(|slot| {
                let row = (slot / 2) as f32 + 1.0;
                let side = if slot % 2 == 0 { -1.0 } else { 1.0 };
                Pose {
                    position: anchor - heading * (row * GRID_ROW_SPACING)
                        + right * (side * column_offset),
                    rotation,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_descriptor() -> MapDescriptor {
        let corners = [
            ("2", Vec2::new(100.0, 100.0)),
            ("0", Vec2::new(0.0, 0.0)),
            ("3", Vec2::new(0.0, 100.0)),
            ("1", Vec2::new(100.0, 0.0)),
        ];
        MapDescriptor {
            track_half_width: 30.0,
            layers: vec![
                MapLayer {
                    name: WAYPOINT_LAYER.into(),
                    objects: corners.iter().map(|(n, p)| MapObject::point(*n, *p)).collect(),
                },
                MapLayer {
                    name: "objects".into(),
                    objects: vec![MapObject {
                        kind: FINISH_KIND.into(),
                        ..MapObject::point("", Vec2::new(10.0, 0.0))
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_waypoints_sorted_and_linked() {
        let track = Track::from_descriptor(&square_descriptor()).unwrap();
        let ids: Vec<u32> = track.waypoints().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let distances: Vec<f32> = track.waypoints().iter().map(|w| w.track_distance).collect();
        assert_eq!(distances, vec![0.0, 100.0, 200.0, 300.0]);
        assert!(distances.windows(2).all(|w| w[0] < w[1]));

        let last = track.waypoint(3);
        assert!((last.next_direction - Vec2::new(0.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn test_length_round_trip() {
        let track = Track::from_descriptor(&MapDescriptor::oval(Vec2::new(900.0, 500.0), 24, 150.0))
            .unwrap();
        let sum: f32 = track.waypoints().iter().map(|w| w.next_distance).sum();
        assert!((sum - track.track_length()).abs() < 1e-2);
        let last = track.waypoints().last().unwrap();
        assert!((last.track_distance + last.next_distance - track.track_length()).abs() < 1e-2);
    }

    #[test]
    fn test_missing_layer() {
        let mut descriptor = square_descriptor();
        descriptor.layers.remove(0);
        assert!(matches!(
            Track::from_descriptor(&descriptor),
            Err(TrackError::MissingLayer(WAYPOINT_LAYER))
        ));
    }

    #[test]
    fn test_gap_and_duplicate_rejected() {
        let mut gap = square_descriptor();
        gap.layers[0].objects[0].name = "5".into();
        assert!(matches!(
            Track::from_descriptor(&gap),
            Err(TrackError::WaypointGap { expected: 2, found: 3 })
        ));

        let mut duplicate = square_descriptor();
        duplicate.layers[0].objects[0].name = "1".into();
        assert!(matches!(
            Track::from_descriptor(&duplicate),
            Err(TrackError::DuplicateWaypoint(1))
        ));
    }

    #[test]
    fn test_shape_and_finish_validation() {
        let mut shaped = square_descriptor();
        shaped.layers[0].objects[1].shape = ObjectShape::Rectangle;
        assert!(matches!(
            Track::from_descriptor(&shaped),
            Err(TrackError::WaypointShape { id: 0, .. })
        ));

        let mut no_finish = square_descriptor();
        no_finish.layers[1].objects.clear();
        assert!(matches!(Track::from_descriptor(&no_finish), Err(TrackError::MissingFinish)));

        let mut two_finish = square_descriptor();
        let extra = two_finish.layers[1].objects[0].clone();
        two_finish.layers[0].objects.push(MapObject {
            name: "4".into(),
            ..extra
        });
        assert!(matches!(
            Track::from_descriptor(&two_finish),
            Err(TrackError::MultipleFinish(2))
        ));
    }

    #[test]
    fn test_parse_error_from_json() {
        assert!(matches!(Track::from_json("{ layers: "), Err(TrackError::Parse(_))));
        let json = r#"{ "layers": [ { "name": "waypoints", "objects": [
            { "name": "0", "x": 0, "y": 0 },
            { "name": "1", "x": 50, "y": 0 },
            { "name": "2", "x": 50, "y": 50, "type": "finish" } ] } ] }"#;
        let track = Track::from_json(json).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.half_width(), 160.0);
    }

    #[test]
    fn test_progress_and_advance() {
        let track = Track::from_descriptor(&square_descriptor()).unwrap();
        assert_eq!(track.progress(1, Vec2::new(100.0, 40.0)), 140.0);
        assert!(!track.is_off_track(1, Vec2::new(110.0, 40.0)));
        assert!(track.is_off_track(1, Vec2::new(150.0, 40.0)));

        assert_eq!(track.advance(0, Vec2::new(50.0, 0.0)), (0, 0));
        assert_eq!(track.advance(0, Vec2::new(105.0, 20.0)), (1, 0));
        assert_eq!(track.advance(3, Vec2::new(0.0, -5.0)), (0, 1));
    }

    #[test]
    fn test_point_ahead_wraps_around_corners() {
        let track = Track::from_descriptor(&square_descriptor()).unwrap();
        assert_eq!(track.point_ahead(0, Vec2::new(20.0, 5.0), 30.0), Vec2::new(50.0, 0.0));
        assert_eq!(track.point_ahead(0, Vec2::new(90.0, 0.0), 30.0), Vec2::new(100.0, 20.0));
        assert_eq!(track.point_ahead(3, Vec2::new(0.0, 10.0), 20.0), Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_start_grid_behind_finish() {
        let track = Track::from_descriptor(&square_descriptor()).unwrap();
        let grid = track.start_grid(4);
        assert_eq!(grid.len(), 4);
        for pose in &grid {
            assert!(pose.position.x < track.finish_position().x);
            assert!(pose.rotation.abs() < 1e-6);
        }
        assert!(grid[0].position.distance(grid[1].position) > 1.0);
        assert!(grid[2].position.x < grid[0].position.x);
    }
}
