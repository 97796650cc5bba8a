//! Collision geometry and contact resolution
//!
//! Convex polygons are tested with the support-point form of the separating
//! axis test: for every edge normal of one polygon, the other polygon's
//! deepest vertex along that normal tells how far apart the two are on that
//! axis. Circles use plain squared-distance checks.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rotate_vec;

/// Below this, two centres are treated as coincident
pub const COINCIDENT_EPSILON: f32 = 1e-4;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon has zero area")]
    Degenerate,
}

/// Overlap description between two bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Manifold {
    /// Unit vector pointing from body A toward body B
    pub normal: Vec2,
    /// Overlap depth along `normal` (> 0 on overlap)
    pub penetration: f32,
}

/// Local-space convex polygon, clockwise, one outward normal per edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionGeometry {
    vertices: Vec<Vec2>,
    normals: Vec<Vec2>,
}

/// Shoelace signed area; positive for counter-clockwise winding
fn signed_area(vertices: &[Vec2]) -> f32 {
    let n = vertices.len();
    (0..n)
        .map(|i| vertices[i].perp_dot(vertices[(i + 1) % n]))
        .sum::<f32>()
        / 2.0
}

impl CollisionGeometry {
    /// Build from vertices in either winding order
    pub fn new(mut vertices: Vec<Vec2>) -> Result<Self, GeometryError> {
        if vertices.len() < 3 {
            return Err(GeometryError::TooFewVertices(vertices.len()));
        }
        let area = signed_area(&vertices);
        if area.abs() <= f32::EPSILON {
            return Err(GeometryError::Degenerate);
        }
        if area > 0.0 {
            vertices.reverse();
        }

        let n = vertices.len();
        let normals = (0..n)
            .map(|i| {
                let edge = vertices[(i + 1) % n] - vertices[i];
                // Clockwise winding: outward is the left-hand perpendicular
                Vec2::new(-edge.y, edge.x).normalize_or_zero()
            })
            .collect();

        Ok(Self { vertices, normals })
    }

    /// Axis-aligned box centred on the origin (length along +X)
    pub fn rectangle(length: f32, width: f32) -> Self {
        let hx = length / 2.0;
        let hy = width / 2.0;
        Self {
            vertices: vec![
                Vec2::new(-hx, -hy),
                Vec2::new(-hx, hy),
                Vec2::new(hx, hy),
                Vec2::new(hx, -hy),
            ],
            normals: vec![
                Vec2::new(-1.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, -1.0),
            ],
        }
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vec2] {
        &self.normals
    }

    /// Distance from the local origin to the farthest vertex
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| v.length())
            .fold(0.0, f32::max)
    }

    /// Transform into world space
    pub fn to_world(&self, position: Vec2, rotation: f32) -> WorldPolygon {
        WorldPolygon {
            vertices: self
                .vertices
                .iter()
                .map(|v| position + rotate_vec(*v, rotation))
                .collect(),
            normals: self
                .normals
                .iter()
                .map(|n| rotate_vec(*n, rotation))
                .collect(),
        }
    }
}

/// A polygon placed in world space for one collision query
#[derive(Debug, Clone)]
pub struct WorldPolygon {
    pub vertices: Vec<Vec2>,
    pub normals: Vec<Vec2>,
}

impl WorldPolygon {
    /// Vertex with the greatest projection onto `direction`
    fn support(&self, direction: Vec2) -> Vec2 {
        let mut best = self.vertices[0];
        let mut best_proj = best.dot(direction);
        for v in &self.vertices[1..] {
            let proj = v.dot(direction);
            if proj > best_proj {
                best_proj = proj;
                best = *v;
            }
        }
        best
    }
}

/// Greatest separation of `b` from any face of `a`, and that face's normal
///
/// Returns as soon as a separating face is found.
fn axis_of_least_penetration(a: &WorldPolygon, b: &WorldPolygon) -> (f32, Vec2) {
    let mut best_separation = f32::MIN;
    let mut best_normal = Vec2::ZERO;

    for (vertex, normal) in a.vertices.iter().zip(&a.normals) {
        let support = b.support(-*normal);
        let separation = normal.dot(support - *vertex);
        if separation > best_separation {
            best_separation = separation;
            best_normal = *normal;
        }
        if separation > 0.0 {
            break;
        }
    }

    (best_separation, best_normal)
}

/// Polygon/polygon overlap test
///
/// The faces of `a` are tested first; the faces of `b` are only scanned when
/// none of them separates.
pub fn intersect_polygons(a: &WorldPolygon, b: &WorldPolygon) -> Option<Manifold> {
    if a.vertices.is_empty() || b.vertices.is_empty() {
        return None;
    }

    let (sep_a, normal_a) = axis_of_least_penetration(a, b);
    if sep_a > 0.0 {
        return None;
    }
    let (sep_b, normal_b) = axis_of_least_penetration(b, a);
    if sep_b > 0.0 {
        return None;
    }

    // Greater (less negative) separation is the shallowest axis to push out on
    if sep_a >= sep_b {
        Some(Manifold {
            normal: normal_a,
            penetration: -sep_a,
        })
    } else {
        Some(Manifold {
            normal: -normal_b,
            penetration: -sep_b,
        })
    }
}

/// Circle/circle overlap test; touching circles do not overlap
pub fn intersect_circles(pos_a: Vec2, radius_a: f32, pos_b: Vec2, radius_b: f32) -> Option<Manifold> {
    let delta = pos_b - pos_a;
    let radii = radius_a + radius_b;
    let dist_sq = delta.length_squared();
    if dist_sq >= radii * radii {
        return None;
    }

    let dist = dist_sq.sqrt();
    let normal = if dist > COINCIDENT_EPSILON {
        delta / dist
    } else {
        Vec2::X
    };

    Some(Manifold {
        normal,
        penetration: radii - dist,
    })
}

/// Mass proxy shared by every body: `density * (4/3)πr³`
pub fn mass_for_radius(density: f32, radius: f32) -> f32 {
    density * (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3)
}

/// Kinematic view of one body taking part in a resolution
pub struct ContactBody<'a> {
    pub position: &'a mut Vec2,
    pub velocity: &'a mut Vec2,
    pub mass: f32,
}

/// Split the overlap evenly and exchange an elastic impulse along the normal
///
/// Bodies already moving apart keep their velocities.
pub fn resolve_contact(a: ContactBody<'_>, b: ContactBody<'_>, manifold: &Manifold) {
    let n = manifold.normal;
    let half = manifold.penetration / 2.0;
    *a.position -= n * half;
    *b.position += n * half;

    let closing = (*b.velocity - *a.velocity).dot(n);
    if closing >= 0.0 {
        return;
    }

    let inv_a = if a.mass > 0.0 { 1.0 / a.mass } else { 0.0 };
    let inv_b = if b.mass > 0.0 { 1.0 / b.mass } else { 0.0 };
    let inv_sum = inv_a + inv_b;
    if inv_sum <= 0.0 {
        return;
    }

    let impulse = 2.0 * closing / inv_sum;
    *a.velocity += n * (impulse * inv_a);
    *b.velocity -= n * (impulse * inv_b);
}
