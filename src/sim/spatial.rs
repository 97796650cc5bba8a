//! Broad-phase spatial index
//!
//! A uniform hash grid over axis-aligned bounds. The world rebuilds it every
//! step, then asks for candidate pairs (collision) or area queries
//! (proximity). Results come back sorted so callers iterate deterministically.

use std::collections::{BTreeSet, HashMap};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::actor::ActorId;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_circle(center: Vec2, radius: f32) -> Self {
        Self {
            min: center - Vec2::splat(radius),
            max: center + Vec2::splat(radius),
        }
    }

    pub fn from_center_half_extents(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    #[inline]
    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    pub fn half_extents(&self) -> Vec2 {
        (self.max - self.min) / 2.0
    }
}

type CellKey = (i32, i32);

/// Uniform grid keyed by cell coordinates
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<ActorId>>,
    bounds: HashMap<ActorId, Aabb>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(1.0),
            cells: HashMap::new(),
            bounds: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.bounds.clear();
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    fn cell_range(&self, area: &Aabb) -> (CellKey, CellKey) {
        let to_cell = |v: f32| (v / self.cell_size).floor() as i32;
        (
            (to_cell(area.min.x), to_cell(area.min.y)),
            (to_cell(area.max.x), to_cell(area.max.y)),
        )
    }

    /// Insert (or re-insert) an actor's bounds
    pub fn insert(&mut self, id: ActorId, bounds: Aabb) {
        if self.bounds.contains_key(&id) {
            self.remove(id);
        }
        let ((x0, y0), (x1, y1)) = self.cell_range(&bounds);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.cells.entry((cx, cy)).or_default().push(id);
            }
        }
        self.bounds.insert(id, bounds);
    }

    pub fn remove(&mut self, id: ActorId) {
        let Some(bounds) = self.bounds.remove(&id) else {
            return;
        };
        let ((x0, y0), (x1, y1)) = self.cell_range(&bounds);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                if let Some(cell) = self.cells.get_mut(&(cx, cy)) {
                    cell.retain(|other| *other != id);
                    if cell.is_empty() {
                        self.cells.remove(&(cx, cy));
                    }
                }
            }
        }
    }

    pub fn bounds_of(&self, id: ActorId) -> Option<Aabb> {
        self.bounds.get(&id).copied()
    }

    /// Actors whose bounds overlap `area`, ascending by id
    pub fn query(&self, area: Aabb) -> Vec<ActorId> {
        let ((x0, y0), (x1, y1)) = self.cell_range(&area);
        let mut found = BTreeSet::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                let Some(cell) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for id in cell {
                    if self.bounds.get(id).is_some_and(|b| b.overlaps(&area)) {
                        found.insert(*id);
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    /// Unordered pairs with overlapping bounds, as `(low, high)` ascending
    pub fn candidate_pairs(&self) -> Vec<(ActorId, ActorId)> {
        let mut pairs = BTreeSet::new();
        for cell in self.cells.values() {
            for (i, a) in cell.iter().enumerate() {
                for b in &cell[i + 1..] {
                    let (lo, hi) = if a < b { (*a, *b) } else { (*b, *a) };
                    if pairs.contains(&(lo, hi)) {
                        continue;
                    }
                    let (Some(ba), Some(bb)) = (self.bounds.get(&lo), self.bounds.get(&hi)) else {
                        continue;
                    };
                    if ba.overlaps(bb) {
                        pairs.insert((lo, hi));
                    }
                }
            }
        }
        pairs.into_iter().collect()
    }
}
