//! Obstacle map: fused, aging world-frame obstacle records.
//!
//! Observations within `merge_radius` of an existing obstacle fuse into it
//! with an exponential moving average instead of duplicating; obstacles
//! not re-observed for `max_age` are pruned.  The map exports the
//! planner's exclusion zones.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mower_types::Point;

use crate::planner::ExclusionZone;

/// EMA weight given to a fresh observation when fusing.
const FUSE_ALPHA: f64 = 0.3;
/// Minimum exclusion radius, metres, for tiny or size-unknown obstacles.
const MIN_EXCLUSION_RADIUS: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Rock,
    Tree,
    Dropoff,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: u64,
    pub position: Point,
    pub size_m: f64,
    /// Detection confidence, `[0, 1]`.
    pub confidence: f64,
    pub kind: ObstacleKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub struct ObstacleMap {
    obstacles: Vec<Obstacle>,
    next_id: u64,
    merge_radius: f64,
    max_age: Duration,
}

impl Default for ObstacleMap {
    fn default() -> Self {
        Self::new(0.5, Duration::seconds(300))
    }
}

impl ObstacleMap {
    pub fn new(merge_radius: f64, max_age: Duration) -> Self {
        Self {
            obstacles: Vec::new(),
            next_id: 1,
            merge_radius,
            max_age,
        }
    }

    /// Record an observation.  Returns the id of the (new or fused)
    /// obstacle.
    pub fn observe(
        &mut self,
        position: Point,
        size_m: f64,
        confidence: f64,
        kind: ObstacleKind,
    ) -> u64 {
        let now = Utc::now();
        let confidence = confidence.clamp(0.0, 1.0);

        if let Some(existing) = self
            .obstacles
            .iter_mut()
            .filter(|o| o.position.distance(position) <= self.merge_radius)
            .min_by(|a, b| {
                a.position
                    .distance(position)
                    .total_cmp(&b.position.distance(position))
            })
        {
            existing.position = existing
                .position
                .scale(1.0 - FUSE_ALPHA)
                + position.scale(FUSE_ALPHA);
            existing.confidence =
                existing.confidence * (1.0 - FUSE_ALPHA) + confidence * FUSE_ALPHA;
            existing.size_m = existing.size_m.max(size_m);
            if existing.kind == ObstacleKind::Unknown {
                existing.kind = kind;
            }
            existing.last_seen = now;
            debug!(id = existing.id, "observation fused into existing obstacle");
            return existing.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.obstacles.push(Obstacle {
            id,
            position,
            size_m,
            confidence,
            kind,
            first_seen: now,
            last_seen: now,
        });
        debug!(id, ?position, "new obstacle recorded");
        id
    }

    /// Drop obstacles not re-observed within the age limit.  Returns how
    /// many were removed.
    pub fn prune(&mut self) -> usize {
        let cutoff = Utc::now() - self.max_age;
        let before = self.obstacles.len();
        self.obstacles.retain(|o| o.last_seen >= cutoff);
        before - self.obstacles.len()
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn get(&self, id: u64) -> Option<&Obstacle> {
        self.obstacles.iter().find(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn clear(&mut self) {
        self.obstacles.clear();
    }

    /// Exclusion zones for the planner: one disk per obstacle.
    pub fn exclusion_zones(&self) -> Vec<ExclusionZone> {
        self.obstacles
            .iter()
            .map(|o| {
                ExclusionZone::new(o.position, (o.size_m / 2.0).max(MIN_EXCLUSION_RADIUS))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_positions_create_distinct_obstacles() {
        let mut map = ObstacleMap::default();
        let a = map.observe(Point::new(0.0, 0.0), 0.4, 0.8, ObstacleKind::Rock);
        let b = map.observe(Point::new(3.0, 0.0), 0.4, 0.8, ObstacleKind::Tree);
        assert_ne!(a, b);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn nearby_observation_fuses_instead_of_duplicating() {
        let mut map = ObstacleMap::default();
        let a = map.observe(Point::new(0.0, 0.0), 0.4, 0.5, ObstacleKind::Rock);
        let b = map.observe(Point::new(0.3, 0.0), 0.4, 1.0, ObstacleKind::Rock);
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);

        let fused = map.get(a).unwrap();
        // Position EMA: 0.7 * 0.0 + 0.3 * 0.3 = 0.09.
        assert!((fused.position.x - 0.09).abs() < 1e-9);
        // Confidence EMA: 0.7 * 0.5 + 0.3 * 1.0 = 0.65.
        assert!((fused.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn fusion_upgrades_unknown_kind() {
        let mut map = ObstacleMap::default();
        let id = map.observe(Point::new(0.0, 0.0), 0.4, 0.5, ObstacleKind::Unknown);
        map.observe(Point::new(0.1, 0.0), 0.4, 0.9, ObstacleKind::Dropoff);
        assert_eq!(map.get(id).unwrap().kind, ObstacleKind::Dropoff);
    }

    #[test]
    fn fusion_keeps_the_larger_size() {
        let mut map = ObstacleMap::default();
        let id = map.observe(Point::new(0.0, 0.0), 0.8, 0.5, ObstacleKind::Rock);
        map.observe(Point::new(0.1, 0.0), 0.2, 0.5, ObstacleKind::Rock);
        assert_eq!(map.get(id).unwrap().size_m, 0.8);
    }

    #[test]
    fn prune_removes_aged_obstacles() {
        let mut map = ObstacleMap::new(0.5, Duration::milliseconds(10));
        map.observe(Point::new(0.0, 0.0), 0.4, 0.9, ObstacleKind::Rock);
        std::thread::sleep(std::time::Duration::from_millis(30));
        let fresh = map.observe(Point::new(5.0, 0.0), 0.4, 0.9, ObstacleKind::Rock);
        assert_eq!(map.prune(), 1);
        assert_eq!(map.len(), 1);
        assert!(map.get(fresh).is_some());
    }

    #[test]
    fn reobservation_resets_the_age_clock() {
        let mut map = ObstacleMap::new(0.5, Duration::milliseconds(50));
        let id = map.observe(Point::new(0.0, 0.0), 0.4, 0.9, ObstacleKind::Rock);
        std::thread::sleep(std::time::Duration::from_millis(30));
        map.observe(Point::new(0.05, 0.0), 0.4, 0.9, ObstacleKind::Rock);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(map.prune(), 0);
        assert!(map.get(id).is_some());
    }

    #[test]
    fn exclusion_zones_have_a_minimum_radius() {
        let mut map = ObstacleMap::default();
        map.observe(Point::new(1.0, 2.0), 0.1, 0.9, ObstacleKind::Rock);
        map.observe(Point::new(5.0, 5.0), 2.0, 0.9, ObstacleKind::Tree);
        let zones = map.exclusion_zones();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].radius, MIN_EXCLUSION_RADIUS);
        assert_eq!(zones[1].radius, 1.0);
    }

    #[test]
    fn clear_empties_the_map() {
        let mut map = ObstacleMap::default();
        map.observe(Point::new(0.0, 0.0), 0.4, 0.9, ObstacleKind::Rock);
        map.clear();
        assert!(map.is_empty());
    }
}
