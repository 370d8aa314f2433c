//! [`PathPlanner`] – coverage path generation with obstacle exclusion.
//!
//! The planner owns the active [`PatternConfig`] and a set of circular
//! [`ExclusionZone`]s fed by the obstacle layer.  Generated waypoints are
//! filtered against the zones; a path segment that crosses a zone is
//! re-routed around it via tangent points on the side with the shorter
//! detour.

use serde::{Deserialize, Serialize};
use tracing::debug;

use mower_types::{MowerError, Point};

use crate::pattern::PatternConfig;

/// Safety factor applied to zone radii when computing detour tangents so
/// the rerouted path clears the obstacle with margin.
const DETOUR_MARGIN: f64 = 1.1;

/// A circular no-go disk around an obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub center: Point,
    pub radius: f64,
}

impl ExclusionZone {
    pub fn new(center: Point, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.center.distance(p) <= self.radius
    }

    /// Whether the segment `a..b` passes through the zone.
    pub fn intersects_segment(&self, a: Point, b: Point) -> bool {
        let ab = b - a;
        let len2 = ab.dot(ab);
        let t = if len2 == 0.0 {
            0.0
        } else {
            ((self.center - a).dot(ab) / len2).clamp(0.0, 1.0)
        };
        let closest = a + ab.scale(t);
        self.center.distance(closest) < self.radius
    }
}

pub struct PathPlanner {
    config: PatternConfig,
    exclusions: Vec<ExclusionZone>,
}

impl PathPlanner {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            exclusions: Vec::new(),
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Replace the active pattern configuration (pattern switch or
    /// boundary edit).
    pub fn set_config(&mut self, config: PatternConfig) {
        self.config = config;
    }

    pub fn exclusion_zones(&self) -> &[ExclusionZone] {
        &self.exclusions
    }

    /// Add a no-go disk.  The caller (the obstacle map) is responsible for
    /// fusing duplicate observations before they get here.
    pub fn add_exclusion(&mut self, zone: ExclusionZone) {
        debug!(center = ?zone.center, radius = zone.radius, "exclusion zone added");
        self.exclusions.push(zone);
    }

    /// Replace the whole exclusion set (obstacle map refresh).
    pub fn set_exclusions(&mut self, zones: Vec<ExclusionZone>) {
        self.exclusions = zones;
    }

    pub fn clear_exclusions(&mut self) {
        self.exclusions.clear();
    }

    /// Generate the coverage path: pattern waypoints, minus waypoints in
    /// exclusion zones, with zone-crossing segments rerouted.
    pub fn plan(&self) -> Result<Vec<Point>, MowerError> {
        let raw = self.config.generate()?;
        let kept: Vec<Point> = raw
            .into_iter()
            .filter(|p| !self.exclusions.iter().any(|z| z.contains(*p)))
            .collect();

        let mut routed: Vec<Point> = Vec::with_capacity(kept.len());
        for waypoint in kept {
            if let Some(&prev) = routed.last()
                && let Some(zone) = self.nearest_crossed_zone(prev, waypoint)
            {
                routed.extend(detour_waypoints(prev, waypoint, zone));
            }
            routed.push(waypoint);
        }
        Ok(routed)
    }

    fn nearest_crossed_zone(&self, a: Point, b: Point) -> Option<ExclusionZone> {
        self.exclusions
            .iter()
            .filter(|z| z.intersects_segment(a, b))
            .min_by(|x, y| {
                a.distance(x.center).total_cmp(&a.distance(y.center))
            })
            .copied()
    }
}

/// Tangent-point detour around `zone` for the segment `a..b`, on the side
/// with the shorter excursion (the side the zone centre leans away from).
fn detour_waypoints(a: Point, b: Point, zone: ExclusionZone) -> Vec<Point> {
    let clearance = zone.radius * DETOUR_MARGIN;
    let dir = (b - a).normalized();
    let foot = a + dir.scale((zone.center - a).dot(dir));
    let lean = dir.cross(zone.center - foot);
    // Pass on the side opposite the centre's lean; dead-centre picks left.
    let pass_left = lean <= 0.0;

    let tangent = |p: Point, left_rotation: bool| -> Option<Point> {
        let to_p = p - zone.center;
        let d = to_p.length();
        if d <= clearance {
            return None;
        }
        let alpha = (clearance / d).acos();
        let sign = if left_rotation { 1.0 } else { -1.0 };
        Some(zone.center + to_p.normalized().rotated(sign * alpha).scale(clearance))
    };

    // Rotation senses mirror between the two endpoints so both tangent
    // points land on the same side of the zone.
    match (tangent(a, !pass_left), tangent(b, pass_left)) {
        (Some(ta), Some(tb)) => vec![ta, tb],
        // An endpoint sits inside the clearance disk: fall back to a single
        // escape point abeam the centre.
        _ => {
            let away = if pass_left { dir.perp() } else { dir.perp().scale(-1.0) };
            vec![zone.center + away.scale(clearance)]
        }
    }
}
