//! Coverage pattern configuration and waypoint generation.
//!
//! Three pattern families cover the boundary polygon:
//!
//! - **Parallel** – boustrophedon stripes at a configurable angle, spaced
//!   `spacing * (1 - overlap)`, endpoints clipped against the polygon.
//! - **Spiral** – inward offset rings until the remaining area is smaller
//!   than `spacing²`.
//! - **Zig-zag** – the parallel stripe layout with a 45° sawtooth ridden
//!   along each stripe, alternating heading every half period.

use serde::{Deserialize, Serialize};

use mower_types::{ErrorCode, MowerError, Point};

use crate::polygon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Parallel,
    Spiral,
    ZigZag,
}

impl PatternType {
    pub const ALL: [PatternType; 3] = [PatternType::Parallel, PatternType::Spiral, PatternType::ZigZag];
}

/// Validated configuration for coverage generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub pattern_type: PatternType,
    /// Cut width, metres.
    pub spacing: f64,
    /// Stripe angle, degrees counter-clockwise from +X.
    pub angle: f64,
    /// Fractional overlap between adjacent stripes, `0 ≤ overlap < 1`.
    pub overlap: f64,
    /// Where the mower starts; the generated path begins at the waypoint
    /// closest to this point.
    pub start_point: Point,
    /// Boundary polygon, ordered, at least three non-collinear vertices.
    pub boundary: Vec<Point>,
}

impl PatternConfig {
    /// Check every invariant the generators rely on.
    pub fn validate(&self) -> Result<(), MowerError> {
        if self.spacing <= 0.0 {
            return Err(invalid(format!("spacing must be > 0, got {}", self.spacing)));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(invalid(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if self.boundary.len() < 3 {
            return Err(invalid(format!(
                "boundary needs at least 3 vertices, got {}",
                self.boundary.len()
            )));
        }
        if !polygon::is_simple_polygon(&self.boundary) {
            return Err(invalid("boundary is not a simple polygon"));
        }
        Ok(())
    }

    /// Stripe pitch after overlap is applied.
    pub fn effective_spacing(&self) -> f64 {
        self.spacing * (1.0 - self.overlap)
    }

    /// Generate the waypoint sequence for the configured pattern.
    pub fn generate(&self) -> Result<Vec<Point>, MowerError> {
        self.validate()?;
        let mut waypoints = match self.pattern_type {
            PatternType::Parallel => self.parallel(),
            PatternType::Spiral => self.spiral(),
            PatternType::ZigZag => self.zigzag(),
        };
        if waypoints.is_empty() {
            return Err(MowerError::navigation(
                ErrorCode::NoPathFound,
                "pattern generation produced no waypoints",
            ));
        }
        self.rotate_to_start(&mut waypoints);
        Ok(waypoints)
    }

    /// Clipped boustrophedon stripes.
    fn parallel(&self) -> Vec<Point> {
        let pitch = self.effective_spacing();
        let theta = self.angle.to_radians();
        let dir = Point::new(theta.cos(), theta.sin());
        let normal = dir.perp();

        // Project the boundary onto the stripe frame to find the sweep
        // range.
        let (mut along_min, mut along_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut across_min, mut across_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &self.boundary {
            let along = p.dot(dir);
            let across = p.dot(normal);
            along_min = along_min.min(along);
            along_max = along_max.max(along);
            across_min = across_min.min(across);
            across_max = across_max.max(across);
        }

        let mut waypoints = Vec::new();
        let mut across = across_min + pitch / 2.0;
        let mut stripe_index = 0usize;
        while across <= across_max {
            let a = dir.scale(along_min - 1.0) + normal.scale(across);
            let b = dir.scale(along_max + 1.0) + normal.scale(across);
            let mut hits = self.clip_line(a, b);
            if stripe_index % 2 == 1 {
                hits.reverse();
            }
            waypoints.extend(hits);
            across += pitch;
            stripe_index += 1;
        }
        waypoints
    }

    /// Inward offset rings.
    fn spiral(&self) -> Vec<Point> {
        let mut waypoints = Vec::new();
        let mut ring = self.boundary.clone();
        let limit = self.spacing * self.spacing;
        loop {
            match polygon::offset_inward(&ring, self.spacing) {
                Some(inner) if polygon::area(&inner) >= limit => {
                    waypoints.extend(inner.iter().copied());
                    ring = inner;
                }
                _ => break,
            }
        }
        waypoints
    }

    /// Parallel layout with a 45° sawtooth along each stripe.
    fn zigzag(&self) -> Vec<Point> {
        let pitch = self.effective_spacing();
        let theta = self.angle.to_radians();
        let dir = Point::new(theta.cos(), theta.sin());
        let normal = dir.perp();
        // Equal along/across steps give ±45° legs.
        let amplitude = pitch / 2.0;

        let stripes = self.parallel();
        let mut waypoints = Vec::new();
        let mut chunks = stripes.chunks_exact(2);
        for pair in &mut chunks {
            let (start, end) = (pair[0], pair[1]);
            let length = start.distance(end);
            let travel = (end - start).normalized();
            // Sawtooth sign follows the travel direction so adjacent
            // boustrophedon stripes mesh.
            let mut s = 0.0;
            let mut up = true;
            while s <= length {
                let base = start + travel.scale(s);
                let offset = if up { amplitude } else { 0.0 };
                let p = base + normal.scale(offset * travel.dot(dir).signum());
                if polygon::point_in_polygon(p, &self.boundary) {
                    waypoints.push(p);
                } else {
                    waypoints.push(base);
                }
                up = !up;
                s += amplitude;
            }
        }
        waypoints
    }

    /// Intersections of the line `a..b` with the boundary, sorted along the
    /// line and paired into entry/exit points.
    fn clip_line(&self, a: Point, b: Point) -> Vec<Point> {
        let n = self.boundary.len();
        let mut hits: Vec<(f64, Point)> = Vec::new();
        for i in 0..n {
            let e1 = self.boundary[i];
            let e2 = self.boundary[(i + 1) % n];
            if let Some(p) = polygon::segment_intersection(a, b, e1, e2) {
                let t = (p - a).dot(b - a);
                // Deduplicate vertex hits shared by two edges.
                if !hits.iter().any(|(_, q)| q.distance(p) < 1e-6) {
                    hits.push((t, p));
                }
            }
        }
        hits.sort_by(|x, y| x.0.total_cmp(&y.0));
        // Odd leftover (tangent vertex touch) cannot form a stripe.
        if hits.len() % 2 == 1 {
            hits.pop();
        }
        hits.into_iter().map(|(_, p)| p).collect()
    }

    /// Rotate the waypoint list so it begins nearest `start_point`,
    /// preserving internal order for parallel/zig-zag paths by choosing
    /// between forward and reversed traversal.
    fn rotate_to_start(&self, waypoints: &mut Vec<Point>) {
        if waypoints.len() < 2 {
            return;
        }
        let first = waypoints.first().copied().unwrap_or_default();
        let last = waypoints.last().copied().unwrap_or_default();
        if self.start_point.distance(last) < self.start_point.distance(first) {
            waypoints.reverse();
        }
    }
}

fn invalid(message: impl Into<String>) -> MowerError {
    MowerError::Configuration {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern_type: PatternType) -> PatternConfig {
        PatternConfig {
            pattern_type,
            spacing: 0.5,
            angle: 0.0,
            overlap: 0.1,
            start_point: Point::new(0.0, 0.0),
            boundary: vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ],
        }
    }

    #[test]
    fn validate_accepts_the_reference_config() {
        assert!(config(PatternType::Parallel).validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let mut c = config(PatternType::Parallel);
        c.spacing = 0.0;
        assert!(c.validate().is_err());

        let mut c = config(PatternType::Parallel);
        c.overlap = 1.0;
        assert!(c.validate().is_err());

        let mut c = config(PatternType::Parallel);
        c.boundary.truncate(2);
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_collinear_boundary() {
        let mut c = config(PatternType::Parallel);
        c.boundary = vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
        ];
        assert!(c.validate().is_err());
    }

    #[test]
    fn parallel_waypoints_lie_inside_the_boundary() {
        let c = config(PatternType::Parallel);
        let path = c.generate().unwrap();
        assert!(!path.is_empty());
        for p in &path {
            assert!(
                polygon::point_in_polygon(*p, &c.boundary),
                "waypoint {p:?} escaped the boundary"
            );
        }
    }

    #[test]
    fn parallel_stripe_count_matches_pitch() {
        let c = config(PatternType::Parallel);
        let path = c.generate().unwrap();
        // 10 m sweep at 0.45 m pitch starting at pitch/2 -> 22 stripes,
        // two endpoints each.
        assert_eq!(path.len(), 44);
    }

    #[test]
    fn parallel_alternates_stripe_direction() {
        let c = config(PatternType::Parallel);
        let path = c.generate().unwrap();
        // First stripe runs +X, second runs -X (boustrophedon).
        assert!(path[1].x > path[0].x);
        assert!(path[3].x < path[2].x);
    }

    #[test]
    fn angled_stripes_follow_the_requested_heading() {
        let mut c = config(PatternType::Parallel);
        c.angle = 90.0;
        let path = c.generate().unwrap();
        // Vertical stripes: both endpoints of a stripe share an X.
        assert!((path[0].x - path[1].x).abs() < 1e-6);
        assert!((path[0].y - path[1].y).abs() > 5.0);
    }

    #[test]
    fn spiral_rings_shrink_inward() {
        let mut c = config(PatternType::Spiral);
        c.spacing = 1.0;
        c.overlap = 0.0;
        let path = c.generate().unwrap();
        assert!(!path.is_empty());
        for p in &path {
            assert!(polygon::point_in_polygon(*p, &c.boundary));
        }
        // First ring is inset by one spacing from the boundary.
        assert!((path[0].x - 1.0).abs() < 1e-6 || (path[0].y - 1.0).abs() < 1e-6);
        // Rings approach the centre: 4 rings of 4 corners fit a 10 m square
        // before the residual area drops below spacing².
        assert_eq!(path.len() % 4, 0);
        assert!(path.len() >= 12);
    }

    #[test]
    fn zigzag_stays_inside_and_produces_dense_coverage() {
        let c = config(PatternType::ZigZag);
        let parallel = config(PatternType::Parallel).generate().unwrap();
        let path = c.generate().unwrap();
        assert!(path.len() > parallel.len());
        for p in &path {
            assert!(polygon::point_in_polygon(*p, &c.boundary));
        }
    }

    #[test]
    fn path_starts_near_the_start_point() {
        let mut c = config(PatternType::Parallel);
        c.start_point = Point::new(10.0, 10.0);
        let path = c.generate().unwrap();
        let first = path.first().unwrap();
        let last = path.last().unwrap();
        assert!(c.start_point.distance(*first) <= c.start_point.distance(*last));
    }

    #[test]
    fn concave_boundary_produces_split_stripes() {
        let mut c = config(PatternType::Parallel);
        // U shape: stripes through the notch must split into two segments.
        c.boundary = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(6.0, 10.0),
            Point::new(6.0, 3.0),
            Point::new(4.0, 3.0),
            Point::new(4.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let path = c.generate().unwrap();
        for p in &path {
            assert!(polygon::point_in_polygon(*p, &c.boundary));
        }
        // Some stripe must have produced 4 clip points (two sub-segments).
        let high_stripes = path.iter().filter(|p| p.y > 5.0).count();
        assert!(high_stripes > 0);
    }
}
