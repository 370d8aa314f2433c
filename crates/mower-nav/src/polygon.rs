//! Planar polygon tests used by the path planner.

use mower_types::Point;

const EPS: f64 = 1e-9;

/// Ray-casting containment test.  Points exactly on an edge count as
/// inside.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    // Edge membership first so boundary points are deterministic.
    for (a, b) in edges(polygon) {
        if point_on_segment(p, a, b) {
            return true;
        }
    }
    let mut inside = false;
    for (a, b) in edges(polygon) {
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Winding-number containment test; nonzero means inside.  Kept as an
/// independent oracle for the ray-casting implementation.
pub fn winding_number(p: Point, polygon: &[Point]) -> i32 {
    let mut winding = 0;
    for (a, b) in edges(polygon) {
        if a.y <= p.y {
            if b.y > p.y && (b - a).cross(p - a) > 0.0 {
                winding += 1;
            }
        } else if b.y <= p.y && (b - a).cross(p - a) < 0.0 {
            winding -= 1;
        }
    }
    winding
}

/// Intersection of segments `a1..a2` and `b1..b2` in parametric form.
/// Returns the single intersection point when both parameters land in
/// `[0, 1]`; parallel and collinear segments return `None`.
pub fn segment_intersection(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.cross(s);
    if denom.abs() < EPS {
        return None;
    }
    let t = (b1 - a1).cross(s) / denom;
    let u = (b1 - a1).cross(r) / denom;
    if (-EPS..=1.0 + EPS).contains(&t) && (-EPS..=1.0 + EPS).contains(&u) {
        Some(a1 + r.scale(t))
    } else {
        None
    }
}

/// Whether `polygon` is simple: at least three vertices, no repeated
/// vertices, no three consecutive collinear vertices, and no intersection
/// between non-adjacent edges.
pub fn is_simple_polygon(polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if polygon[i].distance(polygon[j]) < EPS {
                return false;
            }
        }
    }
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];
        if (b - a).cross(c - b).abs() < EPS {
            return false;
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            // Skip adjacent edges (they share a vertex).
            if j == i || (j + 1) % n == i || (i + 1) % n == j {
                continue;
            }
            let (a1, a2) = (polygon[i], polygon[(i + 1) % n]);
            let (b1, b2) = (polygon[j], polygon[(j + 1) % n]);
            if segment_intersection(a1, a2, b1, b2).is_some() {
                return false;
            }
        }
    }
    true
}

/// Signed area (shoelace); positive for counter-clockwise winding.
pub fn signed_area(polygon: &[Point]) -> f64 {
    let mut sum = 0.0;
    for (a, b) in edges(polygon) {
        sum += a.cross(b);
    }
    sum / 2.0
}

pub fn area(polygon: &[Point]) -> f64 {
    signed_area(polygon).abs()
}

/// Axis-aligned bounding box `(min, max)`.
pub fn bounding_box(polygon: &[Point]) -> (Point, Point) {
    let mut min = Point::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in polygon {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}

/// Inward offset of a polygon by `inset` metres (spiral ring generation).
///
/// Each edge is shifted toward the interior and adjacent shifted edges are
/// re-intersected.  Returns `None` when the offset collapses the polygon
/// (degenerate intersection, flipped winding, or vanishing area).
pub fn offset_inward(polygon: &[Point], inset: f64) -> Option<Vec<Point>> {
    let n = polygon.len();
    if n < 3 || inset <= 0.0 {
        return None;
    }
    // Interior is to the left of CCW edges; normalize to CCW.
    let ccw: Vec<Point> = if signed_area(polygon) >= 0.0 {
        polygon.to_vec()
    } else {
        polygon.iter().rev().copied().collect()
    };

    let mut shifted: Vec<(Point, Point)> = Vec::with_capacity(n);
    for (a, b) in edges(&ccw) {
        let normal = (b - a).normalized().perp(); // points into the interior
        shifted.push((a + normal.scale(inset), b + normal.scale(inset)));
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let (p1, p2) = shifted[(i + n - 1) % n];
        let (q1, q2) = shifted[i];
        let r = p2 - p1;
        let s = q2 - q1;
        let denom = r.cross(s);
        if denom.abs() < EPS {
            // Parallel consecutive edges: fall back to the shared endpoint.
            out.push(q1);
            continue;
        }
        let t = (q1 - p1).cross(s) / denom;
        out.push(p1 + r.scale(t));
    }

    if signed_area(&out) < EPS || !is_simple_polygon(&out) {
        return None;
    }
    Some(out)
}

fn point_on_segment(p: Point, a: Point, b: Point) -> bool {
    let ab = b - a;
    let ap = p - a;
    if ab.cross(ap).abs() > EPS * ab.length().max(1.0) {
        return false;
    }
    let dot = ap.dot(ab);
    dot >= -EPS && dot <= ab.dot(ab) + EPS
}

fn edges(polygon: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    (0..polygon.len()).map(|i| (polygon[i], polygon[(i + 1) % polygon.len()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    fn l_shape() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 4.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn containment_inside_and_outside() {
        let poly = square();
        assert!(point_in_polygon(Point::new(5.0, 5.0), &poly));
        assert!(!point_in_polygon(Point::new(-1.0, 5.0), &poly));
        assert!(!point_in_polygon(Point::new(5.0, 10.5), &poly));
    }

    #[test]
    fn boundary_points_count_as_inside() {
        let poly = square();
        assert!(point_in_polygon(Point::new(0.0, 5.0), &poly));
        assert!(point_in_polygon(Point::new(10.0, 10.0), &poly));
    }

    #[test]
    fn ray_casting_agrees_with_winding_number() {
        let polys = [square(), l_shape()];
        for poly in &polys {
            let (min, max) = bounding_box(poly);
            let mut y = min.y - 1.0;
            while y <= max.y + 1.0 {
                let mut x = min.x - 1.0;
                while x <= max.x + 1.0 {
                    // Stay off edges; the oracle treats them differently.
                    let p = Point::new(x + 0.137, y + 0.211);
                    assert_eq!(
                        point_in_polygon(p, poly),
                        winding_number(p, poly) != 0,
                        "disagreement at {p:?}"
                    );
                    x += 0.5;
                }
                y += 0.5;
            }
        }
    }

    #[test]
    fn segment_intersection_basic_cross() {
        let p = segment_intersection(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        )
        .unwrap();
        assert!((p.x - 5.0).abs() < 1e-9);
        assert!((p.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_segments_do_not_intersect() {
        assert!(
            segment_intersection(
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(10.0, 1.0),
            )
            .is_none()
        );
    }

    #[test]
    fn disjoint_segments_on_crossing_lines_do_not_intersect() {
        assert!(
            segment_intersection(
                Point::new(0.0, 0.0),
                Point::new(1.0, 1.0),
                Point::new(5.0, 6.0),
                Point::new(6.0, 5.0),
            )
            .is_none()
        );
    }

    #[test]
    fn simple_polygon_accepts_square_and_l_shape() {
        assert!(is_simple_polygon(&square()));
        assert!(is_simple_polygon(&l_shape()));
    }

    #[test]
    fn collinear_triple_is_not_simple() {
        let degenerate = vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
        ];
        assert!(!is_simple_polygon(&degenerate));
    }

    #[test]
    fn self_intersecting_bowtie_is_not_simple() {
        let bowtie = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!is_simple_polygon(&bowtie));
    }

    #[test]
    fn repeated_vertex_is_not_simple() {
        let repeated = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 5.0),
        ];
        assert!(!is_simple_polygon(&repeated));
    }

    #[test]
    fn area_of_square_is_100() {
        assert!((area(&square()) - 100.0).abs() < 1e-9);
        // Winding direction does not change the unsigned area.
        let cw: Vec<Point> = square().into_iter().rev().collect();
        assert!((area(&cw) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn offset_inward_shrinks_square() {
        let inner = offset_inward(&square(), 2.0).unwrap();
        assert_eq!(inner.len(), 4);
        assert!((area(&inner) - 36.0).abs() < 1e-6);
        for p in &inner {
            assert!(point_in_polygon(*p, &square()));
        }
    }

    #[test]
    fn offset_inward_collapses_to_none() {
        assert!(offset_inward(&square(), 5.0).is_none());
        assert!(offset_inward(&square(), 50.0).is_none());
    }

    #[test]
    fn offset_inward_handles_clockwise_input() {
        let cw: Vec<Point> = square().into_iter().rev().collect();
        let inner = offset_inward(&cw, 1.0).unwrap();
        assert!((area(&inner) - 64.0).abs() < 1e-6);
    }
}
