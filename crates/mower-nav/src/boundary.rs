//! User boundary polygon: JSON loading and geodetic-to-local conversion.
//!
//! The boundary file is `{ "polygon": [{"lat": .., "lng": ..}, ...] }`;
//! older exports spell longitude `lon`, so both spellings are accepted.
//! Coordinates are converted into a local tangent plane (metres, X east /
//! Y north) anchored at the first vertex using an equirectangular
//! approximation, which is accurate to centimetres at yard scale.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use mower_types::{MowerError, Point};

/// Mean Earth radius, metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    #[serde(alias = "lon")]
    pub lng: f64,
}

#[derive(Deserialize)]
struct BoundaryFile {
    polygon: Vec<LatLng>,
}

/// Load the boundary polygon file.
pub fn load_boundary(path: &Path) -> Result<Vec<LatLng>, MowerError> {
    let bytes = std::fs::read(path).map_err(|e| MowerError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let file: BoundaryFile = serde_json::from_slice(&bytes)
        .map_err(|e| MowerError::Serialization(format!("boundary polygon: {e}")))?;
    if file.polygon.len() < 3 {
        warn!(
            vertices = file.polygon.len(),
            "boundary polygon has fewer than 3 vertices"
        );
        return Err(MowerError::Configuration {
            message: format!(
                "boundary polygon needs at least 3 vertices, got {}",
                file.polygon.len()
            ),
        });
    }
    Ok(file.polygon)
}

/// Convert geodetic vertices into local tangent-plane metres anchored at
/// the first vertex.
pub fn to_local_plane(polygon: &[LatLng]) -> Vec<Point> {
    let Some(origin) = polygon.first() else {
        return Vec::new();
    };
    let cos_lat = origin.lat.to_radians().cos();
    polygon
        .iter()
        .map(|v| {
            let dx = (v.lng - origin.lng).to_radians() * EARTH_RADIUS_M * cos_lat;
            let dy = (v.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
            Point::new(dx, dy)
        })
        .collect()
}

/// Project a single fix into the plane anchored at `origin`.
pub fn project(origin: LatLng, lat: f64, lng: f64) -> Point {
    let cos_lat = origin.lat.to_radians().cos();
    Point::new(
        (lng - origin.lng).to_radians() * EARTH_RADIUS_M * cos_lat,
        (lat - origin.lat).to_radians() * EARTH_RADIUS_M,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_polygon_with_lng_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_polygon.json");
        std::fs::write(
            &path,
            r#"{"polygon":[{"lat":51.0,"lng":-0.1},{"lat":51.0001,"lng":-0.1},{"lat":51.0001,"lng":-0.0999}]}"#,
        )
        .unwrap();
        let polygon = load_boundary(&path).unwrap();
        assert_eq!(polygon.len(), 3);
        assert_eq!(polygon[0].lat, 51.0);
    }

    #[test]
    fn accepts_legacy_lon_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_polygon.json");
        std::fs::write(
            &path,
            r#"{"polygon":[{"lat":51.0,"lon":-0.1},{"lat":51.0001,"lon":-0.1},{"lat":51.0001,"lon":-0.0999}]}"#,
        )
        .unwrap();
        let polygon = load_boundary(&path).unwrap();
        assert_eq!(polygon[0].lng, -0.1);
    }

    #[test]
    fn too_few_vertices_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_polygon.json");
        std::fs::write(&path, r#"{"polygon":[{"lat":51.0,"lng":-0.1}]}"#).unwrap();
        assert!(matches!(
            load_boundary(&path),
            Err(MowerError::Configuration { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_boundary(Path::new("/nonexistent/user_polygon.json")),
            Err(MowerError::Io { .. })
        ));
    }

    #[test]
    fn local_plane_is_anchored_at_first_vertex() {
        let polygon = vec![
            LatLng { lat: 51.0, lng: -0.1 },
            LatLng { lat: 51.0001, lng: -0.1 },
            LatLng { lat: 51.0, lng: -0.0999 },
        ];
        let local = to_local_plane(&polygon);
        assert_eq!(local[0], Point::new(0.0, 0.0));
        // 0.0001 deg of latitude is ~11.1 m north.
        assert!((local[1].y - 11.1).abs() < 0.1);
        assert!(local[1].x.abs() < 1e-6);
        // 0.0001 deg of longitude at 51 N is ~7.0 m east.
        assert!((local[2].x - 7.0).abs() < 0.1);
    }

    #[test]
    fn project_matches_polygon_conversion() {
        let origin = LatLng { lat: 51.0, lng: -0.1 };
        let p = project(origin, 51.0001, -0.0999);
        assert!((p.y - 11.1).abs() < 0.1);
        assert!((p.x - 7.0).abs() < 0.1);
    }
}
