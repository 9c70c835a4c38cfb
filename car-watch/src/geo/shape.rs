//! Geometric containment predicates over latitude/longitude
//!
//! Distances are great-circle (haversine) distances on a spherical earth.
//! All functions are total over finite inputs.

use serde::{Deserialize, Serialize};

/// Mean earth radius used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in kilometres
    pub fn distance_km(&self, other: &LatLon) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lon - self.lon).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// Fewest vertices that enclose an area
pub const MIN_POLYGON_VERTICES: usize = 3;

/// A closed geographic region
///
/// Rectangles are not a separate variant: [`Shape::rectangle`] expands the two
/// corners into a four-vertex polygon at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { center: LatLon, radius_km: f64 },
    Polygon { vertices: Vec<LatLon> },
}

impl Shape {
    pub fn circle(center: LatLon, radius_km: f64) -> Self {
        Shape::Circle { center, radius_km }
    }

    /// Polygon over `vertices`; `None` if there are fewer than [`MIN_POLYGON_VERTICES`]
    pub fn polygon(vertices: Vec<LatLon>) -> Option<Self> {
        if vertices.len() < MIN_POLYGON_VERTICES {
            return None;
        }
        Some(Shape::Polygon { vertices })
    }

    /// Build an axis-aligned rectangle from two diagonal corners
    ///
    /// Vertex order: (minLat,maxLon), (minLat,minLon), (maxLat,minLon), (maxLat,maxLon).
    pub fn rectangle(corner1: LatLon, corner2: LatLon) -> Self {
        let min_lat = corner1.lat.min(corner2.lat);
        let max_lat = corner1.lat.max(corner2.lat);
        let min_lon = corner1.lon.min(corner2.lon);
        let max_lon = corner1.lon.max(corner2.lon);

        Shape::Polygon {
            vertices: vec![
                LatLon::new(min_lat, max_lon),
                LatLon::new(min_lat, min_lon),
                LatLon::new(max_lat, min_lon),
                LatLon::new(max_lat, max_lon),
            ],
        }
    }

    /// Containment test. A point exactly on a circle's boundary is outside.
    pub fn is_inside(&self, lat: f64, lon: f64) -> bool {
        match self {
            Shape::Circle { center, radius_km } => {
                center.distance_km(&LatLon::new(lat, lon)) < *radius_km
            }
            Shape::Polygon { vertices } => point_in_polygon(lat, lon, vertices),
        }
    }

    /// Distance from a circle's center to the point, in kilometres.
    /// Polygons have no center and return `None`.
    pub fn distance_to(&self, lat: f64, lon: f64) -> Option<f64> {
        match self {
            Shape::Circle { center, .. } => Some(center.distance_km(&LatLon::new(lat, lon))),
            Shape::Polygon { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Circle { .. } => "circle",
            Shape::Polygon { .. } => "polygon",
        }
    }
}

/// Even-odd ray casting over the vertex ring (last vertex wraps to the first)
///
/// Points lying exactly on an edge may land on either side.
fn point_in_polygon(lat: f64, lon: f64, vertices: &[LatLon]) -> bool {
    let n = vertices.len();
    if n == 0 {
        return false;
    }

    let mut inside = false;
    let mut p1 = vertices[0];
    for i in 1..=n {
        let p2 = vertices[i % n];
        if lon > p1.lon.min(p2.lon) && lon <= p1.lon.max(p2.lon) && lat <= p1.lat.max(p2.lat) {
            // Constant-longitude edges never reach here: the strict lower bound excludes them.
            let flat = p1.lat == p2.lat;
            if flat || lat <= (lon - p1.lon) * (p2.lat - p1.lat) / (p2.lon - p1.lon) + p1.lat {
                inside = !inside;
            }
        }
        p1 = p2;
    }

    inside
}
