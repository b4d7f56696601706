//! # Geographic Utilities
//!
//! Great-circle geometry shared by every stage of the pipeline.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two fixes |
//! | [`haversine_deg`] | Great-circle distance between raw coordinates |
//! | [`initial_bearing`] | Compass bearing from one coordinate to another |
//! | [`cross_track_distance`] | Distance from a point to a great-circle segment |
//! | [`polyline_length`] | Total length of a track in meters |
//! | [`LocalFrame`] | Local tangent-plane projection in meters |
//!
//! ## Example
//!
//! ```rust
//! use trajectory_doctor::{GeoPoint, geo_utils};
//!
//! let london = GeoPoint::new(0, 51.5074, -0.1278, 0.0);
//! let paris = GeoPoint::new(1, 48.8566, 2.3522, 0.0);
//!
//! let distance = geo_utils::haversine_distance(&london, &paris);
//! assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
//!
//! let bearing = geo_utils::initial_bearing(london.lat, london.lon, paris.lat, paris.lon);
//! assert!(bearing > 140.0 && bearing < 160.0);
//! ```
//!
//! ## Antimeridian
//!
//! Distances and bearings are computed on the sphere and are therefore
//! correct across the ±180° meridian. [`LocalFrame`] wraps longitude
//! differences into (-180, 180] so a track crossing the antimeridian stays
//! contiguous in the plane, and unprojects back into [-180, 180].

use crate::GeoPoint;
use geo::{Distance, Haversine, Point};

/// Mean Earth radius in meters (the radius `geo`'s haversine uses).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two fixes in meters.
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    haversine_deg(p1.lat, p1.lon, p2.lat, p2.lon)
}

/// Great-circle distance between two coordinates (degrees) in meters.
#[inline]
pub fn haversine_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine::distance(Point::new(lon1, lat1), Point::new(lon2, lat2))
}

/// Total length of a track in meters. Empty or single-point tracks return 0.0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert a coordinate delta in degrees to approximate meters.
#[inline]
pub fn degrees_to_meters(degrees: f64) -> f64 {
    degrees * METERS_PER_DEGREE
}

// =============================================================================
// Bearing
// =============================================================================

/// Initial compass bearing from the first coordinate to the second.
///
/// Returns degrees clockwise from north in [0, 360). Coincident points
/// return 0.0. At the poles every direction is south (or north), which the
/// formula reports as 180 (or 0).
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::geo_utils::initial_bearing;
///
/// assert!((initial_bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-9);
/// assert!((initial_bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
/// ```
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = wrap_lon_delta(lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    if y == 0.0 && x == 0.0 {
        return 0.0;
    }

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

/// Smallest absolute difference between two bearings, in [0, 180].
#[inline]
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Wrap a longitude difference into (-180, 180].
#[inline]
pub fn wrap_lon_delta(delta: f64) -> f64 {
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

// =============================================================================
// Cross-Track Distance
// =============================================================================

/// Distance in meters from point `p` to the great-circle segment `a`-`b`.
///
/// When the perpendicular foot falls outside the segment the distance to
/// the nearer endpoint is returned. A degenerate segment (coincident
/// endpoints) returns the distance to `a`.
///
/// All arguments are `(lat, lon)` pairs in degrees.
pub fn cross_track_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let d_ab = haversine_deg(a.0, a.1, b.0, b.1);
    let d_ap = haversine_deg(a.0, a.1, p.0, p.1);
    if d_ab < 1e-6 {
        return d_ap;
    }
    if d_ap < 1e-9 {
        return 0.0;
    }

    let delta13 = d_ap / EARTH_RADIUS_M;
    let theta13 = initial_bearing(a.0, a.1, p.0, p.1).to_radians();
    let theta12 = initial_bearing(a.0, a.1, b.0, b.1).to_radians();
    let dtheta = theta13 - theta12;

    // Foot lies behind the start
    if dtheta.cos() < 0.0 {
        return d_ap;
    }

    let xt = (delta13.sin() * dtheta.sin()).clamp(-1.0, 1.0).asin();
    let ratio = (delta13.cos() / xt.cos()).clamp(-1.0, 1.0);
    let along = ratio.acos() * EARTH_RADIUS_M;

    // Foot lies beyond the end
    if along > d_ab {
        return haversine_deg(b.0, b.1, p.0, p.1);
    }

    (xt * EARTH_RADIUS_M).abs()
}

// =============================================================================
// Local Tangent Plane
// =============================================================================

/// Equirectangular projection around a fixed origin, in meters.
///
/// `x` grows east and `y` grows north. Accurate to well under a meter
/// for the few-kilometer neighbourhoods the smoother and the density
/// index work with, and it degrades gracefully over longer tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin_lat: f64,
    origin_lon: f64,
    cos_lat: f64,
}

impl LocalFrame {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            // Keep the scale finite at the poles
            cos_lat: origin_lat.to_radians().cos().max(1e-6),
        }
    }

    /// Frame centered on the first fix of a track (or the null island for an empty one).
    pub fn for_points(points: &[GeoPoint]) -> Self {
        match points.first() {
            Some(p) => Self::new(p.lat, p.lon),
            None => Self::new(0.0, 0.0),
        }
    }

    /// Project a coordinate to `(x, y)` meters.
    #[inline]
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let dlon = wrap_lon_delta(lon - self.origin_lon);
        let x = dlon.to_radians() * EARTH_RADIUS_M * self.cos_lat;
        let y = (lat - self.origin_lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    /// Inverse of [`project`](Self::project). Longitude is normalized to [-180, 180].
    #[inline]
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = self.origin_lat + (y / EARTH_RADIUS_M).to_degrees();
        let lon = self.origin_lon + (x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees();
        (lat.clamp(-90.0, 90.0), normalize_lon(lon))
    }
}

/// Normalize a longitude into [-180, 180].
#[inline]
pub fn normalize_lon(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        wrap_lon_delta(lon)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GeoPoint::new(0, 51.5074, -0.1278, 0.0);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // London to Paris is approximately 344 km
        let dist = haversine_deg(51.5074, -0.1278, 48.8566, 2.3522);
        assert!(approx_eq(dist, 343_560.0, 5000.0));
    }

    #[test]
    fn test_haversine_across_antimeridian() {
        // 0.2 degrees of longitude at the equator, not 359.8
        let dist = haversine_deg(0.0, 179.9, 0.0, -179.9);
        assert!(approx_eq(dist, 0.2 * METERS_PER_DEGREE, 200.0));
    }

    #[test]
    fn test_polyline_length() {
        assert_eq!(polyline_length(&[]), 0.0);
        let track = vec![
            GeoPoint::new(0, 51.5074, -0.1278, 0.0),
            GeoPoint::new(1, 51.5080, -0.1280, 1.0),
        ];
        let length = polyline_length(&track);
        assert!(length > 0.0 && length < 100.0);
    }

    #[test]
    fn test_initial_bearing_cardinals() {
        assert!(approx_eq(initial_bearing(0.0, 0.0, 1.0, 0.0), 0.0, 1e-9));
        assert!(approx_eq(initial_bearing(0.0, 0.0, 0.0, 1.0), 90.0, 1e-9));
        assert!(approx_eq(initial_bearing(0.0, 0.0, -1.0, 0.0), 180.0, 1e-9));
        assert!(approx_eq(initial_bearing(0.0, 0.0, 0.0, -1.0), 270.0, 1e-9));
        assert_eq!(initial_bearing(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_initial_bearing_across_antimeridian() {
        // Heading east over the date line
        let b = initial_bearing(0.0, 179.9, 0.0, -179.9);
        assert!(approx_eq(b, 90.0, 1e-6));
    }

    #[test]
    fn test_bearing_difference_wraps() {
        assert!(approx_eq(bearing_difference(350.0, 10.0), 20.0, 1e-9));
        assert!(approx_eq(bearing_difference(10.0, 350.0), 20.0, 1e-9));
        assert!(approx_eq(bearing_difference(0.0, 180.0), 180.0, 1e-9));
    }

    #[test]
    fn test_cross_track_perpendicular() {
        // Point 0.001 deg north of an equatorial segment
        let d = cross_track_distance((0.001, 0.5), (0.0, 0.0), (0.0, 1.0));
        assert!(approx_eq(d, 0.001 * METERS_PER_DEGREE, 1.0));
    }

    #[test]
    fn test_cross_track_clamps_to_endpoints() {
        // Beyond the end: distance to b, not to the infinite great circle
        let d = cross_track_distance((0.0, 1.01), (0.0, 0.0), (0.0, 1.0));
        assert!(approx_eq(d, 0.01 * METERS_PER_DEGREE, 20.0));

        // Behind the start: distance to a
        let d = cross_track_distance((0.0, -0.01), (0.0, 0.0), (0.0, 1.0));
        assert!(approx_eq(d, 0.01 * METERS_PER_DEGREE, 20.0));
    }

    #[test]
    fn test_cross_track_degenerate_segment() {
        let d = cross_track_distance((0.001, 0.0), (0.0, 0.0), (0.0, 0.0));
        assert!(approx_eq(d, 0.001 * METERS_PER_DEGREE, 1.0));
    }

    #[test]
    fn test_local_frame_roundtrip() {
        let frame = LocalFrame::new(22.5431, 113.9510);
        let (x, y) = frame.project(22.5441, 113.9530);
        assert!(x > 0.0 && y > 0.0);
        let (lat, lon) = frame.unproject(x, y);
        assert!(approx_eq(lat, 22.5441, 1e-9));
        assert!(approx_eq(lon, 113.9530, 1e-9));
    }

    #[test]
    fn test_local_frame_across_antimeridian() {
        let frame = LocalFrame::new(0.0, 179.99);
        let (x, _) = frame.project(0.0, -179.99);
        // 0.02 degrees east, not 359.98 west
        assert!(approx_eq(x, 0.02 * METERS_PER_DEGREE, 10.0));
        let (_, lon) = frame.unproject(x, 0.0);
        assert!(approx_eq(lon, -179.99, 1e-6));
    }

    #[test]
    fn test_wrap_lon_delta_range() {
        assert_eq!(wrap_lon_delta(180.0), 180.0);
        assert_eq!(wrap_lon_delta(-180.0), 180.0);
        assert_eq!(wrap_lon_delta(540.0), 180.0);
        assert!(approx_eq(wrap_lon_delta(-179.5), -179.5, 1e-12));
        assert!(approx_eq(wrap_lon_delta(190.0), -170.0, 1e-12));
        assert_eq!(wrap_lon_delta(0.0), 0.0);
    }
}
