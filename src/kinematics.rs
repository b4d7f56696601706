//! Kinematics derivation.
//!
//! Fills `speed`, `bearing` and `acceleration` for fixes that did not
//! supply them, from consecutive pairs:
//!
//! - speed (m/s): great-circle distance / Δt from the previous fix
//! - bearing (°): initial compass bearing from the previous fix
//! - acceleration (m/s²): Δspeed / Δt from the previous fix
//!
//! Zero elapsed time with a real position change has no finite speed; the
//! field is left `None` and the anomaly detector treats it as undefined.

use log::debug;

use crate::geo_utils::{haversine_distance, initial_bearing};
use crate::GeoPoint;

/// Movement below this over zero elapsed time counts as standing still (meters).
pub const STATIONARY_EPSILON_M: f64 = 0.1;

/// Speed in m/s from `a` to `b`.
///
/// Returns `None` when no time elapsed but the position changed.
#[inline]
pub fn segment_speed(a: &GeoPoint, b: &GeoPoint) -> Option<f64> {
    speed_over(haversine_distance(a, b), b.timestamp - a.timestamp)
}

/// Speed in m/s for a known distance and elapsed time.
#[inline]
pub fn speed_over(distance_m: f64, dt: f64) -> Option<f64> {
    if dt > 0.0 {
        Some(distance_m / dt)
    } else if distance_m < STATIONARY_EPSILON_M {
        Some(0.0)
    } else {
        None
    }
}

/// Fill missing kinematic fields in place.
///
/// Supplied values are kept. The first fix takes the speed and bearing of
/// the first segment (speed 0 when that segment is undefined) and zero
/// acceleration. Returns the number of fixes whose speed is undefined.
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::{derive_kinematics, GeoPoint};
///
/// let mut track = vec![
///     GeoPoint::new(0, 0.0, 0.0, 1_705_318_200.0),
///     GeoPoint::new(1, 0.0, 0.001, 1_705_318_210.0), // ~111 m east in 10 s
/// ];
/// assert_eq!(derive_kinematics(&mut track), 0);
/// let speed = track[1].speed.unwrap();
/// assert!((speed - 11.1).abs() < 0.2);
/// assert!((track[1].bearing.unwrap() - 90.0).abs() < 0.01);
/// ```
pub fn derive_kinematics(points: &mut [GeoPoint]) -> usize {
    let n = points.len();
    if n == 0 {
        return 0;
    }
    if n == 1 {
        let p = &mut points[0];
        p.speed.get_or_insert(0.0);
        p.bearing.get_or_insert(0.0);
        p.acceleration.get_or_insert(0.0);
        return 0;
    }

    // Supplied flags are captured first so derived values never feed back
    let speed_supplied: Vec<bool> = points.iter().map(|p| p.speed.is_some()).collect();
    let bearing_supplied: Vec<bool> = points.iter().map(|p| p.bearing.is_some()).collect();

    let mut undefined = 0;
    let mut last_bearing: Option<f64> = None;

    for i in 1..n {
        let (prev, cur) = (points[i - 1], points[i]);
        let distance = haversine_distance(&prev, &cur);

        if !speed_supplied[i] {
            points[i].speed = speed_over(distance, cur.timestamp - prev.timestamp);
        }
        if points[i].speed.is_none() {
            undefined += 1;
        }

        if !bearing_supplied[i] {
            let bearing = if distance >= STATIONARY_EPSILON_M {
                Some(initial_bearing(prev.lat, prev.lon, cur.lat, cur.lon))
            } else {
                // Standing still keeps the last known heading
                last_bearing
            };
            points[i].bearing = Some(bearing.unwrap_or(0.0));
        }
        last_bearing = points[i].bearing;
    }

    if !speed_supplied[0] {
        points[0].speed = Some(segment_speed(&points[0], &points[1]).unwrap_or(0.0));
    }
    if !bearing_supplied[0] {
        let (a, b) = (points[0], points[1]);
        points[0].bearing = Some(initial_bearing(a.lat, a.lon, b.lat, b.lon));
    }

    points[0].acceleration.get_or_insert(0.0);
    for i in 1..n {
        if points[i].acceleration.is_some() {
            continue;
        }
        let dt = points[i].timestamp - points[i - 1].timestamp;
        points[i].acceleration = match (points[i - 1].speed, points[i].speed) {
            (Some(v0), Some(v1)) if dt > 0.0 => Some((v1 - v0) / dt),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };
    }

    debug!("[Kinematics] Derived kinematics for {} points ({} undefined speeds)", n, undefined);
    undefined
}
