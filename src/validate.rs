//! Input validation.
//!
//! Turns raw `[lat, lon, time, elevation?, speed?, bearing?]` arrays into
//! [`GeoPoint`]s, or rejects the whole batch. There is no partial
//! acceptance: a single bad point fails the request and every offending
//! index is reported.

use log::debug;

use crate::error::DiagnoseError;
use crate::{GeoPoint, MAX_POINTS, MIN_POINTS};

/// Earliest accepted timestamp (2000-01-01T00:00:00Z).
pub const MIN_TIMESTAMP: f64 = 946_684_800.0;

/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_TIMESTAMP: f64 = 4_102_444_800.0;

/// Validate a raw point batch.
///
/// # Errors
///
/// - [`DiagnoseError::TooFewPoints`] for fewer than 2 points
/// - [`DiagnoseError::TooManyPoints`] for more than 100,000 points
/// - [`DiagnoseError::InvalidPoints`] listing every malformed index in ascending order
///
/// # Example
///
/// ```rust
/// use trajectory_doctor::{validate_points, DiagnoseError};
///
/// let raw = vec![
///     vec![22.5431, 113.9510, 1_705_318_200.0],
///     vec![22.5432, 113.9511, 1_705_318_203.0, 12.5, 4.2, 45.0],
/// ];
/// let points = validate_points(&raw).unwrap();
/// assert_eq!(points[1].elevation, Some(12.5));
///
/// let bad = vec![vec![95.0, 0.0, 1_705_318_200.0], vec![0.0, 0.0, 1_705_318_201.0]];
/// assert_eq!(validate_points(&bad), Err(DiagnoseError::InvalidPoints { indices: vec![0] }));
/// ```
pub fn validate_points<P: AsRef<[f64]>>(raw: &[P]) -> Result<Vec<GeoPoint>, DiagnoseError> {
    if raw.len() < MIN_POINTS {
        return Err(DiagnoseError::TooFewPoints {
            received: raw.len(),
            minimum: MIN_POINTS,
        });
    }
    if raw.len() > MAX_POINTS {
        return Err(DiagnoseError::TooManyPoints {
            received: raw.len(),
            limit: MAX_POINTS,
        });
    }

    let mut points = Vec::with_capacity(raw.len());
    let mut invalid = Vec::new();
    let mut last_time: Option<f64> = None;

    for (index, values) in raw.iter().enumerate() {
        match parse_point(index, values.as_ref()) {
            Some(point) => {
                // Out-of-order timestamps invalidate the later point only
                if matches!(last_time, Some(prev) if point.timestamp < prev) {
                    invalid.push(index);
                } else {
                    last_time = Some(point.timestamp);
                    points.push(point);
                }
            }
            None => invalid.push(index),
        }
    }

    if !invalid.is_empty() {
        debug!("[Validator] Rejected {} of {} points", invalid.len(), raw.len());
        return Err(DiagnoseError::InvalidPoints { indices: invalid });
    }

    Ok(points)
}

/// Check an already-built point sequence (for callers such as file parsers
/// that construct [`GeoPoint`]s directly).
///
/// Applies the same count, range and ordering rules as [`validate_points`];
/// `index` must equal each point's position.
pub fn validate_geo_points(points: &[GeoPoint]) -> Result<(), DiagnoseError> {
    if points.len() < MIN_POINTS {
        return Err(DiagnoseError::TooFewPoints {
            received: points.len(),
            minimum: MIN_POINTS,
        });
    }
    if points.len() > MAX_POINTS {
        return Err(DiagnoseError::TooManyPoints {
            received: points.len(),
            limit: MAX_POINTS,
        });
    }

    let mut invalid = Vec::new();
    let mut last_time = f64::NEG_INFINITY;
    for (position, p) in points.iter().enumerate() {
        let ok = p.index == position
            && p.is_valid()
            && timestamp_in_range(p.timestamp)
            && p.timestamp >= last_time
            && optional_fields_valid(p.elevation, p.speed, p.bearing)
            && p.acceleration.map_or(true, f64::is_finite);
        if ok {
            last_time = p.timestamp;
        } else {
            invalid.push(position);
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(DiagnoseError::InvalidPoints { indices: invalid })
    }
}

fn parse_point(index: usize, values: &[f64]) -> Option<GeoPoint> {
    if !(3..=6).contains(&values.len()) {
        return None;
    }

    let mut point = GeoPoint::new(index, values[0], values[1], values[2]);
    if !point.is_valid() || !timestamp_in_range(point.timestamp) {
        return None;
    }

    point.elevation = values.get(3).copied();
    point.speed = values.get(4).copied();
    point.bearing = values.get(5).copied();
    if !optional_fields_valid(point.elevation, point.speed, point.bearing) {
        return None;
    }

    // 360 and 0 are the same heading
    point.bearing = point.bearing.map(|b| if b >= 360.0 { 0.0 } else { b });
    Some(point)
}

#[inline]
fn timestamp_in_range(t: f64) -> bool {
    t.is_finite() && (MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&t)
}

fn optional_fields_valid(elevation: Option<f64>, speed: Option<f64>, bearing: Option<f64>) -> bool {
    elevation.map_or(true, f64::is_finite)
        && speed.map_or(true, |s| s.is_finite() && s >= 0.0)
        && bearing.map_or(true, |b| b.is_finite() && (0.0..=360.0).contains(&b))
}
