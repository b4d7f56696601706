//! # Adaptive RTS Smoother
//!
//! Forward Kalman filter plus backward Rauch-Tung-Striebel pass over a
//! constant-velocity model in a local tangent plane.
//!
//! ## State
//! x = [east, north, v_east, v_north]ᵀ (meters, m/s)
//!
//! ## Transition
//! F = I₄ + dt · [[0₂ I₂]; [0₂ 0₂]]
//!
//! ## Process noise (discrete white-noise acceleration)
//! Q_pos = q·dt⁴/4, Q_pos_vel = q·dt³/2, Q_vel = q·dt², with
//! q = σ_a² · process_factor(status). The first fix after a gap gets a
//! larger q since the motion across the gap is unknown.
//!
//! ## Adaptive measurement noise
//! R = σ̂² · factor(status) · I₂, inflated by NIS / gate when the
//! normalized innovation squared exceeds the χ²(2) gate. Flagged fixes
//! are trusted less, so the smoothed track follows the clean ones.
//!
//! σ̂² is a variational-Bayes estimate of the nominal measurement variance:
//! an inverse-gamma IG(α, β) with prior α = 2, β = α·σ_m², updated after
//! each normal fix with α += 1, β += ½(‖z − Hx̂‖² + tr(H P Hᵀ)). The
//! configured σ_m² is a floor, so a clean track is smoothed exactly as
//! with a fixed R and a noisy one is trusted less.
//!
//! Only fixes with a correctable status receive the smoothed position.
//! Everything else keeps its coordinates bit-for-bit.

use log::{debug, warn};
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

use crate::cancel::CancelToken;
use crate::config::Tuning;
use crate::error::DiagnoseError;
use crate::geo_utils::LocalFrame;
use crate::{AlgorithmInfo, AnnotatedPoint, PointStatus, RepairStage};

/// Prior standard deviation of the initial velocity (m/s).
const INITIAL_VELOCITY_STD: f64 = 50.0;

/// Shape of the inverse-gamma prior on the measurement variance.
const NOISE_PRIOR_SHAPE: f64 = 2.0;

type State = Vector4<f64>;
type Cov = Matrix4<f64>;

/// Measurement variance multiplier for a fix of the given status.
pub fn noise_factor(status: PointStatus) -> f64 {
    match status {
        PointStatus::Drift => 25.0,
        PointStatus::SpeedAnomaly | PointStatus::AccelerationAnomaly => 100.0,
        PointStatus::Outlier => 1e4,
        PointStatus::Jump => 1e6,
        _ => 1.0,
    }
}

/// Process noise multiplier for the step that ends at a fix of the given status.
pub fn process_factor(status: PointStatus) -> f64 {
    match status {
        PointStatus::Missing => 10.0,
        _ => 1.0,
    }
}

/// Variational-Bayes estimate of the nominal measurement variance.
#[derive(Debug, Clone, Copy)]
struct NoiseEstimate {
    shape: f64,
    scale: f64,
    floor: f64,
}

impl NoiseEstimate {
    fn new(base_var: f64) -> Self {
        Self {
            shape: NOISE_PRIOR_SHAPE,
            scale: NOISE_PRIOR_SHAPE * base_var,
            floor: base_var,
        }
    }

    fn variance(&self) -> f64 {
        (self.scale / self.shape).max(self.floor)
    }

    /// Fold in one 2-D residual against the filtered state.
    fn observe(&mut self, residual: &Vector2<f64>, projected_cov: &Matrix2<f64>) {
        self.shape += 1.0;
        self.scale += 0.5 * (residual.norm_squared() + projected_cov.trace());
    }
}

fn transition(dt: f64) -> Cov {
    let mut f = Cov::identity();
    f[(0, 2)] = dt;
    f[(1, 3)] = dt;
    f
}

fn process_noise(dt: f64, accel_std: f64) -> Cov {
    let q = accel_std * accel_std;
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;

    let mut qm = Cov::zeros();
    for i in 0..2usize {
        qm[(i, i)] = q * dt4 / 4.0;
        qm[(i + 2, i + 2)] = q * dt2;
        qm[(i, i + 2)] = q * dt3 / 2.0;
        qm[(i + 2, i)] = q * dt3 / 2.0;
    }
    qm
}

fn observation() -> Matrix2x4<f64> {
    Matrix2x4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0,
    )
}

/// Forward filter output for one step.
struct Step {
    predicted: State,
    predicted_cov: Cov,
    filtered: State,
    filtered_cov: Cov,
    transition: Cov,
}

/// Smooth the corrected positions of flagged fixes.
///
/// Returns the sequence (same length, same order) and the stage's audit
/// record. Steps whose innovation or smoother-gain matrix cannot be
/// inverted are listed in `failed_indices` and their fixes left as they
/// were.
pub fn smooth_trajectory(
    mut points: Vec<AnnotatedPoint>,
    tuning: &Tuning,
    cancel: &CancelToken,
) -> Result<(Vec<AnnotatedPoint>, AlgorithmInfo), DiagnoseError> {
    let n = points.len();
    let mut info = AlgorithmInfo::new(
        "adaptive_rts",
        "Forward Kalman filter and backward RTS pass with status-adaptive measurement noise",
        n,
    )
    .with_param("measurementStdMeters", tuning.measurement_std_m)
    .with_param("processAccelStd", tuning.process_accel_std)
    .with_param("innovationGate", tuning.innovation_gate);

    if n < 2 {
        return Ok((points, info));
    }

    let frame = LocalFrame::new(points[0].original_lat(), points[0].original_lon());
    let measurements: Vec<Vector2<f64>> = points
        .iter()
        .map(|p| {
            let (x, y) = frame.project(p.corrected_lat, p.corrected_lon);
            Vector2::new(x, y)
        })
        .collect();

    let h = observation();
    let base_var = tuning.measurement_std_m * tuning.measurement_std_m;
    let mut noise = NoiseEstimate::new(base_var);
    let mut unstable = vec![false; n];

    // ---- Forward pass ----
    let z0 = measurements[0];
    let r0 = base_var * noise_factor(points[0].status);
    let x0 = State::new(z0.x, z0.y, 0.0, 0.0);
    let p0 = Cov::from_diagonal(&Vector4::new(
        r0,
        r0,
        INITIAL_VELOCITY_STD * INITIAL_VELOCITY_STD,
        INITIAL_VELOCITY_STD * INITIAL_VELOCITY_STD,
    ));

    let mut steps: Vec<Step> = Vec::with_capacity(n);
    steps.push(Step {
        predicted: x0,
        predicted_cov: p0,
        filtered: x0,
        filtered_cov: p0,
        transition: Cov::identity(),
    });

    for i in 1..n {
        cancel.check_every(i)?;
        let dt = (points[i].timestamp() - points[i - 1].timestamp()).max(0.0);
        let f = transition(dt);
        let prev = &steps[i - 1];
        let predicted = f * prev.filtered;
        let q = process_noise(dt, tuning.process_accel_std) * process_factor(points[i].status);
        let predicted_cov = f * prev.filtered_cov * f.transpose() + q;

        let innovation = measurements[i] - h * predicted;
        let projected_cov = h * predicted_cov * h.transpose();
        let mut r = Matrix2::identity() * noise.variance() * noise_factor(points[i].status);

        let update = (projected_cov + r).try_inverse().and_then(|s_inv| {
            let nis = innovation.dot(&(s_inv * innovation));
            if nis > tuning.innovation_gate {
                r *= nis / tuning.innovation_gate;
                (projected_cov + r).try_inverse()
            } else {
                Some(s_inv)
            }
        });

        let (filtered, filtered_cov) = match update {
            Some(s_inv) => {
                let gain = predicted_cov * h.transpose() * s_inv;
                let ikh = Cov::identity() - gain * h;
                let filtered = predicted + gain * innovation;
                let filtered_cov = ikh * predicted_cov * ikh.transpose() + gain * r * gain.transpose();
                if points[i].status == PointStatus::Normal {
                    noise.observe(&(measurements[i] - h * filtered), &(h * filtered_cov * h.transpose()));
                }
                (filtered, filtered_cov)
            }
            None => {
                unstable[i] = true;
                (predicted, predicted_cov)
            }
        };

        steps.push(Step {
            predicted,
            predicted_cov,
            filtered,
            filtered_cov,
            transition: f,
        });
    }

    let estimated_std = noise.variance().sqrt();
    info = info.with_param("estimatedMeasurementStdMeters", estimated_std);

    // ---- Backward pass ----
    let mut smoothed: Vec<State> = vec![State::zeros(); n];
    let mut smoothed_cov: Vec<Cov> = vec![Cov::zeros(); n];
    smoothed[n - 1] = steps[n - 1].filtered;
    smoothed_cov[n - 1] = steps[n - 1].filtered_cov;

    for i in (0..n - 1).rev() {
        cancel.check_every(n - 1 - i)?;
        let (cur, next) = (&steps[i], &steps[i + 1]);
        match next.predicted_cov.try_inverse() {
            Some(pp_inv) => {
                let c = cur.filtered_cov * next.transition.transpose() * pp_inv;
                smoothed[i] = cur.filtered + c * (smoothed[i + 1] - next.predicted);
                smoothed_cov[i] = cur.filtered_cov + c * (smoothed_cov[i + 1] - next.predicted_cov) * c.transpose();
            }
            None => {
                unstable[i] = true;
                smoothed[i] = cur.filtered;
                smoothed_cov[i] = cur.filtered_cov;
            }
        }
    }

    // ---- Apply to flagged fixes ----
    for (i, p) in points.iter_mut().enumerate() {
        if unstable[i] {
            info.failed_indices.push(p.index());
            continue;
        }
        if !p.status.is_correctable() {
            continue;
        }
        let (lat, lon) = frame.unproject(smoothed[i][0], smoothed[i][1]);
        if !lat.is_finite() || !lon.is_finite() {
            info.failed_indices.push(p.index());
            continue;
        }
        p.apply_correction(lat, lon, RepairStage::AdaptiveRts);
        info.fixed_indices.push(p.index());
    }
    info.fixed_points = info.fixed_indices.len();

    if !info.failed_indices.is_empty() {
        warn!(
            "[AdaptiveRts] {} unstable steps left unmodified: {:?}",
            info.failed_indices.len(),
            info.failed_indices
        );
    }
    debug!(
        "[AdaptiveRts] Smoothed {} points, fixed {} (measurement std {:.2} m)",
        n, info.fixed_points, estimated_std
    );

    Ok((points, info))
}

// =============================================================================
// Unit Tests
// =============================================================================
