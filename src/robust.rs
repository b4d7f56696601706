//! Robust statistics helpers.

/// Scale factor that makes the MAD a consistent estimator of σ for normal data.
pub const MAD_SCALE: f64 = 1.4826;

/// Median of the finite values in `values`. `None` if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Mean and population standard deviation. `None` for an empty slice.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Robust location and scale of a sample: `(median, 1.4826 * MAD)`.
///
/// The scale is floored at `min_scale` so a perfectly regular sample does
/// not turn every tiny residual into an infinite z-score.
pub fn robust_center_scale(values: &[f64], min_scale: f64) -> Option<(f64, f64)> {
    let center = median(values)?;
    let spread = mad(values, center)? * MAD_SCALE;
    Some((center, spread.max(min_scale)))
}

/// Nearest-rank percentile (`q` in [0, 1]) of the finite values, rounding the rank down.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() as f64 * q.clamp(0.0, 1.0)) as usize).min(sorted.len() - 1);
    Some(sorted[rank])
}
