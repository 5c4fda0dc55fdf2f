//! Rolling-window statistics for spread construction.
//!
//! Hedge ratios are estimated by ordinary least-squares regression of leg 1
//! prices on leg 2 prices over the lookback window. All functions operate on
//! f64 slices; prices are converted from `Decimal` at the series boundary.
//!
//! # Precision
//!
//! f64 provides ~15-17 significant digits, which is sufficient for price
//! ratios and z-scores where thresholds are orders of magnitude above the
//! representable error. Degenerate inputs (non-finite values, zero variance,
//! too-short windows) return `None` rather than propagating NaN into the
//! decision path.

/// Arithmetic mean. Returns 0.0 for an empty slice.
#[must_use]
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation with the N-1 denominator.
///
/// Returns `None` for windows shorter than two observations.
#[must_use]
pub fn sample_std_dev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
    Some((ss / (xs.len() - 1) as f64).sqrt())
}

/// OLS slope of `y` regressed on `x` (no intercept term in the output;
/// the slope is the hedge ratio beta such that `y ≈ beta * x + alpha`).
///
/// Returns `None` when the window is shorter than two points, when `x` has
/// zero variance, or when any input is non-finite.
#[must_use]
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let mx = mean(x);
    let my = mean(y);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        sxx += (xi - mx) * (xi - mx);
        sxy += (xi - mx) * (yi - my);
    }

    if sxx.abs() < f64::EPSILON {
        return None;
    }

    let beta = sxy / sxx;
    beta.is_finite().then_some(beta)
}

/// Pearson correlation over aligned slices.
///
/// Returns `None` for short windows or when either series is constant.
#[must_use]
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        sxx += (xi - mx) * (xi - mx);
        syy += (yi - my) * (yi - my);
        sxy += (xi - mx) * (yi - my);
    }
    let denom = (sxx * syy).sqrt();
    if denom < f64::EPSILON {
        return None;
    }
    let r = sxy / denom;
    r.is_finite().then_some(r)
}

/// Z-score of `current` against a window mean and sample standard deviation.
///
/// Returns `None` when the standard deviation is zero (a constant spread must
/// never divide by zero; callers treat this as a hold).
#[must_use]
pub fn z_score(current: f64, window_mean: f64, window_std: f64) -> Option<f64> {
    if window_std <= 0.0 || !window_std.is_finite() {
        return None;
    }
    let z = (current - window_mean) / window_std;
    z.is_finite().then_some(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&xs) - 5.0).abs() < 1e-12);
        // Sample std dev of this classic set is ~2.138
        let sd = sample_std_dev(&xs).unwrap();
        assert!((sd - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_std_requires_two_points() {
        assert!(sample_std_dev(&[]).is_none());
        assert!(sample_std_dev(&[1.0]).is_none());
    }

    #[test]
    fn test_ols_recovers_slope() {
        // y = 1.5x + 2 exactly
        let x: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|xi| 1.5 * xi + 2.0).collect();
        let beta = ols_slope(&x, &y).unwrap();
        assert!((beta - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_ols_constant_x_is_degenerate() {
        let x = vec![5.0; 10];
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(ols_slope(&x, &y).is_none());
    }

    #[test]
    fn test_ols_rejects_non_finite() {
        let x = [1.0, 2.0, f64::NAN];
        let y = [1.0, 2.0, 3.0];
        assert!(ols_slope(&x, &y).is_none());
    }

    #[test]
    fn test_correlation_perfect_and_inverse() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let inv: Vec<f64> = x.iter().map(|v| -2.0 * v).collect();

        assert!((pearson_correlation(&x, &y).unwrap() - 1.0).abs() < 1e-9);
        assert!((pearson_correlation(&x, &inv).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_constant_series() {
        let x = vec![1.0; 10];
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(pearson_correlation(&x, &y).is_none());
    }

    #[test]
    fn test_z_score_zero_std_is_none() {
        assert!(z_score(1.0, 1.0, 0.0).is_none());
        assert!(z_score(1.0, 1.0, -1.0).is_none());
    }

    #[test]
    fn test_z_score_basic() {
        let z = z_score(12.0, 10.0, 2.0).unwrap();
        assert!((z - 1.0).abs() < 1e-12);
    }
}
