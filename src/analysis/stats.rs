//! Statistics shared by the detectors
//!
//! Small, allocation-light implementations of the estimators the analysis
//! core needs: moments, robust location/scale, Pearson correlation with its
//! t-test, ordinary least squares and gap-aware autocorrelation.
//!
//! Functions whose statistic can be undefined return
//! [`AnalysisError::NumericInstability`] instead of NaN.

use crate::analysis::error::{AnalysisError, AnalysisResult};
use std::f64::consts::PI;

/// Variances at or below this are treated as zero
pub const VARIANCE_EPSILON: f64 = 1e-12;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample variance (n - 1 denominator)
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Median absolute deviation (unscaled)
pub fn mad(values: &[f64]) -> Option<f64> {
    let m = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

/// Calculate Pearson correlation coefficient
///
/// Returns a value between -1 and 1. Fails when either side has zero
/// variance, where the coefficient is undefined.
pub fn pearson(x: &[f64], y: &[f64]) -> AnalysisResult<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return Err(AnalysisError::insufficient("pearson", 2, x.len().min(y.len())));
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= VARIANCE_EPSILON || syy <= VARIANCE_EPSILON {
        return Err(AnalysisError::unstable("pearson", "zero variance"));
    }

    Ok((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Two-sided p-value of a Pearson coefficient over `n` pairs
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= VARIANCE_EPSILON {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    student_t_two_sided_p(t, df)
}

/// P(|T| > |t|) for Student's t distribution with `df` degrees of freedom
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// Ordinary least squares fit of `y = intercept + slope * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Correlation between x and y (0 when y is flat)
    pub r: f64,
    /// Two-sided p-value of the slope t-test
    pub p_value: f64,
    /// Residual standard error
    pub residual_std: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

pub fn linear_regression(points: &[(f64, f64)]) -> AnalysisResult<LinearFit> {
    let n = points.len();
    if n < 3 {
        return Err(AnalysisError::insufficient("linear regression", 3, n));
    }

    let nf = n as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (x, y) in points {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx <= VARIANCE_EPSILON {
        return Err(AnalysisError::unstable("linear regression", "x has zero variance"));
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let df = (n - 2) as f64;
    let residual_std = (sse / df).sqrt();

    let (r, p_value) = if syy <= VARIANCE_EPSILON {
        (0.0, 1.0)
    } else {
        let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
        let se_slope = residual_std / sxx.sqrt();
        let p = if se_slope <= VARIANCE_EPSILON {
            0.0
        } else {
            student_t_two_sided_p(slope / se_slope, df)
        };
        (r, p)
    };

    Ok(LinearFit {
        slope,
        intercept,
        r,
        p_value,
        residual_std,
        n,
    })
}

/// Autocorrelation at `lag` for a series with gaps
///
/// Mean and variance come from all present values; the lagged product only
/// uses pairs where both ends are present. Returns the coefficient and the
/// number of pairs it was computed from.
pub fn autocorrelation(values: &[Option<f64>], lag: usize) -> AnalysisResult<(f64, usize)> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let m = mean(&present).ok_or_else(|| AnalysisError::insufficient("autocorrelation", 1, 0))?;
    let var = present.iter().map(|v| (v - m).powi(2)).sum::<f64>() / present.len() as f64;
    if var <= VARIANCE_EPSILON {
        return Err(AnalysisError::unstable("autocorrelation", "zero variance"));
    }

    let mut sum = 0.0;
    let mut pairs = 0usize;
    for (a, b) in values.iter().zip(values.iter().skip(lag)) {
        if let (Some(a), Some(b)) = (a, b) {
            sum += (a - m) * (b - m);
            pairs += 1;
        }
    }

    if pairs == 0 {
        return Err(AnalysisError::insufficient("autocorrelation", 1, 0));
    }

    Ok((((sum / pairs as f64) / var).clamp(-1.0, 1.0), pairs))
}

/// Root mean square of a residual slice
pub fn rmse(residuals: &[f64]) -> Option<f64> {
    mean(&residuals.iter().map(|r| r * r).collect::<Vec<_>>()).map(f64::sqrt)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        return PI.ln() - (PI * x).sin().ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + 7.5;
    let a = COEF
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_positive() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let r = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_pearson_perfect_negative() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![10.0, 8.0, 6.0, 4.0, 2.0];
        let r = pearson(&x, &y).unwrap();
        assert!((r + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_pearson_zero_variance_is_unstable() {
        let x = vec![1.0, 2.0, 3.0];
        let y = vec![4.0, 4.0, 4.0];
        assert!(matches!(
            pearson(&x, &y),
            Err(AnalysisError::NumericInstability { .. })
        ));
    }

    #[test]
    fn test_student_t_p_values() {
        assert!((student_t_two_sided_p(0.0, 10.0) - 1.0).abs() < 1e-9);
        // Critical value for alpha = 0.05 at 10 df
        assert!((student_t_two_sided_p(2.228, 10.0) - 0.05).abs() < 1e-3);
        // Critical value for alpha = 0.01 at 20 df
        assert!((student_t_two_sided_p(2.845, 20.0) - 0.01).abs() < 1e-3);
    }

    #[test]
    fn test_correlation_p_value_shrinks_with_sample_size() {
        let small = correlation_p_value(0.5, 8);
        let large = correlation_p_value(0.5, 60);
        assert!(small > 0.05);
        assert!(large < 0.001);
        assert_eq!(correlation_p_value(1.0, 10), 0.0);
    }

    #[test]
    fn test_linear_regression() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 3.0 + 2.0 * i as f64)).collect();
        let fit = linear_regression(&points).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-9);
        assert!((fit.r - 1.0).abs() < 1e-9);
        assert_eq!(fit.p_value, 0.0);
        assert!((fit.predict(20.0) - 43.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_flat_series() {
        let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 4.0)).collect();
        let fit = linear_regression(&points).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.p_value, 1.0);
    }

    #[test]
    fn test_robust_estimators() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&values), Some(3.0));
        assert_eq!(mad(&values), Some(1.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_autocorrelation_detects_period() {
        let values: Vec<Option<f64>> = (0..28)
            .map(|i| Some(if i % 7 == 0 { 10.0 } else { 1.0 }))
            .collect();
        let (at_period, pairs) = autocorrelation(&values, 7).unwrap();
        let (off_period, _) = autocorrelation(&values, 3).unwrap();
        assert_eq!(pairs, 21);
        assert!(at_period > 0.7);
        assert!(off_period < 0.0);
    }

    #[test]
    fn test_autocorrelation_skips_gaps() {
        let values = vec![Some(1.0), None, Some(3.0), Some(1.0), None, Some(3.0)];
        let (_, pairs) = autocorrelation(&values, 1).unwrap();
        assert_eq!(pairs, 1);

        let (acf, pairs) = autocorrelation(&values, 3).unwrap();
        assert_eq!(pairs, 2);
        assert!((acf - 1.0).abs() < 1e-9);
    }
}
