//! Scalar kernels shared by the reduction engine.
//!
//! All functions take the values of one axis position (or one scalar sample)
//! and return NaN for an empty input.

/// Two-sided 95 % normal quantile.
pub const Z_95: f64 = 1.96;

/// `20·log10|v|`.
pub fn to_decibel(v: f64) -> f64 {
    20.0 * v.abs().log10()
}

pub fn from_decibel(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with divisor `n`.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    (values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// `mean ± 1.96 · std / sqrt(n)`. A single value gives a zero-width interval.
pub fn confidence_interval(values: &[f64]) -> (f64, f64) {
    let m = mean(values);
    let half = Z_95 * population_std(values) / (values.len() as f64).sqrt();
    (m - half, m + half)
}

/// Energy average of linear magnitudes, expressed in decibels.
pub fn rms_decibel(linear: &[f64]) -> f64 {
    let mean_square = mean(&linear.iter().map(|v| v * v).collect::<Vec<_>>());
    to_decibel(mean_square.sqrt())
}

/// Arithmetic mean of the decibel levels of linear magnitudes.
pub fn decibel_mean(linear: &[f64]) -> f64 {
    mean(&linear.iter().map(|&v| to_decibel(v)).collect::<Vec<_>>())
}

/// `(min, max)`, NaN for an empty input.
pub fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}
