//! # Utilities
//!
//! Shared numeric helpers for conversions, random draws, and summary rounding.

use rand::RngExt;
use rand::rngs::StdRng;

/// Lossy `usize -> f64` conversion saturating at `u32::MAX`.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Round `value` to `decimals` decimal places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10.0_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Stable logistic transform.
#[must_use]
pub fn logistic_stable(value: f64) -> f64 {
    if value >= 0.0 {
        let z = (-value).exp();
        1.0 / (1.0 + z)
    } else {
        let z = value.exp();
        z / (1.0 + z)
    }
}

/// Stable `log(1 + exp(value))`.
#[must_use]
pub fn softplus(value: f64) -> f64 {
    if value > 0.0 {
        value + (-value).exp().ln_1p()
    } else {
        value.exp().ln_1p()
    }
}

/// Box-Muller standard normal draw.
pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Arithmetic mean, `NaN` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / usize_to_f64(values.len())
}

/// Population standard deviation (divides by `n`).
#[must_use]
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let center = mean(values);
    let variance = values
        .iter()
        .map(|value| {
            let centered = value - center;
            centered * centered
        })
        .sum::<f64>()
        / usize_to_f64(values.len());
    variance.sqrt()
}

/// Sample variance (divides by `n - 1`), `0` for fewer than two values.
#[must_use]
pub fn sample_variance(values: &[f64], center: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values
        .iter()
        .map(|value| {
            let centered = *value - center;
            centered * centered
        })
        .sum::<f64>()
        / usize_to_f64(values.len() - 1)
}
