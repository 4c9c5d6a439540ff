//! Uniform priors on plate parameters and their log-odds transforms.

use std::f64::consts::PI;

use statrs::distribution::{Continuous, Uniform};

use super::types::EstimateError;
use crate::utils::{logistic_stable, softplus};

/// Largest magnitude of an unconstrained coordinate.
///
/// Beyond this the logistic saturates in double precision and the constrained
/// value sits on the bound.
const MAX_LOG_ODDS: f64 = 36.0;

/// Bounds of the uniform priors.
#[derive(Debug, Clone, Copy)]
pub struct PriorConfig {
    /// Lower bound for elastic thickness (km).
    pub te_lower: f64,
    /// Upper bound for elastic thickness (km).
    pub te_upper: f64,
    /// Lower bound for the load ratio.
    pub f_lower: f64,
    /// Upper bound for the load ratio; must stay below one.
    pub f_upper: f64,
    /// Lower bound for the load phase (radians).
    pub alpha_lower: f64,
    /// Upper bound for the load phase (radians).
    pub alpha_upper: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            te_lower: 2.0,
            te_upper: 250.0,
            f_lower: 0.0,
            f_upper: 0.999_99,
            alpha_lower: 0.0,
            alpha_upper: PI,
        }
    }
}

impl PriorConfig {
    /// Whether all bounds are finite, ordered, and inside the physical domain.
    #[must_use]
    pub fn is_valid(self) -> bool {
        let ordered = |low: f64, high: f64| low.is_finite() && high.is_finite() && low < high;
        ordered(self.te_lower, self.te_upper)
            && ordered(self.f_lower, self.f_upper)
            && ordered(self.alpha_lower, self.alpha_upper)
            && self.te_lower >= 0.0
            && self.f_lower >= 0.0
            && self.f_upper < 1.0
    }
}

/// `Uniform(lower, upper)` prior paired with its interval transform.
#[derive(Debug, Clone)]
pub struct UniformPrior {
    density: Uniform,
    transform: IntervalTransform,
}

impl UniformPrior {
    /// # Errors
    ///
    /// Returns `EstimateError::InvalidPriorConfig` unless `lower < upper` and both are finite.
    pub fn new(lower: f64, upper: f64) -> Result<Self, EstimateError> {
        let density = Uniform::new(lower, upper).map_err(|_| EstimateError::InvalidPriorConfig)?;
        Ok(Self {
            density,
            transform: IntervalTransform { lower, upper },
        })
    }

    #[must_use]
    pub fn ln_pdf(&self, value: f64) -> f64 {
        self.density.ln_pdf(value)
    }

    #[must_use]
    pub const fn transform(&self) -> IntervalTransform {
        self.transform
    }
}

/// Log-odds map between `(lower, upper)` and the real line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalTransform {
    pub lower: f64,
    pub upper: f64,
}

impl IntervalTransform {
    fn width(self) -> f64 {
        self.upper - self.lower
    }

    /// `lower + (upper - lower) * logistic(z)`.
    #[must_use]
    pub fn to_constrained(self, z: f64) -> f64 {
        self.width()
            .mul_add(logistic_stable(z), self.lower)
            .clamp(self.lower, self.upper)
    }

    /// Inverse map, clamped so interval endpoints stay finite.
    #[must_use]
    pub fn to_unconstrained(self, value: f64) -> f64 {
        let p = (value - self.lower) / self.width();
        if p <= 0.0 {
            return -MAX_LOG_ODDS;
        }
        if p >= 1.0 {
            return MAX_LOG_ODDS;
        }
        (p.ln() - (-p).ln_1p()).clamp(-MAX_LOG_ODDS, MAX_LOG_ODDS)
    }

    /// `dx/dz` at `z`.
    #[must_use]
    pub fn derivative(self, z: f64) -> f64 {
        let s = logistic_stable(z);
        self.width() * s * (1.0 - s)
    }

    /// `log |dx/dz|` at `z`.
    #[must_use]
    pub fn log_jacobian(self, z: f64) -> f64 {
        self.width().ln() - softplus(-z) - softplus(z)
    }

    /// `d/dz log |dx/dz|`.
    #[must_use]
    pub fn log_jacobian_gradient(self, z: f64) -> f64 {
        2.0f64.mul_add(-logistic_stable(z), 1.0)
    }
}
