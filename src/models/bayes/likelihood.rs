//! Normal likelihood and observed pass-through nodes.

use statrs::distribution::{Continuous, Normal};

use super::types::EstimateError;

const HALF_LN_TAU: f64 = 0.918_938_533_204_672_8;

/// A normal node observed at its own mean: `Normal(mu = values, sigma = scale)`
/// with `observed = values`.
///
/// It carries data into the model and adds a constant to the joint log density.
#[derive(Debug, Clone)]
pub struct ObservedNormal {
    values: Vec<f64>,
    scale: f64,
}

impl ObservedNormal {
    #[must_use]
    pub const fn new(values: Vec<f64>, scale: f64) -> Self {
        Self { values, scale }
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Constant log density contributed by the node.
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::InvalidPriorConfig` if `scale` is not a valid
    /// normal standard deviation.
    pub fn log_density(&self) -> Result<f64, EstimateError> {
        let mut total = 0.0;
        for &value in &self.values {
            let node =
                Normal::new(value, self.scale).map_err(|_| EstimateError::InvalidPriorConfig)?;
            total += node.ln_pdf(value);
        }
        Ok(total)
    }
}

/// Independent normal likelihood with per-datum scale.
#[derive(Debug, Clone)]
pub struct NormalLikelihood {
    observed: Vec<f64>,
    sigma: Vec<f64>,
    log_normalizer: f64,
}

impl NormalLikelihood {
    /// Build from matching observed and scale vectors.
    ///
    /// `sigma` must be strictly positive; callers check this against the
    /// originating uncertainty field so the error can name it.
    #[must_use]
    pub fn new(observed: Vec<f64>, sigma: Vec<f64>) -> Self {
        let log_normalizer = -sigma
            .iter()
            .map(|scale| scale.ln() + HALF_LN_TAU)
            .sum::<f64>();
        Self {
            observed,
            sigma,
            log_normalizer,
        }
    }

    #[must_use]
    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Log likelihood of the observations given predicted means.
    ///
    /// Misshapen or non-finite predictions give negative infinity.
    #[must_use]
    pub fn log_density(&self, mean: &[f64]) -> f64 {
        if mean.len() != self.observed.len() {
            return f64::NEG_INFINITY;
        }
        let quadratic = self
            .observed
            .iter()
            .zip(mean)
            .zip(&self.sigma)
            .map(|((observed, predicted), scale)| {
                let standardized = (observed - predicted) / scale;
                standardized * standardized
            })
            .sum::<f64>();
        let total = (-0.5f64).mul_add(quadratic, self.log_normalizer);
        if total.is_finite() {
            total
        } else {
            f64::NEG_INFINITY
        }
    }

    /// `d log L / d mean_i = (observed_i - mean_i) / sigma_i^2`.
    #[must_use]
    pub fn mean_gradient(&self, mean: &[f64]) -> Vec<f64> {
        self.observed
            .iter()
            .zip(mean)
            .zip(&self.sigma)
            .map(|((observed, predicted), scale)| (observed - predicted) / (scale * scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn observed_node_contributes_standard_normal_constant() {
        let node = ObservedNormal::new(vec![1.0e-6, 2.0e-6, 3.0e-6], 1.0);
        let value = node.log_density().expect("valid node");
        assert_relative_eq!(value, -3.0 * HALF_LN_TAU, epsilon = 1.0e-12);
    }

    #[test]
    fn likelihood_matches_statrs_normal() {
        let likelihood = NormalLikelihood::new(vec![0.1, -0.2], vec![0.5, 2.0]);
        let mean = [0.0, 0.3];
        let expected = Normal::new(0.0, 0.5).expect("normal").ln_pdf(0.1)
            + Normal::new(0.3, 2.0).expect("normal").ln_pdf(-0.2);
        assert_relative_eq!(likelihood.log_density(&mean), expected, epsilon = 1.0e-12);
    }

    #[test]
    fn misshapen_or_nan_predictions_are_impossible() {
        let likelihood = NormalLikelihood::new(vec![0.1, -0.2], vec![0.5, 2.0]);
        assert_eq!(likelihood.log_density(&[0.0]), f64::NEG_INFINITY);
        assert_eq!(likelihood.log_density(&[0.0, f64::NAN]), f64::NEG_INFINITY);
    }

    #[test]
    fn mean_gradient_points_toward_observations() {
        let likelihood = NormalLikelihood::new(vec![1.0, -1.0], vec![1.0, 0.5]);
        let gradient = likelihood.mean_gradient(&[0.0, 0.0]);
        assert_relative_eq!(gradient[0], 1.0);
        assert_relative_eq!(gradient[1], -4.0);
    }
}
