//! # Spectral inputs
//!
//! Container for observed admittance and coherence spectra with their
//! per-wavenumber uncertainties.
//!
//! # Examples
//!
//! ```
//! use flexure_bayes::SpectralObservation;
//!
//! let k = vec![1.0e-6, 2.0e-6, 3.0e-6];
//! let observation = SpectralObservation::new(
//!     k,
//!     vec![-0.1, -0.08, -0.05],
//!     vec![0.005; 3],
//!     vec![0.9, 0.7, 0.4],
//!     vec![0.1; 3],
//! );
//!
//! assert!(observation.validate().is_ok());
//! ```
//!
//! ```
//! use flexure_bayes::SpectralObservation;
//!
//! let observation = SpectralObservation::new(
//!     vec![1.0e-6, 2.0e-6, 3.0e-6],
//!     vec![-0.1, -0.08],
//!     vec![0.005; 3],
//!     vec![0.9, 0.7, 0.4],
//!     vec![0.1; 3],
//! );
//!
//! assert!(observation.validate().is_err());
//! ```

use thiserror::Error;

/// Errors returned when validating spectral inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("wavenumber vector must not be empty")]
    Empty,
    #[error("{field} length ({found}) must match wavenumber length ({expected})")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{field} contains a non-finite value at index {index}")]
    NonFinite { field: &'static str, index: usize },
    #[error("{field} contains a negative uncertainty at index {index}")]
    NegativeUncertainty { field: &'static str, index: usize },
}

/// Observed spectral cross-functions between gravity and topography.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralObservation {
    /// Wavenumbers (rad/m).
    pub k: Vec<f64>,
    /// Admittance (mGal/m).
    pub adm: Vec<f64>,
    /// Admittance uncertainty.
    pub eadm: Vec<f64>,
    /// Coherence.
    pub coh: Vec<f64>,
    /// Coherence uncertainty.
    pub ecoh: Vec<f64>,
}

impl SpectralObservation {
    #[must_use]
    pub const fn new(
        k: Vec<f64>,
        adm: Vec<f64>,
        eadm: Vec<f64>,
        coh: Vec<f64>,
        ecoh: Vec<f64>,
    ) -> Self {
        Self {
            k,
            adm,
            eadm,
            coh,
            ecoh,
        }
    }

    /// Number of wavenumbers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.k.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    /// Validate vector lengths and values.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if any vector length differs from `k`, any value is
    /// non-finite, or an uncertainty is negative.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.k.is_empty() {
            return Err(InputError::Empty);
        }
        let expected = self.k.len();
        for (field, values) in self.named_fields().into_iter().skip(1) {
            if values.len() != expected {
                return Err(InputError::LengthMismatch {
                    field,
                    expected,
                    found: values.len(),
                });
            }
        }
        for (field, values) in self.named_fields() {
            if let Some(index) = values.iter().position(|value| !value.is_finite()) {
                return Err(InputError::NonFinite { field, index });
            }
        }
        for (field, values) in [("eadm", &self.eadm), ("ecoh", &self.ecoh)] {
            if let Some(index) = values.iter().position(|value| *value < 0.0) {
                return Err(InputError::NegativeUncertainty { field, index });
            }
        }
        Ok(())
    }

    fn named_fields(&self) -> [(&'static str, &Vec<f64>); 5] {
        [
            ("k", &self.k),
            ("adm", &self.adm),
            ("eadm", &self.eadm),
            ("coh", &self.coh),
            ("ecoh", &self.ecoh),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(n: usize) -> SpectralObservation {
        SpectralObservation::new(
            vec![1.0e-6; n],
            vec![-0.1; n],
            vec![0.005; n],
            vec![0.5; n],
            vec![0.1; n],
        )
    }

    #[test]
    fn validate_accepts_consistent_lengths() {
        assert!(observation(4).validate().is_ok());
    }

    #[test]
    fn validate_reports_the_mismatched_field() {
        let mut input = observation(300);
        input.adm.pop();
        assert_eq!(
            input.validate(),
            Err(InputError::LengthMismatch {
                field: "adm",
                expected: 300,
                found: 299,
            })
        );
    }

    #[test]
    fn validate_rejects_empty_input() {
        assert_eq!(observation(0).validate(), Err(InputError::Empty));
    }

    #[test]
    fn validate_rejects_negative_uncertainty() {
        let mut input = observation(3);
        input.ecoh[2] = -0.1;
        assert_eq!(
            input.validate(),
            Err(InputError::NegativeUncertainty {
                field: "ecoh",
                index: 2,
            })
        );
    }

    #[test]
    fn validate_rejects_non_finite_values() {
        let mut input = observation(3);
        input.coh[1] = f64::NAN;
        assert_eq!(
            input.validate(),
            Err(InputError::NonFinite {
                field: "coh",
                index: 1,
            })
        );
    }
}
