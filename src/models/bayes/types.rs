//! Core public types for Bayesian Te/F estimation.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::priors::PriorConfig;
use crate::inference::{InferenceError, SamplerConfig};
use crate::input::InputError;
use crate::models::flexure::ForwardError;

/// Errors returned by model construction, sampling, and point estimation.
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    InvalidMode(#[from] AnalysisModeError),
    #[error(transparent)]
    InvalidSampler(#[from] InferenceError),
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("{field} has a zero uncertainty at index {index}; the normal likelihood is degenerate")]
    DegenerateUncertainty { field: &'static str, index: usize },
    #[error("invalid prior configuration")]
    InvalidPriorConfig,
    #[error("invalid MAP options")]
    InvalidMapOptions,
    #[error("chain {chain} panicked")]
    ChainPanicked { chain: usize },
    #[error("chain {chain} could not find a starting point with finite log density")]
    NonFiniteInitialPoint { chain: usize },
    #[error("neither L-BFGS nor Nelder-Mead produced a finite optimum")]
    NonFiniteOptimum,
    #[error("posterior trace has no draws")]
    EmptyTrace,
    #[error("parameter `{name}` is missing from the estimate")]
    MissingParameter { name: String },
}

/// Unrecognised analysis mode string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown analysis mode `{0}`; expected `admit`, `coh` or `admit_coh`")]
pub struct AnalysisModeError(pub String);

/// Which observed spectra enter the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Admittance only, weighted by `eadm`.
    #[default]
    Admittance,
    /// Coherence only, weighted by `ecoh`.
    Coherence,
    /// Admittance followed by coherence in one stacked likelihood.
    Joint,
}

impl AnalysisMode {
    /// Short mode name accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admittance => "admit",
            Self::Coherence => "coh",
            Self::Joint => "admit_coh",
        }
    }

    #[must_use]
    pub const fn uses_admittance(self) -> bool {
        matches!(self, Self::Admittance | Self::Joint)
    }

    #[must_use]
    pub const fn uses_coherence(self) -> bool {
        matches!(self, Self::Coherence | Self::Joint)
    }
}

impl FromStr for AnalysisMode {
    type Err = AnalysisModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admit" => Ok(Self::Admittance),
            "coh" => Ok(Self::Coherence),
            "admit_coh" => Ok(Self::Joint),
            other => Err(AnalysisModeError(other.to_owned())),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the initial-load phase `alpha` is a free parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    /// `alpha` fixed at the uncorrelated-load value.
    #[default]
    Fixed,
    /// `alpha` sampled with a uniform prior.
    Estimated,
}

/// Optimizer settings for the maximum-a-posteriori search.
#[derive(Debug, Clone, Copy)]
pub struct MapOptions {
    /// Iteration cap for L-BFGS.
    pub lbfgs_max_iters: u64,
    /// L-BFGS history length.
    pub lbfgs_memory: usize,
    /// Gradient-norm stopping tolerance for L-BFGS.
    pub lbfgs_tolerance_grad: f64,
    /// Cost-change stopping tolerance for L-BFGS.
    pub lbfgs_tolerance_cost: f64,
    /// Iteration cap for the Nelder-Mead fallback.
    pub nelder_mead_max_iters: u64,
    /// Simplex standard-deviation stopping tolerance.
    pub nelder_mead_sd_tolerance: f64,
    /// Initial simplex edge length in the unconstrained space.
    pub simplex_step: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            lbfgs_max_iters: 500,
            lbfgs_memory: 7,
            lbfgs_tolerance_grad: 1.0e-6,
            lbfgs_tolerance_cost: 1.0e-12,
            nelder_mead_max_iters: 5_000,
            nelder_mead_sd_tolerance: 1.0e-10,
            simplex_step: 0.25,
        }
    }
}

impl MapOptions {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.lbfgs_max_iters > 0
            && self.lbfgs_memory > 0
            && self.lbfgs_tolerance_grad > 0.0
            && self.lbfgs_tolerance_cost > 0.0
            && self.nelder_mead_max_iters > 0
            && self.nelder_mead_sd_tolerance > 0.0
            && self.simplex_step > 0.0
    }
}

/// Full configuration of one estimation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimationConfig {
    pub mode: AnalysisMode,
    pub phase: LoadPhase,
    pub priors: PriorConfig,
    pub sampler: SamplerConfig,
    pub map: MapOptions,
}

impl EstimationConfig {
    /// Configuration for `mode`, all other settings default.
    #[must_use]
    pub fn for_mode(mode: AnalysisMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns `EstimateError` if any nested configuration is invalid.
    pub fn validate(&self) -> Result<(), EstimateError> {
        self.sampler.validate()?;
        if !self.priors.is_valid() {
            return Err(EstimateError::InvalidPriorConfig);
        }
        if !self.map.is_valid() {
            return Err(EstimateError::InvalidMapOptions);
        }
        Ok(())
    }
}
