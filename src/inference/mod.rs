//! Sampler configuration and MCMC bookkeeping types.

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Errors for sampler configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("each chain must retain at least {minimum} draws; found {found}")]
    InsufficientDraws { minimum: usize, found: usize },
    #[error("at least one chain is required")]
    InvalidChainCount,
    #[error("multi-chain seed stride must be positive")]
    InvalidSeedStride,
    #[error("invalid step tuning configuration")]
    InvalidStepTuning,
}

/// How step methods are assigned to latent parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepSelection {
    /// Gradient steps where the model exposes valid gradients, slice sampling elsewhere.
    #[default]
    Auto,
    /// Univariate slice sampling for every parameter.
    Slice,
    /// Adaptive random-walk Metropolis for every parameter.
    Metropolis,
    /// Metropolis-adjusted Langevin for every parameter, slice sampling when gradients fail.
    Langevin,
}

/// Step method actually driving a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMethod {
    Slice,
    Metropolis,
    Langevin,
}

impl std::fmt::Display for StepMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Slice => "Slice",
            Self::Metropolis => "Metropolis",
            Self::Langevin => "Langevin",
        };
        f.write_str(name)
    }
}

/// Proposal-scale and adaptation controls, all in the unconstrained space.
#[derive(Debug, Clone, Copy)]
pub struct StepTuning {
    /// Minimum allowed proposal scale or slice width.
    pub min_scale: f64,
    /// Initial slice width.
    pub slice_width: f64,
    /// Maximum number of step-out expansions on each side of a slice.
    pub slice_max_steps_out: usize,
    /// Maximum number of shrinkage evaluations before the slice step gives up.
    pub slice_max_shrinks: usize,
    /// Initial random-walk scale for Metropolis steps.
    pub metropolis_scale: f64,
    /// Initial Langevin step size.
    pub langevin_step_size: f64,
    /// Adapt every `adaptation_interval` tuning iterations.
    pub adaptation_interval: usize,
    /// Acceptance-rate window for Metropolis adaptation.
    pub metropolis_target: (f64, f64),
    /// Acceptance-rate window for Langevin adaptation.
    pub langevin_target: (f64, f64),
    /// Multiplicative scale decrease when acceptance is below target.
    pub scale_decrease_factor: f64,
    /// Multiplicative scale increase when acceptance is above target.
    pub scale_increase_factor: f64,
}

impl Default for StepTuning {
    fn default() -> Self {
        Self {
            min_scale: 1.0e-3,
            slice_width: 1.0,
            slice_max_steps_out: 50,
            slice_max_shrinks: 200,
            metropolis_scale: 0.5,
            langevin_step_size: 0.1,
            adaptation_interval: 50,
            metropolis_target: (0.2, 0.35),
            langevin_target: (0.45, 0.7),
            scale_decrease_factor: 0.9,
            scale_increase_factor: 1.1,
        }
    }
}

impl StepTuning {
    /// Whether tuning settings are numerically valid.
    #[must_use]
    pub fn is_valid(self) -> bool {
        let window_ok =
            |(low, high): (f64, f64)| (0.0..=1.0).contains(&low) && high <= 1.0 && low < high;
        self.min_scale > 0.0
            && self.slice_width > 0.0
            && self.slice_max_steps_out > 0
            && self.slice_max_shrinks > 0
            && self.metropolis_scale > 0.0
            && self.langevin_step_size > 0.0
            && self.adaptation_interval > 0
            && window_ok(self.metropolis_target)
            && window_ok(self.langevin_target)
            && self.scale_decrease_factor > 0.0
            && self.scale_increase_factor > 0.0
    }
}

/// MCMC schedule and chain layout.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Retained draws per chain.
    pub samples: usize,
    /// Tuning iterations per chain, discarded.
    pub tunes: usize,
    /// Number of independent chains, run concurrently.
    pub chains: usize,
    /// RNG seed of the first chain.
    pub seed: u64,
    /// Chain `i` uses `seed + i * seed_stride` with wrapping arithmetic.
    pub seed_stride: u64,
    pub step_selection: StepSelection,
    pub tuning: StepTuning,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: 500,
            tunes: 500,
            chains: 4,
            seed: 42,
            seed_stride: 10_000,
            step_selection: StepSelection::Auto,
            tuning: StepTuning::default(),
        }
    }
}

impl SamplerConfig {
    /// Minimum retained draws per chain needed for split diagnostics.
    pub const MIN_SAMPLES: usize = 4;

    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub fn validate(self) -> Result<(), InferenceError> {
        if self.samples < Self::MIN_SAMPLES {
            return Err(InferenceError::InsufficientDraws {
                minimum: Self::MIN_SAMPLES,
                found: self.samples,
            });
        }
        if self.chains == 0 {
            return Err(InferenceError::InvalidChainCount);
        }
        if self.seed_stride == 0 {
            return Err(InferenceError::InvalidSeedStride);
        }
        if !self.tuning.is_valid() {
            return Err(InferenceError::InvalidStepTuning);
        }
        Ok(())
    }

    /// Seed used by chain `chain_index`.
    #[must_use]
    pub fn chain_seed(self, chain_index: usize) -> u64 {
        let index_u64 = u64::try_from(chain_index).unwrap_or(u64::MAX);
        self.seed
            .wrapping_add(index_u64.saturating_mul(self.seed_stride))
    }

    /// Total iterations per chain.
    #[must_use]
    pub const fn iterations(self) -> usize {
        self.tunes + self.samples
    }
}

/// Proposal counters for a single step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalStats {
    pub proposed: usize,
    pub accepted: usize,
}

impl ProposalStats {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }
}
