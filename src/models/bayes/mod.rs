//! Bayesian estimation of elastic thickness and load ratio.
//!
//! A [`SpectralModel`] ties uniform priors on `Te`, `F` and optionally the
//! load phase `alpha` to a normal likelihood of the observed admittance,
//! coherence, or both. [`sample_posterior`] draws from it with a multi-chain
//! compound-step sampler, [`find_map`] refines the best draw to the posterior
//! mode, and [`summarize_trace`] reduces the trace to a rounded summary table.
//! [`bayes_real_estimate`] runs the whole pipeline.

pub mod diagnostics;
pub mod estimate;
pub mod likelihood;
pub mod map;
pub mod model;
pub mod posterior;
pub mod priors;
pub mod report;
pub mod sampler;
pub mod steps;
pub mod types;

pub use diagnostics::{
    correlation_matrix, effective_sample_size, hpd_interval, mc_error, split_rhat,
};
pub use estimate::{BayesEstimate, TeFEstimate, bayes_real_estimate, extract_te_f};
pub use map::{MapEstimate, OptimizerKind, find_map};
pub use model::{JacobianTerm, SpectralModel};
pub use posterior::{
    ChainStats, ChainTrace, ParameterSummary, PosteriorSummary, PosteriorTrace, summarize_trace,
};
pub use priors::{IntervalTransform, PriorConfig, UniformPrior};
pub use report::{render_map_table, render_summary_table};
pub use sampler::{StepAssignment, assign_steps, sample_posterior};
pub use types::{
    AnalysisMode, AnalysisModeError, EstimateError, EstimationConfig, LoadPhase, MapOptions,
};
