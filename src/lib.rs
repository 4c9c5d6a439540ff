#![forbid(unsafe_code)]

//! # `flexure_bayes`
//!
//! Bayesian estimation of lithospheric effective elastic thickness (`Te`) and
//! subsurface-to-surface load ratio (`F`) from observed admittance and
//! coherence spectra between gravity and topography.
//!
//! Plate-flexure theory enters through the [`ForwardModel`] trait; the crate
//! ships [`ElasticPlate`] as a reference implementation and
//! [`FiniteDifference`] to give any model a Jacobian. Inference runs a
//! multi-chain MCMC sampler, refines the best draw to a MAP estimate, and
//! summarizes the posterior with convergence diagnostics.

pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use inference::{
    InferenceError, ProposalStats, SamplerConfig, StepMethod, StepSelection, StepTuning,
};
pub use input::{InputError, SpectralObservation};

pub use models::flexure::{
    ElasticPlate, FiniteDifference, FlexureConstants, FlexureParams, ForwardError, ForwardModel,
    ForwardModelAdapter, SpectralJacobian, SpectralPrediction, UNCORRELATED_LOAD_PHASE,
};

pub use models::bayes::{
    AnalysisMode, AnalysisModeError, BayesEstimate, ChainStats, ChainTrace, EstimateError,
    EstimationConfig, LoadPhase, MapEstimate, MapOptions, OptimizerKind, ParameterSummary,
    PosteriorSummary, PosteriorTrace, PriorConfig, SpectralModel, TeFEstimate,
    bayes_real_estimate, extract_te_f, find_map, render_map_table, render_summary_table,
    sample_posterior, summarize_trace,
};
