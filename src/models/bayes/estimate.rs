//! End-to-end Te/F estimation: model, sampling, MAP search, summary.

use crate::input::SpectralObservation;
use crate::models::flexure::ForwardModel;

use super::map::{MapEstimate, find_map};
use super::model::{F, SpectralModel, TE};
use super::posterior::{PosteriorSummary, PosteriorTrace, summarize_trace};
use super::sampler::sample_posterior;
use super::types::{EstimateError, EstimationConfig};

/// Everything produced by one estimation call.
#[derive(Debug, Clone)]
pub struct BayesEstimate {
    pub trace: PosteriorTrace,
    pub map_estimate: MapEstimate,
    pub summary: PosteriorSummary,
}

/// Posterior mean, standard deviation and MAP value of Te and F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeFEstimate {
    pub mean_te: f64,
    pub std_te: f64,
    pub best_te: f64,
    pub mean_f: f64,
    pub std_f: f64,
    pub best_f: f64,
}

impl TeFEstimate {
    /// `(mean_te, std_te, best_te, mean_f, std_f, best_f)`.
    #[must_use]
    pub const fn as_tuple(&self) -> (f64, f64, f64, f64, f64, f64) {
        (
            self.mean_te,
            self.std_te,
            self.best_te,
            self.mean_f,
            self.std_f,
            self.best_f,
        )
    }
}

/// Estimate Te and F (and optionally the load phase) from observed
/// admittance and coherence spectra.
///
/// The observation is validated before any model is built, so shape errors
/// never reach the sampler. Sampling is reproducible for a fixed
/// `config.sampler.seed`.
///
/// # Errors
///
/// Returns `EstimateError` for invalid input or configuration, degenerate
/// uncertainties in the active channel, sampler failures, or when no finite
/// MAP point can be found.
///
/// # Examples
///
/// ```no_run
/// use flexure_bayes::{
///     AnalysisMode, ElasticPlate, EstimationConfig, SpectralObservation, bayes_real_estimate,
///     extract_te_f,
/// };
///
/// # fn main() -> Result<(), flexure_bayes::EstimateError> {
/// let k = vec![1.0e-6, 2.0e-6, 3.0e-6];
/// let observation = SpectralObservation::new(
///     k,
///     vec![-0.1, -0.08, -0.05],
///     vec![0.005; 3],
///     vec![0.9, 0.6, 0.3],
///     vec![0.1; 3],
/// );
/// let config = EstimationConfig::for_mode(AnalysisMode::Joint);
/// let estimate = bayes_real_estimate(&observation, &ElasticPlate::default(), &config)?;
/// let te_f = extract_te_f(&estimate.map_estimate, &estimate.summary)?;
/// println!("Te = {:.1} km", te_f.mean_te);
/// # Ok(())
/// # }
/// ```
pub fn bayes_real_estimate<M: ForwardModel + ?Sized>(
    observation: &SpectralObservation,
    forward: &M,
    config: &EstimationConfig,
) -> Result<BayesEstimate, EstimateError> {
    config.validate()?;
    observation.validate()?;

    let model = SpectralModel::build(
        observation,
        forward,
        config.mode,
        config.phase,
        config.priors,
    )?;
    log::info!(
        "estimating {:?} in `{}` mode ({:?} load phase) from {} wavenumbers",
        model.parameter_names(),
        model.mode(),
        model.phase(),
        observation.len()
    );

    let trace = sample_posterior(&model, &config.sampler)?;
    let map_estimate = find_map(&model, &trace, &config.map)?;
    let summary = summarize_trace(&trace)?;

    Ok(BayesEstimate {
        trace,
        map_estimate,
        summary,
    })
}

/// Pull Te and F statistics out of a MAP estimate and summary by name.
///
/// # Errors
///
/// Returns `EstimateError::MissingParameter` if either result lacks `Te` or `F`.
pub fn extract_te_f(
    map_estimate: &MapEstimate,
    summary: &PosteriorSummary,
) -> Result<TeFEstimate, EstimateError> {
    let row = |name: &str| {
        summary
            .get(name)
            .ok_or_else(|| EstimateError::MissingParameter {
                name: name.to_owned(),
            })
    };
    let best = |name: &str| {
        map_estimate
            .get(name)
            .ok_or_else(|| EstimateError::MissingParameter {
                name: name.to_owned(),
            })
    };

    let te = row(TE)?;
    let f = row(F)?;
    Ok(TeFEstimate {
        mean_te: te.mean,
        std_te: te.sd,
        best_te: best(TE)?,
        mean_f: f.mean,
        std_f: f.sd,
        best_f: best(F)?,
    })
}
