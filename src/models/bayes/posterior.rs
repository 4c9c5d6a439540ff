//! Posterior traces and their summary table.

use faer::Mat;

use crate::inference::StepMethod;
use crate::utils::{mean, population_std, round_to};

use super::diagnostics::{
    MC_ERROR_BATCHES, correlation_matrix, effective_sample_size, hpd_interval, mc_error,
    split_rhat,
};
use super::types::EstimateError;

/// Decimal places kept in the summary table.
pub const SUMMARY_DECIMALS: i32 = 2;
/// Tail mass excluded from the highest-posterior-density interval.
pub const HPD_ALPHA: f64 = 0.05;
/// Effective sample sizes below this are logged.
pub const LOW_ESS_WARNING: f64 = 200.0;
/// Split-Rhat values above this are logged.
pub const HIGH_RHAT_WARNING: f64 = 1.05;

/// Per-chain sampler bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub chain: usize,
    pub seed: u64,
    /// Step method per parameter, in model order.
    pub methods: Vec<StepMethod>,
    /// Fraction of post-tuning updates that moved each parameter.
    pub acceptance_rates: Vec<f64>,
    /// Final proposal scale, slice width or step size per parameter.
    pub final_scales: Vec<f64>,
    /// Gradient steps were requested but the model offered no gradient.
    pub gradient_fallback: bool,
}

/// Retained draws of one chain.
#[derive(Debug, Clone)]
pub struct ChainTrace {
    /// `draws[p][t]` is parameter `p` (constrained) at retained draw `t`.
    pub draws: Vec<Vec<f64>>,
    /// Joint log density of each retained draw, without the transform Jacobian.
    pub log_density: Vec<f64>,
    pub stats: ChainStats,
}

impl ChainTrace {
    #[must_use]
    pub fn len(&self) -> usize {
        self.log_density.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log_density.is_empty()
    }
}

/// Posterior draws of every chain, queryable by parameter name.
#[derive(Debug, Clone)]
pub struct PosteriorTrace {
    names: Vec<&'static str>,
    chains: Vec<ChainTrace>,
}

impl PosteriorTrace {
    #[must_use]
    pub const fn new(names: Vec<&'static str>, chains: Vec<ChainTrace>) -> Self {
        Self { names, chains }
    }

    #[must_use]
    pub fn parameter_names(&self) -> &[&'static str] {
        &self.names
    }

    #[must_use]
    pub fn chains(&self) -> &[ChainTrace] {
        &self.chains
    }

    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Draws retained by the shortest chain.
    #[must_use]
    pub fn draws_per_chain(&self) -> usize {
        self.chains.iter().map(ChainTrace::len).min().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draws_per_chain() == 0
    }

    #[must_use]
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| *candidate == name)
    }

    /// Draws of `name` from every chain, chain after chain.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.parameter_index(name)?;
        Some(
            self.chains
                .iter()
                .flat_map(|chain| chain.draws[index].iter().copied())
                .collect(),
        )
    }

    /// Per-chain draws of `name`.
    #[must_use]
    pub fn chain_values(&self, name: &str) -> Option<Vec<&[f64]>> {
        let index = self.parameter_index(name)?;
        Some(
            self.chains
                .iter()
                .map(|chain| chain.draws[index].as_slice())
                .collect(),
        )
    }

    /// Retained draw with the highest log density and that density.
    #[must_use]
    pub fn best_draw(&self) -> Option<(Vec<f64>, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for (chain_index, chain) in self.chains.iter().enumerate() {
            for (draw_index, &value) in chain.log_density.iter().enumerate() {
                if value.is_finite() && best.is_none_or(|(_, _, current)| value > current) {
                    best = Some((chain_index, draw_index, value));
                }
            }
        }
        best.map(|(chain_index, draw_index, value)| {
            let chain = &self.chains[chain_index];
            (
                chain.draws.iter().map(|column| column[draw_index]).collect(),
                value,
            )
        })
    }
}

/// One row of the posterior summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: &'static str,
    pub mean: f64,
    pub sd: f64,
    pub mc_error: f64,
    pub hpd_2_5: f64,
    pub hpd_97_5: f64,
    pub n_eff: f64,
    pub r_hat: f64,
}

impl ParameterSummary {
    /// Copy with every statistic rounded to `decimals` places.
    #[must_use]
    pub fn rounded(&self, decimals: i32) -> Self {
        Self {
            name: self.name,
            mean: round_to(self.mean, decimals),
            sd: round_to(self.sd, decimals),
            mc_error: round_to(self.mc_error, decimals),
            hpd_2_5: round_to(self.hpd_2_5, decimals),
            hpd_97_5: round_to(self.hpd_97_5, decimals),
            n_eff: round_to(self.n_eff, decimals),
            r_hat: round_to(self.r_hat, decimals),
        }
    }
}

/// Summary rows in model order plus the posterior correlation matrix.
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    pub rows: Vec<ParameterSummary>,
    /// Pearson correlations between parameters, in row order.
    pub correlation: Mat<f64>,
}

impl PosteriorSummary {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.rows.iter().find(|row| row.name == name)
    }

    /// Correlation between two named parameters.
    #[must_use]
    pub fn correlation_between(&self, first: &str, second: &str) -> Option<f64> {
        let i = self.rows.iter().position(|row| row.name == first)?;
        let j = self.rows.iter().position(|row| row.name == second)?;
        Some(self.correlation[(i, j)])
    }
}

/// Summarize every parameter of a trace, rounded for reporting.
///
/// Low effective sample sizes and large split-Rhat values are logged, not
/// returned as errors.
///
/// # Errors
///
/// Returns `EstimateError` if the trace is empty or chains are too short for
/// split diagnostics.
pub fn summarize_trace(trace: &PosteriorTrace) -> Result<PosteriorSummary, EstimateError> {
    if trace.is_empty() {
        return Err(EstimateError::EmptyTrace);
    }

    let mut rows = Vec::with_capacity(trace.parameter_names().len());
    let mut pooled_columns = Vec::with_capacity(trace.parameter_names().len());
    for &name in trace.parameter_names() {
        let pooled = trace.values(name).ok_or_else(|| missing(name))?;
        let chains = trace.chain_values(name).ok_or_else(|| missing(name))?;

        let (hpd_2_5, hpd_97_5) = hpd_interval(&pooled, HPD_ALPHA);
        let row = ParameterSummary {
            name,
            mean: mean(&pooled),
            sd: population_std(&pooled),
            mc_error: mc_error(&pooled, MC_ERROR_BATCHES),
            hpd_2_5,
            hpd_97_5,
            n_eff: effective_sample_size(&chains),
            r_hat: split_rhat(&chains)?,
        };

        if row.n_eff < LOW_ESS_WARNING {
            log::warn!(
                "effective sample size of {name} is {:.1}, below {LOW_ESS_WARNING}",
                row.n_eff
            );
        }
        if row.r_hat > HIGH_RHAT_WARNING {
            log::warn!(
                "split-Rhat of {name} is {:.3}; chains may not have converged",
                row.r_hat
            );
        }

        rows.push(row.rounded(SUMMARY_DECIMALS));
        pooled_columns.push(pooled);
    }

    Ok(PosteriorSummary {
        rows,
        correlation: correlation_matrix(&pooled_columns),
    })
}

fn missing(name: &str) -> EstimateError {
    EstimateError::MissingParameter {
        name: name.to_owned(),
    }
}
