//! Multi-chain compound-step posterior sampler.
//!
//! Every chain walks the log-odds space of the model parameters. Each
//! iteration updates slice and Metropolis parameters one at a time, then moves
//! all gradient parameters together with one Langevin step. Step sizes adapt
//! only during tuning; tuning draws are discarded.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::inference::{ProposalStats, SamplerConfig, StepMethod, StepSelection, StepTuning};
use crate::models::flexure::ForwardModel;
use crate::utils::usize_to_f64;

use super::model::{JacobianTerm, SpectralModel};
use super::posterior::{ChainStats, ChainTrace, PosteriorTrace};
use super::steps::{ChainPoint, adaptation_factor, langevin_step, metropolis_step, slice_step};
use super::types::EstimateError;

/// Jittered starts tried before a chain gives up.
const MAX_INIT_ATTEMPTS: usize = 50;

/// Step method per parameter and whether gradient steps had to be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAssignment {
    pub methods: Vec<StepMethod>,
    pub gradient_fallback: bool,
}

impl StepAssignment {
    fn indices(&self, method: StepMethod) -> Vec<usize> {
        self.methods
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| (*candidate == method).then_some(index))
            .collect()
    }
}

/// Decide which step drives each parameter.
///
/// Gradient steps are used only where the model yields a finite gradient at
/// the shared starting point; all others get slice sampling.
pub fn assign_steps<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    selection: StepSelection,
) -> StepAssignment {
    let dimension = model.dimension();
    let uniform = |method| StepAssignment {
        methods: vec![method; dimension],
        gradient_fallback: false,
    };
    match selection {
        StepSelection::Slice => uniform(StepMethod::Slice),
        StepSelection::Metropolis => uniform(StepMethod::Metropolis),
        StepSelection::Auto | StepSelection::Langevin => {
            let gradient = model
                .unconstrained_gradient(&model.initial_point(), JacobianTerm::Include)
                .filter(|gradient| gradient.iter().any(|value| value.is_finite()));
            if let Some(gradient) = gradient {
                return StepAssignment {
                    methods: gradient
                        .iter()
                        .map(|value| {
                            if value.is_finite() {
                                StepMethod::Langevin
                            } else {
                                StepMethod::Slice
                            }
                        })
                        .collect(),
                    gradient_fallback: false,
                };
            }
            if selection == StepSelection::Langevin {
                log::warn!(
                    "Langevin steps requested but the forward model has no gradient; \
                     using element-wise slice sampling"
                );
            } else {
                log::info!(
                    "gradient initialisation failed; falling back to element-wise slice sampling"
                );
            }
            StepAssignment {
                methods: vec![StepMethod::Slice; dimension],
                gradient_fallback: true,
            }
        }
    }
}

/// Draw posterior samples from every chain concurrently.
///
/// Chain `i` is seeded with `config.chain_seed(i)`, so results are
/// reproducible for a fixed configuration.
///
/// # Errors
///
/// Returns `EstimateError` if the configuration is invalid, a chain cannot
/// find a finite starting point, or a chain thread panics.
pub fn sample_posterior<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    config: &SamplerConfig,
) -> Result<PosteriorTrace, EstimateError> {
    config.validate()?;
    let assignment = assign_steps(model, config.step_selection);
    for (name, method) in model.parameter_names().iter().zip(&assignment.methods) {
        log::info!("{method}: [{name}]");
    }
    log::info!(
        "sampling {} chains of {} tuning and {} retained draws",
        config.chains,
        config.tunes,
        config.samples
    );

    let assignment_ref = &assignment;
    let mut chain_results = (0..config.chains)
        .map(|_| None)
        .collect::<Vec<Option<Result<ChainTrace, EstimateError>>>>();

    std::thread::scope(|scope| {
        let handles = (0..config.chains)
            .map(|chain_index| {
                scope.spawn(move || run_chain(model, config, assignment_ref, chain_index))
            })
            .collect::<Vec<_>>();
        // Join every chain before reporting the first failure.
        for (chain_index, handle) in handles.into_iter().enumerate() {
            chain_results[chain_index] = handle.join().ok();
        }
    });

    let chains = chain_results
        .into_iter()
        .enumerate()
        .map(|(chain_index, result)| {
            result.unwrap_or(Err(EstimateError::ChainPanicked { chain: chain_index }))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PosteriorTrace::new(model.parameter_names(), chains))
}

/// Per-parameter proposal scales and counters for one chain.
struct StepSchedule {
    slice: Vec<usize>,
    metropolis: Vec<usize>,
    langevin: Vec<usize>,
    /// Slice width, Metropolis scale or Langevin step size, by parameter.
    scales: Vec<f64>,
    window: Vec<ProposalStats>,
    retained: Vec<ProposalStats>,
    langevin_window: ProposalStats,
    slice_tunes: usize,
}

impl StepSchedule {
    fn new(assignment: &StepAssignment, tuning: StepTuning) -> Self {
        let scales = assignment
            .methods
            .iter()
            .map(|method| match method {
                StepMethod::Slice => tuning.slice_width,
                StepMethod::Metropolis => tuning.metropolis_scale,
                StepMethod::Langevin => tuning.langevin_step_size,
            })
            .collect();
        let dimension = assignment.methods.len();
        Self {
            slice: assignment.indices(StepMethod::Slice),
            metropolis: assignment.indices(StepMethod::Metropolis),
            langevin: assignment.indices(StepMethod::Langevin),
            scales,
            window: vec![ProposalStats::default(); dimension],
            retained: vec![ProposalStats::default(); dimension],
            langevin_window: ProposalStats::default(),
            slice_tunes: 0,
        }
    }

    fn record(&mut self, index: usize, moved: bool, tuning_phase: bool) {
        if tuning_phase {
            self.window[index].record(moved);
        } else {
            self.retained[index].record(moved);
        }
    }

    /// Running mean of twice the absolute slice move.
    fn tune_slice_widths(&mut self, before: &[f64], after: &[f64], tuning: StepTuning) {
        let count = usize_to_f64(self.slice_tunes);
        for &index in &self.slice {
            let observed = 2.0 * (after[index] - before[index]).abs();
            self.scales[index] =
                (self.scales[index].mul_add(count, observed) / (count + 1.0)).max(tuning.min_scale);
        }
        self.slice_tunes += 1;
    }

    fn adapt(&mut self, tuning: StepTuning) {
        for &index in &self.metropolis {
            let factor = adaptation_factor(
                self.window[index].acceptance_rate(),
                tuning.metropolis_target,
                tuning,
            );
            self.scales[index] = (self.scales[index] * factor).max(tuning.min_scale);
        }
        if !self.langevin.is_empty() {
            let factor = adaptation_factor(
                self.langevin_window.acceptance_rate(),
                tuning.langevin_target,
                tuning,
            );
            for &index in &self.langevin {
                self.scales[index] = (self.scales[index] * factor).max(tuning.min_scale);
            }
        }
        self.window.fill(ProposalStats::default());
        self.langevin_window = ProposalStats::default();
    }
}

fn run_chain<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    config: &SamplerConfig,
    assignment: &StepAssignment,
    chain_index: usize,
) -> Result<ChainTrace, EstimateError> {
    let seed = config.chain_seed(chain_index);
    let mut rng = StdRng::seed_from_u64(seed);
    let tuning = config.tuning;
    let log_density = |z: &[f64]| model.unconstrained_log_density(z, JacobianTerm::Include);
    let gradient = |z: &[f64]| model.unconstrained_gradient(z, JacobianTerm::Include);

    let mut point = jittered_start(model, &mut rng, chain_index)?;
    let mut schedule = StepSchedule::new(assignment, tuning);
    let dimension = model.dimension();
    let mut draws = vec![Vec::with_capacity(config.samples); dimension];
    let mut retained_log_density = Vec::with_capacity(config.samples);

    let slice_indices = schedule.slice.clone();
    let metropolis_indices = schedule.metropolis.clone();
    let langevin_indices = schedule.langevin.clone();

    for iteration in 0..config.iterations() {
        let tuning_phase = iteration < config.tunes;
        let before = point.position.clone();

        for &index in &slice_indices {
            let width = schedule.scales[index];
            let moved = slice_step(&log_density, &mut point, index, width, tuning, &mut rng);
            schedule.record(index, moved, tuning_phase);
        }
        for &index in &metropolis_indices {
            let scale = schedule.scales[index];
            let moved = metropolis_step(&log_density, &mut point, index, scale, &mut rng);
            schedule.record(index, moved, tuning_phase);
        }
        if !langevin_indices.is_empty() {
            let steps = langevin_indices
                .iter()
                .map(|&index| schedule.scales[index])
                .collect::<Vec<_>>();
            let moved = langevin_step(
                &log_density,
                &gradient,
                &mut point,
                &langevin_indices,
                &steps,
                &mut rng,
            );
            if tuning_phase {
                schedule.langevin_window.record(moved);
            }
            for &index in &langevin_indices {
                schedule.record(index, moved, tuning_phase);
            }
        }

        if tuning_phase {
            schedule.tune_slice_widths(&before, &point.position, tuning);
            if (iteration + 1).is_multiple_of(tuning.adaptation_interval) {
                schedule.adapt(tuning);
            }
            continue;
        }

        let constrained = model.to_constrained(&point.position);
        retained_log_density.push(model.log_density(&constrained));
        for (column, value) in draws.iter_mut().zip(constrained) {
            column.push(value);
        }
    }

    let stats = ChainStats {
        chain: chain_index,
        seed,
        methods: assignment.methods.clone(),
        acceptance_rates: schedule
            .retained
            .iter()
            .map(|counts| counts.acceptance_rate())
            .collect(),
        final_scales: schedule.scales.clone(),
        gradient_fallback: assignment.gradient_fallback,
    };
    log::debug!(
        "chain {chain_index} finished with acceptance {:?}",
        stats.acceptance_rates
    );

    Ok(ChainTrace {
        draws,
        log_density: retained_log_density,
        stats,
    })
}

/// Prior midpoint plus `Uniform(-1, 1)` jitter on every coordinate.
fn jittered_start<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    rng: &mut StdRng,
    chain_index: usize,
) -> Result<ChainPoint, EstimateError> {
    let center = model.initial_point();
    for _ in 0..MAX_INIT_ATTEMPTS {
        let position = center
            .iter()
            .map(|value| value + rng.random_range(-1.0..1.0))
            .collect::<Vec<_>>();
        let log_density = model.unconstrained_log_density(&position, JacobianTerm::Include);
        if log_density.is_finite() {
            return Ok(ChainPoint {
                position,
                log_density,
            });
        }
    }
    Err(EstimateError::NonFiniteInitialPoint { chain: chain_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SpectralObservation;
    use crate::models::bayes::priors::PriorConfig;
    use crate::models::bayes::types::{AnalysisMode, LoadPhase};
    use crate::models::flexure::{
        ElasticPlate, FiniteDifference, FlexureParams, ForwardError, SpectralJacobian,
        SpectralPrediction,
    };

    /// Differentiable in `Te` and `F` but not in the load phase.
    struct PhaseBlindPlate(FiniteDifference<ElasticPlate>);

    impl ForwardModel for PhaseBlindPlate {
        fn evaluate(
            &self,
            k: &[f64],
            params: FlexureParams,
        ) -> Result<SpectralPrediction, ForwardError> {
            self.0.evaluate(k, params)
        }

        fn jacobian(
            &self,
            k: &[f64],
            params: FlexureParams,
        ) -> Result<Option<SpectralJacobian>, ForwardError> {
            let mut jacobian = self.0.jacobian(k, params)?;
            if let Some(jacobian) = jacobian.as_mut() {
                jacobian.admittance[2].fill(f64::NAN);
                jacobian.coherence[2].fill(f64::NAN);
            }
            Ok(jacobian)
        }
    }

    struct PanickingPlate;

    impl ForwardModel for PanickingPlate {
        fn evaluate(
            &self,
            _k: &[f64],
            _params: FlexureParams,
        ) -> Result<SpectralPrediction, ForwardError> {
            panic!("forward model crashed");
        }
    }

    fn observation() -> SpectralObservation {
        let k = (1..=40).map(|j| f64::from(j) * 4.0e-7).collect::<Vec<_>>();
        let truth = ElasticPlate::default()
            .evaluate(&k, FlexureParams::new(40.0, 0.5))
            .expect("forward model");
        SpectralObservation::new(
            k,
            truth.admittance,
            vec![0.005; 40],
            truth.coherence,
            vec![0.1; 40],
        )
    }

    fn small_config(step_selection: StepSelection) -> SamplerConfig {
        SamplerConfig {
            samples: 60,
            tunes: 60,
            chains: 2,
            step_selection,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn opaque_model_falls_back_to_slice_sampling() {
        let observation = observation();
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let assignment = assign_steps(&model, StepSelection::Auto);
        assert!(assignment.gradient_fallback);
        assert_eq!(assignment.methods, vec![StepMethod::Slice; 2]);
    }

    #[test]
    fn differentiable_model_gets_langevin_steps() {
        let observation = observation();
        let plate = FiniteDifference::new(ElasticPlate::default());
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let assignment = assign_steps(&model, StepSelection::Auto);
        assert!(!assignment.gradient_fallback);
        assert_eq!(assignment.methods, vec![StepMethod::Langevin; 2]);
    }

    #[test]
    fn sampling_is_reproducible_for_a_fixed_seed() {
        let observation = observation();
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Admittance,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let config = small_config(StepSelection::Slice);
        let first = sample_posterior(&model, &config).expect("first run");
        let second = sample_posterior(&model, &config).expect("second run");
        assert_eq!(first.chain_count(), 2);
        assert_eq!(first.draws_per_chain(), 60);
        assert_eq!(first.values("Te"), second.values("Te"));
        assert_ne!(first.chains()[0].draws[0], first.chains()[1].draws[0]);
    }

    #[test]
    fn metropolis_chains_stay_inside_prior_support() {
        let observation = observation();
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Coherence,
            LoadPhase::Estimated,
            PriorConfig::default(),
        )
        .expect("model");

        let trace = sample_posterior(&model, &small_config(StepSelection::Metropolis))
            .expect("sampling");
        let alpha = trace.values("alpha").expect("alpha draws");
        assert!(alpha.iter().all(|value| (0.0..=std::f64::consts::PI).contains(value)));
        let f = trace.values("F").expect("F draws");
        assert!(f.iter().all(|value| (0.0..1.0).contains(value)));
        assert!(
            trace.chains()[0]
                .stats
                .methods
                .iter()
                .all(|method| *method == StepMethod::Metropolis)
        );
    }

    #[test]
    fn invalid_configuration_is_rejected_before_sampling() {
        let observation = observation();
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");
        let config = SamplerConfig {
            chains: 0,
            ..SamplerConfig::default()
        };
        assert!(matches!(
            sample_posterior(&model, &config),
            Err(EstimateError::InvalidSampler(_))
        ));
    }

    #[test]
    fn parameters_without_derivatives_get_slice_steps() {
        let observation = observation();
        let plate = PhaseBlindPlate(FiniteDifference::new(ElasticPlate::default()));
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Estimated,
            PriorConfig::default(),
        )
        .expect("model");

        let assignment = assign_steps(&model, StepSelection::Auto);
        assert!(!assignment.gradient_fallback);
        assert_eq!(
            assignment.methods,
            vec![StepMethod::Langevin, StepMethod::Langevin, StepMethod::Slice]
        );

        let trace =
            sample_posterior(&model, &small_config(StepSelection::Auto)).expect("sampling");
        for chain in trace.chains() {
            assert_eq!(chain.stats.methods, assignment.methods);
            assert!(!chain.stats.gradient_fallback);
        }
        let te = trace.values("Te").expect("Te draws");
        assert!(te.iter().all(|value| (2.0..=250.0).contains(value)));
        let alpha = trace.values("alpha").expect("alpha draws");
        assert!(alpha.iter().all(|value| (0.0..=std::f64::consts::PI).contains(value)));
        assert!(alpha.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn every_panicking_chain_is_reported_as_an_error() {
        let observation = observation();
        let model = SpectralModel::build(
            &observation,
            &PanickingPlate,
            AnalysisMode::Admittance,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let result = sample_posterior(&model, &small_config(StepSelection::Slice));
        assert!(matches!(
            result,
            Err(EstimateError::ChainPanicked { chain: 0 })
        ));
    }
}
