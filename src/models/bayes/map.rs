//! Maximum-a-posteriori search with `argmin`.
//!
//! The optimizer works in the unconstrained space but minimizes the negative
//! constrained log density (no transform Jacobian), so the optimum is the mode
//! of the posterior over the physical parameters. L-BFGS runs when the model
//! has gradients; Nelder-Mead covers models without them and L-BFGS failures.

use std::collections::BTreeMap;
use std::fmt;

use argmin::core::{ArgminError, CostFunction, Error, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;

use crate::models::flexure::ForwardModel;

use super::model::{JacobianTerm, SpectralModel};
use super::posterior::PosteriorTrace;
use super::types::{EstimateError, MapOptions};

/// Cost assigned to points with non-finite log density.
const PENALTY_COST: f64 = 1.0e300;

type Param = Vec<f64>;
type MoreThuente = MoreThuenteLineSearch<Param, Param, f64>;
type Lbfgs = LBFGS<MoreThuente, Param, Param, f64>;

/// Optimizer that produced a MAP estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Lbfgs,
    NelderMead,
    /// No optimizer improved on the best posterior draw.
    StartingPoint,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lbfgs => "L-BFGS",
            Self::NelderMead => "Nelder-Mead",
            Self::StartingPoint => "best draw",
        };
        f.write_str(name)
    }
}

/// Posterior mode keyed by parameter name.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub values: BTreeMap<&'static str, f64>,
    /// Joint log density at the mode.
    pub log_density: f64,
    pub optimizer: OptimizerKind,
    pub iterations: u64,
}

impl MapEstimate {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

struct NegativeLogPosterior<'a, 'm, M: ?Sized> {
    model: &'a SpectralModel<'m, M>,
}

impl<M: ForwardModel + ?Sized> NegativeLogPosterior<'_, '_, M> {
    fn objective(&self, param: &[f64]) -> f64 {
        let value = -self
            .model
            .unconstrained_log_density(param, JacobianTerm::Exclude);
        if value.is_finite() { value } else { PENALTY_COST }
    }
}

impl<M: ForwardModel + ?Sized> CostFunction for NegativeLogPosterior<'_, '_, M> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.objective(param))
    }
}

impl<M: ForwardModel + ?Sized> Gradient for NegativeLogPosterior<'_, '_, M> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        complete_gradient(self.model, param)
            .map(|gradient| gradient.into_iter().map(|value| -value).collect())
            .ok_or_else(|| {
                ArgminError::NotImplemented {
                    text: "log-density gradient unavailable".to_owned(),
                }
                .into()
            })
    }
}

/// Gradient of the MAP objective with every component finite.
fn complete_gradient<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    param: &[f64],
) -> Option<Vec<f64>> {
    model
        .unconstrained_gradient(param, JacobianTerm::Exclude)
        .filter(|gradient| gradient.iter().all(|value| value.is_finite()))
}

#[derive(Debug)]
struct Candidate {
    param: Param,
    cost: f64,
    iterations: u64,
}

impl Candidate {
    fn is_finite(&self) -> bool {
        self.cost.is_finite()
            && self.cost < PENALTY_COST
            && self.param.iter().all(|value| value.is_finite())
    }
}

/// Find the posterior mode, starting from the best retained draw.
///
/// # Errors
///
/// Returns `EstimateError::EmptyTrace` if the trace has no finite draw and
/// `EstimateError::NonFiniteOptimum` if no finite point could be found.
pub fn find_map<M: ForwardModel + ?Sized>(
    model: &SpectralModel<'_, M>,
    trace: &PosteriorTrace,
    options: &MapOptions,
) -> Result<MapEstimate, EstimateError> {
    if !options.is_valid() {
        return Err(EstimateError::InvalidMapOptions);
    }
    let (best_draw, _) = trace.best_draw().ok_or(EstimateError::EmptyTrace)?;
    let start = model.to_unconstrained(&best_draw);
    let problem = NegativeLogPosterior { model };
    let start_cost = problem.objective(&start);

    let mut optimum = None;
    if complete_gradient(model, &start).is_some() {
        match run_lbfgs(NegativeLogPosterior { model }, start.clone(), options) {
            Ok(candidate) if candidate.is_finite() => {
                optimum = Some((OptimizerKind::Lbfgs, candidate));
            }
            Ok(_) => log::warn!("L-BFGS returned a non-finite optimum; retrying with Nelder-Mead"),
            Err(error) => log::warn!("L-BFGS failed ({error}); retrying with Nelder-Mead"),
        }
    } else {
        log::info!("gradient not available; using Nelder-Mead for the MAP estimate");
    }
    if optimum.is_none() {
        match run_nelder_mead(NegativeLogPosterior { model }, &start, options) {
            Ok(candidate) if candidate.is_finite() => {
                optimum = Some((OptimizerKind::NelderMead, candidate));
            }
            Ok(_) => log::warn!("Nelder-Mead returned a non-finite optimum"),
            Err(error) => log::warn!("Nelder-Mead failed ({error})"),
        }
    }

    let (optimizer, position, cost, iterations) = match optimum {
        Some((kind, candidate)) if candidate.cost <= start_cost => {
            (kind, candidate.param, candidate.cost, candidate.iterations)
        }
        Some((_, candidate)) => (
            OptimizerKind::StartingPoint,
            start,
            start_cost,
            candidate.iterations,
        ),
        None if start_cost < PENALTY_COST => (OptimizerKind::StartingPoint, start, start_cost, 0),
        None => return Err(EstimateError::NonFiniteOptimum),
    };

    log::info!("MAP by {optimizer} after {iterations} iterations: logp = {:.2}", -cost);
    let values = model
        .parameter_names()
        .into_iter()
        .zip(model.to_constrained(&position))
        .collect();
    Ok(MapEstimate {
        values,
        log_density: -cost,
        optimizer,
        iterations,
    })
}

fn run_lbfgs<M: ForwardModel + ?Sized>(
    problem: NegativeLogPosterior<'_, '_, M>,
    start: Param,
    options: &MapOptions,
) -> Result<Candidate, Error> {
    let solver = Lbfgs::new(MoreThuente::new(), options.lbfgs_memory)
        .with_tolerance_grad(options.lbfgs_tolerance_grad)?
        .with_tolerance_cost(options.lbfgs_tolerance_cost)?;
    let mut state = Executor::new(problem, solver)
        .configure(|state| state.param(start).max_iters(options.lbfgs_max_iters))
        .run()?
        .state()
        .clone();
    Ok(Candidate {
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        param: state.take_best_param().unwrap_or_default(),
    })
}

fn run_nelder_mead<M: ForwardModel + ?Sized>(
    problem: NegativeLogPosterior<'_, '_, M>,
    start: &[f64],
    options: &MapOptions,
) -> Result<Candidate, Error> {
    let mut simplex = vec![start.to_vec()];
    for index in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[index] += options.simplex_step;
        simplex.push(vertex);
    }
    let solver =
        NelderMead::new(simplex).with_sd_tolerance(options.nelder_mead_sd_tolerance)?;
    let mut state = Executor::new(problem, solver)
        .configure(|state| state.max_iters(options.nelder_mead_max_iters))
        .run()?
        .state()
        .clone();
    Ok(Candidate {
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        param: state.take_best_param().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SpectralObservation;
    use crate::inference::StepMethod;
    use crate::models::bayes::posterior::{ChainStats, ChainTrace};
    use crate::models::bayes::priors::PriorConfig;
    use crate::models::bayes::types::{AnalysisMode, LoadPhase};
    use crate::models::flexure::{
        ElasticPlate, FiniteDifference, FlexureParams, ForwardError, SpectralJacobian,
        SpectralPrediction,
    };

    /// Finite-difference plate whose load-phase derivative is unavailable.
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

    fn trace_at<M: ForwardModel + ?Sized>(
        model: &SpectralModel<'_, M>,
        te: f64,
        f: f64,
    ) -> PosteriorTrace {
        trace_through(model, &[te, f])
    }

    fn trace_through<M: ForwardModel + ?Sized>(
        model: &SpectralModel<'_, M>,
        position: &[f64],
    ) -> PosteriorTrace {
        let dimension = position.len();
        let chain = ChainTrace {
            draws: position.iter().map(|value| vec![*value]).collect(),
            log_density: vec![model.log_density(position)],
            stats: ChainStats {
                chain: 0,
                seed: 0,
                methods: vec![StepMethod::Slice; dimension],
                acceptance_rates: vec![0.0; dimension],
                final_scales: vec![1.0; dimension],
                gradient_fallback: true,
            },
        };
        PosteriorTrace::new(model.parameter_names(), vec![chain])
    }

    #[test]
    fn nelder_mead_recovers_noiseless_mode() {
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

        let estimate =
            find_map(&model, &trace_at(&model, 36.0, 0.45), &MapOptions::default()).expect("map");
        assert_eq!(estimate.optimizer, OptimizerKind::NelderMead);
        let te = estimate.get("Te").expect("Te");
        let f = estimate.get("F").expect("F");
        assert!((te - 40.0).abs() < 0.1, "Te = {te}");
        assert!((f - 0.5).abs() < 0.01, "F = {f}");
        assert!(estimate.log_density >= model.log_density(&[36.0, 0.45]));
    }

    #[test]
    fn gradient_models_use_quasi_newton_search() {
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

        let estimate =
            find_map(&model, &trace_at(&model, 36.0, 0.45), &MapOptions::default()).expect("map");
        assert_ne!(estimate.optimizer, OptimizerKind::StartingPoint);
        let te = estimate.get("Te").expect("Te");
        assert!((te - 40.0).abs() < 0.1, "Te = {te}");
    }

    #[test]
    fn partial_gradients_use_gradient_free_search() {
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

        let start = [36.0, 0.45, 1.4];
        let estimate =
            find_map(&model, &trace_through(&model, &start), &MapOptions::default()).expect("map");
        assert_eq!(estimate.optimizer, OptimizerKind::NelderMead);
        assert!(estimate.log_density >= model.log_density(&start));
        assert!(estimate.get("alpha").is_some());
    }

    #[test]
    fn empty_trace_has_no_map() {
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
        let trace = PosteriorTrace::new(model.parameter_names(), Vec::new());
        assert!(matches!(
            find_map(&model, &trace, &MapOptions::default()),
            Err(EstimateError::EmptyTrace)
        ));
    }
}
