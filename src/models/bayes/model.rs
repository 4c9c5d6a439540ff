//! Probabilistic model linking plate flexure to observed spectra.
//!
//! [`SpectralModel`] owns the data bindings chosen by the analysis mode and
//! evaluates the joint log density in both the constrained parameter space and
//! the log-odds space the sampler walks in.

use crate::input::SpectralObservation;
use crate::models::flexure::{
    FlexureParams, ForwardError, ForwardModel, ForwardModelAdapter, SpectralJacobian,
    UNCORRELATED_LOAD_PHASE,
};

use super::likelihood::{NormalLikelihood, ObservedNormal};
use super::priors::{PriorConfig, UniformPrior};
use super::types::{AnalysisMode, EstimateError, LoadPhase};

/// Name of the elastic-thickness parameter.
pub const TE: &str = "Te";
/// Name of the load-ratio parameter.
pub const F: &str = "F";
/// Name of the load-phase parameter.
pub const ALPHA: &str = "alpha";

/// Whether an unconstrained log density includes the log-odds Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianTerm {
    /// Density of the unconstrained variables, as sampled.
    Include,
    /// Constrained density evaluated through the transform, as optimized.
    Exclude,
}

/// A latent model parameter with its prior.
#[derive(Debug, Clone)]
struct LatentParameter {
    name: &'static str,
    prior: UniformPrior,
}

/// Admittance/coherence model for one observation and analysis mode.
#[derive(Debug)]
pub struct SpectralModel<'m, M: ?Sized> {
    forward: ForwardModelAdapter<'m, M>,
    mode: AnalysisMode,
    phase: LoadPhase,
    parameters: Vec<LatentParameter>,
    wavenumbers: ObservedNormal,
    sigma: ObservedNormal,
    likelihood: NormalLikelihood,
    observed_log_density: f64,
}

impl<'m, M: ForwardModel + ?Sized> SpectralModel<'m, M> {
    /// Build the model: priors for `Te`, `F` and optionally `alpha`, the
    /// observed `k` and `sigma` nodes, and the mode-specific likelihood.
    ///
    /// # Errors
    ///
    /// Returns `EstimateError` if the observation is invalid, prior bounds are
    /// invalid, or an uncertainty in the active channel is zero.
    pub fn build(
        observation: &SpectralObservation,
        forward: &'m M,
        mode: AnalysisMode,
        phase: LoadPhase,
        priors: PriorConfig,
    ) -> Result<Self, EstimateError> {
        observation.validate()?;
        if !priors.is_valid() {
            return Err(EstimateError::InvalidPriorConfig);
        }

        let mut parameters = vec![
            LatentParameter {
                name: TE,
                prior: UniformPrior::new(priors.te_lower, priors.te_upper)?,
            },
            LatentParameter {
                name: F,
                prior: UniformPrior::new(priors.f_lower, priors.f_upper)?,
            },
        ];
        if phase == LoadPhase::Estimated {
            parameters.push(LatentParameter {
                name: ALPHA,
                prior: UniformPrior::new(priors.alpha_lower, priors.alpha_upper)?,
            });
        }

        if mode.uses_admittance() {
            require_positive("eadm", &observation.eadm)?;
        }
        if mode.uses_coherence() {
            require_positive("ecoh", &observation.ecoh)?;
        }
        let (observed, sigma) = match mode {
            AnalysisMode::Admittance => (observation.adm.clone(), observation.eadm.clone()),
            AnalysisMode::Coherence => (observation.coh.clone(), observation.ecoh.clone()),
            AnalysisMode::Joint => (
                [observation.adm.as_slice(), observation.coh.as_slice()].concat(),
                [observation.eadm.as_slice(), observation.ecoh.as_slice()].concat(),
            ),
        };

        let wavenumbers = ObservedNormal::new(observation.k.clone(), 1.0);
        let sigma_node = ObservedNormal::new(sigma.clone(), 1.0);
        let observed_log_density = wavenumbers.log_density()? + sigma_node.log_density()?;

        log::debug!(
            "built {mode} model with {} data and parameters {:?}",
            observed.len(),
            parameters.iter().map(|p| p.name).collect::<Vec<_>>()
        );

        Ok(Self {
            forward: ForwardModelAdapter::new(forward),
            mode,
            phase,
            parameters,
            wavenumbers,
            sigma: sigma_node,
            likelihood: NormalLikelihood::new(observed, sigma),
            observed_log_density,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> AnalysisMode {
        self.mode
    }

    #[must_use]
    pub const fn phase(&self) -> LoadPhase {
        self.phase
    }

    #[must_use]
    pub fn parameter_names(&self) -> Vec<&'static str> {
        self.parameters.iter().map(|parameter| parameter.name).collect()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    #[must_use]
    pub fn wavenumbers(&self) -> &[f64] {
        self.wavenumbers.values()
    }

    /// Observations bound to the likelihood, in stacking order.
    #[must_use]
    pub fn observed(&self) -> &[f64] {
        self.likelihood.observed()
    }

    /// Fixed likelihood scales, aligned with [`Self::observed`].
    #[must_use]
    pub fn sigma(&self) -> &[f64] {
        self.sigma.values()
    }

    /// Plate parameters for a constrained position vector.
    #[must_use]
    pub fn flexure_params(&self, position: &[f64]) -> FlexureParams {
        let alpha = match self.phase {
            LoadPhase::Fixed => UNCORRELATED_LOAD_PHASE,
            LoadPhase::Estimated => position.get(2).copied().unwrap_or(UNCORRELATED_LOAD_PHASE),
        };
        FlexureParams {
            te: position.first().copied().unwrap_or(f64::NAN),
            f: position.get(1).copied().unwrap_or(f64::NAN),
            alpha,
        }
    }

    /// Predicted likelihood mean for a constrained position.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if the forward model fails.
    pub fn predict(&self, position: &[f64]) -> Result<Vec<f64>, ForwardError> {
        let k = self.wavenumbers();
        let params = self.flexure_params(position);
        let (admittance, coherence) = match self.phase {
            LoadPhase::Fixed => self.forward.real_xspec_functions(k, params.te, params.f)?,
            LoadPhase::Estimated => self.forward.real_xspec_functions_with_phase(
                k,
                params.te,
                params.f,
                params.alpha,
            )?,
        };
        Ok(match self.mode {
            AnalysisMode::Admittance => admittance,
            AnalysisMode::Coherence => coherence,
            AnalysisMode::Joint => [admittance, coherence].concat(),
        })
    }

    /// Joint log density at a constrained position: priors, likelihood and
    /// the observed `k`/`sigma` nodes.
    ///
    /// Positions outside the prior support or where the forward model fails
    /// have log density negative infinity.
    #[must_use]
    pub fn log_density(&self, position: &[f64]) -> f64 {
        if position.len() != self.dimension() {
            return f64::NEG_INFINITY;
        }
        let log_prior = self
            .parameters
            .iter()
            .zip(position)
            .map(|(parameter, value)| parameter.prior.ln_pdf(*value))
            .sum::<f64>();
        if !log_prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let Ok(mean) = self.predict(position) else {
            return f64::NEG_INFINITY;
        };
        let total = log_prior + self.likelihood.log_density(&mean) + self.observed_log_density;
        if total.is_finite() {
            total
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Gradient of [`Self::log_density`], available only when the forward
    /// model supplies a Jacobian.
    ///
    /// Components whose derivative the model cannot supply are `NaN`; the
    /// others stay usable.
    #[must_use]
    pub fn log_density_gradient(&self, position: &[f64]) -> Option<Vec<f64>> {
        if !self.log_density(position).is_finite() {
            return None;
        }
        let params = self.flexure_params(position);
        let jacobian = self
            .forward
            .jacobian(self.wavenumbers(), params)
            .ok()
            .flatten()?;
        let mean = self.predict(position).ok()?;
        let residual_weights = self.likelihood.mean_gradient(&mean);

        let gradient = (0..self.dimension())
            .map(|index| {
                let sensitivity = self.stacked_sensitivity(&jacobian, index);
                residual_weights
                    .iter()
                    .zip(&sensitivity)
                    .map(|(weight, derivative)| weight * derivative)
                    .sum::<f64>()
            })
            .collect::<Vec<_>>();
        Some(gradient)
    }

    fn stacked_sensitivity(&self, jacobian: &SpectralJacobian, index: usize) -> Vec<f64> {
        match self.mode {
            AnalysisMode::Admittance => jacobian.admittance[index].clone(),
            AnalysisMode::Coherence => jacobian.coherence[index].clone(),
            AnalysisMode::Joint => {
                [jacobian.admittance[index].as_slice(), jacobian.coherence[index].as_slice()]
                    .concat()
            }
        }
    }

    /// Unconstrained starting point: every parameter at its prior midpoint.
    #[must_use]
    pub fn initial_point(&self) -> Vec<f64> {
        vec![0.0; self.dimension()]
    }

    #[must_use]
    pub fn to_constrained(&self, unconstrained: &[f64]) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(unconstrained)
            .map(|(parameter, z)| parameter.prior.transform().to_constrained(*z))
            .collect()
    }

    #[must_use]
    pub fn to_unconstrained(&self, constrained: &[f64]) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(constrained)
            .map(|(parameter, x)| parameter.prior.transform().to_unconstrained(*x))
            .collect()
    }

    /// Log density at an unconstrained point.
    #[must_use]
    pub fn unconstrained_log_density(&self, unconstrained: &[f64], jacobian: JacobianTerm) -> f64 {
        let base = self.log_density(&self.to_constrained(unconstrained));
        match jacobian {
            JacobianTerm::Exclude => base,
            JacobianTerm::Include => {
                base + self
                    .parameters
                    .iter()
                    .zip(unconstrained)
                    .map(|(parameter, z)| parameter.prior.transform().log_jacobian(*z))
                    .sum::<f64>()
            }
        }
    }

    /// Gradient of [`Self::unconstrained_log_density`] by the chain rule.
    ///
    /// `NaN` components of the constrained gradient stay `NaN`.
    #[must_use]
    pub fn unconstrained_gradient(
        &self,
        unconstrained: &[f64],
        jacobian: JacobianTerm,
    ) -> Option<Vec<f64>> {
        let constrained_gradient = self.log_density_gradient(&self.to_constrained(unconstrained))?;
        let gradient = self
            .parameters
            .iter()
            .zip(unconstrained)
            .zip(constrained_gradient)
            .map(|((parameter, z), gradient)| {
                let transform = parameter.prior.transform();
                let chained = gradient * transform.derivative(*z);
                match jacobian {
                    JacobianTerm::Exclude => chained,
                    JacobianTerm::Include => chained + transform.log_jacobian_gradient(*z),
                }
            })
            .collect();
        Some(gradient)
    }
}

fn require_positive(field: &'static str, values: &[f64]) -> Result<(), EstimateError> {
    match values.iter().position(|value| *value <= 0.0) {
        Some(index) => Err(EstimateError::DegenerateUncertainty { field, index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::flexure::{ElasticPlate, FiniteDifference};
    use crate::utils::usize_to_f64;
    use approx::assert_relative_eq;

    fn synthetic(n: usize) -> SpectralObservation {
        let plate = ElasticPlate::default();
        let k = (1..=n)
            .map(|j| usize_to_f64(j) * 4.0e-7)
            .collect::<Vec<_>>();
        let truth = plate
            .evaluate(&k, FlexureParams::new(40.0, 0.5))
            .expect("forward model");
        SpectralObservation::new(
            k,
            truth.admittance,
            vec![0.005; n],
            truth.coherence,
            vec![0.1; n],
        )
    }

    #[test]
    fn joint_mode_stacks_admittance_before_coherence() {
        let observation = synthetic(5);
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        assert_eq!(
            model.observed(),
            [observation.adm.as_slice(), observation.coh.as_slice()].concat()
        );
        assert_eq!(model.sigma(), [vec![0.005; 5], vec![0.1; 5]].concat());
        assert_eq!(model.parameter_names(), vec![TE, F]);
        assert_eq!(model.mode(), AnalysisMode::Joint);
        assert_eq!(model.phase(), LoadPhase::Fixed);
    }

    #[test]
    fn estimated_phase_adds_alpha_last() {
        let observation = synthetic(4);
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Coherence,
            LoadPhase::Estimated,
            PriorConfig::default(),
        )
        .expect("model");
        assert_eq!(model.parameter_names(), vec![TE, F, ALPHA]);
        assert_eq!(model.sigma(), observation.ecoh.as_slice());
        assert_eq!(model.phase(), LoadPhase::Estimated);
    }

    #[test]
    fn zero_uncertainty_in_active_channel_is_rejected() {
        let mut observation = synthetic(4);
        observation.eadm[2] = 0.0;
        let plate = ElasticPlate::default();
        let result = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Admittance,
            LoadPhase::Fixed,
            PriorConfig::default(),
        );
        assert!(matches!(
            result,
            Err(EstimateError::DegenerateUncertainty {
                field: "eadm",
                index: 2
            })
        ));

        let coherence_only = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Coherence,
            LoadPhase::Fixed,
            PriorConfig::default(),
        );
        assert!(coherence_only.is_ok());
    }

    #[test]
    fn joint_mode_checks_both_uncertainty_channels() {
        let mut observation = synthetic(4);
        observation.ecoh[1] = 0.0;
        let plate = ElasticPlate::default();
        let build = |mode| {
            SpectralModel::build(
                &observation,
                &plate,
                mode,
                LoadPhase::Fixed,
                PriorConfig::default(),
            )
        };

        assert!(build(AnalysisMode::Admittance).is_ok());
        for mode in [AnalysisMode::Coherence, AnalysisMode::Joint] {
            assert!(matches!(
                build(mode),
                Err(EstimateError::DegenerateUncertainty {
                    field: "ecoh",
                    index: 1
                })
            ));
        }
    }

    #[test]
    fn log_density_peaks_near_generating_parameters() {
        let observation = synthetic(40);
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let at_truth = model.log_density(&[40.0, 0.5]);
        assert!(at_truth > model.log_density(&[60.0, 0.5]));
        assert!(at_truth > model.log_density(&[40.0, 0.2]));
        assert_eq!(model.log_density(&[1.0, 0.5]), f64::NEG_INFINITY);
    }

    #[test]
    fn opaque_forward_model_has_no_gradient() {
        let observation = synthetic(10);
        let plate = ElasticPlate::default();
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Admittance,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");
        assert!(model.log_density_gradient(&[40.0, 0.5]).is_none());
    }

    #[test]
    fn unconstrained_gradient_matches_finite_differences() {
        let observation = synthetic(30);
        let plate = FiniteDifference::new(ElasticPlate::default());
        let model = SpectralModel::build(
            &observation,
            &plate,
            AnalysisMode::Joint,
            LoadPhase::Fixed,
            PriorConfig::default(),
        )
        .expect("model");

        let z = model.to_unconstrained(&[35.0, 0.6]);
        let gradient = model
            .unconstrained_gradient(&z, JacobianTerm::Include)
            .expect("gradient available");
        let h = 1.0e-4;
        for index in 0..2 {
            let mut upper = z.clone();
            let mut lower = z.clone();
            upper[index] += h;
            lower[index] -= h;
            let numeric = (model.unconstrained_log_density(&upper, JacobianTerm::Include)
                - model.unconstrained_log_density(&lower, JacobianTerm::Include))
                / (2.0 * h);
            assert_relative_eq!(
                gradient[index],
                numeric,
                max_relative = 1.0e-3,
                epsilon = 1.0e-3
            );
        }
    }
}
