//! # Flexure forward model
//!
//! The inference core only sees the [`ForwardModel`] trait: a pure function from
//! wavenumbers and plate parameters to real admittance and coherence curves.
//! [`ForwardModelAdapter`] exposes the two arities used by the likelihood
//! (with and without an explicit load phase), [`ElasticPlate`] is the reference
//! thin-plate implementation, and [`FiniteDifference`] attaches numerical
//! Jacobians to models that do not provide their own.

use std::cell::RefCell;
use std::f64::consts::{FRAC_PI_2, TAU};

use finitediff::FiniteDiff;
use thiserror::Error;

/// Phase difference between initial surface and subsurface loads assumed when
/// the phase is not estimated.
///
/// At `pi/2` the loads are statistically uncorrelated and the real part of the
/// gravity-topography cross-spectrum has no load-interaction term, which is the
/// physical convention for real-valued spectra.
pub const UNCORRELATED_LOAD_PHASE: f64 = FRAC_PI_2;

const SI_TO_MGAL: f64 = 1.0e5;
const KM_TO_M: f64 = 1.0e3;

/// Errors raised by forward-model evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForwardError {
    #[error("invalid plate parameters: Te={te}, F={f}, alpha={alpha}")]
    InvalidParameters { te: f64, f: f64, alpha: f64 },
    #[error("forward model returned {found} values for {expected} wavenumbers")]
    PredictionLength { expected: usize, found: usize },
    #[error("invalid flexure constants")]
    InvalidConstants,
}

/// Plate parameters fed to a forward model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlexureParams {
    /// Effective elastic thickness (km).
    pub te: f64,
    /// Subsurface-to-surface load ratio in `[0, 1)`.
    pub f: f64,
    /// Phase difference between initial loads (radians).
    pub alpha: f64,
}

impl FlexureParams {
    /// Parameters with the uncorrelated-load phase.
    #[must_use]
    pub const fn new(te: f64, f: f64) -> Self {
        Self {
            te,
            f,
            alpha: UNCORRELATED_LOAD_PHASE,
        }
    }

    #[must_use]
    pub const fn with_alpha(self, alpha: f64) -> Self {
        Self { alpha, ..self }
    }

    const fn to_array(self) -> [f64; 3] {
        [self.te, self.f, self.alpha]
    }

    const fn from_slice(values: &[f64]) -> Self {
        Self {
            te: values[0],
            f: values[1],
            alpha: values[2],
        }
    }
}

/// Predicted spectral functions, one entry per wavenumber.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralPrediction {
    /// Real admittance (mGal/m).
    pub admittance: Vec<f64>,
    /// Coherence (squared real coherency).
    pub coherence: Vec<f64>,
}

/// Partial derivatives of the predicted curves.
///
/// Index `[0]`, `[1]`, `[2]` hold derivatives with respect to `te`, `f` and
/// `alpha`; each inner vector has one entry per wavenumber.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralJacobian {
    pub admittance: [Vec<f64>; 3],
    pub coherence: [Vec<f64>; 3],
}

/// Closed-form flexure response consumed by the estimator.
///
/// Implementations must be deterministic and side-effect free.
pub trait ForwardModel: Sync {
    /// Evaluate admittance and coherence at every wavenumber in `k`.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` when the parameters are outside the model's domain.
    fn evaluate(&self, k: &[f64], params: FlexureParams)
    -> Result<SpectralPrediction, ForwardError>;

    /// Derivatives of the predicted curves, if the model can supply them.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` when derivatives cannot be evaluated at `params`.
    fn jacobian(
        &self,
        _k: &[f64],
        _params: FlexureParams,
    ) -> Result<Option<SpectralJacobian>, ForwardError> {
        Ok(None)
    }
}

impl<M: ForwardModel + ?Sized> ForwardModel for &M {
    fn evaluate(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<SpectralPrediction, ForwardError> {
        (**self).evaluate(k, params)
    }

    fn jacobian(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<Option<SpectralJacobian>, ForwardError> {
        (**self).jacobian(k, params)
    }
}

/// Shape-checked access to a forward model in its two arities.
#[derive(Debug, Clone, Copy)]
pub struct ForwardModelAdapter<'m, M: ?Sized> {
    model: &'m M,
}

impl<'m, M: ForwardModel + ?Sized> ForwardModelAdapter<'m, M> {
    #[must_use]
    pub const fn new(model: &'m M) -> Self {
        Self { model }
    }

    /// `(k, Te, F) -> (admittance, coherence)` at the uncorrelated-load phase.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if evaluation fails or returns misshapen output.
    pub fn real_xspec_functions(
        &self,
        k: &[f64],
        te: f64,
        f: f64,
    ) -> Result<(Vec<f64>, Vec<f64>), ForwardError> {
        self.real_xspec_functions_with_phase(k, te, f, UNCORRELATED_LOAD_PHASE)
    }

    /// `(k, Te, F, alpha) -> (admittance, coherence)`.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if evaluation fails or returns misshapen output.
    pub fn real_xspec_functions_with_phase(
        &self,
        k: &[f64],
        te: f64,
        f: f64,
        alpha: f64,
    ) -> Result<(Vec<f64>, Vec<f64>), ForwardError> {
        let prediction = self.predict(k, FlexureParams::new(te, f).with_alpha(alpha))?;
        Ok((prediction.admittance, prediction.coherence))
    }

    /// Evaluate the model and check output lengths.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if evaluation fails or returns misshapen output.
    pub fn predict(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<SpectralPrediction, ForwardError> {
        let prediction = self.model.evaluate(k, params)?;
        check_length(k.len(), prediction.admittance.len())?;
        check_length(k.len(), prediction.coherence.len())?;
        Ok(prediction)
    }

    /// Model Jacobian with output lengths checked, `None` for opaque models.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if the model fails or returns misshapen output.
    pub fn jacobian(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<Option<SpectralJacobian>, ForwardError> {
        let Some(jacobian) = self.model.jacobian(k, params)? else {
            return Ok(None);
        };
        for column in jacobian.admittance.iter().chain(&jacobian.coherence) {
            check_length(k.len(), column.len())?;
        }
        Ok(Some(jacobian))
    }
}

const fn check_length(expected: usize, found: usize) -> Result<(), ForwardError> {
    if expected == found {
        Ok(())
    } else {
        Err(ForwardError::PredictionLength { expected, found })
    }
}

/// Elastic and density constants of the plate model.
#[derive(Debug, Clone, Copy)]
pub struct FlexureConstants {
    /// Young's modulus (Pa).
    pub youngs_modulus: f64,
    /// Poisson's ratio.
    pub poisson_ratio: f64,
    /// Surface gravity (m/s^2).
    pub gravity: f64,
    /// Gravitational constant (m^3 kg^-1 s^-2).
    pub gravitational_constant: f64,
    /// Crustal density (kg/m^3).
    pub crust_density: f64,
    /// Mantle density (kg/m^3).
    pub mantle_density: f64,
    /// Density of the material filling surface relief (0 for air).
    pub fill_density: f64,
    /// Depth of the subsurface (Moho) interface (m).
    pub moho_depth: f64,
}

impl Default for FlexureConstants {
    fn default() -> Self {
        Self {
            youngs_modulus: 1.0e11,
            poisson_ratio: 0.25,
            gravity: 9.81,
            gravitational_constant: 6.67e-11,
            crust_density: 2_700.0,
            mantle_density: 3_200.0,
            fill_density: 0.0,
            moho_depth: 35.0e3,
        }
    }
}

impl FlexureConstants {
    /// Whether constants describe a stable, physically ordered plate.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.youngs_modulus > 0.0
            && (0.0..0.5).contains(&self.poisson_ratio)
            && self.gravity > 0.0
            && self.gravitational_constant > 0.0
            && self.fill_density >= 0.0
            && self.crust_density > self.fill_density
            && self.mantle_density > self.crust_density
            && self.moho_depth >= 0.0
    }

    /// Flexural rigidity (N m) for an elastic thickness in km.
    #[must_use]
    pub fn flexural_rigidity(self, te_km: f64) -> f64 {
        let te = te_km * KM_TO_M;
        self.youngs_modulus * te.powi(3) / (12.0 * self.poisson_ratio.mul_add(-self.poisson_ratio, 1.0))
    }
}

/// Thin elastic plate loaded at the surface and at the Moho.
///
/// Predicts the Bouguer admittance and coherence of Forsyth-style combined
/// loading, where `F` is the fraction of the total initial load applied at the
/// subsurface interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticPlate {
    pub constants: FlexureConstants,
}

impl ElasticPlate {
    #[must_use]
    pub const fn new(constants: FlexureConstants) -> Self {
        Self { constants }
    }
}

impl ForwardModel for ElasticPlate {
    fn evaluate(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<SpectralPrediction, ForwardError> {
        let c = self.constants;
        if !c.is_valid() {
            return Err(ForwardError::InvalidConstants);
        }
        let FlexureParams { te, f, alpha } = params;
        if !(te.is_finite() && te >= 0.0 && (0.0..1.0).contains(&f) && alpha.is_finite()) {
            return Err(ForwardError::InvalidParameters { te, f, alpha });
        }

        let rigidity = c.flexural_rigidity(te);
        let moho_contrast = c.mantle_density - c.crust_density;
        let topo_contrast = c.crust_density - c.fill_density;
        let total_contrast = c.mantle_density - c.fill_density;
        // Initial subsurface relief per unit initial topography.
        let load = f / (1.0 - f) * topo_contrast / moho_contrast;
        let cos_alpha = alpha.cos();

        let mut prediction = SpectralPrediction {
            admittance: Vec::with_capacity(k.len()),
            coherence: Vec::with_capacity(k.len()),
        };
        for wavenumber in k.iter().map(|value| value.abs()) {
            let psi = rigidity * wavenumber.powi(4) / c.gravity;
            let denominator = total_contrast + psi;
            // Final topography and Moho relief per unit surface load ...
            let topo_surface = (moho_contrast + psi) / denominator;
            let moho_surface = -topo_contrast / denominator;
            // ... and per unit subsurface load.
            let topo_subsurface = -moho_contrast / denominator;
            let moho_subsurface = (topo_contrast + psi) / denominator;

            let s_hh = (topo_subsurface * load).powi(2)
                + (2.0 * topo_surface * topo_subsurface * load)
                    .mul_add(cos_alpha, topo_surface * topo_surface);
            let s_mm = (moho_subsurface * load).powi(2)
                + (2.0 * moho_surface * moho_subsurface * load)
                    .mul_add(cos_alpha, moho_surface * moho_surface);
            let s_mh = (load * cos_alpha).mul_add(
                moho_surface.mul_add(topo_subsurface, moho_subsurface * topo_surface),
                topo_surface.mul_add(
                    moho_surface,
                    topo_subsurface * moho_subsurface * load * load,
                ),
            );

            let gain = TAU
                * c.gravitational_constant
                * moho_contrast
                * (-wavenumber * c.moho_depth).exp()
                * SI_TO_MGAL;
            let coherency = s_mh / (s_mm * s_hh).sqrt();
            prediction.admittance.push(gain * s_mh / s_hh);
            prediction.coherence.push(coherency * coherency);
        }
        Ok(prediction)
    }
}

/// Wraps an opaque model and supplies central finite-difference Jacobians.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteDifference<M> {
    pub inner: M,
}

impl<M> FiniteDifference<M> {
    pub const fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: ForwardModel> ForwardModel for FiniteDifference<M> {
    fn evaluate(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<SpectralPrediction, ForwardError> {
        self.inner.evaluate(k, params)
    }

    fn jacobian(
        &self,
        k: &[f64],
        params: FlexureParams,
    ) -> Result<Option<SpectralJacobian>, ForwardError> {
        let n = k.len();
        // The differencing closure must return a vector, so the first failure
        // is parked here and the closure yields NaNs.
        let failure: RefCell<Option<ForwardError>> = RefCell::new(None);
        let park = |error: ForwardError| {
            let mut slot = failure.borrow_mut();
            if slot.is_none() {
                *slot = Some(error);
            }
        };
        let stacked = |point: &Vec<f64>| -> Vec<f64> {
            match self.inner.evaluate(k, FlexureParams::from_slice(point)) {
                Ok(prediction)
                    if prediction.admittance.len() == n && prediction.coherence.len() == n =>
                {
                    let mut values = prediction.admittance;
                    values.extend(prediction.coherence);
                    values
                }
                Ok(prediction) => {
                    park(ForwardError::PredictionLength {
                        expected: n,
                        found: prediction.admittance.len().min(prediction.coherence.len()),
                    });
                    vec![f64::NAN; 2 * n]
                }
                Err(error) => {
                    park(error);
                    vec![f64::NAN; 2 * n]
                }
            }
        };

        let rows = params.to_array().to_vec().central_jacobian(&stacked);
        if let Some(error) = failure.into_inner() {
            return Err(error);
        }

        let mut jacobian = SpectralJacobian::default();
        for (index, row) in rows.into_iter().enumerate().take(3) {
            let (admittance, coherence) = row.split_at(n.min(row.len()));
            jacobian.admittance[index] = admittance.to_vec();
            jacobian.coherence[index] = coherence.to_vec();
        }
        Ok(Some(jacobian))
    }
}
