//! # Models
//!
//! Plate-flexure forward models and the Bayesian machinery that inverts
//! observed spectra for elastic thickness and load ratio.

pub mod bayes;
pub mod flexure;
