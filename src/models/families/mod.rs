//! Reference response families.
//!
//! Each family implements [`ResponseFamily`](super::predictor::ResponseFamily):
//! per-observation log-likelihood, IWLS working quantities and link limits.

mod binomial;
mod gamlss;
mod gaussian;
mod poisson;

pub use binomial::{BinomialLogit, BinomialProbit};
pub use gamlss::{GaussianLocation, GaussianLogVariance};
pub use gaussian::Gaussian;
pub use poisson::Poisson;

/// Working weights are floored here to keep cross products positive definite.
pub(crate) const MIN_WORKING_WEIGHT: f64 = 1.0e-8;
