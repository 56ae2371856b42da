#![forbid(unsafe_code)]

//! # `structadd_mcmc`
//!
//! MCMC engine for structured additive regression. A model is a set of
//! equations, each a linear predictor built from additive terms. Terms are
//! parameter blocks sampled by Gibbs or IWLS Metropolis-Hastings steps:
//! regression coefficients, smoothing variances under several hyperpriors,
//! and spike-and-slab selection of whole terms. The same blocks also run an
//! iterative posterior-mode search used for starting values.
//!
//! Response families plug in through [`ResponseFamily`]; a Gaussian, Poisson,
//! binomial logit/probit and a Gaussian location/log-variance pair are included.

pub mod inference;
pub mod models;
pub mod utils;

pub use inference::diagnostics::{autocorrelation_function, effective_sample_size};
pub use inference::{
    AcceptanceCounter, InferenceError, McmcConfig, RandomSource, RunContext, StdRandomSource,
};

pub use models::blocks::{
    BlockId, FullConditional, InclusionProbabilityBlock, ParameterBlock, RegressionBlock,
    VarSelectionBlock, VarianceBlock,
};
pub use models::design::DesignMatrix;
pub use models::equation::{Equation, EquationId};
pub use models::families::{
    BinomialLogit, BinomialProbit, Gaussian, GaussianLocation, GaussianLogVariance, Poisson,
};
pub use models::penalty::PenaltyStructure;
pub use models::posterior::ParameterSummary;
pub use models::predictor::{PeerPredictors, PredictorSurface, ResponseFamily};
pub use models::report::{
    BlockReport, EquationReport, MeanEffectReport, ModeReport, SimulationReport,
};
pub use models::scheduler::{Autocorrelation, Sampler, SimulateOptions};
pub use models::types::{
    ConfigError, Hyperprior, IwlsProposal, RegressionOptions, ScaleDependentProposal,
    SimulationError, SsvsUpdate, VarSelectionOptions, VarianceOptions,
};
