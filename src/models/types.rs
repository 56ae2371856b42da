//! Core public types: error taxonomy, term options and their string tags.

use std::str::FromStr;

use thiserror::Error;

use crate::inference::InferenceError;

/// Construction-time problems. A run never starts while one is outstanding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown option `{key}` for term `{term}`")]
    UnknownOption { term: String, key: String },
    #[error("option `{key}` has malformed value `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("option `{key}` must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        key: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("design has {design_rows} rows but the response has {observations} observations")]
    DesignRowMismatch {
        design_rows: usize,
        observations: usize,
    },
    #[error("design columns ({design_cols}) must match coefficient length ({coef_len})")]
    DesignCoefficientMismatch { design_cols: usize, coef_len: usize },
    #[error("penalty dimension ({penalty_dim}) must match design columns ({design_cols})")]
    PenaltyDimensionMismatch {
        penalty_dim: usize,
        design_cols: usize,
    },
    #[error("response, weight and predictor lengths differ")]
    ObservationLengthMismatch,
    #[error("block `{0}` is not a penalized regression block")]
    NotPenalized(String),
    #[error("block handle {index} does not refer to a {expected} block")]
    WrongBlockKind {
        index: usize,
        expected: &'static str,
    },
    #[error("equation handle {0} is out of range")]
    UnknownEquation(usize),
    #[error("block `{0}` shares its predictor and therefore needs the IWLS update")]
    SharedPredictorWithoutIwls(String),
    #[error("no equations registered")]
    NoEquations,
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schedule(#[from] InferenceError),
    #[error("non-finite log-likelihood in equation `{equation}` while updating `{block}`")]
    NonFiniteLikelihood { equation: String, block: String },
    #[error("equation `{equation}` has no block at position {index}")]
    MissingBlock { equation: String, index: usize },
    #[error("failed to write results: {0}")]
    Io(#[from] std::io::Error),
}

/// Centering point of the IWLS proposal for regression blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IwlsProposal {
    /// Gaussian proposal around a running posterior mode, re-linearized each sweep.
    #[default]
    Mode,
    /// Gaussian proposal built at the current state; the reverse move is rebuilt at the candidate.
    Current,
}

/// Hyperprior family for a smoothing variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hyperprior {
    #[default]
    InverseGamma,
    /// Weibull-motivated prior `p(tau2) ~ tau2^(-1/2) exp(-(tau2/s)^(1/2))`.
    ScaleDependent,
    HalfCauchy,
    HalfNormal,
    ApproximateUniform,
}

impl Hyperprior {
    /// Default prior scale used when none is configured.
    #[must_use]
    pub const fn default_scale(self) -> f64 {
        match self {
            Self::InverseGamma | Self::ScaleDependent => 0.008_778_12,
            Self::HalfCauchy => 0.010_345_53,
            Self::HalfNormal => 0.145_764_4,
            Self::ApproximateUniform => 0.272_353_2,
        }
    }
}

/// Proposal used for the scale-dependent hyperprior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleDependentProposal {
    #[default]
    InverseGamma,
    /// Generalized inverse Gaussian proposal.
    Gamma,
    IwlsTau,
    IwlsLogTau2,
}

/// Strategy for the coefficient scale in spike-and-slab blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsvsUpdate {
    /// Treat `tau` as a regression coefficient of the standardized effect.
    #[default]
    RegressionCoefficient,
    /// Treat `tau` as the prior standard deviation (Newton proposal after 100 sweeps).
    StandardDeviation,
    /// Exact generalized inverse Gaussian draw of `tau2`.
    Gibbs,
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

impl FromStr for IwlsProposal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iwlsmode" => Ok(Self::Mode),
            "iwls" => Ok(Self::Current),
            other => Err(invalid("proposal", other)),
        }
    }
}

impl FromStr for Hyperprior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invgamma" => Ok(Self::InverseGamma),
            "scaledep" => Ok(Self::ScaleDependent),
            "hcauchy" => Ok(Self::HalfCauchy),
            "hnormal" => Ok(Self::HalfNormal),
            "aunif" => Ok(Self::ApproximateUniform),
            other => Err(invalid("hyperprior", other)),
        }
    }
}

impl FromStr for ScaleDependentProposal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invgamma" => Ok(Self::InverseGamma),
            "gamma" => Ok(Self::Gamma),
            "iwls_tau" => Ok(Self::IwlsTau),
            "iwls_logtau2" => Ok(Self::IwlsLogTau2),
            other => Err(invalid("proposal", other)),
        }
    }
}

impl FromStr for SsvsUpdate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regcoeff" => Ok(Self::RegressionCoefficient),
            "sdev" => Ok(Self::StandardDeviation),
            "gibbs" => Ok(Self::Gibbs),
            other => Err(invalid("ssvsupdate", other)),
        }
    }
}

fn check_range(key: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid(key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(invalid(key, other)),
    }
}

/// Options for a regression block.
#[derive(Debug, Clone, Default)]
pub struct RegressionOptions {
    /// Mean-center non-constant design columns.
    pub center: bool,
    pub proposal: IwlsProposal,
    /// Starting coefficients; zero when absent.
    pub start: Option<Vec<f64>>,
}

/// Options for a smoothing-variance block.
#[derive(Debug, Clone, Copy)]
pub struct VarianceOptions {
    /// Starting smoothing parameter `lambda`.
    pub lambda_start: f64,
    /// Inverse-gamma shape.
    pub a: f64,
    /// Inverse-gamma scale.
    pub b: f64,
    /// Keep `lambda` at its starting value.
    pub lambda_fixed: bool,
    pub hyperprior: Hyperprior,
    pub proposal: ScaleDependentProposal,
    /// Hyperprior scale; `0` selects [`Hyperprior::default_scale`].
    pub scale_tau2: f64,
    /// Cauchy prior sampled with an inverse-gamma proposal.
    pub cauchy: bool,
    pub tilde_a: f64,
    pub tilde_b: f64,
}

impl Default for VarianceOptions {
    fn default() -> Self {
        Self {
            lambda_start: 10.0,
            a: 0.001,
            b: 0.001,
            lambda_fixed: false,
            hyperprior: Hyperprior::InverseGamma,
            proposal: ScaleDependentProposal::InverseGamma,
            scale_tau2: 0.0,
            cauchy: false,
            tilde_a: 0.001,
            tilde_b: 0.001,
        }
    }
}

impl VarianceOptions {
    /// Build options from `key=value` pairs, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unknown keys, malformed values or out-of-range values.
    pub fn from_pairs<'a, I>(term: &str, pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();
        let mut wei = false;
        for (key, value) in pairs {
            match key {
                "lambda" => options.lambda_start = parse_number(key, value)?,
                "a" => options.a = parse_number(key, value)?,
                "b" => options.b = parse_number(key, value)?,
                "lambdaconst" => options.lambda_fixed = parse_flag(key, value)?,
                "hyperprior" => options.hyperprior = value.parse()?,
                "proposal" => options.proposal = value.parse()?,
                "scaletau2" => options.scale_tau2 = parse_number(key, value)?,
                "cauchy" => options.cauchy = parse_flag(key, value)?,
                "wei" => wei = parse_flag(key, value)?,
                "tildea" => options.tilde_a = parse_number(key, value)?,
                "tildeb" => options.tilde_b = parse_number(key, value)?,
                other => {
                    return Err(ConfigError::UnknownOption {
                        term: term.to_owned(),
                        key: other.to_owned(),
                    });
                }
            }
        }
        if wei {
            options.hyperprior = Hyperprior::ScaleDependent;
        }
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` for values outside their admissible ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("lambda", self.lambda_start, f64::MIN_POSITIVE, 1.0e7)?;
        check_range("a", self.a, -1.0, 500.0)?;
        check_range("b", self.b, 0.0, 500.0)?;
        check_range("scaletau2", self.scale_tau2, 0.0, 1.0e9)?;
        check_range("tildea", self.tilde_a, -1.0, 500.0)?;
        check_range("tildeb", self.tilde_b, 0.0, 500.0)?;
        Ok(())
    }

    /// Hyperprior scale with the family default substituted for `0`.
    #[must_use]
    pub fn effective_scale_tau2(&self) -> f64 {
        if self.scale_tau2 == 0.0 {
            self.hyperprior.default_scale()
        } else {
            self.scale_tau2
        }
    }
}

/// Options for a spike-and-slab variance block.
#[derive(Debug, Clone, Copy)]
pub struct VarSelectionOptions {
    pub lambda_start: f64,
    /// Inverse-gamma shape of the auxiliary scale `psi2`.
    pub v1: f64,
    /// Inverse-gamma scale of the auxiliary scale `psi2`.
    pub v2: f64,
    /// Spike factor: the spike variance is `r * psi2`.
    pub r: f64,
    pub a_omega: f64,
    pub b_omega: f64,
    pub update: SsvsUpdate,
    /// Mixing weight is drawn by a shared inclusion-probability block.
    pub shared_omega: bool,
    /// Accepted scales with `|tau|` at or below this limit keep the previous value.
    pub variance_limit: f64,
}

impl Default for VarSelectionOptions {
    fn default() -> Self {
        Self {
            lambda_start: 10.0,
            v1: 5.0,
            v2: 25.0,
            r: 0.000_025,
            a_omega: 1.0,
            b_omega: 1.0,
            update: SsvsUpdate::RegressionCoefficient,
            shared_omega: false,
            variance_limit: 1.0e-9,
        }
    }
}

impl VarSelectionOptions {
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` for values outside their admissible ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("lambda", self.lambda_start, f64::MIN_POSITIVE, 1.0e7)?;
        check_range("v1", self.v1, 1.0e-10, 500.0)?;
        check_range("v2", self.v2, 1.0e-10, 500.0)?;
        check_range("r", self.r, 1.0e-10, 1.0)?;
        check_range("abeta", self.a_omega, 1.0e-8, 500.0)?;
        check_range("bbeta", self.b_omega, 1.0e-8, 500.0)?;
        check_range("varlimit", self.variance_limit, 0.0, 1.0)?;
        Ok(())
    }
}
