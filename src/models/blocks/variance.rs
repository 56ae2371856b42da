//! Smoothing variance block.
//!
//! Samples `tau2` of a penalized regression block given `Q = beta' K beta`
//! and the penalty rank `K`, then writes `lambda = scale / tau2` back into
//! the regression block.

use statrs::function::gamma::gamma as gamma_function;

use super::{BlockContext, BlockId, BlockPeers, BlockTrace, FullConditional};
use crate::inference::{AcceptanceCounter, RandomSource, should_accept};
use crate::models::types::{
    ConfigError, Hyperprior, ScaleDependentProposal, SimulationError, VarianceOptions,
};

/// Location of the logistic step in the approximate uniform prior.
const UNIFORM_APPROXIMATION_SHIFT: f64 = 13.862_94;

/// Outcome of one `tau2` proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tau2Draw {
    pub tau2: f64,
    pub accepted: bool,
}

impl Tau2Draw {
    const fn keep(tau2: f64) -> Self {
        Self {
            tau2,
            accepted: false,
        }
    }
}

/// Prior contribution in `theta = log tau2`, excluding the `tau2^(-1/2)` factor:
/// value, first derivative and negative second derivative.
fn log_prior_terms(hyperprior: Hyperprior, tau2: f64, scale: f64) -> (f64, f64, f64) {
    match hyperprior {
        Hyperprior::HalfNormal => {
            let ratio = tau2 / (scale * scale);
            (-0.5 * ratio, -0.5 * ratio, 0.5 * ratio)
        }
        Hyperprior::HalfCauchy => {
            let ratio = tau2 / (scale * scale);
            (
                -ratio.ln_1p(),
                -ratio / (1.0 + ratio),
                ratio / (1.0 + ratio).powi(2),
            )
        }
        Hyperprior::ApproximateUniform => {
            let arg = tau2.sqrt() * UNIFORM_APPROXIMATION_SHIFT / scale;
            let expo = (arg - UNIFORM_APPROXIMATION_SHIFT).exp();
            let share = expo / (1.0 + expo);
            (
                -expo.ln_1p(),
                -0.5 * arg * share,
                0.25 * arg * share * (1.0 + arg / (1.0 + expo)),
            )
        }
        Hyperprior::ScaleDependent | Hyperprior::InverseGamma => {
            let root = (tau2 / scale).sqrt();
            (-root, -0.5 * root, 0.25 * root)
        }
    }
}

/// Log full conditional of `theta = log tau2` and its Newton normal approximation.
struct LogTau2Target {
    hyperprior: Hyperprior,
    quadratic: f64,
    rank: f64,
    scale: f64,
}

impl LogTau2Target {
    fn log_density(&self, theta: f64) -> f64 {
        let tau2 = theta.exp();
        let (prior, _, _) = log_prior_terms(self.hyperprior, tau2, self.scale);
        (1.0 - 0.5 * (self.rank + 1.0)) * theta + prior - 0.5 * self.quadratic / tau2
    }

    /// Mean and variance of the Newton proposal built at `theta`.
    fn proposal(&self, theta: f64) -> (f64, f64) {
        let tau2 = theta.exp();
        let (_, slope, curvature) = log_prior_terms(self.hyperprior, tau2, self.scale);
        let variance = 1.0 / (0.5 * self.quadratic / tau2 + curvature);
        let gradient = 1.0 - 0.5 * (self.rank + 1.0) + 0.5 * self.quadratic / tau2 + slope;
        (variance.mul_add(gradient, theta), variance)
    }
}

fn normal_log_density(x: f64, mean: f64, variance: f64) -> f64 {
    (-0.5f64).mul_add(variance.ln(), -0.5 * (x - mean).powi(2) / variance)
}

fn inverse_gamma_log_kernel(x: f64, shape: f64, scale: f64) -> f64 {
    -(shape + 1.0) * x.ln() - scale / x
}

fn valid_variance(tau2: f64) -> bool {
    tau2.is_finite() && tau2 > 0.0
}

/// Variance `tau2` of one penalized regression block.
#[derive(Debug, Clone)]
pub struct VarianceBlock {
    title: String,
    regression: BlockId,
    options: VarianceOptions,
    scale_tau2: f64,
    tau2: f64,
    lambda: f64,
    acceptance: AcceptanceCounter,
    trace: BlockTrace,
}

impl VarianceBlock {
    /// # Errors
    ///
    /// Returns `ConfigError` if the options are out of range.
    pub fn new(
        title: impl Into<String>,
        regression: BlockId,
        options: VarianceOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let lambda = options.lambda_start;
        let tau2 = 1.0 / lambda;
        Ok(Self {
            title: title.into(),
            regression,
            scale_tau2: options.effective_scale_tau2(),
            options,
            tau2,
            lambda,
            acceptance: AcceptanceCounter::default(),
            trace: BlockTrace::new(vec!["tau2".to_owned(), "lambda".to_owned()], &[tau2, lambda]),
        })
    }

    #[must_use]
    pub const fn tau2(&self) -> f64 {
        self.tau2
    }

    #[must_use]
    pub const fn lambda(&self) -> f64 {
        self.lambda
    }

    #[must_use]
    pub const fn regression(&self) -> BlockId {
        self.regression
    }

    #[must_use]
    pub const fn options(&self) -> &VarianceOptions {
        &self.options
    }

    /// One draw of `tau2` given `Q`, the penalty rank and the inverse-gamma scale `b`.
    pub fn propose_tau2(
        &self,
        quadratic: f64,
        rank: f64,
        b: f64,
        rng: &mut dyn RandomSource,
    ) -> Tau2Draw {
        let current = self.tau2;
        if self.options.cauchy {
            return self.legacy_cauchy(quadratic, rank, rng);
        }
        match self.options.hyperprior {
            Hyperprior::InverseGamma => {
                let tau2 = rng.inverse_gamma(
                    0.5f64.mul_add(rank, self.options.a),
                    0.5f64.mul_add(quadratic, b),
                );
                if valid_variance(tau2) {
                    Tau2Draw {
                        tau2,
                        accepted: true,
                    }
                } else {
                    Tau2Draw::keep(current)
                }
            }
            Hyperprior::ScaleDependent => match self.options.proposal {
                ScaleDependentProposal::InverseGamma => {
                    self.scale_dependent_inverse_gamma(quadratic, rank, rng)
                }
                ScaleDependentProposal::Gamma => self.scale_dependent_gig(quadratic, rank, rng),
                ScaleDependentProposal::IwlsTau => self.scale_dependent_tau(quadratic, rank, rng),
                ScaleDependentProposal::IwlsLogTau2 => self.newton_log_tau2(quadratic, rank, rng),
            },
            Hyperprior::HalfCauchy | Hyperprior::HalfNormal | Hyperprior::ApproximateUniform => {
                self.newton_log_tau2(quadratic, rank, rng)
            }
        }
    }

    /// Log full conditional of `tau2` under the scale-dependent prior.
    fn scale_dependent_log_density(&self, tau2: f64, quadratic: f64, rank: f64) -> f64 {
        -0.5 * (rank + 1.0) * tau2.ln()
            - (tau2 / self.scale_tau2).sqrt()
            - 0.5 * quadratic / tau2
    }

    fn metropolis(
        &self,
        candidate: f64,
        log_ratio: f64,
        rng: &mut dyn RandomSource,
    ) -> Tau2Draw {
        if valid_variance(candidate) && should_accept(log_ratio, rng) {
            Tau2Draw {
                tau2: candidate,
                accepted: true,
            }
        } else {
            Tau2Draw::keep(self.tau2)
        }
    }

    fn legacy_cauchy(&self, quadratic: f64, rank: f64, rng: &mut dyn RandomSource) -> Tau2Draw {
        let shape = 0.5f64.mul_add(rank, self.options.tilde_a);
        let ig_scale = 0.5f64.mul_add(quadratic, self.options.tilde_b);
        let candidate = rng.inverse_gamma(shape, ig_scale);
        let target = |tau2: f64| {
            -0.5 * (rank + 1.0) * tau2.ln() - 0.5 * quadratic / tau2 - tau2.ln_1p()
        };
        let log_ratio = target(candidate) - target(self.tau2)
            + inverse_gamma_log_kernel(self.tau2, shape, ig_scale)
            - inverse_gamma_log_kernel(candidate, shape, ig_scale);
        self.metropolis(candidate, log_ratio, rng)
    }

    fn scale_dependent_inverse_gamma(
        &self,
        quadratic: f64,
        rank: f64,
        rng: &mut dyn RandomSource,
    ) -> Tau2Draw {
        let shape = 0.5f64.mul_add(rank, self.options.tilde_a);
        let ig_scale = 0.5f64.mul_add(quadratic, self.options.tilde_b);
        let candidate = rng.inverse_gamma(shape, ig_scale);
        let log_ratio = self.scale_dependent_log_density(candidate, quadratic, rank)
            - self.scale_dependent_log_density(self.tau2, quadratic, rank)
            + inverse_gamma_log_kernel(self.tau2, shape, ig_scale)
            - inverse_gamma_log_kernel(candidate, shape, ig_scale);
        self.metropolis(candidate, log_ratio, rng)
    }

    /// GIG proposal from a gamma approximation of the prior with matching mean.
    fn scale_dependent_gig(
        &self,
        quadratic: f64,
        rank: f64,
        rng: &mut dyn RandomSource,
    ) -> Tau2Draw {
        let prior_mean = gamma_function(3.0) * self.scale_tau2;
        let p = (-0.5f64).mul_add(rank, 1.0);
        let a = 2.0 / prior_mean;
        let b = quadratic;
        let candidate = rng.generalized_inverse_gaussian(p, a, b);
        let kernel = |tau2: f64| (p - 1.0).mul_add(tau2.ln(), -0.5 * a.mul_add(tau2, b / tau2));
        let log_ratio = self.scale_dependent_log_density(candidate, quadratic, rank)
            - self.scale_dependent_log_density(self.tau2, quadratic, rank)
            + kernel(self.tau2)
            - kernel(candidate);
        self.metropolis(candidate, log_ratio, rng)
    }

    /// Newton proposal for `tau = sqrt(tau2)`.
    fn scale_dependent_tau(
        &self,
        quadratic: f64,
        rank: f64,
        rng: &mut dyn RandomSource,
    ) -> Tau2Draw {
        let inv_root_scale = 1.0 / self.scale_tau2.sqrt();
        let log_density =
            |tau: f64| -rank * tau.ln() - tau * inv_root_scale - 0.5 * quadratic / (tau * tau);
        let newton = |tau: f64| {
            let tau_sq = tau * tau;
            let variance = tau_sq / (3.0 * quadratic / tau_sq - rank);
            let gradient = -rank / tau + quadratic / (tau_sq * tau) - inv_root_scale;
            (variance.mul_add(gradient, tau), variance)
        };

        let tau_old = self.tau2.sqrt();
        let (mean, variance) = newton(tau_old);
        if !(variance.is_finite() && variance > 0.0) {
            return Tau2Draw::keep(self.tau2);
        }
        let candidate = variance.sqrt().mul_add(rng.standard_normal(), mean);
        let (reverse_mean, reverse_variance) = newton(candidate);
        let log_ratio = log_density(candidate) - log_density(tau_old)
            + normal_log_density(tau_old, reverse_mean, reverse_variance)
            - normal_log_density(candidate, mean, variance);
        if candidate > 0.0 {
            self.metropolis(candidate * candidate, log_ratio, rng)
        } else {
            Tau2Draw::keep(self.tau2)
        }
    }

    /// Newton normal proposal in `log tau2`, scored by Metropolis-Hastings.
    fn newton_log_tau2(&self, quadratic: f64, rank: f64, rng: &mut dyn RandomSource) -> Tau2Draw {
        let target = LogTau2Target {
            hyperprior: self.options.hyperprior,
            quadratic,
            rank,
            scale: self.scale_tau2,
        };
        let theta_old = self.tau2.ln();
        let (mean, variance) = target.proposal(theta_old);
        if !(variance.is_finite() && variance > 0.0) {
            return Tau2Draw::keep(self.tau2);
        }
        let candidate = variance.sqrt().mul_add(rng.standard_normal(), mean);
        let (reverse_mean, reverse_variance) = target.proposal(candidate);
        let log_ratio = target.log_density(candidate) - target.log_density(theta_old)
            + normal_log_density(theta_old, reverse_mean, reverse_variance)
            - normal_log_density(candidate, mean, variance);
        self.metropolis(candidate.exp(), log_ratio, rng)
    }
}

impl FullConditional for VarianceBlock {
    fn title(&self) -> &str {
        &self.title
    }

    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError> {
        let scale = ctx.surface().scale();
        let b = ctx.surface().scale_multiplier() * self.options.b;
        let regression = peers.regression_mut(self.regression)?;
        if self.options.lambda_fixed {
            self.tau2 = scale / self.lambda;
        } else {
            let quadratic = regression.penalty_quadratic_form()?;
            let rank = regression.penalty_rank()?;
            let draw = self.propose_tau2(quadratic, rank, b, ctx.rng);
            self.acceptance.record(draw.accepted);
            self.tau2 = draw.tau2;
            self.lambda = scale / self.tau2;
        }
        regression.set_smoothing(self.tau2, self.lambda);
        self.trace.record(ctx.run, &[self.tau2, self.lambda]);
        Ok(())
    }

    /// Holds `lambda` and derives `tau2 = scale / lambda`.
    fn posteriormode(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError> {
        self.tau2 = ctx.surface().scale() / self.lambda;
        peers
            .regression_mut(self.regression)?
            .set_smoothing(self.tau2, self.lambda);
        self.trace.record_mode(&[self.tau2, self.lambda]);
        Ok(true)
    }

    fn reset(&mut self) {
        self.lambda = self.options.lambda_start;
        self.tau2 = 1.0 / self.lambda;
        self.acceptance.reset();
        self.trace.reset(&[self.tau2, self.lambda]);
    }

    fn trace(&self) -> &BlockTrace {
        &self.trace
    }

    fn acceptance(&self) -> AcceptanceCounter {
        self.acceptance
    }
}
