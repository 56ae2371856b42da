//! Spike-and-slab variance blocks.
//!
//! The effect `Z beta` is written as `tau * Z xi` with `tau ~ N(0, r_delta psi2)`.
//! The indicator `delta` switches `r_delta` between the spike factor `r` and
//! one; `omega` is the prior inclusion probability, drawn either per block or
//! by a shared [`InclusionProbabilityBlock`].

use super::regression::RegressionBlock;
use super::{BlockContext, BlockId, BlockPeers, BlockTrace, FullConditional};
use crate::inference::{AcceptanceCounter, RandomSource, should_accept};
use crate::models::types::{ConfigError, SimulationError, SsvsUpdate, VarSelectionOptions};
use crate::utils::usize_to_f64;

/// Sweeps after which the standard-deviation strategy switches to its Newton proposal.
const NEWTON_WARMUP: usize = 100;

fn normal_log_density(x: f64, mean: f64, variance: f64) -> f64 {
    (-0.5f64).mul_add(variance.ln(), -0.5 * (x - mean).powi(2) / variance)
}

/// Normal approximation of `tau` from the effect moments `sum w c^2` and
/// `sum w c r`, with covariate `c / tau_old`.
fn scale_posterior(
    cross: f64,
    score: f64,
    tau_old: f64,
    prior_variance: f64,
    scale: f64,
) -> (f64, f64) {
    let precision = cross / (tau_old * tau_old * scale) + 1.0 / prior_variance;
    let variance = 1.0 / precision;
    (variance * score / (tau_old * scale), variance)
}

/// Spike-and-slab prior on the scale of one penalized regression block.
#[derive(Debug, Clone)]
pub struct VarSelectionBlock {
    title: String,
    regression: BlockId,
    options: VarSelectionOptions,
    tau2: f64,
    lambda: f64,
    delta: bool,
    inclusion_probability: f64,
    psi2: f64,
    omega: f64,
    acceptance: AcceptanceCounter,
    trace: BlockTrace,
}

impl VarSelectionBlock {
    /// # Errors
    ///
    /// Returns `ConfigError` if the options are out of range.
    pub fn new(
        title: impl Into<String>,
        regression: BlockId,
        options: VarSelectionOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let mut block = Self {
            title: title.into(),
            regression,
            options,
            tau2: 0.0,
            lambda: 0.0,
            delta: false,
            inclusion_probability: 0.5,
            psi2: 0.5,
            omega: 0.5,
            acceptance: AcceptanceCounter::default(),
            trace: BlockTrace::new(
                [
                    "tau2",
                    "lambda",
                    "delta",
                    "inclusion_probability",
                    "psi2",
                    "omega",
                ]
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
                &[],
            ),
        };
        block.restart();
        Ok(block)
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
    pub const fn delta(&self) -> bool {
        self.delta
    }

    /// Posterior probability of the slab computed in the last sweep.
    #[must_use]
    pub const fn inclusion_probability(&self) -> f64 {
        self.inclusion_probability
    }

    #[must_use]
    pub const fn psi2(&self) -> f64 {
        self.psi2
    }

    #[must_use]
    pub const fn omega(&self) -> f64 {
        self.omega
    }

    /// Mixing weight written by a shared inclusion-probability block.
    pub const fn set_omega(&mut self, omega: f64) {
        self.omega = omega;
    }

    #[must_use]
    pub const fn regression(&self) -> BlockId {
        self.regression
    }

    const fn spike_factor(&self) -> f64 {
        if self.delta { 1.0 } else { self.options.r }
    }

    fn state(&self) -> [f64; 6] {
        [
            self.tau2,
            self.lambda,
            f64::from(u8::from(self.delta)),
            self.inclusion_probability,
            self.psi2,
            self.omega,
        ]
    }

    fn restart(&mut self) {
        self.lambda = self.options.lambda_start;
        self.tau2 = 1.0 / self.lambda;
        self.delta = false;
        self.inclusion_probability = 0.5;
        self.psi2 = 0.5;
        self.omega = 0.5;
        self.acceptance.reset();
        let state = self.state();
        self.trace.reset(&state);
    }

    /// `psi2 ~ IG(v1 + 1/2, v2 + tau2 / (2 r_delta))`.
    fn draw_mixing_variance(&mut self, v2: f64, rng: &mut dyn RandomSource) {
        self.psi2 = rng.inverse_gamma(
            self.options.v1 + 0.5,
            0.5f64.mul_add(self.tau2 / self.spike_factor(), v2),
        );
    }

    fn draw_indicator(&mut self, rng: &mut dyn RandomSource) {
        let r = self.options.r;
        let spike_ratio = (-(self.tau2 / (2.0 * self.psi2)) * (1.0 / r - 1.0)).exp() / r.sqrt();
        let probability = 1.0 / (1.0 + (1.0 - self.omega) / self.omega * spike_ratio);
        self.inclusion_probability = probability;
        self.delta = rng.uniform() <= probability;
    }

    /// Exact draw `tau2 ~ GIG(-K/2 + 1/2, 1 / (psi2 r_delta), Q)`.
    fn update_gibbs(
        &mut self,
        regression: &RegressionBlock,
        rng: &mut dyn RandomSource,
    ) -> Result<(), ConfigError> {
        let rank = regression.penalty_rank()?;
        let quadratic = regression.penalty_quadratic_form()?;
        let tau2 = rng.generalized_inverse_gaussian(
            (-0.5f64).mul_add(rank, 0.5),
            1.0 / (self.psi2 * self.spike_factor()),
            quadratic,
        );
        let valid = tau2.is_finite() && tau2 > 0.0;
        if valid {
            self.tau2 = tau2;
        }
        self.acceptance.record(valid);
        Ok(())
    }

    /// Newton Metropolis-Hastings step for `tau` with the coefficients held fixed.
    fn update_standard_deviation(
        &mut self,
        regression: &RegressionBlock,
        rng: &mut dyn RandomSource,
    ) -> Result<(), ConfigError> {
        let rank = regression.penalty_rank()?;
        let quadratic = regression.penalty_quadratic_form()?;
        let prior_variance = self.psi2 * self.spike_factor();
        let log_density = |tau: f64| {
            let tau_sq = tau * tau;
            -0.5 * rank * tau_sq.ln() - 0.5 * quadratic / tau_sq - 0.5 * tau_sq / prior_variance
        };
        let newton = |tau: f64| {
            let tau_sq = tau * tau;
            let gradient = -rank / tau + quadratic / (tau_sq * tau) - tau / prior_variance;
            let curvature =
                -rank / tau_sq + 3.0 * quadratic / (tau_sq * tau_sq) + 1.0 / prior_variance;
            let variance = 1.0 / curvature;
            (variance.mul_add(gradient, tau), variance)
        };

        let tau_old = self.tau2.sqrt();
        let (mean, variance) = newton(tau_old);
        if !(variance.is_finite() && variance > 0.0) {
            self.acceptance.record(false);
            return Ok(());
        }
        let candidate = variance.sqrt().mul_add(rng.standard_normal(), mean);
        let (reverse_mean, reverse_variance) = newton(candidate);
        let log_ratio = log_density(candidate) - log_density(tau_old)
            + normal_log_density(tau_old, reverse_mean, reverse_variance)
            - normal_log_density(candidate, mean, variance);
        let accepted = should_accept(log_ratio, rng);
        self.acceptance.record(accepted);
        if accepted && candidate.abs() > self.options.variance_limit {
            self.tau2 = candidate * candidate;
        }
        Ok(())
    }

    /// `tau` as a regression coefficient of the standardized effect; the
    /// coefficients are rescaled by `tau_new / tau_old` on acceptance.
    fn update_coefficient(
        &mut self,
        regression: &mut RegressionBlock,
        ctx: &mut BlockContext<'_>,
    ) {
        let equation = ctx.equation;
        let tau_old = self.tau2.sqrt();
        if !(tau_old > 0.0) {
            return;
        }
        let prior_variance = self.psi2 * self.spike_factor();
        let scale = ctx.surface().scale();
        let uses_iwls = ctx.surface().uses_iwls();

        let log_old = if uses_iwls {
            regression.compute_iwls(ctx.surfaces, equation, true)
                - 0.5 * tau_old * tau_old / prior_variance
        } else {
            0.0
        };
        let (cross, score) = regression.effect_moments(ctx.surfaces, equation, 1.0);
        let (mean, variance) = scale_posterior(cross, score, tau_old, prior_variance, scale);
        let tau_new = variance.sqrt().mul_add(ctx.rng.standard_normal(), mean);
        let ratio = tau_new / tau_old;

        let pending = regression.begin_rescale(ratio, ctx.surfaces, equation);
        if !regression.within_limits(ctx.run, ctx.surfaces, equation) {
            regression.finish_rescale(pending, ratio, false, ctx.surfaces, equation);
            self.acceptance.record_outside_limits();
            return;
        }

        let accepted = if uses_iwls {
            let log_new = regression.compute_iwls(ctx.surfaces, equation, true)
                - 0.5 * tau_new * tau_new / prior_variance;
            let (cross_new, score_new) = regression.effect_moments(ctx.surfaces, equation, ratio);
            let (reverse_mean, reverse_variance) =
                scale_posterior(cross_new, score_new, tau_old, prior_variance, scale);
            let log_ratio = log_new - log_old
                + normal_log_density(tau_old, reverse_mean, reverse_variance)
                - normal_log_density(tau_new, mean, variance);
            should_accept(log_ratio, ctx.rng)
        } else {
            true
        };
        self.acceptance.record(accepted);

        let keep = accepted && tau_new.abs() > self.options.variance_limit;
        regression.finish_rescale(pending, ratio, keep, ctx.surfaces, equation);
        if keep {
            self.tau2 = tau_new * tau_new;
        }
    }
}

impl FullConditional for VarSelectionBlock {
    fn title(&self) -> &str {
        &self.title
    }

    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError> {
        let scale = ctx.surface().scale();
        let v2 = ctx.surface().scale_multiplier() * self.options.v2;

        self.draw_mixing_variance(v2, ctx.rng);
        self.draw_indicator(ctx.rng);
        if !self.options.shared_omega {
            let delta = f64::from(u8::from(self.delta));
            self.omega = ctx
                .rng
                .beta(self.options.a_omega + delta, self.options.b_omega + 1.0 - delta);
        }

        let regression = peers.regression_mut(self.regression)?;
        match self.options.update {
            SsvsUpdate::Gibbs => self.update_gibbs(regression, ctx.rng)?,
            SsvsUpdate::StandardDeviation if ctx.run.iteration > NEWTON_WARMUP => {
                self.update_standard_deviation(regression, ctx.rng)?;
            }
            SsvsUpdate::StandardDeviation | SsvsUpdate::RegressionCoefficient => {
                self.update_coefficient(regression, ctx);
            }
        }
        self.lambda = scale / self.tau2;
        regression.set_smoothing(self.tau2, self.lambda);
        let state = self.state();
        self.trace.record(ctx.run, &state);
        Ok(())
    }

    fn posteriormode(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError> {
        self.lambda = ctx.surface().scale() / self.tau2;
        peers
            .regression_mut(self.regression)?
            .set_smoothing(self.tau2, self.lambda);
        Ok(true)
    }

    fn reset(&mut self) {
        self.restart();
    }

    fn trace(&self) -> &BlockTrace {
        &self.trace
    }

    fn acceptance(&self) -> AcceptanceCounter {
        self.acceptance
    }
}

/// Shared inclusion probability `omega` of several spike-and-slab blocks.
#[derive(Debug, Clone)]
pub struct InclusionProbabilityBlock {
    title: String,
    members: Vec<BlockId>,
    a: f64,
    b: f64,
    omega: f64,
    acceptance: AcceptanceCounter,
    trace: BlockTrace,
}

impl InclusionProbabilityBlock {
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` for non-positive beta parameters.
    pub fn new(
        title: impl Into<String>,
        members: Vec<BlockId>,
        a: f64,
        b: f64,
    ) -> Result<Self, ConfigError> {
        for (key, value) in [("abeta", a), ("bbeta", b)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::OutOfRange {
                    key,
                    value,
                    min: f64::MIN_POSITIVE,
                    max: f64::MAX,
                });
            }
        }
        Ok(Self {
            title: title.into(),
            members,
            a,
            b,
            omega: 0.5,
            acceptance: AcceptanceCounter::default(),
            trace: BlockTrace::new(vec!["omega".to_owned()], &[0.5]),
        })
    }

    #[must_use]
    pub const fn omega(&self) -> f64 {
        self.omega
    }

    #[must_use]
    pub fn members(&self) -> &[BlockId] {
        &self.members
    }
}

impl FullConditional for InclusionProbabilityBlock {
    fn title(&self) -> &str {
        &self.title
    }

    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError> {
        let mut included = 0.0;
        for id in &self.members {
            included += f64::from(u8::from(peers.var_selection_mut(*id)?.delta()));
        }
        let excluded = usize_to_f64(self.members.len()) - included;
        self.omega = ctx.rng.beta(self.a + included, self.b + excluded);
        for id in &self.members {
            peers.var_selection_mut(*id)?.set_omega(self.omega);
        }
        self.acceptance.record(true);
        self.trace.record(ctx.run, &[self.omega]);
        Ok(())
    }

    fn posteriormode(
        &mut self,
        _ctx: &mut BlockContext<'_>,
        _peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError> {
        Ok(true)
    }

    fn reset(&mut self) {
        self.omega = 0.5;
        self.acceptance.reset();
        self.trace.reset(&[0.5]);
    }

    fn trace(&self) -> &BlockTrace {
        &self.trace
    }

    fn acceptance(&self) -> AcceptanceCounter {
        self.acceptance
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::inference::{McmcConfig, RunContext, StdRandomSource};
    use crate::models::blocks::ParameterBlock;
    use crate::models::design::DesignMatrix;
    use crate::models::equation::{Equation, EquationId};
    use crate::models::families::{Gaussian, Poisson};
    use crate::models::penalty::PenaltyStructure;
    use crate::models::predictor::{PredictorSurface, ResponseFamily};
    use crate::models::types::RegressionOptions;
    use crate::utils::{design_times, max_abs_diff};

    const N: usize = 50;

    fn covariate(offset: usize) -> Vec<f64> {
        (0..N)
            .map(|i| (usize_to_f64((i * 7 + offset) % N) / usize_to_f64(N)) - 0.5)
            .collect()
    }

    fn penalized(title: &str, offset: usize) -> RegressionBlock {
        let design = DesignMatrix::from_columns(
            vec![
                (format!("{title}_1"), covariate(offset)),
                (format!("{title}_2"), covariate(offset + 3)),
            ],
            false,
        )
        .expect("design");
        RegressionBlock::new(title, design, RegressionOptions::default())
            .expect("block")
            .with_penalty(PenaltyStructure::identity(2), 10.0)
            .expect("penalty")
    }

    fn run_equation(
        family: Box<dyn ResponseFamily>,
        update: SsvsUpdate,
        sweeps: usize,
    ) -> (Equation, PredictorSurface) {
        let response: Vec<f64> = covariate(0).iter().map(|x| (2.0 * x).exp().round()).collect();
        let mut surfaces = vec![PredictorSurface::new("y", response, None, family).expect("surface")];
        let mut equation = Equation::new("y", "test");
        let regression = equation.add_block(penalized("f", 0));
        let options = VarSelectionOptions {
            update,
            ..VarSelectionOptions::default()
        };
        equation.add_block(VarSelectionBlock::new("f_ssvs", regression, options).expect("block"));

        let mut rng = StdRandomSource::seed_from_u64(13);
        let mut run = RunContext::new(&McmcConfig::default());
        let mut proposed = 0;
        for iteration in 1..=sweeps {
            run.iteration = iteration;
            for index in 0..equation.len() {
                let mut ctx = BlockContext {
                    run: &run,
                    surfaces: &mut surfaces,
                    equation: EquationId::new(0),
                    rng: &mut rng,
                };
                equation.update_block(index, &mut ctx).expect("update");
            }
            let ssvs = equation.blocks()[1].as_var_selection().expect("ssvs block");
            let reg = equation.blocks()[0].as_regression().expect("regression block");
            let scale = surfaces[0].scale();
            assert_relative_eq!(ssvs.lambda() * ssvs.tau2(), scale, max_relative = 1.0e-10);
            assert_relative_eq!(reg.lambda(), ssvs.lambda());
            assert!(ssvs.psi2() > 0.0);
            assert!(ssvs.omega() > 0.0 && ssvs.omega() < 1.0);
            assert!(ssvs.acceptance().proposed >= proposed);
            proposed = ssvs.acceptance().proposed;
            let expected = design_times(reg.design().matrix(), reg.beta());
            assert!(max_abs_diff(surfaces[0].linpred(), &expected) < 1.0e-9);
        }
        (equation, surfaces.remove(0))
    }

    #[test]
    fn every_strategy_keeps_invariants_gaussian() {
        for update in [
            SsvsUpdate::RegressionCoefficient,
            SsvsUpdate::StandardDeviation,
            SsvsUpdate::Gibbs,
        ] {
            run_equation(Box::new(Gaussian::with_fixed_scale(0.5)), update, 150);
        }
    }

    #[test]
    fn coefficient_strategy_keeps_invariants_with_iwls() {
        let (equation, _) = run_equation(Box::new(Poisson), SsvsUpdate::RegressionCoefficient, 150);
        let ssvs = equation.blocks()[1].as_var_selection().expect("ssvs block");
        assert!(ssvs.acceptance().accepted > 0);
    }

    #[test]
    fn indicator_frequency_matches_marginal_odds_for_fixed_tau2() {
        let options = VarSelectionOptions::default();
        let mut block = VarSelectionBlock::new("f_ssvs", BlockId::new(0), options).expect("block");
        let tau2 = 0.002;
        block.tau2 = tau2;
        block.omega = 0.5;

        // With psi2 integrated out, tau given delta is Student-t:
        // m_delta ~ r_delta^(-1/2) (v2 + tau2 / (2 r_delta))^(-(v1 + 1/2)).
        let (v1, v2, r) = (options.v1, options.v2, options.r);
        let spike_over_slab =
            r.powf(-0.5) * ((v2 + 0.5 * tau2) / (v2 + 0.5 * tau2 / r)).powf(v1 + 0.5);
        let expected = 1.0 / (1.0 + spike_over_slab);

        let mut rng = StdRandomSource::seed_from_u64(21);
        let draws = 40_000;
        let mut included = 0;
        for _ in 0..draws {
            block.draw_mixing_variance(v2, &mut rng);
            block.draw_indicator(&mut rng);
            included += usize::from(block.delta());
        }
        let frequency = usize_to_f64(included) / usize_to_f64(draws);
        assert!(expected > 0.3 && expected < 0.7);
        assert_relative_eq!(frequency, expected, epsilon = 0.02);
    }

    #[test]
    fn shared_inclusion_probability_is_written_to_members() {
        let mut surfaces = vec![
            PredictorSurface::new(
                "y",
                covariate(1),
                None,
                Box::new(Gaussian::with_fixed_scale(1.0)),
            )
            .expect("surface"),
        ];
        let mut equation = Equation::new("y", "test");
        let options = VarSelectionOptions {
            shared_omega: true,
            ..VarSelectionOptions::default()
        };
        let first = equation.add_block(penalized("f", 0));
        let second = equation.add_block(penalized("g", 11));
        let ssvs_first =
            equation.add_block(VarSelectionBlock::new("f_ssvs", first, options).expect("block"));
        let ssvs_second =
            equation.add_block(VarSelectionBlock::new("g_ssvs", second, options).expect("block"));
        equation.add_block(
            InclusionProbabilityBlock::new("omega", vec![ssvs_first, ssvs_second], 1.0, 1.0)
                .expect("block"),
        );

        let mut rng = StdRandomSource::seed_from_u64(8);
        let mut run = RunContext::new(&McmcConfig::default());
        for iteration in 1..=20 {
            run.iteration = iteration;
            for index in 0..equation.len() {
                let mut ctx = BlockContext {
                    run: &run,
                    surfaces: &mut surfaces,
                    equation: EquationId::new(0),
                    rng: &mut rng,
                };
                equation.update_block(index, &mut ctx).expect("update");
            }
            let omega = equation.blocks()[4]
                .as_inclusion_probability()
                .expect("inclusion block")
                .omega();
            for id in [ssvs_first, ssvs_second] {
                let block = equation
                    .block(id)
                    .and_then(ParameterBlock::as_var_selection)
                    .expect("ssvs block");
                assert_relative_eq!(block.omega(), omega);
            }
        }
    }

    #[test]
    fn inclusion_probability_rejects_bad_prior() {
        assert!(InclusionProbabilityBlock::new("omega", Vec::new(), 0.0, 1.0).is_err());
    }
}
