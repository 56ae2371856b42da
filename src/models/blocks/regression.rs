//! Regression coefficient block.
//!
//! Non-Gaussian families are sampled by IWLS Metropolis-Hastings: the
//! log-likelihood is linearized into a weighted least-squares problem whose
//! solution and Cholesky root define a Gaussian proposal. Families without
//! IWLS take the conjugate Gaussian draw instead, which is always accepted.
//!
//! The block's contribution `Z beta` lives inside the equation's predictor.
//! Every candidate is written optimistically through
//! [`PredictorSurface::propose_into`] and then committed or rolled back, so
//! the predictor always matches the accepted coefficients when a call returns.

use faer::Mat;

use super::{BlockContext, BlockPeers, BlockTrace, FullConditional};
use crate::inference::{AcceptanceCounter, RunContext, should_accept};
use crate::models::design::DesignMatrix;
use crate::models::equation::EquationId;
use crate::models::penalty::PenaltyStructure;
use crate::models::predictor::{PredictorProposal, PredictorSurface};
use crate::models::types::{ConfigError, IwlsProposal, RegressionOptions, SimulationError};
use crate::utils::{
    RANK_TOLERANCE, backward_substitution_transposed, cholesky_lower, design_times, log_det_half,
    quadratic_form, solve_with_root, transpose_times, weighted_cross_product,
};

#[derive(Debug, Clone)]
struct Smoothing {
    penalty: PenaltyStructure,
    tau2: f64,
    lambda: f64,
    lambda_start: f64,
}

/// Predictor changes applied to every equation carrying the block's contribution.
#[derive(Debug)]
pub(crate) struct PendingShift {
    primary: PredictorProposal,
    shared: Option<(EquationId, PredictorProposal)>,
}

fn targets(equation: EquationId, shared: Option<EquationId>) -> impl Iterator<Item = EquationId> {
    std::iter::once(equation).chain(shared)
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn subtract(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

fn squared_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

/// Coefficients of one additive term, with an optional quadratic penalty.
#[derive(Debug)]
pub struct RegressionBlock {
    title: String,
    design: DesignMatrix,
    proposal: IwlsProposal,
    beta: Vec<f64>,
    mode: Vec<f64>,
    start: Vec<f64>,
    /// `Z beta` as currently held by the predictor.
    contribution: Vec<f64>,
    root: Option<Mat<f64>>,
    root_lambda: f64,
    smoothing: Option<Smoothing>,
    shared_with: Option<EquationId>,
    initialized: bool,
    disabled: bool,
    acceptance: AcceptanceCounter,
    trace: BlockTrace,
}

impl RegressionBlock {
    /// # Errors
    ///
    /// Returns `ConfigError::DesignCoefficientMismatch` if the start vector
    /// does not match the design columns.
    pub fn new(
        title: impl Into<String>,
        design: DesignMatrix,
        options: RegressionOptions,
    ) -> Result<Self, ConfigError> {
        let p = design.ncols();
        let start = options.start.unwrap_or_else(|| vec![0.0; p]);
        if start.len() != p {
            return Err(ConfigError::DesignCoefficientMismatch {
                design_cols: p,
                coef_len: start.len(),
            });
        }
        let trace = BlockTrace::new(design.names().to_vec(), &start);
        Ok(Self {
            title: title.into(),
            contribution: vec![0.0; design.nrows()],
            design,
            proposal: options.proposal,
            beta: start.clone(),
            mode: start.clone(),
            start,
            root: None,
            root_lambda: 0.0,
            smoothing: None,
            shared_with: None,
            initialized: false,
            disabled: false,
            acceptance: AcceptanceCounter::default(),
            trace,
        })
    }

    /// Attach a quadratic penalty with starting smoothing parameter `lambda`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the penalty does not match the design or `lambda` is not positive.
    pub fn with_penalty(
        mut self,
        penalty: PenaltyStructure,
        lambda: f64,
    ) -> Result<Self, ConfigError> {
        if penalty.dim() != self.design.ncols() {
            return Err(ConfigError::PenaltyDimensionMismatch {
                penalty_dim: penalty.dim(),
                design_cols: self.design.ncols(),
            });
        }
        if !(lambda.is_finite() && lambda > 0.0) {
            return Err(ConfigError::OutOfRange {
                key: "lambda",
                value: lambda,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }
        self.smoothing = Some(Smoothing {
            penalty,
            tau2: 1.0 / lambda,
            lambda,
            lambda_start: lambda,
        });
        Ok(self)
    }

    /// Add the block's contribution to a second equation's predictor as well.
    #[must_use]
    pub const fn with_shared_predictor(mut self, equation: EquationId) -> Self {
        self.shared_with = Some(equation);
        self
    }

    #[must_use]
    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    #[must_use]
    pub fn mode(&self) -> &[f64] {
        &self.mode
    }

    #[must_use]
    pub const fn design(&self) -> &DesignMatrix {
        &self.design
    }

    #[must_use]
    pub fn contribution(&self) -> &[f64] {
        &self.contribution
    }

    #[must_use]
    pub const fn shared_with(&self) -> Option<EquationId> {
        self.shared_with
    }

    #[must_use]
    pub fn penalty(&self) -> Option<&PenaltyStructure> {
        self.smoothing.as_ref().map(|s| &s.penalty)
    }

    /// Current smoothing parameter; `0` for unpenalized blocks.
    #[must_use]
    pub fn lambda(&self) -> f64 {
        self.smoothing.as_ref().map_or(0.0, |s| s.lambda)
    }

    #[must_use]
    pub fn tau2(&self) -> Option<f64> {
        self.smoothing.as_ref().map(|s| s.tau2)
    }

    fn mean_effect_of(&self, beta: &[f64]) -> f64 {
        self.design
            .mean_effect_row()
            .iter()
            .zip(beta)
            .map(|(x, b)| x * b)
            .sum()
    }

    /// Effect at the covariate row closest to the column means.
    #[must_use]
    pub fn mean_effect(&self) -> f64 {
        self.mean_effect_of(&self.beta)
    }

    /// [`Self::mean_effect`] of every retained draw.
    #[must_use]
    pub fn mean_effect_draws(&self) -> Vec<f64> {
        self.trace
            .samples()
            .iter()
            .map(|beta| self.mean_effect_of(beta))
            .collect()
    }

    /// `beta' K beta` of the current coefficients.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotPenalized` if no penalty is attached.
    pub fn penalty_quadratic_form(&self) -> Result<f64, ConfigError> {
        self.smoothing
            .as_ref()
            .map(|s| s.penalty.quadratic_form(&self.beta))
            .ok_or_else(|| ConfigError::NotPenalized(self.title.clone()))
    }

    /// # Errors
    ///
    /// Returns `ConfigError::NotPenalized` if no penalty is attached.
    pub fn penalty_rank(&self) -> Result<f64, ConfigError> {
        self.smoothing
            .as_ref()
            .map(|s| s.penalty.rank_f64())
            .ok_or_else(|| ConfigError::NotPenalized(self.title.clone()))
    }

    /// Store a new variance and smoothing parameter, written by the coupled variance block.
    pub fn set_smoothing(&mut self, tau2: f64, lambda: f64) {
        if let Some(smoothing) = self.smoothing.as_mut() {
            smoothing.tau2 = tau2;
            smoothing.lambda = lambda;
        }
    }

    /// Multiply the coefficients by `ratio`, keeping the predictor consistent.
    pub fn rescale(&mut self, ratio: f64, surfaces: &mut [PredictorSurface], equation: EquationId) {
        let pending = self.begin_rescale(ratio, surfaces, equation);
        self.finish_rescale(pending, ratio, true, surfaces, equation);
    }

    /// Replace one design column; the predictor is moved to match the new column.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an invalid column or equation handle.
    pub fn change_variable(
        &mut self,
        column: usize,
        values: &[f64],
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
    ) -> Result<(), ConfigError> {
        self.design.change_variable(column, values)?;
        self.root = None;
        if !self.initialized {
            return Ok(());
        }
        let contribution = design_times(self.design.matrix(), &self.beta);
        let delta = subtract(&contribution, &self.contribution);
        for id in targets(equation, self.shared_with) {
            surfaces
                .get_mut(id.index())
                .ok_or(ConfigError::UnknownEquation(id.index()))?
                .add_linpred(&delta);
        }
        self.contribution = contribution;
        Ok(())
    }

    pub(crate) fn begin_rescale(
        &self,
        ratio: f64,
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
    ) -> Option<PendingShift> {
        if !self.initialized {
            return None;
        }
        let delta = self.contribution.iter().map(|c| (ratio - 1.0) * c).collect();
        Some(self.shift(surfaces, equation, delta))
    }

    pub(crate) fn finish_rescale(
        &mut self,
        pending: Option<PendingShift>,
        ratio: f64,
        accepted: bool,
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
    ) {
        if let Some(pending) = pending {
            let _ = Self::settle(surfaces, equation, pending, accepted);
        }
        if accepted {
            for value in self
                .beta
                .iter_mut()
                .chain(self.mode.iter_mut())
                .chain(self.contribution.iter_mut())
            {
                *value *= ratio;
            }
        }
    }

    /// Log-likelihood summed over every predictor carrying this block.
    pub(crate) fn loglikelihood(&self, surfaces: &[PredictorSurface], equation: EquationId) -> f64 {
        targets(equation, self.shared_with)
            .map(|id| surfaces[id.index()].loglikelihood())
            .sum()
    }

    pub(crate) fn within_limits(
        &self,
        run: &RunContext,
        surfaces: &[PredictorSurface],
        equation: EquationId,
    ) -> bool {
        !run.check_predictor_limits
            || targets(equation, self.shared_with).all(|id| surfaces[id.index()].check_linpred())
    }

    fn ensure_initialized(&mut self, ctx: &mut BlockContext<'_>) -> Result<(), SimulationError> {
        if self.initialized {
            return Ok(());
        }
        for id in targets(ctx.equation, self.shared_with) {
            let surface = ctx
                .surfaces
                .get(id.index())
                .ok_or(ConfigError::UnknownEquation(id.index()))?;
            if surface.nobs() != self.design.nrows() {
                return Err(ConfigError::DesignRowMismatch {
                    design_rows: self.design.nrows(),
                    observations: surface.nobs(),
                }
                .into());
            }
            if self.shared_with.is_some() && !surface.uses_iwls() {
                return Err(ConfigError::SharedPredictorWithoutIwls(self.title.clone()).into());
            }
        }
        self.contribution = design_times(self.design.matrix(), &self.beta);
        for id in targets(ctx.equation, self.shared_with) {
            ctx.surfaces[id.index()].add_linpred(&self.contribution);
        }
        self.initialized = true;
        Ok(())
    }

    fn disable(&mut self) {
        if !self.disabled {
            log::warn!(
                "{}: cross product matrix for linear effects is rank deficient, linear effects are not estimated",
                self.title
            );
        }
        self.disabled = true;
        self.root = None;
    }

    fn require_finite(
        &self,
        value: f64,
        surfaces: &[PredictorSurface],
        equation: EquationId,
    ) -> Result<(), SimulationError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(SimulationError::NonFiniteLikelihood {
                equation: surfaces[equation.index()].label().to_owned(),
                block: self.title.clone(),
            })
        }
    }

    fn log_prior(&self, beta: &[f64]) -> f64 {
        self.smoothing
            .as_ref()
            .map_or(0.0, |s| -0.5 * s.penalty.quadratic_form(beta) / s.tau2)
    }

    fn shift(
        &self,
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
        delta: Vec<f64>,
    ) -> PendingShift {
        let shared = self
            .shared_with
            .map(|other| (other, surfaces[other.index()].propose_into(delta.clone())));
        let primary = surfaces[equation.index()].propose_into(delta);
        PendingShift { primary, shared }
    }

    fn settle(
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
        pending: PendingShift,
        accept: bool,
    ) -> Vec<f64> {
        if let Some((other, proposal)) = pending.shared {
            let surface = &mut surfaces[other.index()];
            let _ = if accept {
                surface.commit(proposal)
            } else {
                surface.rollback(proposal)
            };
        }
        let surface = &mut surfaces[equation.index()];
        if accept {
            surface.commit(pending.primary)
        } else {
            surface.rollback(pending.primary)
        }
    }

    pub(crate) fn compute_iwls(
        &self,
        surfaces: &mut [PredictorSurface],
        equation: EquationId,
        want: bool,
    ) -> f64 {
        targets(equation, self.shared_with)
            .map(|id| surfaces[id.index()].compute_iwls(want))
            .sum()
    }

    /// `sum w c^2` and `sum w c (z - eta + ratio c)` for the contribution `c`,
    /// with the predictor currently holding `ratio c`.
    pub(crate) fn effect_moments(
        &self,
        surfaces: &[PredictorSurface],
        equation: EquationId,
        ratio: f64,
    ) -> (f64, f64) {
        let mut cross = 0.0;
        let mut score = 0.0;
        for id in targets(equation, self.shared_with) {
            let surface = &surfaces[id.index()];
            let (w, z, eta) = (
                surface.working_weight(),
                surface.working_response(),
                surface.linpred(),
            );
            for (i, c) in self.contribution.iter().enumerate() {
                cross += w[i] * c * c;
                score += w[i] * c * ratio.mul_add(*c, z[i] - eta[i]);
            }
        }
        (cross, score)
    }

    /// `Z' W Z + lambda K` over all carrying predictors.
    fn precision(&self, surfaces: &[PredictorSurface], equation: EquationId) -> Mat<f64> {
        let n = self.design.nrows();
        let mut weights = vec![0.0; n];
        for id in targets(equation, self.shared_with) {
            for (total, w) in weights.iter_mut().zip(surfaces[id.index()].working_weight()) {
                *total += w;
            }
        }
        let mut precision = weighted_cross_product(self.design.matrix(), &weights);
        if let Some(smoothing) = &self.smoothing {
            let penalty = smoothing.penalty.matrix();
            for row in 0..precision.nrows() {
                for col in 0..precision.ncols() {
                    precision[(row, col)] += smoothing.lambda * penalty[(row, col)];
                }
            }
        }
        precision
    }

    /// `Z' W (z - eta + contribution)`: weighted working partial residual.
    fn score(
        &self,
        surfaces: &[PredictorSurface],
        equation: EquationId,
        contribution: &[f64],
    ) -> Vec<f64> {
        let mut residual = vec![0.0; self.design.nrows()];
        for id in targets(equation, self.shared_with) {
            let surface = &surfaces[id.index()];
            let (w, z, eta) = (
                surface.working_weight(),
                surface.working_response(),
                surface.linpred(),
            );
            for (i, value) in residual.iter_mut().enumerate() {
                *value += w[i] * (z[i] - eta[i] + contribution[i]);
            }
        }
        transpose_times(self.design.matrix(), &residual)
    }

    fn standard_normals(ctx: &mut BlockContext<'_>, dim: usize) -> Vec<f64> {
        (0..dim).map(|_| ctx.rng.standard_normal()).collect()
    }

    /// Proposal centered at the running mode, re-linearized there each sweep.
    fn update_iwls_mode(&mut self, ctx: &mut BlockContext<'_>) -> Result<(), SimulationError> {
        let equation = ctx.equation;
        let log_old = self.loglikelihood(ctx.surfaces, equation) + self.log_prior(&self.beta);
        self.require_finite(log_old, ctx.surfaces, equation)?;

        let mode_contribution = design_times(self.design.matrix(), &self.mode);
        let at_mode = self.shift(
            ctx.surfaces,
            equation,
            subtract(&mode_contribution, &self.contribution),
        );
        self.compute_iwls(ctx.surfaces, equation, false);
        let precision = self.precision(ctx.surfaces, equation);
        let score = self.score(ctx.surfaces, equation, &mode_contribution);
        let _ = Self::settle(ctx.surfaces, equation, at_mode, false);

        let Some(root) = cholesky_lower(&precision, RANK_TOLERANCE) else {
            self.disable();
            return Ok(());
        };
        let center = solve_with_root(&root, &score);
        let q_old = -0.5 * quadratic_form(&precision, &subtract(&self.beta, &center));
        let z = Self::standard_normals(ctx, center.len());
        let candidate = add(&center, &backward_substitution_transposed(&root, &z));
        let q_new = -0.5 * squared_norm(&z);
        self.mode = center;
        self.root = Some(root);

        let candidate_contribution = design_times(self.design.matrix(), &candidate);
        let pending = self.shift(
            ctx.surfaces,
            equation,
            subtract(&candidate_contribution, &self.contribution),
        );
        if !self.within_limits(ctx.run, ctx.surfaces, equation) {
            let _ = Self::settle(ctx.surfaces, equation, pending, false);
            self.acceptance.record_outside_limits();
            return Ok(());
        }
        let log_new = self.loglikelihood(ctx.surfaces, equation) + self.log_prior(&candidate);
        let accepted = should_accept(log_new + q_old - log_old - q_new, ctx.rng);
        let _ = Self::settle(ctx.surfaces, equation, pending, accepted);
        self.acceptance.record(accepted);
        if accepted {
            self.beta = candidate;
            self.contribution = candidate_contribution;
        }
        Ok(())
    }

    /// Proposal built at the current state; the reverse density is rebuilt at the candidate.
    fn update_iwls_current(&mut self, ctx: &mut BlockContext<'_>) -> Result<(), SimulationError> {
        let equation = ctx.equation;
        let log_old = self.loglikelihood(ctx.surfaces, equation) + self.log_prior(&self.beta);
        self.require_finite(log_old, ctx.surfaces, equation)?;

        self.compute_iwls(ctx.surfaces, equation, false);
        let precision = self.precision(ctx.surfaces, equation);
        let Some(root) = cholesky_lower(&precision, RANK_TOLERANCE) else {
            self.disable();
            return Ok(());
        };
        let center = solve_with_root(&root, &self.score(ctx.surfaces, equation, &self.contribution));
        let z = Self::standard_normals(ctx, center.len());
        let candidate = add(&center, &backward_substitution_transposed(&root, &z));
        let q_forward = log_det_half(&root) - 0.5 * squared_norm(&z);

        let candidate_contribution = design_times(self.design.matrix(), &candidate);
        let pending = self.shift(
            ctx.surfaces,
            equation,
            subtract(&candidate_contribution, &self.contribution),
        );
        if !self.within_limits(ctx.run, ctx.surfaces, equation) {
            let _ = Self::settle(ctx.surfaces, equation, pending, false);
            self.acceptance.record_outside_limits();
            return Ok(());
        }
        let log_new = self.compute_iwls(ctx.surfaces, equation, true) + self.log_prior(&candidate);
        let reverse_precision = self.precision(ctx.surfaces, equation);
        let Some(reverse_root) = cholesky_lower(&reverse_precision, RANK_TOLERANCE) else {
            let _ = Self::settle(ctx.surfaces, equation, pending, false);
            self.acceptance.record(false);
            return Ok(());
        };
        let reverse_center = solve_with_root(
            &reverse_root,
            &self.score(ctx.surfaces, equation, &candidate_contribution),
        );
        let q_reverse = log_det_half(&reverse_root)
            - 0.5 * quadratic_form(&reverse_precision, &subtract(&self.beta, &reverse_center));

        let accepted = should_accept(log_new + q_reverse - log_old - q_forward, ctx.rng);
        let _ = Self::settle(ctx.surfaces, equation, pending, accepted);
        self.acceptance.record(accepted);
        if accepted {
            self.beta = candidate;
            self.contribution = candidate_contribution;
        }
        self.root = Some(root);
        Ok(())
    }

    fn needs_new_root(&self, run: &RunContext, surface: &PredictorSurface) -> bool {
        self.root.is_none()
            || run.iteration <= 1
            || surface.regime().weights_change()
            || (self.lambda() - self.root_lambda).abs() > 0.0
    }

    /// Conjugate draw from `N(P^-1 Z'W r, scale P^-1)`.
    fn update_gaussian(&mut self, ctx: &mut BlockContext<'_>) {
        let equation = ctx.equation;
        if self.needs_new_root(ctx.run, ctx.surface()) {
            match cholesky_lower(&self.precision(ctx.surfaces, equation), RANK_TOLERANCE) {
                Some(root) => {
                    self.root = Some(root);
                    self.root_lambda = self.lambda();
                }
                None => {
                    self.disable();
                    return;
                }
            }
        }
        let sd = ctx.surface().scale().sqrt();
        let score = self.score(ctx.surfaces, equation, &self.contribution);
        let z: Vec<f64> = Self::standard_normals(ctx, score.len())
            .into_iter()
            .map(|value| sd * value)
            .collect();
        let Some(root) = self.root.as_ref() else {
            return;
        };
        let candidate = add(
            &solve_with_root(root, &score),
            &backward_substitution_transposed(root, &z),
        );

        let candidate_contribution = design_times(self.design.matrix(), &candidate);
        let pending = self.shift(
            ctx.surfaces,
            equation,
            subtract(&candidate_contribution, &self.contribution),
        );
        if !self.within_limits(ctx.run, ctx.surfaces, equation) {
            let _ = Self::settle(ctx.surfaces, equation, pending, false);
            self.acceptance.record_outside_limits();
            return;
        }
        let _ = Self::settle(ctx.surfaces, equation, pending, true);
        self.acceptance.record(true);
        self.beta = candidate;
        self.contribution = candidate_contribution;
    }
}

impl FullConditional for RegressionBlock {
    fn title(&self) -> &str {
        &self.title
    }

    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        _peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError> {
        self.ensure_initialized(ctx)?;
        if !self.disabled {
            if ctx.surface().uses_iwls() {
                match self.proposal {
                    IwlsProposal::Mode => self.update_iwls_mode(ctx)?,
                    IwlsProposal::Current => self.update_iwls_current(ctx)?,
                }
            } else {
                self.update_gaussian(ctx);
            }
        }
        self.trace.record(ctx.run, &self.beta);
        Ok(())
    }

    /// Penalized IWLS step; converged once the coefficients stop moving.
    fn posteriormode(
        &mut self,
        ctx: &mut BlockContext<'_>,
        _peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError> {
        self.ensure_initialized(ctx)?;
        if self.disabled {
            return Ok(true);
        }
        let equation = ctx.equation;
        if ctx.surface().uses_iwls() {
            self.compute_iwls(ctx.surfaces, equation, false);
        }
        let Some(root) = cholesky_lower(&self.precision(ctx.surfaces, equation), RANK_TOLERANCE)
        else {
            self.disable();
            return Ok(true);
        };
        let solution = solve_with_root(&root, &self.score(ctx.surfaces, equation, &self.contribution));
        self.root = Some(root);
        self.root_lambda = self.lambda();

        let contribution = design_times(self.design.matrix(), &solution);
        let pending = self.shift(
            ctx.surfaces,
            equation,
            subtract(&contribution, &self.contribution),
        );
        if !self.within_limits(ctx.run, ctx.surfaces, equation) {
            let _ = Self::settle(ctx.surfaces, equation, pending, false);
            return Ok(false);
        }
        let _ = Self::settle(ctx.surfaces, equation, pending, true);
        self.beta = solution;
        self.contribution = contribution;
        self.mode.clone_from(&self.beta);
        Ok(self.trace.record_mode(&self.beta))
    }

    fn reset(&mut self) {
        self.beta.clone_from(&self.start);
        self.mode.clone_from(&self.start);
        self.contribution.iter_mut().for_each(|value| *value = 0.0);
        self.root = None;
        self.root_lambda = 0.0;
        if let Some(smoothing) = self.smoothing.as_mut() {
            smoothing.lambda = smoothing.lambda_start;
            smoothing.tau2 = 1.0 / smoothing.lambda_start;
        }
        self.initialized = false;
        self.disabled = false;
        self.acceptance.reset();
        self.trace.reset(&self.start);
    }

    fn trace(&self) -> &BlockTrace {
        &self.trace
    }

    fn acceptance(&self) -> AcceptanceCounter {
        self.acceptance
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::inference::{McmcConfig, StdRandomSource};
    use crate::models::families::{Gaussian, Poisson};
    use crate::utils::{max_abs_diff, usize_to_f64};

    fn covariate(n: usize) -> Vec<f64> {
        (0..n).map(|i| usize_to_f64(i) / usize_to_f64(n) - 0.5).collect()
    }

    fn design(n: usize) -> DesignMatrix {
        DesignMatrix::from_columns(
            vec![("const".to_owned(), vec![1.0; n]), ("x".to_owned(), covariate(n))],
            false,
        )
        .expect("design")
    }

    fn sampling_run() -> RunContext {
        let mut run = RunContext::new(&McmcConfig::default());
        run.iteration = 1;
        run
    }

    fn step(
        block: &mut RegressionBlock,
        run: &RunContext,
        surfaces: &mut [PredictorSurface],
        rng: &mut StdRandomSource,
    ) {
        let mut ctx = BlockContext {
            run,
            surfaces,
            equation: EquationId::new(0),
            rng,
        };
        block
            .update(&mut ctx, &mut BlockPeers::empty())
            .expect("update succeeds");
    }

    fn poisson_surface(n: usize) -> PredictorSurface {
        let response = covariate(n)
            .iter()
            .map(|x| (1.0 + x).exp().round())
            .collect();
        PredictorSurface::new("counts", response, None, Box::new(Poisson)).expect("surface")
    }

    #[test]
    fn predictor_tracks_accepted_coefficients() {
        for proposal in [IwlsProposal::Mode, IwlsProposal::Current] {
            let mut surfaces = vec![poisson_surface(60)];
            let options = RegressionOptions {
                proposal,
                ..RegressionOptions::default()
            };
            let mut block = RegressionBlock::new("linear", design(60), options).expect("block");
            let mut rng = StdRandomSource::seed_from_u64(17);

            // Start at the posterior mode; from beta = 0 every candidate is far
            // out in the reverse proposal's tail.
            let mode_run = RunContext::new(&McmcConfig::default());
            let mut converged = false;
            for _ in 0..50 {
                let mut ctx = BlockContext {
                    run: &mode_run,
                    surfaces: &mut surfaces,
                    equation: EquationId::new(0),
                    rng: &mut rng,
                };
                converged = block
                    .posteriormode(&mut ctx, &mut BlockPeers::empty())
                    .expect("mode step");
                if converged {
                    break;
                }
            }
            assert!(converged);

            let mut run = sampling_run();
            for iteration in 1..=200 {
                run.iteration = iteration;
                step(&mut block, &run, &mut surfaces, &mut rng);
                let expected = design_times(block.design().matrix(), block.beta());
                assert!(max_abs_diff(surfaces[0].linpred(), &expected) < 1.0e-9);
            }
            assert!(block.acceptance().acceptance_rate() > 0.2);
        }
    }

    #[test]
    fn outside_limit_candidates_leave_predictor_untouched() {
        let n = 20;
        let mut surfaces = vec![
            PredictorSurface::new("counts", vec![1.0e8; n], None, Box::new(Poisson))
                .expect("surface"),
        ];
        let mut block =
            RegressionBlock::new("linear", design(n), RegressionOptions::default()).expect("block");
        let mut rng = StdRandomSource::seed_from_u64(3);
        step(&mut block, &sampling_run(), &mut surfaces, &mut rng);
        assert_eq!(block.acceptance().outside_limits, 1);
        assert_eq!(block.beta(), &[0.0, 0.0]);
        assert!(surfaces[0].linpred().iter().all(|eta| *eta == 0.0));
    }

    #[test]
    fn duplicated_column_disables_block() {
        let n = 30;
        let x = covariate(n);
        let design = DesignMatrix::from_columns(
            vec![("x".to_owned(), x.clone()), ("x_copy".to_owned(), x.clone())],
            false,
        )
        .expect("design");
        let mut surfaces = vec![
            PredictorSurface::new("y", x, None, Box::new(Gaussian::with_fixed_scale(1.0)))
                .expect("surface"),
        ];
        let mut block =
            RegressionBlock::new("linear", design, RegressionOptions::default()).expect("block");
        let mut rng = StdRandomSource::seed_from_u64(5);
        let run = sampling_run();
        for _ in 0..3 {
            step(&mut block, &run, &mut surfaces, &mut rng);
        }
        assert!(block.is_disabled());
        assert_eq!(block.beta(), &[0.0, 0.0]);
        assert_eq!(block.acceptance().proposed, 0);
    }

    #[test]
    fn posterior_mode_reproduces_least_squares() {
        let n = 40;
        let x = covariate(n);
        let response: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, x)| 2.0f64.mul_add(*x, 1.0) + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let mut surfaces = vec![
            PredictorSurface::new("y", response, None, Box::new(Gaussian::with_fixed_scale(1.0)))
                .expect("surface"),
        ];
        let mut block =
            RegressionBlock::new("linear", design(n), RegressionOptions::default()).expect("block");
        let mut rng = StdRandomSource::seed_from_u64(1);
        let run = RunContext::new(&McmcConfig::default());
        let mut converged = Vec::new();
        for _ in 0..2 {
            let mut ctx = BlockContext {
                run: &run,
                surfaces: &mut surfaces,
                equation: EquationId::new(0),
                rng: &mut rng,
            };
            converged.push(
                block
                    .posteriormode(&mut ctx, &mut BlockPeers::empty())
                    .expect("mode step"),
            );
        }
        assert_eq!(converged, vec![false, true]);

        let xbar = x.iter().sum::<f64>() / usize_to_f64(n);
        let ybar = surfaces[0].observations().response.iter().sum::<f64>() / usize_to_f64(n);
        let sxy: f64 = x
            .iter()
            .zip(&surfaces[0].observations().response)
            .map(|(x, y)| (x - xbar) * (y - ybar))
            .sum();
        let sxx: f64 = x.iter().map(|x| (x - xbar).powi(2)).sum();
        let slope = sxy / sxx;
        assert_relative_eq!(block.beta()[1], slope, epsilon = 1.0e-9);
        assert_relative_eq!(block.beta()[0], slope.mul_add(-xbar, ybar), epsilon = 1.0e-9);
    }

    #[test]
    fn change_variable_moves_predictor_with_design() {
        let n = 10;
        let mut surfaces = vec![
            PredictorSurface::new(
                "y",
                vec![0.0; n],
                None,
                Box::new(Gaussian::with_fixed_scale(1.0)),
            )
            .expect("surface"),
        ];
        let options = RegressionOptions {
            start: Some(vec![1.0, 2.0]),
            ..RegressionOptions::default()
        };
        let mut block = RegressionBlock::new("linear", design(n), options).expect("block");
        let mut rng = StdRandomSource::seed_from_u64(2);
        step(&mut block, &sampling_run(), &mut surfaces, &mut rng);
        let replacement = vec![3.0; n];
        block
            .change_variable(1, &replacement, &mut surfaces, EquationId::new(0))
            .expect("valid column");
        let expected = design_times(block.design().matrix(), block.beta());
        assert!(max_abs_diff(surfaces[0].linpred(), &expected) < 1.0e-12);
    }

    #[test]
    fn rescale_scales_coefficients_and_predictor() {
        let n = 8;
        let mut surfaces = vec![
            PredictorSurface::new("y", vec![0.0; n], None, Box::new(Gaussian::with_fixed_scale(1.0)))
                .expect("surface"),
        ];
        let options = RegressionOptions {
            start: Some(vec![0.5, -1.0]),
            ..RegressionOptions::default()
        };
        let mut block = RegressionBlock::new("linear", design(n), options).expect("block");
        let mut rng = StdRandomSource::seed_from_u64(2);
        step(&mut block, &sampling_run(), &mut surfaces, &mut rng);
        let before = block.beta().to_vec();
        block.rescale(-2.0, &mut surfaces, EquationId::new(0));
        assert_relative_eq!(block.beta()[0], -2.0 * before[0]);
        let expected = design_times(block.design().matrix(), block.beta());
        assert!(max_abs_diff(surfaces[0].linpred(), &expected) < 1.0e-12);
    }

    #[test]
    fn start_vector_must_match_design() {
        let options = RegressionOptions {
            start: Some(vec![1.0]),
            ..RegressionOptions::default()
        };
        assert!(matches!(
            RegressionBlock::new("linear", design(4), options),
            Err(ConfigError::DesignCoefficientMismatch { .. })
        ));
    }
}
