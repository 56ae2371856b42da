//! Per-equation predictor surface: the shared linear predictor, IWLS working
//! quantities and the response family that interprets them.

use std::fmt::Debug;

use faer::Mat;

use super::equation::EquationId;
use super::types::ConfigError;
use crate::inference::RandomSource;

/// How IWLS working weights behave across sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightRegime {
    /// Working weights depend on the predictor; prior weights differ from one.
    ChangingWeights,
    /// Working weights depend on the predictor; prior weights are all one.
    ChangingUnitWeights,
    /// Working weights are the prior weights, all equal to one.
    FixedUnitWeights,
    /// Working weights are the prior weights.
    FixedWeights,
}

impl WeightRegime {
    #[must_use]
    pub const fn weights_change(self) -> bool {
        matches!(self, Self::ChangingWeights | Self::ChangingUnitWeights)
    }

    #[must_use]
    pub const fn unit_prior_weights(self) -> bool {
        matches!(self, Self::ChangingUnitWeights | Self::FixedUnitWeights)
    }
}

/// Working weight, working response and log-likelihood contribution of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IwlsTerm {
    pub weight: f64,
    pub working_response: f64,
    pub loglikelihood: f64,
}

/// Observation-level state owned by a surface.
#[derive(Debug, Clone)]
pub struct Observations {
    pub response: Vec<f64>,
    pub weight: Vec<f64>,
    pub linpred: Vec<f64>,
    pub working_weight: Vec<f64>,
    pub working_response: Vec<f64>,
    /// Mean function evaluated at the predictor, refreshed in `update_end`.
    pub mean: Vec<f64>,
}

impl Observations {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.response.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.response.is_empty()
    }
}

/// Read access to the predictors of the other equations.
#[derive(Debug, Clone, Copy)]
pub struct PeerPredictors<'a> {
    before: &'a [PredictorSurface],
    after: &'a [PredictorSurface],
}

impl<'a> PeerPredictors<'a> {
    #[must_use]
    pub const fn new(before: &'a [PredictorSurface], after: &'a [PredictorSurface]) -> Self {
        Self { before, after }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self {
            before: &[],
            after: &[],
        }
    }

    /// Predictor of another equation; `None` for the requesting equation itself.
    #[must_use]
    pub fn linpred(&self, equation: EquationId) -> Option<&'a [f64]> {
        let index = equation.index();
        if index < self.before.len() {
            return Some(self.before[index].linpred());
        }
        let offset = index.checked_sub(self.before.len() + 1)?;
        self.after.get(offset).map(PredictorSurface::linpred)
    }
}

/// Response distribution seen through its log-likelihood and IWLS approximation.
pub trait ResponseFamily: Debug {
    fn name(&self) -> &str;

    /// Regression blocks use IWLS Metropolis-Hastings when true, the conjugate
    /// Gaussian update otherwise.
    fn uses_iwls(&self) -> bool;

    /// Whether working weights depend on the predictor.
    fn working_weights_change(&self) -> bool;

    /// Admissible predictor band `[min, max]`.
    fn linpred_limits(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn loglikelihood(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> f64;

    fn loglikelihood_unit_weight(&self, obs: usize, response: f64, linpred: f64) -> f64 {
        self.loglikelihood(obs, response, linpred, 1.0)
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm;

    fn inverse_link(&self, obs: usize, linpred: f64) -> f64;

    /// Scale parameter handed to conjugate updates and variance blocks.
    fn scale(&self) -> f64 {
        1.0
    }

    fn update(
        &mut self,
        _data: &mut Observations,
        _peers: &PeerPredictors<'_>,
        _rng: &mut dyn RandomSource,
    ) {
    }

    fn posteriormode(&mut self, _data: &mut Observations, _peers: &PeerPredictors<'_>) -> bool {
        true
    }

    fn reset(&mut self) {}
}

/// Two-phase change to a predictor: applied by `propose_into`, then either
/// kept by `commit` or undone by `rollback`.
#[derive(Debug)]
#[must_use = "a predictor proposal must be committed or rolled back"]
pub struct PredictorProposal {
    delta: Vec<f64>,
}

impl PredictorProposal {
    #[must_use]
    pub fn delta(&self) -> &[f64] {
        &self.delta
    }
}

/// One equation's linear predictor and response family.
#[derive(Debug)]
pub struct PredictorSurface {
    label: String,
    data: Observations,
    family: Box<dyn ResponseFamily>,
    regime: WeightRegime,
    scale_multiplier: f64,
}

impl PredictorSurface {
    /// # Errors
    ///
    /// Returns `ConfigError::ObservationLengthMismatch` if weights and response differ in length.
    pub fn new(
        label: impl Into<String>,
        response: Vec<f64>,
        weight: Option<Vec<f64>>,
        family: Box<dyn ResponseFamily>,
    ) -> Result<Self, ConfigError> {
        let n = response.len();
        let weight = weight.unwrap_or_else(|| vec![1.0; n]);
        if weight.len() != n {
            return Err(ConfigError::ObservationLengthMismatch);
        }
        let unit = weight.iter().all(|w| (*w - 1.0).abs() < f64::EPSILON);
        let regime = match (family.working_weights_change(), unit) {
            (true, true) => WeightRegime::ChangingUnitWeights,
            (true, false) => WeightRegime::ChangingWeights,
            (false, true) => WeightRegime::FixedUnitWeights,
            (false, false) => WeightRegime::FixedWeights,
        };
        let mut surface = Self {
            label: label.into(),
            data: Observations {
                response,
                weight,
                linpred: vec![0.0; n],
                working_weight: vec![0.0; n],
                working_response: vec![0.0; n],
                mean: vec![0.0; n],
            },
            family,
            regime,
            scale_multiplier: 1.0,
        };
        surface.compute_iwls(false);
        surface.refresh_mean();
        Ok(surface)
    }

    /// Multiplier applied to hyperprior scales when the response was rescaled.
    #[must_use]
    pub const fn with_scale_multiplier(mut self, multiplier: f64) -> Self {
        self.scale_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn family(&self) -> &dyn ResponseFamily {
        self.family.as_ref()
    }

    #[must_use]
    pub const fn observations(&self) -> &Observations {
        &self.data
    }

    #[must_use]
    pub const fn nobs(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn linpred(&self) -> &[f64] {
        &self.data.linpred
    }

    #[must_use]
    pub fn working_weight(&self) -> &[f64] {
        &self.data.working_weight
    }

    #[must_use]
    pub fn working_response(&self) -> &[f64] {
        &self.data.working_response
    }

    #[must_use]
    pub const fn regime(&self) -> WeightRegime {
        self.regime
    }

    #[must_use]
    pub fn uses_iwls(&self) -> bool {
        self.family.uses_iwls()
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.family.scale()
    }

    #[must_use]
    pub const fn scale_multiplier(&self) -> f64 {
        self.scale_multiplier
    }

    /// Log-likelihood at the current predictor.
    #[must_use]
    pub fn loglikelihood(&self) -> f64 {
        let data = &self.data;
        if self.regime.unit_prior_weights() {
            (0..data.len())
                .map(|i| {
                    self.family
                        .loglikelihood_unit_weight(i, data.response[i], data.linpred[i])
                })
                .sum()
        } else {
            (0..data.len())
                .filter(|&i| data.weight[i] != 0.0)
                .map(|i| {
                    self.family
                        .loglikelihood(i, data.response[i], data.linpred[i], data.weight[i])
                })
                .sum()
        }
    }

    /// Refresh working weights and working response at the current predictor.
    ///
    /// Returns the log-likelihood when `want_likelihood` is set, `0` otherwise.
    pub fn compute_iwls(&mut self, want_likelihood: bool) -> f64 {
        let mut total = 0.0;
        for i in 0..self.data.len() {
            let weight = self.data.weight[i];
            if weight == 0.0 {
                self.data.working_weight[i] = 0.0;
                self.data.working_response[i] = self.data.linpred[i];
                continue;
            }
            let term = self
                .family
                .iwls(i, self.data.response[i], self.data.linpred[i], weight);
            self.data.working_weight[i] = term.weight;
            self.data.working_response[i] = term.working_response;
            if want_likelihood {
                total += term.loglikelihood;
            }
        }
        total
    }

    /// True when every predictor value lies inside the family's link limits.
    #[must_use]
    pub fn check_linpred(&self) -> bool {
        let (min, max) = self.family.linpred_limits();
        self.data
            .linpred
            .iter()
            .all(|&value| value >= min && value <= max)
    }

    pub fn add_linpred(&mut self, delta: &[f64]) {
        for (value, change) in self.data.linpred.iter_mut().zip(delta) {
            *value += change;
        }
    }

    pub fn add_linpred_scaled(&mut self, delta: &[f64], factor: f64) {
        for (value, change) in self.data.linpred.iter_mut().zip(delta) {
            *value = factor.mul_add(*change, *value);
        }
    }

    /// Add `design * delta_beta` to the predictor.
    pub fn addmult(&mut self, design: &Mat<f64>, delta_beta: &[f64]) {
        for row in 0..design.nrows() {
            let change: f64 = delta_beta
                .iter()
                .enumerate()
                .map(|(col, d)| design[(row, col)] * d)
                .sum();
            self.data.linpred[row] += change;
        }
    }

    /// Apply `delta` to the predictor pending a commit or rollback.
    pub fn propose_into(&mut self, delta: Vec<f64>) -> PredictorProposal {
        self.add_linpred(&delta);
        PredictorProposal { delta }
    }

    /// Keep the proposal; returns its buffer for reuse.
    #[must_use]
    pub fn commit(&mut self, proposal: PredictorProposal) -> Vec<f64> {
        proposal.delta
    }

    /// Undo the proposal; returns its buffer for reuse.
    #[must_use]
    pub fn rollback(&mut self, proposal: PredictorProposal) -> Vec<f64> {
        self.add_linpred_scaled(&proposal.delta, -1.0);
        proposal.delta
    }

    pub fn update(&mut self, peers: &PeerPredictors<'_>, rng: &mut dyn RandomSource) {
        self.family.update(&mut self.data, peers, rng);
        if self.regime.weights_change() {
            self.compute_iwls(false);
        }
    }

    pub fn update_end(&mut self) {
        self.refresh_mean();
    }

    pub fn posteriormode(&mut self, peers: &PeerPredictors<'_>) -> bool {
        let converged = self.family.posteriormode(&mut self.data, peers);
        if self.regime.weights_change() {
            self.compute_iwls(false);
        }
        converged
    }

    pub fn posteriormode_end(&mut self) {
        self.refresh_mean();
    }

    /// Zero the predictor and restore the family's starting state.
    pub fn reset(&mut self) {
        self.data.linpred.iter_mut().for_each(|value| *value = 0.0);
        self.family.reset();
        self.compute_iwls(false);
        self.refresh_mean();
    }

    fn refresh_mean(&mut self) {
        for i in 0..self.data.len() {
            self.data.mean[i] = self.family.inverse_link(i, self.data.linpred[i]);
        }
    }
}
