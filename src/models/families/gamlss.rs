//! Gaussian location-scale pair: one equation models the mean, the other the
//! log variance, and each reads its partner's predictor in `update`.

use super::MIN_WORKING_WEIGHT;
use crate::inference::RandomSource;
use crate::models::equation::EquationId;
use crate::models::predictor::{IwlsTerm, Observations, PeerPredictors, ResponseFamily};

const LOG_VARIANCE_LIMIT: f64 = 20.0;

/// Mean equation of a heteroscedastic Gaussian model.
#[derive(Debug, Clone)]
pub struct GaussianLocation {
    variance_equation: EquationId,
    variance: Vec<f64>,
}

impl GaussianLocation {
    #[must_use]
    pub fn new(variance_equation: EquationId, nobs: usize) -> Self {
        Self {
            variance_equation,
            variance: vec![1.0; nobs],
        }
    }

    fn refresh(&mut self, peers: &PeerPredictors<'_>) {
        if let Some(log_variance) = peers.linpred(self.variance_equation) {
            for (variance, eta) in self.variance.iter_mut().zip(log_variance) {
                *variance = eta.clamp(-LOG_VARIANCE_LIMIT, LOG_VARIANCE_LIMIT).exp();
            }
        }
    }
}

impl ResponseFamily for GaussianLocation {
    fn name(&self) -> &str {
        "normal_mu"
    }

    fn uses_iwls(&self) -> bool {
        false
    }

    fn working_weights_change(&self) -> bool {
        true
    }

    fn loglikelihood(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        let residual = response - linpred;
        -0.5 * weight * residual * residual / self.variance[obs]
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        IwlsTerm {
            weight: weight / self.variance[obs],
            working_response: response,
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        linpred
    }

    fn update(
        &mut self,
        _data: &mut Observations,
        peers: &PeerPredictors<'_>,
        _rng: &mut dyn RandomSource,
    ) {
        self.refresh(peers);
    }

    fn posteriormode(&mut self, _data: &mut Observations, peers: &PeerPredictors<'_>) -> bool {
        self.refresh(peers);
        true
    }

    fn reset(&mut self) {
        self.variance.iter_mut().for_each(|variance| *variance = 1.0);
    }
}

/// Log-variance equation of a heteroscedastic Gaussian model.
#[derive(Debug, Clone)]
pub struct GaussianLogVariance {
    location_equation: EquationId,
    location: Vec<f64>,
}

impl GaussianLogVariance {
    #[must_use]
    pub fn new(location_equation: EquationId, nobs: usize) -> Self {
        Self {
            location_equation,
            location: vec![0.0; nobs],
        }
    }

    fn refresh(&mut self, peers: &PeerPredictors<'_>) {
        if let Some(mean) = peers.linpred(self.location_equation) {
            self.location.copy_from_slice(mean);
        }
    }
}

impl ResponseFamily for GaussianLogVariance {
    fn name(&self) -> &str {
        "normal_sigma2"
    }

    fn uses_iwls(&self) -> bool {
        true
    }

    fn working_weights_change(&self) -> bool {
        true
    }

    fn linpred_limits(&self) -> (f64, f64) {
        (-LOG_VARIANCE_LIMIT, LOG_VARIANCE_LIMIT)
    }

    fn loglikelihood(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        let residual = response - self.location[obs];
        let precision = (-linpred.clamp(-LOG_VARIANCE_LIMIT, LOG_VARIANCE_LIMIT)).exp();
        -0.5 * weight * (residual * residual).mul_add(precision, linpred)
    }

    // Fisher scoring: the expected information of the log variance is 1/2 per observation.
    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        let residual = response - self.location[obs];
        let precision = (-linpred.clamp(-LOG_VARIANCE_LIMIT, LOG_VARIANCE_LIMIT)).exp();
        IwlsTerm {
            weight: (0.5 * weight).max(MIN_WORKING_WEIGHT),
            working_response: linpred + (residual * residual).mul_add(precision, -1.0),
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        linpred.clamp(-LOG_VARIANCE_LIMIT, LOG_VARIANCE_LIMIT).exp()
    }

    fn update(
        &mut self,
        _data: &mut Observations,
        peers: &PeerPredictors<'_>,
        _rng: &mut dyn RandomSource,
    ) {
        self.refresh(peers);
    }

    fn posteriormode(&mut self, _data: &mut Observations, peers: &PeerPredictors<'_>) -> bool {
        self.refresh(peers);
        true
    }

    fn reset(&mut self) {
        self.location.iter_mut().for_each(|mean| *mean = 0.0);
    }
}
