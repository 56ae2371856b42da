use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use super::MIN_WORKING_WEIGHT;
use crate::inference::RandomSource;
use crate::models::predictor::{IwlsTerm, Observations, PeerPredictors, ResponseFamily};

const LIMIT: f64 = 10.0;
const PROBABILITY_FLOOR: f64 = 1.0e-15;

/// Binomial proportions with logit link; the weight carries the number of trials.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinomialLogit;

fn logistic(linpred: f64) -> f64 {
    1.0 / (1.0 + (-linpred).exp())
}

impl ResponseFamily for BinomialLogit {
    fn name(&self) -> &str {
        "binomial_logit"
    }

    fn uses_iwls(&self) -> bool {
        true
    }

    fn working_weights_change(&self) -> bool {
        true
    }

    fn linpred_limits(&self) -> (f64, f64) {
        (-LIMIT, LIMIT)
    }

    fn loglikelihood(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        let eta = linpred.clamp(-LIMIT, LIMIT);
        weight * response.mul_add(eta, -eta.exp().ln_1p())
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        let eta = linpred.clamp(-LIMIT, LIMIT);
        let mu = logistic(eta);
        let variance = (mu * (1.0 - mu)).max(MIN_WORKING_WEIGHT);
        IwlsTerm {
            weight: weight * variance,
            working_response: linpred + (response - mu) / variance,
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        logistic(linpred.clamp(-LIMIT, LIMIT))
    }
}

fn standard_normal_cdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| normal.cdf(x))
}

fn standard_normal_pdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| normal.pdf(x))
}

fn standard_normal_quantile(p: f64) -> f64 {
    let clamped = p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| normal.inverse_cdf(clamped))
}

/// Binary response with probit link, sampled through latent Gaussian utilities.
///
/// `update` draws `z_i ~ N(eta_i, 1)` truncated to the half line matching `y_i`
/// and stores it as the working response, so regression blocks take the
/// conjugate Gaussian path with unit scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinomialProbit;

impl BinomialProbit {
    fn truncated_utility(response: f64, linpred: f64, uniform: f64) -> f64 {
        let below_zero = standard_normal_cdf(-linpred);
        let p = if response > 0.5 {
            uniform.mul_add(1.0 - below_zero, below_zero)
        } else {
            uniform * below_zero
        };
        linpred + standard_normal_quantile(p)
    }

    fn expected_utility(response: f64, linpred: f64) -> f64 {
        let density = standard_normal_pdf(linpred);
        let cdf = standard_normal_cdf(linpred).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
        if response > 0.5 {
            linpred + density / cdf
        } else {
            linpred - density / (1.0 - cdf)
        }
    }
}

impl ResponseFamily for BinomialProbit {
    fn name(&self) -> &str {
        "binomial_probit"
    }

    fn uses_iwls(&self) -> bool {
        false
    }

    fn working_weights_change(&self) -> bool {
        false
    }

    fn linpred_limits(&self) -> (f64, f64) {
        (-LIMIT, LIMIT)
    }

    fn loglikelihood(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        let p = standard_normal_cdf(linpred).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
        weight * response.mul_add(p.ln(), (1.0 - response) * (1.0 - p).ln())
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        IwlsTerm {
            weight,
            working_response: Self::expected_utility(response, linpred),
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        standard_normal_cdf(linpred)
    }

    fn update(
        &mut self,
        data: &mut Observations,
        _peers: &PeerPredictors<'_>,
        rng: &mut dyn RandomSource,
    ) {
        for i in 0..data.len() {
            let uniform = rng.uniform();
            data.working_response[i] =
                Self::truncated_utility(data.response[i], data.linpred[i], uniform);
        }
    }

    fn posteriormode(&mut self, data: &mut Observations, _peers: &PeerPredictors<'_>) -> bool {
        for i in 0..data.len() {
            data.working_response[i] = Self::expected_utility(data.response[i], data.linpred[i]);
        }
        true
    }
}
