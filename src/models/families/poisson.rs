use super::MIN_WORKING_WEIGHT;
use crate::models::predictor::{IwlsTerm, ResponseFamily};

/// Poisson counts with log link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Poisson;

impl Poisson {
    const LIMITS: (f64, f64) = (-10.0, 15.0);

    fn mean(linpred: f64) -> f64 {
        linpred.clamp(Self::LIMITS.0, Self::LIMITS.1).exp()
    }
}

impl ResponseFamily for Poisson {
    fn name(&self) -> &str {
        "poisson"
    }

    fn uses_iwls(&self) -> bool {
        true
    }

    fn working_weights_change(&self) -> bool {
        true
    }

    fn linpred_limits(&self) -> (f64, f64) {
        Self::LIMITS
    }

    fn loglikelihood(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        weight * response.mul_add(linpred, -Self::mean(linpred))
    }

    fn iwls(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        let mu = Self::mean(linpred);
        IwlsTerm {
            weight: (weight * mu).max(MIN_WORKING_WEIGHT),
            working_response: linpred + (response - mu) / mu,
            loglikelihood: weight * response.mul_add(linpred, -mu),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        Self::mean(linpred)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn zero_count_working_response_is_predictor_minus_one() {
        let term = Poisson.iwls(0, 0.0, 0.7, 1.0);
        assert_relative_eq!(term.working_response, -0.3, epsilon = 1.0e-12);
        assert_relative_eq!(term.weight, 0.7f64.exp(), epsilon = 1.0e-12);
    }

    #[test]
    fn iwls_likelihood_matches_direct_evaluation() {
        let term = Poisson.iwls(0, 3.0, 1.2, 2.0);
        assert_relative_eq!(term.loglikelihood, Poisson.loglikelihood(0, 3.0, 1.2, 2.0));
    }
}
