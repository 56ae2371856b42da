use crate::inference::RandomSource;
use crate::models::predictor::{IwlsTerm, Observations, PeerPredictors, ResponseFamily};
use crate::utils::usize_to_f64;

/// Gaussian response with identity link and an inverse-gamma prior on the variance.
#[derive(Debug, Clone)]
pub struct Gaussian {
    sigma2: f64,
    sigma2_start: f64,
    a: f64,
    b: f64,
    fixed_scale: bool,
}

impl Default for Gaussian {
    fn default() -> Self {
        Self::new(0.001, 0.001)
    }
}

impl Gaussian {
    /// Gaussian family whose variance is sampled from `IG(a + n/2, b + RSS/2)`.
    #[must_use]
    pub const fn new(a: f64, b: f64) -> Self {
        Self {
            sigma2: 1.0,
            sigma2_start: 1.0,
            a,
            b,
            fixed_scale: false,
        }
    }

    /// Gaussian family with a known variance.
    #[must_use]
    pub const fn with_fixed_scale(sigma2: f64) -> Self {
        Self {
            sigma2,
            sigma2_start: sigma2,
            a: 0.001,
            b: 0.001,
            fixed_scale: true,
        }
    }

    #[must_use]
    pub const fn sigma2(&self) -> f64 {
        self.sigma2
    }

    fn residual_sum_of_squares(data: &Observations) -> (f64, usize) {
        let mut rss = 0.0;
        let mut used = 0;
        for i in 0..data.len() {
            if data.weight[i] == 0.0 {
                continue;
            }
            let residual = data.response[i] - data.linpred[i];
            rss += data.weight[i] * residual * residual;
            used += 1;
        }
        (rss, used)
    }
}

impl ResponseFamily for Gaussian {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn uses_iwls(&self) -> bool {
        false
    }

    fn working_weights_change(&self) -> bool {
        false
    }

    fn loglikelihood(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        let residual = response - linpred;
        -0.5 * weight * residual * residual / self.sigma2
    }

    fn loglikelihood_unit_weight(&self, _obs: usize, response: f64, linpred: f64) -> f64 {
        let residual = response - linpred;
        -0.5 * residual * residual / self.sigma2
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        IwlsTerm {
            weight,
            working_response: response,
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        linpred
    }

    fn scale(&self) -> f64 {
        self.sigma2
    }

    fn update(
        &mut self,
        data: &mut Observations,
        _peers: &PeerPredictors<'_>,
        rng: &mut dyn RandomSource,
    ) {
        if self.fixed_scale {
            return;
        }
        let (rss, used) = Self::residual_sum_of_squares(data);
        let shape = 0.5f64.mul_add(usize_to_f64(used), self.a);
        let scale = 0.5f64.mul_add(rss, self.b);
        self.sigma2 = rng.inverse_gamma(shape, scale);
    }

    fn posteriormode(&mut self, data: &mut Observations, _peers: &PeerPredictors<'_>) -> bool {
        if !self.fixed_scale {
            let (rss, used) = Self::residual_sum_of_squares(data);
            if used > 0 && rss > 0.0 {
                self.sigma2 = rss / usize_to_f64(used);
            }
        }
        true
    }

    fn reset(&mut self) {
        self.sigma2 = self.sigma2_start;
    }
}
