//! Random variate service consumed by every block.
//!
//! Blocks only see the object-safe [`RandomSource`] trait. All draws within a
//! sweep come from one source in a fixed call order, so a seed reproduces a chain.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Supplier of uniform, normal, gamma and derived deviates.
pub trait RandomSource {
    /// Uniform deviate on `(0, 1]`, safe to take the logarithm of.
    fn uniform(&mut self) -> f64;

    fn standard_normal(&mut self) -> f64;

    /// Gamma deviate with the given shape and rate.
    fn gamma(&mut self, shape: f64, rate: f64) -> f64;

    fn reseed(&mut self, seed: u64);

    fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        sd.mul_add(self.standard_normal(), mean)
    }

    /// Inverse-gamma deviate with density proportional to `x^(-shape-1) exp(-scale/x)`.
    fn inverse_gamma(&mut self, shape: f64, scale: f64) -> f64 {
        scale / self.gamma(shape, 1.0)
    }

    fn beta(&mut self, a: f64, b: f64) -> f64 {
        let x = self.gamma(a, 1.0);
        let y = self.gamma(b, 1.0);
        x / (x + y)
    }

    /// Generalized inverse Gaussian deviate with density proportional to
    /// `x^(p-1) exp(-(a x + b / x) / 2)`.
    fn generalized_inverse_gaussian(&mut self, p: f64, a: f64, b: f64) -> f64 {
        sample_generalized_inverse_gaussian(self, p, a, b)
    }
}

/// Default source backed by `StdRng`.
#[derive(Debug)]
pub struct StdRandomSource {
    rng: StdRng,
}

impl StdRandomSource {
    #[must_use]
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for StdRandomSource {
    fn default() -> Self {
        Self::seed_from_u64(42)
    }
}

impl RandomSource for StdRandomSource {
    fn uniform(&mut self) -> f64 {
        (1.0_f64 - self.rng.random::<f64>()).max(f64::MIN_POSITIVE)
    }

    fn standard_normal(&mut self) -> f64 {
        let u1 = self.uniform();
        let u2 = self.rng.random::<f64>();
        (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    fn gamma(&mut self, shape: f64, rate: f64) -> f64 {
        sample_gamma(self, shape, 1.0 / rate)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

fn sample_gamma(rng: &mut StdRandomSource, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = rng.uniform();
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = rng.standard_normal();
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// Below this `sqrt(a b)` the GIG is replaced by its gamma or inverse-gamma limit.
const GIG_DEGENERATE_OMEGA: f64 = 1.0e-10;

fn sample_generalized_inverse_gaussian<R: RandomSource + ?Sized>(
    rng: &mut R,
    p: f64,
    a: f64,
    b: f64,
) -> f64 {
    if !(a >= 0.0 && b >= 0.0) || (a == 0.0 && b == 0.0) {
        return f64::NAN;
    }
    let omega = (a * b).sqrt();
    if omega < GIG_DEGENERATE_OMEGA {
        if p > 0.0 && a > 0.0 {
            return rng.gamma(p, 0.5 * a);
        }
        if p < 0.0 && b > 0.0 {
            return rng.inverse_gamma(-p, 0.5 * b);
        }
        return f64::NAN;
    }

    let lambda = p.abs();
    let alpha = (b / a).sqrt();
    let draw = if lambda > 1.0 || omega > 1.0 {
        gig_ratio_of_uniforms_shifted(rng, lambda, omega)
    } else {
        gig_ratio_of_uniforms(rng, lambda, omega)
    };
    if p < 0.0 { alpha / draw } else { alpha * draw }
}

fn gig_mode(lambda: f64, omega: f64) -> f64 {
    if lambda >= 1.0 {
        ((lambda - 1.0).hypot(omega) + (lambda - 1.0)) / omega
    } else {
        omega / ((1.0 - lambda).hypot(omega) + (1.0 - lambda))
    }
}

/// Log of the square-rooted, unnormalised GIG(lambda, omega, omega) density.
fn gig_half_log_density(x: f64, t: f64, s: f64) -> f64 {
    t.mul_add(x.ln(), -s * (x + 1.0 / x))
}

// Dagpunar-Lehner ratio of uniforms without mode shift; valid for all lambda >= 0.
fn gig_ratio_of_uniforms<R: RandomSource + ?Sized>(rng: &mut R, lambda: f64, omega: f64) -> f64 {
    let t = 0.5 * (lambda - 1.0);
    let s = 0.25 * omega;
    let mode = gig_mode(lambda, omega);
    let normalizer = gig_half_log_density(mode, t, s);

    let y_max = ((lambda + 1.0).hypot(omega) + (lambda + 1.0)) / omega;
    let u_max = (0.5 * (lambda + 1.0))
        .mul_add(y_max.ln(), -s * (y_max + 1.0 / y_max) - normalizer)
        .exp();

    loop {
        let u = u_max * rng.uniform();
        let v = rng.uniform();
        let x = u / v;
        if v.ln() <= gig_half_log_density(x, t, s) - normalizer {
            return x;
        }
    }
}

// Ratio of uniforms with mode shift; the bounding rectangle comes from the roots of a cubic.
fn gig_ratio_of_uniforms_shifted<R: RandomSource + ?Sized>(
    rng: &mut R,
    lambda: f64,
    omega: f64,
) -> f64 {
    let t = 0.5 * (lambda - 1.0);
    let s = 0.25 * omega;
    let mode = gig_mode(lambda, omega);
    let normalizer = gig_half_log_density(mode, t, s);

    let a = -(2.0 * (lambda + 1.0) / omega + mode);
    let b = 2.0 * (lambda - 1.0) * mode / omega - 1.0;
    let c = mode;
    let p = b - a * a / 3.0;
    let q = (2.0 * a * a * a) / 27.0 - (a * b) / 3.0 + c;
    let phi = (-q / (2.0 * (-(p * p * p) / 27.0).sqrt())).clamp(-1.0, 1.0).acos();
    let factor = 2.0 * (-p / 3.0).sqrt();
    let root_plus = factor.mul_add((phi / 3.0).cos(), -a / 3.0);
    let root_minus = factor.mul_add(
        (phi / 3.0 + 4.0 / 3.0 * std::f64::consts::PI).cos(),
        -a / 3.0,
    );
    let u_plus = (root_plus - mode) * (gig_half_log_density(root_plus, t, s) - normalizer).exp();
    let u_minus = (root_minus - mode) * (gig_half_log_density(root_minus, t, s) - normalizer).exp();

    loop {
        let u = rng.uniform().mul_add(u_plus - u_minus, u_minus);
        let v = rng.uniform();
        let x = u / v + mode;
        if x > 0.0 && v.ln() <= gig_half_log_density(x, t, s) - normalizer {
            return x;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn sample_mean(draws: &[f64]) -> f64 {
        draws.iter().sum::<f64>() / crate::utils::usize_to_f64(draws.len())
    }

    #[test]
    fn gamma_draws_match_mean_and_variance() {
        let mut rng = StdRandomSource::seed_from_u64(7);
        let draws: Vec<f64> = (0..40_000).map(|_| rng.gamma(3.0, 2.0)).collect();
        let mean = sample_mean(&draws);
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 40_000.0;
        assert_relative_eq!(mean, 1.5, epsilon = 0.02);
        assert_relative_eq!(var, 0.75, epsilon = 0.03);
    }

    #[test]
    fn small_shape_gamma_stays_positive() {
        let mut rng = StdRandomSource::seed_from_u64(11);
        for _ in 0..1_000 {
            let draw = rng.gamma(0.3, 1.0);
            assert!(draw > 0.0 && draw.is_finite());
        }
    }

    #[test]
    fn beta_mean_matches() {
        let mut rng = StdRandomSource::seed_from_u64(3);
        let draws: Vec<f64> = (0..20_000).map(|_| rng.beta(2.0, 6.0)).collect();
        assert_relative_eq!(sample_mean(&draws), 0.25, epsilon = 0.01);
    }

    // E[X] = sqrt(b/a) K_{p+1}(w) / K_p(w); for p = 0.5 the Bessel ratio is 1 + 1/w.
    #[test]
    fn gig_mean_matches_half_integer_closed_form() {
        let mut rng = StdRandomSource::seed_from_u64(19);
        for &(a, b) in &[(2.0, 8.0), (0.5, 0.3), (4.0, 0.01)] {
            let omega = f64::sqrt(a * b);
            let expected = (b / a).sqrt() * (1.0 + 1.0 / omega);
            let draws: Vec<f64> = (0..60_000)
                .map(|_| rng.generalized_inverse_gaussian(0.5, a, b))
                .collect();
            assert_relative_eq!(sample_mean(&draws), expected, max_relative = 0.03);
        }
    }

    #[test]
    fn gig_with_vanishing_scale_falls_back_to_gamma() {
        let mut rng = StdRandomSource::seed_from_u64(23);
        let draws: Vec<f64> = (0..30_000)
            .map(|_| rng.generalized_inverse_gaussian(2.0, 4.0, 0.0))
            .collect();
        assert_relative_eq!(sample_mean(&draws), 1.0, epsilon = 0.02);
    }

    #[test]
    fn reseeding_reproduces_stream() {
        let mut rng = StdRandomSource::seed_from_u64(1);
        let first: Vec<f64> = (0..5).map(|_| rng.standard_normal()).collect();
        rng.reseed(1);
        let second: Vec<f64> = (0..5).map(|_| rng.standard_normal()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn boxed_sources_with_equal_seeds_agree() {
        let mut direct = StdRandomSource::seed_from_u64(11);
        let mut boxed: Box<dyn RandomSource> = Box::new(StdRandomSource::default());
        boxed.reseed(11);
        for _ in 0..5 {
            assert_eq!(direct.gamma(2.0, 1.0), boxed.gamma(2.0, 1.0));
            assert_eq!(direct.uniform(), boxed.uniform());
        }
    }
}
