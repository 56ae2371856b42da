//! Chain diagnostics computed from stored block traces.

use crate::utils::usize_to_f64;

/// Sample autocorrelation at a given lag.
#[must_use]
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }

    let n = series.len() - lag;
    let mean = series.iter().sum::<f64>() / usize_to_f64(series.len());

    let denominator: f64 = series.iter().map(|value| (value - mean).powi(2)).sum();
    if denominator <= 0.0 {
        return 0.0;
    }

    let numerator: f64 = (0..n)
        .map(|idx| (series[idx] - mean) * (series[idx + lag] - mean))
        .sum();

    numerator / denominator
}

/// Autocorrelations for lags `1..=max_lag`.
#[must_use]
pub fn autocorrelation_function(series: &[f64], max_lag: usize) -> Vec<f64> {
    (1..=max_lag).map(|lag| autocorrelation(series, lag)).collect()
}

/// Heuristic effective sample size using positive autocorrelation truncation.
#[must_use]
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return usize_to_f64(n);
    }

    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }

    usize_to_f64(n) / (2.0f64.mul_add(rho_sum, 1.0)).max(1.0)
}
