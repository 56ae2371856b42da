//! Run schedule, per-run context and acceptance bookkeeping shared by all blocks.

pub mod diagnostics;
pub mod random;

use thiserror::Error;

use crate::utils::usize_to_f64;

pub use random::{RandomSource, StdRandomSource};

/// Errors for generic MCMC configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("burn-in ({burn_in}) must be smaller than iterations ({iterations})")]
    InvalidBurnIn { burn_in: usize, iterations: usize },
    #[error("step between stored samples must be positive")]
    InvalidStep,
    #[error("posterior mode iteration bound must be positive")]
    InvalidModeIterations,
}

/// Sampling schedule for one run.
#[derive(Debug, Clone, Copy)]
pub struct McmcConfig {
    pub iterations: usize,
    pub burn_in: usize,
    /// Store every `step`-th sweep after burn-in.
    pub step: usize,
    pub seed: Option<u64>,
    /// Reject proposals that push the predictor outside the family's link limits.
    pub check_predictor_limits: bool,
    /// Upper bound on posterior-mode passes.
    pub max_mode_iterations: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 52_000,
            burn_in: 2_000,
            step: 50,
            seed: None,
            check_predictor_limits: true,
            max_mode_iterations: 1_000,
        }
    }
}

impl McmcConfig {
    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if self.iterations == 0 {
            return Err(InferenceError::InvalidIterations);
        }
        if self.burn_in >= self.iterations {
            return Err(InferenceError::InvalidBurnIn {
                burn_in: self.burn_in,
                iterations: self.iterations,
            });
        }
        if self.step == 0 {
            return Err(InferenceError::InvalidStep);
        }
        if self.max_mode_iterations == 0 {
            return Err(InferenceError::InvalidModeIterations);
        }
        Ok(())
    }

    /// Number of retained draws implied by this configuration.
    #[must_use]
    pub const fn retained_draws(self) -> usize {
        (self.iterations - self.burn_in) / self.step
    }
}

/// Read-only view of the run state handed to every block call.
///
/// The scheduler is the only writer; `iteration` is 1-based while sampling
/// and 0 during the posterior-mode loop.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub iteration: usize,
    pub iterations: usize,
    pub burn_in: usize,
    pub step: usize,
    pub check_predictor_limits: bool,
}

impl RunContext {
    #[must_use]
    pub const fn new(config: &McmcConfig) -> Self {
        Self {
            iteration: 0,
            iterations: config.iterations,
            burn_in: config.burn_in,
            step: config.step,
            check_predictor_limits: config.check_predictor_limits,
        }
    }

    /// True while the posterior-mode loop is running.
    #[must_use]
    pub const fn in_mode_search(&self) -> bool {
        self.iteration == 0
    }

    /// Whether the current sweep is stored in block traces.
    #[must_use]
    pub const fn is_retained(&self) -> bool {
        self.iteration > self.burn_in && (self.iteration - self.burn_in) % self.step == 0
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(&McmcConfig::default())
    }
}

/// Proposal counters for a single block.
///
/// Outside-limit events are proposals dropped because the candidate predictor
/// left the family's link band; they are counted apart from likelihood rejections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceCounter {
    pub proposed: usize,
    pub accepted: usize,
    pub outside_limits: usize,
}

impl AcceptanceCounter {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    pub const fn record_outside_limits(&mut self) {
        self.proposed += 1;
        self.outside_limits += 1;
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }

    pub const fn reset(&mut self) {
        *self = Self {
            proposed: 0,
            accepted: 0,
            outside_limits: 0,
        };
    }
}

/// Metropolis-Hastings decision on the log scale.
pub fn should_accept(log_acceptance: f64, rng: &mut dyn RandomSource) -> bool {
    if log_acceptance.is_nan() {
        return false;
    }
    log_acceptance >= 0.0 || rng.uniform().ln() <= log_acceptance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_rejects_zero_iterations() {
        let config = McmcConfig {
            iterations: 0,
            ..McmcConfig::default()
        };
        assert_eq!(config.validate(), Err(InferenceError::InvalidIterations));
    }

    #[test]
    fn config_validation_rejects_burn_in_beyond_iterations() {
        let config = McmcConfig {
            iterations: 100,
            burn_in: 100,
            ..McmcConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(InferenceError::InvalidBurnIn {
                burn_in: 100,
                iterations: 100
            })
        );
    }

    #[test]
    fn retained_sweeps_match_retained_draws() {
        let config = McmcConfig {
            iterations: 130,
            burn_in: 30,
            step: 7,
            ..McmcConfig::default()
        };
        let mut context = RunContext::new(&config);
        let mut stored = 0;
        for iteration in 1..=config.iterations {
            context.iteration = iteration;
            if context.is_retained() {
                stored += 1;
            }
        }
        assert_eq!(stored, config.retained_draws());
    }

    #[test]
    fn counter_tracks_acceptance_and_limits() {
        let mut counter = AcceptanceCounter::default();
        counter.record(true);
        counter.record(false);
        counter.record_outside_limits();
        counter.record(true);
        assert_eq!(counter.accepted, 2);
        assert_eq!(counter.outside_limits, 1);
        assert!((counter.acceptance_rate() - 0.5).abs() < 1.0e-12);
        counter.reset();
        assert_eq!(counter, AcceptanceCounter::default());
    }
}
