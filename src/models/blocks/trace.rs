//! Per-block sample storage and posterior-mode bookkeeping.

use crate::inference::RunContext;
use crate::models::posterior::{ParameterSummary, summarize_scalar};

/// Relative change below which a posterior-mode step counts as converged.
pub const MODE_TOLERANCE: f64 = 1.0e-5;

/// Stored draws of one block, one row per retained sweep.
#[derive(Debug, Clone)]
pub struct BlockTrace {
    names: Vec<String>,
    samples: Vec<Vec<f64>>,
    current: Vec<f64>,
    mode: Vec<f64>,
}

impl BlockTrace {
    #[must_use]
    pub fn new(names: Vec<String>, start: &[f64]) -> Self {
        Self {
            names,
            samples: Vec::new(),
            current: start.to_vec(),
            mode: start.to_vec(),
        }
    }

    /// Remember the latest value and store it if the sweep is retained.
    pub fn record(&mut self, run: &RunContext, values: &[f64]) {
        self.current.clear();
        self.current.extend_from_slice(values);
        if !run.in_mode_search() && run.is_retained() {
            self.samples.push(values.to_vec());
        }
    }

    /// Store a posterior-mode iterate; returns whether it moved less than [`MODE_TOLERANCE`].
    pub fn record_mode(&mut self, values: &[f64]) -> bool {
        let change: f64 = values
            .iter()
            .zip(&self.mode)
            .map(|(new, old)| (new - old).powi(2))
            .sum::<f64>()
            .sqrt();
        let norm: f64 = self.mode.iter().map(|old| old * old).sum::<f64>().sqrt();
        let converged = if norm > 0.0 {
            change / norm <= MODE_TOLERANCE
        } else {
            change <= MODE_TOLERANCE
        };
        self.mode.clear();
        self.mode.extend_from_slice(values);
        self.current.clear();
        self.current.extend_from_slice(values);
        converged
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }

    #[must_use]
    pub fn mode(&self) -> &[f64] {
        &self.mode
    }

    /// Draws of one parameter across retained sweeps.
    #[must_use]
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.samples.iter().map(|row| row[index]).collect()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ParameterSummary> {
        (0..self.names.len())
            .map(|index| summarize_scalar(&self.column(index)))
            .collect()
    }

    pub fn reset(&mut self, start: &[f64]) {
        self.samples.clear();
        self.current = start.to_vec();
        self.mode = start.to_vec();
    }
}
