/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Sweep scheduler driving every equation's predictor and blocks.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Scheduler
//!
//! [`Sampler`] owns the predictor surfaces and equations of a model. Each sweep
//! visits the equations last-registered first; inside an equation the surface
//! is refreshed, every block is updated in registration order, and the surface
//! is finalized. The posterior-mode loop uses the same order.

use std::path::{Path, PathBuf};
use std::time::Instant;

use num_traits::ToPrimitive;

use super::blocks::{BlockContext, BlockId, FullConditional, ParameterBlock};
use super::equation::{Equation, EquationId};
use super::predictor::{PeerPredictors, PredictorSurface};
use super::report::{
    EquationReport, ModeReport, SimulationReport, output_path, render_acceptance_table,
    write_results, write_samples,
};
use super::types::{ConfigError, SimulationError};
use crate::inference::diagnostics::autocorrelation_function;
use crate::inference::{InferenceError, McmcConfig, RandomSource, RunContext, StdRandomSource};
use crate::utils::usize_to_f64;

/// Options of one [`Sampler::simulate`] call.
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    /// Write sample and result files under this prefix.
    pub output_prefix: Option<PathBuf>,
    /// Run the posterior-mode loop first to obtain starting values.
    pub compute_mode: bool,
    /// Skip the first visited equation in the first posterior-mode pass.
    pub skip_first: bool,
}

/// Autocorrelations of one stored parameter.
#[derive(Debug, Clone)]
pub struct Autocorrelation {
    pub equation: String,
    pub block: String,
    pub parameter: String,
    /// Lags `1..=max_lag`.
    pub values: Vec<f64>,
}

/// Split `surfaces` into the one at `index` and read access to the others.
fn surface_with_peers(
    surfaces: &mut [PredictorSurface],
    index: usize,
) -> Option<(&mut PredictorSurface, PeerPredictors<'_>)> {
    let (before, rest) = surfaces.split_at_mut(index);
    let (current, after) = rest.split_first_mut()?;
    Some((current, PeerPredictors::new(before, after)))
}

fn format_duration(seconds: u64) -> String {
    let minutes = seconds / 60;
    let seconds = seconds % 60;
    match minutes {
        0 => format!("{seconds} seconds"),
        1 => format!("1 minute {seconds} seconds"),
        _ => format!("{minutes} minutes {seconds} seconds"),
    }
}

pub struct Sampler {
    config: McmcConfig,
    run: RunContext,
    surfaces: Vec<PredictorSurface>,
    equations: Vec<Equation>,
    rng: Box<dyn RandomSource>,
}

impl Sampler {
    /// # Errors
    ///
    /// Returns `InferenceError` if the schedule is invalid.
    pub fn new(config: McmcConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        Ok(Self {
            config,
            run: RunContext::new(&config),
            surfaces: Vec::new(),
            equations: Vec::new(),
            rng: Box::new(StdRandomSource::default()),
        })
    }

    #[must_use]
    pub fn with_random_source(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Register an equation with its predictor; equations are visited in reverse
    /// registration order.
    pub fn add_equation(&mut self, surface: PredictorSurface, equation: Equation) -> EquationId {
        self.surfaces.push(surface);
        self.equations.push(equation);
        EquationId::new(self.equations.len() - 1)
    }

    #[must_use]
    pub const fn config(&self) -> &McmcConfig {
        &self.config
    }

    #[must_use]
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    #[must_use]
    pub fn equation(&self, id: EquationId) -> Option<&Equation> {
        self.equations.get(id.index())
    }

    #[must_use]
    pub fn surfaces(&self) -> &[PredictorSurface] {
        &self.surfaces
    }

    #[must_use]
    pub fn surface(&self, id: EquationId) -> Option<&PredictorSurface> {
        self.surfaces.get(id.index())
    }

    /// Run the configured number of sweeps.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError` if no equation is registered, a block fails
    /// fatally, or the output files cannot be written.
    pub fn simulate(
        &mut self,
        options: &SimulateOptions,
    ) -> Result<SimulationReport, SimulationError> {
        if self.equations.is_empty() {
            return Err(ConfigError::NoEquations.into());
        }
        for equation in self.equations.iter().rev() {
            log::debug!(
                "{} ({}, {} blocks)",
                equation.label(),
                equation.equation_type(),
                equation.len()
            );
            if equation.missing_intercept() {
                log::warn!(
                    "{}: linear effects without intercept column; specify a constant to include one",
                    equation.label()
                );
            }
        }
        if let Some(seed) = self.config.seed {
            self.rng.reseed(seed);
        }

        let mode = if options.compute_mode {
            log::info!("computing starting values");
            Some(self.posterior_mode(options.skip_first)?)
        } else {
            None
        };

        let started = Instant::now();
        let iterations = self.config.iterations;
        let mut estimate_reported = false;
        for iteration in 1..=iterations {
            if !estimate_reported && iterations / iteration == 100 {
                estimate_reported = true;
                let elapsed = started.elapsed().as_secs_f64();
                let remaining =
                    usize_to_f64(iterations - iteration) * elapsed / usize_to_f64(iteration);
                log::info!(
                    "approximate run time: {}",
                    format_duration(remaining.to_u64().unwrap_or(0))
                );
            }
            self.run.iteration = iteration;
            self.sweep()?;
        }
        let run_time = started.elapsed();
        log::info!(
            "simulation run time: {}",
            format_duration(run_time.as_secs())
        );

        let mut report = SimulationReport {
            equations: self
                .equations
                .iter()
                .rev()
                .map(EquationReport::from_equation)
                .collect(),
            iterations,
            retained_draws: self.config.retained_draws(),
            run_time,
            mode,
            files: Vec::new(),
        };
        log::info!("acceptance rates\n{}", render_acceptance_table(&report));

        if let Some(prefix) = &options.output_prefix {
            report.files = self.write_outputs(prefix, &report)?;
        }
        Ok(report)
    }

    /// Iterate posterior-mode steps until a full pass converges or the bound is hit.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError` if a block fails fatally.
    pub fn posterior_mode(&mut self, skip_first: bool) -> Result<ModeReport, SimulationError> {
        if self.equations.is_empty() {
            return Err(ConfigError::NoEquations.into());
        }
        self.run.iteration = 0;
        for surface in &mut self.surfaces {
            surface.posteriormode_end();
        }

        let count = self.equations.len();
        let mut iteration = 1;
        let mut converged = false;
        while !converged && iteration <= self.config.max_mode_iterations {
            let mut all_converged = true;
            for offset in 0..count {
                if offset == 0 && iteration == 1 && skip_first {
                    continue;
                }
                let index = count - 1 - offset;
                if let Some((surface, peers)) = surface_with_peers(&mut self.surfaces, index) {
                    all_converged &= surface.posteriormode(&peers);
                }
                let equation = &mut self.equations[index];
                for block in 0..equation.len() {
                    let mut ctx = BlockContext {
                        run: &self.run,
                        surfaces: &mut self.surfaces,
                        equation: EquationId::new(index),
                        rng: self.rng.as_mut(),
                    };
                    all_converged &= equation.posteriormode_block(block, &mut ctx)?;
                }
                self.surfaces[index].posteriormode_end();
            }
            if all_converged {
                converged = true;
            } else {
                iteration += 1;
            }
        }

        let iterations = iteration.min(self.config.max_mode_iterations);
        if !converged {
            log::warn!("posterior mode did not converge after {iterations} iterations");
        }
        Ok(ModeReport {
            converged,
            iterations,
        })
    }

    /// Restore every surface and block to its post-construction state.
    pub fn reset(&mut self) {
        self.run = RunContext::new(&self.config);
        for surface in &mut self.surfaces {
            surface.reset();
        }
        for equation in &mut self.equations {
            equation.reset();
        }
    }

    /// Replace one design column of a regression block and move its predictors.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a dangling handle, a non-regression block or an
    /// invalid column.
    pub fn change_variable(
        &mut self,
        equation: EquationId,
        block: BlockId,
        column: usize,
        values: &[f64],
    ) -> Result<(), ConfigError> {
        let regression = self
            .equations
            .get_mut(equation.index())
            .ok_or(ConfigError::UnknownEquation(equation.index()))?
            .block_mut(block)
            .and_then(ParameterBlock::as_regression_mut)
            .ok_or(ConfigError::WrongBlockKind {
                index: block.index(),
                expected: "regression",
            })?;
        regression.change_variable(column, values, &mut self.surfaces, equation)
    }

    /// Autocorrelations up to `max_lag` of every stored parameter.
    #[must_use]
    pub fn autocorrelations(&self, max_lag: usize) -> Vec<Autocorrelation> {
        let mut result = Vec::new();
        for equation in &self.equations {
            for block in equation.blocks() {
                let trace = block.trace();
                for (index, name) in trace.names().iter().enumerate() {
                    result.push(Autocorrelation {
                        equation: equation.label().to_owned(),
                        block: block.title().to_owned(),
                        parameter: name.clone(),
                        values: autocorrelation_function(&trace.column(index), max_lag),
                    });
                }
            }
        }
        result
    }

    fn sweep(&mut self) -> Result<(), SimulationError> {
        let count = self.equations.len();
        for offset in 0..count {
            let index = count - 1 - offset;
            if let Some((surface, peers)) = surface_with_peers(&mut self.surfaces, index) {
                surface.update(&peers, self.rng.as_mut());
            }
            let equation = &mut self.equations[index];
            for block in 0..equation.len() {
                let mut ctx = BlockContext {
                    run: &self.run,
                    surfaces: &mut self.surfaces,
                    equation: EquationId::new(index),
                    rng: self.rng.as_mut(),
                };
                equation.update_block(block, &mut ctx)?;
            }
            self.surfaces[index].update_end();
        }
        Ok(())
    }

    fn write_outputs(
        &self,
        prefix: &Path,
        report: &SimulationReport,
    ) -> Result<Vec<PathBuf>, SimulationError> {
        let mut files = Vec::new();
        for (equation, equation_report) in self.equations.iter().rev().zip(&report.equations) {
            for (block, block_report) in equation.blocks().iter().zip(&equation_report.blocks) {
                let samples = output_path(
                    prefix,
                    equation.label(),
                    &block_report.title,
                    "_sample.raw",
                );
                write_samples(&samples, block)?;
                let results = output_path(prefix, equation.label(), &block_report.title, ".res");
                write_results(&results, block_report)?;
                files.push(samples);
                files.push(results);
            }
        }
        Ok(files)
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("config", &self.config)
            .field("run", &self.run)
            .field("equations", &self.equations)
            .finish_non_exhaustive()
    }
}
