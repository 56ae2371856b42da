/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Run reports: per-block acceptance diagnostics, posterior summaries and trace files.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Reports
//!
//! Summaries built from block traces after a run, the acceptance table logged
//! at the end of sampling, and the plain-text sample and result files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use super::blocks::{FullConditional, ParameterBlock};
use super::equation::Equation;
use super::posterior::{ParameterSummary, summarize_scalar};
use crate::inference::diagnostics::effective_sample_size;

/// Outcome of the posterior-mode loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeReport {
    pub converged: bool,
    /// Passes over all equations, including the converged one.
    pub iterations: usize,
}

/// Effect of a regression term at the covariate means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanEffectReport {
    pub summary: ParameterSummary,
    pub effective_sample_size: f64,
    pub current: f64,
}

/// Diagnostics and summaries of one block.
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub title: String,
    pub proposed: usize,
    pub accepted: usize,
    pub acceptance_rate: f64,
    pub outside_limits: usize,
    pub disabled: bool,
    pub names: Vec<String>,
    pub summaries: Vec<ParameterSummary>,
    pub effective_sample_sizes: Vec<f64>,
    /// Posterior-mode or last value of every parameter.
    pub current: Vec<f64>,
    /// Present for regression blocks only.
    pub mean_effect: Option<MeanEffectReport>,
}

impl BlockReport {
    #[must_use]
    pub fn from_block(block: &ParameterBlock) -> Self {
        let acceptance = block.acceptance();
        let trace = block.trace();
        let effective_sample_sizes = (0..trace.names().len())
            .map(|index| effective_sample_size(&trace.column(index)))
            .collect();
        Self {
            title: block.title().to_owned(),
            proposed: acceptance.proposed,
            accepted: acceptance.accepted,
            acceptance_rate: acceptance.acceptance_rate(),
            outside_limits: acceptance.outside_limits,
            disabled: block.is_disabled(),
            names: trace.names().to_vec(),
            summaries: trace.summaries(),
            effective_sample_sizes,
            current: trace.current().to_vec(),
            mean_effect: block.as_regression().map(|regression| {
                let draws = regression.mean_effect_draws();
                MeanEffectReport {
                    summary: summarize_scalar(&draws),
                    effective_sample_size: effective_sample_size(&draws),
                    current: regression.mean_effect(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EquationReport {
    pub label: String,
    pub equation_type: String,
    pub blocks: Vec<BlockReport>,
}

impl EquationReport {
    #[must_use]
    pub fn from_equation(equation: &Equation) -> Self {
        Self {
            label: equation.label().to_owned(),
            equation_type: equation.equation_type().to_owned(),
            blocks: equation.blocks().iter().map(BlockReport::from_block).collect(),
        }
    }
}

/// Result of [`Sampler::simulate`](super::scheduler::Sampler::simulate).
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Equations in visiting order, last registered first.
    pub equations: Vec<EquationReport>,
    pub iterations: usize,
    pub retained_draws: usize,
    pub run_time: Duration,
    pub mode: Option<ModeReport>,
    /// Files written when an output prefix was given.
    pub files: Vec<PathBuf>,
}

impl SimulationReport {
    /// Find a block report by equation label and block title.
    #[must_use]
    pub fn block(&self, equation: &str, title: &str) -> Option<&BlockReport> {
        self.equations
            .iter()
            .find(|report| report.label == equation)?
            .blocks
            .iter()
            .find(|block| block.title == title)
    }
}

/// Acceptance diagnostics of every block as a formatted table.
#[must_use]
pub fn render_acceptance_table(report: &SimulationReport) -> String {
    let mut table = make_table(&[
        "equation",
        "block",
        "proposed",
        "acceptance",
        "outside limits",
        "status",
    ]);
    for equation in &report.equations {
        for block in &equation.blocks {
            let status = if block.disabled { "disabled" } else { "ok" };
            table.add_row(vec![
                Cell::new(&equation.label),
                Cell::new(&block.title),
                Cell::new(block.proposed),
                Cell::new(format!("{:.2}%", 100.0 * block.acceptance_rate)),
                Cell::new(block.outside_limits),
                Cell::new(status),
            ]);
        }
    }
    table.to_string()
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn file_stem(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// `<prefix>_<equation>_<block><suffix>`, with labels reduced to file-safe characters.
#[must_use]
pub fn output_path(prefix: &Path, equation: &str, block: &str, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("_{}_{}{suffix}", file_stem(equation), file_stem(block)));
    PathBuf::from(name)
}

/// Write one row per retained sweep, headed by `intnr` and the parameter names.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_samples(path: &Path, block: &ParameterBlock) -> std::io::Result<()> {
    let trace = block.trace();
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "intnr\t{}", trace.names().join("\t"))?;
    for (index, row) in trace.samples().iter().enumerate() {
        write!(out, "{}", index + 1)?;
        for value in row {
            write!(out, "\t{value}")?;
        }
        writeln!(out)?;
    }
    out.flush()
}

/// Write the posterior summary of one block, one row per parameter plus the
/// mean-effect row of regression blocks.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_results(path: &Path, report: &BlockReport) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "intnr\tparamname\tpmean\tpstd\tpqu2p5\tpqu10\tpmed\tpqu90\tpqu97p5\tess"
    )?;
    for (index, (name, summary)) in report.names.iter().zip(&report.summaries).enumerate() {
        writeln!(
            out,
            "{}\t{name}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            index + 1,
            summary.mean,
            summary.std_dev,
            summary.q025,
            summary.q10,
            summary.q50,
            summary.q90,
            summary.q975,
            report.effective_sample_sizes.get(index).copied().unwrap_or(0.0),
        )?;
    }
    if let Some(effect) = &report.mean_effect {
        let summary = &effect.summary;
        writeln!(
            out,
            "{}\tmean_effect\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            report.names.len() + 1,
            summary.mean,
            summary.std_dev,
            summary.q025,
            summary.q10,
            summary.q50,
            summary.q90,
            summary.q975,
            effect.effective_sample_size,
        )?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_replace_unsafe_characters() {
        let path = output_path(Path::new("/tmp/run"), "y", "f(x) spline", "_sample.raw");
        assert_eq!(path, PathBuf::from("/tmp/run_y_f_x__spline_sample.raw"));
    }

    #[test]
    fn acceptance_table_lists_every_block() {
        let block = BlockReport {
            title: "const".to_owned(),
            proposed: 10,
            accepted: 5,
            acceptance_rate: 0.5,
            outside_limits: 1,
            disabled: false,
            names: vec!["b".to_owned()],
            summaries: vec![ParameterSummary::default()],
            effective_sample_sizes: vec![1.0],
            current: vec![0.0],
            mean_effect: None,
        };
        let report = SimulationReport {
            equations: vec![EquationReport {
                label: "y".to_owned(),
                equation_type: "mean".to_owned(),
                blocks: vec![block],
            }],
            iterations: 10,
            retained_draws: 1,
            run_time: Duration::ZERO,
            mode: None,
            files: Vec::new(),
        };
        let table = render_acceptance_table(&report);
        assert!(table.contains("const"));
        assert!(table.contains("50.00%"));
        assert!(report.block("y", "const").is_some());
        assert!(report.block("y", "missing").is_none());
    }
}
