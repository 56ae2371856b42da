//! Full-conditional parameter blocks.
//!
//! Blocks live in an arena owned by their [`Equation`](super::equation::Equation)
//! and refer to each other through [`BlockId`] handles. A block being updated
//! sees the rest of the arena through [`BlockPeers`] and every equation's
//! predictor through [`BlockContext`].

mod regression;
mod trace;
mod variance;
mod varselection;

pub use regression::RegressionBlock;
pub use trace::{BlockTrace, MODE_TOLERANCE};
pub use variance::{Tau2Draw, VarianceBlock};
pub use varselection::{InclusionProbabilityBlock, VarSelectionBlock};

use super::equation::EquationId;
use super::predictor::PredictorSurface;
use super::types::{ConfigError, SimulationError};
use crate::inference::{AcceptanceCounter, RandomSource, RunContext};

/// Handle of a block inside its equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Everything a block may touch besides its peers during one call.
pub struct BlockContext<'a> {
    pub run: &'a RunContext,
    pub surfaces: &'a mut [PredictorSurface],
    pub equation: EquationId,
    pub rng: &'a mut dyn RandomSource,
}

impl BlockContext<'_> {
    #[must_use]
    pub fn surface(&self) -> &PredictorSurface {
        &self.surfaces[self.equation.index()]
    }

    pub fn surface_mut(&mut self) -> &mut PredictorSurface {
        &mut self.surfaces[self.equation.index()]
    }
}

/// The other blocks of the equation, split around the block being updated.
pub struct BlockPeers<'a> {
    before: &'a mut [ParameterBlock],
    after: &'a mut [ParameterBlock],
}

impl<'a> BlockPeers<'a> {
    /// Split `blocks` into the block at `index` and its peers.
    pub fn split(
        blocks: &'a mut [ParameterBlock],
        index: usize,
    ) -> Option<(&'a mut ParameterBlock, Self)> {
        let (before, rest) = blocks.split_at_mut(index);
        let (current, after) = rest.split_first_mut()?;
        Some((current, Self { before, after }))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            before: &mut [],
            after: &mut [],
        }
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut ParameterBlock> {
        let index = id.index();
        if index < self.before.len() {
            return self.before.get_mut(index);
        }
        let offset = index.checked_sub(self.before.len() + 1)?;
        self.after.get_mut(offset)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::WrongBlockKind` if `id` is not a regression block.
    pub fn regression_mut(&mut self, id: BlockId) -> Result<&mut RegressionBlock, ConfigError> {
        match self.get_mut(id) {
            Some(ParameterBlock::Regression(block)) => Ok(block),
            _ => Err(ConfigError::WrongBlockKind {
                index: id.index(),
                expected: "regression",
            }),
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::WrongBlockKind` if `id` is not a spike-and-slab block.
    pub fn var_selection_mut(
        &mut self,
        id: BlockId,
    ) -> Result<&mut VarSelectionBlock, ConfigError> {
        match self.get_mut(id) {
            Some(ParameterBlock::VarSelection(block)) => Ok(block),
            _ => Err(ConfigError::WrongBlockKind {
                index: id.index(),
                expected: "spike-and-slab",
            }),
        }
    }
}

/// Capability interface shared by every block.
pub trait FullConditional {
    fn title(&self) -> &str;

    /// One stochastic step; leaves the predictor consistent with the block state.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError` on fatal numerical failure or a dangling handle.
    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError>;

    /// One posterior-mode step; returns whether it converged.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError` on fatal numerical failure or a dangling handle.
    fn posteriormode(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError>;

    /// Restore the post-construction state.
    fn reset(&mut self);

    fn trace(&self) -> &BlockTrace;

    fn acceptance(&self) -> AcceptanceCounter;

    fn is_disabled(&self) -> bool {
        false
    }
}

/// Closed set of block kinds.
#[derive(Debug)]
pub enum ParameterBlock {
    Regression(RegressionBlock),
    Variance(VarianceBlock),
    VarSelection(VarSelectionBlock),
    InclusionProbability(InclusionProbabilityBlock),
}

impl ParameterBlock {
    fn inner(&self) -> &dyn FullConditional {
        match self {
            Self::Regression(block) => block,
            Self::Variance(block) => block,
            Self::VarSelection(block) => block,
            Self::InclusionProbability(block) => block,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FullConditional {
        match self {
            Self::Regression(block) => block,
            Self::Variance(block) => block,
            Self::VarSelection(block) => block,
            Self::InclusionProbability(block) => block,
        }
    }

    #[must_use]
    pub const fn as_regression(&self) -> Option<&RegressionBlock> {
        match self {
            Self::Regression(block) => Some(block),
            _ => None,
        }
    }

    pub const fn as_regression_mut(&mut self) -> Option<&mut RegressionBlock> {
        match self {
            Self::Regression(block) => Some(block),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_variance(&self) -> Option<&VarianceBlock> {
        match self {
            Self::Variance(block) => Some(block),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_var_selection(&self) -> Option<&VarSelectionBlock> {
        match self {
            Self::VarSelection(block) => Some(block),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_inclusion_probability(&self) -> Option<&InclusionProbabilityBlock> {
        match self {
            Self::InclusionProbability(block) => Some(block),
            _ => None,
        }
    }
}

impl FullConditional for ParameterBlock {
    fn title(&self) -> &str {
        self.inner().title()
    }

    fn update(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<(), SimulationError> {
        self.inner_mut().update(ctx, peers)
    }

    fn posteriormode(
        &mut self,
        ctx: &mut BlockContext<'_>,
        peers: &mut BlockPeers<'_>,
    ) -> Result<bool, SimulationError> {
        self.inner_mut().posteriormode(ctx, peers)
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn trace(&self) -> &BlockTrace {
        self.inner().trace()
    }

    fn acceptance(&self) -> AcceptanceCounter {
        self.inner().acceptance()
    }

    fn is_disabled(&self) -> bool {
        self.inner().is_disabled()
    }
}

impl From<RegressionBlock> for ParameterBlock {
    fn from(block: RegressionBlock) -> Self {
        Self::Regression(block)
    }
}

impl From<VarianceBlock> for ParameterBlock {
    fn from(block: VarianceBlock) -> Self {
        Self::Variance(block)
    }
}

impl From<VarSelectionBlock> for ParameterBlock {
    fn from(block: VarSelectionBlock) -> Self {
        Self::VarSelection(block)
    }
}

impl From<InclusionProbabilityBlock> for ParameterBlock {
    fn from(block: InclusionProbabilityBlock) -> Self {
        Self::InclusionProbability(block)
    }
}
