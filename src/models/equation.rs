//! Equations: an ordered arena of parameter blocks bound to one predictor.

use super::blocks::{BlockContext, BlockId, BlockPeers, FullConditional, ParameterBlock};
use super::types::SimulationError;

/// Handle of an equation registered with the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EquationId(usize);

impl EquationId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Blocks sharing one linear predictor, visited in registration order.
#[derive(Debug)]
pub struct Equation {
    label: String,
    equation_type: String,
    hierarchy_level: usize,
    blocks: Vec<ParameterBlock>,
}

impl Equation {
    #[must_use]
    pub fn new(label: impl Into<String>, equation_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            equation_type: equation_type.into(),
            hierarchy_level: 0,
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_hierarchy_level(mut self, level: usize) -> Self {
        self.hierarchy_level = level;
        self
    }

    /// Append a block; the returned handle is valid for the lifetime of the equation.
    pub fn add_block(&mut self, block: impl Into<ParameterBlock>) -> BlockId {
        self.blocks.push(block.into());
        BlockId::new(self.blocks.len() - 1)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn equation_type(&self) -> &str {
        &self.equation_type
    }

    #[must_use]
    pub const fn hierarchy_level(&self) -> usize {
        self.hierarchy_level
    }

    #[must_use]
    pub fn blocks(&self) -> &[ParameterBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&ParameterBlock> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut ParameterBlock> {
        self.blocks.get_mut(id.index())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True when the equation has unpenalized regression blocks but none of
    /// them carries an all-ones column.
    #[must_use]
    pub fn missing_intercept(&self) -> bool {
        let mut linear = self
            .blocks
            .iter()
            .filter_map(ParameterBlock::as_regression)
            .filter(|block| block.penalty().is_none())
            .peekable();
        linear.peek().is_some() && linear.all(|block| block.design().constant_column().is_none())
    }

    /// Run one sampling step of the block at `index`.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::MissingBlock` for an out-of-range index and
    /// propagates the block's own failures.
    pub fn update_block(
        &mut self,
        index: usize,
        ctx: &mut BlockContext<'_>,
    ) -> Result<(), SimulationError> {
        let (block, mut peers) = BlockPeers::split(&mut self.blocks, index).ok_or_else(|| {
            SimulationError::MissingBlock {
                equation: self.label.clone(),
                index,
            }
        })?;
        block.update(ctx, &mut peers)
    }

    /// Run one posterior-mode step of the block at `index`.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::MissingBlock` for an out-of-range index and
    /// propagates the block's own failures.
    pub fn posteriormode_block(
        &mut self,
        index: usize,
        ctx: &mut BlockContext<'_>,
    ) -> Result<bool, SimulationError> {
        let (block, mut peers) = BlockPeers::split(&mut self.blocks, index).ok_or_else(|| {
            SimulationError::MissingBlock {
                equation: self.label.clone(),
                index,
            }
        })?;
        block.posteriormode(ctx, &mut peers)
    }

    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::blocks::RegressionBlock;
    use crate::models::design::DesignMatrix;
    use crate::models::penalty::PenaltyStructure;
    use crate::models::types::RegressionOptions;

    fn term(title: &str, with_constant: bool) -> RegressionBlock {
        let mut columns = vec![(format!("{title}_x"), vec![0.5, 1.5, 2.5])];
        if with_constant {
            columns.insert(0, ("const".to_owned(), vec![1.0; 3]));
        }
        let design = DesignMatrix::from_columns(columns, false).expect("design");
        RegressionBlock::new(title, design, RegressionOptions::default()).expect("block")
    }

    #[test]
    fn intercept_is_required_from_linear_terms_only() {
        let mut smooth_only = Equation::new("y", "mean");
        smooth_only.add_block(
            term("f", false)
                .with_penalty(PenaltyStructure::identity(1), 1.0)
                .expect("penalty"),
        );
        assert!(!smooth_only.missing_intercept());

        let mut without = Equation::new("y", "mean");
        without.add_block(term("linear", false));
        assert!(without.missing_intercept());

        without.add_block(term("fixed", true));
        assert!(!without.missing_intercept());
    }
}
