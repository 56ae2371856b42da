//! Quadratic penalties for smooth and random terms.

use faer::Mat;

use crate::utils::{quadratic_form, usize_to_f64};

/// Penalty matrix `K` with its rank, so that `Q(beta) = beta' K beta`.
#[derive(Debug, Clone)]
pub struct PenaltyStructure {
    matrix: Mat<f64>,
    rank: usize,
}

impl PenaltyStructure {
    /// Ridge penalty for i.i.d. coefficients.
    #[must_use]
    pub fn identity(dim: usize) -> Self {
        Self {
            matrix: Mat::from_fn(dim, dim, |row, col| if row == col { 1.0 } else { 0.0 }),
            rank: dim,
        }
    }

    /// Random-walk penalty `D'D` built from first or second order differences.
    #[must_use]
    pub fn difference(dim: usize, order: usize) -> Self {
        let order = order.clamp(1, 2);
        let rows = dim.saturating_sub(order);
        let mut differences = Mat::<f64>::zeros(rows, dim);
        for row in 0..rows {
            if order == 1 {
                differences[(row, row)] = -1.0;
                differences[(row, row + 1)] = 1.0;
            } else {
                differences[(row, row)] = 1.0;
                differences[(row, row + 1)] = -2.0;
                differences[(row, row + 2)] = 1.0;
            }
        }
        Self {
            matrix: differences.transpose() * &differences,
            rank: rows,
        }
    }

    /// Arbitrary symmetric penalty with a known rank.
    #[must_use]
    pub const fn from_matrix(matrix: Mat<f64>, rank: usize) -> Self {
        Self { matrix, rank }
    }

    #[must_use]
    pub const fn matrix(&self) -> &Mat<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn rank_f64(&self) -> f64 {
        usize_to_f64(self.rank)
    }

    #[must_use]
    pub fn quadratic_form(&self, beta: &[f64]) -> f64 {
        quadratic_form(&self.matrix, beta)
    }
}
