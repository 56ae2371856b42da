//! Dense design matrices for regression blocks.

use faer::Mat;

use super::types::ConfigError;
use crate::utils::usize_to_f64;

/// Covariate columns of one regression term.
///
/// Non-constant columns may be mean-centered at construction; the all-ones
/// column, if present, is left alone. Structure is fixed afterwards except for
/// [`DesignMatrix::change_variable`].
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    names: Vec<String>,
    matrix: Mat<f64>,
    constant_column: Option<usize>,
    column_means: Vec<f64>,
    mean_effect_row: Vec<f64>,
}

impl DesignMatrix {
    /// # Errors
    ///
    /// Returns `ConfigError::ObservationLengthMismatch` if columns differ in length.
    pub fn from_columns(
        columns: Vec<(String, Vec<f64>)>,
        center: bool,
    ) -> Result<Self, ConfigError> {
        let nrows = columns.first().map_or(0, |(_, values)| values.len());
        if columns.iter().any(|(_, values)| values.len() != nrows) {
            return Err(ConfigError::ObservationLengthMismatch);
        }
        let matrix = Mat::from_fn(nrows, columns.len(), |row, col| columns[col].1[row]);
        let names = columns.into_iter().map(|(name, _)| name).collect();
        Ok(Self::from_matrix(names, matrix, center))
    }

    #[must_use]
    pub fn from_matrix(names: Vec<String>, mut matrix: Mat<f64>, center: bool) -> Self {
        let constant_column = find_constant(&matrix);
        let mut column_means = vec![0.0; matrix.ncols()];
        if center {
            for col in (0..matrix.ncols()).filter(|&col| Some(col) != constant_column) {
                let mean = column_mean(&matrix, col);
                for row in 0..matrix.nrows() {
                    matrix[(row, col)] -= mean;
                }
                column_means[col] = mean;
            }
        }
        let mean_effect_row = (0..matrix.ncols())
            .map(|col| value_closest_to_mean(&matrix, col))
            .collect();
        Self {
            names,
            matrix,
            constant_column,
            column_means,
            mean_effect_row,
        }
    }

    #[must_use]
    pub const fn matrix(&self) -> &Mat<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Index of the all-ones column.
    #[must_use]
    pub const fn constant_column(&self) -> Option<usize> {
        self.constant_column
    }

    /// Means subtracted at construction (zero for uncentered columns).
    #[must_use]
    pub fn column_means(&self) -> &[f64] {
        &self.column_means
    }

    /// Per column, the observed value closest to the column mean.
    #[must_use]
    pub fn mean_effect_row(&self) -> &[f64] {
        &self.mean_effect_row
    }

    /// Replace one column; values are taken as given, without centering.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the column index or value length is invalid.
    pub fn change_variable(&mut self, column: usize, values: &[f64]) -> Result<(), ConfigError> {
        if column >= self.matrix.ncols() {
            return Err(ConfigError::DesignCoefficientMismatch {
                design_cols: self.matrix.ncols(),
                coef_len: column + 1,
            });
        }
        if values.len() != self.matrix.nrows() {
            return Err(ConfigError::DesignRowMismatch {
                design_rows: values.len(),
                observations: self.matrix.nrows(),
            });
        }
        for (row, value) in values.iter().enumerate() {
            self.matrix[(row, column)] = *value;
        }
        Ok(())
    }
}

fn find_constant(matrix: &Mat<f64>) -> Option<usize> {
    (0..matrix.ncols()).find(|&col| {
        matrix.nrows() > 0 && (0..matrix.nrows()).all(|row| matrix[(row, col)] == 1.0)
    })
}

fn column_mean(matrix: &Mat<f64>, col: usize) -> f64 {
    let sum: f64 = (0..matrix.nrows()).map(|row| matrix[(row, col)]).sum();
    sum / usize_to_f64(matrix.nrows()).max(1.0)
}

fn value_closest_to_mean(matrix: &Mat<f64>, col: usize) -> f64 {
    let mean = column_mean(matrix, col);
    (0..matrix.nrows())
        .map(|row| matrix[(row, col)])
        .min_by(|a, b| (a - mean).abs().total_cmp(&(b - mean).abs()))
        .unwrap_or(0.0)
}
