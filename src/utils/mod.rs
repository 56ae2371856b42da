/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Dense linear algebra helpers shared by the regression and variance blocks.
//
// Created on: 24 Jan 2026
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Helpers for weighted cross products, Cholesky roots, triangular solves and
//! quadratic forms on faer matrices.
//!
//! Cholesky roots are stored as the lower factor `L` with `L L' = A`, so the
//! upper root `R` used in the IWLS algebra is `L'` and `R'R = A`.

use faer::Mat;

/// Relative pivot size below which a cross-product matrix is treated as rank deficient.
pub const RANK_TOLERANCE: f64 = 1.0e-10;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(left, right)| (left - right).abs())
        .fold(0.0, f64::max)
}

/// `X' diag(w) X` for an `n x p` design.
#[must_use]
pub fn weighted_cross_product(design: &Mat<f64>, weights: &[f64]) -> Mat<f64> {
    let p = design.ncols();
    let mut xwx = Mat::<f64>::zeros(p, p);
    for obs in 0..design.nrows() {
        let weight = weights[obs];
        if weight == 0.0 {
            continue;
        }
        for row in 0..p {
            let scaled = weight * design[(obs, row)];
            if scaled == 0.0 {
                continue;
            }
            for col in 0..=row {
                xwx[(row, col)] += scaled * design[(obs, col)];
            }
        }
    }
    for row in 0..p {
        for col in 0..row {
            xwx[(col, row)] = xwx[(row, col)];
        }
    }
    xwx
}

fn to_column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |row, _| values[row])
}

fn column_values(column: &Mat<f64>) -> Vec<f64> {
    (0..column.nrows()).map(|row| column[(row, 0)]).collect()
}

/// `X' v` for an `n x p` design.
#[must_use]
pub fn transpose_times(design: &Mat<f64>, values: &[f64]) -> Vec<f64> {
    let product = design.transpose() * &to_column(values);
    column_values(&product)
}

/// `X b` for an `n x p` design.
#[must_use]
pub fn design_times(design: &Mat<f64>, coefficients: &[f64]) -> Vec<f64> {
    let product = design * &to_column(coefficients);
    column_values(&product)
}

/// `v' A v` for a square matrix.
#[must_use]
pub fn quadratic_form(matrix: &Mat<f64>, values: &[f64]) -> f64 {
    let mut total = 0.0;
    for row in 0..values.len() {
        let mut inner = 0.0;
        for col in 0..values.len() {
            inner += matrix[(row, col)] * values[col];
        }
        total += values[row] * inner;
    }
    total
}

/// Lower Cholesky factor `L` with `L L' = matrix`.
///
/// Returns `None` when a pivot falls below `tolerance` relative to the
/// corresponding diagonal entry, which is how rank deficiency surfaces.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>, tolerance: f64) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                let floor = tolerance * matrix[(row, row)].abs().max(f64::MIN_POSITIVE);
                if !sum.is_finite() || sum <= floor {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                lower[(row, col)] = sum / lower[(col, col)];
            }
        }
    }
    Some(lower)
}

/// Solve `L y = b` by forward substitution.
#[must_use]
pub fn forward_substitution(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dim = rhs.len();
    let mut solution = vec![0.0; dim];
    for row in 0..dim {
        let mut sum = rhs[row];
        for col in 0..row {
            sum -= lower[(row, col)] * solution[col];
        }
        solution[row] = sum / lower[(row, row)];
    }
    solution
}

/// Solve `L' x = y` by backward substitution, i.e. `R x = y` for the upper root.
#[must_use]
pub fn backward_substitution_transposed(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dim = rhs.len();
    let mut solution = vec![0.0; dim];
    for row in (0..dim).rev() {
        let mut sum = rhs[row];
        for col in (row + 1)..dim {
            sum -= lower[(col, row)] * solution[col];
        }
        solution[row] = sum / lower[(row, row)];
    }
    solution
}

/// Solve `(L L') x = b` using the stored root.
#[must_use]
pub fn solve_with_root(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let intermediate = forward_substitution(lower, rhs);
    backward_substitution_transposed(lower, &intermediate)
}

/// `0.5 * log det(L L')`.
#[must_use]
pub fn log_det_half(lower: &Mat<f64>) -> f64 {
    (0..lower.nrows()).map(|idx| lower[(idx, idx)].ln()).sum()
}
