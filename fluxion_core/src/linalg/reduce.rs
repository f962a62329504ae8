//! Row reduction of stoichiometric matrices
//!
//! Linearly dependent rows are removed before the constraint systems are
//! assembled. Integer matrices are reduced exactly with a fraction free
//! Gauss-Jordan elimination, float matrices fall back to a column pivoted
//! QR factorization of the transpose which keeps a maximal independent
//! subset of the original rows.

use nalgebra::{DMatrix, DVector, RowDVector};
use num_integer::gcd;
use thiserror::Error;

use crate::configuration::CONFIGURATION;
use crate::linalg::permutation::Permutation;

/// Error raised when the exact integer elimination leaves the value range
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("integer overflow during exact row reduction")]
pub struct IntegerOverflow;

/// First nonzero entry of the lower right block, scanned column by column
fn first_nonzero(m: &DMatrix<i64>, k: usize) -> Option<(usize, usize)> {
    for j in k..m.ncols() {
        for i in k..m.nrows() {
            if m[(i, j)] != 0 {
                return Some((i, j));
            }
        }
    }
    None
}

/// Remove linearly dependent rows from an integer matrix, exactly
///
/// # Parameters
/// - `a`: matrix with at most as many rows as columns
///
/// # Returns
/// - `Ok`: the input matrix itself when it has full row rank, otherwise a
///   matrix holding the first `rank` eliminated rows with the columns moved
///   back into their original order
/// - `Err`: an [`IntegerOverflow`] when a cross multiplication leaves i64
///
/// # Notes:
/// The elimination keeps entries small by dividing every remaining row by
/// its greatest common divisor before each step, and divides the multipliers
/// by their gcd as well. The kept rows are fully reduced, with no negative
/// values on the diagonal of the pivoted column order.
pub fn row_reduce_exact(a: &DMatrix<i64>) -> Result<DMatrix<i64>, IntegerOverflow> {
    debug_assert!(a.nrows() <= a.ncols());
    let rows = a.nrows();
    let cols = a.ncols();
    let mut m = a.clone();
    let mut perm = Permutation::identity(cols);

    let mut rank = rows;
    for k in 0..rows {
        let (pivot_row, pivot_col) = match first_nonzero(&m, k) {
            Some(position) => position,
            None => {
                rank = k;
                break;
            }
        };
        if pivot_row != k {
            m.swap_rows(k, pivot_row);
        }
        if pivot_col != k {
            m.swap_columns(k, pivot_col);
            perm.swap(k, pivot_col);
        }

        // divide each remaining row by its gcd, stopping at the first row
        // that is zero from column k on
        for i in k..rows {
            let mut g = 0i64;
            for j in k..cols {
                g = gcd(g, m[(i, j)]);
            }
            if g == 0 {
                break;
            }
            if g != 1 {
                for j in k..cols {
                    m[(i, j)] /= g;
                }
            }
        }

        for i in k + 1..rows {
            let g = gcd(m[(k, k)], m[(i, k)]);
            let a_kk = m[(k, k)] / g;
            let a_ik = m[(i, k)] / g;
            m[(i, k)] = 0;
            for j in k + 1..cols {
                let scaled = m[(i, j)].checked_mul(a_kk).ok_or(IntegerOverflow)?;
                let shifted = m[(k, j)].checked_mul(a_ik).ok_or(IntegerOverflow)?;
                m[(i, j)] = scaled.checked_sub(shifted).ok_or(IntegerOverflow)?;
            }
        }
    }

    if rank == rows {
        // full row rank, nothing to remove
        return Ok(a.clone());
    }

    // backward elimination so the kept rows are fully reduced
    for k in (0..rank).rev() {
        for i in (0..k).rev() {
            let g = gcd(m[(k, k)], m[(i, k)]);
            let a_kk = m[(k, k)] / g;
            let a_ik = m[(i, k)] / g;
            for j in i..cols {
                let scaled = m[(i, j)].checked_mul(a_kk).ok_or(IntegerOverflow)?;
                let shifted = m[(k, j)].checked_mul(a_ik).ok_or(IntegerOverflow)?;
                m[(i, j)] = scaled.checked_sub(shifted).ok_or(IntegerOverflow)?;
            }
        }
        let mut g = m[(k, k)];
        for j in rank..cols {
            g = gcd(g, m[(k, j)]);
        }
        // no negative values on the diagonal
        if m[(k, k)] < 0 {
            g = -g;
        }
        if g != 1 {
            m[(k, k)] /= g;
            for j in rank..cols {
                m[(k, j)] /= g;
            }
        }
    }

    // move the columns back into the original variable order before slicing
    let mut reduced = DMatrix::zeros(rank, cols);
    for j in 0..cols {
        let original = perm.slot(j);
        for i in 0..rank {
            reduced[(i, original)] = m[(i, j)];
        }
    }
    Ok(reduced)
}

/// Remove linearly dependent rows from a float matrix
///
/// The transpose is factored with column pivoted QR. The numerical rank is
/// the number of leading diagonal entries of R above `qr_rank_tolerance`
/// times the magnitude of the largest diagonal entry, and the result keeps
/// the `rank` pivoted original rows in ascending order.
pub fn row_reduce_qr(a: &DMatrix<f64>) -> DMatrix<f64> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return DMatrix::zeros(0, a.ncols());
    }
    let tolerance = CONFIGURATION.read().unwrap().qr_rank_tolerance;

    let transposed = a.transpose();
    let n = transposed.ncols();
    let min_dim = transposed.nrows().min(n);
    let qr = transposed.col_piv_qr();
    let r = qr.r();

    // column pivoting sorts the diagonal by decreasing magnitude
    let r_tolerance = tolerance * r[(0, 0)].abs();
    let mut rank = 0;
    while rank < min_dim && r[(rank, rank)].abs() > r_tolerance {
        rank += 1;
    }

    // recover the pivot order by permuting an index vector the same way the
    // factorization permuted the columns of the transpose
    let mut indices = RowDVector::from_fn(n, |_, j| j as f64);
    qr.p().permute_columns(&mut indices);
    let mut picked: Vec<usize> = indices.iter().take(rank).map(|&v| v as usize).collect();
    picked.sort_unstable();

    a.select_rows(picked.iter())
}

/// Variant of [`row_reduce_qr`] that reduces the system `[A | b]`, keeping
/// matrix rows and right hand side entries together
pub fn row_reduce_qr_augmented(a: &DMatrix<f64>, b: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
    debug_assert_eq!(a.nrows(), b.nrows());
    let n = a.ncols();
    let mut augmented = DMatrix::zeros(a.nrows(), n + 1);
    augmented.view_mut((0, 0), (a.nrows(), n)).copy_from(a);
    augmented.set_column(n, b);

    let reduced = row_reduce_qr(&augmented);
    let rows = reduced.nrows();
    let matrix = reduced.view((0, 0), (rows, n)).into_owned();
    let rhs: DVector<f64> = reduced.column(n).into_owned();
    (matrix, rhs)
}

/// Numerical rank by singular value decomposition. The rank is the number of
/// singular values above `max(rows, cols) * s_max * machine epsilon`.
pub fn svd_rank(a: &DMatrix<f64>) -> usize {
    if a.nrows() == 0 || a.ncols() == 0 {
        return 0;
    }
    let singular_values = a.clone().svd(false, false).singular_values;
    let s_max = singular_values.iter().fold(0.0f64, |acc, &s| acc.max(s));
    let tolerance = a.nrows().max(a.ncols()) as f64 * s_max * f64::EPSILON;
    singular_values.iter().filter(|&&s| s > tolerance).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    #[test]
    fn test_dependent_integer_rows_are_removed() {
        let a = dmatrix![1i64, 1;
                         2, 2];
        let reduced = row_reduce_exact(&a).unwrap();
        assert_eq!(reduced, dmatrix![1i64, 1]);
    }

    #[test]
    fn test_full_rank_matrix_is_returned_unchanged() {
        let a = dmatrix![2i64, 0;
                         0, 3];
        let reduced = row_reduce_exact(&a).unwrap();
        assert_eq!(reduced, a);
    }

    #[test]
    fn test_reduced_rows_are_fully_eliminated() {
        // third row is the sum of the first two
        let a = dmatrix![1i64, 1, 0;
                         0, 1, 1;
                         1, 2, 1];
        let reduced = row_reduce_exact(&a).unwrap();
        assert_eq!(
            reduced,
            dmatrix![1i64, 0, -1;
                     0, 1, 1]
        );
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let a = dmatrix![i64::MAX, 1, 0;
                         1, i64::MAX, 0];
        match row_reduce_exact(&a) {
            Err(IntegerOverflow) => {}
            Ok(_) => panic!("cross multiplication of i64::MAX should overflow"),
        }
    }

    #[test]
    fn test_qr_keeps_original_rows() {
        // rank two, third row is the sum of the first two
        let a = dmatrix![1.0, 0.0, 0.0, 1.0;
                         0.0, 1.0, 0.0, 1.0;
                         1.0, 1.0, 0.0, 2.0];
        let reduced = row_reduce_qr(&a);
        assert_eq!(reduced.nrows(), 2);
        for i in 0..reduced.nrows() {
            let row = reduced.row(i);
            let is_original = (0..a.nrows()).any(|k| a.row(k) == row);
            assert!(is_original, "row {} is not a row of the input", i);
        }
    }

    #[test]
    fn test_qr_full_rank_keeps_all_rows() {
        let a = dmatrix![1.0, 0.0;
                         0.0, 1.0];
        let reduced = row_reduce_qr(&a);
        assert_eq!(reduced, a);
    }

    #[test]
    fn test_qr_drops_duplicate_rows() {
        let a = dmatrix![1.0, -1.0, 0.0;
                         1.0, -1.0, 0.0];
        let reduced = row_reduce_qr(&a);
        assert_eq!(reduced, dmatrix![1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_qr_zero_matrix_has_rank_zero() {
        let a = DMatrix::<f64>::zeros(2, 3);
        let reduced = row_reduce_qr(&a);
        assert_eq!(reduced.nrows(), 0);
        assert_eq!(reduced.ncols(), 3);
    }

    #[test]
    fn test_qr_augmented_keeps_rhs_aligned() {
        let a = dmatrix![1.0, 0.0;
                         0.0, 1.0;
                         1.0, 1.0];
        let b = nalgebra::dvector![1.0, 2.0, 3.0];
        let (matrix, rhs) = row_reduce_qr_augmented(&a, &b);
        assert_eq!(matrix.nrows(), 2);
        assert_eq!(rhs.nrows(), 2);
        for i in 0..matrix.nrows() {
            let k = (0..a.nrows())
                .find(|&k| a.row(k) == matrix.row(i))
                .expect("reduced row must be an original row");
            assert_eq!(rhs[i], b[k]);
        }
    }

    #[test]
    fn test_svd_rank() {
        let dependent = dmatrix![1.0, 2.0;
                                 2.0, 4.0];
        assert_eq!(svd_rank(&dependent), 1);
        let identity = DMatrix::<f64>::identity(3, 3);
        assert_eq!(svd_rank(&identity), 3);
        let zero = DMatrix::<f64>::zeros(2, 3);
        assert_eq!(svd_rank(&zero), 0);
    }
}
