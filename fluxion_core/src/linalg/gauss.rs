//! Exact rational Gauss-Jordan elimination
//!
//! The constraint systems are solved in exact arithmetic so that the
//! free/dependent partition does not depend on rounding. Columns declared
//! free by the caller are moved to the right of the matrix and excluded
//! from pivoting, the remaining columns are eliminated to reduced echelon
//! form, and the solution is returned as a kernel matrix mapping free
//! variable values to the full variable vector.

use nalgebra::{DMatrix, DVector};
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::linalg::permutation::Permutation;

/// Convert a float to an exact rational, mapping non-finite values to zero
pub fn rational_from_f64(value: f64) -> BigRational {
    BigRational::from_float(value).unwrap_or_else(BigRational::zero)
}

/// Exact rational copy of a float matrix
pub fn rational_matrix(a: &DMatrix<f64>) -> DMatrix<BigRational> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| rational_from_f64(a[(i, j)]))
}

/// Exact rational copy of a float vector
pub fn rational_vector(v: &DVector<f64>) -> DVector<BigRational> {
    DVector::from_fn(v.nrows(), |i, _| rational_from_f64(v[i]))
}

/// Nearest float rendition of a rational matrix
pub fn float_matrix(a: &DMatrix<BigRational>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)].to_f64().unwrap_or(0.0))
}

/// Solution of a successful elimination
#[derive(Debug, Clone)]
pub struct Elimination {
    /// Number of dependent columns
    pub rank: usize,
    /// `cols x (cols - rank + 1)` solution matrix. Column 0 holds the
    /// particular solution, column `1 + k` holds the coefficients of the
    /// k-th free variable in ascending original column order. Multiplying
    /// by `(1, x_free)` yields the full variable vector.
    pub kernel: DMatrix<BigRational>,
    /// Column order after pivoting, dependent slots first. Both halves are
    /// sorted ascending by original index.
    pub permutation: Vec<usize>,
}

/// Outcome of [`gauss_jordan`]
#[derive(Debug, Clone)]
pub enum EliminationOutcome {
    /// The system was solved
    Solved(Elimination),
    /// The matrix has more rows than columns
    Overdetermined,
    /// More columns are excluded from pivoting than the rank leaves free
    TooManyFree,
    /// Elimination stalled because the only usable pivots sit in columns
    /// excluded from pivoting
    FrozenPivotConflict {
        /// Original indices of the columns pivoted before the stall
        pivoted: Vec<usize>,
        /// Original indices of columns that could still serve as pivots
        candidates: Vec<usize>,
    },
    /// A zero row carries a nonzero right hand side entry
    Inconsistent,
}

/// Eliminate `a * x = b` while keeping the columns marked in `frozen` free
///
/// # Parameters
/// - `a`: coefficient matrix with at most as many rows as columns
/// - `b`: right hand side, one entry per row
/// - `frozen`: one flag per column, `true` excludes the column from pivoting
///
/// # Returns
/// An [`EliminationOutcome`], carrying the kernel and column partition on
/// success and the failure reason otherwise.
///
/// # Notes:
/// Pivots are chosen by largest magnitude over the eligible block. When the
/// eligible columns are used up before the rows are, the search degenerates
/// to the diagonal entry of the frozen block; a nonzero entry there extends
/// the rank into the frozen columns, which is reported as [`TooManyFree`]
/// rather than [`FrozenPivotConflict`].
pub fn gauss_jordan(
    a: &DMatrix<BigRational>,
    b: &DVector<BigRational>,
    frozen: &[bool],
) -> EliminationOutcome {
    let rows = a.nrows();
    let cols = a.ncols();
    debug_assert_eq!(cols, frozen.len());
    debug_assert_eq!(rows, b.nrows());

    if rows > cols {
        return EliminationOutcome::Overdetermined;
    }

    let user_free = frozen.iter().filter(|&&flag| flag).count();
    let eligible = cols - user_free;
    let mut m = a.clone();
    let mut rhs = b.clone();
    let mut perm = Permutation::identity(cols);
    let mut marks: Vec<bool> = frozen.to_vec();

    // move the frozen columns into the right part of the matrix
    let mut i: isize = -1;
    let mut j: isize = cols as isize;
    loop {
        loop {
            j -= 1;
            if !(j > i && marks[j as usize]) {
                break;
            }
        }
        loop {
            i += 1;
            if !(i < j && !marks[i as usize]) {
                break;
            }
        }
        if i < j {
            perm.swap(i as usize, j as usize);
            marks.swap(i as usize, j as usize);
            m.swap_columns(i as usize, j as usize);
        } else {
            break;
        }
    }

    // forward elimination
    let mut rank = rows;
    for k in 0..rows {
        let mut pivot_row = k;
        let mut pivot_col = k;
        let mut pivot = m[(k, k)].abs();
        for j in k..eligible {
            for i in k..rows {
                let magnitude = m[(i, j)].abs();
                if magnitude > pivot {
                    pivot = magnitude;
                    pivot_row = i;
                    pivot_col = j;
                }
            }
        }
        if pivot.is_zero() {
            rank = k;
            break;
        }
        if pivot_row != k {
            m.swap_rows(k, pivot_row);
            rhs.swap_rows(k, pivot_row);
        }
        if pivot_col != k {
            m.swap_columns(k, pivot_col);
            perm.swap(k, pivot_col);
        }
        for i in k + 1..rows {
            if m[(i, k)].is_zero() {
                continue;
            }
            let mult = -(&m[(i, k)] / &m[(k, k)]);
            let update = &mult * &rhs[k];
            rhs[i] += update;
            for j in k..cols {
                let update = &mult * &m[(k, j)];
                m[(i, j)] += update;
            }
        }
    }

    if rank < rows {
        // a nonzero entry right of the eligible block means elimination
        // stalled on columns excluded from pivoting
        let stalled = (eligible..cols).any(|j| (rank..rows).any(|i| !m[(i, j)].is_zero()));
        if stalled {
            let mut pivoted = perm.as_slice()[..rank].to_vec();
            pivoted.sort_unstable();
            let mut candidates: Vec<usize> = (rank..cols)
                .filter(|&j| (rank..rows).any(|i| !m[(i, j)].is_zero()))
                .map(|j| perm.slot(j))
                .collect();
            candidates.sort_unstable();
            return EliminationOutcome::FrozenPivotConflict {
                pivoted,
                candidates,
            };
        }
    }

    // zero rows must carry zero right hand sides
    for i in rank..rows {
        if !rhs[i].is_zero() {
            return EliminationOutcome::Inconsistent;
        }
    }

    if user_free > cols - rank {
        return EliminationOutcome::TooManyFree;
    }

    // backward elimination to reduced echelon form
    for k in (0..rank).rev() {
        for i in (0..k).rev() {
            if m[(i, k)].is_zero() {
                continue;
            }
            let mult = -(&m[(i, k)] / &m[(k, k)]);
            let update = &mult * &rhs[k];
            rhs[i] += update;
            for j in k..cols {
                let update = &mult * &m[(k, j)];
                m[(i, j)] += update;
            }
        }
        let inv = m[(k, k)].recip();
        m[(k, k)] = BigRational::one();
        for j in rank..cols {
            let scaled = &m[(k, j)] * &inv;
            m[(k, j)] = scaled;
        }
        let scaled = &rhs[k] * &inv;
        rhs[k] = scaled;
    }

    // assemble the kernel, with the free columns ordered by original index
    let free = cols - rank;
    let mut kernel = DMatrix::<BigRational>::zeros(cols, free + 1);
    let ranking = perm.ranking(rank..cols);
    for k in 0..rank {
        let target = perm.slot(k);
        if !rhs[k].is_zero() {
            kernel[(target, 0)] = rhs[k].clone();
        }
        for j in rank..cols {
            if !m[(k, j)].is_zero() {
                kernel[(target, ranking[j - rank] + 1)] = -m[(k, j)].clone();
            }
        }
    }
    for k in 0..free {
        kernel[(perm.slot(k + rank), ranking[k] + 1)] = BigRational::one();
    }

    perm.sort_range(0..rank);
    perm.sort_range(rank..cols);

    EliminationOutcome::Solved(Elimination {
        rank,
        kernel,
        permutation: perm.as_slice().to_vec(),
    })
}

/// Outcome of [`match_free_selection`]
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// A working free column selection was found
    Matched {
        elimination: Elimination,
        /// Columns revised in each direction relative to the input selection
        swapped: usize,
        /// Eliminations tried beyond the initial one
        attempts: usize,
    },
    /// The failure cannot be repaired by revising the free columns
    Unmatchable { attempts: usize },
    /// No revised selection within the distance bound works
    Exhausted { attempts: usize },
    /// The attempt cap was reached before a working selection was found
    CapReached { attempts: usize },
}

/// Lexicographic enumeration of fixed size subsets of an index pool
struct Combinations {
    pool: Vec<usize>,
    cursor: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(pool: Vec<usize>, size: usize) -> Combinations {
        let done = size == 0 || size > pool.len();
        Combinations {
            cursor: (0..size).collect(),
            pool,
            done,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let selected: Vec<usize> = self.cursor.iter().map(|&i| self.pool[i]).collect();
        let size = self.cursor.len();
        let n = self.pool.len();
        let mut i = size;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.cursor[i] != i + n - size {
                self.cursor[i] += 1;
                for j in i + 1..size {
                    self.cursor[j] = self.cursor[j - 1] + 1;
                }
                break;
            }
        }
        Some(selected)
    }
}

/// Search for a revision of the free column selection that makes the
/// elimination succeed
///
/// # Parameters
/// - `a`, `b`, `frozen`: system as in [`gauss_jordan`]
/// - `max_distance`: how many columns may be revised in each direction
/// - `attempt_cap`: bound on the number of revised eliminations tried,
///   `None` for unbounded
///
/// # Notes:
/// The initial selection is tried first and returned with zero attempts if
/// it works. Only a [`FrozenPivotConflict`] triggers the search; every other
/// failure is reported as unmatchable. Revisions are tried in increasing
/// distance, so the first working selection differs from the input in as
/// few columns as possible.
///
/// [`FrozenPivotConflict`]: EliminationOutcome::FrozenPivotConflict
pub fn match_free_selection(
    a: &DMatrix<BigRational>,
    b: &DVector<BigRational>,
    frozen: &[bool],
    max_distance: usize,
    attempt_cap: Option<usize>,
) -> MatchOutcome {
    match gauss_jordan(a, b, frozen) {
        EliminationOutcome::Solved(elimination) => {
            return MatchOutcome::Matched {
                elimination,
                swapped: 0,
                attempts: 0,
            };
        }
        EliminationOutcome::FrozenPivotConflict { .. } => {}
        _ => return MatchOutcome::Unmatchable { attempts: 0 },
    }

    let unfrozen: Vec<usize> = (0..frozen.len()).filter(|&i| !frozen[i]).collect();
    let frozen_cols: Vec<usize> = (0..frozen.len()).filter(|&i| frozen[i]).collect();
    let bound = max_distance.min(unfrozen.len()).min(frozen_cols.len());

    let mut attempts = 0usize;
    for distance in 1..=bound {
        for freeze in Combinations::new(unfrozen.clone(), distance) {
            for unfreeze in Combinations::new(frozen_cols.clone(), distance) {
                let mut revised = frozen.to_vec();
                for &column in &freeze {
                    revised[column] = true;
                }
                for &column in &unfreeze {
                    revised[column] = false;
                }
                attempts += 1;
                if let EliminationOutcome::Solved(elimination) = gauss_jordan(a, b, &revised) {
                    return MatchOutcome::Matched {
                        elimination,
                        swapped: distance,
                        attempts,
                    };
                }
                if let Some(cap) = attempt_cap {
                    if attempts >= cap {
                        return MatchOutcome::CapReached { attempts };
                    }
                }
            }
        }
    }
    MatchOutcome::Exhausted { attempts }
}
