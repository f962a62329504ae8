//! Inequality systems in standard form `A*x <= b` with per-variable bounds
//!
//! Rewritten inequality constraints are collected here for the polytope
//! feasibility check. Single-variable rows collapse into lower/upper bounds,
//! everything else is stored as a `<=`-form row. The sparse system is built
//! lazily on the first query after a mutation.

use std::cell::{Ref, RefCell};

use clarabel::algebra::CscMatrix as SolverMatrix;
use clarabel::solver::{
    DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use indexmap::{IndexMap, IndexSet};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::diagnostics::Diagnostics;
use crate::expr::linear::{LinearCombination, CONSTANT_KEY};
use crate::expr::tree::ComparisonOp;

/// Lazily assembled numeric form of the stored rows
#[derive(Debug)]
struct Built {
    /// Variable names in sorted order, one per column
    names: Vec<String>,
    /// Column index of every registered variable
    index: IndexMap<String, usize>,
    /// Row coefficients, one row per stored inequality
    matrix: CscMatrix<f64>,
    /// Right hand side, the negated constant of every row
    rhs: DVector<f64>,
}

/// A system of linear inequalities `A*x <= b` plus variable bounds
///
/// Rows keep their coefficient maps (the constant term under `"1"`), so
/// duplicates can be dropped by exact coefficient comparison and rows can be
/// rendered back into relation text for reporting. Equalities enter as a
/// `<=` / `>=` pair.
///
/// # Examples
/// ```rust
/// use fluxion_core::expr::linear::LinearCombination;
/// use fluxion_core::expr::parse_relation;
/// use fluxion_core::standard_form::StandardForm;
///
/// let mut form = StandardForm::new();
/// form.set_lower_bound("v_upt.n", 0.0);
/// let row = LinearCombination::from_relation(
///     &parse_relation("v_upt.n + v_em.n <= 10").unwrap(),
/// )
/// .unwrap();
/// assert!(form.add_inequality(&row));
/// assert_eq!(form.num_rows(), 1);
/// assert_eq!(form.num_variables(), 2);
/// ```
#[derive(Debug, Default)]
pub struct StandardForm {
    /// Every variable mentioned by a row, a bound, or registered explicitly
    variables: IndexSet<String>,
    /// Stored `<=`-form rows as coefficient maps including the constant term
    rows: Vec<IndexMap<String, f64>>,
    /// Lower variable bounds
    lower: IndexMap<String, f64>,
    /// Upper variable bounds
    upper: IndexMap<String, f64>,
    /// Cached numeric form, cleared by every structural mutation
    built: RefCell<Option<Built>>,
}

impl StandardForm {
    pub fn new() -> Self {
        StandardForm::default()
    }

    // region Variables and Bounds

    /// Register `name` as a column even if no row or bound mentions it yet
    pub fn register_variable(&mut self, name: impl Into<String>) {
        if self.variables.insert(name.into()) {
            *self.built.get_mut() = None;
        }
    }

    /// Record `name >= bound`, keeping the tighter of two lower bounds
    ///
    /// # Returns
    /// `false` if the bound would cross an existing upper bound; the bound is
    /// not recorded in that case.
    pub fn set_lower_bound(&mut self, name: &str, bound: f64) -> bool {
        self.register_variable(name);
        let bound = if bound == 0.0 { bound.abs() } else { bound };
        if let Some(upper) = self.upper.get(name) {
            if *upper < bound {
                return false;
            }
        }
        if let Some(lower) = self.lower.get(name) {
            if *lower > bound {
                // existing bound is tighter
                return true;
            }
        }
        self.lower.insert(name.to_string(), bound);
        true
    }

    /// Record `name <= bound`, keeping the tighter of two upper bounds
    ///
    /// # Returns
    /// `false` if the bound would cross an existing lower bound; the bound is
    /// not recorded in that case.
    pub fn set_upper_bound(&mut self, name: &str, bound: f64) -> bool {
        self.register_variable(name);
        let bound = if bound == 0.0 { bound.abs() } else { bound };
        if let Some(lower) = self.lower.get(name) {
            if *lower > bound {
                return false;
            }
        }
        if let Some(upper) = self.upper.get(name) {
            if *upper < bound {
                // existing bound is tighter
                return true;
            }
        }
        self.upper.insert(name.to_string(), bound);
        true
    }

    pub fn lower_bound(&self, name: &str) -> Option<f64> {
        self.lower.get(name).copied()
    }

    pub fn upper_bound(&self, name: &str) -> Option<f64> {
        self.upper.get(name).copied()
    }

    // endregion Variables and Bounds

    // region Rows

    /// Store a linear inequality or equality
    ///
    /// `<=` rows are stored as-is, `>=` rows with negated coefficients, and
    /// `=` enters as both. Strict operators degrade to their non-strict
    /// counterparts. Rows over a single variable become bounds instead, rows
    /// without any variable are dropped, and exact duplicates are not stored
    /// twice.
    ///
    /// # Returns
    /// Whether anything was recorded.
    pub fn add_inequality(&mut self, combination: &LinearCombination) -> bool {
        let op = match combination.op() {
            Some(op) => op,
            None => return false,
        };
        let mut coefficients = Self::coefficient_map(combination);
        match op {
            ComparisonOp::Leq | ComparisonOp::Lt => self.add_leq_row(coefficients),
            ComparisonOp::Geq | ComparisonOp::Gt => {
                Self::negate(&mut coefficients);
                self.add_leq_row(coefficients)
            }
            ComparisonOp::Eq => {
                let mut negated = coefficients.clone();
                Self::negate(&mut negated);
                let forward = self.add_leq_row(coefficients);
                let backward = self.add_leq_row(negated);
                forward || backward
            }
            ComparisonOp::Neq => false,
        }
    }

    fn add_leq_row(&mut self, coefficients: IndexMap<String, f64>) -> bool {
        if coefficients.len() <= 1 {
            // constant-only relation, carries no constraint
            return false;
        }
        if coefficients.len() == 2 {
            if let Some(constant) = coefficients.get(CONSTANT_KEY).copied() {
                if let Some((name, coeff)) = coefficients
                    .iter()
                    .find(|(name, _)| name.as_str() != CONSTANT_KEY)
                    .map(|(name, value)| (name.clone(), *value))
                {
                    let pinned = -constant / coeff;
                    return if coeff < 0.0 {
                        self.set_lower_bound(&name, pinned)
                    } else {
                        self.set_upper_bound(&name, pinned)
                    };
                }
            }
        }
        if self.rows.iter().any(|existing| *existing == coefficients) {
            return false;
        }
        for name in coefficients.keys() {
            if name.as_str() != CONSTANT_KEY {
                self.variables.insert(name.clone());
            }
        }
        self.rows.push(coefficients);
        *self.built.get_mut() = None;
        true
    }

    fn coefficient_map(combination: &LinearCombination) -> IndexMap<String, f64> {
        let mut map = IndexMap::new();
        map.insert(CONSTANT_KEY.to_string(), combination.constant());
        for (name, value) in combination.variables() {
            map.insert(name.to_string(), value);
        }
        map
    }

    fn negate(coefficients: &mut IndexMap<String, f64>) {
        for value in coefficients.values_mut() {
            *value = -*value;
        }
    }

    // endregion Rows

    // region Queries

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Check a concrete assignment against all rows and bounds
    ///
    /// Variables missing from the assignment count as NaN, and any NaN makes
    /// the assignment unsatisfiable. Violations are reported through
    /// `diagnostics` as warnings.
    pub fn is_satisfied(
        &self,
        assignment: &IndexMap<String, f64>,
        tolerance: f64,
        diagnostics: &Diagnostics,
    ) -> bool {
        let built = self.built();
        let x: Vec<f64> = built
            .names
            .iter()
            .map(|name| assignment.get(name).copied().unwrap_or(f64::NAN))
            .collect();
        if x.iter().any(|value| value.is_nan()) {
            diagnostics.warning("some components of the tested assignment are NaN");
            return false;
        }
        let mut sums = vec![0.0; built.matrix.nrows()];
        for (i, j, value) in built.matrix.triplet_iter() {
            sums[i] += value * x[j];
        }
        for (i, sum) in sums.iter().enumerate() {
            if sum - tolerance > built.rhs[i] {
                diagnostics.warning(format!(
                    "[{}] is violated by {:e}",
                    self.row_text(i),
                    (sum - tolerance) - built.rhs[i]
                ));
                return false;
            }
        }
        for (name, bound) in &self.lower {
            let j = built.index[name.as_str()];
            if x[j] + tolerance < *bound {
                diagnostics.warning(format!(
                    "lower bound {}(={}) + tol(={}) < {} is violated",
                    name, x[j], tolerance, bound
                ));
                return false;
            }
        }
        for (name, bound) in &self.upper {
            let j = built.index[name.as_str()];
            if x[j] - tolerance > *bound {
                diagnostics.warning(format!(
                    "upper bound {}(={}) - tol(={}) > {} is violated",
                    name, x[j], tolerance, bound
                ));
                return false;
            }
        }
        true
    }

    /// Decide whether the polytope described by rows and bounds is non-empty
    ///
    /// The check runs the conic solver on a zero objective with all rows and
    /// bounds in a single nonnegative cone. A solver status other than solved
    /// or primal-infeasible is reported and treated as feasible.
    pub fn is_feasible(&self, diagnostics: &Diagnostics) -> bool {
        let built = self.built();
        let columns = built.names.len();
        let total = built.matrix.nrows() + self.lower.len() + self.upper.len();
        if total == 0 {
            return true;
        }

        let mut coo = CooMatrix::new(total, columns);
        let mut rhs: Vec<f64> = Vec::with_capacity(total);
        for (i, j, value) in built.matrix.triplet_iter() {
            coo.push(i, j, *value);
        }
        rhs.extend(built.rhs.iter().copied());
        let mut next = built.matrix.nrows();
        // a lower bound l <= x becomes the row -x <= -l
        for (name, bound) in &self.lower {
            coo.push(next, built.index[name.as_str()], -1.0);
            rhs.push(-bound);
            next += 1;
        }
        for (name, bound) in &self.upper {
            coo.push(next, built.index[name.as_str()], 1.0);
            rhs.push(*bound);
            next += 1;
        }

        let (offsets, indices, values) = CscMatrix::from(&coo).disassemble();
        let lhs = SolverMatrix::new(total, columns, offsets, indices, values);
        let objective: SolverMatrix<f64> = SolverMatrix::zeros((columns, columns));
        let gradient = vec![0.0; columns];
        let cones = [SupportedConeT::NonnegativeConeT(total)];
        let settings = DefaultSettings {
            verbose: false,
            ..DefaultSettings::default()
        };
        let mut solver = DefaultSolver::new(&objective, &gradient, &lhs, &rhs, &cones, settings);
        solver.solve();
        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => true,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => false,
            status => {
                diagnostics.warning(format!(
                    "feasibility check ended with solver status {:?}, assuming feasible",
                    status
                ));
                true
            }
        }
    }

    /// Render variables, rows, and bounds through the diagnostics sink
    pub fn dump(&self, diagnostics: &Diagnostics) {
        let built = self.built();
        if !built.names.is_empty() {
            diagnostics.info(format!("variables:\n\t{}", built.names.join(", ")));
        }
        if !self.rows.is_empty() {
            let mut text = String::from("constraints:");
            for i in 0..self.rows.len() {
                text.push_str(&format!("\n\t{}", self.row_text(i)));
            }
            diagnostics.info(text);
        }
        let mut bounded: Vec<&str> = self
            .lower
            .keys()
            .chain(self.upper.keys())
            .map(String::as_str)
            .collect();
        bounded.sort_unstable();
        bounded.dedup();
        if !bounded.is_empty() {
            let mut text = String::from("variable bounds:");
            for name in bounded {
                text.push_str("\n\t");
                if let Some(bound) = self.lower.get(name) {
                    text.push_str(&format!("{} >= {}", name, bound));
                    if self.upper.contains_key(name) {
                        text.push('\t');
                    }
                }
                if let Some(bound) = self.upper.get(name) {
                    text.push_str(&format!("{} <= {}", name, bound));
                }
            }
            diagnostics.info(text);
        }
    }

    fn row_text(&self, row: usize) -> String {
        match self.rows.get(row) {
            Some(coefficients) => {
                match LinearCombination::leq_row(coefficients.clone()).rebuild_relation() {
                    Some(relation) => relation.to_string(),
                    None => String::new(),
                }
            }
            None => String::new(),
        }
    }

    fn built(&self) -> Ref<'_, Built> {
        if self.built.borrow().is_none() {
            let built = self.rebuild();
            *self.built.borrow_mut() = Some(built);
        }
        Ref::map(self.built.borrow(), |slot| slot.as_ref().unwrap())
    }

    fn rebuild(&self) -> Built {
        let mut names: Vec<String> = self.variables.iter().cloned().collect();
        names.sort_unstable();
        let index: IndexMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(position, name)| (name.clone(), position))
            .collect();
        let mut coo = CooMatrix::new(self.rows.len(), names.len());
        let mut rhs = DVector::zeros(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            for (name, value) in row {
                if name.as_str() == CONSTANT_KEY {
                    rhs[i] = -*value;
                } else {
                    coo.push(i, index[name.as_str()], *value);
                }
            }
        }
        Built {
            matrix: CscMatrix::from(&coo),
            rhs,
            names,
            index,
        }
    }

    // endregion Queries
}
