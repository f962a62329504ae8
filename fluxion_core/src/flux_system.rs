//! Resolution of linear flux and pool constraints on a metabolic network.
//!
//! A [`FluxSystem`] combines the stoichiometry of a [`Network`] with the user
//! supplied equality and inequality constraints. It row reduces the
//! stoichiometry, assembles one linear system per parameter class (net flux,
//! exchange flux, pool size), solves each system exactly over the rationals
//! and partitions every variable into free, dependent and pinned ones. The
//! solution carries closed form expressions for the dependent variables, an
//! inequality feasibility check over the free variables, and a lazily
//! refreshed numeric evaluation driven by the free variable setters.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use derive_builder::Builder;
use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

use crate::configuration::CONFIGURATION;
use crate::constraint::{Constraint, ParameterClass, ValidationState, VariableRole};
use crate::diagnostics::Diagnostics;
use crate::expr::linear::LinearCombination;
use crate::expr::tree::{ComparisonOp, Expr};
use crate::linalg::gauss::{
    float_matrix, gauss_jordan, rational_matrix, rational_vector, EliminationOutcome,
};
use crate::linalg::reduce::{row_reduce_exact, row_reduce_qr, row_reduce_qr_augmented, svd_rank};
use crate::network::Network;
use crate::standard_form::StandardForm;

// region Options and Errors

/// Options controlling how a [`FluxSystem`] resolves its constraints
#[derive(Builder, Debug, Clone)]
pub struct FluxSystemOptions {
    /// Whether the network is simulated at isotopic steady state. A
    /// stationary model has no pool size unknowns, so all pool handling
    /// collapses to defaults.
    #[builder(default = "true")]
    pub stationary: bool,
    /// Reaction names whose net flux is declared free
    #[builder(default = "Vec::new()")]
    pub free_net: Vec<String>,
    /// Reaction names whose exchange flux is declared free
    #[builder(default = "Vec::new()")]
    pub free_xch: Vec<String>,
    /// Metabolite names whose pool size is declared free
    #[builder(default = "Vec::new()")]
    pub free_pool: Vec<String>,
    /// Numeric tolerance used when checking inequality constraints
    #[builder(default = "CONFIGURATION.read().unwrap().constraint_tolerance")]
    pub constraint_tolerance: f64,
}

/// Enum representing errors raised by the free variable setters
#[derive(Debug, Error, PartialEq, Clone)]
pub enum FluxSystemError {
    /// Named variable does not exist in the network
    #[error("unknown variable name: {0}")]
    UnknownVariable(String),
    /// Named variable is not free and cannot be assigned
    #[error("{name} ({kind}) is not free")]
    NotFree {
        /// Variable name as passed to the setter
        name: String,
        /// Which component was addressed, `net`, `xch` or `pool`
        kind: &'static str,
    },
    /// Flux name misses the `.n`/`.x` suffix
    #[error("invalid suffix for net/xch flux name \"{0}\"; expected (.n|.x)")]
    MissingSuffix(String),
}

// endregion Options and Errors

// region ClassSystem

/// Linear system of one parameter class together with its solution
#[derive(Debug, Clone)]
struct ClassSystem {
    /// Constraint matrix, `0 x 0` while the class has no equality rows
    matrix: DMatrix<f64>,
    /// Right hand side, one entry per matrix row
    rhs: DVector<f64>,
    /// One flag per variable, `true` keeps the column out of the pivoting
    frozen: Vec<bool>,
    /// Kernel matrix; column 0 is the particular solution, the remaining
    /// columns span the homogeneous solution, one per free variable
    kernel: DMatrix<f64>,
    /// Column order after elimination, dependent slots first
    permutation: Vec<usize>,
    /// Slot of each original column inside `permutation`
    positions: Vec<usize>,
    /// Constant offsets contributed by the pinned variables
    v_const: DVector<f64>,
}

impl ClassSystem {
    fn new(columns: usize) -> ClassSystem {
        ClassSystem {
            matrix: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            frozen: vec![false; columns],
            kernel: DMatrix::zeros(0, 0),
            permutation: Vec::new(),
            positions: Vec::new(),
            v_const: DVector::zeros(0),
        }
    }

    /// Number of kernel columns past the particular solution
    fn num_free(&self) -> usize {
        self.kernel.ncols().saturating_sub(1)
    }
}

fn inverse_permutation(permutation: &[usize]) -> Vec<usize> {
    let mut positions = vec![0usize; permutation.len()];
    for (slot, &column) in permutation.iter().enumerate() {
        positions[column] = slot;
    }
    positions
}

// endregion ClassSystem

/// Numeric values of all variables, recomputed lazily
#[derive(Debug, Clone)]
struct CachedValues {
    vnet: DVector<f64>,
    vxch: DVector<f64>,
    vpool: DVector<f64>,
    dirty: bool,
}

// region Reports

/// Serializable snapshot of a resolved system
#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    /// Text rendering of the validation state
    pub validation_state: String,
    /// Whether the model was resolved as stationary
    pub stationary: bool,
    /// Number of free variable mutations so far
    pub change_count: u64,
    /// One entry per reaction, in stoichiometry column order
    pub fluxes: Vec<FluxReport>,
    /// One entry per metabolite, empty for stationary models
    pub pools: Vec<PoolReport>,
}

/// Net and exchange value of one reaction
#[derive(Debug, Clone, Serialize)]
pub struct FluxReport {
    pub name: String,
    pub net: f64,
    pub net_role: String,
    pub xch: f64,
    pub xch_role: String,
}

/// Pool size of one metabolite
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub name: String,
    pub size: f64,
    pub role: String,
}

impl SystemReport {
    /// Render the report as a JSON document
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// endregion Reports

/// Constraint resolution engine over one [`Network`]
///
/// Construction runs the full pipeline: the assembly and sizing checks, the
/// exact elimination of all three parameter classes and the inequality
/// feasibility check. The outcome is carried in [`FluxSystem::validation_state`]
/// rather than a `Result`, so a degraded system can still be inspected. After
/// construction the system is mutated only through the free variable setters.
#[derive(Debug)]
pub struct FluxSystem {
    network: Rc<Network>,
    stationary: bool,
    /// Equality constraints in user order
    equalities: Vec<Constraint>,
    /// Inequality constraints in user order
    inequalities: Vec<Constraint>,
    /// Free variable names per class. Holds the user declared sets during
    /// preparation and is replaced by the final free sets once solving
    /// completes.
    free_net: Vec<String>,
    free_xch: Vec<String>,
    free_pool: Vec<String>,
    state: Cell<ValidationState>,
    /// Numeric tolerance for inequality violation checks
    cons_tol: f64,
    diagnostics: Diagnostics,
    net: ClassSystem,
    xch: ClassSystem,
    pool: ClassSystem,
    roles_net: Vec<VariableRole>,
    roles_xch: Vec<VariableRole>,
    roles_pool: Vec<VariableRole>,
    values: RefCell<CachedValues>,
    change_count: u64,
}

impl FluxSystem {
    // region Construction

    /// Build and resolve a constraint system
    ///
    /// # Parameters
    /// - `network`: the reaction network supplying the stoichiometry
    /// - `constraints`: all user constraints; equalities and inequalities
    ///   are told apart by their relation operator
    /// - `options`: free variable declarations and resolution settings
    ///
    /// # Returns
    /// The resolved system. Whether resolution succeeded is carried by
    /// [`FluxSystem::validation_state`]; failures leave the system in a
    /// degraded but inspectable state.
    pub fn new(
        network: Rc<Network>,
        constraints: Vec<Constraint>,
        options: FluxSystemOptions,
    ) -> FluxSystem {
        let cols = network.num_reactions();
        let rows = network.num_metabolites();
        let (equalities, inequalities): (Vec<Constraint>, Vec<Constraint>) =
            constraints.into_iter().partition(Constraint::is_equality);

        let mut free_net = options.free_net;
        let mut free_xch = options.free_xch;
        let mut free_pool = options.free_pool;
        free_net.sort();
        free_xch.sort();
        free_pool.sort();

        let mut system = FluxSystem {
            stationary: options.stationary,
            equalities,
            inequalities,
            free_net,
            free_xch,
            free_pool,
            state: Cell::new(ValidationState::Unvalidated),
            cons_tol: options.constraint_tolerance,
            diagnostics: Diagnostics::new(),
            net: ClassSystem::new(cols),
            xch: ClassSystem::new(cols),
            pool: ClassSystem::new(rows),
            roles_net: vec![VariableRole::Undefined; cols],
            roles_xch: vec![VariableRole::Undefined; cols],
            roles_pool: vec![VariableRole::Undefined; rows],
            values: RefCell::new(CachedValues {
                vnet: DVector::zeros(cols),
                vxch: DVector::zeros(cols),
                vpool: DVector::from_element(rows, 1.0),
                dirty: true,
            }),
            change_count: 0,
            network,
        };

        if !system.prepare() {
            system
                .diagnostics
                .warning("preparation of constraint system failed");
            return system;
        }
        if !system.solve() {
            system
                .diagnostics
                .warning("solution of constraint system failed");
            return system;
        }
        system
    }

    // endregion Construction

    // region Preparation

    /// Assemble the per class constraint systems and run the sizing checks.
    ///
    /// Leaves the state at `Unvalidated` or `TooFewConstraints` on success.
    /// On failure the state names the reason and the class systems are not
    /// usable for solving.
    fn prepare(&mut self) -> bool {
        let s_rows = self.network.num_metabolites();
        let s_cols = self.network.num_reactions();

        self.diagnostics.info(format!(
            "user requests {} free fluxes ({} free net + {} free xch).",
            self.free_net.len() + self.free_xch.len(),
            self.free_net.len(),
            self.free_xch.len()
        ));
        if !self.stationary {
            self.diagnostics.info(format!(
                "user requests {} free pool sizes.",
                self.free_pool.len()
            ));
        }
        self.state.set(ValidationState::Unvalidated);

        for name in &self.free_net {
            if self.network.reaction_index(name).is_none() {
                self.diagnostics.error(format!(
                    "free net flux \"{}\" is not a reaction of the network",
                    name
                ));
                self.state.set(ValidationState::InvalidFreeVariables);
                return false;
            }
        }
        for name in &self.free_xch {
            if self.network.reaction_index(name).is_none() {
                self.diagnostics.error(format!(
                    "free xch flux \"{}\" is not a reaction of the network",
                    name
                ));
                self.state.set(ValidationState::InvalidFreeVariables);
                return false;
            }
        }
        if !self.stationary {
            for name in &self.free_pool {
                if self.network.metabolite_index(name).is_none() {
                    self.diagnostics.error(format!(
                        "free pool size \"{}\" is not a metabolite of the network",
                        name
                    ));
                    self.state.set(ValidationState::InvalidFreeVariables);
                    return false;
                }
            }
        }

        // row reduce the stoichiometry so that redundant metabolite balances
        // cannot make the net system over-determined
        let stoichiometry = self.network.stoichiometry();
        let reduced: DMatrix<f64> = if s_rows <= s_cols {
            match row_reduce_exact(stoichiometry) {
                Ok(reduced) => {
                    self.diagnostics.info(format!(
                        "size of stoichiometry is ({}x{}); exact rank is {}.",
                        s_rows,
                        s_cols,
                        reduced.nrows()
                    ));
                    reduced.map(|entry| entry as f64)
                }
                Err(_) => {
                    self.diagnostics
                        .warning("integer overflow in row reduction ... please report this");
                    stoichiometry.map(|entry| entry as f64)
                }
            }
        } else {
            let reduced = row_reduce_qr(&stoichiometry.map(|entry| entry as f64));
            self.diagnostics.info(format!(
                "size of stoichiometry is ({}x{}); numerical rank is {}.",
                s_rows,
                s_cols,
                reduced.nrows()
            ));
            reduced
        };
        if s_rows > reduced.nrows() {
            self.diagnostics.info(format!(
                "using row-reduced stoichiometry (-{} lines)",
                s_rows - reduced.nrows()
            ));
        }

        // upper bound on the rows each class needs; simple constraints do
        // not enter the matrices
        let mut neq_net = 0usize;
        let mut neq_xch = 0usize;
        let mut neq_pool = 0usize;
        for constraint in &self.equalities {
            if constraint.simple_form().is_some() {
                continue;
            }
            match constraint.class() {
                ParameterClass::Net => neq_net += 1,
                ParameterClass::Xch => neq_xch += 1,
                ParameterClass::Pool => {
                    if !self.stationary {
                        neq_pool += 1;
                    }
                }
            }
        }

        let mut n_net = DMatrix::<f64>::zeros(reduced.nrows() + neq_net, s_cols);
        let mut n_xch = DMatrix::<f64>::zeros(neq_xch, s_cols);
        let mut n_pool = DMatrix::<f64>::zeros(neq_pool, s_rows);
        let mut nc_net = DMatrix::<f64>::zeros(neq_net, s_cols);
        let mut nc_xch = DMatrix::<f64>::zeros(neq_xch, s_cols);
        let mut nc_pool = DMatrix::<f64>::zeros(neq_pool, s_rows);
        let mut b_net = DVector::<f64>::zeros(reduced.nrows() + neq_net);
        let mut b_xch = DVector::<f64>::zeros(neq_xch);
        let mut b_pool = DVector::<f64>::zeros(neq_pool);

        for i in 0..reduced.nrows() {
            for j in 0..s_cols {
                n_net[(i, j)] = reduced[(i, j)];
            }
        }

        self.net.frozen = vec![false; s_cols];
        self.xch.frozen = vec![false; s_cols];
        self.pool.frozen = vec![false; s_rows];
        self.roles_net = vec![VariableRole::Undefined; s_cols];
        self.roles_xch = vec![VariableRole::Undefined; s_cols];
        self.roles_pool = vec![VariableRole::Undefined; s_rows];

        let mut nfree_net = self.free_net.len();
        let mut nfree_xch = self.free_xch.len();
        let mut nfree_pool = if self.stationary {
            0
        } else {
            self.free_pool.len()
        };

        // row counters; the net matrix already carries the stoichiometry
        let mut i_net = reduced.nrows();
        let mut i_xch = 0usize;
        let mut i_pool = 0usize;
        let mut k_net = 0usize;
        let mut k_xch = 0usize;
        let mut k_pool = 0usize;

        for constraint in &self.equalities {
            let class = constraint.class();
            if self.stationary && class == ParameterClass::Pool {
                continue;
            }
            let combination = match constraint.linear_form() {
                Ok(combination) => combination,
                Err(_) => {
                    self.state.set(ValidationState::NonlinearConstraints);
                    return false;
                }
            };
            if let Some((name, _)) = combination.simple_form() {
                // a value constraint keeps its variable out of the dependent
                // block; a matrix row would inflate the rank artificially
                match class {
                    ParameterClass::Net => {
                        let idx = match self.network.reaction_index(&name) {
                            Some(idx) => idx,
                            None => {
                                self.state.set(ValidationState::InvalidConstraints);
                                return false;
                            }
                        };
                        if self.free_net.iter().any(|free| free == &name) {
                            self.diagnostics.error(format!(
                                "free fluxes (as {} (net)) must not be constraint",
                                name
                            ));
                            self.state.set(ValidationState::InvalidFreeVariables);
                            return false;
                        }
                        self.roles_net[idx] = VariableRole::Constraint;
                        self.net.frozen[idx] = true;
                        nfree_net += 1;
                    }
                    ParameterClass::Xch => {
                        let idx = match self.network.reaction_index(&name) {
                            Some(idx) => idx,
                            None => {
                                self.state.set(ValidationState::InvalidConstraints);
                                return false;
                            }
                        };
                        if self.free_xch.iter().any(|free| free == &name) {
                            self.diagnostics.error(format!(
                                "free fluxes (as {} (xch)) must not be constraint",
                                name
                            ));
                            self.state.set(ValidationState::InvalidFreeVariables);
                            return false;
                        }
                        self.roles_xch[idx] = VariableRole::Constraint;
                        self.xch.frozen[idx] = true;
                        nfree_xch += 1;
                    }
                    ParameterClass::Pool => {
                        let idx = match self.network.metabolite_index(&name) {
                            Some(idx) => idx,
                            None => {
                                self.state.set(ValidationState::InvalidConstraints);
                                return false;
                            }
                        };
                        if self.free_pool.iter().any(|free| free == &name) {
                            self.diagnostics.error(format!(
                                "free poolsize (as {}) must not be constraint",
                                name
                            ));
                            self.state.set(ValidationState::InvalidFreeVariables);
                            return false;
                        }
                        self.roles_pool[idx] = VariableRole::Constraint;
                        self.pool.frozen[idx] = true;
                        nfree_pool += 1;
                    }
                }
                continue;
            }
            // general constraint, one row in the class matrix and one in the
            // user-only matrix used for dependence detection
            for (name, coefficient) in combination.variables() {
                let idx = match class {
                    ParameterClass::Net | ParameterClass::Xch => {
                        self.network.reaction_index(name)
                    }
                    ParameterClass::Pool => self.network.metabolite_index(name),
                };
                let idx = match idx {
                    Some(idx) => idx,
                    None => {
                        self.state.set(ValidationState::InvalidConstraints);
                        return false;
                    }
                };
                match class {
                    ParameterClass::Net => {
                        n_net[(i_net, idx)] = coefficient;
                        nc_net[(k_net, idx)] = coefficient;
                    }
                    ParameterClass::Xch => {
                        n_xch[(i_xch, idx)] = coefficient;
                        nc_xch[(k_xch, idx)] = coefficient;
                    }
                    ParameterClass::Pool => {
                        n_pool[(i_pool, idx)] = coefficient;
                        nc_pool[(k_pool, idx)] = coefficient;
                    }
                }
            }
            match class {
                ParameterClass::Net => {
                    b_net[i_net] = -combination.constant();
                    i_net += 1;
                    k_net += 1;
                }
                ParameterClass::Xch => {
                    b_xch[i_xch] = -combination.constant();
                    i_xch += 1;
                    k_xch += 1;
                }
                ParameterClass::Pool => {
                    b_pool[i_pool] = -combination.constant();
                    i_pool += 1;
                    k_pool += 1;
                }
            }
        }

        // only the populated rows enter the members; the net system keeps
        // its width even without rows, an exchange or pool class without
        // rows keeps an empty system and is solved by simulation
        self.net.matrix = n_net.rows(0, i_net).into_owned();
        self.net.rhs = b_net.rows(0, i_net).into_owned();
        self.xch.matrix = DMatrix::zeros(0, 0);
        self.xch.rhs = DVector::zeros(0);
        self.pool.matrix = DMatrix::zeros(0, 0);
        self.pool.rhs = DVector::zeros(0);
        if i_xch > 0 {
            self.xch.matrix = n_xch.rows(0, i_xch).into_owned();
            self.xch.rhs = b_xch.rows(0, i_xch).into_owned();
        }
        if i_pool > 0 {
            self.pool.matrix = n_pool.rows(0, i_pool).into_owned();
            self.pool.rhs = b_pool.rows(0, i_pool).into_owned();
        }

        if k_net > 0 {
            let user = nc_net.rows(0, k_net).into_owned();
            if svd_rank(&user) < user.nrows().min(user.ncols()) {
                self.diagnostics
                    .warning("linear dependencies between user-specified net constraints!");
                self.state.set(ValidationState::LinearDependentConstraints);
                return false;
            }
        }
        if k_xch > 0 {
            let user = nc_xch.rows(0, k_xch).into_owned();
            if svd_rank(&user) < user.nrows().min(user.ncols()) {
                self.diagnostics
                    .warning("linear dependencies between user-specified exchange constraints!");
                self.state.set(ValidationState::LinearDependentConstraints);
                return false;
            }
        }
        if k_pool > 0 {
            let user = nc_pool.rows(0, k_pool).into_owned();
            if svd_rank(&user) < user.nrows().min(user.ncols()) {
                self.diagnostics
                    .warning("linear dependencies between user-specified poolsize constraints!");
                self.state.set(ValidationState::LinearDependentConstraints);
                return false;
            }
        }

        // keep the declared free variables out of the pivoting
        for name in &self.free_net {
            if let Some(idx) = self.network.reaction_index(name) {
                self.net.frozen[idx] = true;
            }
        }
        for name in &self.free_xch {
            if let Some(idx) = self.network.reaction_index(name) {
                self.xch.frozen[idx] = true;
            }
        }
        if !self.stationary {
            for name in &self.free_pool {
                if let Some(idx) = self.network.metabolite_index(name) {
                    self.pool.frozen[idx] = true;
                }
            }
        }

        // the net system can lose rank when user constraints repeat what the
        // stoichiometry already enforces; eliminate such rows
        let rank = svd_rank(&self.net.matrix);
        self.diagnostics.info(format!(
            "size of NET constraint system is ({}x{}); numerical rank is {}",
            self.net.matrix.nrows(),
            self.net.matrix.ncols(),
            rank
        ));
        if rank < self.net.matrix.nrows().min(self.net.matrix.ncols()) {
            self.diagnostics.warning(
                "some user-specified net constraints are implicitly contained in the \
                 stoichiometry! eliminating these constraints ...",
            );
            let (matrix, rhs) = row_reduce_qr_augmented(&self.net.matrix, &self.net.rhs);
            self.net.matrix = matrix;
            self.net.rhs = rhs;
            if rank != self.net.matrix.nrows().min(self.net.matrix.ncols()) {
                self.diagnostics.error(
                    "error row reduction (net): dissonance about numerical rank; check carefully",
                );
            }
        }
        if self.xch.matrix.nrows() > 0 {
            let rank = svd_rank(&self.xch.matrix);
            self.diagnostics.info(format!(
                "size of XCH constraint system is ({}x{}); numerical rank is {}",
                self.xch.matrix.nrows(),
                self.xch.matrix.ncols(),
                rank
            ));
            if rank < self.xch.matrix.nrows().min(self.xch.matrix.ncols()) {
                self.diagnostics.warning(
                    "some user-specified exchange constraints are implicitly contained in the \
                     stoichiometry! eliminating these constraints ...",
                );
                let (matrix, rhs) = row_reduce_qr_augmented(&self.xch.matrix, &self.xch.rhs);
                self.xch.matrix = matrix;
                self.xch.rhs = rhs;
                if rank != self.xch.matrix.nrows().min(self.xch.matrix.ncols()) {
                    self.diagnostics.error(
                        "error row reduction (xch): dissonance about numerical rank; \
                         check carefully",
                    );
                }
            }
        }
        if !self.stationary && self.pool.matrix.nrows() > 0 {
            let rank = svd_rank(&self.pool.matrix);
            self.diagnostics.info(format!(
                "size of POOL constraint system is ({}x{}); numerical rank is {}",
                self.pool.matrix.nrows(),
                self.pool.matrix.ncols(),
                rank
            ));
            if rank < self.pool.matrix.nrows().min(self.pool.matrix.ncols()) {
                self.diagnostics.warning(
                    "some user-specified poolsize constraints are implicitly contained in the \
                     stoichiometry! eliminating these constraints ...",
                );
                let (matrix, rhs) = row_reduce_qr_augmented(&self.pool.matrix, &self.pool.rhs);
                self.pool.matrix = matrix;
                self.pool.rhs = rhs;
                if rank != self.pool.matrix.nrows().min(self.pool.matrix.ncols()) {
                    self.diagnostics.error(
                        "error row reduction (pool): dissonance about numerical rank; \
                         check carefully",
                    );
                }
            }
        }

        // sizing checks, over-determined classes first
        if self.net.matrix.nrows() > self.net.matrix.ncols() {
            if nfree_net > 0 {
                self.state.set(ValidationState::TooManyFreeVariables);
                self.diagnostics
                    .warning("specification allocates too many free NET variables.");
                self.make_free_flux_suggestion(
                    self.net.matrix.nrows() - self.net.matrix.ncols(),
                    true,
                );
            } else {
                self.state.set(ValidationState::TooManyConstraints);
                self.diagnostics
                    .warning("specification allocates too many NET constraints.");
            }
            return false;
        }
        if self.xch.matrix.nrows() > self.xch.matrix.ncols() {
            if nfree_xch > 0 {
                self.state.set(ValidationState::TooManyFreeVariables);
                self.diagnostics
                    .warning("specification allocates too many free XCH variables.");
                self.make_free_flux_suggestion(
                    self.xch.matrix.nrows() - self.xch.matrix.ncols(),
                    false,
                );
            } else {
                self.state.set(ValidationState::TooManyConstraints);
                self.diagnostics
                    .warning("specification allocates too many XCH constraints.");
            }
            return false;
        }
        if !self.stationary && self.pool.matrix.nrows() > self.pool.matrix.ncols() {
            if nfree_pool > 0 {
                self.state.set(ValidationState::TooManyFreeVariables);
                self.diagnostics
                    .warning("specification allocates too many free POOL variables.");
                self.make_free_pool_suggestion(
                    self.pool.matrix.nrows() - self.pool.matrix.ncols(),
                );
            } else {
                self.state.set(ValidationState::TooManyConstraints);
                self.diagnostics
                    .warning("specification allocates too many POOL constraints.");
            }
            return false;
        }

        // more variables declared free than the systems leave open
        if nfree_net > self.net.matrix.ncols() - self.net.matrix.nrows() {
            self.state.set(ValidationState::TooManyFreeVariables);
            self.diagnostics
                .warning("specification allocates too many free NET variables.");
            self.make_free_flux_suggestion(
                nfree_net - (self.net.matrix.ncols() - self.net.matrix.nrows()),
                true,
            );
            return false;
        }
        if self.xch.matrix.nrows() > 0
            && nfree_xch > self.xch.matrix.ncols() - self.xch.matrix.nrows()
        {
            self.state.set(ValidationState::TooManyFreeVariables);
            self.diagnostics
                .warning("specification allocates too many free XCH variables.");
            self.make_free_flux_suggestion(
                nfree_xch - (self.xch.matrix.ncols() - self.xch.matrix.nrows()),
                false,
            );
            return false;
        }
        if !self.stationary
            && self.pool.matrix.nrows() > 0
            && nfree_pool > self.pool.matrix.ncols() - self.pool.matrix.nrows()
        {
            self.state.set(ValidationState::TooManyFreeVariables);
            self.diagnostics
                .warning("specification allocates too many free POOL variables.");
            self.make_free_pool_suggestion(
                nfree_pool - (self.pool.matrix.ncols() - self.pool.matrix.nrows()),
            );
            return false;
        }

        // fewer free variables than degrees of freedom; the solver picks the
        // missing ones, their value defaults to 0
        if nfree_net < self.net.matrix.ncols() - self.net.matrix.nrows() {
            self.state.set(ValidationState::TooFewConstraints);
            self.diagnostics.warning(format!(
                "{} missing free NET flux(es) will be chosen automatically (value set to 0)",
                self.net.matrix.ncols() - self.net.matrix.nrows() - nfree_net
            ));
            return true;
        }
        if nfree_xch < self.xch.matrix.ncols() - self.xch.matrix.nrows() {
            self.state.set(ValidationState::TooFewConstraints);
            self.diagnostics.warning(format!(
                "{} missing free XCH flux(es) will be chosen automatically (value set to 0)",
                self.xch.matrix.ncols() - self.xch.matrix.nrows() - nfree_xch
            ));
            return true;
        }
        if !self.stationary
            && nfree_pool < self.pool.matrix.ncols() - self.pool.matrix.nrows()
        {
            self.state.set(ValidationState::TooFewConstraints);
            self.diagnostics.warning(format!(
                "{} missing free POOL size(es) will be chosen automatically (value set to 0)",
                self.pool.matrix.ncols() - self.pool.matrix.nrows() - nfree_pool
            ));
            return true;
        }

        true
    }

    /// Re-run the elimination of a flux class with a zero right hand side
    /// and, when the chosen free set caused the stall, name the declared
    /// free fluxes that could be given up instead.
    fn make_free_flux_suggestion(&self, dfree: usize, net: bool) {
        let class = if net { &self.net } else { &self.xch };
        let declared = if net { &self.free_net } else { &self.free_xch };
        let qa = rational_matrix(&class.matrix);
        let qb = rational_vector(&DVector::zeros(class.matrix.nrows()));
        let mut suggestions: Vec<String> = Vec::new();
        if let EliminationOutcome::FrozenPivotConflict { candidates, .. } =
            gauss_jordan(&qa, &qb, &class.frozen)
        {
            for column in candidates {
                if let Some(name) = self.network.reaction_name(column) {
                    if declared.iter().any(|free| free == name) {
                        suggestions.push(name.to_string());
                    }
                }
            }
        }
        if suggestions.is_empty() {
            self.diagnostics
                .warning("sorry, no suggestion how to solve this problem");
        } else {
            self.diagnostics.warning(format!(
                "hint: try deallocating {} out of these free {} fluxes:",
                dfree,
                if net { "NET" } else { "XCH" }
            ));
            for name in &suggestions {
                self.diagnostics.warning(format!("  {}", name));
            }
        }
    }

    fn make_free_pool_suggestion(&self, dfree: usize) {
        let qa = rational_matrix(&self.pool.matrix);
        let qb = rational_vector(&DVector::zeros(self.pool.matrix.nrows()));
        let mut suggestions: Vec<String> = Vec::new();
        if let EliminationOutcome::FrozenPivotConflict { candidates, .. } =
            gauss_jordan(&qa, &qb, &self.pool.frozen)
        {
            for column in candidates {
                if let Some(name) = self.network.metabolite_name(column) {
                    if self.free_pool.iter().any(|free| free == name) {
                        suggestions.push(name.to_string());
                    }
                }
            }
        }
        if suggestions.is_empty() {
            self.diagnostics
                .warning("sorry, no suggestion how to solve this problem");
        } else {
            self.diagnostics.warning(format!(
                "hint: try deallocating {} out of these free POOL sizes:",
                dfree
            ));
            for name in &suggestions {
                self.diagnostics.warning(format!("  {}", name));
            }
        }
    }

    // endregion Preparation

    // region Solving

    /// Solve the three class systems and derive the variable roles.
    ///
    /// Expects the state `prepare` left behind. On success the free lists
    /// hold the final free variable names, the constant offsets are imposed
    /// and the inequality feasibility has been established.
    fn solve(&mut self) -> bool {
        debug_assert!(matches!(
            self.state.get(),
            ValidationState::Unvalidated | ValidationState::TooFewConstraints
        ));
        self.free_net.clear();
        self.free_xch.clear();
        self.free_pool.clear();

        let s_cols = self.network.num_reactions();
        let s_rows = self.network.num_metabolites();

        // net system; the sizing checks guarantee rows <= cols
        let qa = rational_matrix(&self.net.matrix);
        let qb = rational_vector(&self.net.rhs);
        match gauss_jordan(&qa, &qb, &self.net.frozen) {
            EliminationOutcome::Solved(elimination) => {
                self.net.kernel = float_matrix(&elimination.kernel);
                self.net.permutation = elimination.permutation;
            }
            outcome => {
                self.diagnostics
                    .warning("solution of the NET constraint system failed:");
                self.diagnostics.warning(match outcome {
                    EliminationOutcome::Overdetermined => "  #rows > #cols!?",
                    EliminationOutcome::TooManyFree => "  too many free net fluxes!",
                    EliminationOutcome::FrozenPivotConflict { .. } => {
                        "  combination of free net fluxes is infeasible"
                    }
                    EliminationOutcome::Inconsistent => {
                        "  infeasible free net fluxes / system has no solution"
                    }
                    EliminationOutcome::Solved(_) => "  (unknown reason)",
                });
                self.state.set(ValidationState::InvalidFreeVariables);
                return false;
            }
        }
        if self.net.kernel.nrows() == 0 {
            self.state.set(ValidationState::TooManyFreeVariables);
            return false;
        }
        if self.state.get() == ValidationState::Unvalidated {
            self.state.set(ValidationState::Ok);
        }
        let ndep = s_cols - self.net.num_free();
        for j in 0..ndep {
            let k = self.net.permutation[j];
            debug_assert_eq!(self.roles_net[k], VariableRole::Undefined);
            self.roles_net[k] = VariableRole::Dependent;
        }
        for j in ndep..s_cols {
            let k = self.net.permutation[j];
            debug_assert!(matches!(
                self.roles_net[k],
                VariableRole::Undefined | VariableRole::Constraint
            ));
            if self.roles_net[k] == VariableRole::Undefined {
                self.roles_net[k] = VariableRole::Free;
                if let Some(name) = self.network.reaction_name(k) {
                    self.free_net.push(name.to_string());
                }
            }
        }

        // exchange system
        if self.xch.matrix.nrows() > 0 {
            let qa = rational_matrix(&self.xch.matrix);
            let qb = rational_vector(&self.xch.rhs);
            match gauss_jordan(&qa, &qb, &self.xch.frozen) {
                EliminationOutcome::Solved(elimination) => {
                    self.xch.kernel = float_matrix(&elimination.kernel);
                    self.xch.permutation = elimination.permutation;
                }
                outcome => {
                    self.diagnostics
                        .warning("solution of the XCH constraint system failed:");
                    self.diagnostics.warning(match outcome {
                        EliminationOutcome::Overdetermined => "  #rows > #cols!?",
                        EliminationOutcome::TooManyFree => "  too many free exchange fluxes!",
                        EliminationOutcome::FrozenPivotConflict { .. } => {
                            "  combination of free exchange fluxes is infeasible"
                        }
                        EliminationOutcome::Inconsistent => {
                            "  infeasible free exchange fluxes / system has no solution"
                        }
                        EliminationOutcome::Solved(_) => "  (unknown reason)",
                    });
                    self.state.set(ValidationState::InvalidFreeVariables);
                    return false;
                }
            }
            if self.xch.kernel.nrows() == 0 {
                self.state.set(ValidationState::TooManyFreeVariables);
                return false;
            }
            if self.state.get() == ValidationState::Unvalidated {
                self.state.set(ValidationState::Ok);
            }
            let ndep = s_cols - self.xch.num_free();
            for j in 0..ndep {
                let k = self.xch.permutation[j];
                debug_assert_eq!(self.roles_xch[k], VariableRole::Undefined);
                self.roles_xch[k] = VariableRole::Dependent;
            }
            for j in ndep..s_cols {
                let k = self.xch.permutation[j];
                debug_assert!(matches!(
                    self.roles_xch[k],
                    VariableRole::Undefined | VariableRole::Constraint
                ));
                if self.roles_xch[k] == VariableRole::Undefined {
                    self.roles_xch[k] = VariableRole::Free;
                    if let Some(name) = self.network.reaction_name(k) {
                        self.free_xch.push(name.to_string());
                    }
                }
            }
        } else {
            // no equality constraints for the exchange fluxes; mimic a
            // solved system with the kernel [0, eye]
            self.xch.kernel = DMatrix::zeros(s_cols, 1 + s_cols);
            self.xch.permutation = (0..s_cols).collect();
            for j in 0..s_cols {
                self.xch.kernel[(j, j + 1)] = 1.0;
                if self.roles_xch[j] == VariableRole::Undefined {
                    self.roles_xch[j] = VariableRole::Free;
                    if let Some(name) = self.network.reaction_name(j) {
                        self.free_xch.push(name.to_string());
                    }
                }
            }
        }

        // pool system; only populated for non-stationary models
        if self.pool.matrix.nrows() > 0 {
            let qa = rational_matrix(&self.pool.matrix);
            let qb = rational_vector(&self.pool.rhs);
            match gauss_jordan(&qa, &qb, &self.pool.frozen) {
                EliminationOutcome::Solved(elimination) => {
                    self.pool.kernel = float_matrix(&elimination.kernel);
                    self.pool.permutation = elimination.permutation;
                }
                outcome => {
                    self.diagnostics
                        .warning("solution of the POOL constraint system failed:");
                    self.diagnostics.warning(match outcome {
                        EliminationOutcome::Overdetermined => "  #rows > #cols!?",
                        EliminationOutcome::TooManyFree => "  too many free POOL sizes!",
                        EliminationOutcome::FrozenPivotConflict { .. } => {
                            "  combination of free POOL sizes is infeasible"
                        }
                        EliminationOutcome::Inconsistent => {
                            "  infeasible free POOL sizes / system has no solution"
                        }
                        EliminationOutcome::Solved(_) => "  (unknown reason)",
                    });
                    self.state.set(ValidationState::InvalidFreeVariables);
                    return false;
                }
            }
            if self.pool.kernel.nrows() == 0 {
                self.state.set(ValidationState::TooManyFreeVariables);
                return false;
            }
            if self.state.get() == ValidationState::Unvalidated {
                self.state.set(ValidationState::Ok);
            }
            let ndep = s_rows - self.pool.num_free();
            for j in 0..ndep {
                let k = self.pool.permutation[j];
                debug_assert_eq!(self.roles_pool[k], VariableRole::Undefined);
                self.roles_pool[k] = VariableRole::Dependent;
            }
            for j in ndep..s_rows {
                let k = self.pool.permutation[j];
                debug_assert!(matches!(
                    self.roles_pool[k],
                    VariableRole::Undefined | VariableRole::Constraint
                ));
                if self.roles_pool[k] == VariableRole::Undefined {
                    self.roles_pool[k] = VariableRole::Free;
                    if let Some(name) = self.network.metabolite_name(k) {
                        self.free_pool.push(name.to_string());
                    }
                }
            }
        } else {
            self.pool.kernel = DMatrix::zeros(s_rows, 1 + s_rows);
            self.pool.permutation = (0..s_rows).collect();
            for j in 0..s_rows {
                self.pool.kernel[(j, j + 1)] = 1.0;
                if self.roles_pool[j] == VariableRole::Undefined {
                    self.roles_pool[j] = VariableRole::Free;
                    if let Some(name) = self.network.metabolite_name(j) {
                        self.free_pool.push(name.to_string());
                    }
                }
            }
        }

        match self.state.get() {
            ValidationState::Ok | ValidationState::TooFewConstraints => {
                self.impose_constraints();
            }
            _ => return false,
        }

        // the free/dependent split fixes the variables of the inequality
        // system; impose_constraints must have filled the constant offsets
        if !self.validate_ineqs_feasibility() {
            return false;
        }

        // dependent variables fed only by pinned slots carry a fixed value;
        // tag and report them
        let quasi = self.report_quasi_constraint_fluxes(true);
        for name in quasi {
            if let Some(idx) = self.network.reaction_index(&name) {
                self.roles_net[idx] = VariableRole::QuasiConstraint;
            }
        }
        let quasi = self.report_quasi_constraint_fluxes(false);
        for name in quasi {
            if let Some(idx) = self.network.reaction_index(&name) {
                self.roles_xch[idx] = VariableRole::QuasiConstraint;
            }
        }
        let quasi = self.report_quasi_constraint_pools();
        for name in quasi {
            if let Some(idx) = self.network.metabolite_index(&name) {
                self.roles_pool[idx] = VariableRole::QuasiConstraint;
            }
        }

        true
    }

    /// Write the values of the simple equality constraints into the constant
    /// offset vectors of the solved class systems.
    fn impose_constraints(&mut self) {
        let s_cols = self.network.num_reactions();
        let s_rows = self.network.num_metabolites();

        let ndep_net = s_cols - self.net.num_free();
        let ndep_xch = s_cols - self.xch.num_free();
        let ndep_pool = s_rows - self.pool.num_free();

        self.net.positions = inverse_permutation(&self.net.permutation);
        self.xch.positions = inverse_permutation(&self.xch.permutation);
        self.pool.positions = inverse_permutation(&self.pool.permutation);

        self.net.v_const = DVector::zeros(1 + self.net.num_free());
        self.xch.v_const = DVector::zeros(1 + self.xch.num_free());
        self.pool.v_const = DVector::zeros(1 + self.pool.num_free());
        self.net.v_const[0] = 1.0;
        self.xch.v_const[0] = 1.0;
        self.pool.v_const[0] = 1.0;

        for constraint in &self.equalities {
            let class = constraint.class();
            if self.stationary && class == ParameterClass::Pool {
                continue;
            }
            let (name, value) = match constraint.simple_form() {
                Some(simple) => simple,
                None => continue,
            };
            match class {
                ParameterClass::Net => {
                    if let Some(idx) = self.network.reaction_index(&name) {
                        debug_assert_eq!(self.roles_net[idx], VariableRole::Constraint);
                        let slot = self.net.positions[idx];
                        self.net.v_const[slot - ndep_net + 1] = value;
                    }
                }
                ParameterClass::Xch => {
                    if let Some(idx) = self.network.reaction_index(&name) {
                        debug_assert_eq!(self.roles_xch[idx], VariableRole::Constraint);
                        let slot = self.xch.positions[idx];
                        self.xch.v_const[slot - ndep_xch + 1] = value;
                    }
                }
                ParameterClass::Pool => {
                    if let Some(idx) = self.network.metabolite_index(&name) {
                        debug_assert_eq!(self.roles_pool[idx], VariableRole::Constraint);
                        let slot = self.pool.positions[idx];
                        self.pool.v_const[slot - ndep_pool + 1] = value;
                    }
                }
            }
        }
    }

    // endregion Solving

    // region Inequality Feasibility

    /// Rewrite the inequality constraints over the free variables and check
    /// that the resulting polytope is not empty.
    fn validate_ineqs_feasibility(&self) -> bool {
        self.diagnostics
            .debug("checking feasibility of inequality constraints ...");
        let mut form = StandardForm::new();
        if !self.fill_standard_form(&mut form) {
            return false;
        }
        if form.num_variables() == 0 {
            self.diagnostics
                .warning("constraints / inequalities leave no degree of freedom");
            return true;
        }
        if !form.is_feasible(&self.diagnostics) {
            self.diagnostics
                .error("infeasible system of inequality constraints");
            self.state.set(ValidationState::InequalitiesInfeasible);
            form.dump(&self.diagnostics);
            return false;
        }
        self.diagnostics.debug("ok, inequalities are feasible");
        true
    }

    /// Pre-register the free variables and rewrite every inequality into a
    /// bound or a standard form row over those variables.
    ///
    /// Dependent and pinned variable occurrences are substituted by their
    /// closed form solution first, so the stored system mentions free
    /// variables only.
    fn fill_standard_form(&self, form: &mut StandardForm) -> bool {
        for name in self.flux_names_by_role(VariableRole::Free, true) {
            form.register_variable(format!("{}.n", name));
        }
        for name in self.flux_names_by_role(VariableRole::Free, false) {
            form.register_variable(format!("{}.x", name));
        }
        if !self.stationary {
            for name in self.pool_names_by_role(VariableRole::Free) {
                form.register_variable(name);
            }
        }

        for constraint in &self.inequalities {
            let class = constraint.class();
            if self.stationary && class == ParameterClass::Pool {
                continue;
            }
            let relation = constraint.relation();
            let mut bindings: IndexMap<String, Rc<Expr>> = IndexMap::new();
            for variable in relation.variables() {
                if let Some(resolved) = self.symbolic_value(&variable, class, false) {
                    bindings.insert(variable, resolved);
                }
            }
            let rewritten = relation.substitute(&bindings);
            let combination = match LinearCombination::from_relation(&rewritten) {
                Ok(combination) => combination,
                Err(_) => {
                    self.diagnostics.error(format!(
                        "inequality constraint \"{}\" is not linear",
                        constraint.name()
                    ));
                    self.state.set(ValidationState::NonlinearConstraints);
                    return false;
                }
            };
            if let Some((name, value)) = combination.simple_form() {
                match combination.normalized_op() {
                    Some(ComparisonOp::Leq) | Some(ComparisonOp::Lt) => {
                        if !form.set_upper_bound(&name, value) {
                            self.diagnostics.error(format!(
                                "failed setting upper bound for {} to {}",
                                name, value
                            ));
                            self.state.set(ValidationState::InequalitiesInfeasible);
                            return false;
                        }
                    }
                    Some(ComparisonOp::Geq) | Some(ComparisonOp::Gt) => {
                        if !form.set_lower_bound(&name, value) {
                            self.diagnostics.error(format!(
                                "failed setting lower bound for {} to {}",
                                name, value
                            ));
                            self.state.set(ValidationState::InequalitiesInfeasible);
                            return false;
                        }
                    }
                    _ => {
                        self.diagnostics.warning(format!(
                            "cannot impose inequality constraint \"{}\" as a bound",
                            constraint.name()
                        ));
                    }
                }
            } else {
                form.add_inequality(&combination);
            }
        }
        true
    }

    /// Numerically check all inequality constraints against the values in
    /// `values`. Violations are reported as warnings.
    fn validate_ineqs(&self, values: &CachedValues) -> bool {
        let mut result = true;
        for constraint in &self.inequalities {
            let combination = match constraint.linear_form() {
                Ok(combination) => combination,
                Err(_) => continue,
            };
            let mut sum = combination.constant();
            for (name, coefficient) in combination.variables() {
                let value = match constraint.class() {
                    ParameterClass::Net => {
                        self.network.reaction_index(name).map(|idx| values.vnet[idx])
                    }
                    ParameterClass::Xch => {
                        self.network.reaction_index(name).map(|idx| values.vxch[idx])
                    }
                    ParameterClass::Pool => self
                        .network
                        .metabolite_index(name)
                        .map(|idx| values.vpool[idx]),
                };
                debug_assert!(value.is_some(), "inequality names an unknown variable");
                sum += coefficient * value.unwrap_or(0.0);
            }
            let violated = match constraint.relation().op {
                ComparisonOp::Leq => !(sum <= self.cons_tol),
                ComparisonOp::Lt => !(sum < self.cons_tol),
                ComparisonOp::Geq => !(sum >= -self.cons_tol),
                ComparisonOp::Gt => !(sum > -self.cons_tol),
                ComparisonOp::Neq => !(sum.abs() < self.cons_tol),
                ComparisonOp::Eq => {
                    debug_assert!(false, "equality in the inequality list");
                    true
                }
            };
            if violated {
                result = false;
                self.diagnostics.warning(format!(
                    "{} ineq. constraint \"{}\" [{}] is violated by {:e}",
                    constraint.class(),
                    constraint.name(),
                    constraint.relation(),
                    sum
                ));
            }
        }
        result
    }

    // endregion Inequality Feasibility

    // region Evaluation

    /// Recompute all variable values from the current free variable values.
    ///
    /// On a degraded system the vectors fall back to zero fluxes and unit
    /// pool sizes and the dirty flag stays set, so every read keeps
    /// reporting the problem.
    fn evaluate_values(&self) {
        let allowed = matches!(
            self.state.get(),
            ValidationState::Ok
                | ValidationState::TooFewConstraints
                | ValidationState::LinearDependentConstraints
                | ValidationState::InequalitiesViolated
        );
        let solved = self.net.kernel.ncols() > 0
            && self.xch.kernel.ncols() > 0
            && self.pool.kernel.ncols() > 0;
        if !allowed || !solved {
            self.diagnostics
                .warning("failed to evaluate fluxes (inconsistent system)");
            let mut values = self.values.borrow_mut();
            values.vnet.fill(0.0);
            values.vxch.fill(0.0);
            values.vpool.fill(1.0);
            return;
        }

        let s_cols = self.network.num_reactions();
        let s_rows = self.network.num_metabolites();
        {
            let mut values = self.values.borrow_mut();

            // gather the current free variable values; slot 0 multiplies the
            // particular solution and stays zero here
            let ndep_net = s_cols - self.net.num_free();
            let mut v_free_net = DVector::zeros(1 + self.net.num_free());
            for j in ndep_net..s_cols {
                let k = self.net.permutation[j];
                if self.roles_net[k] == VariableRole::Free {
                    v_free_net[j - ndep_net + 1] = values.vnet[k];
                }
            }
            let ndep_xch = s_cols - self.xch.num_free();
            let mut v_free_xch = DVector::zeros(1 + self.xch.num_free());
            for j in ndep_xch..s_cols {
                let k = self.xch.permutation[j];
                if self.roles_xch[k] == VariableRole::Free {
                    v_free_xch[j - ndep_xch + 1] = values.vxch[k];
                }
            }
            let ndep_pool = s_rows - self.pool.num_free();
            let mut v_free_pool = DVector::zeros(1 + self.pool.num_free());
            for j in ndep_pool..s_rows {
                let k = self.pool.permutation[j];
                if self.roles_pool[k] == VariableRole::Free {
                    v_free_pool[j - ndep_pool + 1] = values.vpool[k];
                }
            }

            values.vnet = &self.net.kernel * (v_free_net + &self.net.v_const);
            values.vxch = &self.xch.kernel * (v_free_xch + &self.xch.v_const);
            values.vpool = &self.pool.kernel * (v_free_pool + &self.pool.v_const);

            // the residual is taken over the full stoichiometry, not the
            // row-reduced one
            let stoichiometry = self.network.stoichiometry().map(|entry| entry as f64);
            let residual = (stoichiometry * &values.vnet).norm();
            self.diagnostics.debug(format!(
                "residual of stoichiometry is ||S*v_(net)||_2 = {} ... ",
                residual
            ));
            if residual.log10() > CONFIGURATION.read().unwrap().residual_warning_exponent {
                self.diagnostics.warning(format!(
                    "bad residual of stoichiometry: ||S*v_(net)||_2 = {}",
                    residual
                ));
            }

            values.dirty = false;
        }

        let values = self.values.borrow();
        if !self.validate_ineqs(&values) {
            self.state.set(ValidationState::InequalitiesViolated);
        } else if self.state.get() == ValidationState::InequalitiesViolated {
            self.state.set(ValidationState::Ok);
        }
    }

    // endregion Evaluation

    // region Getters and Setters

    /// Current validation state
    pub fn validation_state(&self) -> ValidationState {
        self.state.get()
    }

    /// Collected log records of preparation, solving and evaluation
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The underlying network
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Whether the model was resolved as stationary
    pub fn is_stationary(&self) -> bool {
        self.stationary
    }

    /// Number of free variable mutations so far. Callers use this to detect
    /// staleness of their own derived caches.
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Tolerance used when checking inequality violations
    pub fn constraint_violation_tolerance(&self) -> f64 {
        self.cons_tol
    }

    pub fn set_constraint_violation_tolerance(&mut self, tolerance: f64) {
        self.cons_tol = tolerance;
    }

    /// Names of the free net fluxes, in stoichiometry column order
    pub fn free_net_fluxes(&self) -> &[String] {
        &self.free_net
    }

    /// Names of the free exchange fluxes, in stoichiometry column order
    pub fn free_xch_fluxes(&self) -> &[String] {
        &self.free_xch
    }

    /// Names of the free pool sizes, in stoichiometry row order
    pub fn free_pool_sizes(&self) -> &[String] {
        &self.free_pool
    }

    /// Net and exchange value of the named reaction
    ///
    /// Reading triggers a re-evaluation if a free variable changed since the
    /// last read. Unknown names yield `None`.
    pub fn flux(&self, name: &str) -> Option<(f64, f64)> {
        let idx = self.network.reaction_index(name)?;
        if self.values.borrow().dirty {
            self.evaluate_values();
        }
        let values = self.values.borrow();
        Some((values.vnet[idx], values.vxch[idx]))
    }

    /// Value of a suffixed flux name, `"{reaction}.n"` or `"{reaction}.x"`
    pub fn flux_value(&self, name: &str) -> Option<f64> {
        if let Some(base) = name.strip_suffix(".n") {
            self.flux(base).map(|(net, _)| net)
        } else if let Some(base) = name.strip_suffix(".x") {
            self.flux(base).map(|(_, xch)| xch)
        } else {
            None
        }
    }

    /// Pool size of the named metabolite
    pub fn pool_size(&self, name: &str) -> Option<f64> {
        let idx = self.network.metabolite_index(name)?;
        if self.values.borrow().dirty {
            self.evaluate_values();
        }
        let values = self.values.borrow();
        Some(values.vpool[idx])
    }

    /// Assign a free net flux
    ///
    /// # Returns
    /// An error if the name is unknown or the net component of the reaction
    /// is not free. Assigning the current value again is a no-op and does
    /// not count as a change.
    pub fn set_net_flux(&mut self, name: &str, value: f64) -> Result<(), FluxSystemError> {
        let idx = self
            .network
            .reaction_index(name)
            .ok_or_else(|| FluxSystemError::UnknownVariable(name.to_string()))?;
        if self.roles_net[idx] != VariableRole::Free {
            self.diagnostics.error(format!("{} (net) is not free", name));
            return Err(FluxSystemError::NotFree {
                name: name.to_string(),
                kind: "net",
            });
        }
        let mut values = self.values.borrow_mut();
        if values.vnet[idx] != value {
            values.vnet[idx] = value;
            values.dirty = true;
            self.change_count += 1;
        }
        Ok(())
    }

    /// Assign a free exchange flux
    pub fn set_xch_flux(&mut self, name: &str, value: f64) -> Result<(), FluxSystemError> {
        let idx = self
            .network
            .reaction_index(name)
            .ok_or_else(|| FluxSystemError::UnknownVariable(name.to_string()))?;
        if self.roles_xch[idx] != VariableRole::Free {
            self.diagnostics.error(format!("{} (xch) is not free", name));
            return Err(FluxSystemError::NotFree {
                name: name.to_string(),
                kind: "xch",
            });
        }
        let mut values = self.values.borrow_mut();
        if values.vxch[idx] != value {
            values.vxch[idx] = value;
            values.dirty = true;
            self.change_count += 1;
        }
        Ok(())
    }

    /// Assign a free flux through its suffixed name, `"{reaction}.n"` or
    /// `"{reaction}.x"`
    pub fn set_flux(&mut self, name: &str, value: f64) -> Result<(), FluxSystemError> {
        if let Some(base) = name.strip_suffix(".n") {
            self.set_net_flux(base, value)
        } else if let Some(base) = name.strip_suffix(".x") {
            self.set_xch_flux(base, value)
        } else {
            self.diagnostics.error(format!(
                "invalid suffix for net/xch flux name \"{}\"; expected (.n|.x)",
                name
            ));
            Err(FluxSystemError::MissingSuffix(name.to_string()))
        }
    }

    /// Assign a free pool size
    pub fn set_pool_size(&mut self, name: &str, value: f64) -> Result<(), FluxSystemError> {
        let idx = self
            .network
            .metabolite_index(name)
            .ok_or_else(|| FluxSystemError::UnknownVariable(name.to_string()))?;
        if self.roles_pool[idx] != VariableRole::Free {
            self.diagnostics.error(format!("{} (pool) is not free", name));
            return Err(FluxSystemError::NotFree {
                name: name.to_string(),
                kind: "pool",
            });
        }
        let mut values = self.values.borrow_mut();
        if values.vpool[idx] != value {
            values.vpool[idx] = value;
            values.dirty = true;
            self.change_count += 1;
        }
        Ok(())
    }

    // endregion Getters and Setters

    // region Roles and Names

    /// Role of the net (`net == true`) or exchange component of a reaction.
    /// Unknown names yield [`VariableRole::Undefined`].
    pub fn flux_role(&self, name: &str, net: bool) -> VariableRole {
        match self.network.reaction_index(name) {
            Some(idx) => {
                if net {
                    self.roles_net[idx]
                } else {
                    self.roles_xch[idx]
                }
            }
            None => VariableRole::Undefined,
        }
    }

    /// Role of a metabolite's pool size
    pub fn pool_role(&self, name: &str) -> VariableRole {
        match self.network.metabolite_index(name) {
            Some(idx) => self.roles_pool[idx],
            None => VariableRole::Undefined,
        }
    }

    /// Sorted reaction names whose net/exchange component has the given role
    pub fn flux_names_by_role(&self, role: VariableRole, net: bool) -> Vec<String> {
        let roles = if net { &self.roles_net } else { &self.roles_xch };
        let mut names: Vec<String> = roles
            .iter()
            .enumerate()
            .filter(|(_, &slot)| slot == role)
            .filter_map(|(idx, _)| self.network.reaction_name(idx).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Sorted metabolite names whose pool size has the given role. Asking
    /// for dependent pools folds the quasi-constraint pools in as well.
    pub fn pool_names_by_role(&self, role: VariableRole) -> Vec<String> {
        let mut names: Vec<String> = self
            .roles_pool
            .iter()
            .enumerate()
            .filter(|(_, &slot)| slot == role)
            .filter_map(|(idx, _)| self.network.metabolite_name(idx).map(str::to_string))
            .collect();
        if role == VariableRole::Dependent {
            names.extend(self.pool_names_by_role(VariableRole::QuasiConstraint));
        }
        names.sort();
        names
    }

    /// All reaction names, sorted
    pub fn flux_names(&self) -> Vec<String> {
        let mut names = self.network.reaction_names();
        names.sort();
        names
    }

    /// All metabolite names, sorted
    pub fn pool_names(&self) -> Vec<String> {
        let mut names = self.network.metabolite_names();
        names.sort();
        names
    }

    // endregion Roles and Names

    // region Symbolic Solutions

    fn class_symbol(name: &str, class: ParameterClass) -> Rc<Expr> {
        match class {
            ParameterClass::Net => Expr::symbol(format!("{}.n", name)),
            ParameterClass::Xch => Expr::symbol(format!("{}.x", name)),
            ParameterClass::Pool => Expr::symbol(name),
        }
    }

    fn class_system(&self, class: ParameterClass) -> &ClassSystem {
        match class {
            ParameterClass::Net => &self.net,
            ParameterClass::Xch => &self.xch,
            ParameterClass::Pool => &self.pool,
        }
    }

    fn class_roles(&self, class: ParameterClass) -> &[VariableRole] {
        match class {
            ParameterClass::Net => &self.roles_net,
            ParameterClass::Xch => &self.roles_xch,
            ParameterClass::Pool => &self.roles_pool,
        }
    }

    /// Closed form solution of one variable
    ///
    /// # Parameters
    /// - `name`: reaction or metabolite name, without suffix
    /// - `class`: which component of the variable is resolved
    /// - `formula`: with `true`, pinned variables appear as symbols; with
    ///   `false` they are replaced by their numeric value
    ///
    /// # Returns
    /// An expression over the suffixed free variable symbols (`"{name}.n"`,
    /// `"{name}.x"`, bare pool names), or `None` for unknown names or a
    /// system that was not solved.
    pub fn symbolic_value(
        &self,
        name: &str,
        class: ParameterClass,
        formula: bool,
    ) -> Option<Rc<Expr>> {
        match self.state.get() {
            ValidationState::Ok
            | ValidationState::TooFewConstraints
            | ValidationState::LinearDependentConstraints
            | ValidationState::InequalitiesViolated => {}
            _ => {
                debug_assert!(false, "symbolic query on an unresolved system");
                return None;
            }
        }
        let system = self.class_system(class);
        if system.kernel.ncols() == 0 {
            debug_assert!(false, "symbolic query before the system was solved");
            return None;
        }
        let (idx, total) = match class {
            ParameterClass::Net | ParameterClass::Xch => (
                self.network.reaction_index(name)?,
                self.network.num_reactions(),
            ),
            ParameterClass::Pool => (
                self.network.metabolite_index(name)?,
                self.network.num_metabolites(),
            ),
        };
        let roles = self.class_roles(class);
        let ndep = total - system.num_free();

        match roles[idx] {
            VariableRole::Undefined => {
                debug_assert!(false, "no variable may stay undefined after solving");
                None
            }
            VariableRole::Free => Some(Self::class_symbol(name, class)),
            VariableRole::Constraint => {
                if formula {
                    Some(Self::class_symbol(name, class))
                } else {
                    let slot = *system.positions.get(idx)?;
                    let offset = slot.checked_sub(ndep)?;
                    let value = *system.v_const.get(offset + 1)?;
                    Some(Expr::value(value))
                }
            }
            VariableRole::Dependent | VariableRole::QuasiConstraint => {
                let mut expr: Option<Rc<Expr>> = None;
                if system.kernel[(idx, 0)] != 0.0 {
                    expr = Some(Expr::value(system.kernel[(idx, 0)]));
                }
                for j in 1..system.kernel.ncols() {
                    let coefficient = system.kernel[(idx, j)];
                    if coefficient == 0.0 {
                        continue;
                    }
                    let k = system.permutation[j - 1 + ndep];
                    let slot_name = match class {
                        ParameterClass::Net | ParameterClass::Xch => {
                            self.network.reaction_name(k)?
                        }
                        ParameterClass::Pool => self.network.metabolite_name(k)?,
                    };
                    // a slot that carries a pinned value resolves to that
                    // value (or its symbol) instead of a free symbol
                    let slot_expr = if roles[k] == VariableRole::Constraint {
                        self.symbolic_value(slot_name, class, formula)?
                    } else {
                        Self::class_symbol(slot_name, class)
                    };
                    let magnitude = coefficient.abs();
                    let term = if magnitude == 1.0 {
                        slot_expr
                    } else {
                        Expr::mul(Expr::value(magnitude), slot_expr)
                    };
                    expr = Some(match expr {
                        None if coefficient < 0.0 => Expr::neg(term),
                        None => term,
                        Some(prev) if coefficient < 0.0 => Expr::sub(prev, term),
                        Some(prev) => Expr::add(prev, term),
                    });
                }
                Some(match expr {
                    Some(expr) => expr.fold(),
                    None => Expr::value(0.0),
                })
            }
        }
    }

    /// Closed form net and exchange solutions of one reaction
    pub fn symbolic_flux_net_xch(
        &self,
        name: &str,
        formula: bool,
    ) -> Option<(Rc<Expr>, Rc<Expr>)> {
        let net = self.symbolic_value(name, ParameterClass::Net, formula)?;
        let xch = self.symbolic_value(name, ParameterClass::Xch, formula)?;
        Some((net, xch))
    }

    /// Closed form forward and backward solutions of one reaction
    ///
    /// The forward flux is `xch + max(net, 0)`, the backward flux is
    /// `xch + max(-net, 0)`.
    pub fn symbolic_flux_fwd_bwd(
        &self,
        name: &str,
        formula: bool,
    ) -> Option<(Rc<Expr>, Rc<Expr>)> {
        let (net, xch) = self.symbolic_flux_net_xch(name, formula)?;
        let net = Self::tidy(net);
        let xch = Self::tidy(xch);
        let fwd = Expr::add(
            Rc::clone(&xch),
            Expr::max(Rc::clone(&net), Expr::value(0.0)),
        )
        .fold();
        let bwd = Expr::add(xch, Expr::max(Expr::neg(net), Expr::value(0.0))).fold();
        Some((fwd, bwd))
    }

    /// Collect like terms of a linear expression tree; non-linear trees are
    /// passed through unchanged.
    fn tidy(expr: Rc<Expr>) -> Rc<Expr> {
        match LinearCombination::from_expression(&expr) {
            Ok(combination) => combination.rebuild_plain(),
            Err(_) => expr,
        }
    }

    // endregion Symbolic Solutions

    // region Admissibility

    /// Whether the forward flux of a reaction can be non-zero under the
    /// current constraints and cached values.
    pub fn fwd_flux_admissible(&self, name: &str) -> bool {
        let idx = match self.network.reaction_index(name) {
            Some(idx) => idx,
            None => {
                debug_assert!(false, "admissibility query for an unknown reaction");
                return true;
            }
        };
        if self.roles_xch[idx] != VariableRole::Constraint {
            return true;
        }
        let values = self.values.borrow();
        if values.vxch[idx] != 0.0 {
            return true;
        }
        if self.roles_net[idx] == VariableRole::Constraint {
            return values.vnet[idx] > 0.0;
        }
        true
    }

    /// Whether the backward flux of a reaction can be non-zero under the
    /// current constraints and cached values.
    ///
    /// Beyond pinned values this also honors `>= 0` / `> 0` inequality
    /// constraints on the net flux, which rule out a backward component.
    pub fn bwd_flux_admissible(&self, name: &str) -> bool {
        let idx = match self.network.reaction_index(name) {
            Some(idx) => idx,
            None => {
                debug_assert!(false, "admissibility query for an unknown reaction");
                return true;
            }
        };
        if self.roles_xch[idx] != VariableRole::Constraint {
            return true;
        }
        let values = self.values.borrow();
        if values.vxch[idx] != 0.0 {
            return true;
        }
        if self.roles_net[idx] == VariableRole::Constraint {
            return values.vnet[idx] < 0.0;
        }
        for constraint in &self.inequalities {
            if constraint.class() == ParameterClass::Xch {
                continue;
            }
            let (simple_name, value) = match constraint.simple_form() {
                Some(simple) => simple,
                None => continue,
            };
            if !matches!(
                constraint.relation().op,
                ComparisonOp::Geq | ComparisonOp::Gt
            ) {
                continue;
            }
            if value != 0.0 {
                continue;
            }
            if simple_name == name {
                return false;
            }
        }
        true
    }

    // endregion Admissibility

    // region Reporting

    /// Find the dependent variables of a flux class whose kernel row only
    /// references pinned slots, and report them with their formula and value.
    fn report_quasi_constraint_fluxes(&self, net: bool) -> Vec<String> {
        let dependent = self.flux_names_by_role(VariableRole::Dependent, net);
        let system = if net { &self.net } else { &self.xch };
        let roles = if net { &self.roles_net } else { &self.roles_xch };
        let ndep = self.network.num_reactions() - system.num_free();

        let mut quasi = Vec::new();
        for name in dependent {
            let idx = match self.network.reaction_index(&name) {
                Some(idx) => idx,
                None => continue,
            };
            let mut is_quasi = true;
            for j in 1..system.kernel.ncols() {
                if system.kernel[(idx, j)] == 0.0 {
                    continue;
                }
                let k = system.permutation[j - 1 + ndep];
                if roles[k] == VariableRole::Free {
                    is_quasi = false;
                    break;
                }
            }
            if is_quasi {
                quasi.push(name);
            }
        }

        if !quasi.is_empty() {
            let class = if net {
                ParameterClass::Net
            } else {
                ParameterClass::Xch
            };
            self.diagnostics.info(format!(
                "the following {}-fluxes are completely determined by constraint-fluxes:",
                class
            ));
            for name in &quasi {
                let formula = self.symbolic_value(name, class, true);
                let value = self.symbolic_value(name, class, false);
                if let (Some(formula), Some(value)) = (formula, value) {
                    self.diagnostics.info(format!(
                        "   {}.{} [= {}] = {}",
                        name,
                        if net { 'n' } else { 'x' },
                        Self::tidy(formula),
                        value
                    ));
                }
            }
        }
        quasi
    }

    /// Pool size analog of [`Self::report_quasi_constraint_fluxes`]
    fn report_quasi_constraint_pools(&self) -> Vec<String> {
        let dependent = self.pool_names_by_role(VariableRole::Dependent);
        let ndep = self.network.num_metabolites() - self.pool.num_free();

        let mut quasi = Vec::new();
        for name in dependent {
            let idx = match self.network.metabolite_index(&name) {
                Some(idx) => idx,
                None => continue,
            };
            let mut is_quasi = true;
            for j in 1..self.pool.kernel.ncols() {
                if self.pool.kernel[(idx, j)] == 0.0 {
                    continue;
                }
                let k = self.pool.permutation[j - 1 + ndep];
                if self.roles_pool[k] == VariableRole::Free {
                    is_quasi = false;
                    break;
                }
            }
            if is_quasi {
                quasi.push(name);
            }
        }

        if !quasi.is_empty() {
            self.diagnostics
                .info("the following Poolsizes are completely determined by constraint-pools");
            for name in &quasi {
                let formula = self.symbolic_value(name, ParameterClass::Pool, true);
                let value = self.symbolic_value(name, ParameterClass::Pool, false);
                if let (Some(formula), Some(value)) = (formula, value) {
                    self.diagnostics.info(format!(
                        "   {} [= {}] = {}",
                        name,
                        Self::tidy(formula),
                        value
                    ));
                }
            }
        }
        quasi
    }

    /// Log the resolved system: per reaction values and roles, and at debug
    /// level the constraint catalog and the assumed flux directions.
    pub fn dump(&self) {
        if self.values.borrow().dirty {
            self.evaluate_values();
        }
        match self.state.get() {
            ValidationState::Ok
            | ValidationState::TooFewConstraints
            | ValidationState::LinearDependentConstraints
            | ValidationState::InequalitiesViolated => {}
            _ => self.diagnostics.warning("dumping invalid stoichiometry"),
        }

        let values = self.values.borrow();
        for k in 0..self.network.num_reactions() {
            let name = match self.network.reaction_name(k) {
                Some(name) => name,
                None => continue,
            };
            self.diagnostics.info(format!(
                "{:>18}: net={:+13.6} ({}), xch={:13.6} ({})",
                name,
                values.vnet[k],
                self.roles_net[k].code(),
                values.vxch[k],
                self.roles_xch[k].code()
            ));
        }
        if !self.stationary {
            for name in self.pool_names() {
                let idx = match self.network.metabolite_index(&name) {
                    Some(idx) => idx,
                    None => continue,
                };
                if values.vpool[idx] != 0.0 {
                    self.diagnostics.info(format!(
                        "{:>18}: pool={:+13.6} ({})",
                        name,
                        values.vpool[idx],
                        self.roles_pool[idx].code()
                    ));
                } else {
                    self.diagnostics
                        .info(format!("{:>18}: pool={:+13.6} (COFA)", name, 0.0));
                }
            }
        }

        self.diagnostics.debug("EQUALITY constraints:");
        for constraint in &self.equalities {
            self.diagnostics.debug(format!(
                "{}\t{}: {}",
                constraint.name(),
                constraint.class(),
                constraint.relation()
            ));
        }
        self.diagnostics.debug("INEQUALITY constraints:");
        for constraint in &self.inequalities {
            self.diagnostics.debug(format!(
                "{}\t{}: {}",
                constraint.name(),
                constraint.class(),
                constraint.relation()
            ));
        }
        self.diagnostics
            .debug("it is assumed that the following fwd/bwd fluxes are present:");
        for k in 0..self.network.num_reactions() {
            let name = match self.network.reaction_name(k) {
                Some(name) => name,
                None => continue,
            };
            self.diagnostics.debug(format!(
                "{:>20}: (fwd: {}, bwd: {})",
                name,
                if self.fwd_flux_admissible(name) {
                    "yes"
                } else {
                    " no"
                },
                if self.bwd_flux_admissible(name) {
                    "yes"
                } else {
                    " no"
                }
            ));
        }
    }

    /// Snapshot of the current values and roles for serialization
    pub fn report(&self) -> SystemReport {
        if self.values.borrow().dirty {
            self.evaluate_values();
        }
        let values = self.values.borrow();
        let fluxes = (0..self.network.num_reactions())
            .map(|k| FluxReport {
                name: self
                    .network
                    .reaction_name(k)
                    .map(str::to_string)
                    .unwrap_or_default(),
                net: values.vnet[k],
                net_role: self.roles_net[k].code().to_string(),
                xch: values.vxch[k],
                xch_role: self.roles_xch[k].code().to_string(),
            })
            .collect();
        let pools = if self.stationary {
            Vec::new()
        } else {
            (0..self.network.num_metabolites())
                .map(|k| PoolReport {
                    name: self
                        .network
                        .metabolite_name(k)
                        .map(str::to_string)
                        .unwrap_or_default(),
                    size: values.vpool[k],
                    role: self.roles_pool[k].code().to_string(),
                })
                .collect()
        };
        SystemReport {
            validation_state: self.state.get().to_string(),
            stationary: self.stationary,
            change_count: self.change_count,
            fluxes,
            pools,
        }
    }

    // endregion Reporting
}

#[cfg(test)]
mod tests {
    use super::*;

    /// B is produced by v1 and consumed by v2, so v1 = v2 at steady state
    fn linear_chain() -> Rc<Network> {
        Rc::new(
            Network::new(
                vec!["B".to_string()],
                vec!["v1".to_string(), "v2".to_string()],
                vec![
                    ("B".to_string(), "v1".to_string(), 1),
                    ("B".to_string(), "v2".to_string(), -1),
                ],
            )
            .unwrap(),
        )
    }

    /// Both reactions produce B, so the balance forces v2 = -v1
    fn joining_chain() -> Rc<Network> {
        Rc::new(
            Network::new(
                vec!["B".to_string()],
                vec!["v1".to_string(), "v2".to_string()],
                vec![
                    ("B".to_string(), "v1".to_string(), 1),
                    ("B".to_string(), "v2".to_string(), 1),
                ],
            )
            .unwrap(),
        )
    }

    /// v1 touches no metabolite, v2 and v3 balance B
    fn branched_chain() -> Rc<Network> {
        Rc::new(
            Network::new(
                vec!["B".to_string()],
                vec!["v1".to_string(), "v2".to_string(), "v3".to_string()],
                vec![
                    ("B".to_string(), "v2".to_string(), 1),
                    ("B".to_string(), "v3".to_string(), -1),
                ],
            )
            .unwrap(),
        )
    }

    /// One reaction converting B into C; more metabolites than reactions
    fn two_pool_chain() -> Rc<Network> {
        Rc::new(
            Network::new(
                vec!["B".to_string(), "C".to_string()],
                vec!["v1".to_string()],
                vec![
                    ("B".to_string(), "v1".to_string(), -1),
                    ("C".to_string(), "v1".to_string(), 1),
                ],
            )
            .unwrap(),
        )
    }

    fn constraint(name: &str, class: ParameterClass, text: &str) -> Constraint {
        Constraint::from_text(name, class, text).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn default_options() -> FluxSystemOptions {
        FluxSystemOptionsBuilder::default().build().unwrap()
    }

    fn with_free_net(list: &[&str]) -> FluxSystemOptions {
        FluxSystemOptionsBuilder::default()
            .free_net(names(list))
            .build()
            .unwrap()
    }

    #[test]
    fn test_options_builder_defaults() {
        let options = default_options();
        assert!(options.stationary);
        assert!(options.free_net.is_empty());
        assert!(options.free_xch.is_empty());
        assert!(options.free_pool.is_empty());
        assert_eq!(options.constraint_tolerance, 1e-9);
    }

    #[test]
    fn test_dependent_flux_follows_free() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.free_net_fluxes(), names(&["v1"]));
        assert_eq!(system.free_xch_fluxes(), names(&["v1", "v2"]));
        assert_eq!(system.flux_role("v1", true), VariableRole::Free);
        assert_eq!(system.flux_role("v2", true), VariableRole::Dependent);

        system.set_net_flux("v1", 3.0).unwrap();
        assert_eq!(system.flux("v1"), Some((3.0, 0.0)));
        assert_eq!(system.flux("v2"), Some((3.0, 0.0)));
    }

    #[test]
    fn test_change_count_skips_no_op_assignments() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        assert_eq!(system.change_count(), 0);
        system.set_net_flux("v1", 3.0).unwrap();
        assert_eq!(system.change_count(), 1);
        system.set_net_flux("v1", 3.0).unwrap();
        assert_eq!(system.change_count(), 1);
        system.set_net_flux("v1", 4.0).unwrap();
        assert_eq!(system.change_count(), 2);
    }

    #[test]
    fn test_negated_dependent_solution() {
        let mut system = FluxSystem::new(joining_chain(), Vec::new(), with_free_net(&["v1"]));
        assert_eq!(system.validation_state(), ValidationState::Ok);
        system.set_net_flux("v1", 3.0).unwrap();
        assert_eq!(system.flux("v2"), Some((-3.0, 0.0)));
        let net = system
            .symbolic_value("v2", ParameterClass::Net, false)
            .unwrap();
        assert_eq!(net.to_string(), "(-v1.n)");
    }

    #[test]
    fn test_symbolic_solution_of_dependent_flux() {
        let system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        let dependent = system
            .symbolic_value("v2", ParameterClass::Net, false)
            .unwrap();
        assert_eq!(dependent.to_string(), "v1.n");
        let free = system
            .symbolic_value("v1", ParameterClass::Net, false)
            .unwrap();
        assert_eq!(free.to_string(), "v1.n");
        assert!(system
            .symbolic_value("vx", ParameterClass::Net, false)
            .is_none());
    }

    #[test]
    fn test_flux_setter_requires_component_suffix() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        match system.set_flux("v1", 1.0) {
            Err(FluxSystemError::MissingSuffix(name)) => assert_eq!(name, "v1"),
            other => panic!("expected a missing-suffix error, got {:?}", other),
        }
        assert!(system.diagnostics().has_message_containing(
            "invalid suffix for net/xch flux name \"v1\"; expected (.n|.x)"
        ));

        system.set_flux("v1.n", 3.0).unwrap();
        system.set_flux("v1.x", 0.25).unwrap();
        assert_eq!(system.flux_value("v1.n"), Some(3.0));
        assert_eq!(system.flux_value("v1.x"), Some(0.25));
        assert_eq!(system.flux_value("v1"), None);
        assert_eq!(
            system.set_flux("vx.n", 1.0),
            Err(FluxSystemError::UnknownVariable("vx".to_string()))
        );
    }

    #[test]
    fn test_value_constraint_pins_the_whole_chain() {
        let mut system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 = 2")],
            default_options(),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.flux("v1"), Some((2.0, 0.0)));
        assert_eq!(system.flux("v2"), Some((2.0, 0.0)));
        assert_eq!(system.flux_role("v1", true), VariableRole::Constraint);
        assert_eq!(system.flux_role("v2", true), VariableRole::QuasiConstraint);
        assert!(system
            .flux_names_by_role(VariableRole::Dependent, true)
            .is_empty());
        assert!(system
            .diagnostics()
            .has_message_containing("completely determined by constraint-fluxes"));
        assert!(system
            .diagnostics()
            .has_message_containing("   v2.n [= v1.n] = 2"));

        match system.set_net_flux("v2", 1.0) {
            Err(FluxSystemError::NotFree { name, kind }) => {
                assert_eq!(name, "v2");
                assert_eq!(kind, "net");
            }
            other => panic!("expected a not-free error, got {:?}", other),
        }
        assert!(system
            .diagnostics()
            .has_message_containing("v2 (net) is not free"));
    }

    #[test]
    fn test_general_constraint_pins_the_network() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 + v2 = 2")],
            default_options(),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.flux("v1"), Some((1.0, 0.0)));
        assert_eq!(system.flux("v2"), Some((1.0, 0.0)));
        assert_eq!(system.flux_role("v1", true), VariableRole::QuasiConstraint);
        assert_eq!(system.flux_role("v2", true), VariableRole::QuasiConstraint);
        assert!(system
            .diagnostics()
            .has_message_containing("   v1.n [= 1] = 1"));
    }

    #[test]
    fn test_free_declaration_collides_with_value_constraint() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 = 2")],
            with_free_net(&["v1"]),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::InvalidFreeVariables
        );
        assert!(system
            .diagnostics()
            .has_message_containing("free fluxes (as v1 (net)) must not be constraint"));
    }

    #[test]
    fn test_unknown_free_flux_is_rejected() {
        let system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["vx"]));
        assert_eq!(
            system.validation_state(),
            ValidationState::InvalidFreeVariables
        );
        assert!(system
            .diagnostics()
            .has_message_containing("free net flux \"vx\" is not a reaction of the network"));
    }

    #[test]
    fn test_unknown_constraint_variable_is_rejected() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "vx = 2")],
            default_options(),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::InvalidConstraints
        );
        assert!(system
            .diagnostics()
            .has_message_containing("preparation of constraint system failed"));
    }

    #[test]
    fn test_nonlinear_equality_is_rejected() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 * v2 = 2")],
            default_options(),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::NonlinearConstraints
        );
        assert!(system
            .diagnostics()
            .has_message_containing("preparation of constraint system failed"));
    }

    #[test]
    fn test_linearly_dependent_constraints_are_rejected() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("c1", ParameterClass::Net, "v1 + v2 = 2"),
                constraint("c2", ParameterClass::Net, "2*v1 + 2*v2 = 4"),
            ],
            default_options(),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::LinearDependentConstraints
        );
        assert!(system.diagnostics().has_message_containing(
            "linear dependencies between user-specified net constraints!"
        ));
    }

    #[test]
    fn test_constraint_repeating_the_stoichiometry_is_eliminated() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 - v2 = 0")],
            default_options(),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::TooFewConstraints
        );
        assert!(system
            .diagnostics()
            .has_message_containing("implicitly contained in the stoichiometry"));
        assert_eq!(system.free_net_fluxes(), names(&["v2"]));
    }

    #[test]
    fn test_missing_free_fluxes_are_chosen_automatically() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), default_options());
        assert_eq!(
            system.validation_state(),
            ValidationState::TooFewConstraints
        );
        assert!(system.diagnostics().has_message_containing(
            "1 missing free NET flux(es) will be chosen automatically (value set to 0)"
        ));
        assert_eq!(system.free_net_fluxes(), names(&["v2"]));
        assert_eq!(system.flux("v1"), Some((0.0, 0.0)));
        system.set_net_flux("v2", 5.0).unwrap();
        assert_eq!(system.flux("v1"), Some((5.0, 0.0)));
    }

    #[test]
    fn test_too_many_free_variables_without_suggestion() {
        let system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1", "v2"]));
        assert_eq!(
            system.validation_state(),
            ValidationState::TooManyFreeVariables
        );
        assert!(system
            .diagnostics()
            .has_message_containing("specification allocates too many free NET variables."));
        assert!(system
            .diagnostics()
            .has_message_containing("sorry, no suggestion how to solve this problem"));
    }

    #[test]
    fn test_independent_constraint_surplus_is_over_determined() {
        // two independent constraints plus the stoichiometry row exceed the
        // two reaction columns
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("c_sum", ParameterClass::Net, "v1 + v2 = 2"),
                constraint("c_mix", ParameterClass::Net, "v1 - 2*v2 = 0"),
            ],
            default_options(),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::TooManyConstraints
        );
        assert!(system
            .diagnostics()
            .has_message_containing("specification allocates too many NET constraints."));
        assert!(system
            .diagnostics()
            .has_message_containing("preparation of constraint system failed"));
    }

    #[test]
    fn test_free_flux_hint_names_deallocation_candidates() {
        let system = FluxSystem::new(
            branched_chain(),
            Vec::new(),
            with_free_net(&["v1", "v2", "v3"]),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::TooManyFreeVariables
        );
        assert!(system
            .diagnostics()
            .has_message_containing("hint: try deallocating 1 out of these free NET fluxes:"));
        let warnings = system.diagnostics().warnings();
        assert!(warnings.iter().any(|message| message.as_str() == "  v2"));
        assert!(warnings.iter().any(|message| message.as_str() == "  v3"));
        assert!(!warnings.iter().any(|message| message.as_str() == "  v1"));
    }

    #[test]
    fn test_crossing_bounds_are_infeasible() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("c_up", ParameterClass::Net, "v1 <= 2"),
                constraint("c_lo", ParameterClass::Net, "v1 >= 3"),
            ],
            with_free_net(&["v1"]),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::InequalitiesInfeasible
        );
        assert!(system
            .diagnostics()
            .has_message_containing("failed setting lower bound for v1.n to 3"));
        assert!(system
            .diagnostics()
            .has_message_containing("solution of constraint system failed"));
    }

    #[test]
    fn test_contradictory_inequality_rows_are_infeasible() {
        let system = FluxSystem::new(
            branched_chain(),
            vec![
                constraint("c_a", ParameterClass::Net, "v1 + v2 >= 1"),
                constraint("c_b", ParameterClass::Net, "v1 + v2 <= -1"),
            ],
            with_free_net(&["v1", "v2"]),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::InequalitiesInfeasible
        );
        assert!(system
            .diagnostics()
            .has_message_containing("infeasible system of inequality constraints"));
    }

    #[test]
    fn test_not_equal_inequality_is_not_a_bound() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c_neq", ParameterClass::Net, "v1 != 3")],
            with_free_net(&["v1"]),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert!(system
            .diagnostics()
            .has_message_containing("cannot impose inequality constraint \"c_neq\" as a bound"));
    }

    #[test]
    fn test_violated_inequality_is_flagged_and_recovers() {
        let mut system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c_lo", ParameterClass::Net, "v1 >= 1")],
            with_free_net(&["v1"]),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);

        // the default value 0 violates the lower bound
        assert_eq!(system.flux("v1"), Some((0.0, 0.0)));
        assert_eq!(
            system.validation_state(),
            ValidationState::InequalitiesViolated
        );
        assert!(system
            .diagnostics()
            .has_message_containing("NET ineq. constraint \"c_lo\" [v1 >= 1] is violated by"));

        system.set_net_flux("v1", 2.0).unwrap();
        assert_eq!(system.flux("v1"), Some((2.0, 0.0)));
        assert_eq!(system.validation_state(), ValidationState::Ok);
    }

    #[test]
    fn test_degraded_system_keeps_reporting_on_reads() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![constraint("c1", ParameterClass::Net, "v1 = 2")],
            with_free_net(&["v1"]),
        );
        assert_eq!(
            system.validation_state(),
            ValidationState::InvalidFreeVariables
        );
        assert_eq!(system.flux("v1"), Some((0.0, 0.0)));
        assert_eq!(system.pool_size("B"), Some(1.0));
        let failures = system
            .diagnostics()
            .warnings()
            .iter()
            .filter(|message| message.contains("failed to evaluate fluxes"))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_clean_reads_do_not_reevaluate() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        system.set_net_flux("v1", 3.0).unwrap();
        system.flux("v1");
        let after_first = system.diagnostics().len();
        system.flux("v2");
        system.pool_size("B");
        assert_eq!(system.diagnostics().len(), after_first);
    }

    #[test]
    fn test_exchange_value_constraint_pins_component() {
        let mut system = FluxSystem::new(
            linear_chain(),
            vec![constraint("cx", ParameterClass::Xch, "v1 = 0.5")],
            with_free_net(&["v1"]),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.free_xch_fluxes(), names(&["v2"]));
        assert_eq!(system.flux_role("v1", false), VariableRole::Constraint);
        assert_eq!(system.flux("v1"), Some((0.0, 0.5)));

        match system.set_xch_flux("v1", 0.1) {
            Err(FluxSystemError::NotFree { kind, .. }) => assert_eq!(kind, "xch"),
            other => panic!("expected a not-free error, got {:?}", other),
        }
        system.set_xch_flux("v2", 0.25).unwrap();
        assert_eq!(system.flux("v2"), Some((0.0, 0.25)));
    }

    #[test]
    fn test_pool_constraint_resolves_in_non_stationary_mode() {
        let mut system = FluxSystem::new(
            linear_chain(),
            vec![constraint("p1", ParameterClass::Pool, "B = 4")],
            FluxSystemOptionsBuilder::default()
                .stationary(false)
                .free_net(names(&["v1"]))
                .build()
                .unwrap(),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert!(system.free_pool_sizes().is_empty());
        assert_eq!(system.pool_role("B"), VariableRole::Constraint);
        assert_eq!(system.pool_size("B"), Some(4.0));
        match system.set_pool_size("B", 1.0) {
            Err(FluxSystemError::NotFree { kind, .. }) => assert_eq!(kind, "pool"),
            other => panic!("expected a not-free error, got {:?}", other),
        }
        assert!(system
            .diagnostics()
            .has_message_containing("user requests 0 free pool sizes."));
    }

    #[test]
    fn test_stationary_mode_ignores_pool_constraints() {
        let mut system = FluxSystem::new(
            linear_chain(),
            vec![constraint("p1", ParameterClass::Pool, "B = 4")],
            with_free_net(&["v1"]),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.free_pool_sizes(), names(&["B"]));
        assert_eq!(system.pool_role("B"), VariableRole::Free);
        assert_eq!(system.pool_size("B"), Some(1.0));
        system.set_pool_size("B", 2.5).unwrap();
        assert_eq!(system.pool_size("B"), Some(2.5));
        assert!(system.report().pools.is_empty());
    }

    #[test]
    fn test_pool_quasi_constraints_report_their_formula() {
        let system = FluxSystem::new(
            two_pool_chain(),
            vec![
                constraint("p1", ParameterClass::Pool, "C = 2 * B"),
                constraint("p2", ParameterClass::Pool, "B = 4"),
            ],
            FluxSystemOptionsBuilder::default()
                .stationary(false)
                .build()
                .unwrap(),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.pool_size("B"), Some(4.0));
        assert_eq!(system.pool_size("C"), Some(8.0));
        assert_eq!(system.pool_role("B"), VariableRole::Constraint);
        assert_eq!(system.pool_role("C"), VariableRole::QuasiConstraint);
        assert_eq!(
            system.pool_names_by_role(VariableRole::Dependent),
            names(&["C"])
        );
        assert!(system.diagnostics().has_message_containing(
            "the following Poolsizes are completely determined by constraint-pools"
        ));
        assert!(system
            .diagnostics()
            .has_message_containing("   C [= (2 * B)] = 8"));
        assert!(system
            .diagnostics()
            .has_message_containing("size of stoichiometry is (2x1); numerical rank is 1."));
    }

    #[test]
    fn test_symbolic_forward_backward_split() {
        let system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        let (fwd, bwd) = system.symbolic_flux_fwd_bwd("v2", true).unwrap();
        assert_eq!(fwd.to_string(), "(v2.x + max(v1.n, 0))");
        assert_eq!(bwd.to_string(), "(v2.x + max((-v1.n), 0))");
    }

    #[test]
    fn test_direction_admissibility_follows_pinned_values() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("cn", ParameterClass::Net, "v1 = 2"),
                constraint("cx", ParameterClass::Xch, "v1 = 0"),
            ],
            default_options(),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.flux("v1"), Some((2.0, 0.0)));
        assert!(system.fwd_flux_admissible("v1"));
        assert!(!system.bwd_flux_admissible("v1"));
        assert!(system.fwd_flux_admissible("v2"));
        assert!(system.bwd_flux_admissible("v2"));
    }

    #[test]
    fn test_backward_admissibility_honors_nonnegative_net() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("cx", ParameterClass::Xch, "v1 = 0"),
                constraint("lo", ParameterClass::Net, "v1 >= 0"),
            ],
            with_free_net(&["v1"]),
        );
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.flux("v1"), Some((0.0, 0.0)));
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert!(system.fwd_flux_admissible("v1"));
        assert!(!system.bwd_flux_admissible("v1"));
    }

    #[test]
    fn test_dump_renders_values_and_directions() {
        let system = FluxSystem::new(
            linear_chain(),
            vec![
                constraint("cn", ParameterClass::Net, "v1 = 2"),
                constraint("cx", ParameterClass::Xch, "v1 = 0"),
            ],
            default_options(),
        );
        system.dump();
        let diagnostics = system.diagnostics();
        assert!(!diagnostics.has_message_containing("dumping invalid stoichiometry"));
        assert!(diagnostics.has_message_containing("v1: net="));
        assert!(diagnostics.has_message_containing("EQUALITY constraints:"));
        assert!(diagnostics
            .has_message_containing("it is assumed that the following fwd/bwd fluxes are present:"));
        assert!(diagnostics.has_message_containing("(fwd: yes, bwd:  no)"));
    }

    #[test]
    fn test_report_serializes_current_state() {
        let mut system = FluxSystem::new(linear_chain(), Vec::new(), with_free_net(&["v1"]));
        system.set_net_flux("v1", 3.0).unwrap();
        let report = system.report();
        assert_eq!(report.validation_state, "validated");
        assert!(report.stationary);
        assert_eq!(report.change_count, 1);
        assert!(report.pools.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["fluxes"][0]["name"], "v1");
        assert_eq!(json["fluxes"][0]["net"], 3.0);
        assert_eq!(json["fluxes"][0]["net_role"], "FREE");
        assert_eq!(json["fluxes"][1]["name"], "v2");
        assert_eq!(json["fluxes"][1]["net_role"], "DEPD");

        let text = report.to_json().unwrap();
        assert!(text.contains("\"validation_state\": \"validated\""));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float_reduction() {
        let network = Rc::new(
            Network::new(
                vec!["B".to_string(), "C".to_string()],
                vec!["v1".to_string(), "v2".to_string()],
                vec![
                    ("B".to_string(), "v1".to_string(), i64::MAX),
                    ("B".to_string(), "v2".to_string(), 1),
                    ("C".to_string(), "v1".to_string(), 1),
                    ("C".to_string(), "v2".to_string(), i64::MAX),
                ],
            )
            .unwrap(),
        );
        let system = FluxSystem::new(network, Vec::new(), default_options());
        assert!(system
            .diagnostics()
            .has_message_containing("integer overflow in row reduction"));
        assert_eq!(system.validation_state(), ValidationState::Ok);
        assert_eq!(system.flux("v1"), Some((0.0, 0.0)));
        assert_eq!(system.flux_role("v1", true), VariableRole::QuasiConstraint);
        assert_eq!(system.flux_role("v2", true), VariableRole::QuasiConstraint);
    }
}
