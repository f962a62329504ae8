//! Flux constraints and the validation states of the constraint system

use std::fmt::{Display, Formatter};

use crate::expr::linear::{LinearCombination, LinearError};
use crate::expr::tree::Relation;
use crate::expr::{parse_relation, ExprParseError};

/// Which parameter family a constraint or variable belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterClass {
    /// Net flux component of a reaction
    Net,
    /// Exchange flux component of a reaction
    Xch,
    /// Pool size of a metabolite
    Pool,
}

impl Display for ParameterClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterClass::Net => write!(f, "NET"),
            ParameterClass::Xch => write!(f, "XCH"),
            ParameterClass::Pool => write!(f, "POOL"),
        }
    }
}

/// Role a variable ends up with after constraint resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariableRole {
    /// Not yet classified
    #[default]
    Undefined,
    /// Determined by the equality system once the free variables are set
    Dependent,
    /// Dependent, but fully determined by constraint variables alone
    QuasiConstraint,
    /// Value chosen freely, either declared by the user or picked
    /// automatically to close an underdetermined system
    Free,
    /// Pinned to a fixed value by a simple equality constraint
    Constraint,
}

impl VariableRole {
    /// Four letter code used in dumps and reports
    pub fn code(&self) -> &'static str {
        match self {
            VariableRole::Undefined => "UDEF",
            VariableRole::Dependent => "DEPD",
            VariableRole::QuasiConstraint => "QCON",
            VariableRole::Free => "FREE",
            VariableRole::Constraint => "CONS",
        }
    }
}

impl Display for VariableRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Result of validating the constraint system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    /// Validation completed successfully
    Ok,
    /// Validation has not run yet
    Unvalidated,
    /// Too few constraints, missing free variables were chosen automatically
    TooFewConstraints,
    /// More constraints than the system has variables
    TooManyConstraints,
    /// The user supplied constraints are linearly dependent
    LinearDependentConstraints,
    /// A constraint is not linear
    NonlinearConstraints,
    /// A constraint is invalid or names an unknown variable
    InvalidConstraints,
    /// More variables were declared free than the system leaves open
    TooManyFreeVariables,
    /// Free variable declarations collide with constraints
    InvalidFreeVariables,
    /// The current values violate an inequality constraint
    InequalitiesViolated,
    /// The inequality constraints have no solution at all
    InequalitiesInfeasible,
}

impl Display for ValidationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ValidationState::Ok => "validated",
            ValidationState::Unvalidated => "not yet validated",
            ValidationState::TooFewConstraints => "too few constraints / free variables",
            ValidationState::TooManyConstraints => "too many constraints / free variables",
            ValidationState::LinearDependentConstraints => "linearly dependent constraints",
            ValidationState::NonlinearConstraints => "nonlinear constraint",
            ValidationState::InvalidConstraints => "invalid constraint / unknown variable name",
            ValidationState::TooManyFreeVariables => "too many variables declared free",
            ValidationState::InvalidFreeVariables => "free variables collide with constraints",
            ValidationState::InequalitiesViolated => {
                "current values violate the inequality constraints"
            }
            ValidationState::InequalitiesInfeasible => "inequality constraints have no solution",
        };
        write!(f, "{}", text)
    }
}

/// A named equality or inequality constraint on one parameter class
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Name of the constraint, used in diagnostics
    name: String,
    /// Parameter family the constraint applies to
    class: ParameterClass,
    /// The parsed constraint relation
    relation: Relation,
}

impl Constraint {
    /// Create a constraint from an already parsed relation
    pub fn new(name: impl Into<String>, class: ParameterClass, relation: Relation) -> Constraint {
        Constraint {
            name: name.into(),
            class,
            relation,
        }
    }

    /// Parse `text` into a constraint relation
    ///
    /// # Parameters
    /// - `name`: name used when reporting on this constraint
    /// - `class`: parameter family the constraint applies to
    /// - `text`: constraint string, e.g. `"v_upt = 1.5"`
    pub fn from_text(
        name: impl Into<String>,
        class: ParameterClass,
        text: &str,
    ) -> Result<Constraint, ExprParseError> {
        Ok(Constraint {
            name: name.into(),
            class,
            relation: parse_relation(text)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> ParameterClass {
        self.class
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    /// Whether the constraint is an equality
    pub fn is_equality(&self) -> bool {
        self.relation.is_equality()
    }

    /// Flatten the constraint into a linear combination
    pub fn linear_form(&self) -> Result<LinearCombination, LinearError> {
        LinearCombination::from_relation(&self.relation)
    }

    /// If the constraint pins exactly one variable to a value, return the
    /// variable name and that value
    pub fn simple_form(&self) -> Option<(String, f64)> {
        self.linear_form().ok()?.simple_form()
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.relation)
    }
}
