//! This module provides the immutable expression tree used for constraint
//! arithmetic and symbolic flux formulas.
//!
//! Nodes are reference counted and never mutated in place; substitution
//! produces a new tree that shares every untouched subtree with the original.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

/// A node of an arithmetic expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Value(f64),
    /// Named variable
    Symbol(String),
    /// Arithmetic operation on child expressions (see [`ExprOperation`])
    Operation(ExprOperation),
}

/// Possible operations in an expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum ExprOperation {
    Add { left: Rc<Expr>, right: Rc<Expr> },
    Sub { left: Rc<Expr>, right: Rc<Expr> },
    Mul { left: Rc<Expr>, right: Rc<Expr> },
    Div { left: Rc<Expr>, right: Rc<Expr> },
    Neg { val: Rc<Expr> },
    Min { left: Rc<Expr>, right: Rc<Expr> },
    Max { left: Rc<Expr>, right: Rc<Expr> },
    Abs { val: Rc<Expr> },
}

impl Expr {
    /// Create a literal node
    pub fn value(value: f64) -> Rc<Expr> {
        Rc::new(Expr::Value(value))
    }

    /// Create a variable node
    pub fn symbol(name: impl Into<String>) -> Rc<Expr> {
        Rc::new(Expr::Symbol(name.into()))
    }

    pub fn add(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Add { left, right }))
    }

    pub fn sub(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Sub { left, right }))
    }

    pub fn mul(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Mul { left, right }))
    }

    pub fn div(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Div { left, right }))
    }

    pub fn neg(val: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Neg { val }))
    }

    pub fn min(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Min { left, right }))
    }

    pub fn max(left: Rc<Expr>, right: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Max { left, right }))
    }

    pub fn abs(val: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Operation(ExprOperation::Abs { val }))
    }

    /// Evaluate every constant subtree, leaving symbols untouched
    ///
    /// Subtrees without constant children are shared with the input tree
    /// rather than copied.
    pub fn fold(self: &Rc<Expr>) -> Rc<Expr> {
        match &**self {
            Expr::Value(_) | Expr::Symbol(_) => Rc::clone(self),
            Expr::Operation(op) => match op {
                ExprOperation::Add { left, right } => {
                    fold_binary(self, left, right, |a, b| a + b, Expr::add)
                }
                ExprOperation::Sub { left, right } => {
                    fold_binary(self, left, right, |a, b| a - b, Expr::sub)
                }
                ExprOperation::Mul { left, right } => {
                    fold_binary(self, left, right, |a, b| a * b, Expr::mul)
                }
                ExprOperation::Div { left, right } => {
                    fold_binary(self, left, right, |a, b| a / b, Expr::div)
                }
                ExprOperation::Min { left, right } => {
                    fold_binary(self, left, right, f64::min, Expr::min)
                }
                ExprOperation::Max { left, right } => {
                    fold_binary(self, left, right, f64::max, Expr::max)
                }
                ExprOperation::Neg { val } => fold_unary(self, val, |a| -a, Expr::neg),
                ExprOperation::Abs { val } => fold_unary(self, val, f64::abs, Expr::abs),
            },
        }
    }

    /// Numerically evaluate the tree against a symbol table
    pub fn evaluate(&self, symbols: &IndexMap<String, f64>) -> Result<f64, EvalError> {
        match self {
            Expr::Value(value) => Ok(*value),
            Expr::Symbol(name) => symbols
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::UnknownSymbol(name.clone())),
            Expr::Operation(op) => match op {
                ExprOperation::Add { left, right } => {
                    Ok(left.evaluate(symbols)? + right.evaluate(symbols)?)
                }
                ExprOperation::Sub { left, right } => {
                    Ok(left.evaluate(symbols)? - right.evaluate(symbols)?)
                }
                ExprOperation::Mul { left, right } => {
                    Ok(left.evaluate(symbols)? * right.evaluate(symbols)?)
                }
                ExprOperation::Div { left, right } => {
                    Ok(left.evaluate(symbols)? / right.evaluate(symbols)?)
                }
                ExprOperation::Min { left, right } => {
                    Ok(left.evaluate(symbols)?.min(right.evaluate(symbols)?))
                }
                ExprOperation::Max { left, right } => {
                    Ok(left.evaluate(symbols)?.max(right.evaluate(symbols)?))
                }
                ExprOperation::Neg { val } => Ok(-val.evaluate(symbols)?),
                ExprOperation::Abs { val } => Ok(val.evaluate(symbols)?.abs()),
            },
        }
    }

    /// Replace symbols by the bound expressions, producing a new tree
    ///
    /// Symbols without a binding stay as they are. Untouched subtrees are
    /// shared with the input tree.
    pub fn substitute(self: &Rc<Expr>, bindings: &IndexMap<String, Rc<Expr>>) -> Rc<Expr> {
        match &**self {
            Expr::Value(_) => Rc::clone(self),
            Expr::Symbol(name) => match bindings.get(name) {
                Some(replacement) => Rc::clone(replacement),
                None => Rc::clone(self),
            },
            Expr::Operation(op) => match op {
                ExprOperation::Add { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::add)
                }
                ExprOperation::Sub { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::sub)
                }
                ExprOperation::Mul { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::mul)
                }
                ExprOperation::Div { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::div)
                }
                ExprOperation::Min { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::min)
                }
                ExprOperation::Max { left, right } => {
                    subst_binary(self, left, right, bindings, Expr::max)
                }
                ExprOperation::Neg { val } => subst_unary(self, val, bindings, Expr::neg),
                ExprOperation::Abs { val } => subst_unary(self, val, bindings, Expr::abs),
            },
        }
    }

    /// Distinct symbol names in first-appearance order
    pub fn variables(&self) -> Vec<String> {
        let mut names = IndexSet::new();
        self.collect_variables(&mut names);
        names.into_iter().collect()
    }

    fn collect_variables(&self, names: &mut IndexSet<String>) {
        match self {
            Expr::Value(_) => {}
            Expr::Symbol(name) => {
                names.insert(name.clone());
            }
            Expr::Operation(op) => match op {
                ExprOperation::Add { left, right }
                | ExprOperation::Sub { left, right }
                | ExprOperation::Mul { left, right }
                | ExprOperation::Div { left, right }
                | ExprOperation::Min { left, right }
                | ExprOperation::Max { left, right } => {
                    left.collect_variables(names);
                    right.collect_variables(names);
                }
                ExprOperation::Neg { val } | ExprOperation::Abs { val } => {
                    val.collect_variables(names);
                }
            },
        }
    }

    /// The literal value of a fully folded constant tree, if it is one
    pub fn as_value(&self) -> Option<f64> {
        match self {
            Expr::Value(value) => Some(*value),
            _ => None,
        }
    }
}

fn fold_binary(
    original: &Rc<Expr>,
    left: &Rc<Expr>,
    right: &Rc<Expr>,
    eval: impl Fn(f64, f64) -> f64,
    rebuild: impl Fn(Rc<Expr>, Rc<Expr>) -> Rc<Expr>,
) -> Rc<Expr> {
    let l = left.fold();
    let r = right.fold();
    if let (Expr::Value(a), Expr::Value(b)) = (&*l, &*r) {
        return Expr::value(eval(*a, *b));
    }
    if Rc::ptr_eq(&l, left) && Rc::ptr_eq(&r, right) {
        Rc::clone(original)
    } else {
        rebuild(l, r)
    }
}

fn fold_unary(
    original: &Rc<Expr>,
    val: &Rc<Expr>,
    eval: impl Fn(f64) -> f64,
    rebuild: impl Fn(Rc<Expr>) -> Rc<Expr>,
) -> Rc<Expr> {
    let v = val.fold();
    if let Expr::Value(a) = &*v {
        return Expr::value(eval(*a));
    }
    if Rc::ptr_eq(&v, val) {
        Rc::clone(original)
    } else {
        rebuild(v)
    }
}

fn subst_binary(
    original: &Rc<Expr>,
    left: &Rc<Expr>,
    right: &Rc<Expr>,
    bindings: &IndexMap<String, Rc<Expr>>,
    rebuild: impl Fn(Rc<Expr>, Rc<Expr>) -> Rc<Expr>,
) -> Rc<Expr> {
    let l = left.substitute(bindings);
    let r = right.substitute(bindings);
    if Rc::ptr_eq(&l, left) && Rc::ptr_eq(&r, right) {
        Rc::clone(original)
    } else {
        rebuild(l, r)
    }
}

fn subst_unary(
    original: &Rc<Expr>,
    val: &Rc<Expr>,
    bindings: &IndexMap<String, Rc<Expr>>,
    rebuild: impl Fn(Rc<Expr>) -> Rc<Expr>,
) -> Rc<Expr> {
    let v = val.substitute(bindings);
    if Rc::ptr_eq(&v, val) {
        Rc::clone(original)
    } else {
        rebuild(v)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Value(value) => write!(f, "{}", value),
            Expr::Symbol(name) => write!(f, "{}", name),
            Expr::Operation(op) => match op {
                ExprOperation::Add { left, right } => write!(f, "({} + {})", left, right),
                ExprOperation::Sub { left, right } => write!(f, "({} - {})", left, right),
                ExprOperation::Mul { left, right } => write!(f, "({} * {})", left, right),
                ExprOperation::Div { left, right } => write!(f, "({} / {})", left, right),
                ExprOperation::Neg { val } => write!(f, "(-{})", val),
                ExprOperation::Min { left, right } => write!(f, "min({}, {})", left, right),
                ExprOperation::Max { left, right } => write!(f, "max({}, {})", left, right),
                ExprOperation::Abs { val } => write!(f, "abs({})", val),
            },
        }
    }
}

/// Comparison operators usable at a relation's root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Leq,
    Geq,
    Lt,
    Gt,
}

impl ComparisonOp {
    /// The operator after both sides of the relation change sign
    pub fn mirrored(&self) -> ComparisonOp {
        match self {
            ComparisonOp::Eq => ComparisonOp::Eq,
            ComparisonOp::Neq => ComparisonOp::Neq,
            ComparisonOp::Leq => ComparisonOp::Geq,
            ComparisonOp::Geq => ComparisonOp::Leq,
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Lt,
        }
    }
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Neq => write!(f, "!="),
            ComparisonOp::Leq => write!(f, "<="),
            ComparisonOp::Geq => write!(f, ">="),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Gt => write!(f, ">"),
        }
    }
}

/// A comparison between two expressions
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub lhs: Rc<Expr>,
    pub op: ComparisonOp,
    pub rhs: Rc<Expr>,
}

impl Relation {
    pub fn new(lhs: Rc<Expr>, op: ComparisonOp, rhs: Rc<Expr>) -> Relation {
        Relation { lhs, op, rhs }
    }

    pub fn is_equality(&self) -> bool {
        self.op == ComparisonOp::Eq
    }

    /// Left-hand side minus right-hand side
    pub fn residual(&self) -> Rc<Expr> {
        Expr::sub(Rc::clone(&self.lhs), Rc::clone(&self.rhs))
    }

    /// Apply [`Expr::substitute`] to both sides
    pub fn substitute(&self, bindings: &IndexMap<String, Rc<Expr>>) -> Relation {
        Relation {
            lhs: self.lhs.substitute(bindings),
            op: self.op,
            rhs: self.rhs.substitute(bindings),
        }
    }

    /// Distinct symbol names of both sides in first-appearance order
    pub fn variables(&self) -> Vec<String> {
        let mut names = IndexSet::new();
        self.lhs.collect_variables(&mut names);
        self.rhs.collect_variables(&mut names);
        names.into_iter().collect()
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// Errors raised during numeric evaluation
#[derive(Debug, Error, PartialEq, Clone)]
pub enum EvalError {
    /// A symbol was not present in the symbol table
    #[error("unknown symbol during evaluation: {0}")]
    UnknownSymbol(String),
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use std::rc::Rc;

    use crate::expr::tree::{ComparisonOp, Expr, EvalError, Relation};

    #[test]
    fn test_fold_constant_subtree() {
        // (2 + 3) * v folds the left child only
        let expr = Expr::mul(
            Expr::add(Expr::value(2.0), Expr::value(3.0)),
            Expr::symbol("v"),
        );
        let folded = expr.fold();
        assert_eq!(format!("{}", folded), "(5 * v)");
    }

    #[test]
    fn test_fold_max() {
        let expr = Expr::max(Expr::value(-2.0), Expr::value(0.0));
        assert_eq!(expr.fold().as_value(), Some(0.0));
        let expr = Expr::add(Expr::symbol("x"), Expr::max(Expr::value(3.0), Expr::value(0.0)));
        assert_eq!(format!("{}", expr.fold()), "(x + 3)");
    }

    #[test]
    fn test_fold_shares_untouched_tree() {
        let expr = Expr::add(Expr::symbol("a"), Expr::symbol("b"));
        let folded = expr.fold();
        assert!(Rc::ptr_eq(&expr, &folded));
    }

    #[test]
    fn test_evaluate() {
        let expr = Expr::sub(
            Expr::mul(Expr::value(2.0), Expr::symbol("a")),
            Expr::symbol("b"),
        );
        let mut symbols = IndexMap::new();
        symbols.insert("a".to_string(), 3.0);
        symbols.insert("b".to_string(), 1.0);
        assert_eq!(expr.evaluate(&symbols), Ok(5.0));
        symbols.swap_remove("b");
        match expr.evaluate(&symbols) {
            Err(EvalError::UnknownSymbol(name)) => assert_eq!(name, "b"),
            other => panic!("expected an unknown symbol error, got {:?}", other),
        }
    }

    #[test]
    fn test_substitute_replaces_and_shares() {
        let expr = Expr::add(Expr::symbol("a"), Expr::symbol("b"));
        let mut bindings = IndexMap::new();
        bindings.insert("a".to_string(), Expr::value(4.0));
        let substituted = expr.substitute(&bindings);
        assert_eq!(format!("{}", substituted), "(4 + b)");
        // No binding applies, the whole tree is shared
        let untouched = expr.substitute(&IndexMap::new());
        assert!(Rc::ptr_eq(&expr, &untouched));
    }

    #[test]
    fn test_variables_in_order() {
        let expr = Expr::add(
            Expr::symbol("b"),
            Expr::mul(Expr::symbol("a"), Expr::add(Expr::symbol("b"), Expr::value(1.0))),
        );
        assert_eq!(expr.variables(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_relation_display_and_residual() {
        let relation = Relation::new(
            Expr::add(Expr::symbol("v1"), Expr::symbol("v2")),
            ComparisonOp::Leq,
            Expr::value(10.0),
        );
        assert_eq!(format!("{}", relation), "(v1 + v2) <= 10");
        assert_eq!(format!("{}", relation.residual()), "((v1 + v2) - 10)");
        assert!(!relation.is_equality());
    }

    #[test]
    fn test_mirrored_operators() {
        assert_eq!(ComparisonOp::Leq.mirrored(), ComparisonOp::Geq);
        assert_eq!(ComparisonOp::Gt.mirrored(), ComparisonOp::Lt);
        assert_eq!(ComparisonOp::Eq.mirrored(), ComparisonOp::Eq);
    }
}
