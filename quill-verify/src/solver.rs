use std::collections::BTreeMap;
use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::clause::{HornClause, Relation};
use crate::sort::Sort;
use crate::term::RelationApp;

/// Answer to a reachability query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckResult {
    /// The target is derivable: a violating path exists.
    Satisfiable,
    /// The target is proved unreachable.
    Unsatisfiable,
    Unknown,
    /// Underlying engines disagreed.
    Conflicting,
    /// The solver could not be invoked.
    Error,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckResult::Satisfiable => "satisfiable",
            CheckResult::Unsatisfiable => "unsatisfiable",
            CheckResult::Unknown => "unknown",
            CheckResult::Conflicting => "conflicting",
            CheckResult::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    pub outcome: CheckResult,
    /// Solver-reported values backing a `Satisfiable` answer.
    pub witness: Vec<String>,
}

impl QueryResult {
    pub fn new(outcome: CheckResult) -> Self {
        Self {
            outcome,
            witness: Vec::new(),
        }
    }

    pub fn with_witness(outcome: CheckResult, witness: Vec<String>) -> Self {
        Self { outcome, witness }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SolverError {
    #[error("Horn solver does not support {operation}")]
    #[diagnostic(
        code(quill::solver::unsupported),
        help("rule sets cannot be scoped; reset the solver and re-encode instead")
    )]
    Unsupported { operation: &'static str },

    #[error("relation `{name}` is not registered")]
    #[diagnostic(code(quill::solver::unknown_relation))]
    UnknownRelation { name: String },

    #[error("variable `{name}` is used before it is declared")]
    #[diagnostic(code(quill::solver::undeclared))]
    UndeclaredVariable { name: String },

    #[error("relation `{name}` expects {expected} arguments, got {found}")]
    #[diagnostic(code(quill::solver::arity))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("failed to start solver `{command}`: {source}")]
    #[diagnostic(code(quill::solver::spawn))]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver I/O error: {0}")]
    #[diagnostic(code(quill::solver::io))]
    Io(#[from] std::io::Error),

    #[error("unexpected solver response: {0}")]
    #[diagnostic(code(quill::solver::protocol))]
    Protocol(String),
}

/// Backend contract for constrained Horn clause solving.
///
/// Rules accumulate until [`HornSolver::reset`]; there is no scoping.
/// [`HornSolver::checkpoint`] and [`HornSolver::rollback`] exist only to fail:
/// implementations must not override them.
pub trait HornSolver {
    /// Declares a free value-level variable.
    fn declare_variable(&mut self, name: &str, sort: Sort) -> Result<(), SolverError>;

    fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError>;

    /// Adds a rule, implicitly universally quantified over its free variables.
    fn add_rule(&mut self, clause: &HornClause) -> Result<(), SolverError>;

    /// Checks whether any of `targets` is derivable from the current rules.
    fn query(&mut self, targets: &[RelationApp]) -> Result<QueryResult, SolverError>;

    /// Drops every declaration, relation and rule.
    fn reset(&mut self);

    /// Saving the rule set is not available for Horn backends.
    fn checkpoint(&mut self) -> Result<(), SolverError> {
        Err(SolverError::Unsupported {
            operation: "checkpoint",
        })
    }

    /// Restoring a saved rule set is not available for Horn backends.
    fn rollback(&mut self) -> Result<(), SolverError> {
        Err(SolverError::Unsupported {
            operation: "rollback",
        })
    }
}

/// Checks that `app` targets a registered relation with the right arity.
pub(crate) fn check_app<'r>(
    relations: impl Fn(&str) -> Option<&'r Relation>,
    app: &RelationApp,
) -> Result<(), SolverError> {
    let rel = relations(&app.relation).ok_or_else(|| SolverError::UnknownRelation {
        name: app.relation.clone(),
    })?;
    if rel.arity() != app.args.len() {
        return Err(SolverError::ArityMismatch {
            name: app.relation.clone(),
            expected: rel.arity(),
            found: app.args.len(),
        });
    }
    Ok(())
}

/// Checks that every free variable of `clause` was declared with a matching sort.
pub(crate) fn check_declared(declared: &BTreeMap<String, Sort>, clause: &HornClause) -> Result<(), SolverError> {
    for (name, sort) in clause.free_vars() {
        if declared.get(&name) != Some(&sort) {
            return Err(SolverError::UndeclaredVariable { name });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSolver;

    impl HornSolver for NullSolver {
        fn declare_variable(&mut self, _name: &str, _sort: Sort) -> Result<(), SolverError> {
            Ok(())
        }

        fn register_relation(&mut self, _relation: &Relation) -> Result<(), SolverError> {
            Ok(())
        }

        fn add_rule(&mut self, _clause: &HornClause) -> Result<(), SolverError> {
            Ok(())
        }

        fn query(&mut self, _targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
            Ok(QueryResult::new(CheckResult::Unknown))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn checkpoint_and_rollback_fail_with_distinct_operations() {
        let mut solver = NullSolver;
        match solver.checkpoint() {
            Err(SolverError::Unsupported { operation }) => assert_eq!(operation, "checkpoint"),
            other => panic!("expected unsupported checkpoint, got {other:?}"),
        }
        match solver.rollback() {
            Err(SolverError::Unsupported { operation }) => assert_eq!(operation, "rollback"),
            other => panic!("expected unsupported rollback, got {other:?}"),
        }
    }

    #[test]
    fn app_validation_reports_unknown_relations_and_arity() {
        let rel = Relation::new("interface_1", vec![Sort::Int]);
        let lookup = |name: &str| (name == "interface_1").then_some(&rel);

        assert!(check_app(lookup, &rel.apply(vec![crate::term::Term::Int(0)])).is_ok());
        assert!(matches!(
            check_app(lookup, &RelationApp::new("interface_1", vec![])),
            Err(SolverError::ArityMismatch { expected: 1, found: 0, .. })
        ));
        assert!(matches!(
            check_app(lookup, &RelationApp::new("error_1", vec![])),
            Err(SolverError::UnknownRelation { .. })
        ));
    }
}
