use quill_ast::Span;
use tracing::{info, warn};

use crate::diagnostics::{ChcWarning, DiagnosticSink};
use crate::solver::{CheckResult, HornSolver, QueryResult};
use crate::term::RelationApp;

/// Description attached to every assertion query.
pub const ASSERTION_VIOLATION: &str = "Assertion violation";

/// One resolved reachability query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    pub target: RelationApp,
    pub span: Span,
    pub description: String,
    pub outcome: CheckResult,
    pub witness: Vec<String>,
}

/// Asks whether `target` alone is reachable and reports the outcome.
///
/// Solver failures are folded into [`CheckResult::Error`]; only
/// [`CheckResult::Unsatisfiable`] stays silent.
pub fn run_query(
    solver: &mut dyn HornSolver,
    sink: &mut dyn DiagnosticSink,
    target: RelationApp,
    span: Span,
    description: &str,
) -> QueryRecord {
    let result = match solver.query(std::slice::from_ref(&target)) {
        Ok(result) => result,
        Err(err) => {
            warn!(target = %target.relation, error = %err, "solver invocation failed");
            QueryResult::new(CheckResult::Error)
        }
    };
    info!(target = %target.relation, outcome = %result.outcome, "query resolved");

    if let Some(warning) = outcome_warning(result.outcome, span, description, &result.witness) {
        sink.warn(warning);
    }

    QueryRecord {
        target,
        span,
        description: description.to_string(),
        outcome: result.outcome,
        witness: result.witness,
    }
}

/// The warning for a query outcome, or `None` for a proof of unreachability.
pub fn outcome_warning(
    outcome: CheckResult,
    span: Span,
    description: &str,
    witness: &[String],
) -> Option<ChcWarning> {
    let message = match outcome {
        CheckResult::Unsatisfiable => return None,
        CheckResult::Satisfiable => format!("{description} happens here"),
        CheckResult::Unknown => format!("{description} might happen here."),
        CheckResult::Conflicting => {
            "At least two SMT solvers provided conflicting answers. Results might not be sound."
                .to_string()
        }
        CheckResult::Error => "Error trying to invoke SMT solver.".to_string(),
    };
    let counterexample = (outcome == CheckResult::Satisfiable && !witness.is_empty())
        .then(|| format!("counterexample: {}", witness.join(", ")));
    Some(ChcWarning {
        message,
        span,
        outcome,
        counterexample,
    })
}
