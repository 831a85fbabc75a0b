use tracing::warn;

use crate::clause::{HornClause, Relation};
use crate::solver::{CheckResult, HornSolver, QueryResult, SolverError};
use crate::sort::Sort;
use crate::term::RelationApp;

/// Runs every operation against several backends and reconciles their answers.
pub struct PortfolioHornSolver {
    backends: Vec<Box<dyn HornSolver>>,
}

impl PortfolioHornSolver {
    pub fn new(backends: Vec<Box<dyn HornSolver>>) -> Self {
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Applies `op` to every backend and reports the first failure.
    fn fan_out(&mut self, mut op: impl FnMut(&mut dyn HornSolver) -> Result<(), SolverError>) -> Result<(), SolverError> {
        let mut first_err = None;
        for backend in &mut self.backends {
            if let Err(err) = op(backend.as_mut()) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl HornSolver for PortfolioHornSolver {
    fn declare_variable(&mut self, name: &str, sort: Sort) -> Result<(), SolverError> {
        self.fan_out(|b| b.declare_variable(name, sort))
    }

    fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError> {
        self.fan_out(|b| b.register_relation(relation))
    }

    fn add_rule(&mut self, clause: &HornClause) -> Result<(), SolverError> {
        self.fan_out(|b| b.add_rule(clause))
    }

    fn query(&mut self, targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
        let results = self.backends.iter_mut().map(|b| b.query(targets)).collect();
        combine(results)
    }

    fn reset(&mut self) {
        for backend in &mut self.backends {
            backend.reset();
        }
    }
}

/// Reconciles per-backend answers.
///
/// Agreeing definite answers win; `Satisfiable` against `Unsatisfiable` is
/// `Conflicting`. An error surfaces only when no backend answered.
pub(crate) fn combine(results: Vec<Result<QueryResult, SolverError>>) -> Result<QueryResult, SolverError> {
    let mut answers = Vec::new();
    let mut first_err = None;
    for result in results {
        match result {
            Ok(answer) => answers.push(answer),
            Err(err) => {
                warn!(error = %err, "portfolio backend failed");
                first_err.get_or_insert(err);
            }
        }
    }
    if answers.is_empty() {
        return Err(first_err.unwrap_or_else(|| SolverError::Protocol("portfolio has no backends".to_string())));
    }

    let has = |outcome: CheckResult| answers.iter().any(|a| a.outcome == outcome);
    let sat = has(CheckResult::Satisfiable);
    let unsat = has(CheckResult::Unsatisfiable);
    if (sat && unsat) || has(CheckResult::Conflicting) {
        warn!("portfolio backends disagree");
        return Ok(QueryResult::new(CheckResult::Conflicting));
    }
    if let Some(answer) = answers
        .iter()
        .find(|a| matches!(a.outcome, CheckResult::Satisfiable | CheckResult::Unsatisfiable))
    {
        return Ok(answer.clone());
    }
    Ok(QueryResult::new(CheckResult::Unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BoundedHornSolver;

    fn answer(outcome: CheckResult) -> Result<QueryResult, SolverError> {
        Ok(QueryResult::new(outcome))
    }

    fn failure() -> Result<QueryResult, SolverError> {
        Err(SolverError::Protocol("boom".to_string()))
    }

    #[test]
    fn disagreement_is_conflicting() {
        let combined = combine(vec![answer(CheckResult::Satisfiable), answer(CheckResult::Unsatisfiable)]).unwrap();
        assert_eq!(combined.outcome, CheckResult::Conflicting);
    }

    #[test]
    fn definite_answers_beat_unknown_and_failures() {
        let sat = QueryResult::with_witness(CheckResult::Satisfiable, vec!["x = 1".to_string()]);
        let combined = combine(vec![answer(CheckResult::Unknown), failure(), Ok(sat.clone())]).unwrap();
        assert_eq!(combined, sat);

        let combined = combine(vec![failure(), answer(CheckResult::Unsatisfiable)]).unwrap();
        assert_eq!(combined.outcome, CheckResult::Unsatisfiable);

        let combined = combine(vec![answer(CheckResult::Unknown), answer(CheckResult::Unknown)]).unwrap();
        assert_eq!(combined.outcome, CheckResult::Unknown);
    }

    #[test]
    fn errors_surface_only_when_every_backend_failed() {
        assert!(combine(vec![failure(), failure()]).is_err());
        assert!(combine(Vec::new()).is_err());
    }

    #[test]
    fn operations_reach_every_backend() {
        let err = Relation::new("error", vec![]);
        let mut portfolio = PortfolioHornSolver::new(vec![
            Box::new(BoundedHornSolver::default()),
            Box::new(BoundedHornSolver::default()),
        ]);
        portfolio.register_relation(&err).unwrap();
        portfolio.add_rule(&HornClause::fact("bad", err.apply(vec![]))).unwrap();
        assert_eq!(portfolio.len(), 2);
        assert_eq!(
            portfolio.query(&[err.apply(vec![])]).unwrap().outcome,
            CheckResult::Satisfiable
        );
        assert!(portfolio.checkpoint().is_err());
    }
}
