#![forbid(unsafe_code)]

pub mod backends;
pub mod clause;
pub mod config;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod predicates;
pub mod query;
pub mod solver;
pub mod sort;
pub mod ssa;
pub mod state;
pub mod term;

use quill_ast::{ExperimentalFeature, SourceUnit};
use tracing::debug;

pub use backends::{BoundedHornSolver, BoundedOptions, PortfolioHornSolver, SmtLibHornSolver};
pub use clause::{HornClause, Relation};
pub use config::{BackendKind, ChcConfig, ChcProfile, ConfigError};
pub use diagnostics::{ChcWarning, DiagnosticSink};
pub use encoder::{AnalysisReport, ContractReport, HornEncoder};
pub use error::{ChcError, ProgramPoint};
pub use predicates::{PredicateRegistry, StateLayout, StateVar};
pub use query::{QueryRecord, ASSERTION_VIOLATION};
pub use solver::{CheckResult, HornSolver, QueryResult, SolverError};
pub use sort::{DefaultSortMapper, Sort, SortMapper};
pub use ssa::SsaContext;
pub use state::{SymbolicState, VariableIndices};
pub use term::{RelationApp, Term};

/// Encodes every contract of `unit` as Horn clauses and checks each assertion.
///
/// Does nothing unless the unit enables [`ExperimentalFeature::SmtChecker`].
/// The solver is reset before each contract. Solver outcomes are reported to
/// `sink`; an `Err` means an internal invariant was violated and the pass was
/// abandoned.
pub fn analyze(
    unit: &SourceUnit,
    state: &dyn SymbolicState,
    sorts: &dyn SortMapper,
    solver: &mut dyn HornSolver,
    sink: &mut dyn DiagnosticSink,
) -> Result<AnalysisReport, ChcError> {
    if !unit.has_feature(ExperimentalFeature::SmtChecker) {
        debug!("SMT checker not enabled; skipping CHC analysis");
        return Ok(AnalysisReport::default());
    }
    HornEncoder::new(unit, state, sorts, solver, sink).run()
}

/// [`analyze`] with the built-in SSA provider and the solver selected by `config`.
pub fn analyze_with_config(
    unit: &SourceUnit,
    config: &ChcConfig,
    sink: &mut dyn DiagnosticSink,
) -> Result<AnalysisReport, ChcError> {
    if !unit.has_feature(ExperimentalFeature::SmtChecker) {
        debug!("SMT checker not enabled; skipping CHC analysis");
        return Ok(AnalysisReport::default());
    }
    let sorts = DefaultSortMapper;
    let state = SsaContext::build(unit, &sorts)?;
    let mut solver = config.build_solver();
    analyze(unit, &state, &sorts, solver.as_mut(), sink)
}
