use std::collections::VecDeque;

use quill_ast::{
    AstBuilder, BinOp, ContractDef, ExperimentalFeature, FunctionDef, NodeId, SourceUnit, Span, Type, VarDecl,
    Visibility,
};
use quill_verify::{
    analyze, AnalysisReport, ChcError, ChcWarning, CheckResult, DefaultSortMapper, HornClause, HornSolver,
    QueryResult, Relation, RelationApp, SolverError, Sort, SsaContext,
};

/// One call made against a solver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Declare(String, Sort),
    Register(Relation),
    Rule(HornClause),
    Query(Vec<RelationApp>),
    Reset,
}

/// Scripted answer for the next query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Outcome(CheckResult),
    Fail,
}

/// Solver that records the exact call stream and replays scripted answers.
///
/// Unscripted queries answer `Unknown`.
#[derive(Debug, Default)]
pub struct RecordingSolver {
    pub events: Vec<Event>,
    answers: VecDeque<Answer>,
}

impl RecordingSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            events: Vec::new(),
            answers: answers.into_iter().collect(),
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &HornClause> {
        self.events.iter().filter_map(|e| match e {
            Event::Rule(c) => Some(c),
            _ => None,
        })
    }

    pub fn queries(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Event::Query(_))).count()
    }

    pub fn declared(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Declare(name, _) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl HornSolver for RecordingSolver {
    fn declare_variable(&mut self, name: &str, sort: Sort) -> Result<(), SolverError> {
        self.events.push(Event::Declare(name.to_string(), sort));
        Ok(())
    }

    fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError> {
        self.events.push(Event::Register(relation.clone()));
        Ok(())
    }

    fn add_rule(&mut self, clause: &HornClause) -> Result<(), SolverError> {
        self.events.push(Event::Rule(clause.clone()));
        Ok(())
    }

    fn query(&mut self, targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
        self.events.push(Event::Query(targets.to_vec()));
        match self.answers.pop_front() {
            Some(Answer::Outcome(outcome)) => Ok(QueryResult::new(outcome)),
            Some(Answer::Fail) => Err(SolverError::Protocol("scripted failure".to_string())),
            None => Ok(QueryResult::new(CheckResult::Unknown)),
        }
    }

    fn reset(&mut self) {
        self.events.push(Event::Reset);
    }
}

/// Runs the pass with the built-in SSA provider against `solver`.
pub fn run_with(unit: &SourceUnit, solver: &mut dyn HornSolver) -> (Result<AnalysisReport, ChcError>, Vec<ChcWarning>) {
    let sorts = DefaultSortMapper;
    let mut warnings: Vec<ChcWarning> = Vec::new();
    let result = SsaContext::build(unit, &sorts).and_then(|state| analyze(unit, &state, &sorts, solver, &mut warnings));
    (result, warnings)
}

pub const FEATURES: &[ExperimentalFeature] = &[ExperimentalFeature::SmtChecker];

/// ```text
/// contract Counter {
///     uint256 public count;
///     bool public paused;
///     constructor() {}            // only when `with_constructor`
///     function inc() public {
///         count = count + 1;
///         assert(count > 0);
///     }
///     function pause() public {
///         paused = true;
///     }
/// }
/// ```
pub struct Counter {
    pub unit: SourceUnit,
    pub contract: NodeId,
    pub count: VarDecl,
    pub paused: VarDecl,
    pub inc: FunctionDef,
    pub pause: FunctionDef,
    pub constructor: Option<FunctionDef>,
    pub assert_span: Span,
}

pub fn counter(with_constructor: bool) -> Counter {
    let mut b = AstBuilder::new();
    let count = b.state_var("count", Type::Uint(256), Visibility::Public);
    let paused = b.state_var("paused", Type::Bool, Visibility::Public);

    let lhs = b.var(&count);
    let one = b.number(1);
    let sum = b.binary(lhs, BinOp::Add, one);
    let bump = b.assign(&count, sum);
    let seen = b.var(&count);
    let zero = b.number(0);
    let positive = b.binary(seen, BinOp::Gt, zero);
    let call = b.assert_call(vec![positive]);
    let assert_span = call.span;
    let check = b.expr_stmt(call);
    let inc = b.function("inc", vec![], vec![bump, check]);

    let yes = b.bool_lit(true);
    let set = b.assign(&paused, yes);
    let pause = b.function("pause", vec![], vec![set]);

    let constructor = with_constructor.then(|| b.constructor(vec![], vec![]));
    let mut functions = vec![inc.clone(), pause.clone()];
    functions.extend(constructor.clone());

    let contract = b.contract("Counter", vec![count.clone(), paused.clone()], functions);
    let contract_id = contract.id;
    let unit = b.source_unit(FEATURES, vec![contract]);
    Counter {
        unit,
        contract: contract_id,
        count,
        paused,
        inc,
        pause,
        constructor,
        assert_span,
    }
}

/// A single contract `C` with one public function `f` holding `body`, built by `f`.
/// Returns the unit and the span of the first assertion call, if any.
pub fn single_function(
    state: impl FnOnce(&mut AstBuilder) -> Vec<VarDecl>,
    params: impl FnOnce(&mut AstBuilder) -> Vec<VarDecl>,
    body: impl FnOnce(&mut AstBuilder, &[VarDecl], &[VarDecl]) -> (Vec<quill_ast::Stmt>, Option<Span>),
) -> (SourceUnit, Option<Span>) {
    let mut b = AstBuilder::new();
    let vars = state(&mut b);
    let ps = params(&mut b);
    let (stmts, span) = body(&mut b, &vars, &ps);
    let f = b.function("f", ps, stmts);
    let c: ContractDef = b.contract("C", vars, vec![f]);
    (b.source_unit(FEATURES, vec![c]), span)
}
