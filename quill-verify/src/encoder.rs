//! Horn clause encoding of contracts.
//!
//! One pass per contract: boundary facts first, then for every function an
//! entry rule, one error rule plus query per assertion, and an exit rule.

use std::collections::BTreeSet;

use quill_ast::{
    Block, Builtin, Callee, ContractDef, Expr, ExprKind, FunctionCall, FunctionDef, NodeId, SourceUnit, Stmt,
};
use tracing::{debug, info};

use crate::clause::{HornClause, Relation};
use crate::diagnostics::DiagnosticSink;
use crate::error::{ChcError, ProgramPoint};
use crate::predicates::{PredicateRegistry, StateLayout};
use crate::query::{run_query, QueryRecord, ASSERTION_VIOLATION};
use crate::solver::HornSolver;
use crate::sort::SortMapper;
use crate::state::{SymbolicState, VariableIndices};
use crate::term::Term;

/// Everything emitted for one contract.
#[derive(Clone, Debug)]
pub struct ContractReport {
    pub contract: NodeId,
    pub name: String,
    /// In creation order.
    pub relations: Vec<Relation>,
    /// In emission order.
    pub clauses: Vec<HornClause>,
    pub queries: Vec<QueryRecord>,
}

impl ContractReport {
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Clauses whose head or body applies `relation`.
    pub fn clauses_mentioning<'r>(&'r self, relation: &'r str) -> impl Iterator<Item = &'r HornClause> + 'r {
        self.clauses.iter().filter(move |c| c.mentions(relation))
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnalysisReport {
    pub contracts: Vec<ContractReport>,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn contract(&self, name: &str) -> Option<&ContractReport> {
        self.contracts.iter().find(|c| c.name == name)
    }

    pub fn clauses(&self) -> impl Iterator<Item = &HornClause> {
        self.contracts.iter().flat_map(|c| c.clauses.iter())
    }

    pub fn queries(&self) -> impl Iterator<Item = &QueryRecord> {
        self.contracts.iter().flat_map(|c| c.queries.iter())
    }
}

/// Encoding session over one source unit.
///
/// Borrows the symbolic state, sort mapper, solver and sink for its whole
/// lifetime; [`HornEncoder::run`] consumes the session.
pub struct HornEncoder<'a> {
    unit: &'a SourceUnit,
    state: &'a dyn SymbolicState,
    sorts: &'a dyn SortMapper,
    solver: &'a mut dyn HornSolver,
    sink: &'a mut dyn DiagnosticSink,
}

/// Per-contract accumulator.
struct ContractSession {
    registry: PredicateRegistry,
    declared: BTreeSet<String>,
    clauses: Vec<HornClause>,
    queries: Vec<QueryRecord>,
}

/// The function whose body is being encoded.
///
/// Only [`HornEncoder::enter_function`] creates one and
/// [`HornEncoder::exit_function`] consumes it, so a second function cannot be
/// entered while one is open. Its relation lives in the registry.
struct ActiveFunction {
    id: NodeId,
}

impl<'a> HornEncoder<'a> {
    pub fn new(
        unit: &'a SourceUnit,
        state: &'a dyn SymbolicState,
        sorts: &'a dyn SortMapper,
        solver: &'a mut dyn HornSolver,
        sink: &'a mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            unit,
            state,
            sorts,
            solver,
            sink,
        }
    }

    pub fn run(mut self) -> Result<AnalysisReport, ChcError> {
        let unit = self.unit;
        let mut report = AnalysisReport::default();
        for contract in &unit.contracts {
            report.contracts.push(self.encode_contract(contract)?);
        }
        Ok(report)
    }

    fn encode_contract(&mut self, contract: &ContractDef) -> Result<ContractReport, ChcError> {
        self.solver.reset();

        let layout = StateLayout::collect(self.unit, contract, self.sorts);
        info!(
            contract = %contract.name.node,
            state_vars = layout.len(),
            functions = contract.functions.len(),
            "encoding contract"
        );
        let mut cx = ContractSession {
            registry: PredicateRegistry::new(contract.id, layout, self.unit.node_count),
            declared: BTreeSet::new(),
            clauses: Vec::new(),
            queries: Vec::new(),
        };

        let interface = cx.registry.interface(&mut *self.solver)?;
        let zero = cx.registry.layout().zero_tuple();
        if contract.constructor().is_some() {
            // Constructor effects on state are not modelled yet: deployment
            // always ends in the zero state.
            let ctor = cx.registry.constructor(&mut *self.solver)?;
            let entry = ctor.apply(zero.clone());
            self.add_rule(&mut cx, HornClause::fact(ctor.name.clone(), entry.clone()))?;
            self.add_rule(
                &mut cx,
                HornClause::rule(
                    format!("{}_to_interface", ctor.name),
                    vec![entry.into()],
                    interface.apply(zero),
                ),
            )?;
        } else {
            self.add_rule(&mut cx, HornClause::fact("interface", interface.apply(zero)))?;
        }
        cx.registry.error(&mut *self.solver)?;

        for function in &contract.functions {
            self.encode_function(&mut cx, function)?;
        }

        Ok(ContractReport {
            contract: contract.id,
            name: contract.name.node.clone(),
            relations: cx.registry.into_relations(),
            clauses: cx.clauses,
            queries: cx.queries,
        })
    }

    fn encode_function(&mut self, cx: &mut ContractSession, function: &FunctionDef) -> Result<(), ChcError> {
        let active = self.enter_function(cx, function)?;
        if let Some(body) = &function.body {
            self.visit_block(cx, &active, body)?;
        }
        self.exit_function(cx, active)
    }

    /// `interface(before) => function(before)`
    fn enter_function(&mut self, cx: &mut ContractSession, function: &FunctionDef) -> Result<ActiveFunction, ChcError> {
        debug!(function = %function.name.node, id = %function.id, "entering function");
        let relation = cx.registry.intern_function(function.id, &mut *self.solver)?;
        let interface = cx.registry.interface(&mut *self.solver)?;

        let before = self.indices(function.id, ProgramPoint::Before)?;
        let state_before = cx.registry.layout().tuple_at(self.state, before, function.id)?;

        self.add_rule(
            cx,
            HornClause::rule(
                format!("interface_to_{}", relation.name),
                vec![interface.apply(state_before.clone()).into()],
                relation.apply(state_before),
            ),
        )?;
        Ok(ActiveFunction { id: function.id })
    }

    /// `function(before) ∧ constraints => interface(after)`
    fn exit_function(&mut self, cx: &mut ContractSession, active: ActiveFunction) -> Result<(), ChcError> {
        let before = self.indices(active.id, ProgramPoint::Before)?;
        let after = self.indices(active.id, ProgramPoint::After)?;
        let layout = cx.registry.layout();
        let state_before = layout.tuple_at(self.state, before, active.id)?;
        let state_after = layout.tuple_at(self.state, after, active.id)?;
        let constraints = self.constraints(active.id)?;
        let relation = cx.registry.function(active.id)?.clone();
        let interface = cx.registry.interface(&mut *self.solver)?;

        self.add_rule(
            cx,
            HornClause::rule(
                format!("{}_to_interface", relation.name),
                vec![relation.apply(state_before).into(), constraints],
                interface.apply(state_after),
            ),
        )?;
        debug!(id = %active.id, "left function");
        Ok(())
    }

    fn visit_block(&mut self, cx: &mut ContractSession, active: &ActiveFunction, block: &Block) -> Result<(), ChcError> {
        for stmt in &block.stmts {
            self.visit_stmt(cx, active, stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, cx: &mut ContractSession, active: &ActiveFunction, stmt: &Stmt) -> Result<(), ChcError> {
        match stmt {
            Stmt::VarDecl(s) => {
                if let Some(init) = &s.init {
                    self.visit_expr(cx, active, init)?;
                }
            }
            Stmt::Assign(s) => self.visit_expr(cx, active, &s.value)?,
            Stmt::If(s) => {
                self.visit_expr(cx, active, &s.cond)?;
                self.visit_block(cx, active, &s.then_block)?;
                if let Some(else_block) = &s.else_block {
                    self.visit_block(cx, active, else_block)?;
                }
            }
            Stmt::While(s) => {
                self.visit_expr(cx, active, &s.cond)?;
                self.visit_block(cx, active, &s.body)?;
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.visit_expr(cx, active, value)?;
                }
            }
            Stmt::Expr(s) => self.visit_expr(cx, active, &s.expr)?,
            Stmt::Block(b) => self.visit_block(cx, active, b)?,
        }
        Ok(())
    }

    fn visit_expr(&mut self, cx: &mut ContractSession, active: &ActiveFunction, expr: &Expr) -> Result<(), ChcError> {
        match &expr.kind {
            ExprKind::BoolLit(_) | ExprKind::NumberLit(_) | ExprKind::Var(_) => Ok(()),
            ExprKind::Unary { operand, .. } => self.visit_expr(cx, active, operand),
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(cx, active, left)?;
                self.visit_expr(cx, active, right)
            }
            ExprKind::Call(call) => {
                for arg in &call.args {
                    self.visit_expr(cx, active, arg)?;
                }
                if matches!(call.callee, Callee::Builtin(Builtin::Assert)) {
                    self.encode_assertion(cx, active, expr, call)?;
                }
                Ok(())
            }
        }
    }

    /// `function(at) ∧ constraints ∧ ¬cond => error`, followed by its query.
    fn encode_assertion(
        &mut self,
        cx: &mut ContractSession,
        active: &ActiveFunction,
        call_expr: &Expr,
        call: &FunctionCall,
    ) -> Result<(), ChcError> {
        let cond = match call.args.as_slice() {
            [arg] if arg.ty.is_bool() => arg,
            [arg] => {
                return Err(ChcError::MalformedAssertion {
                    found: format!("an argument of type `{}`", arg.ty),
                    span: call_expr.span,
                });
            }
            args => {
                return Err(ChcError::MalformedAssertion {
                    found: format!("{} arguments", args.len()),
                    span: call_expr.span,
                });
            }
        };

        let at = self.indices(call_expr.id, ProgramPoint::At)?;
        let state_at = cx.registry.layout().tuple_at(self.state, at, call_expr.id)?;
        let constraints = self.constraints(call_expr.id)?;
        let value = self.state.expression_value(cond, at)?;
        let relation = cx.registry.function(active.id)?.clone();
        let error = cx.registry.error(&mut *self.solver)?;

        self.add_rule(
            cx,
            HornClause::rule(
                format!("assert_{}_to_error", call_expr.id),
                vec![relation.apply(state_at).into(), constraints, Term::not(value)],
                error.apply(Vec::new()),
            ),
        )?;

        let record = run_query(
            &mut *self.solver,
            &mut *self.sink,
            error.apply(Vec::new()),
            call_expr.span,
            ASSERTION_VIOLATION,
        );
        cx.queries.push(record);
        Ok(())
    }

    /// Declares the clause's new free variables, then submits it.
    fn add_rule(&mut self, cx: &mut ContractSession, clause: HornClause) -> Result<(), ChcError> {
        for (name, sort) in clause.free_vars() {
            if !cx.declared.contains(&name) {
                self.solver.declare_variable(&name, sort)?;
                cx.declared.insert(name);
            }
        }
        self.solver.add_rule(&clause)?;
        debug!(rule = clause.name.as_deref().unwrap_or("<unnamed>"), "added rule");
        cx.clauses.push(clause);
        Ok(())
    }

    fn indices(&self, node: NodeId, point: ProgramPoint) -> Result<&'a VariableIndices, ChcError> {
        let state = self.state;
        let found = match point {
            ProgramPoint::Before => state.indices_before(node),
            ProgramPoint::After => state.indices_after(node),
            ProgramPoint::At => state.indices_at(node),
        };
        found.ok_or(ChcError::MissingIndices { node, point })
    }

    fn constraints(&self, node: NodeId) -> Result<Term, ChcError> {
        self.state
            .path_constraints(node)
            .ok_or(ChcError::MissingConstraints { node })
    }
}
