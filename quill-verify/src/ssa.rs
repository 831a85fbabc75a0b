//! Reference symbolic state provider.
//!
//! A single forward pass over every function body that assigns SSA
//! generation indices and collects the path constraints the Horn encoder
//! consumes. Branches are merged with `ite`; loops havoc the variables they
//! assign. A call to a user function yields a fresh value and havocs every
//! state slot of the contract. A `return` ends its path, and all exits of a
//! function are joined into its after-snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use quill_ast::{
    BinOp, Block, Builtin, Callee, Expr, ExprKind, FunctionDef, NodeId, NodeTable, SourceUnit, Stmt,
    Type, UnaryOp, VarDecl,
};

use tracing::trace;

use crate::error::ChcError;
use crate::sort::{Sort, SortMapper};
use crate::state::{SymbolicState, VariableIndices};
use crate::term::Term;

#[derive(Clone, Debug)]
struct Symbol {
    name: String,
    sort: Sort,
    ty: Type,
}

#[derive(Debug, Default)]
pub struct SsaContext {
    symbols: NodeTable<Symbol>,
    before: NodeTable<VariableIndices>,
    after: NodeTable<VariableIndices>,
    at: NodeTable<VariableIndices>,
    constraints: NodeTable<Term>,
}

impl SsaContext {
    pub fn build(unit: &SourceUnit, sorts: &dyn SortMapper) -> Result<Self, ChcError> {
        let n = unit.node_count;
        let mut ctx = SsaContext {
            symbols: NodeTable::with_capacity(n),
            before: NodeTable::with_capacity(n),
            after: NodeTable::with_capacity(n),
            at: NodeTable::with_capacity(n),
            constraints: NodeTable::with_capacity(n),
        };

        for contract in &unit.contracts {
            for var in &contract.state_variables {
                ctx.declare(var.id, &var.name.node, &var.ty, sorts);
            }
        }

        let mut counters = BTreeMap::new();
        for contract in &unit.contracts {
            let state_vars: Vec<&VarDecl> = contract
                .linearized_bases
                .iter()
                .filter_map(|id| unit.contract(*id))
                .flat_map(|c| c.state_variables.iter())
                .collect();
            for function in &contract.functions {
                let mut walker = FunctionWalker {
                    ctx: &mut ctx,
                    sorts,
                    counters: &mut counters,
                    current: VariableIndices::new(),
                    definitions: Vec::new(),
                    frames: vec![Frame::default()],
                    state: state_vars.iter().map(|var| var.id).collect(),
                    returns: Vec::new(),
                    exits: Vec::new(),
                    live: true,
                };
                walker.function(function)?;
            }
        }

        Ok(ctx)
    }

    fn declare(&mut self, id: NodeId, name: &str, ty: &Type, sorts: &dyn SortMapper) {
        self.symbols.insert(
            id,
            Symbol {
                name: name.to_string(),
                sort: sorts.sort_of(ty),
                ty: ty.clone(),
            },
        );
    }

    fn symbol_term(&self, decl: NodeId, index: u32) -> Option<Term> {
        let sym = self.symbols.get(decl)?;
        Some(Term::var(format!("{}_{}_{}", sym.name, decl, index), sym.sort))
    }

    /// Converts `expr` to a term, reading variables at `indices`.
    pub fn term_of(&self, expr: &Expr, indices: &VariableIndices) -> Result<Term, ChcError> {
        Ok(match &expr.kind {
            ExprKind::BoolLit(b) => Term::Bool(*b),
            ExprKind::NumberLit(n) => Term::Int(*n),
            ExprKind::Var(r) if matches!(expr.ty, Type::Mapping(_, _)) => {
                return Err(ChcError::UnsupportedExpression {
                    message: format!("mapping `{}` used as a value", r.name.node),
                    span: expr.span,
                });
            }
            ExprKind::Var(r) => {
                let missing = || ChcError::MissingVariableIndex {
                    name: r.name.node.clone(),
                    node: expr.id,
                };
                let index = indices.get(&r.decl).ok_or_else(missing)?;
                self.symbol_term(r.decl, *index).ok_or_else(missing)?
            }
            ExprKind::Unary { op, operand } => {
                let inner = self.term_of(operand, indices)?;
                match op {
                    UnaryOp::Not => Term::not(inner),
                    UnaryOp::Neg => Term::neg(inner),
                }
            }
            ExprKind::Binary { left, op, right } => {
                let l = self.term_of(left, indices)?;
                let r = self.term_of(right, indices)?;
                match op {
                    BinOp::Add => Term::add(l, r),
                    BinOp::Sub => Term::sub(l, r),
                    BinOp::Mul => Term::mul(l, r),
                    BinOp::Div => Term::div(l, r),
                    BinOp::Mod => Term::modulo(l, r),
                    BinOp::Eq => Term::eq(l, r),
                    BinOp::Ne => Term::ne(l, r),
                    BinOp::Lt => Term::lt(l, r),
                    BinOp::Gt => Term::gt(l, r),
                    BinOp::Le => Term::le(l, r),
                    BinOp::Ge => Term::ge(l, r),
                    BinOp::And => Term::and(vec![l, r]),
                    BinOp::Or => Term::or(vec![l, r]),
                }
            }
            ExprKind::Call(call) => match (&call.callee, &expr.ty) {
                (Callee::Builtin(_), _) => Term::Bool(true),
                (Callee::Function { .. }, Type::Tuple(items)) if items.is_empty() => Term::Bool(true),
                (Callee::Function { name, .. }, Type::Tuple(_)) => {
                    return Err(ChcError::UnsupportedExpression {
                        message: format!("call to `{}` returns multiple values", name.node),
                        span: expr.span,
                    });
                }
                (Callee::Function { name, .. }, _) => {
                    self.symbol_term(expr.id, 0)
                        .ok_or_else(|| ChcError::MissingVariableIndex {
                            name: name.node.clone(),
                            node: expr.id,
                        })?
                }
            },
        })
    }
}

impl SymbolicState for SsaContext {
    fn indices_before(&self, node: NodeId) -> Option<&VariableIndices> {
        self.before.get(node)
    }

    fn indices_after(&self, node: NodeId) -> Option<&VariableIndices> {
        self.after.get(node)
    }

    fn indices_at(&self, node: NodeId) -> Option<&VariableIndices> {
        self.at.get(node)
    }

    fn path_constraints(&self, node: NodeId) -> Option<Term> {
        self.constraints.get(node).cloned()
    }

    fn variable_value(&self, decl: NodeId, index: u32) -> Option<Term> {
        self.symbol_term(decl, index)
    }

    fn expression_value(&self, expr: &Expr, indices: &VariableIndices) -> Result<Term, ChcError> {
        self.term_of(expr, indices)
    }
}

#[derive(Debug, Default)]
struct Frame {
    guard: Option<Term>,
    requires: Vec<Term>,
}

impl Frame {
    fn guarded(guard: Term) -> Self {
        Self {
            guard: Some(guard),
            requires: Vec::new(),
        }
    }
}

/// A point where control leaves the function.
#[derive(Debug)]
struct Exit {
    cond: Term,
    indices: VariableIndices,
}

struct FunctionWalker<'a> {
    ctx: &'a mut SsaContext,
    sorts: &'a dyn SortMapper,
    counters: &'a mut BTreeMap<NodeId, u32>,
    current: VariableIndices,
    /// Equalities defining fresh indices; valid on every path.
    definitions: Vec<Term>,
    frames: Vec<Frame>,
    state: Vec<NodeId>,
    returns: Vec<NodeId>,
    exits: Vec<Exit>,
    /// Cleared once the current path has returned.
    live: bool,
}

impl FunctionWalker<'_> {
    fn function(&mut self, function: &FunctionDef) -> Result<(), ChcError> {
        for decl in self.state.clone() {
            self.havoc(decl)?;
        }
        for param in &function.params {
            self.ctx.declare(param.id, &param.name.node, &param.ty, self.sorts);
            self.start(param.id);
            self.constrain_range(param.id, 0)?;
        }
        for ret in &function.returns {
            self.ctx.declare(ret.id, &ret.name.node, &ret.ty, self.sorts);
            self.start(ret.id);
            let var = self.symbol(ret.id, 0)?;
            self.definitions
                .push(Term::eq(var, self.sorts.sort_of(&ret.ty).zero()));
            self.returns.push(ret.id);
        }

        self.ctx.before.insert(function.id, self.current.clone());
        if let Some(body) = &function.body {
            self.block(body)?;
        }
        if self.live {
            let cond = self.path_condition();
            self.exits.push(Exit {
                cond,
                indices: self.current.clone(),
            });
        }
        let exits = mem::take(&mut self.exits);
        let pc = self.join_exits(&exits)?;
        self.ctx.after.insert(function.id, self.current.clone());
        self.ctx.constraints.insert(function.id, pc);
        trace!(
            function = %function.name.node,
            id = %function.id,
            tracked = self.current.len(),
            exits = exits.len(),
            definitions = self.definitions.len(),
            "indexed function"
        );
        Ok(())
    }

    /// Moves `current` to the join of all exits and returns the constraint
    /// under which the function completes.
    fn join_exits(&mut self, exits: &[Exit]) -> Result<Term, ChcError> {
        let tracked: Vec<NodeId> = self.current.keys().copied().collect();
        for decl in tracked {
            let Some(indices) = exits
                .iter()
                .map(|exit| exit.indices.get(&decl).copied())
                .collect::<Option<Vec<u32>>>()
            else {
                continue;
            };
            let Some((&last, earlier)) = indices.split_last() else {
                continue;
            };
            if earlier.iter().all(|index| *index == last) {
                self.current.insert(decl, last);
                continue;
            }
            let mut value = self.symbol(decl, last)?;
            for (exit, index) in exits[..earlier.len()].iter().zip(earlier).rev() {
                value = Term::ite(exit.cond.clone(), self.symbol(decl, *index)?, value);
            }
            let joined = self.bump(decl);
            let target = self.symbol(decl, joined)?;
            self.definitions.push(Term::eq(target, value));
        }

        let mut all = self.definitions.clone();
        match exits {
            [] => all.push(Term::Bool(false)),
            [only] => all.extend(only.cond.conjuncts().into_iter().cloned()),
            _ => all.push(Term::or(exits.iter().map(|exit| exit.cond.clone()).collect())),
        }
        Ok(all_of(all))
    }

    fn block(&mut self, block: &Block) -> Result<(), ChcError> {
        let scope: BTreeSet<NodeId> = self.current.keys().copied().collect();
        let mut stmts = block.stmts.iter();
        for stmt in stmts.by_ref() {
            self.stmt(stmt)?;
            if !self.live {
                break;
            }
        }
        let rest: Vec<&Stmt> = stmts.collect();
        if !rest.is_empty() {
            self.unreachable(&rest)?;
        }
        // Locals declared in the block leave scope.
        self.current.retain(|decl, _| scope.contains(decl));
        Ok(())
    }

    /// Statements after a `return` still get snapshots, under a `false` guard.
    fn unreachable(&mut self, stmts: &[&Stmt]) -> Result<(), ChcError> {
        let saved = self.current.clone();
        self.frames.push(Frame::guarded(Term::Bool(false)));
        for stmt in stmts {
            self.live = true;
            self.stmt(stmt)?;
        }
        self.frames.pop();
        self.live = false;
        self.current = saved;
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), ChcError> {
        self.record_at(stmt.id());
        match stmt {
            Stmt::VarDecl(s) => {
                let value = match &s.init {
                    Some(init) => self.eval(init)?,
                    None => self.sorts.sort_of(&s.decl.ty).zero(),
                };
                self.ctx
                    .declare(s.decl.id, &s.decl.name.node, &s.decl.ty, self.sorts);
                self.start(s.decl.id);
                let var = self.symbol(s.decl.id, 0)?;
                self.definitions.push(Term::eq(var, value));
            }
            Stmt::Assign(s) => {
                let value = self.eval(&s.value)?;
                if !self.current.contains_key(&s.target.decl) {
                    return Err(ChcError::MissingVariableIndex {
                        name: s.target.name.node.clone(),
                        node: s.id,
                    });
                }
                let index = self.bump(s.target.decl);
                let var = self.symbol(s.target.decl, index)?;
                self.definitions.push(Term::eq(var, value));
            }
            Stmt::If(s) => {
                let cond = self.eval(&s.cond)?;
                let saved = self.current.clone();

                self.frames.push(Frame::guarded(cond.clone()));
                self.block(&s.then_block)?;
                let then_frame = self.frames.pop().unwrap_or_default();
                let then_live = mem::replace(&mut self.live, true);
                let then_indices = mem::replace(&mut self.current, saved.clone());

                self.frames.push(Frame::guarded(Term::not(cond.clone())));
                if let Some(else_block) = &s.else_block {
                    self.block(else_block)?;
                }
                let else_frame = self.frames.pop().unwrap_or_default();
                let else_live = mem::replace(&mut self.live, true);
                let else_indices = mem::replace(&mut self.current, saved.clone());

                match (then_live, else_live) {
                    (true, true) => {}
                    (true, false) => {
                        self.current = then_indices;
                        let mut taken = vec![cond];
                        taken.extend(then_frame.requires);
                        self.require(all_of(taken));
                        return Ok(());
                    }
                    (false, true) => {
                        self.current = else_indices;
                        let mut taken = vec![Term::not(cond)];
                        taken.extend(else_frame.requires);
                        self.require(all_of(taken));
                        return Ok(());
                    }
                    (false, false) => {
                        self.live = false;
                        return Ok(());
                    }
                }

                for decl in saved.keys() {
                    let (Some(&t), Some(&e)) = (then_indices.get(decl), else_indices.get(decl)) else {
                        continue;
                    };
                    if t == e {
                        self.current.insert(*decl, t);
                        continue;
                    }
                    let merged = self.bump(*decl);
                    let value = Term::ite(cond.clone(), self.symbol(*decl, t)?, self.symbol(*decl, e)?);
                    let target = self.symbol(*decl, merged)?;
                    self.definitions.push(Term::eq(target, value));
                }

                if !then_frame.requires.is_empty() || !else_frame.requires.is_empty() {
                    let mut then_branch = vec![cond.clone()];
                    then_branch.extend(then_frame.requires);
                    let mut else_branch = vec![Term::not(cond)];
                    else_branch.extend(else_frame.requires);
                    self.require(Term::or(vec![Term::and(then_branch), Term::and(else_branch)]));
                }
            }
            Stmt::While(s) => {
                let mut targets = BTreeSet::new();
                self.loop_targets(&s.body, &mut targets);
                targets.retain(|decl| self.current.contains_key(decl));

                for decl in &targets {
                    self.havoc(*decl)?;
                }
                let cond = self.eval(&s.cond)?;
                self.frames.push(Frame::guarded(cond));
                self.block(&s.body)?;
                self.frames.pop();
                // Leaving through the condition stays possible after a body that returns.
                self.live = true;

                for decl in &targets {
                    self.havoc(*decl)?;
                }
                let exit = self.ctx.term_of(&s.cond, &self.current)?;
                self.require(Term::not(exit));
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    let value = self.eval(value)?;
                    if let &[ret] = self.returns.as_slice() {
                        let index = self.bump(ret);
                        let var = self.symbol(ret, index)?;
                        self.definitions.push(Term::eq(var, value));
                    }
                }
                let cond = self.path_condition();
                if cond.simplify() != Term::Bool(false) {
                    self.exits.push(Exit {
                        cond,
                        indices: self.current.clone(),
                    });
                }
                self.live = false;
            }
            Stmt::Expr(s) => {
                self.eval(&s.expr)?;
            }
            Stmt::Block(b) => self.block(b)?,
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Term, ChcError> {
        self.visit_calls(expr)?;
        self.ctx.term_of(expr, &self.current)
    }

    fn visit_calls(&mut self, expr: &Expr) -> Result<(), ChcError> {
        match &expr.kind {
            ExprKind::BoolLit(_) | ExprKind::NumberLit(_) | ExprKind::Var(_) => Ok(()),
            ExprKind::Unary { operand, .. } => self.visit_calls(operand),
            ExprKind::Binary { left, right, .. } => {
                self.visit_calls(left)?;
                self.visit_calls(right)
            }
            ExprKind::Call(call) => {
                for arg in &call.args {
                    self.visit_calls(arg)?;
                }
                self.record_at(expr.id);
                match &call.callee {
                    Callee::Builtin(Builtin::Require) => {
                        if let [cond] = call.args.as_slice() {
                            let c = self.ctx.term_of(cond, &self.current)?;
                            self.require(c);
                        }
                    }
                    Callee::Builtin(Builtin::Assert) => {}
                    Callee::Function { .. } => {
                        if !matches!(&expr.ty, Type::Tuple(_)) {
                            self.ctx.declare(expr.id, "call", &expr.ty, self.sorts);
                            self.counters.insert(expr.id, 0);
                            self.constrain_range(expr.id, 0)?;
                        }
                        // The callee may write any state slot.
                        for decl in self.state.clone() {
                            if self.current.contains_key(&decl) {
                                self.havoc(decl)?;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Everything a loop body can change: assignment targets, the return
    /// variable, and all state once the body calls a user function.
    fn loop_targets(&self, block: &Block, out: &mut BTreeSet<NodeId>) {
        for stmt in &block.stmts {
            match stmt {
                Stmt::VarDecl(s) => {
                    if let Some(init) = &s.init {
                        self.call_targets(init, out);
                    }
                }
                Stmt::Assign(s) => {
                    out.insert(s.target.decl);
                    self.call_targets(&s.value, out);
                }
                Stmt::If(s) => {
                    self.call_targets(&s.cond, out);
                    self.loop_targets(&s.then_block, out);
                    if let Some(b) = &s.else_block {
                        self.loop_targets(b, out);
                    }
                }
                Stmt::While(s) => {
                    self.call_targets(&s.cond, out);
                    self.loop_targets(&s.body, out);
                }
                Stmt::Return(s) => {
                    if let Some(value) = &s.value {
                        self.call_targets(value, out);
                        out.extend(self.returns.iter().copied());
                    }
                }
                Stmt::Expr(s) => self.call_targets(&s.expr, out),
                Stmt::Block(b) => self.loop_targets(b, out),
            }
        }
    }

    fn call_targets(&self, expr: &Expr, out: &mut BTreeSet<NodeId>) {
        match &expr.kind {
            ExprKind::BoolLit(_) | ExprKind::NumberLit(_) | ExprKind::Var(_) => {}
            ExprKind::Unary { operand, .. } => self.call_targets(operand, out),
            ExprKind::Binary { left, right, .. } => {
                self.call_targets(left, out);
                self.call_targets(right, out);
            }
            ExprKind::Call(call) => {
                if matches!(call.callee, Callee::Function { .. }) {
                    out.extend(self.state.iter().copied());
                }
                for arg in &call.args {
                    self.call_targets(arg, out);
                }
            }
        }
    }

    fn record_at(&mut self, node: NodeId) {
        self.ctx.at.insert(node, self.current.clone());
        let pc = self.path_constraints();
        self.ctx.constraints.insert(node, pc);
    }

    fn path_constraints(&self) -> Term {
        let mut all = self.definitions.clone();
        for frame in &self.frames {
            all.extend(frame.guard.iter().cloned());
            all.extend(frame.requires.iter().cloned());
        }
        all_of(all)
    }

    /// Guards and requires of the current path, without the definitions.
    fn path_condition(&self) -> Term {
        all_of(
            self.frames
                .iter()
                .flat_map(|frame| frame.guard.iter().chain(&frame.requires).cloned())
                .collect(),
        )
    }

    fn require(&mut self, cond: Term) {
        if let Some(frame) = self.frames.last_mut() {
            frame.requires.push(cond);
        }
    }

    fn symbol(&self, decl: NodeId, index: u32) -> Result<Term, ChcError> {
        self.ctx
            .symbol_term(decl, index)
            .ok_or_else(|| ChcError::MissingVariableIndex {
                name: format!("#{decl}"),
                node: decl,
            })
    }

    fn start(&mut self, decl: NodeId) {
        self.counters.insert(decl, 0);
        self.current.insert(decl, 0);
    }

    fn bump(&mut self, decl: NodeId) -> u32 {
        let counter = self.counters.entry(decl).or_insert(0);
        *counter += 1;
        let index = *counter;
        self.current.insert(decl, index);
        index
    }

    /// Fresh, unconstrained apart from the range of its type.
    fn havoc(&mut self, decl: NodeId) -> Result<(), ChcError> {
        let index = self.bump(decl);
        self.constrain_range(decl, index)
    }

    fn constrain_range(&mut self, decl: NodeId, index: u32) -> Result<(), ChcError> {
        let Some(ty) = self.ctx.symbols.get(decl).map(|s| s.ty.clone()) else {
            return Ok(());
        };
        let var = self.symbol(decl, index)?;
        let (lo, hi) = type_bounds(&ty);
        if let Some(lo) = lo {
            self.definitions.push(Term::le(Term::Int(lo), var.clone()));
        }
        if let Some(hi) = hi {
            self.definitions.push(Term::le(var, Term::Int(hi)));
        }
        Ok(())
    }
}

fn all_of(mut terms: Vec<Term>) -> Term {
    match terms.len() {
        0 => Term::Bool(true),
        1 => terms.remove(0),
        _ => Term::and(terms),
    }
}

/// Value range of an integer-like type, where it fits the term representation.
fn type_bounds(ty: &Type) -> (Option<i128>, Option<i128>) {
    fn unsigned_max(bits: u32) -> Option<i128> {
        (bits < 127).then(|| (1i128 << bits) - 1)
    }
    match ty {
        Type::Uint(bits) => (Some(0), unsigned_max(u32::from(*bits))),
        Type::Address => (Some(0), None),
        Type::FixedBytes(n) => (Some(0), unsigned_max(u32::from(*n) * 8)),
        Type::Int(bits) if *bits >= 1 && *bits <= 127 => {
            let half = 1i128 << (bits - 1);
            (Some(-half), Some(half - 1))
        }
        Type::Int(_) | Type::Bool | Type::String | Type::Mapping(_, _) | Type::Tuple(_) => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::DefaultSortMapper;
    use quill_ast::{AstBuilder, ExperimentalFeature, FunctionKind, Visibility};

    fn contains(term: &Term, needle: &str) -> bool {
        term.to_string().contains(needle)
    }

    #[test]
    fn state_variables_get_fresh_indices_per_function() {
        let mut b = AstBuilder::new();
        let x = b.state_var("x", Type::Uint(8), Visibility::Public);
        let lhs = b.var(&x);
        let one = b.number(1);
        let sum = b.binary(lhs, BinOp::Add, one);
        let inc = b.assign(&x, sum);
        let f = b.function("f", vec![], vec![inc]);
        let g = b.function("g", vec![], vec![]);
        let c = b.contract("C", vec![x.clone()], vec![f.clone(), g.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        assert_eq!(ssa.indices_before(f.id).unwrap()[&x.id], 1);
        assert_eq!(ssa.indices_after(f.id).unwrap()[&x.id], 2);
        assert_eq!(ssa.indices_before(g.id).unwrap()[&x.id], 3);
        assert_eq!(ssa.indices_after(g.id).unwrap()[&x.id], 3);

        let pc = ssa.path_constraints(f.id).unwrap();
        let x1 = format!("x_{}_1", x.id);
        let x2 = format!("x_{}_2", x.id);
        assert!(contains(&pc, &format!("(= {x2} (+ {x1} 1))")), "{pc}");
        assert!(contains(&pc, &format!("(<= {x1} 255)")), "{pc}");
        assert_eq!(
            ssa.variable_value(x.id, 2),
            Some(Term::var(x2, Sort::Int))
        );
    }

    #[test]
    fn branch_assignments_merge_through_ite_and_guards_reach_nested_asserts() {
        let mut b = AstBuilder::new();
        let flag = b.param("flag", Type::Bool);
        let y = b.state_var("y", Type::Uint(256), Visibility::Internal);

        let cond = b.var(&flag);
        let one = b.number(1);
        let set = b.assign(&y, one);
        let seen = b.var(&y);
        let zero = b.number(0);
        let check = b.binary(seen, BinOp::Gt, zero);
        let assert_call = b.assert_call(vec![check]);
        let assert_id = assert_call.id;
        let assert_stmt = b.expr_stmt(assert_call);
        let branch = b.if_stmt(cond, vec![set, assert_stmt], None);
        let f = b.function("f", vec![flag.clone()], vec![branch]);
        let c = b.contract("C", vec![y.clone()], vec![f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        let at_assert = ssa.indices_at(assert_id).unwrap();
        assert_eq!(at_assert[&y.id], 2);
        let pc = ssa.path_constraints(assert_id).unwrap();
        assert!(contains(&pc, &format!("flag_{}_0", flag.id)), "{pc}");

        assert_eq!(ssa.indices_after(f.id).unwrap()[&y.id], 3);
        let exit = ssa.path_constraints(f.id).unwrap();
        let ite = format!(
            "(= y_{id}_3 (ite flag_{fid}_0 y_{id}_2 y_{id}_1))",
            id = y.id,
            fid = flag.id
        );
        assert!(contains(&exit, &ite), "{exit}");
    }

    #[test]
    fn require_strengthens_later_constraints() {
        let mut b = AstBuilder::new();
        let p = b.param("p", Type::Uint(256));
        let lhs = b.var(&p);
        let ten = b.number(10);
        let bound = b.binary(lhs, BinOp::Lt, ten);
        let req = b.require_stmt(bound);
        let tail = b.bool_lit(true);
        let assert_stmt = b.assert_stmt(tail);
        let assert_id = assert_stmt.id();
        let f = b.function("f", vec![p.clone()], vec![req, assert_stmt]);
        let c = b.contract("C", vec![], vec![f]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();
        let pc = ssa.path_constraints(assert_id).unwrap();
        assert!(contains(&pc, &format!("(< p_{}_0 10)", p.id)), "{pc}");
    }

    #[test]
    fn loops_havoc_assigned_variables() {
        let mut b = AstBuilder::new();
        let i = b.local("i", Type::Uint(8));
        let zero = b.number(0);
        let decl = b.declare(i.clone(), Some(zero));
        let lhs = b.var(&i);
        let limit = b.number(3);
        let cond = b.binary(lhs, BinOp::Lt, limit);
        let lhs = b.var(&i);
        let one = b.number(1);
        let step = b.binary(lhs, BinOp::Add, one);
        let inc = b.assign(&i, step);
        let lp = b.while_stmt(cond, vec![inc]);
        let f = b.function("f", vec![], vec![decl, lp]);
        let c = b.contract("C", vec![], vec![f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();
        let exit = ssa.path_constraints(f.id).unwrap();
        // 0 = declaration, 1 = loop head, 2 = body, 3 = loop exit.
        assert!(contains(&exit, &format!("(not (< i_{}_3 3))", i.id)), "{exit}");
    }

    #[test]
    fn calls_to_user_functions_havoc_state() {
        let mut b = AstBuilder::new();
        let x = b.state_var("x", Type::Bool, Visibility::Public);
        let set_to = b.bool_lit(true);
        let set = b.assign(&x, set_to);
        let g = b.function("g", vec![], vec![set]);

        let clear_to = b.bool_lit(false);
        let clear = b.assign(&x, clear_to);
        let call = b.call("g", Some(g.id), vec![], Type::unit());
        let call_stmt = b.expr_stmt(call);
        let seen = b.var(&x);
        let check = b.not(seen);
        let assert_stmt = b.assert_stmt(check);
        let assert_id = assert_stmt.id();
        let f = b.function("f", vec![], vec![clear, call_stmt, assert_stmt]);
        let c = b.contract("C", vec![x.clone()], vec![g, f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        // g: 1 entry, 2 assigned. f: 3 entry, 4 cleared, 5 after the call.
        assert_eq!(ssa.indices_at(assert_id).unwrap()[&x.id], 5);
        assert_eq!(ssa.indices_after(f.id).unwrap()[&x.id], 5);
        let exit = ssa.path_constraints(f.id).unwrap();
        assert!(contains(&exit, &format!("(= x_{}_4 false)", x.id)), "{exit}");
    }

    #[test]
    fn loops_that_call_user_functions_havoc_state() {
        let mut b = AstBuilder::new();
        let x = b.state_var("x", Type::Uint(8), Visibility::Public);
        let g = b.function("g", vec![], vec![]);
        let go = b.bool_lit(true);
        let call = b.call("g", Some(g.id), vec![], Type::unit());
        let call_stmt = b.expr_stmt(call);
        let lp = b.while_stmt(go, vec![call_stmt]);
        let f = b.function("f", vec![], vec![lp]);
        let c = b.contract("C", vec![x.clone()], vec![g, f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        // g: 1. f: 2 entry, 3 loop head, 4 call, 5 loop exit.
        assert_eq!(ssa.indices_before(f.id).unwrap()[&x.id], 2);
        assert_eq!(ssa.indices_after(f.id).unwrap()[&x.id], 5);
    }

    #[test]
    fn early_returns_join_the_after_snapshot() {
        let mut b = AstBuilder::new();
        let flag = b.param("c", Type::Bool);
        let x = b.state_var("x", Type::Bool, Visibility::Public);

        let set_to = b.bool_lit(true);
        let set = b.assign(&x, set_to);
        let ret = b.return_stmt(None);
        let cond = b.var(&flag);
        let branch = b.if_stmt(cond, vec![set, ret], None);
        let clear_to = b.bool_lit(false);
        let clear = b.assign(&x, clear_to);
        let f = b.function("f", vec![flag.clone()], vec![branch, clear]);
        let c = b.contract("C", vec![x.clone()], vec![f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        // 1 entry, 2 early exit, 3 fall-through, 4 joined.
        assert_eq!(ssa.indices_after(f.id).unwrap()[&x.id], 4);
        let exit = ssa.path_constraints(f.id).unwrap();
        let joined = format!(
            "(= x_{id}_4 (ite c_{cid}_0 x_{id}_2 x_{id}_3))",
            id = x.id,
            cid = flag.id
        );
        assert!(contains(&exit, &joined), "{exit}");
        assert!(contains(&exit, &format!("(or c_{cid}_0 (not c_{cid}_0))", cid = flag.id)), "{exit}");
    }

    #[test]
    fn statements_after_a_return_are_unreachable() {
        let mut b = AstBuilder::new();
        let x = b.state_var("x", Type::Uint(8), Visibility::Public);
        let r = b.local("r", Type::Uint(8));
        let seven = b.number(7);
        let ret = b.return_stmt(Some(seven));
        let one = b.number(1);
        let bump = b.assign(&x, one);
        let never = b.bool_lit(false);
        let assert_stmt = b.assert_stmt(never);
        let assert_id = assert_stmt.id();
        let f = b.function_with(
            "f",
            FunctionKind::Function,
            Visibility::Public,
            vec![],
            vec![r.clone()],
            Some(vec![ret, bump, assert_stmt]),
        );
        let c = b.contract("C", vec![x.clone()], vec![f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let ssa = SsaContext::build(&unit, &DefaultSortMapper).unwrap();

        assert_eq!(ssa.path_constraints(assert_id).unwrap().simplify(), Term::Bool(false));
        // The dead assignment does not reach the exit.
        let after = ssa.indices_after(f.id).unwrap();
        assert_eq!(after[&x.id], 1);
        assert_eq!(after[&r.id], 1);
        let exit = ssa.path_constraints(f.id).unwrap();
        assert!(contains(&exit, &format!("(= r_{}_1 7)", r.id)), "{exit}");
    }

    #[test]
    fn assigning_an_unknown_variable_is_an_internal_error() {
        let mut b = AstBuilder::new();
        let ghost = b.local("ghost", Type::Uint(8));
        let one = b.number(1);
        let assign = b.assign(&ghost, one);
        let f = b.function("f", vec![], vec![assign]);
        let c = b.contract("C", vec![], vec![f]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c]);

        let err = SsaContext::build(&unit, &DefaultSortMapper).unwrap_err();
        assert!(matches!(err, ChcError::MissingVariableIndex { ref name, .. } if name == "ghost"));
    }
}
