use std::collections::BTreeSet;

use crate::{
    span, AssignStmt, BinOp, Block, Builtin, Callee, ContractDef, ContractKind, ExperimentalFeature,
    Expr, ExprKind, ExprStmt, FunctionCall, FunctionDef, FunctionKind, Ident, IfStmt, NodeId,
    ReturnStmt, SourceUnit, Span, Spanned, Stmt, Type, UnaryOp, VarDecl, VarDeclStmt, VarRef,
    Visibility, WhileStmt,
};

/// Constructs typed AST nodes and hands out their ids.
///
/// Children are always built before their parents, so ids grow bottom-up and
/// the source unit receives the last one. Every node gets a one-byte span at
/// the offset of its id, which keeps locations distinct without source text.
#[derive(Debug, Default)]
pub struct AstBuilder {
    next: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> (NodeId, Span) {
        let id = NodeId(self.next);
        self.next += 1;
        (id, span(id.index(), 1))
    }

    fn ident(span: Span, name: &str) -> Ident {
        Spanned::new(span, name.to_string())
    }

    fn var_decl(&mut self, name: &str, ty: Type, visibility: Visibility, is_state: bool) -> VarDecl {
        let (id, span) = self.alloc();
        VarDecl {
            id,
            span,
            name: Self::ident(span, name),
            ty,
            visibility,
            is_state_variable: is_state,
        }
    }

    pub fn state_var(&mut self, name: &str, ty: Type, visibility: Visibility) -> VarDecl {
        self.var_decl(name, ty, visibility, true)
    }

    pub fn param(&mut self, name: &str, ty: Type) -> VarDecl {
        self.var_decl(name, ty, Visibility::Internal, false)
    }

    pub fn local(&mut self, name: &str, ty: Type) -> VarDecl {
        self.var_decl(name, ty, Visibility::Internal, false)
    }

    fn expr(&mut self, ty: Type, kind: ExprKind) -> Expr {
        let (id, span) = self.alloc();
        Expr { id, span, ty, kind }
    }

    pub fn bool_lit(&mut self, value: bool) -> Expr {
        self.expr(Type::Bool, ExprKind::BoolLit(value))
    }

    pub fn number(&mut self, value: i128) -> Expr {
        self.expr(Type::Uint(256), ExprKind::NumberLit(value))
    }

    pub fn var(&mut self, decl: &VarDecl) -> Expr {
        let kind = ExprKind::Var(VarRef {
            decl: decl.id,
            name: decl.name.clone(),
        });
        self.expr(decl.ty.clone(), kind)
    }

    pub fn not(&mut self, operand: Expr) -> Expr {
        self.expr(
            Type::Bool,
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
        )
    }

    pub fn neg(&mut self, operand: Expr) -> Expr {
        let ty = operand.ty.clone();
        self.expr(
            ty,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            },
        )
    }

    pub fn binary(&mut self, left: Expr, op: BinOp, right: Expr) -> Expr {
        let ty = if op.is_comparison() || op.is_logical() {
            Type::Bool
        } else {
            left.ty.clone()
        };
        self.expr(
            ty,
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        )
    }

    pub fn builtin_call(&mut self, builtin: Builtin, args: Vec<Expr>) -> Expr {
        self.expr(
            Type::unit(),
            ExprKind::Call(FunctionCall {
                callee: Callee::Builtin(builtin),
                args,
            }),
        )
    }

    pub fn assert_call(&mut self, args: Vec<Expr>) -> Expr {
        self.builtin_call(Builtin::Assert, args)
    }

    pub fn require_call(&mut self, args: Vec<Expr>) -> Expr {
        self.builtin_call(Builtin::Require, args)
    }

    pub fn call(&mut self, name: &str, target: Option<NodeId>, args: Vec<Expr>, ret: Type) -> Expr {
        let (id, span) = self.alloc();
        Expr {
            id,
            span,
            ty: ret,
            kind: ExprKind::Call(FunctionCall {
                callee: Callee::Function {
                    name: Self::ident(span, name),
                    target,
                },
                args,
            }),
        }
    }

    pub fn expr_stmt(&mut self, expr: Expr) -> Stmt {
        let (id, span) = self.alloc();
        Stmt::Expr(ExprStmt { id, span, expr })
    }

    /// `assert(cond);`
    pub fn assert_stmt(&mut self, cond: Expr) -> Stmt {
        let call = self.assert_call(vec![cond]);
        self.expr_stmt(call)
    }

    /// `require(cond);`
    pub fn require_stmt(&mut self, cond: Expr) -> Stmt {
        let call = self.require_call(vec![cond]);
        self.expr_stmt(call)
    }

    pub fn declare(&mut self, decl: VarDecl, init: Option<Expr>) -> Stmt {
        let (id, span) = self.alloc();
        Stmt::VarDecl(VarDeclStmt {
            id,
            span,
            decl,
            init,
        })
    }

    pub fn assign(&mut self, target: &VarDecl, value: Expr) -> Stmt {
        let (id, span) = self.alloc();
        Stmt::Assign(AssignStmt {
            id,
            span,
            target: VarRef {
                decl: target.id,
                name: target.name.clone(),
            },
            value,
        })
    }

    pub fn if_stmt(&mut self, cond: Expr, then_stmts: Vec<Stmt>, else_stmts: Option<Vec<Stmt>>) -> Stmt {
        let then_block = self.block(then_stmts);
        let else_block = else_stmts.map(|stmts| self.block(stmts));
        let (id, span) = self.alloc();
        Stmt::If(IfStmt {
            id,
            span,
            cond,
            then_block,
            else_block,
        })
    }

    pub fn while_stmt(&mut self, cond: Expr, body: Vec<Stmt>) -> Stmt {
        let body = self.block(body);
        let (id, span) = self.alloc();
        Stmt::While(WhileStmt {
            id,
            span,
            cond,
            body,
        })
    }

    pub fn return_stmt(&mut self, value: Option<Expr>) -> Stmt {
        let (id, span) = self.alloc();
        Stmt::Return(ReturnStmt { id, span, value })
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> Block {
        let (id, span) = self.alloc();
        Block { id, span, stmts }
    }

    pub fn nested_block(&mut self, stmts: Vec<Stmt>) -> Stmt {
        Stmt::Block(self.block(stmts))
    }

    /// A public function with a body and no return values.
    pub fn function(&mut self, name: &str, params: Vec<VarDecl>, body: Vec<Stmt>) -> FunctionDef {
        self.function_with(
            name,
            FunctionKind::Function,
            Visibility::Public,
            params,
            Vec::new(),
            Some(body),
        )
    }

    pub fn function_with(
        &mut self,
        name: &str,
        kind: FunctionKind,
        visibility: Visibility,
        params: Vec<VarDecl>,
        returns: Vec<VarDecl>,
        body: Option<Vec<Stmt>>,
    ) -> FunctionDef {
        let body = body.map(|stmts| self.block(stmts));
        let (id, span) = self.alloc();
        FunctionDef {
            id,
            span,
            name: Self::ident(span, name),
            kind,
            visibility,
            params,
            returns,
            body,
        }
    }

    pub fn constructor(&mut self, params: Vec<VarDecl>, body: Vec<Stmt>) -> FunctionDef {
        self.function_with(
            "",
            FunctionKind::Constructor,
            Visibility::Public,
            params,
            Vec::new(),
            Some(body),
        )
    }

    pub fn contract(&mut self, name: &str, state_variables: Vec<VarDecl>, functions: Vec<FunctionDef>) -> ContractDef {
        self.derived_contract(name, &[], state_variables, functions)
    }

    /// A contract inheriting from `bases`, listed in declaration order (`is A, B`).
    pub fn derived_contract(
        &mut self,
        name: &str,
        bases: &[&ContractDef],
        state_variables: Vec<VarDecl>,
        functions: Vec<FunctionDef>,
    ) -> ContractDef {
        let (id, span) = self.alloc();

        // C3 merge, most derived first; the right-most base is closest to the contract.
        let mut linearized = vec![id];
        let mut seqs: Vec<Vec<NodeId>> = bases
            .iter()
            .rev()
            .map(|b| b.linearized_bases.clone())
            .collect();
        seqs.push(bases.iter().rev().map(|b| b.id).collect());
        loop {
            seqs.retain(|s| !s.is_empty());
            if seqs.is_empty() {
                break;
            }
            let head = seqs
                .iter()
                .map(|s| s[0])
                .find(|c| !seqs.iter().any(|s| s[1..].contains(c)));
            let Some(head) = head else {
                // Inconsistent hierarchy; keep the remaining bases in order.
                for b in seqs.iter().flatten() {
                    if !linearized.contains(b) {
                        linearized.push(*b);
                    }
                }
                break;
            };
            linearized.push(head);
            for s in seqs.iter_mut() {
                if s[0] == head {
                    s.remove(0);
                }
            }
        }

        ContractDef {
            id,
            span,
            name: Self::ident(span, name),
            kind: ContractKind::Contract,
            linearized_bases: linearized,
            state_variables,
            functions,
        }
    }

    pub fn source_unit(mut self, features: &[ExperimentalFeature], contracts: Vec<ContractDef>) -> SourceUnit {
        let (id, span) = self.alloc();
        SourceUnit {
            id,
            span,
            features: features.iter().copied().collect::<BTreeSet<_>>(),
            contracts,
            node_count: self.next as usize,
        }
    }
}
