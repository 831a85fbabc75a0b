#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use miette::SourceSpan;

mod builder;

pub use builder::AstBuilder;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub type Ident = Spanned<String>;

/// Stable identity of an AST node.
///
/// Ids are handed out densely, in construction order, by [`AstBuilder`], so
/// they double as indices into per-node side tables (see [`NodeTable`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense side table keyed by [`NodeId`].
#[derive(Clone, Debug)]
pub struct NodeTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for NodeTable<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> NodeTable<T> {
    pub fn with_capacity(nodes: usize) -> Self {
        let mut slots = Vec::with_capacity(nodes);
        slots.resize_with(nodes, || None);
        Self { slots }
    }

    /// Stores `value` for `id`, returning the previous entry.
    pub fn insert(&mut self, id: NodeId, value: T) -> Option<T> {
        let idx = id.index();
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx].replace(value)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (NodeId(i as u32), v)))
    }
}

/// Opt-in language features enabled by a `pragma experimental` directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExperimentalFeature {
    /// Run the formal-verification passes on this source unit.
    SmtChecker,
    AbiEncoderV2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceUnit {
    pub id: NodeId,
    pub span: Span,
    pub features: BTreeSet<ExperimentalFeature>,
    pub contracts: Vec<ContractDef>,
    /// Number of node ids allocated while building this unit.
    pub node_count: usize,
}

impl SourceUnit {
    pub fn has_feature(&self, feature: ExperimentalFeature) -> bool {
        self.features.contains(&feature)
    }

    pub fn contract(&self, id: NodeId) -> Option<&ContractDef> {
        self.contracts.iter().find(|c| c.id == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractDef {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub kind: ContractKind,
    /// Inheritance linearization, most derived first. Always starts with `id`.
    pub linearized_bases: Vec<NodeId>,
    pub state_variables: Vec<VarDecl>,
    pub functions: Vec<FunctionDef>,
}

impl ContractDef {
    pub fn constructor(&self) -> Option<&FunctionDef> {
        self.functions
            .iter()
            .find(|f| f.kind == FunctionKind::Constructor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    pub fn is_visible_in_derived_contracts(self) -> bool {
        !matches!(self, Visibility::Private)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub ty: Type,
    pub visibility: Visibility,
    pub is_state_variable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Constructor,
    Function,
    Fallback,
    Receive,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub params: Vec<VarDecl>,
    pub returns: Vec<VarDecl>,
    /// `None` for unimplemented (interface/abstract) functions.
    pub body: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    VarDecl(VarDeclStmt),
    Assign(AssignStmt),
    If(IfStmt),
    While(WhileStmt),
    Return(ReturnStmt),
    Expr(ExprStmt),
    Block(Block),
}

impl Stmt {
    pub fn id(&self) -> NodeId {
        match self {
            Stmt::VarDecl(s) => s.id,
            Stmt::Assign(s) => s.id,
            Stmt::If(s) => s.id,
            Stmt::While(s) => s.id,
            Stmt::Return(s) => s.id,
            Stmt::Expr(s) => s.id,
            Stmt::Block(b) => b.id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Expr(s) => s.span,
            Stmt::Block(b) => b.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDeclStmt {
    pub id: NodeId,
    pub span: Span,
    pub decl: VarDecl,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub id: NodeId,
    pub span: Span,
    pub target: VarRef,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub id: NodeId,
    pub span: Span,
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub id: NodeId,
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub id: NodeId,
    pub span: Span,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExprStmt {
    pub id: NodeId,
    pub span: Span,
    pub expr: Expr,
}

/// A resolved reference to a variable declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct VarRef {
    pub decl: NodeId,
    pub name: Ident,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    /// Type annotation assigned by the type checker.
    pub ty: Type,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    BoolLit(bool),
    NumberLit(i128),
    Var(VarRef),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Call(FunctionCall),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub callee: Callee,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Callee {
    Builtin(Builtin),
    /// A user-defined function; `target` is the resolved definition when known.
    Function { name: Ident, target: Option<NodeId> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Assert,
    Require,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Uint(u16),
    Int(u16),
    Address,
    FixedBytes(u8),
    String,
    Mapping(Box<Type>, Box<Type>),
    /// Multiple return values; the empty tuple is the type of a call without results.
    Tuple(Vec<Type>),
}

impl Type {
    pub fn unit() -> Self {
        Type::Tuple(Vec::new())
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Bool)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Uint(bits) => write!(f, "uint{bits}"),
            Type::Int(bits) => write!(f, "int{bits}"),
            Type::Address => write!(f, "address"),
            Type::FixedBytes(n) => write!(f, "bytes{n}"),
            Type::String => write!(f, "string"),
            Type::Mapping(k, v) => write!(f, "mapping({k} => {v})"),
            Type::Tuple(items) => {
                write!(f, "tuple(")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
        }
    }
}
