use std::collections::BTreeMap;

use quill_ast::{Expr, NodeId};

use crate::error::ChcError;
use crate::term::Term;

/// Generation index of every tracked variable, keyed by declaration id.
pub type VariableIndices = BTreeMap<NodeId, u32>;

/// Symbolic execution results the encoder consumes.
///
/// Snapshots are keyed by node id: functions have `before`/`after`
/// snapshots, statements and call expressions have `at` snapshots.
pub trait SymbolicState {
    fn indices_before(&self, node: NodeId) -> Option<&VariableIndices>;

    fn indices_after(&self, node: NodeId) -> Option<&VariableIndices>;

    fn indices_at(&self, node: NodeId) -> Option<&VariableIndices>;

    /// Accumulated path constraints: at a statement, everything known on
    /// entry to it; at a function, everything known at its end.
    fn path_constraints(&self, node: NodeId) -> Option<Term>;

    /// Symbol of `decl` at generation `index`.
    fn variable_value(&self, decl: NodeId, index: u32) -> Option<Term>;

    /// Symbolic value of `expr` evaluated under `indices`.
    fn expression_value(&self, expr: &Expr, indices: &VariableIndices) -> Result<Term, ChcError>;
}
