use std::fmt;

use miette::Diagnostic;
use quill_ast::{NodeId, Span};
use thiserror::Error;

use crate::solver::SolverError;

/// Where an index snapshot was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramPoint {
    Before,
    After,
    At,
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramPoint::Before => write!(f, "before"),
            ProgramPoint::After => write!(f, "after"),
            ProgramPoint::At => write!(f, "at"),
        }
    }
}

/// Internal invariant violations. Any of these aborts the analysis pass.
#[derive(Debug, Error, Diagnostic)]
pub enum ChcError {
    #[error("assertion expects exactly one boolean argument, found {found}")]
    #[diagnostic(code(quill::chc::malformed_assertion))]
    MalformedAssertion {
        found: String,
        #[label("in this call")]
        span: Span,
    },

    #[error("no variable indices recorded {point} node {node}")]
    #[diagnostic(code(quill::chc::missing_indices))]
    MissingIndices { node: NodeId, point: ProgramPoint },

    #[error("variable `{name}` has no generation index at node {node}")]
    #[diagnostic(code(quill::chc::missing_variable_index))]
    MissingVariableIndex { name: String, node: NodeId },

    #[error("no path constraints recorded for node {node}")]
    #[diagnostic(code(quill::chc::missing_constraints))]
    MissingConstraints { node: NodeId },

    #[error("no relation interned for function node {node}")]
    #[diagnostic(code(quill::chc::missing_relation))]
    MissingRelation { node: NodeId },

    #[error("unsupported expression: {message}")]
    #[diagnostic(code(quill::chc::unsupported))]
    UnsupportedExpression {
        message: String,
        #[label]
        span: Span,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solver(#[from] SolverError),
}
