use miette::Diagnostic;
use quill_ast::Span;
use thiserror::Error;

use crate::solver::CheckResult;

/// A solver outcome surfaced to the user.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(quill::chc), severity(Warning))]
pub struct ChcWarning {
    pub message: String,
    #[label]
    pub span: Span,
    pub outcome: CheckResult,
    #[help]
    pub counterexample: Option<String>,
}

/// Receives location-tagged warnings produced by the analysis.
pub trait DiagnosticSink {
    fn warn(&mut self, warning: ChcWarning);
}

impl DiagnosticSink for Vec<ChcWarning> {
    fn warn(&mut self, warning: ChcWarning) {
        self.push(warning);
    }
}
