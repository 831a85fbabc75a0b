use std::collections::BTreeSet;
use std::fmt;

use crate::sort::Sort;
use crate::term::{RelationApp, Term};

/// An uninterpreted relation: `name : (arg_sorts) -> Bool`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Relation {
    pub name: String,
    pub arg_sorts: Vec<Sort>,
}

impl Relation {
    pub fn new(name: impl Into<String>, arg_sorts: Vec<Sort>) -> Self {
        Self {
            name: name.into(),
            arg_sorts,
        }
    }

    pub fn arity(&self) -> usize {
        self.arg_sorts.len()
    }

    pub fn apply(&self, args: Vec<Term>) -> RelationApp {
        debug_assert_eq!(args.len(), self.arity(), "arity mismatch applying {}", self.name);
        RelationApp::new(self.name.clone(), args)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(declare-fun {} (", self.name)?;
        for (i, s) in self.arg_sorts.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{s}")?;
        }
        write!(f, ") Bool)")
    }
}

/// `body_1 ∧ ... ∧ body_n ⇒ head`, universally closed over its free variables.
///
/// Body entries are either relation applications (`Term::App`) or plain
/// constraints. An empty body makes the clause a fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HornClause {
    pub name: Option<String>,
    pub body: Vec<Term>,
    pub head: RelationApp,
}

impl HornClause {
    pub fn fact(name: impl Into<String>, head: RelationApp) -> Self {
        Self {
            name: Some(name.into()),
            body: Vec::new(),
            head,
        }
    }

    pub fn rule(name: impl Into<String>, body: Vec<Term>, head: RelationApp) -> Self {
        Self {
            name: Some(name.into()),
            body,
            head,
        }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// Relation applications in the body.
    pub fn body_apps(&self) -> impl Iterator<Item = &RelationApp> {
        self.body.iter().filter_map(|t| match t {
            Term::App(app) => Some(app),
            _ => None,
        })
    }

    /// Non-relational body entries.
    pub fn constraints(&self) -> impl Iterator<Item = &Term> {
        self.body.iter().filter(|t| !matches!(t, Term::App(_)))
    }

    pub fn mentions(&self, relation: &str) -> bool {
        self.head.relation == relation || self.body_apps().any(|a| a.relation == relation)
    }

    /// Free variables of body then head, in order of first occurrence.
    pub fn free_vars(&self) -> Vec<(String, Sort)> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for t in &self.body {
            t.collect_free_vars(&mut out, &mut seen);
        }
        for t in &self.head.args {
            t.collect_free_vars(&mut out, &mut seen);
        }
        out
    }

    /// The clause as a single implication term.
    pub fn to_term(&self) -> Term {
        let head = Term::App(self.head.clone());
        match self.body.as_slice() {
            [] => head,
            [single] => Term::implies(single.clone(), head),
            _ => Term::implies(Term::and(self.body.clone()), head),
        }
    }
}

impl fmt::Display for HornClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_term())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clause_splits_body_into_apps_and_constraints() {
        let state = Term::var("x_3_1", Sort::Int);
        let entry = Relation::new("function_7", vec![Sort::Int]);
        let error = Relation::new("error_9", vec![]);
        let clause = HornClause::rule(
            "assert_5_to_error",
            vec![
                Term::App(entry.apply(vec![state.clone()])),
                Term::Bool(true),
                Term::not(Term::gt(state.clone(), Term::Int(0))),
            ],
            error.apply(vec![]),
        );

        assert_eq!(clause.body_apps().count(), 1);
        assert_eq!(clause.constraints().count(), 2);
        assert!(clause.mentions("function_7"));
        assert!(clause.mentions("error_9"));
        assert!(!clause.mentions("interface_9"));
        assert_eq!(clause.free_vars(), vec![("x_3_1".to_string(), Sort::Int)]);
        assert_eq!(
            clause.to_string(),
            "(=> (and (function_7 x_3_1) true (not (> x_3_1 0))) error_9)"
        );
    }

    #[test]
    fn facts_print_as_their_head() {
        let iface = Relation::new("interface_2", vec![Sort::Int, Sort::Bool]);
        let fact = HornClause::fact("interface", iface.apply(vec![Term::Int(0), Term::Bool(false)]));
        assert!(fact.is_fact());
        assert_eq!(fact.to_string(), "(interface_2 0 false)");
        assert_eq!(iface.to_string(), "(declare-fun interface_2 (Int Bool) Bool)");
    }
}
