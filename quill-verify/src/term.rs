//! Solver-level terms.
//!
//! Terms print as SMT-LIB2 (`Display`), so the same value is used for rule
//! names in logs, for the external solver script and for test assertions.

use std::collections::BTreeSet;
use std::fmt;

use crate::sort::Sort;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Var { name: String, sort: Sort },
    Bool(bool),
    Int(i128),

    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),

    Eq(Box<Term>, Box<Term>),
    Lt(Box<Term>, Box<Term>),
    Le(Box<Term>, Box<Term>),
    Gt(Box<Term>, Box<Term>),
    Ge(Box<Term>, Box<Term>),

    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    /// Euclidean integer division (`div`).
    Div(Box<Term>, Box<Term>),
    Mod(Box<Term>, Box<Term>),
    Neg(Box<Term>),

    Ite(Box<Term>, Box<Term>, Box<Term>),

    App(RelationApp),
}

/// Application of an uninterpreted relation to argument terms.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationApp {
    pub relation: String,
    pub args: Vec<Term>,
}

impl RelationApp {
    pub fn new(relation: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            relation: relation.into(),
            args,
        }
    }
}

impl From<RelationApp> for Term {
    fn from(app: RelationApp) -> Self {
        Term::App(app)
    }
}

impl Term {
    pub fn var(name: impl Into<String>, sort: Sort) -> Self {
        Term::Var {
            name: name.into(),
            sort,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(t: Term) -> Self {
        Term::Not(Box::new(t))
    }

    pub fn and(terms: Vec<Term>) -> Self {
        Term::And(terms)
    }

    pub fn or(terms: Vec<Term>) -> Self {
        Term::Or(terms)
    }

    pub fn implies(lhs: Term, rhs: Term) -> Self {
        Term::Implies(Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(lhs: Term, rhs: Term) -> Self {
        Term::Eq(Box::new(lhs), Box::new(rhs))
    }

    pub fn ne(lhs: Term, rhs: Term) -> Self {
        Term::not(Term::eq(lhs, rhs))
    }

    pub fn lt(lhs: Term, rhs: Term) -> Self {
        Term::Lt(Box::new(lhs), Box::new(rhs))
    }

    pub fn le(lhs: Term, rhs: Term) -> Self {
        Term::Le(Box::new(lhs), Box::new(rhs))
    }

    pub fn gt(lhs: Term, rhs: Term) -> Self {
        Term::Gt(Box::new(lhs), Box::new(rhs))
    }

    pub fn ge(lhs: Term, rhs: Term) -> Self {
        Term::Ge(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(lhs: Term, rhs: Term) -> Self {
        Term::Add(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(lhs: Term, rhs: Term) -> Self {
        Term::Sub(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(lhs: Term, rhs: Term) -> Self {
        Term::Mul(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(lhs: Term, rhs: Term) -> Self {
        Term::Div(Box::new(lhs), Box::new(rhs))
    }

    pub fn modulo(lhs: Term, rhs: Term) -> Self {
        Term::Mod(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(t: Term) -> Self {
        Term::Neg(Box::new(t))
    }

    pub fn ite(cond: Term, then: Term, els: Term) -> Self {
        Term::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    /// Free variables in order of first occurrence.
    pub fn free_vars(&self) -> Vec<(String, Sort)> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        self.collect_free_vars(&mut out, &mut seen);
        out
    }

    pub(crate) fn collect_free_vars(&self, out: &mut Vec<(String, Sort)>, seen: &mut BTreeSet<String>) {
        match self {
            Term::Var { name, sort } => {
                if seen.insert(name.clone()) {
                    out.push((name.clone(), *sort));
                }
            }
            Term::Bool(_) | Term::Int(_) => {}
            Term::Not(t) | Term::Neg(t) => t.collect_free_vars(out, seen),
            Term::And(ts) | Term::Or(ts) => {
                for t in ts {
                    t.collect_free_vars(out, seen);
                }
            }
            Term::Implies(a, b)
            | Term::Eq(a, b)
            | Term::Lt(a, b)
            | Term::Le(a, b)
            | Term::Gt(a, b)
            | Term::Ge(a, b)
            | Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Div(a, b)
            | Term::Mod(a, b) => {
                a.collect_free_vars(out, seen);
                b.collect_free_vars(out, seen);
            }
            Term::Ite(c, t, e) => {
                c.collect_free_vars(out, seen);
                t.collect_free_vars(out, seen);
                e.collect_free_vars(out, seen);
            }
            Term::App(app) => {
                for a in &app.args {
                    a.collect_free_vars(out, seen);
                }
            }
        }
    }

    pub fn collect_int_literals(&self, out: &mut BTreeSet<i128>) {
        match self {
            Term::Int(n) => {
                out.insert(*n);
            }
            Term::Var { .. } | Term::Bool(_) => {}
            Term::Not(t) | Term::Neg(t) => t.collect_int_literals(out),
            Term::And(ts) | Term::Or(ts) => ts.iter().for_each(|t| t.collect_int_literals(out)),
            Term::Implies(a, b)
            | Term::Eq(a, b)
            | Term::Lt(a, b)
            | Term::Le(a, b)
            | Term::Gt(a, b)
            | Term::Ge(a, b)
            | Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Div(a, b)
            | Term::Mod(a, b) => {
                a.collect_int_literals(out);
                b.collect_int_literals(out);
            }
            Term::Ite(c, t, e) => {
                c.collect_int_literals(out);
                t.collect_int_literals(out);
                e.collect_int_literals(out);
            }
            Term::App(app) => app.args.iter().for_each(|t| t.collect_int_literals(out)),
        }
    }

    pub fn contains_app(&self) -> bool {
        match self {
            Term::App(_) => true,
            Term::Var { .. } | Term::Bool(_) | Term::Int(_) => false,
            Term::Not(t) | Term::Neg(t) => t.contains_app(),
            Term::And(ts) | Term::Or(ts) => ts.iter().any(Term::contains_app),
            Term::Implies(a, b)
            | Term::Eq(a, b)
            | Term::Lt(a, b)
            | Term::Le(a, b)
            | Term::Gt(a, b)
            | Term::Ge(a, b)
            | Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Div(a, b)
            | Term::Mod(a, b) => a.contains_app() || b.contains_app(),
            Term::Ite(c, t, e) => c.contains_app() || t.contains_app() || e.contains_app(),
        }
    }

    /// Top-level conjuncts, with nested `and`s flattened.
    pub fn conjuncts(&self) -> Vec<&Term> {
        let mut out = Vec::new();
        fn go<'t>(t: &'t Term, out: &mut Vec<&'t Term>) {
            match t {
                Term::And(ts) => ts.iter().for_each(|t| go(t, out)),
                Term::Bool(true) => {}
                other => out.push(other),
            }
        }
        go(self, &mut out);
        out
    }

    /// Constant folding plus the syntactic identities `t = t`, `t <= t`, `t < t`.
    pub fn simplify(&self) -> Term {
        match self {
            Term::Var { .. } | Term::Bool(_) | Term::Int(_) => self.clone(),
            Term::Not(inner) => match inner.simplify() {
                Term::Bool(b) => Term::Bool(!b),
                Term::Not(t) => *t,
                other => Term::not(other),
            },
            Term::And(ts) => {
                let mut out = Vec::new();
                for t in ts {
                    match t.simplify() {
                        Term::Bool(true) => {}
                        Term::Bool(false) => return Term::Bool(false),
                        Term::And(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                match out.len() {
                    0 => Term::Bool(true),
                    1 => out.remove(0),
                    _ => Term::And(out),
                }
            }
            Term::Or(ts) => {
                let mut out = Vec::new();
                for t in ts {
                    match t.simplify() {
                        Term::Bool(false) => {}
                        Term::Bool(true) => return Term::Bool(true),
                        Term::Or(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                match out.len() {
                    0 => Term::Bool(false),
                    1 => out.remove(0),
                    _ => Term::Or(out),
                }
            }
            Term::Implies(a, b) => match (a.simplify(), b.simplify()) {
                (Term::Bool(false), _) | (_, Term::Bool(true)) => Term::Bool(true),
                (Term::Bool(true), rhs) => rhs,
                (lhs, Term::Bool(false)) => Term::not(lhs).simplify(),
                (lhs, rhs) => Term::implies(lhs, rhs),
            },
            Term::Eq(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    _ if a == b => Term::Bool(true),
                    (Term::Int(x), Term::Int(y)) => Term::Bool(x == y),
                    (Term::Bool(x), Term::Bool(y)) => Term::Bool(x == y),
                    _ => Term::eq(a, b),
                }
            }
            Term::Lt(a, b) => compare(a, b, false, |x, y| x < y, Term::lt),
            Term::Le(a, b) => compare(a, b, true, |x, y| x <= y, Term::le),
            Term::Gt(a, b) => compare(a, b, false, |x, y| x > y, Term::gt),
            Term::Ge(a, b) => compare(a, b, true, |x, y| x >= y, Term::ge),
            Term::Add(a, b) => arith(a, b, i128::checked_add, Term::add),
            Term::Sub(a, b) => arith(a, b, i128::checked_sub, Term::sub),
            Term::Mul(a, b) => arith(a, b, i128::checked_mul, Term::mul),
            Term::Div(a, b) => arith(a, b, euclid_div, Term::div),
            Term::Mod(a, b) => arith(a, b, euclid_rem, Term::modulo),
            Term::Neg(t) => match t.simplify() {
                Term::Int(n) => n.checked_neg().map(Term::Int).unwrap_or_else(|| Term::neg(Term::Int(n))),
                other => Term::neg(other),
            },
            Term::Ite(c, t, e) => {
                let (t, e) = (t.simplify(), e.simplify());
                match c.simplify() {
                    Term::Bool(true) => t,
                    Term::Bool(false) => e,
                    _ if t == e => t,
                    c => Term::ite(c, t, e),
                }
            }
            Term::App(app) => Term::App(RelationApp {
                relation: app.relation.clone(),
                args: app.args.iter().map(Term::simplify).collect(),
            }),
        }
    }
}

pub(crate) fn euclid_div(x: i128, y: i128) -> Option<i128> {
    if y == 0 { None } else { x.checked_div_euclid(y) }
}

pub(crate) fn euclid_rem(x: i128, y: i128) -> Option<i128> {
    if y == 0 { None } else { x.checked_rem_euclid(y) }
}

fn compare(
    a: &Term,
    b: &Term,
    reflexive: bool,
    op: impl Fn(i128, i128) -> bool,
    rebuild: impl Fn(Term, Term) -> Term,
) -> Term {
    let (a, b) = (a.simplify(), b.simplify());
    match (&a, &b) {
        _ if a == b => Term::Bool(reflexive),
        (Term::Int(x), Term::Int(y)) => Term::Bool(op(*x, *y)),
        _ => rebuild(a, b),
    }
}

fn arith(
    a: &Term,
    b: &Term,
    op: impl Fn(i128, i128) -> Option<i128>,
    rebuild: impl Fn(Term, Term) -> Term,
) -> Term {
    let (a, b) = (a.simplify(), b.simplify());
    if let (Term::Int(x), Term::Int(y)) = (&a, &b) {
        if let Some(v) = op(*x, *y) {
            return Term::Int(v);
        }
    }
    rebuild(a, b)
}

fn write_list(f: &mut fmt::Formatter<'_>, op: &str, items: &[&dyn fmt::Display]) -> fmt::Result {
    write!(f, "({op}")?;
    for t in items {
        write!(f, " {t}")?;
    }
    write!(f, ")")
}

fn write_terms(f: &mut fmt::Formatter<'_>, op: &str, items: &[Term]) -> fmt::Result {
    write!(f, "({op}")?;
    for t in items {
        write!(f, " {t}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var { name, .. } => write!(f, "{name}"),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Int(n) if *n < 0 => write!(f, "(- {})", n.unsigned_abs()),
            Term::Int(n) => write!(f, "{n}"),
            Term::Not(t) => write!(f, "(not {t})"),
            Term::And(ts) => match ts.as_slice() {
                [] => write!(f, "true"),
                [t] => write!(f, "{t}"),
                _ => write_terms(f, "and", ts),
            },
            Term::Or(ts) => match ts.as_slice() {
                [] => write!(f, "false"),
                [t] => write!(f, "{t}"),
                _ => write_terms(f, "or", ts),
            },
            Term::Implies(a, b) => write_list(f, "=>", &[a, b]),
            Term::Eq(a, b) => write_list(f, "=", &[a, b]),
            Term::Lt(a, b) => write_list(f, "<", &[a, b]),
            Term::Le(a, b) => write_list(f, "<=", &[a, b]),
            Term::Gt(a, b) => write_list(f, ">", &[a, b]),
            Term::Ge(a, b) => write_list(f, ">=", &[a, b]),
            Term::Add(a, b) => write_list(f, "+", &[a, b]),
            Term::Sub(a, b) => write_list(f, "-", &[a, b]),
            Term::Mul(a, b) => write_list(f, "*", &[a, b]),
            Term::Div(a, b) => write_list(f, "div", &[a, b]),
            Term::Mod(a, b) => write_list(f, "mod", &[a, b]),
            Term::Neg(t) => write!(f, "(- {t})"),
            Term::Ite(c, t, e) => write_list(f, "ite", &[c, t, e]),
            Term::App(app) => write!(f, "{app}"),
        }
    }
}

impl fmt::Display for RelationApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return write!(f, "{}", self.relation);
        }
        write!(f, "({}", self.relation)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Term {
        Term::var("x_1_0", Sort::Int)
    }

    #[test]
    fn prints_smtlib() {
        let t = Term::and(vec![
            Term::ge(x(), Term::Int(0)),
            Term::not(Term::eq(x(), Term::Int(-3))),
        ]);
        assert_eq!(t.to_string(), "(and (>= x_1_0 0) (not (= x_1_0 (- 3))))");

        let app = RelationApp::new("interface_4", vec![Term::Int(0), Term::Bool(false)]);
        assert_eq!(app.to_string(), "(interface_4 0 false)");
        assert_eq!(RelationApp::new("error_4", vec![]).to_string(), "error_4");
        assert_eq!(Term::and(vec![]).to_string(), "true");
    }

    #[test]
    fn reflexive_equality_folds_to_true_under_negation() {
        let negated = Term::not(Term::eq(x(), x()));
        assert_eq!(negated.simplify(), Term::Bool(false));
        assert_eq!(Term::lt(x(), x()).simplify(), Term::Bool(false));
        assert_eq!(Term::le(x(), x()).simplify(), Term::Bool(true));
    }

    #[test]
    fn conjunction_absorbs_constants() {
        let t = Term::and(vec![Term::Bool(true), Term::and(vec![x()]), Term::Bool(true)]);
        assert_eq!(Term::and(vec![Term::Bool(true), Term::eq(x(), Term::Int(1))]).simplify(), Term::eq(x(), Term::Int(1)));
        assert_eq!(t.conjuncts(), vec![&x()]);
        let f = Term::and(vec![Term::eq(x(), Term::Int(1)), Term::not(Term::Bool(true))]);
        assert_eq!(f.simplify(), Term::Bool(false));
        assert_eq!(Term::or(vec![Term::Bool(false)]).simplify(), Term::Bool(false));
    }

    #[test]
    fn arithmetic_folds_with_euclidean_division() {
        assert_eq!(Term::div(Term::Int(-7), Term::Int(2)).simplify(), Term::Int(-4));
        assert_eq!(Term::modulo(Term::Int(-7), Term::Int(2)).simplify(), Term::Int(1));
        let by_zero = Term::div(Term::Int(1), Term::Int(0));
        assert_eq!(by_zero.simplify(), by_zero);
        assert_eq!(Term::ite(Term::Bool(true), Term::Int(1), x()).simplify(), Term::Int(1));
    }

    #[test]
    fn free_vars_keep_first_occurrence_order() {
        let y = Term::var("y_2_0", Sort::Bool);
        let t = Term::implies(Term::and(vec![y.clone(), Term::gt(x(), Term::Int(1))]), Term::not(y));
        assert_eq!(
            t.free_vars(),
            vec![("y_2_0".to_string(), Sort::Bool), ("x_1_0".to_string(), Sort::Int)]
        );
    }
}
