//! In-process bounded Horn engine.
//!
//! Answers a query in two steps. A propositional pass over relation names
//! proves targets unreachable when no chain of rules can ever fire. Otherwise
//! a ground bottom-up derivation looks for a concrete derivation of the
//! target within the configured bounds. Integer enumeration covers only a
//! finite candidate domain, so a fixpoint reached after enumerating integers
//! is inconclusive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::trace;

use crate::clause::{HornClause, Relation};
use crate::solver::{check_app, check_declared, CheckResult, HornSolver, QueryResult, SolverError};
use crate::sort::Sort;
use crate::term::{euclid_div, euclid_rem, RelationApp, Term};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundedOptions {
    /// Derivation rounds before giving up.
    pub max_rounds: usize,
    /// Total derived facts before giving up.
    pub max_facts: usize,
    /// Candidate assignments tried per rule and round.
    pub max_enumeration: usize,
}

impl Default for BoundedOptions {
    fn default() -> Self {
        Self {
            max_rounds: 32,
            max_facts: 2048,
            max_enumeration: 4096,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Value {
    Bool(bool),
    Int(i128),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
        }
    }
}

type Env = BTreeMap<String, Value>;
type Tuple = Vec<Value>;

#[derive(Debug, Default)]
pub struct BoundedHornSolver {
    options: BoundedOptions,
    variables: BTreeMap<String, Sort>,
    relations: BTreeMap<String, Relation>,
    rules: Vec<HornClause>,
}

impl BoundedHornSolver {
    pub fn new(options: BoundedOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> BoundedOptions {
        self.options
    }

    /// Relations some chain of rules could populate, ignoring argument values.
    fn possibly_inhabited(&self) -> BTreeSet<&str> {
        let mut inhabited = BTreeSet::new();
        loop {
            let mut changed = false;
            for rule in &self.rules {
                let head = rule.head.relation.as_str();
                if inhabited.contains(head) {
                    continue;
                }
                if !rule.body_apps().all(|app| inhabited.contains(app.relation.as_str())) {
                    continue;
                }
                let constraint = Term::and(rule.constraints().cloned().collect()).simplify();
                if constraint == Term::Bool(false) {
                    continue;
                }
                inhabited.insert(head);
                changed = true;
            }
            if !changed {
                return inhabited;
            }
        }
    }

    fn domain(&self, targets: &[RelationApp]) -> Vec<i128> {
        let mut literals = BTreeSet::from([-1, 0, 1]);
        for rule in &self.rules {
            rule.to_term().collect_int_literals(&mut literals);
        }
        for target in targets {
            Term::App(target.clone()).collect_int_literals(&mut literals);
        }
        let mut domain = BTreeSet::new();
        for n in literals {
            domain.insert(n);
            domain.extend(n.checked_sub(1));
            domain.extend(n.checked_add(1));
        }
        domain.into_iter().collect()
    }

    fn derive(&self, targets: &[RelationApp]) -> QueryResult {
        let domain = self.domain(targets);
        let mut facts: BTreeMap<String, BTreeSet<Tuple>> = BTreeMap::new();
        let mut total = 0usize;
        let mut inexact = false;

        for round in 0..self.options.max_rounds {
            let mut grew = false;
            for rule in &self.rules {
                let derived = self.fire(rule, &facts, &domain, &mut inexact);
                for (tuple, env) in derived {
                    let known = facts.entry(rule.head.relation.clone()).or_default();
                    if !known.insert(tuple.clone()) {
                        continue;
                    }
                    grew = true;
                    total += 1;
                    if targets.iter().any(|t| matches_target(t, &rule.head.relation, &tuple)) {
                        trace!(round, rule = ?rule.name, "target derived");
                        let witness = env.iter().map(|(name, value)| format!("{name} = {value}")).collect();
                        return QueryResult::with_witness(CheckResult::Satisfiable, witness);
                    }
                }
                if total > self.options.max_facts {
                    trace!(round, total, "fact limit reached");
                    return QueryResult::new(CheckResult::Unknown);
                }
            }
            trace!(round, total, inexact, "derivation round finished");
            if !grew {
                let outcome = if inexact {
                    CheckResult::Unknown
                } else {
                    CheckResult::Unsatisfiable
                };
                return QueryResult::new(outcome);
            }
        }
        QueryResult::new(CheckResult::Unknown)
    }

    /// Every head tuple `rule` yields over the current facts, with the bindings that produced it.
    fn fire(
        &self,
        rule: &HornClause,
        facts: &BTreeMap<String, BTreeSet<Tuple>>,
        domain: &[i128],
        inexact: &mut bool,
    ) -> Vec<(Tuple, Env)> {
        let limit = self.options.max_enumeration;
        let empty = BTreeSet::new();

        // Join body applications against known facts.
        let mut partials: Vec<(Env, Vec<Term>)> = vec![(Env::new(), Vec::new())];
        for app in rule.body_apps() {
            let known = facts.get(&app.relation).unwrap_or(&empty);
            let mut next = Vec::new();
            for (env, pending) in &partials {
                for tuple in known {
                    if let Some(joined) = unify(&app.args, tuple, env, pending) {
                        if next.len() == limit {
                            *inexact = true;
                            break;
                        }
                        next.push(joined);
                    }
                }
            }
            partials = next;
            if partials.is_empty() {
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        for (mut env, mut constraints) in partials {
            for c in rule.constraints() {
                constraints.extend(c.conjuncts().into_iter().cloned());
            }
            solve_equalities(&constraints, &mut env);

            let mut open: Vec<(String, Sort)> = Vec::new();
            let mut seen = BTreeSet::new();
            for c in &constraints {
                c.collect_free_vars(&mut open, &mut seen);
            }
            for arg in &rule.head.args {
                arg.collect_free_vars(&mut open, &mut seen);
            }
            open.retain(|(name, _)| !env.contains_key(name));

            let mut tried = 0usize;
            let complete = enumerate(&open, domain, &mut env, &mut |env| {
                if tried == limit {
                    return false;
                }
                tried += 1;
                let mut holds = true;
                for c in &constraints {
                    match eval(c, env) {
                        Some(Value::Bool(true)) => {}
                        Some(_) => {
                            holds = false;
                            break;
                        }
                        None => {
                            *inexact = true;
                            holds = false;
                            break;
                        }
                    }
                }
                if holds {
                    let tuple: Option<Tuple> = rule.head.args.iter().map(|a| eval(a, env)).collect();
                    match tuple {
                        Some(tuple) => out.push((tuple, env.clone())),
                        None => *inexact = true,
                    }
                }
                true
            });
            if !complete {
                *inexact = true;
            }
            if open.iter().any(|(_, sort)| *sort == Sort::Int) {
                *inexact = true;
            }
        }
        out
    }
}

impl HornSolver for BoundedHornSolver {
    fn declare_variable(&mut self, name: &str, sort: Sort) -> Result<(), SolverError> {
        self.variables.insert(name.to_string(), sort);
        Ok(())
    }

    fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError> {
        self.relations.insert(relation.name.clone(), relation.clone());
        Ok(())
    }

    fn add_rule(&mut self, clause: &HornClause) -> Result<(), SolverError> {
        let lookup = |name: &str| self.relations.get(name);
        check_app(lookup, &clause.head)?;
        for app in clause.body_apps() {
            check_app(lookup, app)?;
        }
        check_declared(&self.variables, clause)?;
        if clause.constraints().any(Term::contains_app) {
            return Err(SolverError::Protocol(format!(
                "rule {} nests a relation inside a constraint",
                clause.name.as_deref().unwrap_or("<unnamed>")
            )));
        }
        self.rules.push(clause.clone());
        Ok(())
    }

    fn query(&mut self, targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
        for target in targets {
            check_app(|name: &str| self.relations.get(name), target)?;
        }
        let inhabited = self.possibly_inhabited();
        if !targets.iter().any(|t| inhabited.contains(t.relation.as_str())) {
            trace!("targets unreachable in the relation graph");
            return Ok(QueryResult::new(CheckResult::Unsatisfiable));
        }
        Ok(self.derive(targets))
    }

    fn reset(&mut self) {
        self.variables.clear();
        self.relations.clear();
        self.rules.clear();
    }
}

fn matches_target(target: &RelationApp, relation: &str, tuple: &[Value]) -> bool {
    target.relation == relation
        && unify(&target.args, tuple, &Env::new(), &[]).is_some_and(|(env, pending)| {
            pending.iter().all(|c| eval(c, &env) != Some(Value::Bool(false)))
        })
}

/// Matches `args` against a fact, extending `env`.
///
/// Arguments that cannot be evaluated yet become pending equalities.
fn unify(args: &[Term], tuple: &[Value], env: &Env, pending: &[Term]) -> Option<(Env, Vec<Term>)> {
    let mut env = env.clone();
    let mut pending = pending.to_vec();
    for (arg, value) in args.iter().zip(tuple) {
        match arg {
            Term::Var { name, .. } => match env.get(name) {
                Some(bound) if bound != value => return None,
                Some(_) => {}
                None => {
                    env.insert(name.clone(), *value);
                }
            },
            other => match eval(other, &env) {
                Some(v) if v == *value => {}
                Some(_) => return None,
                None => pending.push(Term::eq(other.clone(), literal(*value))),
            },
        }
    }
    Some((env, pending))
}

/// Binds variables defined by `var = term` conjuncts until nothing changes.
fn solve_equalities(constraints: &[Term], env: &mut Env) {
    loop {
        let mut progress = false;
        for c in constraints {
            let Term::Eq(lhs, rhs) = c else {
                continue;
            };
            for (var, value) in [(&**lhs, &**rhs), (&**rhs, &**lhs)] {
                let Term::Var { name, .. } = var else {
                    continue;
                };
                if env.contains_key(name) {
                    continue;
                }
                if let Some(v) = eval(value, env) {
                    env.insert(name.clone(), v);
                    progress = true;
                }
            }
        }
        if !progress {
            return;
        }
    }
}

/// Calls `visit` for every assignment of `open`; stops when `visit` returns false.
/// Returns whether the enumeration ran to completion.
fn enumerate(open: &[(String, Sort)], domain: &[i128], env: &mut Env, visit: &mut dyn FnMut(&Env) -> bool) -> bool {
    let Some(((name, sort), rest)) = open.split_first() else {
        return visit(env);
    };
    let candidates: Vec<Value> = match sort {
        Sort::Bool => vec![Value::Bool(false), Value::Bool(true)],
        Sort::Int => domain.iter().copied().map(Value::Int).collect(),
    };
    for value in candidates {
        env.insert(name.clone(), value);
        if !enumerate(rest, domain, env, visit) {
            env.remove(name);
            return false;
        }
    }
    env.remove(name);
    true
}

fn literal(value: Value) -> Term {
    match value {
        Value::Bool(b) => Term::Bool(b),
        Value::Int(n) => Term::Int(n),
    }
}

fn eval(term: &Term, env: &Env) -> Option<Value> {
    let int = |t: &Term| match eval(t, env) {
        Some(Value::Int(n)) => Some(n),
        _ => None,
    };
    let boolean = |t: &Term| match eval(t, env) {
        Some(Value::Bool(b)) => Some(b),
        _ => None,
    };
    Some(match term {
        Term::Var { name, .. } => return env.get(name).copied(),
        Term::Bool(b) => Value::Bool(*b),
        Term::Int(n) => Value::Int(*n),
        Term::Not(t) => Value::Bool(!boolean(t)?),
        Term::And(ts) => {
            let mut all = Some(true);
            for t in ts {
                match boolean(t) {
                    Some(false) => return Some(Value::Bool(false)),
                    Some(true) => {}
                    None => all = None,
                }
            }
            Value::Bool(all?)
        }
        Term::Or(ts) => {
            let mut any = Some(false);
            for t in ts {
                match boolean(t) {
                    Some(true) => return Some(Value::Bool(true)),
                    Some(false) => {}
                    None => any = None,
                }
            }
            Value::Bool(any?)
        }
        Term::Implies(a, b) => match boolean(a)? {
            false => Value::Bool(true),
            true => Value::Bool(boolean(b)?),
        },
        Term::Eq(a, b) => Value::Bool(eval(a, env)? == eval(b, env)?),
        Term::Lt(a, b) => Value::Bool(int(a)? < int(b)?),
        Term::Le(a, b) => Value::Bool(int(a)? <= int(b)?),
        Term::Gt(a, b) => Value::Bool(int(a)? > int(b)?),
        Term::Ge(a, b) => Value::Bool(int(a)? >= int(b)?),
        Term::Add(a, b) => Value::Int(int(a)?.checked_add(int(b)?)?),
        Term::Sub(a, b) => Value::Int(int(a)?.checked_sub(int(b)?)?),
        Term::Mul(a, b) => Value::Int(int(a)?.checked_mul(int(b)?)?),
        Term::Div(a, b) => Value::Int(euclid_div(int(a)?, int(b)?)?),
        Term::Mod(a, b) => Value::Int(euclid_rem(int(a)?, int(b)?)?),
        Term::Neg(t) => Value::Int(int(t)?.checked_neg()?),
        Term::Ite(c, t, e) => {
            if boolean(c)? {
                eval(t, env)?
            } else {
                eval(e, env)?
            }
        }
        Term::App(_) => return None,
    })
}
