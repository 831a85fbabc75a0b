//! External Horn solver driven through an SMT-LIB2 script.
//!
//! The whole clause system is re-sent for every query; the process is
//! started fresh each time and exits after `check-sat`. A process still
//! running past its deadline is killed and the query answers `Unknown`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clause::{HornClause, Relation};
use crate::solver::{check_app, check_declared, CheckResult, HornSolver, QueryResult, SolverError};
use crate::sort::Sort;
use crate::term::{RelationApp, Term};

/// Slack granted past the solver's own timeout before the process is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout flag understood by z3.
pub const Z3_TIMEOUT_FLAG: &str = "-t:{ms}";

#[derive(Clone, Debug)]
pub struct SmtLibHornSolver {
    command: String,
    args: Vec<String>,
    timeout_ms: Option<u64>,
    /// Argument template carrying the timeout; `{ms}` is replaced.
    timeout_flag: Option<String>,
    variables: BTreeMap<String, Sort>,
    relations: Vec<Relation>,
    rules: Vec<HornClause>,
}

impl SmtLibHornSolver {
    /// Solvers named `z3` get [`Z3_TIMEOUT_FLAG`]; others get no timeout
    /// flag until [`SmtLibHornSolver::with_timeout_flag`] sets one.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        let is_z3 = Path::new(&command).file_stem().is_some_and(|stem| stem == "z3");
        Self {
            timeout_flag: is_z3.then(|| Z3_TIMEOUT_FLAG.to_string()),
            command,
            args,
            timeout_ms: None,
            variables: BTreeMap::new(),
            relations: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// `z3 -in -smt2`
    pub fn z3() -> Self {
        Self::new("z3", vec!["-in".to_string(), "-smt2".to_string()])
    }

    /// Per-query deadline. It is passed through the timeout flag, if any,
    /// and enforced on the process either way.
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_timeout_flag(mut self, flag: Option<String>) -> Self {
        self.timeout_flag = flag;
        self
    }

    pub fn command_line(&self) -> Vec<String> {
        let mut line = vec![self.command.clone()];
        line.extend(self.args.iter().cloned());
        if let (Some(ms), Some(flag)) = (self.timeout_ms, &self.timeout_flag) {
            line.push(flag.replace("{ms}", &ms.to_string()));
        }
        line
    }

    fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// The script checking whether any of `targets` is derivable.
    pub(crate) fn script(&self, targets: &[RelationApp]) -> String {
        let mut out = String::from("(set-logic HORN)\n");
        for rel in &self.relations {
            let _ = writeln!(out, "{rel}");
        }
        for rule in &self.rules {
            if let Some(name) = &rule.name {
                let _ = writeln!(out, "; {name}");
            }
            let _ = writeln!(out, "(assert {})", quantified(&rule.free_vars(), &rule.to_term()));
        }
        for target in targets {
            let query = Term::implies(Term::App(target.clone()), Term::Bool(false));
            let _ = writeln!(out, "(assert {})", quantified(&query.free_vars(), &query));
        }
        out.push_str("(check-sat)\n");
        out
    }

    fn run(&self, script: &str) -> Result<String, SolverError> {
        let line = self.command_line();
        debug!(command = %line.join(" "), bytes = script.len(), "invoking Horn solver");
        let mut child = Command::new(&self.command)
            .args(&line[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SolverError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }
        if let Some(ms) = self.timeout_ms {
            let deadline = Instant::now() + Duration::from_millis(ms) + KILL_GRACE;
            while child.try_wait()?.is_none() {
                if Instant::now() >= deadline {
                    warn!(command = %self.command, timeout_ms = ms, "Horn solver overran its deadline");
                    child.kill()?;
                    child.wait()?;
                    return Ok("timeout".to_string());
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SolverError::Protocol(format!(
                "solver exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

impl HornSolver for SmtLibHornSolver {
    fn declare_variable(&mut self, name: &str, sort: Sort) -> Result<(), SolverError> {
        self.variables.insert(name.to_string(), sort);
        Ok(())
    }

    fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError> {
        if self.relation(&relation.name).is_none() {
            self.relations.push(relation.clone());
        }
        Ok(())
    }

    fn add_rule(&mut self, clause: &HornClause) -> Result<(), SolverError> {
        let lookup = |name: &str| self.relation(name);
        check_app(lookup, &clause.head)?;
        for app in clause.body_apps() {
            check_app(lookup, app)?;
        }
        check_declared(&self.variables, clause)?;
        self.rules.push(clause.clone());
        Ok(())
    }

    fn query(&mut self, targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
        for target in targets {
            check_app(|name: &str| self.relation(name), target)?;
        }
        let script = self.script(targets);
        let stdout = self.run(&script)?;
        Ok(QueryResult::new(parse_response(&stdout)?))
    }

    fn reset(&mut self) {
        self.variables.clear();
        self.relations.clear();
        self.rules.clear();
    }
}

/// `(forall ((x Int) ...) body)`, or `body` when closed.
fn quantified(vars: &[(String, Sort)], body: &Term) -> String {
    if vars.is_empty() {
        return body.to_string();
    }
    let mut out = String::from("(forall (");
    for (i, (name, sort)) in vars.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "({name} {sort})");
    }
    let _ = write!(out, ") {body})");
    out
}

/// Maps the first answer line. The query asserts the target implies `false`,
/// so `unsat` means the target is derivable.
pub(crate) fn parse_response(stdout: &str) -> Result<CheckResult, SolverError> {
    let answer = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    match answer {
        "unsat" => Ok(CheckResult::Satisfiable),
        "sat" => Ok(CheckResult::Unsatisfiable),
        "unknown" | "timeout" => Ok(CheckResult::Unknown),
        other => Err(SolverError::Protocol(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> (SmtLibHornSolver, Relation) {
        let iface = Relation::new("interface_1", vec![Sort::Int]);
        let err = Relation::new("error_1", vec![]);
        let x = Term::var("x_2_1", Sort::Int);
        let mut solver = SmtLibHornSolver::z3().with_timeout(Some(2_000));
        solver.declare_variable("x_2_1", Sort::Int).unwrap();
        solver.register_relation(&iface).unwrap();
        solver.register_relation(&err).unwrap();
        solver
            .add_rule(&HornClause::fact("interface", iface.apply(vec![Term::Int(0)])))
            .unwrap();
        solver
            .add_rule(&HornClause::rule(
                "assert_5_to_error",
                vec![iface.apply(vec![x.clone()]).into(), Term::not(Term::ge(x, Term::Int(0)))],
                err.apply(vec![]),
            ))
            .unwrap();
        (solver, err)
    }

    #[test]
    fn script_declares_relations_and_quantifies_rules() {
        let (solver, err) = system();
        let script = solver.script(&[err.apply(vec![])]);
        let expected = "\
(set-logic HORN)
(declare-fun interface_1 (Int) Bool)
(declare-fun error_1 () Bool)
; interface
(assert (interface_1 0))
; assert_5_to_error
(assert (forall ((x_2_1 Int)) (=> (and (interface_1 x_2_1) (not (>= x_2_1 0))) error_1)))
(assert (=> error_1 false))
(check-sat)
";
        assert_eq!(script, expected);
    }

    #[test]
    fn timeout_is_appended_to_the_command_line() {
        let (solver, _) = system();
        assert_eq!(solver.command_line(), ["z3", "-in", "-smt2", "-t:2000"]);

        let by_path = SmtLibHornSolver::new("/opt/z3/bin/z3", vec![]).with_timeout(Some(10));
        assert_eq!(by_path.command_line(), ["/opt/z3/bin/z3", "-t:10"]);
        assert_eq!(SmtLibHornSolver::z3().command_line(), ["z3", "-in", "-smt2"]);
    }

    #[test]
    fn other_solvers_get_a_timeout_flag_only_when_configured() {
        let eldarica = SmtLibHornSolver::new("eld", vec!["-hsmt".to_string()]).with_timeout(Some(3_000));
        assert_eq!(eldarica.command_line(), ["eld", "-hsmt"]);

        let flagged = eldarica.with_timeout_flag(Some("-timeout={ms}".to_string()));
        assert_eq!(flagged.command_line(), ["eld", "-hsmt", "-timeout=3000"]);

        let silenced = SmtLibHornSolver::z3().with_timeout(Some(3_000)).with_timeout_flag(None);
        assert_eq!(silenced.command_line(), ["z3", "-in", "-smt2"]);
    }

    #[cfg(unix)]
    #[test]
    fn overrunning_solver_is_killed_at_the_deadline() {
        let (solver, err) = system();
        let mut solver = solver.with_timeout(Some(50));
        solver.command = "sleep".to_string();
        solver.args = vec!["30".to_string()];
        solver.timeout_flag = None;

        let started = Instant::now();
        let result = solver.query(&[err.apply(vec![])]).unwrap();
        assert_eq!(result.outcome, CheckResult::Unknown);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn answers_are_inverted_for_reachability() {
        assert_eq!(parse_response("unsat\n").unwrap(), CheckResult::Satisfiable);
        assert_eq!(parse_response("\nsat\n").unwrap(), CheckResult::Unsatisfiable);
        assert_eq!(parse_response("unknown").unwrap(), CheckResult::Unknown);
        assert_eq!(parse_response("timeout\n").unwrap(), CheckResult::Unknown);
        assert!(matches!(
            parse_response("(error \"line 3\")"),
            Err(SolverError::Protocol(_))
        ));
        assert!(matches!(parse_response(""), Err(SolverError::Protocol(_))));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let (mut solver, err) = system();
        solver.command = "quill-no-such-solver-binary".to_string();
        match solver.query(&[err.apply(vec![])]) {
            Err(SolverError::Spawn { command, .. }) => assert_eq!(command, "quill-no-such-solver-binary"),
            other => panic!("expected spawn failure, got {other:?}"),
        }
    }
}
