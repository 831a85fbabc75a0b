//! `[verify.chc]` settings from `quill.toml`.
//!
//! ```toml
//! [verify.chc]
//! profile = "ci"
//! backend = "portfolio"
//! command = "z3"
//! args = ["-in", "-smt2"]
//! timeout_ms = 5000
//! timeout_arg = "-t:{ms}"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::backends::{BoundedHornSolver, BoundedOptions, PortfolioHornSolver, SmtLibHornSolver};
use crate::solver::HornSolver;

pub const MANIFEST_NAME: &str = "quill.toml";
pub const BACKEND_ENV: &str = "QUILL_CHC_BACKEND";
pub const TIMEOUT_ENV: &str = "QUILL_CHC_TIMEOUT_MS";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    #[diagnostic(code(quill::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    #[diagnostic(code(quill::config::parse))]
    Parse { origin: String, message: String },

    #[error("invalid value `{value}` for {key}")]
    #[diagnostic(
        code(quill::config::invalid),
        help("expected one of: bounded, smtlib, portfolio (backend); a number of milliseconds (timeout)")
    )]
    Invalid { key: String, value: String },
}

/// Effort level; each profile sets default bounds and a deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChcProfile {
    /// Small bounds, short deadline.
    Fast,
    #[default]
    Ci,
    /// Large bounds, long deadline.
    Thorough,
}

impl ChcProfile {
    pub fn bounded_options(self) -> BoundedOptions {
        match self {
            ChcProfile::Fast => BoundedOptions {
                max_rounds: 8,
                max_facts: 256,
                max_enumeration: 512,
            },
            ChcProfile::Ci => BoundedOptions::default(),
            ChcProfile::Thorough => BoundedOptions {
                max_rounds: 128,
                max_facts: 16_384,
                max_enumeration: 65_536,
            },
        }
    }

    pub fn timeout_ms(self) -> u64 {
        match self {
            ChcProfile::Fast => 1_000,
            ChcProfile::Ci => 10_000,
            ChcProfile::Thorough => 60_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Bounded,
    Smtlib,
    Portfolio,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bounded" => Some(BackendKind::Bounded),
            "smtlib" | "smt-lib" | "z3" => Some(BackendKind::Smtlib),
            "portfolio" => Some(BackendKind::Portfolio),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChcConfig {
    pub profile: ChcProfile,
    pub backend: BackendKind,
    pub command: String,
    pub args: Vec<String>,
    /// Overrides the profile's deadline.
    pub timeout_ms: Option<u64>,
    /// Argument carrying the deadline to `command`, with `{ms}` replaced.
    /// Unset means `-t:{ms}` for z3 and nothing otherwise; empty means nothing.
    pub timeout_arg: Option<String>,
    pub max_rounds: Option<usize>,
    pub max_facts: Option<usize>,
    pub max_enumeration: Option<usize>,
}

impl Default for ChcConfig {
    fn default() -> Self {
        Self {
            profile: ChcProfile::default(),
            backend: BackendKind::default(),
            command: "z3".to_string(),
            args: vec!["-in".to_string(), "-smt2".to_string()],
            timeout_ms: None,
            timeout_arg: None,
            max_rounds: None,
            max_facts: None,
            max_enumeration: None,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct Manifest {
    #[serde(default)]
    verify: Option<VerifySection>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct VerifySection {
    #[serde(default)]
    chc: Option<ChcConfig>,
}

impl ChcConfig {
    /// Parses a whole manifest; a missing `[verify.chc]` table yields defaults.
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        Ok(manifest.verify.and_then(|v| v.chc).unwrap_or_default())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    /// Loads the nearest manifest above `start`, then applies environment overrides.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        Self::discover_with(start, |key| std::env::var(key).ok())
    }

    pub fn discover_with(start: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match find_manifest(start) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Applies `QUILL_CHC_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup(BACKEND_ENV) {
            self.backend = BackendKind::parse(&value).ok_or_else(|| ConfigError::Invalid {
                key: BACKEND_ENV.to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(TIMEOUT_ENV) {
            let ms = value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: TIMEOUT_ENV.to_string(),
                value: value.clone(),
            })?;
            self.timeout_ms = Some(ms);
        }
        Ok(())
    }

    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or_else(|| self.profile.timeout_ms())
    }

    pub fn bounded_options(&self) -> BoundedOptions {
        let base = self.profile.bounded_options();
        BoundedOptions {
            max_rounds: self.max_rounds.unwrap_or(base.max_rounds),
            max_facts: self.max_facts.unwrap_or(base.max_facts),
            max_enumeration: self.max_enumeration.unwrap_or(base.max_enumeration),
        }
    }

    fn smtlib(&self) -> SmtLibHornSolver {
        let solver = SmtLibHornSolver::new(self.command.clone(), self.args.clone())
            .with_timeout(Some(self.effective_timeout_ms()));
        match &self.timeout_arg {
            Some(flag) => solver.with_timeout_flag(Some(flag.clone()).filter(|f| !f.is_empty())),
            None => solver,
        }
    }

    pub fn build_solver(&self) -> Box<dyn HornSolver> {
        match self.backend {
            BackendKind::Bounded => Box::new(BoundedHornSolver::new(self.bounded_options())),
            BackendKind::Smtlib => Box::new(self.smtlib()),
            BackendKind::Portfolio => Box::new(PortfolioHornSolver::new(vec![
                Box::new(BoundedHornSolver::new(self.bounded_options())),
                Box::new(self.smtlib()),
            ])),
        }
    }
}

pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(MANIFEST_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !cur.pop() {
            return None;
        }
    }
}
