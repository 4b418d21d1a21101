//! Static command vetting.
//!
//! Two independent check sets run over the raw command text:
//!
//! - the **baseline** denylist ([`CommandValidator::validate`]): literal
//!   fragments plus a handful of regexes, applied to every task at creation
//!   and again before execution;
//! - the **allow-listed** check ([`CommandValidator::classify`]): shell
//!   operators, a denylist of dangerous command names, and an allow-list of
//!   root commands.
//!
//! Neither set ever rewrites the command; both only accept or reject.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};

/// Root commands accepted by the allow-listed check when none are configured.
pub const DEFAULT_ALLOWED_ROOTS: &[&str] = &["codex", "claude", "gemini"];

/// Matched against the lowercased command.
const DISALLOWED_FRAGMENTS: &[&str] = &[
    "rm -rf",
    "sudo",
    "&&",
    ";",
    "|",
    "curl http",
    "wget http",
    "nc ",
    "ssh ",
];

static UNSAFE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        r"\brm\s+-[rfRF]+",
        r"`[^`]+`",
        r"\$\([^)]*\)",
        r">\s*/dev/(null|zero|tty)",
    ]
    .into_iter()
    .map(|p| (p, Regex::new(p).expect("unsafe pattern regex must compile")))
    .collect()
});

static SHELL_OPERATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"&&",
        r"\|\|",
        r";",
        r"\|",
        r">{1,2}",
        r"<",
        r"2>&1",
        r"`[\s\S]*?`",
        r"\$\([\s\S]*?\)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("shell operator regex must compile"))
    .collect()
});

/// Dangerous command names, matched case-insensitively. The reason string
/// quotes the pattern as written here.
static DENIED_COMMANDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        r"\bsudo\b",
        r"\bsu\b",
        r"\bchmod\s+777\b",
        r"\brm\s+-rf\b",
        r"\bdd\s+if=",
        r"\bmkfs\b",
        r"\bfdisk\b",
        r"\bmount\b|\bumount\b",
        r"\bchown\b",
        r"\bkill\s+-9\b",
        r"\bshutdown\b|\breboot\b",
        r"\bscp\b|\bssh\b",
        r"curl[\s\S]*\|[\s\S]*sh\b",
        r"\bdocker\b|\bkubectl\b",
    ]
    .into_iter()
    .map(|p| {
        let re = Regex::new(&format!("(?i){p}")).expect("denied command regex must compile");
        (p, re)
    })
    .collect()
});

static ENV_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("env assignment regex must compile")
});

/// Which check sets a caller wants applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Baseline denylist only.
    #[default]
    Baseline,
    /// Baseline denylist plus operators, denied names and the root allow-list.
    AllowListed,
}

impl Strictness {
    pub fn as_str(self) -> &'static str {
        match self {
            Strictness::Baseline => "baseline",
            Strictness::AllowListed => "allow_listed",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "baseline" => Ok(Strictness::Baseline),
            "allow_listed" | "allowlisted" => Ok(Strictness::AllowListed),
            other => Err(format!("unknown strictness '{other}'")),
        }
    }
}

/// Category of an allow-listed rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Empty,
    ShellOperator,
    DeniedCommand,
    RootNotAllowed,
}

/// Result of the allow-listed check set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CommandCheck {
    Allowed,
    Denied { kind: DenialKind, reason: String },
}

impl CommandCheck {
    /// Returns `true` when the command passed every check.
    pub fn is_allowed(&self) -> bool {
        matches!(self, CommandCheck::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            CommandCheck::Allowed => None,
            CommandCheck::Denied { reason, .. } => Some(reason),
        }
    }

    fn denied(kind: DenialKind, reason: impl Into<String>) -> Self {
        CommandCheck::Denied {
            kind,
            reason: reason.into(),
        }
    }
}

/// Command vetting with a configurable root-command allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandValidator {
    allowed_roots: Vec<String>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_ROOTS.iter().copied())
    }
}

impl CommandValidator {
    /// Build a validator. Roots are trimmed and lowercased; blanks are
    /// dropped, and an empty result falls back to [`DEFAULT_ALLOWED_ROOTS`].
    pub fn new<I, S>(allowed_roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roots: Vec<String> = allowed_roots
            .into_iter()
            .map(|r| r.as_ref().trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        if roots.is_empty() {
            roots = DEFAULT_ALLOWED_ROOTS.iter().map(|r| r.to_string()).collect();
        }
        let mut seen = std::collections::HashSet::new();
        roots.retain(|root| seen.insert(root.clone()));
        Self {
            allowed_roots: roots,
        }
    }

    pub fn allowed_roots(&self) -> &[String] {
        &self.allowed_roots
    }

    /// Baseline denylist check.
    pub fn validate(&self, command: &str) -> SandboxResult<()> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }

        let lowered = trimmed.to_lowercase();
        if let Some(fragment) = DISALLOWED_FRAGMENTS.iter().find(|f| lowered.contains(*f)) {
            return Err(SandboxError::DisallowedFragment {
                fragment: fragment.trim().to_string(),
            });
        }

        if let Some((pattern, _)) = UNSAFE_PATTERNS.iter().find(|(_, re)| re.is_match(trimmed)) {
            return Err(SandboxError::UnsafePattern {
                pattern: pattern.to_string(),
            });
        }

        Ok(())
    }

    /// Allow-listed check set: operators, then denied names, then the root
    /// command.
    pub fn classify(&self, command: &str) -> CommandCheck {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return CommandCheck::denied(DenialKind::Empty, "empty command");
        }

        if SHELL_OPERATORS.iter().any(|re| re.is_match(trimmed)) {
            return CommandCheck::denied(
                DenialKind::ShellOperator,
                "shell operators (chaining/redirection) are not allowed",
            );
        }

        if let Some((pattern, _)) = DENIED_COMMANDS.iter().find(|(_, re)| re.is_match(trimmed)) {
            return CommandCheck::denied(
                DenialKind::DeniedCommand,
                format!("command contains denied pattern: {pattern}"),
            );
        }

        let root = extract_root(trimmed).to_lowercase();
        if !self.allowed_roots.iter().any(|allowed| *allowed == root) {
            return CommandCheck::denied(
                DenialKind::RootNotAllowed,
                format!("root command '{root}' is not allowed"),
            );
        }

        CommandCheck::Allowed
    }

    /// Run the check sets selected by `strictness`.
    pub fn check(&self, command: &str, strictness: Strictness) -> SandboxResult<()> {
        self.validate(command)?;
        if strictness == Strictness::AllowListed {
            if let CommandCheck::Denied { reason, .. } = self.classify(command) {
                return Err(SandboxError::PolicyViolation { reason });
            }
        }
        Ok(())
    }
}

/// First whitespace-delimited token that is not a `NAME=value` assignment,
/// or `""` if there is none.
pub fn extract_root(command: &str) -> &str {
    command
        .split_whitespace()
        .find(|token| !ENV_ASSIGNMENT.is_match(token))
        .unwrap_or("")
}
