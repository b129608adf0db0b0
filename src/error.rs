//! Structured error and diagnostic-accumulation types shared by every component.
//!
//! The variants below are a direct typed encoding of the error categories from
//! the request/response contract: malformed input, per-node structural
//! violations, cyclic nets, unreachable targets, enumeration timeouts and
//! input/learner inconsistencies. Diagnostics are accumulated rather than
//! raised on the first failure.

use std::fmt;

/// A condition id + branch label, or a test id, that could not reach the
/// target under some assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnreachableBranch {
    Condition { condition_id: i64, branch: String },
    Test { test_id: i64 },
}

impl fmt::Display for UnreachableBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableBranch::Condition {
                condition_id,
                branch,
            } => write!(f, "condition {condition_id}: {branch}"),
            UnreachableBranch::Test { test_id } => write!(f, "test {test_id}"),
        }
    }
}

/// The error categories a core component can report, per the request/response
/// contract. Downstream components are skipped once an upstream one has
/// failed; the orchestrator flushes accumulated diagnostics to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The serialized net or the JSON request could not be decoded.
    Parse(String),
    /// One or more per-node invariants from the structural validator failed.
    Structural(Vec<String>),
    /// The net contains a directed cycle.
    NotAcyclic,
    /// The target cannot be reached for some condition/test-grade assignment.
    TargetUnreachable(Vec<UnreachableBranch>),
    /// The branch-combination checker exceeded its wall-clock budget.
    Timeout,
    /// A section with no matching unit was marked completed, an input unit
    /// was already active, or a node had an unknown kind.
    InputInconsistency(Vec<String>),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Parse(msg) => write!(f, "parse error: {msg}"),
            CoreError::Structural(msgs) => {
                write!(f, "structural error:\n{}", msgs.join("\n"))
            }
            CoreError::NotAcyclic => write!(f, "given network is not acyclic"),
            CoreError::TargetUnreachable(branches) => {
                write!(f, "no path to target for condition branches:")?;
                for branch in branches {
                    write!(f, "\n{branch}")?;
                }
                Ok(())
            }
            CoreError::Timeout => write!(f, "branch combination check exceeded its time budget"),
            CoreError::InputInconsistency(msgs) => {
                write!(f, "input inconsistency:\n{}", msgs.join("\n"))
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Accumulates diagnostics and a failed flag for a single component
/// invocation.
///
/// Components keep evaluating after the first problem is found and report
/// everything they collected together, instead of aborting early.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    messages: Vec<String>,
    failed: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn append_error(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn fail_with_error(&mut self, message: impl Into<String>) {
        self.append_error(message);
        self.fail();
    }

    pub fn succeeded(&self) -> bool {
        !self.failed
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}
