//! Run results.
//!
//! A script that throws has *failed*, not errored: failures are data carried
//! in [`RunOutcome::Failure`], so the caller can render them, log them, or
//! retry. `Err` is reserved for contract violations and infrastructure
//! faults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::marshal::TransferableValue;

/// Which stage produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Compile,
    Execute,
}

/// One failure reported by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub phase: RunPhase,
    pub message: String,
}

impl RunError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Compile,
            message: message.into(),
        }
    }

    pub fn execute(message: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Execute,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            RunPhase::Compile => "compile",
            RunPhase::Execute => "execute",
        };
        write!(f, "[{phase}] {}", self.message)
    }
}

/// The result of one script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success { value: TransferableValue },
    Failure { errors: Vec<RunError> },
}

impl RunOutcome {
    pub fn success(value: TransferableValue) -> Self {
        RunOutcome::Success { value }
    }

    pub fn failure(errors: Vec<RunError>) -> Self {
        debug_assert!(!errors.is_empty());
        RunOutcome::Failure { errors }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&TransferableValue> {
        match self {
            RunOutcome::Success { value } => Some(value),
            RunOutcome::Failure { .. } => None,
        }
    }

    pub fn errors(&self) -> &[RunError] {
        match self {
            RunOutcome::Success { .. } => &[],
            RunOutcome::Failure { errors } => errors,
        }
    }
}

/// Timing of one run, recorded by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub recompiled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok = RunOutcome::success(TransferableValue::Integer(3));
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&TransferableValue::Integer(3)));
        assert!(ok.errors().is_empty());

        let bad = RunOutcome::failure(vec![RunError::execute("boom")]);
        assert!(!bad.is_success());
        assert!(bad.value().is_none());
        assert_eq!(bad.errors().len(), 1);
    }

    #[test]
    fn test_error_display_names_phase() {
        assert_eq!(
            RunError::compile("unexpected token").to_string(),
            "[compile] unexpected token"
        );
        assert_eq!(RunError::execute("boom").to_string(), "[execute] boom");
    }
}
