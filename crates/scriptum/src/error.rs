//! Error types for the scripting core.

use scriptum_js_runtime::EngineError;
use scriptum_store::StoreError;
use thiserror::Error;

/// Errors raised by the isolation context layer.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context is terminated")]
    Terminated,

    #[error("failed to spawn context worker")]
    Spawn(#[source] EngineError),
}

/// Contract-level failures of the scripting surface.
///
/// Script-thrown errors are not here: those travel as
/// [`RunOutcome::Failure`](crate::result::RunOutcome) data. This enum is for
/// the caller getting the contract wrong or the infrastructure giving out.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid parameter name '{0}'")]
    InvalidParameterName(String),

    #[error("parameter '{0}' must be optional to carry a default value")]
    DefaultWithoutOptional(String),

    #[error("undeclared parameters supplied: {}", .0.join(", "))]
    UndeclaredParameters(Vec<String>),

    #[error("mandatory parameters missing: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("unknown handle '{0}'")]
    UnknownHandle(String),

    #[error("no converter registered for payload type '{0}'")]
    NoConverter(String),

    #[error("source contains no entry candidates")]
    NoEntryCandidates,

    #[error("entry not selected among {candidates} candidates")]
    EntryNotSelected { candidates: usize },

    #[error("selected entry '{0}' is not a candidate")]
    UnknownEntry(String),

    #[error("script run was cancelled")]
    Cancelled,

    #[error("script is disposed")]
    Disposed,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
}
