//! Commands accepted by the engine worker thread.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::types::{ArtifactId, CompileUnit};

/// Why a call against the worker did not produce a value.
///
/// `Js` carries the stringified exception or rejection from the isolate and
/// is surfaced to callers as data, not as an engine fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    Js(String),
    Cancelled,
}

/// One request sent over the handle's command channel.
///
/// Every variant carries a oneshot reply sender. A dropped reply receiver is
/// fine; the worker ignores the send error and moves on.
pub enum EngineCommand {
    /// Compile a unit into a callable artifact kept inside the isolate.
    Compile {
        unit: CompileUnit,
        reply: oneshot::Sender<Result<ArtifactId, CallFailure>>,
    },
    /// Invoke a previously compiled artifact with JSON-encoded arguments.
    Execute {
        artifact: ArtifactId,
        args: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<serde_json::Value, CallFailure>>,
    },
    /// Release an artifact and its pinned function handle.
    Discard {
        artifact: ArtifactId,
        reply: oneshot::Sender<Result<bool, CallFailure>>,
    },
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::Compile { unit, .. } => {
                f.debug_struct("Compile").field("label", &unit.label).finish()
            }
            EngineCommand::Execute { artifact, args, timeout_ms, .. } => f
                .debug_struct("Execute")
                .field("artifact", artifact)
                .field("args", &args.len())
                .field("timeout_ms", timeout_ms)
                .finish(),
            EngineCommand::Discard { artifact, .. } => {
                f.debug_struct("Discard").field("artifact", artifact).finish()
            }
        }
    }
}
