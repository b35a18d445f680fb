//! Error types for the script engine.

/// Errors that can occur when talking to an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Engine thread panicked")]
    ThreadPanic,

    #[error("JavaScript error: {0}")]
    Js(String),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}
