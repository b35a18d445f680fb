//! Cross-thread handle to a running engine worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{CallFailure, EngineCommand};
use crate::error::EngineError;
use crate::types::{ArtifactId, CompileUnit};

/// Handle to one isolate worker thread.
///
/// Cloneable is deliberately not offered; ownership of the handle is
/// ownership of the worker. Dropping it terminates the isolate and joins
/// the thread.
pub struct EngineHandle {
    name: String,
    cmd_tx: mpsc::Sender<EngineCommand>,
    shutdown_tx: watch::Sender<bool>,
    terminated: Arc<AtomicBool>,
    isolate_handle: deno_core::v8::IsolateHandle,
    thread_handle: Mutex<Option<JoinHandle<Result<(), EngineError>>>>,
}

impl EngineHandle {
    pub(crate) fn new(
        name: String,
        cmd_tx: mpsc::Sender<EngineCommand>,
        shutdown_tx: watch::Sender<bool>,
        isolate_handle: deno_core::v8::IsolateHandle,
        thread_handle: JoinHandle<Result<(), EngineError>>,
    ) -> Self {
        Self {
            name,
            cmd_tx,
            shutdown_tx,
            terminated: Arc::new(AtomicBool::new(false)),
            isolate_handle,
            thread_handle: Mutex::new(Some(thread_handle)),
        }
    }

    /// Name given to the worker thread at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile a unit into an artifact held inside the isolate.
    pub async fn compile(&self, unit: CompileUnit) -> Result<ArtifactId, EngineError> {
        self.send_command(|reply| EngineCommand::Compile { unit, reply })
            .await
    }

    /// Invoke a compiled artifact. JS exceptions and rejections come back as
    /// `EngineError::Js`; a fired cancellation token as `EngineError::Cancelled`.
    pub async fn execute(
        &self,
        artifact: ArtifactId,
        args: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        self.send_command(|reply| EngineCommand::Execute {
            artifact,
            args,
            timeout_ms,
            cancel,
            reply,
        })
        .await
    }

    /// Drop an artifact. Returns whether the worker still knew it.
    pub async fn discard(&self, artifact: ArtifactId) -> Result<bool, EngineError> {
        self.send_command(|reply| EngineCommand::Discard { artifact, reply })
            .await
    }

    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CallFailure>>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(EngineError::Terminated);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        match reply_rx.await.map_err(|_| EngineError::ChannelClosed)? {
            Ok(value) => Ok(value),
            Err(CallFailure::Js(message)) => Err(EngineError::Js(message)),
            Err(CallFailure::Cancelled) => Err(EngineError::Cancelled),
        }
    }

    /// Request termination: stops the worker loop and interrupts any script
    /// currently executing in the isolate. Idempotent.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(engine = %self.name, "terminating engine worker");
        let _ = self.shutdown_tx.send(true);
        self.isolate_handle.terminate_execution();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Wait for the worker thread to exit and surface its result. Callable
    /// once; later calls are a no-op Ok.
    pub fn join(&self) -> Result<(), EngineError> {
        let taken = match self.thread_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = taken {
            handle.join().map_err(|_| EngineError::ThreadPanic)??;
        }
        Ok(())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.terminate();
        let _ = self.join();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("name", &self.name)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
