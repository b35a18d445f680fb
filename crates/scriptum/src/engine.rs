//! Engine abstraction consumed by isolation contexts.
//!
//! [`ScriptEngine`] is the narrow waist between the scripting core and
//! `scriptum-js-runtime`: compile, execute, discard, terminate. Contexts box
//! it, so tests can stand in an engine that never touches V8.

use async_trait::async_trait;
use scriptum_js_runtime::{ArtifactId, CompileUnit, EngineError, EngineHandle};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn compile(&self, unit: CompileUnit) -> Result<ArtifactId, EngineError>;

    async fn execute(
        &self,
        artifact: ArtifactId,
        args: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError>;

    async fn discard(&self, artifact: ArtifactId) -> Result<bool, EngineError>;

    fn terminate(&self);

    fn is_terminated(&self) -> bool;
}

#[async_trait]
impl<T: ScriptEngine + ?Sized> ScriptEngine for std::sync::Arc<T> {
    async fn compile(&self, unit: CompileUnit) -> Result<ArtifactId, EngineError> {
        (**self).compile(unit).await
    }

    async fn execute(
        &self,
        artifact: ArtifactId,
        args: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        (**self).execute(artifact, args, timeout_ms, cancel).await
    }

    async fn discard(&self, artifact: ArtifactId) -> Result<bool, EngineError> {
        (**self).discard(artifact).await
    }

    fn terminate(&self) {
        (**self).terminate();
    }

    fn is_terminated(&self) -> bool {
        (**self).is_terminated()
    }
}

#[async_trait]
impl ScriptEngine for EngineHandle {
    async fn compile(&self, unit: CompileUnit) -> Result<ArtifactId, EngineError> {
        EngineHandle::compile(self, unit).await
    }

    async fn execute(
        &self,
        artifact: ArtifactId,
        args: Vec<serde_json::Value>,
        timeout_ms: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        EngineHandle::execute(self, artifact, args, timeout_ms, cancel).await
    }

    async fn discard(&self, artifact: ArtifactId) -> Result<bool, EngineError> {
        EngineHandle::discard(self, artifact).await
    }

    fn terminate(&self) {
        EngineHandle::terminate(self);
    }

    fn is_terminated(&self) -> bool {
        EngineHandle::is_terminated(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test double
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    type ExecFn = Box<
        dyn Fn(&CompileUnit, &[serde_json::Value]) -> Result<serde_json::Value, EngineError>
            + Send
            + Sync,
    >;

    /// In-memory engine: records compiles, executes through a closure.
    /// The default closure echoes the arguments back as an array.
    pub(crate) struct MockEngine {
        pub compile_count: AtomicUsize,
        pub execute_count: AtomicUsize,
        pub discard_count: AtomicUsize,
        units: Mutex<HashMap<u64, CompileUnit>>,
        next: AtomicU64,
        exec: ExecFn,
        fail_next_compile: Mutex<Option<String>>,
        terminated: AtomicBool,
    }

    impl MockEngine {
        pub(crate) fn new() -> Self {
            Self::with_exec(|_, args| Ok(serde_json::Value::Array(args.to_vec())))
        }

        pub(crate) fn with_exec<F>(exec: F) -> Self
        where
            F: Fn(&CompileUnit, &[serde_json::Value]) -> Result<serde_json::Value, EngineError>
                + Send
                + Sync
                + 'static,
        {
            Self {
                compile_count: AtomicUsize::new(0),
                execute_count: AtomicUsize::new(0),
                discard_count: AtomicUsize::new(0),
                units: Mutex::new(HashMap::new()),
                next: AtomicU64::new(1),
                exec: Box::new(exec),
                fail_next_compile: Mutex::new(None),
                terminated: AtomicBool::new(false),
            }
        }

        pub(crate) fn set_compile_failure(&self, message: &str) {
            *self.fail_next_compile.lock() = Some(message.to_string());
        }

        pub(crate) fn compiled_unit(&self, artifact: ArtifactId) -> Option<CompileUnit> {
            self.units.lock().get(&artifact.0).cloned()
        }

        pub(crate) fn live_artifacts(&self) -> usize {
            self.units.lock().len()
        }
    }

    #[async_trait]
    impl ScriptEngine for MockEngine {
        async fn compile(&self, unit: CompileUnit) -> Result<ArtifactId, EngineError> {
            if self.terminated.load(Ordering::Acquire) {
                return Err(EngineError::Terminated);
            }
            self.compile_count.fetch_add(1, Ordering::Relaxed);
            if let Some(message) = self.fail_next_compile.lock().take() {
                return Err(EngineError::Js(message));
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            self.units.lock().insert(id, unit);
            Ok(ArtifactId(id))
        }

        async fn execute(
            &self,
            artifact: ArtifactId,
            args: Vec<serde_json::Value>,
            _timeout_ms: Option<u64>,
            cancel: CancellationToken,
        ) -> Result<serde_json::Value, EngineError> {
            if self.terminated.load(Ordering::Acquire) {
                return Err(EngineError::Terminated);
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.execute_count.fetch_add(1, Ordering::Relaxed);
            let unit = self
                .units
                .lock()
                .get(&artifact.0)
                .cloned()
                .ok_or_else(|| EngineError::Js(format!("unknown artifact {artifact}")))?;
            (self.exec)(&unit, &args)
        }

        async fn discard(&self, artifact: ArtifactId) -> Result<bool, EngineError> {
            self.discard_count.fetch_add(1, Ordering::Relaxed);
            Ok(self.units.lock().remove(&artifact.0).is_some())
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::Release);
        }

        fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::Acquire)
        }
    }
}
