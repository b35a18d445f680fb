//! The isolate worker: owns a `JsRuntime` on a dedicated thread and serves
//! compile/execute/discard commands until shut down.

use std::collections::HashMap;
use std::sync::{Mutex, Once};
use std::time::Duration;

use deno_core::{serde_v8, v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::command::{CallFailure, EngineCommand};
use crate::error::EngineError;
use crate::ops;
use crate::spawn::EngineSettings;
use crate::types::{ArtifactId, CompileUnit};

static V8_INIT: Once = Once::new();

/// V8 isolate creation is not re-entrant across threads.
static ISOLATE_CREATE_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the V8 platform once per process.
///
/// Call this from the main thread before starting any async runtime; worker
/// spawns call it again harmlessly.
pub fn init_platform() {
    V8_INIT.call_once(|| {
        JsRuntime::init_platform(None, false);
    });
}

/// Installed into every fresh isolate before the first command. Bridges
/// `console` and `host` to native ops.
const PRELUDE: &str = r#"
(() => {
  const core = Deno.core;
  const text = (args) => args.map((a) => {
    if (typeof a === "string") return a;
    try { return JSON.stringify(a); } catch { return String(a); }
  }).join(" ");
  globalThis.console = {
    log: (...args) => core.ops.op_log("info", text(args)),
    info: (...args) => core.ops.op_log("info", text(args)),
    warn: (...args) => core.ops.op_log("warn", text(args)),
    error: (...args) => core.ops.op_log("error", text(args)),
    debug: (...args) => core.ops.op_log("debug", text(args)),
  };
  globalThis.host = {
    now: () => Number(core.ops.op_now()),
  };
})();
"#;

pub(crate) async fn run_worker(
    name: String,
    settings: EngineSettings,
    init_tx: std::sync::mpsc::SyncSender<Result<v8::IsolateHandle, String>>,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    init_platform();

    let mut js_runtime = {
        let _guard = match ISOLATE_CREATE_LOCK.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut create_params = v8::CreateParams::default();
        if let Some(mb) = settings.max_heap_mb {
            create_params = create_params.heap_limits(1 << 20, mb << 20);
        }
        JsRuntime::new(RuntimeOptions {
            extensions: ops::init_ops(),
            create_params: Some(create_params),
            ..Default::default()
        })
    };

    let isolate_handle = js_runtime.v8_isolate().thread_safe_handle();

    if let Err(err) = js_runtime.execute_script("scriptum:prelude", PRELUDE) {
        let message = err.to_string();
        let _ = init_tx.send(Err(message.clone()));
        return Err(EngineError::Js(message));
    }

    if init_tx.send(Ok(isolate_handle)).is_err() {
        // Spawner went away before the handshake.
        return Ok(());
    }

    debug!(engine = %name, "engine worker ready");

    // Script names handed to V8 need the 'static lifetime. One leaked
    // string per worker, not per compile; unit labels still reach the
    // logs through compile_unit.
    let script_name: &'static str = Box::leak(format!("scriptum:{name}").into_boxed_str());

    // Declared after the runtime so the pinned globals drop first.
    let mut artifacts: HashMap<u64, v8::Global<v8::Function>> = HashMap::new();
    let mut next_artifact: u64 = 1;

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    EngineCommand::Compile { unit, reply } => {
                        let result = compile_unit(
                            &mut js_runtime,
                            &mut artifacts,
                            &mut next_artifact,
                            script_name,
                            unit,
                        );
                        let _ = reply.send(result);
                    }
                    EngineCommand::Execute { artifact, args, timeout_ms, cancel, reply } => {
                        let result = execute_artifact(
                            &mut js_runtime,
                            &artifacts,
                            artifact,
                            args,
                            timeout_ms,
                            cancel,
                        )
                        .await;
                        let _ = reply.send(result);
                    }
                    EngineCommand::Discard { artifact, reply } => {
                        let known = artifacts.remove(&artifact.0).is_some();
                        debug!(engine = %name, artifact = %artifact, known, "discarded artifact");
                        let _ = reply.send(Ok(known));
                    }
                }
            }
        }
    }

    debug!(engine = %name, "engine worker stopped");
    Ok(())
}

/// Wrap the unit body in an async function literal, evaluate it, and pin the
/// resulting function. The async wrapper lets script bodies use top-level
/// `await` and makes every invocation settle through the promise path.
fn compile_unit(
    js_runtime: &mut JsRuntime,
    artifacts: &mut HashMap<u64, v8::Global<v8::Function>>,
    next_artifact: &mut u64,
    script_name: &'static str,
    unit: CompileUnit,
) -> Result<ArtifactId, CallFailure> {
    let source = format!(
        "(async function({}) {{\n{}\n}})",
        unit.params.join(", "),
        unit.body,
    );
    let evaluated = js_runtime
        .execute_script(script_name, source)
        .map_err(|err| CallFailure::Js(err.to_string()))?;

    let function = {
        let scope = &mut js_runtime.handle_scope();
        let local = v8::Local::new(scope, evaluated);
        let local_fn = v8::Local::<v8::Function>::try_from(local).map_err(|_| {
            CallFailure::Js("compiled unit did not evaluate to a function".to_string())
        })?;
        v8::Global::new(scope, local_fn)
    };

    let id = *next_artifact;
    *next_artifact += 1;
    artifacts.insert(id, function);
    debug!(artifact = id, label = %unit.label, "compiled artifact");
    Ok(ArtifactId(id))
}

async fn execute_artifact(
    js_runtime: &mut JsRuntime,
    artifacts: &HashMap<u64, v8::Global<v8::Function>>,
    artifact: ArtifactId,
    args: Vec<serde_json::Value>,
    timeout_ms: Option<u64>,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<serde_json::Value, CallFailure> {
    let Some(function) = artifacts.get(&artifact.0) else {
        return Err(CallFailure::Js(format!("unknown artifact {artifact}")));
    };

    // Synchronous part of the call, catching immediate throws and
    // termination.
    let pending = {
        let scope = &mut js_runtime.handle_scope();
        let tc_scope = &mut v8::TryCatch::new(scope);
        let local_fn = v8::Local::new(tc_scope, function);
        let receiver: v8::Local<v8::Value> =
            tc_scope.get_current_context().global(tc_scope).into();

        let mut call_args = Vec::with_capacity(args.len());
        for arg in &args {
            let value = serde_v8::to_v8(tc_scope, arg)
                .map_err(|err| CallFailure::Js(err.to_string()))?;
            call_args.push(value);
        }

        match local_fn.call(tc_scope, receiver, &call_args) {
            Some(value) => v8::Global::new(tc_scope, value),
            None => {
                let message = tc_scope
                    .exception()
                    .map(|exception| exception.to_rust_string_lossy(tc_scope))
                    .unwrap_or_else(|| "script execution terminated".to_string());
                return Err(CallFailure::Js(message));
            }
        }
    };

    // Drive the event loop until the returned promise settles. Cancellation
    // is cooperative: it wins between polls, never inside one.
    let resolved = js_runtime.resolve(pending);
    let settle = js_runtime.with_event_loop_promise(resolved, PollEventLoopOptions::default());
    let driven = async {
        match timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), settle).await {
                Ok(settled) => settled.map_err(|err| CallFailure::Js(err.to_string())),
                Err(_) => Err(CallFailure::Js(format!("execution exceeded {ms} ms"))),
            },
            None => settle.await.map_err(|err| CallFailure::Js(err.to_string())),
        }
    };

    let settled = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
        settled = driven => settled?,
    };

    let scope = &mut js_runtime.handle_scope();
    let local = v8::Local::new(scope, settled);
    if local.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    serde_v8::from_v8(scope, local).map_err(|err| CallFailure::Js(err.to_string()))
}
