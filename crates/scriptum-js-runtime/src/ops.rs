//! Native ops exposed to hosted scripts.

use deno_core::{extension, op2};

#[op2(fast)]
fn op_log(#[string] level: &str, #[string] message: &str) {
    match level {
        "error" => tracing::error!(target: "scriptum::js", "{message}"),
        "warn" => tracing::warn!(target: "scriptum::js", "{message}"),
        "debug" => tracing::debug!(target: "scriptum::js", "{message}"),
        _ => tracing::info!(target: "scriptum::js", "{message}"),
    }
}

/// Milliseconds since the Unix epoch, as observed by the host.
#[op2(fast)]
#[bigint]
fn op_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

extension!(scriptum_runtime, ops = [op_log, op_now]);

pub fn init_ops() -> Vec<deno_core::Extension> {
    vec![scriptum_runtime::init_ops()]
}
