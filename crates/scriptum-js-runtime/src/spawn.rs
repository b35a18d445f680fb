//! Worker thread spawning.

use tokio::sync::{mpsc, watch};

use crate::error::EngineError;
use crate::handle::EngineHandle;
use crate::worker;

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Knobs applied when the isolate is created.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Hard V8 heap ceiling in megabytes. `None` leaves V8's default.
    pub max_heap_mb: Option<usize>,
}

/// Spawn a dedicated engine worker thread and return its handle.
///
/// The call blocks until the worker has either created its isolate or
/// failed to. `name` lands in the thread name and in log lines.
pub fn spawn_engine(name: &str, settings: EngineSettings) -> Result<EngineHandle, EngineError> {
    worker::init_platform();

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Rendezvous for isolate creation, before any command is accepted.
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel(1);

    let thread_name = format!("script-engine-{name}");
    let worker_name = name.to_owned();
    let thread = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => return Err(EngineError::SpawnFailed(err)),
            };
            let result = runtime.block_on(worker::run_worker(
                worker_name,
                settings,
                init_tx,
                cmd_rx,
                shutdown_rx,
            ));
            runtime.shutdown_background();
            result
        })
        .map_err(EngineError::SpawnFailed)?;

    let isolate_handle = match init_rx.recv() {
        Ok(Ok(handle)) => handle,
        Ok(Err(message)) => {
            let _ = thread.join();
            return Err(EngineError::Js(message));
        }
        Err(_) => {
            // Worker exited before the handshake; recover its error.
            return Err(match thread.join() {
                Ok(Err(err)) => err,
                Ok(Ok(())) => EngineError::ChannelClosed,
                Err(_) => EngineError::ThreadPanic,
            });
        }
    };

    Ok(EngineHandle::new(
        name.to_owned(),
        cmd_tx,
        shutdown_tx,
        isolate_handle,
        thread,
    ))
}
