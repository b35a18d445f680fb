//! Scriptum JavaScript Engine
//!
//! V8-backed script engine following Deno's worker pattern: each engine
//! instance owns a dedicated OS thread with its own isolate and a
//! single-threaded tokio runtime. The host talks to it over a command
//! channel; forced termination goes through the isolate handle.
//!
//! # Architecture
//!
//! - One engine per isolation context, one thread per engine
//! - Compile turns a script body into a callable artifact (a retained
//!   V8 function); execute calls it with marshalled arguments
//! - Script-level failures travel back as data on the reply channel;
//!   only protocol breakdowns surface as errors
//! - Source scanning (entry candidates, token classification) is pure
//!   Rust and never touches V8

mod classify;
mod command;
mod error;
mod handle;
mod ops;
mod spawn;
mod types;
mod worker;

pub use classify::{classify, ClassifiedSpan, TokenClass};
pub use error::EngineError;
pub use handle::EngineHandle;
pub use spawn::{spawn_engine, EngineSettings};
pub use types::{entry_candidates, ArtifactId, CompileUnit, EntryCandidate};
pub use worker::init_platform;
