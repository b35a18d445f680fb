//! Scriptum - hosted scripting for Rust applications
//!
//! This crate provides the scripting core:
//! - Typed parameters marshalled across context boundaries
//! - Fingerprint-keyed compile caching per script
//! - Selectable isolation: host context, shared sandbox, individual sandbox
//! - A catalog tying scripts and values to the versioned object store

// Re-export the companion crates
pub use scriptum_js_runtime;
pub use scriptum_store;

// Host-facing catalog and configuration
pub mod catalog;
pub mod config;

// Isolation contexts and the engine seam
pub mod context;
pub mod engine;

// Errors
pub mod error;

// Fingerprints and marshalling
pub mod fingerprint;
pub mod marshal;

// Script surface: options, parameters, results, runner, facade
pub mod options;
pub mod param;
pub mod result;
pub mod runner;
pub mod script;

pub use catalog::{ScriptCatalog, ScriptRecord};
pub use config::Config;
pub use context::{ContextId, ContextLease, ContextManager, EngineSpawner, ScriptContext};
pub use engine::ScriptEngine;
pub use error::{ConfigError, ContextError, ScriptError};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use marshal::{ConverterRegistry, TransferableValue};
pub use options::{HostingPolicy, ScriptingOptions};
pub use param::{BoundValue, ParamKind, Parameter, ParameterValue};
pub use result::{RunError, RunOutcome, RunPhase, RunStats};
pub use runner::{formatted_view, parse, FormattedLine, FormattedRun, ParsedScript, ViewClass};
pub use script::{content_fingerprint, Script};
