//! Handle names.
//!
//! A handle is the textual form `name:version` that callers pass around to
//! refer to a stored object. Names are restricted to `[0-9A-Za-z_]`;
//! anything else is silently dropped so that display labels coming from
//! host applications ("Rates (EUR)!") still map onto a stable store key.
//! The version component is advisory display state: lookups resolve by
//! name alone.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Reference to a stored object at a point in its version history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    name: String,
    version: u64,
}

impl Handle {
    /// Build a handle from a raw name, sanitizing it first.
    pub fn new(name: &str, version: u64) -> Result<Self, StoreError> {
        let clean = sanitize_name(name);
        if clean.is_empty() {
            return Err(StoreError::EmptyName(name.to_string()));
        }
        Ok(Self {
            name: clean,
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Parse the strict `name:version` form. The version digits must be
    /// present and non-empty; use [`lookup_name`] for the tolerant
    /// name-or-handle form.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let (name, digits) = match split_version_suffix(text) {
            Some(parts) => parts,
            None => return Err(StoreError::MalformedHandle(text.to_string())),
        };
        if digits.is_empty() {
            return Err(StoreError::MalformedHandle(text.to_string()));
        }
        let version: u64 = digits
            .parse()
            .map_err(|_| StoreError::MalformedHandle(text.to_string()))?;
        Self::new(name, version)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Drop every character outside `[0-9A-Za-z_]`. Silent by contract;
/// callers that need a non-empty result check afterwards.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Resolve a name-or-handle string to the store key it addresses: strip a
/// trailing `:digits` group if one is present (empty digits included, so
/// `"rates:"` still resolves to `"rates"`), then sanitize.
pub fn lookup_name(name_or_handle: &str) -> String {
    match split_version_suffix(name_or_handle) {
        Some((name, _digits)) => sanitize_name(name),
        None => sanitize_name(name_or_handle),
    }
}

/// Split off a trailing `:digits` group. Only the last colon counts, and
/// everything after it must be ASCII digits (possibly none). Returns the
/// prefix and the digit run, or `None` when no such suffix exists.
fn split_version_suffix(text: &str) -> Option<(&str, &str)> {
    let idx = text.rfind(':')?;
    let digits = &text[idx + 1..];
    if digits.chars().all(|c| c.is_ascii_digit()) {
        Some((&text[..idx], digits))
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
