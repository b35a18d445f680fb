//! Built-in payload types.
//!
//! These cover the common cases host applications store directly: plain
//! data snapshots (hash-versioned), mutable cells (notify-versioned), raw
//! text, and the null placeholder. Domain types implement [`StoredValue`]
//! themselves; scripts, for instance, hash their fingerprint.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::{fnv1a_64, ChangeSignal, StoredValue};

/// Placeholder for "registered but empty". Reads as version 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullValue;

impl StoredValue for NullValue {
    fn type_label(&self) -> &'static str {
        "null"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Immutable text payload. Also the decode target codecs degrade to when
/// they meet a type label they do not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextValue(pub String);

impl StoredValue for TextValue {
    fn type_label(&self) -> &'static str {
        "text"
    }

    fn content_hash(&self) -> Option<u64> {
        Some(fnv1a_64(self.0.as_bytes()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Immutable structured data. Hash-versioned: replacing an entry with an
/// equal snapshot still bumps the stored version (replacement is a new
/// object), but an in-place re-read of the same instance does not.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    pub data: serde_json::Value,
}

impl DataValue {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

impl StoredValue for DataValue {
    fn type_label(&self) -> &'static str {
        "data"
    }

    fn content_hash(&self) -> Option<u64> {
        Some(hash_json(&self.data))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Mutable data cell with edge-triggered change notification.
///
/// Deliberately does not expose a content hash: the cell announces its
/// mutations through the signal, so the store versions it by notification
/// instead of by re-hashing on every read.
#[derive(Debug, Default)]
pub struct DataCell {
    inner: Mutex<serde_json::Value>,
    signal: ChangeSignal,
}

impl DataCell {
    pub fn new(initial: serde_json::Value) -> Self {
        Self {
            inner: Mutex::new(initial),
            signal: ChangeSignal::new(),
        }
    }

    pub fn get(&self) -> serde_json::Value {
        self.inner.lock().clone()
    }

    /// Replace the content and notify subscribers.
    pub fn set(&self, value: serde_json::Value) {
        *self.inner.lock() = value;
        self.signal.notify();
    }
}

impl StoredValue for DataCell {
    fn type_label(&self) -> &'static str {
        "cell"
    }

    fn change_signal(&self) -> Option<&ChangeSignal> {
        Some(&self.signal)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Structural FNV-1a hash of a JSON value. Deterministic: object keys
/// iterate in serde_json's sorted map order, and each node folds a type
/// tag before its content so `1` and `"1"` hash apart.
pub fn hash_json(value: &serde_json::Value) -> u64 {
    fn fold(hash: u64, bytes: &[u8]) -> u64 {
        let mut h = hash;
        for b in bytes {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    fn walk(hash: u64, value: &serde_json::Value) -> u64 {
        match value {
            serde_json::Value::Null => fold(hash, &[0]),
            serde_json::Value::Bool(b) => fold(fold(hash, &[1]), &[u8::from(*b)]),
            serde_json::Value::Number(n) => fold(fold(hash, &[2]), n.to_string().as_bytes()),
            serde_json::Value::String(s) => fold(fold(hash, &[3]), s.as_bytes()),
            serde_json::Value::Array(items) => {
                items.iter().fold(fold(hash, &[4]), walk)
            }
            serde_json::Value::Object(map) => map.iter().fold(fold(hash, &[5]), |h, (k, v)| {
                walk(fold(h, k.as_bytes()), v)
            }),
        }
    }

    walk(0xcbf29ce484222325, value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
