//! Persistence codec.
//!
//! Turns stored values into a self-describing text form and back. The
//! text is a JSON envelope tagging the payload's type label; decoding an
//! envelope whose label has no registered entry degrades to wrapping the
//! raw text in a [`TextValue`] rather than failing, so documents written
//! by a richer deployment still open.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::payload::{DataCell, DataValue, NullValue, TextValue};
use crate::value::{downcast_value, StoredValue};

/// Encodes stored values to self-describing text and back.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Arc<dyn StoredValue>) -> Result<String, StoreError>;

    fn decode(&self, text: &str) -> Result<Arc<dyn StoredValue>, StoreError>;

    /// Encode straight to a file.
    fn encode_to_file(&self, value: &Arc<dyn StoredValue>, path: &Path) -> Result<(), StoreError> {
        let text = self.encode(value)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Decode a file written by [`encode_to_file`].
    ///
    /// [`encode_to_file`]: ValueCodec::encode_to_file
    fn decode_from_file(&self, path: &Path) -> Result<Arc<dyn StoredValue>, StoreError> {
        let text = std::fs::read_to_string(path)?;
        self.decode(&text)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_label: String,
    body: serde_json::Value,
}

type EncodeFn = Arc<dyn Fn(&Arc<dyn StoredValue>) -> Option<serde_json::Value> + Send + Sync>;
type DecodeFn =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StoredValue>, StoreError> + Send + Sync>;

#[derive(Clone)]
struct CodecEntry {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// JSON-envelope codec with per-type-label entries.
///
/// Ships with entries for the built-in payloads; downstream crates
/// register their own (scripts, for instance) under their type label.
/// Sequences ride along naturally: a `data` payload holding an array
/// encodes as an ordered JSON array.
#[derive(Clone)]
pub struct JsonValueCodec {
    entries: HashMap<String, CodecEntry>,
}

impl JsonValueCodec {
    /// Codec with the built-in payload entries registered.
    pub fn new() -> Self {
        let mut codec = Self {
            entries: HashMap::new(),
        };

        codec.register(
            "data",
            |value| downcast_value::<DataValue>(value).map(|v| v.data.clone()),
            |body| {
                Ok(Arc::new(DataValue::new(body.clone())) as Arc<dyn StoredValue>)
            },
        );

        codec.register(
            "text",
            |value| {
                downcast_value::<TextValue>(value)
                    .map(|v| serde_json::Value::String(v.0.clone()))
            },
            |body| {
                let text: String = serde_json::from_value(body.clone())?;
                Ok(Arc::new(TextValue(text)) as Arc<dyn StoredValue>)
            },
        );

        codec.register(
            "cell",
            |value| downcast_value::<DataCell>(value).map(|v| v.get()),
            |body| Ok(Arc::new(DataCell::new(body.clone())) as Arc<dyn StoredValue>),
        );

        codec.register(
            "null",
            |value| downcast_value::<NullValue>(value).map(|_| serde_json::Value::Null),
            |_body| Ok(Arc::new(NullValue) as Arc<dyn StoredValue>),
        );

        codec
    }

    /// Register an entry for a type label. The encode half returns `None`
    /// when the value is not actually of its type.
    pub fn register<E, D>(&mut self, label: &str, encode: E, decode: D)
    where
        E: Fn(&Arc<dyn StoredValue>) -> Option<serde_json::Value> + Send + Sync + 'static,
        D: Fn(&serde_json::Value) -> Result<Arc<dyn StoredValue>, StoreError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            label.to_string(),
            CodecEntry {
                encode: Arc::new(encode),
                decode: Arc::new(decode),
            },
        );
    }
}

impl Default for JsonValueCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueCodec for JsonValueCodec {
    fn encode(&self, value: &Arc<dyn StoredValue>) -> Result<String, StoreError> {
        let label = value.type_label();
        let entry = self
            .entries
            .get(label)
            .ok_or_else(|| StoreError::UnknownCodecEntry(label.to_string()))?;
        let body = (entry.encode)(value).ok_or_else(|| StoreError::CodecMismatch(label.into()))?;
        let envelope = Envelope {
            type_label: label.to_string(),
            body,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    fn decode(&self, text: &str) -> Result<Arc<dyn StoredValue>, StoreError> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("encoded text is not an envelope ({}), keeping raw text", err);
                return Ok(Arc::new(TextValue(text.to_string())));
            }
        };
        match self.entries.get(&envelope.type_label) {
            Some(entry) => (entry.decode)(&envelope.body),
            None => {
                warn!(
                    "no codec entry for type '{}', keeping raw text",
                    envelope.type_label
                );
                Ok(Arc::new(TextValue(text.to_string())))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
