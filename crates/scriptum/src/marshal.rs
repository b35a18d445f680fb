//! Cross-boundary value marshalling.
//!
//! Everything that crosses a context channel is a [`TransferableValue`]:
//! owned, `Send`, JSON-shaped. Store payloads become transferable through a
//! [`ConverterRegistry`], an explicit object owned by the catalog and passed
//! by reference wherever conversion happens. There are no global converter
//! tables.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use scriptum_store::{DataCell, DataValue, NullValue, StoredValue, TextValue};
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;
use crate::fingerprint::fnv1a_32;
use crate::param::ParamKind;

/// A value in wire shape, safe to move across context boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransferableValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Sequence(Vec<TransferableValue>),
    Object(BTreeMap<String, TransferableValue>),
}

impl TransferableValue {
    /// The wire-type tag of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            TransferableValue::Null => ParamKind::Null,
            TransferableValue::Boolean(_) => ParamKind::Boolean,
            TransferableValue::Integer(_) => ParamKind::Integer,
            TransferableValue::Float(_) => ParamKind::Float,
            TransferableValue::Text(_) => ParamKind::Text,
            TransferableValue::Sequence(_) => ParamKind::Sequence,
            TransferableValue::Object(_) => ParamKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TransferableValue::Null)
    }

    /// Stable structural hash, used when a parameter default participates in
    /// a fingerprint.
    pub fn structural_hash(&self) -> u32 {
        fnv1a_32(serde_json::Value::from(self.clone()).to_string().as_bytes())
    }
}

impl From<serde_json::Value> for TransferableValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TransferableValue::Null,
            serde_json::Value::Bool(b) => TransferableValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => TransferableValue::Integer(i),
                None => TransferableValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => TransferableValue::Text(s),
            serde_json::Value::Array(items) => {
                TransferableValue::Sequence(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => TransferableValue::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<TransferableValue> for serde_json::Value {
    fn from(value: TransferableValue) -> Self {
        match value {
            TransferableValue::Null => serde_json::Value::Null,
            TransferableValue::Boolean(b) => serde_json::Value::Bool(b),
            TransferableValue::Integer(i) => serde_json::Value::from(i),
            TransferableValue::Float(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            TransferableValue::Text(s) => serde_json::Value::String(s),
            TransferableValue::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            TransferableValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<bool> for TransferableValue {
    fn from(value: bool) -> Self {
        TransferableValue::Boolean(value)
    }
}

impl From<i64> for TransferableValue {
    fn from(value: i64) -> Self {
        TransferableValue::Integer(value)
    }
}

impl From<f64> for TransferableValue {
    fn from(value: f64) -> Self {
        TransferableValue::Float(value)
    }
}

impl From<&str> for TransferableValue {
    fn from(value: &str) -> Self {
        TransferableValue::Text(value.to_string())
    }
}

impl From<String> for TransferableValue {
    fn from(value: String) -> Self {
        TransferableValue::Text(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Converter registry
// ─────────────────────────────────────────────────────────────────────────────

type ToTransferable =
    Arc<dyn Fn(&dyn StoredValue) -> Result<TransferableValue, ScriptError> + Send + Sync>;
type FromTransferable =
    Arc<dyn Fn(&TransferableValue) -> Result<Arc<dyn StoredValue>, ScriptError> + Send + Sync>;

struct ConverterPair {
    label: &'static str,
    to: ToTransferable,
    from: FromTransferable,
}

/// Converter lookup by concrete payload type.
///
/// Cloning shares the underlying table. A payload type without a registered
/// pair fails at parameter binding time, not at dispatch.
#[derive(Clone)]
pub struct ConverterRegistry {
    inner: Arc<RwLock<HashMap<TypeId, ConverterPair>>>,
}

impl ConverterRegistry {
    /// An empty registry with no converters at all.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A registry covering the built-in store payloads: data snapshots,
    /// mutable cells, text, and the null placeholder.
    pub fn with_store_defaults() -> Self {
        let registry = Self::empty();
        registry.register::<DataValue, _, _>(
            "data",
            |payload| Ok(TransferableValue::from(payload.data.clone())),
            |value| Ok(DataValue::new(serde_json::Value::from(value.clone()))),
        );
        registry.register::<DataCell, _, _>(
            "cell",
            |payload| Ok(TransferableValue::from(payload.get())),
            |value| Ok(DataCell::new(serde_json::Value::from(value.clone()))),
        );
        registry.register::<TextValue, _, _>(
            "text",
            |payload| Ok(TransferableValue::Text(payload.0.clone())),
            |value| match value {
                TransferableValue::Text(text) => Ok(TextValue(text.clone())),
                other => Ok(TextValue(
                    serde_json::Value::from(other.clone()).to_string(),
                )),
            },
        );
        registry.register::<NullValue, _, _>(
            "null",
            |_| Ok(TransferableValue::Null),
            |_| Ok(NullValue),
        );
        registry
    }

    /// Register a converter pair for the concrete payload type `T`,
    /// replacing any previous pair for it.
    pub fn register<T, ToF, FromF>(&self, label: &'static str, to: ToF, from: FromF)
    where
        T: StoredValue + 'static,
        ToF: Fn(&T) -> Result<TransferableValue, ScriptError> + Send + Sync + 'static,
        FromF: Fn(&TransferableValue) -> Result<T, ScriptError> + Send + Sync + 'static,
    {
        let to: ToTransferable = Arc::new(move |payload: &dyn StoredValue| {
            let concrete = payload
                .as_any()
                .downcast_ref::<T>()
                .ok_or_else(|| ScriptError::NoConverter(payload.type_label().to_string()))?;
            to(concrete)
        });
        let from: FromTransferable = Arc::new(move |value: &TransferableValue| {
            let concrete = from(value)?;
            Ok(Arc::new(concrete) as Arc<dyn StoredValue>)
        });
        self.inner
            .write()
            .insert(TypeId::of::<T>(), ConverterPair { label, to, from });
    }

    /// Whether a pair is registered for the payload's concrete type.
    pub fn supports(&self, payload: &dyn StoredValue) -> bool {
        self.inner.read().contains_key(&payload.as_any().type_id())
    }

    /// Convert a stored payload into wire shape.
    pub fn to_transferable(
        &self,
        payload: &dyn StoredValue,
    ) -> Result<TransferableValue, ScriptError> {
        let guard = self.inner.read();
        let pair = guard
            .get(&payload.as_any().type_id())
            .ok_or_else(|| ScriptError::NoConverter(payload.type_label().to_string()))?;
        (pair.to)(payload)
    }

    /// Build a payload of type `T` from a wire value.
    pub fn from_transferable<T: StoredValue + 'static>(
        &self,
        value: &TransferableValue,
    ) -> Result<Arc<dyn StoredValue>, ScriptError> {
        let guard = self.inner.read();
        let pair = guard
            .get(&TypeId::of::<T>())
            .ok_or_else(|| ScriptError::NoConverter(std::any::type_name::<T>().to_string()))?;
        (pair.from)(value)
    }

    /// Labels of all registered payload types, for diagnostics.
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels: Vec<_> = self.inner.read().values().map(|p| p.label).collect();
        labels.sort_unstable();
        labels
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("labels", &self.labels())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let value = TransferableValue::from(json!({
            "flag": true,
            "count": 3,
            "ratio": 0.5,
            "name": "x",
            "items": [1, null, "two"],
        }));
        let back = serde_json::Value::from(value.clone());
        assert_eq!(back["count"], json!(3));
        assert_eq!(back["items"][2], json!("two"));
        assert_eq!(value.kind(), ParamKind::Object);
    }

    #[test]
    fn test_number_split() {
        assert_eq!(TransferableValue::from(json!(7)).kind(), ParamKind::Integer);
        assert_eq!(TransferableValue::from(json!(7.5)).kind(), ParamKind::Float);
    }

    #[test]
    fn test_defaults_cover_store_payloads() {
        let registry = ConverterRegistry::with_store_defaults();

        let data: Arc<dyn StoredValue> = Arc::new(DataValue::new(json!([1, 2])));
        let wire = registry.to_transferable(data.as_ref()).unwrap();
        assert_eq!(wire.kind(), ParamKind::Sequence);

        let cell: Arc<dyn StoredValue> = Arc::new(DataCell::new(json!("hello")));
        let wire = registry.to_transferable(cell.as_ref()).unwrap();
        assert_eq!(wire, TransferableValue::Text("hello".to_string()));

        let null: Arc<dyn StoredValue> = Arc::new(NullValue);
        assert!(registry.to_transferable(null.as_ref()).unwrap().is_null());
    }

    #[test]
    fn test_missing_converter_is_an_error() {
        struct Opaque;
        impl StoredValue for Opaque {
            fn type_label(&self) -> &'static str {
                "opaque"
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
                self
            }
        }

        let registry = ConverterRegistry::with_store_defaults();
        let payload = Opaque;
        assert!(!registry.supports(&payload));
        let err = registry.to_transferable(&payload).unwrap_err();
        assert!(matches!(err, ScriptError::NoConverter(label) if label == "opaque"));
    }

    #[test]
    fn test_registered_converter_round_trip() {
        #[derive(Debug, PartialEq)]
        struct Celsius(f64);
        impl StoredValue for Celsius {
            fn type_label(&self) -> &'static str {
                "celsius"
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
                self
            }
        }

        let registry = ConverterRegistry::empty();
        registry.register::<Celsius, _, _>(
            "celsius",
            |c| Ok(TransferableValue::Float(c.0)),
            |value| match value {
                TransferableValue::Float(f) => Ok(Celsius(*f)),
                TransferableValue::Integer(i) => Ok(Celsius(*i as f64)),
                other => Err(ScriptError::NoConverter(format!(
                    "celsius from {:?}",
                    other.kind()
                ))),
            },
        );

        let wire = registry.to_transferable(&Celsius(21.5)).unwrap();
        assert_eq!(wire, TransferableValue::Float(21.5));

        let back = registry
            .from_transferable::<Celsius>(&TransferableValue::Integer(20))
            .unwrap();
        let concrete = back.as_any().downcast_ref::<Celsius>().unwrap();
        assert_eq!(concrete, &Celsius(20.0));
    }

    #[test]
    fn test_structural_hash_is_stable() {
        let a = TransferableValue::from(json!({"b": 1, "a": 2}));
        let b = TransferableValue::from(json!({"a": 2, "b": 1}));
        // Object keys are sorted, so declaration order does not matter.
        assert_eq!(a.structural_hash(), b.structural_hash());
    }
}
