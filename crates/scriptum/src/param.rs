//! Script parameters and the values bound to them.

use scriptum_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;
use crate::fingerprint::FingerprintBuilder;
use crate::marshal::{ConverterRegistry, TransferableValue};

/// Wire-type tag set shared by parameters, return declarations, and
/// transferable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Null,
    Boolean,
    Integer,
    Float,
    Text,
    Sequence,
    Object,
    HandleRef,
}

impl ParamKind {
    /// Stable tag folded into fingerprints.
    pub fn tag(self) -> u32 {
        match self {
            ParamKind::Null => 0,
            ParamKind::Boolean => 1,
            ParamKind::Integer => 2,
            ParamKind::Float => 3,
            ParamKind::Text => 4,
            ParamKind::Sequence => 5,
            ParamKind::Object => 6,
            ParamKind::HandleRef => 7,
        }
    }

    /// Whether a value of kind `actual` satisfies this declared kind.
    /// Integers widen into floats and handle references travel as text.
    pub fn accepts(self, actual: ParamKind) -> bool {
        actual == self
            || (self == ParamKind::Float && actual == ParamKind::Integer)
            || (self == ParamKind::HandleRef && actual == ParamKind::Text)
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamKind::Null => "null",
            ParamKind::Boolean => "boolean",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Text => "text",
            ParamKind::Sequence => "sequence",
            ParamKind::Object => "object",
            ParamKind::HandleRef => "handle",
        };
        f.write_str(name)
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A declared script parameter.
///
/// Names must be identifiers because they become the formal parameter names
/// of the compiled entry function. A default value is only allowed on
/// optional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    kind: ParamKind,
    optional: bool,
    default: Option<TransferableValue>,
    description: Option<String>,
}

impl Parameter {
    /// A mandatory parameter.
    pub fn new(name: &str, kind: ParamKind) -> Result<Self, ScriptError> {
        if !is_valid_identifier(name) {
            return Err(ScriptError::InvalidParameterName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            optional: false,
            default: None,
            description: None,
        })
    }

    /// An optional parameter without a default; an unsupplied one binds to
    /// null.
    pub fn optional(name: &str, kind: ParamKind) -> Result<Self, ScriptError> {
        let mut parameter = Self::new(name, kind)?;
        parameter.optional = true;
        Ok(parameter)
    }

    /// Attach a default value. Only optional parameters may carry one.
    pub fn with_default(mut self, value: TransferableValue) -> Result<Self, ScriptError> {
        if !self.optional {
            return Err(ScriptError::DefaultWithoutOptional(self.name));
        }
        self.default = Some(value);
        Ok(self)
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<&TransferableValue> {
        self.default.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Hash of everything that affects compiled shape. The description is
    /// cosmetic and stays out.
    pub fn structural_hash(&self) -> u32 {
        FingerprintBuilder::new()
            .push_str(&self.name)
            .push_u32(self.kind.tag())
            .push_bool(self.optional)
            .push_opt_hash(self.default.as_ref().map(TransferableValue::structural_hash))
            .finish()
            .0
    }
}

/// How a supplied parameter carries its value.
#[derive(Debug, Clone)]
pub enum BoundValue {
    /// The value travels as-is.
    Direct(TransferableValue),
    /// The value lives in the object store and is fetched at run time.
    Stored { handle: String },
}

/// A parameter paired with the value supplied for it.
#[derive(Debug, Clone)]
pub struct ParameterValue {
    parameter: Parameter,
    value: BoundValue,
}

impl ParameterValue {
    pub fn direct(parameter: Parameter, value: TransferableValue) -> Self {
        Self {
            parameter,
            value: BoundValue::Direct(value),
        }
    }

    pub fn stored(parameter: Parameter, handle: impl Into<String>) -> Self {
        Self {
            parameter,
            value: BoundValue::Stored {
                handle: handle.into(),
            },
        }
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }

    pub fn bound(&self) -> &BoundValue {
        &self.value
    }

    /// Produce the wire value: direct values pass through, stored references
    /// fetch their payload and convert it. A dangling handle or a payload
    /// without a converter is a binding error.
    pub fn resolve(
        &self,
        store: &ObjectStore,
        registry: &ConverterRegistry,
    ) -> Result<TransferableValue, ScriptError> {
        match &self.value {
            BoundValue::Direct(value) => Ok(value.clone()),
            BoundValue::Stored { handle } => {
                let object = store
                    .get(handle)
                    .ok_or_else(|| ScriptError::UnknownHandle(handle.clone()))?;
                registry.to_transferable(object.payload().as_ref())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
