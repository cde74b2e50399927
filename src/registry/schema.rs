//! Typed capability schemas and provider config decoding
//!
//! Schemas are a closed set of field kinds. Raw provider configuration is
//! decoded against them once, when the provider is constructed, producing
//! either a [`DecodedConfig`] or a [`DecodeError`] naming the field.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Kind of a schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Float,
    Boolean,
    Enum {
        values: Vec<String>,
    },
}

impl FieldKind {
    const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer { .. } => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Enum { .. } => "enum",
        }
    }
}

/// One field of a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaField {
    /// Optional field of the given kind
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
        }
    }

    /// Mark the field as required
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Structural schema: an ordered list of fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: Vec<SchemaField>,
}

impl Schema {
    #[must_use]
    pub const fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check field names are present and unique and kinds are well formed
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` describing the first problem found
    pub fn validate(&self, context: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::Schema(format!("{context}: field with empty name")));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Schema(format!(
                    "{context}: duplicate field '{}'",
                    field.name
                )));
            }
            match &field.kind {
                FieldKind::Enum { values } if values.is_empty() => {
                    return Err(Error::Schema(format!(
                        "{context}: enum field '{}' has no values",
                        field.name
                    )));
                }
                FieldKind::Integer {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    return Err(Error::Schema(format!(
                        "{context}: integer field '{}' has min {min} > max {max}",
                        field.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Decode a raw configuration table against this schema
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` for a missing required field, a value of the
    /// wrong type or outside its allowed set, or a key the schema lacks
    pub fn decode(
        &self,
        raw: &serde_json::Map<String, Value>,
    ) -> std::result::Result<DecodedConfig, DecodeError> {
        if let Some(unknown) = raw.keys().find(|k| self.field(k).is_none()) {
            return Err(DecodeError::new(unknown, DecodeReason::Unknown));
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            match raw.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(DecodeError::new(&field.name, DecodeReason::Missing));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    values.insert(field.name.clone(), decode_value(field, value)?);
                }
            }
        }
        Ok(DecodedConfig(values))
    }
}

fn decode_value(field: &SchemaField, value: &Value) -> std::result::Result<ConfigValue, DecodeError> {
    let wrong_type = || {
        DecodeError::new(
            &field.name,
            DecodeReason::WrongType {
                expected: field.kind.name(),
                found: value_type(value),
            },
        )
    };

    match &field.kind {
        FieldKind::String => value
            .as_str()
            .map(|s| ConfigValue::String(s.to_string()))
            .ok_or_else(wrong_type),
        FieldKind::Integer { min, max } => {
            let n = value.as_i64().ok_or_else(wrong_type)?;
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                return Err(DecodeError::new(
                    &field.name,
                    DecodeReason::OutOfRange {
                        value: n,
                        min: *min,
                        max: *max,
                    },
                ));
            }
            Ok(ConfigValue::Integer(n))
        }
        FieldKind::Float => value.as_f64().map(ConfigValue::Float).ok_or_else(wrong_type),
        FieldKind::Boolean => value.as_bool().map(ConfigValue::Boolean).ok_or_else(wrong_type),
        FieldKind::Enum { values } => {
            let s = value.as_str().ok_or_else(wrong_type)?;
            if values.iter().any(|v| v == s) {
                Ok(ConfigValue::String(s.to_string()))
            } else {
                Err(DecodeError::new(
                    &field.name,
                    DecodeReason::NotAllowed {
                        value: s.to_string(),
                        allowed: values.clone(),
                    },
                ))
            }
        }
    }
}

const fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A decoded configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

/// Provider configuration after schema decoding
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DecodedConfig(BTreeMap<String, ConfigValue>);

impl DecodedConfig {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ConfigValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(ConfigValue::Float(n)) => Some(*n),
            #[allow(clippy::cast_precision_loss)]
            Some(ConfigValue::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(ConfigValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Why a configuration field failed to decode
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeReason {
    #[error("required field missing")]
    Missing,
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("value '{value}' not one of [{}]", .allowed.join(", "))]
    NotAllowed { value: String, allowed: Vec<String> },
    #[error("value {value} outside range {min:?}..={max:?}")]
    OutOfRange {
        value: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    #[error("field not declared by any capability")]
    Unknown,
}

/// Structured decode failure for one field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field}': {reason}")]
pub struct DecodeError {
    pub field: String,
    pub reason: DecodeReason,
}

impl DecodeError {
    fn new(field: &str, reason: DecodeReason) -> Self {
        Self {
            field: field.to_string(),
            reason,
        }
    }
}
