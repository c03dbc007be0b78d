//! Positional record model flowing through every iteration role.
//!
//! Records are fixed-arity rows of optional typed values. The engine only
//! interprets fields declared as key fields; everything else is opaque and
//! handed to user functions unchanged.

use std::fmt;

use dfl_common::{DflError, Result};
use serde::{Deserialize, Serialize};

use crate::key::KeyType;

/// One typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Signed 64-bit integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Boolean flag.
    Boolean(bool),
}

impl Value {
    /// Key type that can hold this value.
    pub fn key_type(&self) -> KeyType {
        match self {
            Value::Int64(_) => KeyType::Int64,
            Value::Float64(_) => KeyType::Float64,
            Value::Utf8(_) => KeyType::Utf8,
            Value::Boolean(_) => KeyType::Boolean,
        }
    }

    /// Rough in-memory footprint used for spill accounting.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Value::Utf8(s) => std::mem::size_of::<Value>() + s.len(),
            _ => std::mem::size_of::<Value>(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// Ordered fixed-arity sequence of optional values.
///
/// Fields are addressed by position and can be overwritten in place.
/// Absent fields are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<Option<Value>>,
}

impl Record {
    /// Record with `arity` absent fields.
    pub fn new(arity: usize) -> Self {
        Self {
            fields: vec![None; arity],
        }
    }

    /// Record whose fields are all present.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            fields: values.into_iter().map(Some).collect(),
        }
    }

    /// Record built from optional fields.
    pub fn from_fields(fields: Vec<Option<Value>>) -> Self {
        Self { fields }
    }

    /// Number of field slots.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// All field slots in position order.
    pub fn fields(&self) -> &[Option<Value>] {
        &self.fields
    }

    /// Consume the record into its field slots.
    pub fn into_fields(self) -> Vec<Option<Value>> {
        self.fields
    }

    /// Field at `position`, `None` when absent or out of range.
    pub fn field(&self, position: usize) -> Option<&Value> {
        self.fields.get(position).and_then(Option::as_ref)
    }

    /// Overwrite the field at `position`.
    ///
    /// Writing past the current arity extends the record with absent fields.
    pub fn set_field(&mut self, position: usize, value: impl Into<Value>) {
        if position >= self.fields.len() {
            self.fields.resize(position + 1, None);
        }
        self.fields[position] = Some(value.into());
    }

    /// Mark the field at `position` absent.
    pub fn clear_field(&mut self, position: usize) {
        if let Some(slot) = self.fields.get_mut(position) {
            *slot = None;
        }
    }

    /// Field at `position` or `MissingKeyField`.
    pub fn require(&self, position: usize) -> Result<&Value> {
        self.field(position)
            .ok_or(DflError::MissingKeyField { position })
    }

    /// Integer field at `position`.
    pub fn get_i64(&self, position: usize) -> Result<i64> {
        match self.require(position)? {
            Value::Int64(v) => Ok(*v),
            other => Err(mismatch(position, KeyType::Int64, other)),
        }
    }

    /// Float field at `position`.
    pub fn get_f64(&self, position: usize) -> Result<f64> {
        match self.require(position)? {
            Value::Float64(v) => Ok(*v),
            other => Err(mismatch(position, KeyType::Float64, other)),
        }
    }

    /// String field at `position`.
    pub fn get_str(&self, position: usize) -> Result<&str> {
        match self.require(position)? {
            Value::Utf8(v) => Ok(v.as_str()),
            other => Err(mismatch(position, KeyType::Utf8, other)),
        }
    }

    /// Boolean field at `position`.
    pub fn get_bool(&self, position: usize) -> Result<bool> {
        match self.require(position)? {
            Value::Boolean(v) => Ok(*v),
            other => Err(mismatch(position, KeyType::Boolean, other)),
        }
    }

    /// Rough in-memory footprint used for spill accounting.
    pub fn estimated_bytes(&self) -> usize {
        let mut bytes = std::mem::size_of::<Record>();
        for field in &self.fields {
            bytes += match field {
                Some(v) => v.estimated_bytes(),
                None => std::mem::size_of::<Option<Value>>(),
            };
        }
        bytes
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match field {
                Some(v) => write!(f, "{v}")?,
                None => f.write_str("null")?,
            }
        }
        f.write_str(")")
    }
}

pub(crate) fn mismatch(position: usize, expected: KeyType, found: &Value) -> DflError {
    DflError::KeyTypeMismatch {
        position,
        expected: expected.to_string(),
        found: found.key_type().to_string(),
    }
}
