//! Key types, owned keys, composite key specs and reusable key holders.
//!
//! Float keys order by IEEE total order (`f64::total_cmp`) and hash by bit
//! pattern, so `-0.0` and `0.0` are distinct keys and `NaN` equals itself.
//! Every hash in the engine goes through [`KeyHasher`] so that an owned
//! [`Key`], a holder and a raw record field produce the same value.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use dfl_common::{DflError, Result};
use serde::{Deserialize, Serialize};

use crate::record::{Record, Value, mismatch};

/// Declared type of a key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Signed 64-bit integer key.
    Int64,
    /// 64-bit float key (total order).
    Float64,
    /// UTF-8 string key.
    Utf8,
    /// Boolean key.
    Boolean,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Int64 => "Int64",
            KeyType::Float64 => "Float64",
            KeyType::Utf8 => "Utf8",
            KeyType::Boolean => "Boolean",
        };
        f.write_str(name)
    }
}

/// Owned key value with total `Ord` and bit-pattern `Hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// Integer key.
    Int64(i64),
    /// Float key.
    Float64(f64),
    /// String key.
    Utf8(String),
    /// Boolean key.
    Boolean(bool),
}

impl Key {
    /// Declared type matching this key.
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Int64(_) => KeyType::Int64,
            Key::Float64(_) => KeyType::Float64,
            Key::Utf8(_) => KeyType::Utf8,
            Key::Boolean(_) => KeyType::Boolean,
        }
    }

    /// Convert a record value into an owned key.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Int64(v) => Key::Int64(*v),
            Value::Float64(v) => Key::Float64(*v),
            Value::Utf8(v) => Key::Utf8(v.clone()),
            Value::Boolean(v) => Key::Boolean(*v),
        }
    }

    /// Convert back into a record value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int64(v) => Value::Int64(*v),
            Key::Float64(v) => Value::Float64(*v),
            Key::Utf8(v) => Value::Utf8(v.clone()),
            Key::Boolean(v) => Value::Boolean(*v),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Int64(a), Key::Int64(b)) => a.cmp(b),
            (Key::Float64(a), Key::Float64(b)) => a.total_cmp(b),
            (Key::Utf8(a), Key::Utf8(b)) => a.cmp(b),
            (Key::Boolean(a), Key::Boolean(b)) => a.cmp(b),
            (a, b) => type_rank(a.key_type()).cmp(&type_rank(b.key_type())),
        }
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Int64(v) => hash_i64(*v, state),
            Key::Float64(v) => hash_f64(*v, state),
            Key::Utf8(v) => hash_str(v, state),
            Key::Boolean(v) => hash_bool(*v, state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

fn type_rank(t: KeyType) -> u8 {
    match t {
        KeyType::Int64 => 0,
        KeyType::Float64 => 1,
        KeyType::Utf8 => 2,
        KeyType::Boolean => 3,
    }
}

fn hash_i64<H: Hasher>(v: i64, state: &mut H) {
    v.hash(state);
}

fn hash_f64<H: Hasher>(v: f64, state: &mut H) {
    v.to_bits().hash(state);
}

fn hash_str<H: Hasher>(v: &str, state: &mut H) {
    v.hash(state);
}

fn hash_bool<H: Hasher>(v: bool, state: &mut H) {
    v.hash(state);
}

/// Hash of a composite key, stable across processes and sides.
pub fn hash_keys(keys: &[Key]) -> u64 {
    let mut hasher = KeyHasher::new();
    for key in keys {
        hasher.write_key(key);
    }
    hasher.finish()
}

/// Deterministic hasher shared by comparators, partitioners and the
/// solution set.
#[derive(Debug)]
pub struct KeyHasher {
    inner: DefaultHasher,
}

impl KeyHasher {
    /// Fresh hasher with fixed keys.
    pub fn new() -> Self {
        Self {
            inner: DefaultHasher::new(),
        }
    }

    /// Mix one owned key.
    pub fn write_key(&mut self, key: &Key) {
        key.hash(&mut self.inner);
    }

    /// Mix one record value as if it were a key of its own type.
    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Int64(v) => hash_i64(*v, &mut self.inner),
            Value::Float64(v) => hash_f64(*v, &mut self.inner),
            Value::Utf8(v) => hash_str(v, &mut self.inner),
            Value::Boolean(v) => hash_bool(*v, &mut self.inner),
        }
    }

    /// Final hash value.
    pub fn finish(&self) -> u64 {
        self.inner.finish()
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite key: ordered list of `(position, type)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySpec {
    fields: Vec<(usize, KeyType)>,
}

impl KeySpec {
    /// Composite key from `(position, type)` pairs in comparison order.
    pub fn new(fields: Vec<(usize, KeyType)>) -> Self {
        Self { fields }
    }

    /// Single-field key.
    pub fn single(position: usize, key_type: KeyType) -> Self {
        Self {
            fields: vec![(position, key_type)],
        }
    }

    /// `(position, type)` pairs in comparison order.
    pub fn fields(&self) -> &[(usize, KeyType)] {
        &self.fields
    }

    /// Key positions in comparison order.
    pub fn positions(&self) -> Vec<usize> {
        self.fields.iter().map(|(p, _)| *p).collect()
    }

    /// Key types in comparison order.
    pub fn types(&self) -> Vec<KeyType> {
        self.fields.iter().map(|(_, t)| *t).collect()
    }

    /// Number of key fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True for the empty key (every record compares equal).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared types agree field by field with `other`.
    pub fn same_types(&self, other: &KeySpec) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((_, a), (_, b))| a == b)
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (position, key_type)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "#{position}:{key_type}")?;
        }
        f.write_str("]")
    }
}

/// Typed field value checked against the declared key type.
pub(crate) fn key_field<'a>(
    record: &'a Record,
    position: usize,
    key_type: KeyType,
) -> Result<&'a Value> {
    let value = record.require(position)?;
    if value.key_type() != key_type {
        return Err(mismatch(position, key_type, value));
    }
    Ok(value)
}

/// Ordering of two values already checked to share a key type.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Float64(x), Value::Float64(y)) => x.total_cmp(y),
        (Value::Utf8(x), Value::Utf8(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (x, y) => type_rank(x.key_type()).cmp(&type_rank(y.key_type())),
    }
}

/// Reusable receptacle for one key field.
///
/// Typed at construction; loading a string reuses the holder's buffer.
#[derive(Debug, Clone)]
pub(crate) enum KeyHolder {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
}

impl KeyHolder {
    pub(crate) fn new(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Int64 => KeyHolder::Int64(0),
            KeyType::Float64 => KeyHolder::Float64(0.0),
            KeyType::Utf8 => KeyHolder::Utf8(String::new()),
            KeyType::Boolean => KeyHolder::Boolean(false),
        }
    }

    pub(crate) fn key_type(&self) -> KeyType {
        match self {
            KeyHolder::Int64(_) => KeyType::Int64,
            KeyHolder::Float64(_) => KeyType::Float64,
            KeyHolder::Utf8(_) => KeyType::Utf8,
            KeyHolder::Boolean(_) => KeyType::Boolean,
        }
    }

    /// Overwrite the holder with the field at `position`.
    pub(crate) fn load(&mut self, record: &Record, position: usize) -> Result<()> {
        let value = key_field(record, position, self.key_type())?;
        match (self, value) {
            (KeyHolder::Int64(slot), Value::Int64(v)) => *slot = *v,
            (KeyHolder::Float64(slot), Value::Float64(v)) => *slot = *v,
            (KeyHolder::Utf8(slot), Value::Utf8(v)) => {
                slot.clear();
                slot.push_str(v);
            }
            (KeyHolder::Boolean(slot), Value::Boolean(v)) => *slot = *v,
            (holder, value) => {
                return Err(DflError::KeyTypeMismatch {
                    position,
                    expected: holder.key_type().to_string(),
                    found: value.key_type().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Ordering of `self` relative to `other`; both hold the same type.
    pub(crate) fn cmp_holder(&self, other: &KeyHolder) -> Ordering {
        match (self, other) {
            (KeyHolder::Int64(a), KeyHolder::Int64(b)) => a.cmp(b),
            (KeyHolder::Float64(a), KeyHolder::Float64(b)) => a.total_cmp(b),
            (KeyHolder::Utf8(a), KeyHolder::Utf8(b)) => a.cmp(b),
            (KeyHolder::Boolean(a), KeyHolder::Boolean(b)) => a.cmp(b),
            (a, b) => type_rank(a.key_type()).cmp(&type_rank(b.key_type())),
        }
    }

    pub(crate) fn write_hash(&self, hasher: &mut KeyHasher) {
        match self {
            KeyHolder::Int64(v) => hash_i64(*v, &mut hasher.inner),
            KeyHolder::Float64(v) => hash_f64(*v, &mut hasher.inner),
            KeyHolder::Utf8(v) => hash_str(v, &mut hasher.inner),
            KeyHolder::Boolean(v) => hash_bool(*v, &mut hasher.inner),
        }
    }
}

/// Fresh holders for every field of `types`.
pub(crate) fn holders_for(types: &[KeyType]) -> Vec<KeyHolder> {
    types.iter().map(|t| KeyHolder::new(*t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_keys_use_total_order() {
        let neg_zero = Key::Float64(-0.0);
        let zero = Key::Float64(0.0);
        assert_eq!(neg_zero.cmp(&zero), Ordering::Less);
        assert_ne!(neg_zero, zero);
        assert_eq!(Key::Float64(f64::NAN), Key::Float64(f64::NAN));
        assert_eq!(
            hash_keys(&[Key::Float64(1.5)]),
            hash_keys(&[Key::Float64(1.5)])
        );
    }

    #[test]
    fn value_and_key_hash_agree() {
        let mut from_value = KeyHasher::new();
        from_value.write_value(&Value::Utf8("v7".to_string()));
        from_value.write_value(&Value::Int64(7));
        assert_eq!(
            from_value.finish(),
            hash_keys(&[Key::Utf8("v7".to_string()), Key::Int64(7)])
        );
    }

    #[test]
    fn holder_reuses_string_buffer() {
        let mut holder = KeyHolder::new(KeyType::Utf8);
        let long = Record::from_values([Value::Utf8("a-long-enough-key".to_string())]);
        holder.load(&long, 0).expect("load");
        let capacity = match &holder {
            KeyHolder::Utf8(s) => s.capacity(),
            _ => unreachable!(),
        };
        let short = Record::from_values([Value::Utf8("b".to_string())]);
        holder.load(&short, 0).expect("load");
        match &holder {
            KeyHolder::Utf8(s) => {
                assert_eq!(s, "b");
                assert_eq!(s.capacity(), capacity);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn holder_rejects_wrong_type() {
        let mut holder = KeyHolder::new(KeyType::Int64);
        let r = Record::from_values([Value::Utf8("1".to_string())]);
        assert!(matches!(
            holder.load(&r, 0),
            Err(DflError::KeyTypeMismatch { position: 0, .. })
        ));
    }

    #[test]
    fn key_spec_type_agreement() {
        let a = KeySpec::new(vec![(0, KeyType::Int64), (2, KeyType::Utf8)]);
        let b = KeySpec::new(vec![(1, KeyType::Int64), (0, KeyType::Utf8)]);
        let c = KeySpec::single(0, KeyType::Int64);
        assert!(a.same_types(&b));
        assert!(!a.same_types(&c));
        assert_eq!(a.positions(), vec![0, 2]);
        assert_eq!(a.to_string(), "[#0:Int64, #2:Utf8]");
    }
}
