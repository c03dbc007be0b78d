//! Line encoding of spilled records.
//!
//! Floats are stored as their IEEE-754 bit pattern so a spilled record
//! reloads bit for bit, including NaN payloads and infinities.

use dfl_common::{DflError, Result};
use dfl_execution::{Record, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
enum SpillValue {
    I(i64),
    F(u64),
    S(String),
    B(bool),
}

impl From<&Value> for SpillValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int64(v) => SpillValue::I(*v),
            Value::Float64(v) => SpillValue::F(v.to_bits()),
            Value::Utf8(v) => SpillValue::S(v.clone()),
            Value::Boolean(v) => SpillValue::B(*v),
        }
    }
}

impl From<SpillValue> for Value {
    fn from(value: SpillValue) -> Self {
        match value {
            SpillValue::I(v) => Value::Int64(v),
            SpillValue::F(bits) => Value::Float64(f64::from_bits(bits)),
            SpillValue::S(v) => Value::Utf8(v),
            SpillValue::B(v) => Value::Boolean(v),
        }
    }
}

/// Encode one record as a single JSON line (without the newline).
pub fn encode_record(record: &Record) -> Result<String> {
    let fields: Vec<Option<SpillValue>> = record
        .fields()
        .iter()
        .map(|f| f.as_ref().map(SpillValue::from))
        .collect();
    serde_json::to_string(&fields)
        .map_err(|e| DflError::Execution(format!("spill encode failed: {e}")))
}

pub fn decode_record(line: &str) -> std::result::Result<Record, serde_json::Error> {
    let fields: Vec<Option<SpillValue>> = serde_json::from_str(line)?;
    Ok(Record::from_fields(
        fields.into_iter().map(|f| f.map(Value::from)).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_bits(record: &Record) -> Vec<Option<u64>> {
        record
            .fields()
            .iter()
            .map(|f| match f {
                Some(Value::Float64(v)) => Some(v.to_bits()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn floats_reload_bit_for_bit() {
        // xorshift64
        let mut state = 0x9e37_79b9_7f4a_7c15_u64;
        let mut values = vec![
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            -0.0,
            f64::MIN_POSITIVE / 2.0,
            2.140012791976146e-9,
        ];
        for _ in 0..10_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let v = f64::from_bits(state);
            if v.is_finite() {
                values.push(v);
            }
        }
        for v in values {
            let record = Record::from_values([Value::Int64(1), Value::Float64(v)]);
            let back = decode_record(&encode_record(&record).expect("encode")).expect("decode");
            assert_eq!(float_bits(&back), float_bits(&record), "value {v:e}");
        }
    }

    #[test]
    fn absent_fields_and_other_types_survive() {
        let record = Record::from_fields(vec![
            Some(Value::Utf8("a\"b".to_string())),
            None,
            Some(Value::Boolean(true)),
            Some(Value::Int64(i64::MIN)),
        ]);
        let back = decode_record(&encode_record(&record).expect("encode")).expect("decode");
        assert_eq!(back, record);
    }
}
