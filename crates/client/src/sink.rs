//! Output adapters for final solution sets.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use arrow_schema::{DataType, Field, Schema};
use dfl_common::{DflError, Result};
use dfl_execution::{Record, Value};
use parquet::arrow::ArrowWriter;

/// Convert records into one batch.
///
/// Column types are taken from the first present value of each column;
/// columns with no values at all become nullable Utf8. Every column is
/// nullable because records may leave fields absent.
pub fn records_to_batch(records: &[Record], column_names: &[&str]) -> Result<RecordBatch> {
    let arity = records.iter().map(Record::arity).max().unwrap_or(0);
    if column_names.len() < arity {
        return Err(DflError::InvalidConfig(format!(
            "records have {arity} fields but only {} column names were given",
            column_names.len()
        )));
    }
    let mut fields = Vec::with_capacity(column_names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(column_names.len());
    for (position, name) in column_names.iter().enumerate() {
        let data_type = records
            .iter()
            .find_map(|r| r.field(position))
            .map(value_type)
            .unwrap_or(DataType::Utf8);
        columns.push(build_column(records, position, &data_type)?);
        fields.push(Field::new(*name, data_type, true));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .map_err(|e| DflError::Execution(format!("record batch build failed: {e}")))
}

fn value_type(value: &Value) -> DataType {
    match value {
        Value::Int64(_) => DataType::Int64,
        Value::Float64(_) => DataType::Float64,
        Value::Utf8(_) => DataType::Utf8,
        Value::Boolean(_) => DataType::Boolean,
    }
}

fn mismatch(position: usize, expected: &DataType, found: &Value) -> DflError {
    DflError::Execution(format!(
        "column {position} is {expected} but a record holds {found:?}"
    ))
}

fn build_column(records: &[Record], position: usize, data_type: &DataType) -> Result<ArrayRef> {
    match data_type {
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(records.len());
            for r in records {
                match r.field(position) {
                    None => b.append_null(),
                    Some(Value::Int64(v)) => b.append_value(*v),
                    Some(other) => return Err(mismatch(position, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(records.len());
            for r in records {
                match r.field(position) {
                    None => b.append_null(),
                    Some(Value::Float64(v)) => b.append_value(*v),
                    Some(other) => return Err(mismatch(position, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(records.len());
            for r in records {
                match r.field(position) {
                    None => b.append_null(),
                    Some(Value::Boolean(v)) => b.append_value(*v),
                    Some(other) => return Err(mismatch(position, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        _ => {
            let mut b = StringBuilder::new();
            for r in records {
                match r.field(position) {
                    None => b.append_null(),
                    Some(Value::Utf8(v)) => b.append_value(v),
                    Some(other) => return Err(mismatch(position, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
    }
}

/// Render records as an ascii table.
pub fn pretty_format(records: &[Record], column_names: &[&str]) -> Result<String> {
    let batch = records_to_batch(records, column_names)?;
    pretty_format_batches(&[batch])
        .map(|t| t.to_string())
        .map_err(|e| DflError::Execution(format!("format failed: {e}")))
}

pub fn write_parquet(path: &Path, records: &[Record], column_names: &[&str]) -> Result<()> {
    let batch = records_to_batch(records, column_names)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .map_err(|e| DflError::Execution(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| DflError::Execution(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| DflError::Execution(format!("parquet close failed: {e}")))?;
    Ok(())
}

/// One record per line; absent fields are written as empty tokens.
pub fn write_text(path: &Path, records: &[Record], delimiter: char) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut sep = [0_u8; 4];
    let sep = delimiter.encode_utf8(&mut sep);
    for r in records {
        for (i, field) in r.fields().iter().enumerate() {
            if i > 0 {
                out.write_all(sep.as_bytes())?;
            }
            if let Some(v) = field {
                write!(out, "{v}")?;
            }
        }
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
