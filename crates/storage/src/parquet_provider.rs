use std::fs::File;
use std::path::PathBuf;

use arrow::array::{
    Array, BooleanArray, Float64Array, Int32Array, Int64Array, LargeStringArray, StringArray,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::DataType;
use dfl_common::{DflError, Result};
use dfl_execution::{Record, Value};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::provider::RecordSource;

/// Parquet files read eagerly into records, one record per row.
///
/// Supported column types: Int32/Int64 (as `Int64`), Float64, Utf8,
/// LargeUtf8 and Boolean. Nulls become absent fields.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    name: String,
    paths: Vec<PathBuf>,
}

impl ParquetSource {
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths,
        }
    }
}

impl RecordSource for ParquetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for path in &self.paths {
            let file = File::open(path)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .map_err(|e| DflError::Execution(format!("parquet reader build failed: {e}")))?
                .build()
                .map_err(|e| DflError::Execution(format!("parquet reader open failed: {e}")))?;
            for batch in reader {
                let batch =
                    batch.map_err(|e| DflError::Execution(format!("parquet decode failed: {e}")))?;
                append_batch(&batch, &mut out)?;
            }
        }
        Ok(out)
    }
}

fn append_batch(batch: &RecordBatch, out: &mut Vec<Record>) -> Result<()> {
    let start = out.len();
    out.extend((0..batch.num_rows()).map(|_| Record::new(batch.num_columns())));
    for (position, column) in batch.columns().iter().enumerate() {
        let rows = &mut out[start..];
        match column.data_type() {
            DataType::Int64 => {
                let a = downcast::<Int64Array>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Int64(a.value(i)));
            }
            DataType::Int32 => {
                let a = downcast::<Int32Array>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Int64(a.value(i) as i64));
            }
            DataType::Float64 => {
                let a = downcast::<Float64Array>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Float64(a.value(i)));
            }
            DataType::Utf8 => {
                let a = downcast::<StringArray>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Utf8(a.value(i).to_string()));
            }
            DataType::LargeUtf8 => {
                let a = downcast::<LargeStringArray>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Utf8(a.value(i).to_string()));
            }
            DataType::Boolean => {
                let a = downcast::<BooleanArray>(column.as_ref())?;
                fill(rows, position, a, |i| Value::Boolean(a.value(i)));
            }
            other => {
                return Err(DflError::InvalidConfig(format!(
                    "unsupported parquet column type {other:?} at position {position}"
                )));
            }
        }
    }
    Ok(())
}

fn downcast<T: 'static>(array: &dyn Array) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| DflError::Execution("parquet column downcast failed".to_string()))
}

fn fill(rows: &mut [Record], position: usize, array: &dyn Array, value: impl Fn(usize) -> Value) {
    for (i, row) in rows.iter_mut().enumerate() {
        if array.is_valid(i) {
            row.set_field(position, value(i));
        }
    }
}
