use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use dfl_common::{DflError, Result};
use dfl_execution::{Record, Value};
use serde::{Deserialize, Serialize};

/// Source of one iteration input (solution set, workset or dependencies).
///
/// Sources are read exactly once, at INIT.
pub trait RecordSource: Send + Sync {
    /// Input name used in logs and errors.
    fn name(&self) -> &str;

    /// Read every record of the input.
    ///
    /// # Errors
    /// Returns an error when the backing data cannot be opened or parsed.
    fn read(&self) -> Result<Vec<Record>>;
}

/// Declared type of one column of a text or columnar input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Float64,
    Utf8,
    Boolean,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::Utf8 => "utf8",
            FieldType::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

impl FieldType {
    fn parse(self, token: &str) -> std::result::Result<Value, String> {
        match self {
            FieldType::Int64 => token
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|e| e.to_string()),
            FieldType::Float64 => token
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|e| e.to_string()),
            FieldType::Utf8 => Ok(Value::Utf8(token.to_string())),
            FieldType::Boolean => token
                .parse::<bool>()
                .map(Value::Boolean)
                .map_err(|e| e.to_string()),
        }
    }
}

/// Records held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }
}

/// Line-oriented delimited text, one record per non-empty line.
///
/// A whitespace delimiter splits on runs of whitespace. Empty tokens become
/// absent fields.
#[derive(Debug, Clone)]
pub struct DelimitedTextSource {
    name: String,
    path: PathBuf,
    delimiter: char,
    fields: Vec<FieldType>,
}

impl DelimitedTextSource {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        delimiter: char,
        fields: Vec<FieldType>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            delimiter,
            fields,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse one line into a record.
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<Record> {
        let tokens: Vec<&str> = if self.delimiter.is_whitespace() {
            line.split_whitespace().collect()
        } else {
            line.split(self.delimiter).map(str::trim).collect()
        };
        if tokens.len() != self.fields.len() {
            return Err(DflError::Execution(format!(
                "{}:{line_no}: expected {} fields, found {}",
                self.path.display(),
                self.fields.len(),
                tokens.len()
            )));
        }
        let mut record = Record::new(self.fields.len());
        for (position, (token, field_type)) in tokens.iter().zip(&self.fields).enumerate() {
            if token.is_empty() {
                continue;
            }
            let value = field_type.parse(token).map_err(|e| {
                DflError::Execution(format!(
                    "{}:{line_no}: parse {field_type} failed for field {position} ('{token}'): {e}",
                    self.path.display()
                ))
            })?;
            record.set_field(position, value);
        }
        Ok(record)
    }
}

impl RecordSource for DelimitedTextSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Vec<Record>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for (line_no, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }
            out.push(self.parse_line(trimmed, line_no + 1)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_path(prefix: &str, ext: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
    }

    #[test]
    fn reads_whitespace_delimited_ranks() {
        let path = unique_path("dfl_ranks", "txt");
        std::fs::write(&path, "1 0.025\n2   0.125\n\n3 0.083\n").expect("write");
        let source = DelimitedTextSource::new(
            "ranks",
            &path,
            ' ',
            vec![FieldType::Int64, FieldType::Float64],
        );
        let records = source.read().expect("read");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].get_i64(0).expect("id"), 2);
        assert_eq!(records[1].get_f64(1).expect("rank"), 0.125);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_tokens_become_absent_fields() {
        let source = DelimitedTextSource::new(
            "edges",
            "unused",
            '|',
            vec![FieldType::Int64, FieldType::Utf8, FieldType::Boolean],
        );
        let r = source.parse_line("4||true", 1).expect("parse");
        assert_eq!(r.get_i64(0).expect("id"), 4);
        assert!(r.field(1).is_none());
        assert!(r.get_bool(2).expect("flag"));
    }

    #[test]
    fn malformed_lines_report_location() {
        let source =
            DelimitedTextSource::new("v", "v.txt", ',', vec![FieldType::Int64, FieldType::Int64]);
        let err = source.parse_line("1,x", 7).expect_err("parse error");
        assert!(err.to_string().contains("v.txt:7"));
        assert!(source.parse_line("1,2,3", 8).is_err());
    }

    #[test]
    fn memory_source_returns_its_records() {
        let records = vec![Record::from_values([Value::Int64(1)])];
        let source = MemorySource::new("mem", records.clone());
        assert_eq!(source.name(), "mem");
        assert_eq!(source.read().expect("read"), records);
    }
}
