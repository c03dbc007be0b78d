use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use dfl_common::{DflError, Result};
use serde::{Deserialize, Serialize};

use crate::parquet_provider::ParquetSource;
use crate::provider::{DelimitedTextSource, FieldType, RecordSource};

/// One named input as described in a catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
    pub name: String,
    pub uri: String,
    /// `text` or `parquet`.
    pub format: String,
    /// Column delimiter for `text`; whitespace when absent.
    #[serde(default)]
    pub delimiter: Option<String>,
    /// Column types for `text`.
    #[serde(default)]
    pub fields: Vec<FieldType>,
}

impl InputDef {
    fn delimiter_char(&self) -> Result<char> {
        match self.delimiter.as_deref() {
            None | Some("") => Ok(' '),
            Some("\\t") => Ok('\t'),
            Some(d) => {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(DflError::InvalidConfig(format!(
                        "input '{}' delimiter must be a single character, got '{d}'",
                        self.name
                    ))),
                }
            }
        }
    }

    /// Build the record source this definition describes.
    pub fn open(&self) -> Result<Arc<dyn RecordSource>> {
        match self.format.to_ascii_lowercase().as_str() {
            "text" | "csv" | "tbl" => {
                if self.fields.is_empty() {
                    return Err(DflError::InvalidConfig(format!(
                        "text input '{}' must declare its fields",
                        self.name
                    )));
                }
                Ok(Arc::new(DelimitedTextSource::new(
                    self.name.clone(),
                    &self.uri,
                    self.delimiter_char()?,
                    self.fields.clone(),
                )))
            }
            "parquet" => Ok(Arc::new(ParquetSource::new(
                self.name.clone(),
                vec![PathBuf::from(&self.uri)],
            ))),
            other => Err(DflError::InvalidConfig(format!(
                "input '{}' has unsupported format '{other}'",
                self.name
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct InputCatalog {
    inputs: HashMap<String, InputDef>,
}

impl InputCatalog {
    pub fn new() -> Self {
        Self {
            inputs: HashMap::new(),
        }
    }

    pub fn register_input(&mut self, input: InputDef) {
        self.inputs.insert(input.name.clone(), input);
    }

    pub fn get(&self, name: &str) -> Result<&InputDef> {
        self.inputs
            .get(name)
            .ok_or_else(|| DflError::InvalidConfig(format!("unknown input: {name}")))
    }

    pub fn open(&self, name: &str) -> Result<Arc<dyn RecordSource>> {
        self.get(name)?.open()
    }

    pub fn into_inputs(self) -> Vec<InputDef> {
        self.inputs.into_values().collect()
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let inputs: Vec<InputDef> =
            serde_json::from_str(s).map_err(|e| DflError::InvalidConfig(e.to_string()))?;
        let mut cat = InputCatalog::new();
        for input in inputs {
            cat.register_input(input);
        }
        Ok(cat)
    }
}
