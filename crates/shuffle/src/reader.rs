use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;

use dfl_common::{DflError, Result};
use dfl_execution::Record;

use crate::codec::decode_record;

/// Reads JSON-lines record runs written by [`crate::SpillWriter`].
#[derive(Debug, Clone)]
pub struct SpillReader {
    root_dir: PathBuf,
}

impl SpillReader {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Read a whole run into memory.
    pub fn read_run(&self, rel: &str) -> Result<Vec<Record>> {
        let mut cursor = self.open_run(rel)?;
        let mut out = Vec::new();
        while let Some(record) = cursor.next_record()? {
            out.push(record);
        }
        Ok(out)
    }

    /// Open a run for record-at-a-time reading.
    pub fn open_run(&self, rel: &str) -> Result<RunCursor> {
        let file = File::open(self.root_dir.join(rel))?;
        Ok(RunCursor {
            file: rel.to_string(),
            lines: BufReader::new(file).lines(),
        })
    }
}

/// Lazy cursor over one spilled run.
#[derive(Debug)]
pub struct RunCursor {
    file: String,
    lines: Lines<BufReader<File>>,
}

impl RunCursor {
    /// Next record, `None` at end of run.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = decode_record(&line).map_err(|e| {
                DflError::Execution(format!("spill decode failed in {}: {e}", self.file))
            })?;
            return Ok(Some(record));
        }
    }
}
