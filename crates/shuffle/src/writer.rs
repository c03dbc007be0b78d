use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dfl_common::Result;
use dfl_execution::Record;

use crate::codec::encode_record;
use crate::layout::SpillRunMeta;

/// Writes record runs as JSON lines under a spill root.
#[derive(Debug, Clone)]
pub struct SpillWriter {
    root_dir: PathBuf,
}

impl SpillWriter {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Write `records` to `rel` (relative to the root), replacing any
    /// previous file.
    pub fn write_run<'a>(
        &self,
        rel: &str,
        records: impl IntoIterator<Item = &'a Record>,
    ) -> Result<SpillRunMeta> {
        let abs = self.root_dir.join(rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&abs)?;
        let mut writer = BufWriter::new(file);
        let mut count = 0_u64;
        for record in records {
            writer.write_all(encode_record(record)?.as_bytes())?;
            writer.write_all(b"\n")?;
            count += 1;
        }
        writer.flush()?;

        let bytes = fs::metadata(&abs)?.len();
        Ok(SpillRunMeta {
            file: rel.to_string(),
            records: count,
            bytes,
        })
    }

    /// Remove one run; a missing file is not an error.
    pub fn remove_run(&self, rel: &str) -> Result<()> {
        match fs::remove_file(self.root_dir.join(rel)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a directory of runs recursively; a missing directory is not
    /// an error.
    pub fn remove_dir(&self, rel: &str) -> Result<()> {
        match fs::remove_dir_all(self.root_dir.join(rel)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use dfl_execution::{Record, Value};

    use crate::layout::sort_run_path;
    use crate::reader::SpillReader;

    use super::SpillWriter;

    fn temp_spill_root() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("dfl_spill_test_{nanos}"))
    }

    #[test]
    fn writes_run_and_reads_it_back_lazily() {
        let root = temp_spill_root();
        let writer = SpillWriter::new(&root);
        let records: Vec<Record> = (0..5)
            .map(|i| Record::from_values([Value::Int64(i), Value::Float64(i as f64 / 2.0)]))
            .collect();

        let rel = sort_run_path(1, 0, 3, 0);
        let meta = writer.write_run(&rel, &records).expect("write run");
        assert_eq!(meta.records, 5);
        assert!(meta.bytes > 0);

        let reader = SpillReader::new(&root);
        let mut cursor = reader.open_run(&rel).expect("open");
        let mut back = Vec::new();
        while let Some(r) = cursor.next_record().expect("next") {
            back.push(r);
        }
        assert_eq!(back, records);
        assert_eq!(reader.read_run(&rel).expect("read"), records);

        writer.remove_run(&rel).expect("remove");
        assert!(reader.open_run(&rel).is_err());
        writer.remove_run(&rel).expect("second remove is a no-op");

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn non_finite_and_subnormal_floats_survive_a_spill() {
        let root = temp_spill_root();
        let writer = SpillWriter::new(&root);
        let floats = [
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            2.140012791976146e-9,
            0.1 + 0.2,
            f64::MIN_POSITIVE / 3.0,
        ];
        let records: Vec<Record> = floats
            .iter()
            .enumerate()
            .map(|(i, f)| Record::from_values([Value::Int64(i as i64), Value::Float64(*f)]))
            .collect();
        let rel = sort_run_path(2, 1, 1, 0);
        writer.write_run(&rel, &records).expect("write run");

        let back = SpillReader::new(&root).read_run(&rel).expect("read run");
        let bits: Vec<u64> = back
            .iter()
            .map(|r| r.get_f64(1).expect("float").to_bits())
            .collect();
        assert_eq!(bits, floats.iter().map(|f| f.to_bits()).collect::<Vec<_>>());

        let _ = std::fs::remove_dir_all(root);
    }
}
