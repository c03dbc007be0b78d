//! Cached dependency index, the build side of the head join.
//!
//! Loaded once per partition at INIT from the dependency records whose
//! source key hashes to that partition, never mutated afterwards, and
//! dropped at TERMINATED.

use std::collections::HashMap;

use dfl_common::Result;
use dfl_execution::{
    KeySpec, Record, RecordComparator, RecordPairComparator, TypeComparator, TypePairComparator,
};

#[derive(Debug)]
pub struct DependencyIndex {
    source_key: KeySpec,
    records: Vec<Record>,
    index: HashMap<u64, Vec<usize>>,
    bytes: usize,
}

impl DependencyIndex {
    /// Index `records` by their source key.
    pub fn build(source_key: KeySpec, records: Vec<Record>) -> Result<Self> {
        let mut cmp = RecordComparator::new(source_key.clone())?;
        let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut bytes = 0;
        for (i, record) in records.iter().enumerate() {
            index.entry(cmp.hash(record)?).or_default().push(i);
            bytes += record.estimated_bytes();
        }
        Ok(Self {
            source_key,
            records,
            index,
            bytes,
        })
    }

    pub fn source_key(&self) -> &KeySpec {
        &self.source_key
    }

    /// Dependency records whose source key equals the key of `active`, in
    /// load order.
    ///
    /// `active_cmp` hashes the active record's key; `pair` has the active
    /// layout as reference side and the dependency layout as candidate side.
    pub fn matches(
        &self,
        pair: &mut RecordPairComparator,
        active_cmp: &mut RecordComparator,
        active: &Record,
    ) -> Result<Vec<&Record>> {
        let hash = active_cmp.hash(active)?;
        let Some(candidates) = self.index.get(&hash) else {
            return Ok(Vec::new());
        };
        pair.set_reference(active)?;
        let mut out = Vec::new();
        for &i in candidates {
            let dependency = &self.records[i];
            if pair.equal_to_reference(dependency)? {
                out.push(dependency);
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }
}
