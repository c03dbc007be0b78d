use std::fmt;

use dfl_common::{DflError, PartitionId, Result};
use dfl_execution::{Record, RecordComparator, TypeComparator};
use serde::{Deserialize, Serialize};

/// Ordering/partitioning contract of a data edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipStrategy {
    /// Stay on the producing partition.
    Forward,
    /// Route each record to `hash(key) % parallelism`.
    PartitionHash,
    /// Copy every record to every partition.
    Broadcast,
}

impl fmt::Display for ShipStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShipStrategy::Forward => "forward",
            ShipStrategy::PartitionHash => "hash",
            ShipStrategy::Broadcast => "broadcast",
        };
        f.write_str(s)
    }
}

/// Assigns keys to partitions by key hash.
///
/// Keys are partitioned once before the run starts; every role that routes
/// by key must use the same partitioner so that a key always lands on the
/// partition that owns its solution entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPartitioner {
    parallelism: u32,
}

impl HashPartitioner {
    pub fn new(parallelism: u32) -> Result<Self> {
        if parallelism == 0 {
            return Err(DflError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(Self { parallelism })
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn partition_for_hash(&self, hash: u64) -> PartitionId {
        PartitionId((hash % self.parallelism as u64) as u32)
    }

    pub fn partition_for(
        &self,
        comparator: &mut RecordComparator,
        record: &Record,
    ) -> Result<PartitionId> {
        Ok(self.partition_for_hash(comparator.hash(record)?))
    }

    /// Split `records` into one bucket per partition, keeping input order
    /// within each bucket.
    pub fn split(
        &self,
        comparator: &mut RecordComparator,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<Vec<Vec<Record>>> {
        let mut out = vec![Vec::new(); self.parallelism as usize];
        for record in records {
            let p = self.partition_for(comparator, &record)?;
            out[p.index()].push(record);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use dfl_execution::{KeySpec, KeyType, Value};

    use super::*;

    #[test]
    fn split_is_stable_and_key_consistent() {
        let partitioner = HashPartitioner::new(3).expect("partitioner");
        let mut by_first =
            RecordComparator::new(KeySpec::single(0, KeyType::Int64)).expect("comparator");
        let mut by_second =
            RecordComparator::new(KeySpec::single(1, KeyType::Int64)).expect("comparator");

        let records: Vec<Record> = (0..30)
            .map(|i| Record::from_values([Value::Int64(i % 10), Value::Int64(i)]))
            .collect();
        let parts = partitioner
            .split(&mut by_first, records.clone())
            .expect("split");
        assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), 30);

        for (p, bucket) in parts.iter().enumerate() {
            let mut last_seq = -1;
            for r in bucket {
                let seq = r.get_i64(1).expect("seq");
                assert!(seq > last_seq);
                last_seq = seq;
                let swapped = Record::from_values([Value::Int64(0), r.field(0).cloned().expect("key")]);
                assert_eq!(
                    partitioner
                        .partition_for(&mut by_second, &swapped)
                        .expect("partition")
                        .index(),
                    p
                );
            }
        }
    }

    #[test]
    fn zero_parallelism_rejected() {
        assert!(HashPartitioner::new(0).is_err());
    }
}
