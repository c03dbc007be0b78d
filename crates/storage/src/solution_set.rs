//! Hybrid hash table holding one partition's solution set.
//!
//! Entries are spread over a fixed number of buckets chosen by the upper
//! bits of the key hash. A bucket is either resident (records plus a hash
//! index) or spilled to a JSON-lines file. Whenever resident bytes exceed
//! the memory reservation's spill threshold, the largest resident bucket
//! other than the pinned one is written out. Probing a spilled bucket loads
//! it back and pins it, so the slot returned by the probe stays valid for
//! the following update.
//!
//! Slots carry the bucket epoch; spilling a bucket bumps its epoch, which
//! turns every outstanding slot into it stale.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use dfl_common::metrics::global_metrics;
use dfl_common::{DflError, JobId, MemoryReservation, PartitionId, Result};
use dfl_execution::{
    Key, KeySpec, Record, RecordComparator, RecordPairComparator, TypeComparator,
    TypePairComparator,
};
use dfl_shuffle::{
    SOLUTION_SET_SPILL, SpillReader, SpillWriter, solution_bucket_path, spill_dir,
};
use tracing::{debug, warn};

/// Where and how a solution set partition spills.
#[derive(Debug, Clone)]
pub struct SolutionSetOptions {
    pub job: JobId,
    pub partition: PartitionId,
    pub buckets: usize,
    pub spill_root: PathBuf,
}

/// Handle to one entry, returned by [`SolutionSetStore::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionSlot {
    bucket: usize,
    index: usize,
    epoch: u64,
}

#[derive(Debug, Default)]
struct ResidentBucket {
    records: Vec<Record>,
    index: HashMap<u64, Vec<usize>>,
    bytes: usize,
}

impl ResidentBucket {
    fn push(&mut self, hash: u64, record: Record) {
        self.bytes += entry_bytes(&record);
        self.index.entry(hash).or_default().push(self.records.len());
        self.records.push(record);
    }
}

#[derive(Debug)]
enum BucketState {
    Resident(ResidentBucket),
    Spilled { file: String, records: u64 },
}

#[derive(Debug)]
struct Bucket {
    state: BucketState,
    epoch: u64,
}

#[derive(Debug)]
pub struct SolutionSetStore {
    options: SolutionSetOptions,
    build_cmp: RecordComparator,
    buckets: Vec<Bucket>,
    len: usize,
    resident_bytes: usize,
    generation: u64,
    pinned: Option<usize>,
    reservation: MemoryReservation,
    writer: SpillWriter,
    reader: SpillReader,
    job_label: String,
}

impl SolutionSetStore {
    /// Empty store keyed by `key`, holding `reservation` until dropped.
    pub fn new(
        key: KeySpec,
        reservation: MemoryReservation,
        options: SolutionSetOptions,
    ) -> Result<Self> {
        if options.buckets == 0 {
            return Err(DflError::InvalidConfig(
                "solution set needs at least one bucket".to_string(),
            ));
        }
        let buckets = (0..options.buckets)
            .map(|_| Bucket {
                state: BucketState::Resident(ResidentBucket::default()),
                epoch: 0,
            })
            .collect();
        Ok(Self {
            build_cmp: RecordComparator::new(key)?,
            buckets,
            len: 0,
            resident_bytes: 0,
            generation: 0,
            pinned: None,
            reservation,
            writer: SpillWriter::new(&options.spill_root),
            reader: SpillReader::new(&options.spill_root),
            job_label: options.job.to_string(),
            options,
        })
    }

    /// Key the solution records are stored under.
    pub fn key(&self) -> &KeySpec {
        self.build_cmp.key()
    }

    /// Insert the initial solution records; a repeated key is rejected.
    pub fn build(&mut self, records: impl IntoIterator<Item = Record>) -> Result<()> {
        for record in records {
            self.insert(record)?;
        }
        debug!(
            partition = self.options.partition.0,
            records = self.len,
            spilled_buckets = self.spilled_buckets(),
            "solution set built"
        );
        Ok(())
    }

    fn insert(&mut self, record: Record) -> Result<()> {
        let hash = self.build_cmp.hash(&record)?;
        let b = self.bucket_for(hash);
        self.ensure_resident(b)?;
        self.build_cmp.set_reference(&record)?;

        let BucketState::Resident(res) = &mut self.buckets[b].state else {
            return Err(not_resident(b));
        };
        if let Some(existing) = res.index.get(&hash) {
            for &i in existing {
                if self.build_cmp.equal_to_reference(&res.records[i])? {
                    let key = self.build_cmp.extract_key(&record)?;
                    return Err(DflError::InvalidConfig(format!(
                        "duplicate key {} in initial solution set of partition {}",
                        describe_key(&key),
                        self.options.partition
                    )));
                }
            }
        }
        let before = res.bytes;
        res.push(hash, record);
        self.resident_bytes += res.bytes - before;
        self.len += 1;
        self.relieve_pressure()
    }

    /// Look up the entry whose key equals the key of `probe`.
    ///
    /// `probe_cmp` hashes the probe-side key; `pair` has the probe layout as
    /// its reference side and the solution layout as its candidate side.
    pub fn probe(
        &mut self,
        pair: &mut RecordPairComparator,
        probe_cmp: &mut RecordComparator,
        probe: &Record,
    ) -> Result<Option<SolutionSlot>> {
        let hash = probe_cmp.hash(probe)?;
        let b = self.bucket_for(hash);
        self.ensure_resident(b)?;
        self.pinned = Some(b);
        pair.set_reference(probe)?;

        let bucket = &self.buckets[b];
        let BucketState::Resident(res) = &bucket.state else {
            return Err(not_resident(b));
        };
        if let Some(candidates) = res.index.get(&hash) {
            for &i in candidates {
                if pair.equal_to_reference(&res.records[i])? {
                    return Ok(Some(SolutionSlot {
                        bucket: b,
                        index: i,
                        epoch: bucket.epoch,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Current record behind `slot`.
    pub fn get(&self, slot: &SolutionSlot) -> Result<&Record> {
        let res = self.resident_for(slot)?;
        Ok(&res.records[slot.index])
    }

    /// Replace the record behind `slot`. The replacement must keep the key.
    pub fn update(&mut self, slot: SolutionSlot, record: Record) -> Result<()> {
        self.resident_for(&slot)?;
        let BucketState::Resident(res) = &mut self.buckets[slot.bucket].state else {
            return Err(not_resident(slot.bucket));
        };
        let old = &res.records[slot.index];
        self.build_cmp.set_reference(old)?;
        if !self.build_cmp.equal_to_reference(&record)? {
            return Err(DflError::Execution(format!(
                "solution update would change the key of {old}"
            )));
        }
        let old_bytes = entry_bytes(old);
        let new_bytes = entry_bytes(&record);
        res.records[slot.index] = record;
        res.bytes = res.bytes + new_bytes - old_bytes;
        self.resident_bytes = self.resident_bytes + new_bytes - old_bytes;
        self.relieve_pressure()
    }

    /// Probe for `probe` and replace the entry with `replacement`.
    ///
    /// A key not already present is a configuration error: the solution set
    /// never grows during an iteration.
    pub fn update_by_key(
        &mut self,
        pair: &mut RecordPairComparator,
        probe_cmp: &mut RecordComparator,
        probe: &Record,
        replacement: Record,
    ) -> Result<()> {
        match self.probe(pair, probe_cmp, probe)? {
            Some(slot) => self.update(slot, replacement),
            None => Err(DflError::InvalidConfig(format!(
                "key of {probe} is not present in the solution set of partition {}",
                self.options.partition
            ))),
        }
    }

    pub fn contains(
        &mut self,
        pair: &mut RecordPairComparator,
        probe_cmp: &mut RecordComparator,
        probe: &Record,
    ) -> Result<bool> {
        Ok(self.probe(pair, probe_cmp, probe)?.is_some())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn spilled_buckets(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| matches!(b.state, BucketState::Spilled { .. }))
            .count()
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Copy of every entry without changing residency. Used as the workset
    /// of bulk iterations.
    pub fn snapshot(&self) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(self.len);
        for bucket in &self.buckets {
            match &bucket.state {
                BucketState::Resident(res) => out.extend(res.records.iter().cloned()),
                BucketState::Spilled { file, .. } => out.extend(self.reader.read_run(file)?),
            }
        }
        Ok(out)
    }

    /// Every entry in bucket order, consuming the store.
    pub fn into_records(mut self) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.buckets.len() {
            let state = std::mem::replace(
                &mut self.buckets[i].state,
                BucketState::Resident(ResidentBucket::default()),
            );
            match state {
                BucketState::Resident(res) => out.extend(res.records),
                BucketState::Spilled { file, .. } => {
                    out.extend(self.reader.read_run(&file)?);
                    self.writer.remove_run(&file)?;
                }
            }
        }
        Ok(out)
    }

    fn bucket_for(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) % self.buckets.len()
    }

    fn resident_for(&self, slot: &SolutionSlot) -> Result<&ResidentBucket> {
        let stale = || {
            DflError::Execution(format!(
                "stale solution slot (bucket {}, epoch {})",
                slot.bucket, slot.epoch
            ))
        };
        let bucket = self.buckets.get(slot.bucket).ok_or_else(stale)?;
        if bucket.epoch != slot.epoch {
            return Err(stale());
        }
        match &bucket.state {
            BucketState::Resident(res) if slot.index < res.records.len() => Ok(res),
            _ => Err(stale()),
        }
    }

    fn ensure_resident(&mut self, b: usize) -> Result<()> {
        let (file, expected) = match &self.buckets[b].state {
            BucketState::Resident(_) => return Ok(()),
            BucketState::Spilled { file, records } => (file.clone(), *records),
        };
        let records = self.reader.read_run(&file)?;
        if records.len() as u64 != expected {
            return Err(DflError::Execution(format!(
                "solution bucket file {file} holds {} records, expected {expected}",
                records.len()
            )));
        }
        let mut res = ResidentBucket::default();
        for record in records {
            let hash = self.build_cmp.hash(&record)?;
            res.push(hash, record);
        }
        self.writer.remove_run(&file)?;
        debug!(
            partition = self.options.partition.0,
            bucket = b,
            records = res.records.len(),
            bytes = res.bytes,
            "solution bucket reloaded"
        );
        self.resident_bytes += res.bytes;
        self.buckets[b].state = BucketState::Resident(res);
        self.pinned = Some(b);
        self.relieve_pressure()
    }

    fn relieve_pressure(&mut self) -> Result<()> {
        let signal = self.reservation.signal();
        while signal.should_spill(self.resident_bytes) {
            let victim = self
                .buckets
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != self.pinned)
                .filter_map(|(i, b)| match &b.state {
                    BucketState::Resident(res) if !res.records.is_empty() => Some((i, res.bytes)),
                    _ => None,
                })
                .max_by_key(|(i, bytes)| (*bytes, std::cmp::Reverse(*i)));
            let Some((victim, _)) = victim else {
                break;
            };
            self.spill_bucket(victim)?;
        }
        Ok(())
    }

    fn spill_bucket(&mut self, b: usize) -> Result<()> {
        let started = Instant::now();
        self.generation += 1;
        let rel = solution_bucket_path(
            self.options.job.0,
            self.options.partition.0,
            b,
            self.generation,
        );
        let BucketState::Resident(res) = &self.buckets[b].state else {
            return Ok(());
        };
        let meta = self.writer.write_run(&rel, &res.records)?;
        let freed = res.bytes;
        self.buckets[b].state = BucketState::Spilled {
            file: rel,
            records: meta.records,
        };
        self.buckets[b].epoch += 1;
        self.resident_bytes -= freed;
        global_metrics().record_spill(
            &self.job_label,
            self.options.partition.0,
            SOLUTION_SET_SPILL,
            meta.bytes,
            started.elapsed().as_secs_f64(),
        );
        debug!(
            partition = self.options.partition.0,
            bucket = b,
            records = meta.records,
            bytes = meta.bytes,
            "solution bucket spilled"
        );
        Ok(())
    }
}

impl Drop for SolutionSetStore {
    fn drop(&mut self) {
        if self.generation == 0 {
            return;
        }
        let dir = spill_dir(
            self.options.job.0,
            self.options.partition.0,
            SOLUTION_SET_SPILL,
        );
        if let Err(e) = self.writer.remove_dir(&dir) {
            warn!(partition = self.options.partition.0, error = %e, "solution set spill cleanup failed");
        }
    }
}

fn entry_bytes(record: &Record) -> usize {
    record.estimated_bytes() + std::mem::size_of::<u64>() + std::mem::size_of::<usize>()
}

fn not_resident(bucket: usize) -> DflError {
    DflError::Execution(format!("solution bucket {bucket} is not resident"))
}

fn describe_key(key: &[Key]) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
