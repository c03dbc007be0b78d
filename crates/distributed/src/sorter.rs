//! Round-local external sort used by the intermediate role.
//!
//! Records are sorted by the group key with a stable sort. When the input
//! exceeds the sort buffer reservation it is cut into contiguous runs, each
//! run is sorted and spilled, and the runs are merged back with ties going
//! to the lower run index. Both paths therefore yield the same order.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Instant;

use dfl_common::metrics::global_metrics;
use dfl_common::{DflError, JobId, MemoryReservation, PartitionId, Result, Round};
use dfl_execution::{Record, RecordComparator, TypeComparator};
use dfl_shuffle::{
    RunCursor, SORT_SPILL, SpillReader, SpillWriter, sort_round_dir, sort_run_path,
};
use tracing::debug;

#[derive(Debug)]
pub struct ExternalSorter {
    job: JobId,
    partition: PartitionId,
    reservation: MemoryReservation,
    writer: SpillWriter,
    reader: SpillReader,
    job_label: String,
}

impl ExternalSorter {
    pub fn new(
        job: JobId,
        partition: PartitionId,
        reservation: MemoryReservation,
        spill_root: impl Into<PathBuf>,
    ) -> Self {
        let spill_root = spill_root.into();
        Self {
            job,
            partition,
            reservation,
            writer: SpillWriter::new(&spill_root),
            reader: SpillReader::new(&spill_root),
            job_label: job.to_string(),
        }
    }

    /// Sort `records` by `cmp`'s key, spilling when over budget.
    pub fn sort(
        &mut self,
        round: Round,
        cmp: &mut RecordComparator,
        mut records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let bytes: usize = records.iter().map(Record::estimated_bytes).sum();
        let signal = self.reservation.signal();
        if !signal.should_spill(bytes) {
            sort_stable(cmp, &mut records)?;
            return Ok(records);
        }

        let started = Instant::now();
        let runs = self.spill_runs(round, cmp, records)?;
        let merged = self.merge_runs(cmp, &runs)?;
        self.writer
            .remove_dir(&sort_round_dir(self.job.0, self.partition.0, round.0))?;
        global_metrics().record_spill(
            &self.job_label,
            self.partition.0,
            SORT_SPILL,
            bytes as u64,
            started.elapsed().as_secs_f64(),
        );
        debug!(
            partition = self.partition.0,
            round = round.0,
            runs = runs.len(),
            records = merged.len(),
            "sort spilled"
        );
        Ok(merged)
    }

    /// Sort and split into groups of equal key, preserving input order
    /// within each group.
    pub fn sort_groups(
        &mut self,
        round: Round,
        cmp: &mut RecordComparator,
        records: Vec<Record>,
    ) -> Result<Vec<Vec<Record>>> {
        let sorted = self.sort(round, cmp, records)?;
        group_sorted(cmp, sorted)
    }

    fn spill_runs(
        &self,
        round: Round,
        cmp: &mut RecordComparator,
        records: Vec<Record>,
    ) -> Result<Vec<String>> {
        let run_budget = self.reservation.signal().granted_bytes.max(1);
        let mut runs = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0usize;
        for record in records {
            current_bytes += record.estimated_bytes();
            current.push(record);
            if current_bytes >= run_budget {
                runs.push(self.write_run(round, runs.len(), cmp, std::mem::take(&mut current))?);
                current_bytes = 0;
            }
        }
        if !current.is_empty() {
            runs.push(self.write_run(round, runs.len(), cmp, current)?);
        }
        Ok(runs)
    }

    fn write_run(
        &self,
        round: Round,
        run: usize,
        cmp: &mut RecordComparator,
        mut records: Vec<Record>,
    ) -> Result<String> {
        sort_stable(cmp, &mut records)?;
        let rel = sort_run_path(self.job.0, self.partition.0, round.0, run);
        self.writer.write_run(&rel, &records)?;
        Ok(rel)
    }

    fn merge_runs(&self, cmp: &mut RecordComparator, runs: &[String]) -> Result<Vec<Record>> {
        let mut cursors: Vec<RunCursor> = runs
            .iter()
            .map(|r| self.reader.open_run(r))
            .collect::<Result<_>>()?;
        let mut heads: Vec<Option<Record>> = cursors
            .iter_mut()
            .map(RunCursor::next_record)
            .collect::<Result<_>>()?;
        let mut out = Vec::new();
        loop {
            let mut best: Option<usize> = None;
            for (i, head) in heads.iter().enumerate() {
                let Some(candidate) = head else { continue };
                best = match best {
                    None => Some(i),
                    Some(b) => {
                        let current = heads[b].as_ref().ok_or_else(|| {
                            DflError::Execution("sort merge lost its run head".to_string())
                        })?;
                        if cmp.compare(candidate, current)? == Ordering::Less {
                            Some(i)
                        } else {
                            Some(b)
                        }
                    }
                };
            }
            let Some(b) = best else { break };
            let next = cursors[b].next_record()?;
            if let Some(record) = std::mem::replace(&mut heads[b], next) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn sort_stable(cmp: &mut RecordComparator, records: &mut [Record]) -> Result<()> {
    let mut failure = None;
    records.sort_by(|a, b| match cmp.compare(a, b) {
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn group_sorted(cmp: &mut RecordComparator, sorted: Vec<Record>) -> Result<Vec<Vec<Record>>> {
    let mut groups: Vec<Vec<Record>> = Vec::new();
    for record in sorted {
        let same = match groups.last() {
            Some(group) => {
                cmp.set_reference(&group[0])?;
                cmp.equal_to_reference(&record)?
            }
            None => false,
        };
        match groups.last_mut() {
            Some(group) if same => group.push(record),
            _ => groups.push(vec![record]),
        }
    }
    Ok(groups)
}
