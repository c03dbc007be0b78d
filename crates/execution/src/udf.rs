//! User function contracts invoked by the iteration roles.
//!
//! One implementation of each trait is shared by every partition, so all of
//! them are `Send + Sync` and take `&self`. Per-round state goes through the
//! [`IterationContext`] instead of interior mutability.

use dfl_common::{PartitionId, Result, Round};

use crate::aggregators::{AggregateSet, AggregateValue};
use crate::record::Record;

/// Round-scoped view handed to user functions.
#[derive(Debug)]
pub struct IterationContext<'a> {
    round: Round,
    partition: PartitionId,
    aggregates: &'a mut AggregateSet,
    previous: Option<&'a AggregateSet>,
}

impl<'a> IterationContext<'a> {
    /// Context for `partition` in `round`.
    ///
    /// `previous` carries the global aggregates of the round before, if any.
    pub fn new(
        round: Round,
        partition: PartitionId,
        aggregates: &'a mut AggregateSet,
        previous: Option<&'a AggregateSet>,
    ) -> Self {
        Self {
            round,
            partition,
            aggregates,
            previous,
        }
    }

    /// Current round.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Partition the function runs on.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Contribute to a registered aggregator for this round.
    pub fn aggregate(&mut self, name: &str, value: AggregateValue) -> Result<()> {
        self.aggregates.aggregate(name, value)
    }

    /// Global value of an aggregator after the previous round.
    pub fn previous_aggregate(&self, name: &str) -> Option<AggregateValue> {
        self.previous.and_then(|p| p.get(name))
    }
}

/// Output buffer for user functions.
#[derive(Debug, Default)]
pub struct Collector {
    records: Vec<Record>,
}

impl Collector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one record.
    pub fn collect(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Records emitted so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the emitted records, leaving the collector empty.
    pub fn take(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records)
    }

    /// Consume into the emitted records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Head role: called once per (active record, matching dependency) pair.
pub trait DependencyMatch: Send + Sync {
    /// Name used in plan explain output.
    fn name(&self) -> &str;
    /// Emit candidate records for the dependency's target.
    fn join(
        &self,
        active: &Record,
        dependency: &Record,
        ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()>;
}

/// Intermediate role: called once per group of candidates sharing a key.
pub trait UpdateReduce: Send + Sync {
    /// Name used in plan explain output.
    fn name(&self) -> &str;
    /// Reduce a non-empty group into aggregated records.
    fn reduce(
        &self,
        group: &[Record],
        ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()>;
}

/// Solution-set tail: decides whether an aggregated record changes the
/// current solution entry.
pub trait SolutionSetUpdate: Send + Sync {
    /// Name used in plan explain output.
    fn name(&self) -> &str;
    /// Return the replacement solution record, or `None` when unchanged.
    fn update(
        &self,
        candidate: &Record,
        current: &Record,
        ctx: &mut IterationContext<'_>,
    ) -> Result<Option<Record>>;
}

/// Workset tail: transforms or filters records entering the next workset.
pub trait WorksetMap: Send + Sync {
    /// Name used in plan explain output.
    fn name(&self) -> &str;
    /// Map one record; `None` drops it from the next workset.
    fn map(&self, record: Record, ctx: &mut IterationContext<'_>) -> Result<Option<Record>>;
}

/// Pass-through workset map.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWorksetMap;

impl WorksetMap for IdentityWorksetMap {
    fn name(&self) -> &str {
        "identity"
    }

    fn map(&self, record: Record, _ctx: &mut IterationContext<'_>) -> Result<Option<Record>> {
        Ok(Some(record))
    }
}
