//! Partition worker and its round loop.
//!
//! Responsibilities:
//! - at `Init`, build the partition's solution set, check the initial
//!   workset against it and load the cached dependency index;
//! - per round, run every task role of the partition in schedule order
//!   (head join, exchange, sort/group/reduce, solution-set tail, workset
//!   tail) and accumulate the partition's aggregates;
//! - report the aggregates to the convergence barrier and follow its
//!   decision;
//! - at `Terminated`, flush the solution set as final output, drain the
//!   back channel and release the dependency cache.
//!
//! State machine:
//! `Init -> Round(n) -> BarrierCheck(n) -> {Round(n + 1) | Terminated}`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dfl_common::metrics::global_metrics;
use dfl_common::{
    DflError, EngineConfig, JobId, MemoryConsumer, MemorySpillManager, PartitionId, Result, Round,
};
use dfl_execution::{
    AggregateSet, AggregateValue, Collector, IterationContext, Record, RecordComparator,
    RecordPairComparator, SOLUTION_UPDATES_AGGREGATOR, WORKSET_SIZE_AGGREGATOR,
};
use dfl_planner::{
    InputKind, IterationKind, IterationPlan, SinkKind, TaskRole, WorksetSource,
};
use dfl_shuffle::{
    ExchangeReceiver, ExchangeSender, ShipStrategy, WorksetConsumer, WorksetProducer,
    back_channel,
};
use dfl_storage::{DependencyIndex, SolutionSetOptions, SolutionSetStore};
use tracing::{debug, info};

use crate::coordinator::{BarrierDecision, ConvergenceBarrier, TerminationReason};
use crate::sorter::ExternalSorter;
use crate::stage::RoundSchedule;

/// Everything shared by the partitions of one job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: JobId,
    pub plan: Arc<IterationPlan>,
    pub schedule: Arc<RoundSchedule>,
    pub config: EngineConfig,
    pub memory: Arc<MemorySpillManager>,
    pub barrier: Arc<ConvergenceBarrier>,
}

/// Static input records owned by one partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionInputs {
    pub solution: Vec<Record>,
    pub workset: Vec<Record>,
    pub dependencies: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Init,
    Round(Round),
    BarrierCheck(Round),
    Terminated {
        last_round: Round,
        reason: TerminationReason,
    },
}

/// Final output of one partition.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub partition: PartitionId,
    pub records: Vec<Record>,
    pub rounds: u32,
    pub termination: TerminationReason,
    /// Workset records left in the back channel at termination.
    pub discarded_workset: usize,
}

#[derive(Debug)]
struct Comparators {
    workset: RecordComparator,
    workset_to_dependency: RecordPairComparator,
    candidate: RecordComparator,
    candidate_to_solution: RecordPairComparator,
}

#[derive(Debug)]
struct PartitionResources {
    solution: SolutionSetStore,
    dependencies: DependencyIndex,
    sorter: ExternalSorter,
    initial_workset: Option<Vec<Record>>,
    cmps: Comparators,
}

#[derive(Debug, Default)]
struct RoundBuffers {
    aggregated: Vec<Record>,
    delta: Vec<Record>,
    aggregates: AggregateSet,
}

pub struct PartitionWorker {
    ctx: JobContext,
    partition: PartitionId,
    exchange_tx: ExchangeSender,
    exchange_rx: ExchangeReceiver,
    producer: WorksetProducer,
    consumer: WorksetConsumer,
    inputs: Option<PartitionInputs>,
    job_label: String,
}

impl PartitionWorker {
    pub fn new(
        ctx: JobContext,
        exchange_tx: ExchangeSender,
        exchange_rx: ExchangeReceiver,
        inputs: PartitionInputs,
    ) -> Result<Self> {
        let partition = exchange_tx.partition();
        if exchange_rx.partition() != partition {
            return Err(DflError::Execution(format!(
                "exchange endpoints belong to partitions {partition} and {}",
                exchange_rx.partition()
            )));
        }
        let (producer, consumer) = back_channel(partition);
        Ok(Self {
            job_label: ctx.job.to_string(),
            ctx,
            partition,
            exchange_tx,
            exchange_rx,
            producer,
            consumer,
            inputs: Some(inputs),
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Drive the partition from `Init` to `Terminated`.
    pub async fn run(mut self) -> Result<PartitionOutcome> {
        let mut state = PartitionState::Init;
        let mut resources: Option<PartitionResources> = None;
        let mut previous: Option<AggregateSet> = None;
        let mut reported = AggregateSet::new();
        loop {
            debug!(
                job_id = %self.ctx.job,
                partition = self.partition.0,
                state = ?state,
                "partition state"
            );
            state = match state {
                PartitionState::Init => {
                    resources = Some(self.init()?);
                    PartitionState::Round(Round::FIRST)
                }
                PartitionState::Round(round) => {
                    let res = resources.as_mut().ok_or_else(|| not_initialised(self.partition))?;
                    reported = self.run_round(round, res, previous.as_ref()).await?;
                    PartitionState::BarrierCheck(round)
                }
                PartitionState::BarrierCheck(round) => {
                    let decision = self
                        .ctx
                        .barrier
                        .report(self.partition, round, std::mem::take(&mut reported))
                        .await?;
                    match decision {
                        BarrierDecision::Continue => {
                            previous = self.ctx.barrier.round_aggregates(round).await;
                            PartitionState::Round(round.next())
                        }
                        BarrierDecision::Terminate(reason) => PartitionState::Terminated {
                            last_round: round,
                            reason,
                        },
                    }
                }
                PartitionState::Terminated { last_round, reason } => {
                    let res = resources.take().ok_or_else(|| not_initialised(self.partition))?;
                    return self.finish(res, last_round, reason);
                }
            };
        }
    }

    fn init(&mut self) -> Result<PartitionResources> {
        let started = Instant::now();
        let inputs = self
            .inputs
            .take()
            .ok_or_else(|| DflError::Execution(format!("partition {} initialised twice", self.partition)))?;
        let plan = &self.ctx.plan;
        let keys = &plan.keys;
        let config = &self.ctx.config;
        let spill_root = PathBuf::from(&config.spill_dir);

        let reservation = self
            .ctx
            .memory
            .reserve(MemoryConsumer::SolutionSet, config.solution_set_memory_bytes);
        let mut solution = SolutionSetStore::new(
            keys.solution.clone(),
            reservation,
            SolutionSetOptions {
                job: self.ctx.job,
                partition: self.partition,
                buckets: config.solution_set_buckets,
                spill_root: spill_root.clone(),
            },
        )?;
        let solution_records = inputs.solution.len();
        solution.build(inputs.solution)?;

        let mut workset = RecordComparator::new(keys.workset.clone())?;
        let mut workset_to_solution = RecordPairComparator::from_specs(&keys.workset, &keys.solution)?;
        for record in &inputs.workset {
            if !solution.contains(&mut workset_to_solution, &mut workset, record)? {
                return Err(DflError::InvalidConfig(format!(
                    "initial workset record {record} has no entry in the solution set of partition {}",
                    self.partition
                )));
            }
        }

        let dependencies = DependencyIndex::build(keys.dependency_source.clone(), inputs.dependencies)?;
        let sorter = ExternalSorter::new(
            self.ctx.job,
            self.partition,
            self.ctx
                .memory
                .reserve(MemoryConsumer::SortBuffer, config.sort_memory_bytes),
            spill_root,
        );
        let cmps = Comparators {
            workset_to_dependency: RecordPairComparator::from_specs(
                &keys.workset,
                &keys.dependency_source,
            )?,
            workset,
            candidate: RecordComparator::new(keys.candidate.clone())?,
            candidate_to_solution: RecordPairComparator::from_specs(&keys.candidate, &keys.solution)?,
        };
        let initial_workset = match plan.kind {
            IterationKind::Delta => Some(inputs.workset),
            IterationKind::Bulk => None,
        };
        global_metrics().record_role(
            &self.job_label,
            self.partition.0,
            &TaskRole::Source(InputKind::Solution).to_string(),
            solution_records as u64,
            solution.len() as u64,
            started.elapsed().as_secs_f64(),
        );
        info!(
            job_id = %self.ctx.job,
            partition = self.partition.0,
            solution = solution.len(),
            workset = initial_workset.as_ref().map_or(0, Vec::len),
            dependencies = dependencies.len(),
            spilled_buckets = solution.spilled_buckets(),
            "partition initialised"
        );
        Ok(PartitionResources {
            solution,
            dependencies,
            sorter,
            initial_workset,
            cmps,
        })
    }

    async fn run_round(
        &mut self,
        round: Round,
        res: &mut PartitionResources,
        previous: Option<&AggregateSet>,
    ) -> Result<AggregateSet> {
        let mut buf = RoundBuffers {
            aggregates: AggregateSet::from_registrations(&self.ctx.plan.aggregators),
            ..RoundBuffers::default()
        };
        let schedule = Arc::clone(&self.ctx.schedule);
        for task in &schedule.tasks {
            let started = Instant::now();
            let counts = match task.role {
                // Static inputs are consumed at Init.
                TaskRole::Source(_) => None,
                TaskRole::Head => Some(self.run_head(round, res, &mut buf, previous).await?),
                TaskRole::Intermediate => {
                    Some(self.run_intermediate(round, res, &mut buf, previous).await?)
                }
                TaskRole::SolutionSetTail => {
                    Some(self.run_solution_tail(round, res, &mut buf, previous)?)
                }
                TaskRole::WorksetTail => {
                    Some(self.run_workset_tail(round, res, &mut buf, previous).await?)
                }
                TaskRole::Sync => {
                    debug!(
                        partition = self.partition.0,
                        round = round.0,
                        aggregates = ?buf.aggregates,
                        "round complete"
                    );
                    None
                }
                TaskRole::Sink(SinkKind::Discard) => None,
                // The output sink runs once, at Terminated.
                TaskRole::Sink(SinkKind::Output) => None,
            };
            if let Some((records_in, records_out)) = counts {
                global_metrics().record_role(
                    &self.job_label,
                    self.partition.0,
                    &task.role.to_string(),
                    records_in,
                    records_out,
                    started.elapsed().as_secs_f64(),
                );
                debug!(
                    partition = self.partition.0,
                    round = round.0,
                    role = %task.role,
                    records_in,
                    records_out,
                    "role finished"
                );
            }
        }
        Ok(buf.aggregates)
    }

    async fn run_head(
        &mut self,
        round: Round,
        res: &mut PartitionResources,
        buf: &mut RoundBuffers,
        previous: Option<&AggregateSet>,
    ) -> Result<(u64, u64)> {
        let workset = if round == Round::FIRST {
            match res.initial_workset.take() {
                Some(initial) => initial,
                None => res.solution.snapshot()?,
            }
        } else {
            self.consumer.recv(round).await?
        };

        let mut out = Collector::new();
        {
            let mut ctx =
                IterationContext::new(round, self.partition, &mut buf.aggregates, previous);
            for active in &workset {
                let matches = res.dependencies.matches(
                    &mut res.cmps.workset_to_dependency,
                    &mut res.cmps.workset,
                    active,
                )?;
                for dependency in matches {
                    self.ctx
                        .plan
                        .udfs
                        .dependency_match
                        .join(active, dependency, &mut ctx, &mut out)?;
                }
            }
        }

        let candidates = out.into_records();
        let ship = self.ship(TaskRole::Head, TaskRole::Intermediate)?;
        let shipped = self
            .exchange_tx
            .route(round, ship, &mut res.cmps.candidate, candidates)?;
        self.exchange_tx.finish_round(round)?;
        global_metrics().record_exchange(&self.job_label, self.partition.0, shipped);
        Ok((workset.len() as u64, shipped))
    }

    async fn run_intermediate(
        &mut self,
        round: Round,
        res: &mut PartitionResources,
        buf: &mut RoundBuffers,
        previous: Option<&AggregateSet>,
    ) -> Result<(u64, u64)> {
        let received = self.exchange_rx.receive_round(round).await?;
        let records_in = received.len() as u64;
        let groups = res
            .sorter
            .sort_groups(round, &mut res.cmps.candidate, received)?;

        let mut out = Collector::new();
        let mut ctx = IterationContext::new(round, self.partition, &mut buf.aggregates, previous);
        for group in &groups {
            self.ctx
                .plan
                .udfs
                .update_reduce
                .reduce(group, &mut ctx, &mut out)?;
        }
        buf.aggregated = out.into_records();
        Ok((records_in, buf.aggregated.len() as u64))
    }

    fn run_solution_tail(
        &mut self,
        round: Round,
        res: &mut PartitionResources,
        buf: &mut RoundBuffers,
        previous: Option<&AggregateSet>,
    ) -> Result<(u64, u64)> {
        let mut delta = Vec::new();
        let mut ctx = IterationContext::new(round, self.partition, &mut buf.aggregates, previous);
        for candidate in &buf.aggregated {
            let slot = res
                .solution
                .probe(
                    &mut res.cmps.candidate_to_solution,
                    &mut res.cmps.candidate,
                    candidate,
                )?
                .ok_or_else(|| {
                    DflError::InvalidConfig(format!(
                        "aggregated record {candidate} has no entry in the solution set of partition {}",
                        self.partition
                    ))
                })?;
            let replacement = {
                let current = res.solution.get(&slot)?;
                self.ctx
                    .plan
                    .udfs
                    .solution_update
                    .update(candidate, current, &mut ctx)?
            };
            if let Some(record) = replacement {
                res.solution.update(slot, record)?;
                delta.push(candidate.clone());
            }
        }
        let updates = delta.len() as u64;
        ctx.aggregate(
            SOLUTION_UPDATES_AGGREGATOR,
            AggregateValue::Long(updates as i64),
        )?;
        global_metrics().record_solution_updates(&self.job_label, self.partition.0, updates);
        let records_in = buf.aggregated.len() as u64;
        buf.delta = delta;
        Ok((records_in, updates))
    }

    async fn run_workset_tail(
        &mut self,
        round: Round,
        res: &mut PartitionResources,
        buf: &mut RoundBuffers,
        previous: Option<&AggregateSet>,
    ) -> Result<(u64, u64)> {
        let input = match self.ctx.plan.workset_source {
            WorksetSource::Aggregated => std::mem::take(&mut buf.aggregated),
            WorksetSource::Changed => std::mem::take(&mut buf.delta),
            WorksetSource::SolutionSet => res.solution.snapshot()?,
        };
        let records_in = input.len() as u64;

        let mut next = Vec::with_capacity(input.len());
        {
            let mut ctx =
                IterationContext::new(round, self.partition, &mut buf.aggregates, previous);
            for record in input {
                if let Some(mapped) = self.ctx.plan.udfs.workset_map.map(record, &mut ctx)? {
                    next.push(mapped);
                }
            }
        }

        let size = next.len() as u64;
        buf.aggregates
            .add_long(WORKSET_SIZE_AGGREGATOR, size as i64)?;
        global_metrics().set_workset_records(&self.job_label, self.partition.0, size);
        self.producer.send(round.next(), next).await?;
        Ok((records_in, size))
    }

    fn finish(
        mut self,
        res: PartitionResources,
        last_round: Round,
        reason: TerminationReason,
    ) -> Result<PartitionOutcome> {
        if self
            .ctx
            .schedule
            .position(TaskRole::Sink(SinkKind::Output))
            .is_none()
        {
            return Err(DflError::Planning(format!(
                "iteration '{}' has no output sink",
                self.ctx.plan.name
            )));
        }
        let PartitionResources {
            solution,
            dependencies,
            sorter,
            ..
        } = res;
        let records = solution.into_records()?;
        let discarded_workset = self.consumer.drain();
        drop(dependencies);
        drop(sorter);
        info!(
            job_id = %self.ctx.job,
            partition = self.partition.0,
            rounds = last_round.0,
            termination = %reason,
            records = records.len(),
            discarded_workset,
            "partition terminated"
        );
        Ok(PartitionOutcome {
            partition: self.partition,
            records,
            rounds: last_round.0,
            termination: reason,
            discarded_workset,
        })
    }

    fn ship(&self, from: TaskRole, to: TaskRole) -> Result<ShipStrategy> {
        self.ctx.plan.ship_between(from, to).ok_or_else(|| {
            DflError::Planning(format!(
                "iteration '{}' has no data edge {from} -> {to}",
                self.ctx.plan.name
            ))
        })
    }
}

fn not_initialised(partition: PartitionId) -> DflError {
    DflError::Execution(format!("partition {partition} used before Init"))
}
