//! Iteration runtime: runs a validated [`IterationPlan`] across partitions.
//!
//! Architecture role:
//! - derives the per-round role schedule from the plan graph
//! - partitions static inputs by key hash before the first round
//! - runs one tokio task per partition and joins them
//! - owns the convergence barrier shared by the partitions
//!
//! Key modules:
//! - [`stage`]
//! - [`coordinator`]
//! - [`worker`]
//! - [`sorter`]

pub mod coordinator;
pub mod sorter;
pub mod stage;
#[cfg(test)]
pub(crate) mod test_support;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dfl_common::{DflError, EngineConfig, JobId, MemorySpillManager, Result};
use dfl_execution::{KeySpec, Record, RecordComparator};
use dfl_planner::{InputKind, IterationPlan, TaskRole};
use dfl_shuffle::{HashPartitioner, ShipStrategy, exchange};
use dfl_storage::RecordSource;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use coordinator::{BarrierDecision, ConvergenceBarrier, RoundAggregates, TerminationReason};
pub use sorter::ExternalSorter;
pub use stage::{RoundSchedule, ScheduledTask, build_round_schedule};
pub use worker::{JobContext, PartitionInputs, PartitionOutcome, PartitionState, PartitionWorker};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Final output of one iteration job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub job: JobId,
    /// Final solution set, partition by partition.
    pub records: Vec<Record>,
    /// Number of rounds executed.
    pub rounds: u32,
    pub termination: TerminationReason,
    /// Global aggregates of every round, oldest first.
    pub aggregates: Vec<RoundAggregates>,
}

#[derive(Debug)]
pub struct IterationRuntime {
    config: EngineConfig,
    memory: Arc<MemorySpillManager>,
}

impl IterationRuntime {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let memory = MemorySpillManager::new(config.mem_budget_bytes);
        Self::with_memory(config, memory)
    }

    /// Runtime sharing an existing engine-wide memory budget.
    pub fn with_memory(config: EngineConfig, memory: Arc<MemorySpillManager>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, memory })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `plan` to termination.
    pub async fn run(&self, plan: &IterationPlan) -> Result<IterationResult> {
        let started = Instant::now();
        let job = JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed));
        let schedule = build_round_schedule(plan)?;
        let partitioner = HashPartitioner::new(plan.parallelism)?;
        info!(
            job_id = %job,
            iteration = %plan.name,
            kind = ?plan.kind,
            parallelism = plan.parallelism,
            max_rounds = plan.max_rounds,
            "iteration job started"
        );

        let solution = distribute(
            plan,
            &partitioner,
            InputKind::Solution,
            &plan.keys.solution,
            plan.inputs.solution.as_ref(),
        )?;
        let workset = match &plan.inputs.workset {
            Some(source) => distribute(
                plan,
                &partitioner,
                InputKind::Workset,
                &plan.keys.workset,
                source.as_ref(),
            )?,
            None => vec![Vec::new(); plan.parallelism as usize],
        };
        let dependencies = distribute(
            plan,
            &partitioner,
            InputKind::Dependencies,
            &plan.keys.dependency_source,
            plan.inputs.dependencies.as_ref(),
        )?;

        let barrier = Arc::new(ConvergenceBarrier::new(
            job,
            plan.parallelism,
            plan.max_rounds,
            plan.convergence.clone(),
            plan.aggregators.clone(),
        )?);
        let ctx = JobContext {
            job,
            plan: Arc::new(plan.clone()),
            schedule: Arc::new(schedule),
            config: self.config.clone(),
            memory: Arc::clone(&self.memory),
            barrier: Arc::clone(&barrier),
        };
        let (senders, receivers) = exchange(plan.parallelism, self.config.exchange_batch_records)?;

        let mut handles = Vec::with_capacity(plan.parallelism as usize);
        for (((tx, rx), (solution, workset)), dependencies) in senders
            .into_iter()
            .zip(receivers)
            .zip(solution.into_iter().zip(workset))
            .zip(dependencies)
        {
            let worker = PartitionWorker::new(
                ctx.clone(),
                tx,
                rx,
                PartitionInputs {
                    solution,
                    workset,
                    dependencies,
                },
            )?;
            handles.push(tokio::spawn(worker.run()));
        }
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let joined = try_join_all(handles.into_iter().map(|h| async move {
            h.await
                .map_err(|e| DflError::Execution(format!("partition task failed: {e}")))?
        }))
        .await;
        let outcomes = match joined {
            Ok(outcomes) => outcomes,
            Err(e) => {
                // Peers may be parked on the exchange or the barrier.
                aborts.iter().for_each(|a| a.abort());
                return Err(e);
            }
        };

        let mut records = Vec::new();
        let mut rounds = 0;
        let mut termination = None;
        for outcome in outcomes {
            rounds = outcome.rounds;
            termination = Some(outcome.termination);
            records.extend(outcome.records);
        }
        let termination = termination.ok_or_else(|| {
            DflError::Execution(format!("job {job} finished without partitions"))
        })?;
        let aggregates = barrier.history().await;
        info!(
            job_id = %job,
            rounds,
            termination = %termination,
            records = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "iteration job finished"
        );
        Ok(IterationResult {
            job,
            records,
            rounds,
            termination,
            aggregates,
        })
    }
}

/// Read one static input and assign its records to partitions by the ship
/// strategy of its edge into the head.
fn distribute(
    plan: &IterationPlan,
    partitioner: &HashPartitioner,
    input: InputKind,
    key: &KeySpec,
    source: &dyn RecordSource,
) -> Result<Vec<Vec<Record>>> {
    let records = source.read()?;
    let parallelism = partitioner.parallelism() as usize;
    let ship = plan
        .ship_between(TaskRole::Source(input), TaskRole::Head)
        .ok_or_else(|| {
            DflError::Planning(format!(
                "iteration '{}' has no edge from its {input:?} source to the head",
                plan.name
            ))
        })?;
    match ship {
        ShipStrategy::PartitionHash => {
            let mut cmp = RecordComparator::new(key.clone())?;
            partitioner.split(&mut cmp, records)
        }
        ShipStrategy::Broadcast => Ok(vec![records; parallelism]),
        ShipStrategy::Forward => {
            let mut out = vec![Vec::new(); parallelism];
            out[0] = records;
            Ok(out)
        }
    }
}
