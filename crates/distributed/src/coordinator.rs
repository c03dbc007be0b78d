//! Convergence barrier shared by every partition of one iteration job.
//!
//! Responsibilities:
//! - collect one aggregate report per partition per round;
//! - combine reports per aggregator name (associative, so report order does
//!   not matter);
//! - decide continue/terminate once the last partition has reported and
//!   broadcast the decision to every waiting partition;
//! - keep the per-round global aggregates as history.
//!
//! Decision order for round `n`:
//! 1. registered criterion holds → `Terminate(Converged)`
//! 2. global `workset.size` is zero → `Terminate(WorksetEmpty)`
//! 3. `n >= max_rounds` → `Terminate(MaxRounds)`
//! 4. otherwise `Continue`

use std::fmt;
use std::time::Instant;

use dfl_common::metrics::global_metrics;
use dfl_common::{DflError, JobId, PartitionId, Result, Round};
use dfl_execution::{
    AggregateSet, AggregatorRegistration, ConvergenceRegistration, WORKSET_SIZE_AGGREGATOR,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The registered convergence criterion held.
    Converged,
    /// No partition produced a workset record.
    WorksetEmpty,
    /// The round cap was reached.
    MaxRounds,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Converged => f.write_str("converged"),
            TerminationReason::WorksetEmpty => f.write_str("workset_empty"),
            TerminationReason::MaxRounds => f.write_str("max_rounds"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierDecision {
    Continue,
    Terminate(TerminationReason),
}

/// Global aggregates of one finished round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundAggregates {
    pub round: Round,
    pub values: AggregateSet,
    pub decision: BarrierDecision,
}

#[derive(Debug)]
struct BarrierState {
    round: Round,
    reported: Vec<bool>,
    pending: usize,
    combined: AggregateSet,
    history: Vec<RoundAggregates>,
    terminated: bool,
}

#[derive(Debug)]
pub struct ConvergenceBarrier {
    job: JobId,
    job_label: String,
    parallelism: u32,
    max_rounds: u32,
    convergence: ConvergenceRegistration,
    aggregators: Vec<AggregatorRegistration>,
    state: Mutex<BarrierState>,
    decisions: watch::Sender<Option<(Round, BarrierDecision)>>,
}

impl ConvergenceBarrier {
    pub fn new(
        job: JobId,
        parallelism: u32,
        max_rounds: u32,
        convergence: ConvergenceRegistration,
        aggregators: Vec<AggregatorRegistration>,
    ) -> Result<Self> {
        if parallelism == 0 {
            return Err(DflError::InvalidConfig(
                "barrier parallelism must be at least 1".to_string(),
            ));
        }
        if max_rounds == 0 {
            return Err(DflError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        let (decisions, _) = watch::channel(None);
        let combined = AggregateSet::from_registrations(&aggregators);
        Ok(Self {
            job,
            job_label: job.to_string(),
            parallelism,
            max_rounds,
            convergence,
            aggregators,
            state: Mutex::new(BarrierState {
                round: Round::FIRST,
                reported: vec![false; parallelism as usize],
                pending: parallelism as usize,
                combined,
                history: Vec::new(),
                terminated: false,
            }),
            decisions,
        })
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    /// Report `partition`'s aggregates for `round` and wait for the decision.
    ///
    /// Returns once every partition has reported `round`.
    pub async fn report(
        &self,
        partition: PartitionId,
        round: Round,
        values: AggregateSet,
    ) -> Result<BarrierDecision> {
        let started = Instant::now();
        let mut decisions = self.decisions.subscribe();
        {
            let mut state = self.state.lock().await;
            if state.terminated {
                return Err(DflError::Execution(format!(
                    "partition {partition} reported round {round} after job {} terminated",
                    self.job
                )));
            }
            if round != state.round {
                return Err(DflError::Execution(format!(
                    "partition {partition} reported round {round} while the barrier is at round {}",
                    state.round
                )));
            }
            let slot = state.reported.get_mut(partition.index()).ok_or_else(|| {
                DflError::Execution(format!(
                    "partition {partition} out of range for barrier of {} partitions",
                    self.parallelism
                ))
            })?;
            if *slot {
                return Err(DflError::Execution(format!(
                    "partition {partition} reported round {round} twice"
                )));
            }
            *slot = true;
            state.combined.merge(&values)?;
            state.pending -= 1;
            debug!(
                job_id = %self.job,
                partition = partition.0,
                round = round.0,
                pending = state.pending,
                "barrier report accepted"
            );

            if state.pending == 0 {
                let decision = self.decide(round, &state.combined);
                let globals = std::mem::replace(
                    &mut state.combined,
                    AggregateSet::from_registrations(&self.aggregators),
                );
                info!(
                    job_id = %self.job,
                    round = round.0,
                    decision = ?decision,
                    aggregates = ?globals,
                    "round closed"
                );
                state.history.push(RoundAggregates {
                    round,
                    values: globals,
                    decision,
                });
                state.reported.iter_mut().for_each(|r| *r = false);
                state.pending = self.parallelism as usize;
                state.round = round.next();
                state.terminated = matches!(decision, BarrierDecision::Terminate(_));
                global_metrics().inc_rounds(&self.job_label);
                self.decisions.send_replace(Some((round, decision)));
                global_metrics()
                    .record_barrier_wait(&self.job_label, started.elapsed().as_secs_f64());
                return Ok(decision);
            }
        }

        loop {
            if let Some((decided, decision)) = *decisions.borrow_and_update() {
                if decided == round {
                    global_metrics()
                        .record_barrier_wait(&self.job_label, started.elapsed().as_secs_f64());
                    return Ok(decision);
                }
            }
            decisions.changed().await.map_err(|_| {
                DflError::Execution(format!("barrier of job {} closed", self.job))
            })?;
        }
    }

    fn decide(&self, round: Round, globals: &AggregateSet) -> BarrierDecision {
        if self.convergence.evaluate(round, globals) {
            return BarrierDecision::Terminate(TerminationReason::Converged);
        }
        let workset_empty = globals
            .get(WORKSET_SIZE_AGGREGATOR)
            .is_some_and(|v| v.as_f64() == 0.0);
        if workset_empty {
            return BarrierDecision::Terminate(TerminationReason::WorksetEmpty);
        }
        if round.0 >= self.max_rounds {
            return BarrierDecision::Terminate(TerminationReason::MaxRounds);
        }
        BarrierDecision::Continue
    }

    /// Global aggregates of a finished round.
    pub async fn round_aggregates(&self, round: Round) -> Option<AggregateSet> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .find(|h| h.round == round)
            .map(|h| h.values.clone())
    }

    /// Every finished round, oldest first.
    pub async fn history(&self) -> Vec<RoundAggregates> {
        self.state.lock().await.history.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dfl_execution::{
        AggregatorKind, BelowThreshold, ConvergenceRegistration, SOLUTION_UPDATES_AGGREGATOR,
    };

    use super::*;

    fn builtins() -> Vec<AggregatorRegistration> {
        vec![
            AggregatorRegistration::new(WORKSET_SIZE_AGGREGATOR, AggregatorKind::LongSum),
            AggregatorRegistration::new(SOLUTION_UPDATES_AGGREGATOR, AggregatorKind::LongSum),
            AggregatorRegistration::new("delta", AggregatorKind::DoubleSum),
        ]
    }

    fn report_values(workset: i64, delta: f64) -> AggregateSet {
        let mut set = AggregateSet::from_registrations(&builtins());
        set.add_long(WORKSET_SIZE_AGGREGATOR, workset).expect("workset");
        set.add_double("delta", delta).expect("delta");
        set
    }

    fn barrier(parallelism: u32, max_rounds: u32, threshold: f64) -> Arc<ConvergenceBarrier> {
        Arc::new(
            ConvergenceBarrier::new(
                JobId(1),
                parallelism,
                max_rounds,
                ConvergenceRegistration::new(
                    "delta",
                    AggregatorKind::DoubleSum,
                    Arc::new(BelowThreshold { threshold }),
                ),
                builtins(),
            )
            .expect("barrier"),
        )
    }

    #[tokio::test]
    async fn every_partition_gets_the_same_decision() {
        let b = barrier(3, 10, 0.5);
        let mut handles = Vec::new();
        for p in 0..3u32 {
            let b = Arc::clone(&b);
            handles.push(tokio::spawn(async move {
                b.report(PartitionId(p), Round::FIRST, report_values(2, 1.0))
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.expect("join").expect("report"), BarrierDecision::Continue);
        }
        let history = b.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].values.get(WORKSET_SIZE_AGGREGATOR),
            Some(dfl_execution::AggregateValue::Long(6))
        );
        assert_eq!(
            history[0].values.get("delta"),
            Some(dfl_execution::AggregateValue::Double(3.0))
        );
    }

    #[tokio::test]
    async fn criterion_wins_over_empty_workset_and_round_cap() {
        let b = barrier(1, 1, 0.5);
        let d = b
            .report(PartitionId(0), Round::FIRST, report_values(0, 0.1))
            .await
            .expect("report");
        assert_eq!(d, BarrierDecision::Terminate(TerminationReason::Converged));
    }

    #[tokio::test]
    async fn empty_workset_wins_over_round_cap() {
        let b = barrier(1, 1, 0.5);
        let d = b
            .report(PartitionId(0), Round::FIRST, report_values(0, 2.0))
            .await
            .expect("report");
        assert_eq!(d, BarrierDecision::Terminate(TerminationReason::WorksetEmpty));
    }

    #[tokio::test]
    async fn round_cap_terminates() {
        let b = barrier(1, 2, 0.5);
        let first = b
            .report(PartitionId(0), Round::FIRST, report_values(1, 2.0))
            .await
            .expect("round 1");
        assert_eq!(first, BarrierDecision::Continue);
        let second = b
            .report(PartitionId(0), Round(2), report_values(1, 2.0))
            .await
            .expect("round 2");
        assert_eq!(second, BarrierDecision::Terminate(TerminationReason::MaxRounds));
        assert!(b.round_aggregates(Round(2)).await.is_some());
        assert!(
            b.report(PartitionId(0), Round(3), report_values(1, 2.0))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn protocol_violations_are_rejected() {
        let b = barrier(2, 5, 0.5);
        let err = b
            .report(PartitionId(0), Round(2), report_values(1, 1.0))
            .await
            .expect_err("wrong round");
        assert!(matches!(err, DflError::Execution(_)));

        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.report(PartitionId(0), Round::FIRST, report_values(1, 1.0))
                    .await
            })
        };
        tokio::task::yield_now().await;
        // Partition 0 has already reported or is about to; a second report
        // from it must fail once the first is in.
        while b.state.lock().await.pending == 2 {
            tokio::task::yield_now().await;
        }
        let err = b
            .report(PartitionId(0), Round::FIRST, report_values(1, 1.0))
            .await
            .expect_err("duplicate");
        assert!(err.to_string().contains("twice"));
        assert!(
            b.report(PartitionId(7), Round::FIRST, report_values(1, 1.0))
                .await
                .is_err()
        );

        b.report(PartitionId(1), Round::FIRST, report_values(1, 1.0))
            .await
            .expect("last report");
        assert_eq!(
            waiter.await.expect("join").expect("waiter"),
            BarrierDecision::Continue
        );
    }
}
