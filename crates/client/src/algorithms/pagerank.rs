//! Delta PageRank.
//!
//! Record layouts:
//! - solution: `(vertex: Int64, rank: Float64)`
//! - workset / candidate: `(vertex: Int64, delta: Float64)`
//! - edge: `(source: Int64, target: Int64, out_degree: Int64)`
//!
//! Ranks are linear in the previous round's ranks, so instead of
//! recomputing every rank the iteration only propagates rank changes:
//! `delta'(v) = d * sum(delta(u) / out_degree(u))` over edges `u -> v`, and
//! `rank'(v) = rank(v) + delta'(v)`. [`initial_state`] seeds the solution
//! with one full power-iteration step and the workset with the change that
//! step made, after which each round matches one more full step.

use std::collections::BTreeMap;
use std::sync::Arc;

use dfl_common::{DflError, Result};
use dfl_execution::{
    AggregateValue, AggregatorKind, BelowThreshold, Collector, ConvergenceRegistration,
    DependencyMatch, IterationContext, KeySpec, KeyType, Record, SolutionSetUpdate, UpdateReduce,
    Value,
};
use dfl_planner::{DeltaIterationBuilder, IterationPlan, WorksetSource};
use dfl_storage::RecordSource;

pub const VERTEX: usize = 0;
pub const RANK: usize = 1;
pub const DELTA: usize = 1;
pub const EDGE_SOURCE: usize = 0;
pub const EDGE_TARGET: usize = 1;
pub const EDGE_OUT_DEGREE: usize = 2;

/// Sum of absolute rank changes applied in a round.
pub const RANK_DELTA_AGGREGATOR: &str = "pagerank.delta";

pub const DEFAULT_DAMPING: f64 = 0.85;

/// Job parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRank {
    pub parallelism: u32,
    pub max_rounds: u32,
    pub damping: f64,
    /// A delta changes the solution only when its magnitude exceeds this.
    pub change_threshold: f64,
    /// Stop once the summed absolute change of a round drops below this;
    /// `None` runs until no rank changes.
    pub convergence_epsilon: Option<f64>,
}

impl Default for PageRank {
    fn default() -> Self {
        Self {
            parallelism: 1,
            max_rounds: 50,
            damping: DEFAULT_DAMPING,
            change_threshold: 0.0,
            convergence_epsilon: None,
        }
    }
}

impl PageRank {
    pub fn plan(
        &self,
        ranks: Arc<dyn RecordSource>,
        deltas: Arc<dyn RecordSource>,
        edges: Arc<dyn RecordSource>,
    ) -> Result<IterationPlan> {
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(DflError::InvalidConfig(format!(
                "damping factor must be within [0, 1], got {}",
                self.damping
            )));
        }
        let key = KeySpec::single(VERTEX, KeyType::Int64);
        let convergence = match self.convergence_epsilon {
            Some(epsilon) => ConvergenceRegistration::new(
                RANK_DELTA_AGGREGATOR,
                AggregatorKind::DoubleSum,
                Arc::new(BelowThreshold { threshold: epsilon }),
            ),
            None => ConvergenceRegistration::workset_empty(),
        };
        DeltaIterationBuilder::new("delta-pagerank")
            .parallelism(self.parallelism)
            .max_rounds(self.max_rounds)
            .solution_set(ranks, key.clone())
            .initial_workset(deltas, key.clone())
            .dependencies(edges, KeySpec::single(EDGE_SOURCE, KeyType::Int64))
            .candidate_key(key)
            .dependency_match(Arc::new(SpreadDelta {
                damping: self.damping,
            }))
            .update_reduce(Arc::new(SumDeltas))
            .solution_update(Arc::new(RankComparison {
                threshold: self.change_threshold,
            }))
            .workset_source(WorksetSource::Changed)
            .aggregator(RANK_DELTA_AGGREGATOR, AggregatorKind::DoubleSum)
            .convergence(convergence)
            .build()
    }
}

/// One power-iteration step from uniform ranks.
///
/// Returns `(ranks, deltas)`: ranks after the step, and per vertex the
/// difference to the uniform start.
pub fn initial_state(
    vertices: &[i64],
    edges: &[Record],
    damping: f64,
) -> Result<(Vec<Record>, Vec<Record>)> {
    if vertices.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let n = vertices.len() as f64;
    let uniform = 1.0 / n;
    let mut incoming: BTreeMap<i64, f64> = vertices.iter().map(|&v| (v, 0.0)).collect();
    for e in edges {
        let target = e.get_i64(EDGE_TARGET)?;
        let share = uniform / out_degree(e)?;
        *incoming.get_mut(&target).ok_or_else(|| {
            DflError::InvalidConfig(format!("edge {e} points at unknown vertex {target}"))
        })? += share;
    }
    let mut ranks = Vec::with_capacity(vertices.len());
    let mut deltas = Vec::with_capacity(vertices.len());
    for &v in vertices {
        let rank = (1.0 - damping) / n + damping * incoming[&v];
        ranks.push(Record::from_values([Value::Int64(v), Value::Float64(rank)]));
        deltas.push(Record::from_values([
            Value::Int64(v),
            Value::Float64(rank - uniform),
        ]));
    }
    Ok((ranks, deltas))
}

fn out_degree(edge: &Record) -> Result<f64> {
    let degree = edge.get_i64(EDGE_OUT_DEGREE)?;
    if degree <= 0 {
        return Err(DflError::InvalidConfig(format!(
            "edge {edge} has non-positive out degree"
        )));
    }
    Ok(degree as f64)
}

/// `(vertex, delta) x (vertex, target, out_degree) -> (target, d * delta / out_degree)`
pub struct SpreadDelta {
    pub damping: f64,
}

impl DependencyMatch for SpreadDelta {
    fn name(&self) -> &str {
        "spread_delta"
    }

    fn join(
        &self,
        active: &Record,
        edge: &Record,
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        let delta = active.get_f64(DELTA)?;
        out.collect(Record::from_values([
            Value::Int64(edge.get_i64(EDGE_TARGET)?),
            Value::Float64(self.damping * delta / out_degree(edge)?),
        ]));
        Ok(())
    }
}

pub struct SumDeltas;

impl UpdateReduce for SumDeltas {
    fn name(&self) -> &str {
        "sum_deltas"
    }

    fn reduce(
        &self,
        group: &[Record],
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        let first = group
            .first()
            .ok_or_else(|| DflError::Execution("sum_deltas received an empty group".to_string()))?;
        let mut sum = 0.0;
        for r in group {
            sum += r.get_f64(DELTA)?;
        }
        out.collect(Record::from_values([
            Value::Int64(first.get_i64(VERTEX)?),
            Value::Float64(sum),
        ]));
        Ok(())
    }
}

/// Applies a delta when its magnitude is strictly above `threshold`.
pub struct RankComparison {
    pub threshold: f64,
}

impl SolutionSetUpdate for RankComparison {
    fn name(&self) -> &str {
        "rank_comparison"
    }

    fn update(
        &self,
        candidate: &Record,
        current: &Record,
        ctx: &mut IterationContext<'_>,
    ) -> Result<Option<Record>> {
        let delta = candidate.get_f64(DELTA)?;
        if delta.abs() <= self.threshold {
            return Ok(None);
        }
        ctx.aggregate(RANK_DELTA_AGGREGATOR, AggregateValue::Double(delta.abs()))?;
        let mut updated = current.clone();
        updated.set_field(RANK, current.get_f64(RANK)? + delta);
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use dfl_common::{PartitionId, Round};
    use dfl_execution::AggregateSet;

    use super::*;

    fn rank(v: i64, r: f64) -> Record {
        Record::from_values([Value::Int64(v), Value::Float64(r)])
    }

    #[test]
    fn threshold_is_strict_and_changes_are_aggregated() {
        let mut aggregates = AggregateSet::new();
        aggregates.register(RANK_DELTA_AGGREGATOR, AggregatorKind::DoubleSum);
        let mut ctx = IterationContext::new(Round(2), PartitionId(0), &mut aggregates, None);
        let cmp = RankComparison { threshold: 0.01 };

        assert_eq!(
            cmp.update(&rank(1, 0.01), &rank(1, 0.5), &mut ctx)
                .expect("update"),
            None
        );
        let updated = cmp
            .update(&rank(1, -0.25), &rank(1, 0.5), &mut ctx)
            .expect("update")
            .expect("changed");
        assert_eq!(updated.get_f64(RANK).expect("rank"), 0.25);
        drop(ctx);
        assert_eq!(
            aggregates.get(RANK_DELTA_AGGREGATOR),
            Some(AggregateValue::Double(0.25))
        );
    }

    #[test]
    fn empty_group_is_an_error() {
        let mut aggregates = AggregateSet::new();
        let mut ctx = IterationContext::new(Round(1), PartitionId(0), &mut aggregates, None);
        let mut out = Collector::new();
        assert!(SumDeltas.reduce(&[], &mut ctx, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn initial_state_is_one_power_step() {
        let edges = vec![
            Record::from_values([Value::Int64(1), Value::Int64(2), Value::Int64(1)]),
            Record::from_values([Value::Int64(2), Value::Int64(1), Value::Int64(1)]),
        ];
        let (ranks, deltas) = initial_state(&[1, 2], &edges, 0.85).expect("state");
        for (r, d) in ranks.iter().zip(&deltas) {
            assert!((r.get_f64(RANK).expect("rank") - 0.5).abs() < 1e-12);
            assert!(d.get_f64(DELTA).expect("delta").abs() < 1e-12);
        }
    }

    #[test]
    fn zero_out_degree_is_rejected() {
        let edges = vec![Record::from_values([
            Value::Int64(1),
            Value::Int64(2),
            Value::Int64(0),
        ])];
        assert!(initial_state(&[1, 2], &edges, 0.85).is_err());
    }
}
