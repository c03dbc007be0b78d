use std::sync::Arc;

use dfl_client::algorithms::connected_components::{
    MinComponent, NeighborLabel, UpdateComponentIfSmaller,
};
use dfl_client::algorithms::{ConnectedComponents, SymmetricEdges, initial_labels};
use dfl_common::{DflError, Round};
use dfl_distributed::TerminationReason;
use dfl_execution::{
    ConvergenceRegistration, KeySpec, KeyType, SOLUTION_UPDATES_AGGREGATOR,
    WORKSET_SIZE_AGGREGATOR,
};

#[path = "support/mod.rs"]
mod support;

use support::*;

fn odd_even_inputs() -> (Vec<i64>, Vec<(i64, i64)>) {
    ((1..=9).collect(), odd_even_edges())
}

fn cc_plan(job: ConnectedComponents) -> dfl_planner::IterationPlan {
    let (vertices, edges) = odd_even_inputs();
    let labels = initial_labels(&vertices.iter().map(|&v| vertex(v)).collect::<Vec<_>>())
        .expect("labels");
    job.plan(
        memory("labels", labels),
        memory("edges", edges.iter().map(|&(a, b)| pair(a, b)).collect()),
    )
    .expect("plan")
}

#[tokio::test]
async fn delta_components_match_union_find() {
    let (vertices, edges) = odd_even_inputs();
    let engine = engine(usize::MAX);
    let result = engine
        .run(&cc_plan(ConnectedComponents {
            parallelism: 3,
            ..ConnectedComponents::default()
        }))
        .await
        .expect("run");
    assert_eq!(labels(&result.records), union_find_components(&vertices, &edges));
    assert_eq!(result.termination, TerminationReason::Converged);
    assert!(result.rounds < 10);
}

#[tokio::test]
async fn bulk_and_delta_agree() {
    let engine = engine(usize::MAX);
    let delta = engine
        .run(&cc_plan(ConnectedComponents {
            parallelism: 2,
            ..ConnectedComponents::default()
        }))
        .await
        .expect("delta");
    let bulk = engine
        .run(&cc_plan(ConnectedComponents {
            parallelism: 2,
            bulk: true,
            ..ConnectedComponents::default()
        }))
        .await
        .expect("bulk");
    assert_eq!(labels(&delta.records), labels(&bulk.records));
    assert_eq!(bulk.termination, TerminationReason::Converged);
    let last = bulk.aggregates.last().expect("bulk history");
    assert_eq!(
        last.values.get(SOLUTION_UPDATES_AGGREGATOR).map(|v| v.as_f64()),
        Some(0.0)
    );
}

#[tokio::test]
async fn zero_memory_budget_spills_without_changing_results() {
    let job = ConnectedComponents {
        parallelism: 4,
        ..ConnectedComponents::default()
    };
    let in_memory = engine(usize::MAX).run(&cc_plan(job)).await.expect("in memory");
    let spilled = engine(0).run(&cc_plan(job)).await.expect("spilled");
    assert_eq!(labels(&in_memory.records), labels(&spilled.records));
    assert_eq!(in_memory.rounds, spilled.rounds);
    assert_eq!(in_memory.aggregates.len(), spilled.aggregates.len());
}

#[tokio::test]
async fn runs_are_deterministic() {
    let engine = engine(usize::MAX);
    let job = ConnectedComponents {
        parallelism: 3,
        ..ConnectedComponents::default()
    };
    let a = engine.run(&cc_plan(job)).await.expect("first");
    let b = engine.run(&cc_plan(job)).await.expect("second");
    assert_eq!(a.records, b.records);
    assert_eq!(a.rounds, b.rounds);
    assert_eq!(
        a.aggregates.iter().map(|r| r.values.clone()).collect::<Vec<_>>(),
        b.aggregates.iter().map(|r| r.values.clone()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn round_cap_stops_before_convergence() {
    let result = engine(usize::MAX)
        .run(&cc_plan(ConnectedComponents {
            parallelism: 2,
            max_rounds: 1,
            ..ConnectedComponents::default()
        }))
        .await
        .expect("run");
    assert_eq!(result.rounds, 1);
    assert_eq!(result.termination, TerminationReason::MaxRounds);
    // One hop: vertex 9 only heard from 7.
    assert!(labels(&result.records).contains(&(9, 7)));
}

fn label_iteration(
    engine: &dfl_client::Engine,
    workset: Vec<dfl_execution::Record>,
) -> dfl_planner::IterationPlan {
    let key = KeySpec::single(0, KeyType::Int64);
    let edges = memory("edges", odd_even_edges().iter().map(|&(a, b)| pair(a, b)).collect());
    engine
        .iteration("labels")
        .parallelism(2)
        .solution_set(
            memory("labels", (1..=9).map(|v| pair(v, v)).collect()),
            key.clone(),
        )
        .initial_workset(memory("workset", workset), key.clone())
        .dependencies(Arc::new(SymmetricEdges::new(edges)), key)
        .dependency_match(Arc::new(NeighborLabel))
        .update_reduce(Arc::new(MinComponent))
        .solution_update(Arc::new(UpdateComponentIfSmaller))
        .convergence(ConvergenceRegistration::workset_empty())
        .build()
        .expect("plan")
}

#[tokio::test]
async fn empty_initial_workset_terminates_after_one_round() {
    let engine = engine(usize::MAX);
    let result = engine
        .run(&label_iteration(&engine, Vec::new()))
        .await
        .expect("run");
    assert_eq!(result.rounds, 1);
    // The workset-empty criterion holds before the fallback check is reached.
    assert_eq!(result.termination, TerminationReason::Converged);
    assert_eq!(result.aggregates.len(), 1);
    let only = &result.aggregates[0];
    assert_eq!(only.round, Round::FIRST);
    assert_eq!(
        only.values.get(WORKSET_SIZE_AGGREGATOR).map(|v| v.as_f64()),
        Some(0.0)
    );
    let unchanged: Vec<(i64, i64)> = (1..=9).map(|v| (v, v)).collect();
    assert_eq!(labels(&result.records), unchanged);
}

#[tokio::test]
async fn workset_key_outside_solution_set_is_rejected() {
    let engine = engine(usize::MAX);
    let err = engine
        .run(&label_iteration(&engine, vec![pair(3, 3), pair(42, 42)]))
        .await
        .expect_err("unknown workset key");
    assert!(matches!(err, DflError::InvalidConfig(_)), "{err}");
}

#[test]
fn missing_convergence_is_a_configuration_error() {
    let engine = engine(usize::MAX);
    let key = KeySpec::single(0, KeyType::Int64);
    let err = engine
        .iteration("incomplete")
        .solution_set(memory("labels", Vec::new()), key.clone())
        .initial_workset(memory("workset", Vec::new()), key.clone())
        .dependencies(memory("edges", Vec::new()), key)
        .dependency_match(Arc::new(NeighborLabel))
        .update_reduce(Arc::new(MinComponent))
        .solution_update(Arc::new(UpdateComponentIfSmaller))
        .build()
        .expect_err("no convergence criterion");
    assert!(matches!(err, DflError::InvalidConfig(_)));
}
