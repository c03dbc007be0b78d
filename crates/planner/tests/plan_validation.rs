use std::sync::Arc;

use dfl_common::{DflError, Result};
use dfl_execution::{
    AggregatorKind, BelowThreshold, Collector, ConvergenceRegistration, DependencyMatch,
    IterationContext, KeySpec, KeyType, Record, SOLUTION_UPDATES_AGGREGATOR, SolutionSetUpdate,
    UpdateReduce, WORKSET_SIZE_AGGREGATOR,
};
use dfl_planner::{
    DeltaIterationBuilder, EdgeKind, InputKind, IterationKind, SinkKind, TaskRole, WorksetSource,
    explain_iteration,
};
use dfl_shuffle::ShipStrategy;
use dfl_storage::MemorySource;

struct Forward;

impl DependencyMatch for Forward {
    fn name(&self) -> &str {
        "forward"
    }

    fn join(
        &self,
        active: &Record,
        _dependency: &Record,
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        out.collect(active.clone());
        Ok(())
    }
}

struct First;

impl UpdateReduce for First {
    fn name(&self) -> &str {
        "first"
    }

    fn reduce(
        &self,
        group: &[Record],
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        out.collect(group[0].clone());
        Ok(())
    }
}

struct Replace;

impl SolutionSetUpdate for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn update(
        &self,
        candidate: &Record,
        current: &Record,
        _ctx: &mut IterationContext<'_>,
    ) -> Result<Option<Record>> {
        Ok((candidate != current).then(|| candidate.clone()))
    }
}

fn source(name: &str) -> Arc<MemorySource> {
    Arc::new(MemorySource::new(name, Vec::new()))
}

fn int_key() -> KeySpec {
    KeySpec::single(0, KeyType::Int64)
}

fn complete() -> DeltaIterationBuilder {
    DeltaIterationBuilder::new("cc")
        .parallelism(2)
        .max_rounds(10)
        .solution_set(source("vertices"), int_key())
        .initial_workset(source("workset"), int_key())
        .dependencies(source("edges"), int_key())
        .dependency_match(Arc::new(Forward))
        .update_reduce(Arc::new(First))
        .solution_update(Arc::new(Replace))
        .convergence(ConvergenceRegistration::workset_empty())
}

#[test]
fn builds_delta_graph_with_feedback_edges() {
    let plan = complete().build().expect("plan");
    assert_eq!(plan.kind, IterationKind::Delta);
    assert_eq!(plan.workset_source, WorksetSource::Changed);
    assert_eq!(plan.nodes.len(), 11);
    assert!(plan
        .node_with_role(TaskRole::Source(InputKind::Workset))
        .is_some());
    assert_eq!(
        plan.ship_between(TaskRole::Head, TaskRole::Intermediate),
        Some(ShipStrategy::PartitionHash)
    );
    assert_eq!(
        plan.ship_between(TaskRole::Intermediate, TaskRole::SolutionSetTail),
        Some(ShipStrategy::Forward)
    );
    assert_eq!(
        plan.ship_between(TaskRole::SolutionSetTail, TaskRole::WorksetTail),
        Some(ShipStrategy::Forward)
    );
    assert_eq!(
        plan.ship_between(TaskRole::Intermediate, TaskRole::WorksetTail),
        None
    );

    let head = plan.node_with_role(TaskRole::Head).expect("head").id;
    let feedback: Vec<_> = plan
        .incoming(head)
        .filter(|e| e.kind == EdgeKind::Feedback)
        .collect();
    assert_eq!(feedback.len(), 2);
    assert!(feedback.iter().any(|e| e.ship == ShipStrategy::Broadcast));

    let sync = plan.node_with_role(TaskRole::Sync).expect("sync").id;
    assert_eq!(
        plan.incoming(sync)
            .filter(|e| e.kind == EdgeKind::Control)
            .count(),
        2
    );
    let discards = plan
        .nodes
        .iter()
        .filter(|n| n.role == TaskRole::Sink(SinkKind::Discard))
        .count();
    assert_eq!(discards, 2);
}

#[test]
fn aggregated_workset_reads_from_intermediate() {
    let plan = complete()
        .workset_source(WorksetSource::Aggregated)
        .build()
        .expect("plan");
    assert_eq!(
        plan.ship_between(TaskRole::Intermediate, TaskRole::WorksetTail),
        Some(ShipStrategy::Forward)
    );
}

#[test]
fn registers_builtin_and_custom_aggregators() {
    let plan = complete()
        .aggregator("delta.abs", AggregatorKind::DoubleSum)
        .build()
        .expect("plan");
    let names: Vec<&str> = plan.aggregators.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec![WORKSET_SIZE_AGGREGATOR, SOLUTION_UPDATES_AGGREGATOR, "delta.abs"]
    );
}

#[test]
fn conflicting_aggregator_kinds_are_rejected() {
    let err = complete()
        .convergence(ConvergenceRegistration::new(
            WORKSET_SIZE_AGGREGATOR,
            AggregatorKind::DoubleSum,
            Arc::new(BelowThreshold { threshold: 1.0 }),
        ))
        .build()
        .expect_err("kind conflict");
    assert!(matches!(err, DflError::Planning(_)));
}

#[test]
fn missing_parts_are_configuration_errors() {
    let err = DeltaIterationBuilder::new("x")
        .build()
        .expect_err("no inputs");
    assert!(matches!(err, DflError::InvalidConfig(_)));

    let err = DeltaIterationBuilder::new("x")
        .solution_set(source("v"), int_key())
        .dependencies(source("e"), int_key())
        .dependency_match(Arc::new(Forward))
        .update_reduce(Arc::new(First))
        .solution_update(Arc::new(Replace))
        .convergence(ConvergenceRegistration::workset_empty())
        .build()
        .expect_err("no workset");
    assert!(err.to_string().contains("initial workset"));

    assert!(matches!(
        complete().parallelism(0).build(),
        Err(DflError::InvalidConfig(_))
    ));
    assert!(matches!(
        complete().max_rounds(0).build(),
        Err(DflError::InvalidConfig(_))
    ));
}

#[test]
fn incomparable_keys_are_planning_errors() {
    let err = complete()
        .initial_workset(source("workset"), KeySpec::single(0, KeyType::Utf8))
        .build()
        .expect_err("workset key");
    assert!(matches!(err, DflError::Planning(_)));

    let err = complete()
        .dependencies(source("edges"), KeySpec::single(1, KeyType::Float64))
        .build()
        .expect_err("dependency key");
    assert!(matches!(err, DflError::Planning(_)));

    let err = complete()
        .candidate_key(KeySpec::new(vec![(0, KeyType::Int64), (1, KeyType::Int64)]))
        .build()
        .expect_err("candidate key");
    assert!(matches!(err, DflError::Planning(_)));

    let err = complete()
        .solution_set(source("v"), KeySpec::new(Vec::new()))
        .initial_workset(source("w"), KeySpec::new(Vec::new()))
        .dependencies(source("e"), KeySpec::new(Vec::new()))
        .build()
        .expect_err("empty key");
    assert!(matches!(err, DflError::Planning(_)));
}

#[test]
fn bulk_iteration_feeds_back_the_solution_set() {
    let plan = DeltaIterationBuilder::bulk("ranks")
        .solution_set(source("ranks"), int_key())
        .dependencies(source("edges"), int_key())
        .dependency_match(Arc::new(Forward))
        .update_reduce(Arc::new(First))
        .solution_update(Arc::new(Replace))
        .convergence(ConvergenceRegistration::no_updates())
        .build()
        .expect("bulk plan");
    assert_eq!(plan.kind, IterationKind::Bulk);
    assert_eq!(plan.workset_source, WorksetSource::SolutionSet);
    assert!(plan.inputs.workset.is_none());
    assert_eq!(plan.keys.workset, plan.keys.solution);
    assert!(plan
        .node_with_role(TaskRole::Source(InputKind::Workset))
        .is_none());

    assert!(matches!(
        complete().workset_source(WorksetSource::SolutionSet).build(),
        Err(DflError::Planning(_))
    ));
}

#[test]
fn explain_lists_nodes_and_edges() {
    let plan = complete().build().expect("plan");
    let text = explain_iteration(&plan);
    assert!(text.starts_with("Iteration name=cc kind=Delta parallelism=2 max_rounds=10"));
    assert!(text.contains("solution_key=[#0:Int64]"));
    assert!(text.contains("convergence=workset_empty on workset.size"));
    assert!(text.contains("role=SolutionSetTail"));
    assert!(text.contains("~>"));
    assert!(text.contains("dependency_match: \"forward\""));
}
