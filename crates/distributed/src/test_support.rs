use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dfl_common::Result;
use dfl_execution::{
    Collector, ConvergenceRegistration, DependencyMatch, IterationContext, KeySpec, KeyType,
    Record, SolutionSetUpdate, UpdateReduce, Value,
};
use dfl_planner::{DeltaIterationBuilder, IterationPlan, WorksetSource};
use dfl_storage::{MemorySource, RecordSource};

pub(crate) fn temp_root(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}"))
}

/// `(vertex, label) x (src, trg) -> (trg, label)`
pub(crate) struct SendLabel;

impl DependencyMatch for SendLabel {
    fn name(&self) -> &str {
        "send_label"
    }

    fn join(
        &self,
        active: &Record,
        dependency: &Record,
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        out.collect(Record::from_values([
            Value::Int64(dependency.get_i64(1)?),
            Value::Int64(active.get_i64(1)?),
        ]));
        Ok(())
    }
}

pub(crate) struct MinLabel;

impl UpdateReduce for MinLabel {
    fn name(&self) -> &str {
        "min_label"
    }

    fn reduce(
        &self,
        group: &[Record],
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        let mut best = &group[0];
        for r in &group[1..] {
            if r.get_i64(1)? < best.get_i64(1)? {
                best = r;
            }
        }
        out.collect(best.clone());
        Ok(())
    }
}

pub(crate) struct LowerLabel;

impl SolutionSetUpdate for LowerLabel {
    fn name(&self) -> &str {
        "lower_label"
    }

    fn update(
        &self,
        candidate: &Record,
        current: &Record,
        _ctx: &mut IterationContext<'_>,
    ) -> Result<Option<Record>> {
        Ok((candidate.get_i64(1)? < current.get_i64(1)?).then(|| candidate.clone()))
    }
}

fn empty(name: &str) -> Arc<dyn RecordSource> {
    Arc::new(MemorySource::new(name, Vec::new()))
}

/// Minimum-label propagation plan with empty inputs.
pub(crate) fn plan_for(source: WorksetSource) -> IterationPlan {
    plan_with_inputs(source, empty("vertices"), empty("workset"), empty("edges"), 1)
}

pub(crate) fn plan_with_inputs(
    source: WorksetSource,
    solution: Arc<dyn RecordSource>,
    workset: Arc<dyn RecordSource>,
    edges: Arc<dyn RecordSource>,
    parallelism: u32,
) -> IterationPlan {
    let key = KeySpec::single(0, KeyType::Int64);
    DeltaIterationBuilder::new("min-label")
        .parallelism(parallelism)
        .max_rounds(20)
        .solution_set(solution, key.clone())
        .initial_workset(workset, key.clone())
        .dependencies(edges, key)
        .dependency_match(Arc::new(SendLabel))
        .update_reduce(Arc::new(MinLabel))
        .solution_update(Arc::new(LowerLabel))
        .workset_source(source)
        .convergence(ConvergenceRegistration::workset_empty())
        .build()
        .expect("min-label plan")
}
