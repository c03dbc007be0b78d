//! Connected components by minimum-label propagation.
//!
//! Record layouts:
//! - vertex / solution / workset: `(vertex: Int64, component: Int64)`
//! - edge: `(source: Int64, target: Int64)`, made symmetric on read
//!
//! Every vertex starts in its own component (its id). Each round, active
//! vertices send their label to their neighbours; a neighbour adopts the
//! smallest label it receives if it is smaller than its own.

use std::sync::Arc;

use dfl_common::{DflError, Result};
use dfl_execution::{
    Collector, ConvergenceRegistration, DependencyMatch, IterationContext, KeySpec, KeyType,
    Record, SolutionSetUpdate, UpdateReduce, Value,
};
use dfl_planner::{DeltaIterationBuilder, IterationPlan};
use dfl_storage::{MemorySource, RecordSource};

pub const VERTEX: usize = 0;
pub const COMPONENT: usize = 1;
pub const EDGE_SOURCE: usize = 0;
pub const EDGE_TARGET: usize = 1;

/// Job parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedComponents {
    pub parallelism: u32,
    pub max_rounds: u32,
    /// Recompute every vertex each round instead of only changed ones.
    pub bulk: bool,
}

impl Default for ConnectedComponents {
    fn default() -> Self {
        Self {
            parallelism: 1,
            max_rounds: 100,
            bulk: false,
        }
    }
}

impl ConnectedComponents {
    /// Plan over `(vertex, component)` labels and directed edges.
    pub fn plan(
        &self,
        labels: Arc<dyn RecordSource>,
        edges: Arc<dyn RecordSource>,
    ) -> Result<IterationPlan> {
        let key = KeySpec::single(VERTEX, KeyType::Int64);
        let edges: Arc<dyn RecordSource> = Arc::new(SymmetricEdges { inner: edges });
        let builder = if self.bulk {
            DeltaIterationBuilder::bulk("connected-components-bulk")
                .convergence(ConvergenceRegistration::no_updates())
        } else {
            DeltaIterationBuilder::new("connected-components")
                .initial_workset(Arc::clone(&labels), key.clone())
                .convergence(ConvergenceRegistration::workset_empty())
        };
        builder
            .parallelism(self.parallelism)
            .max_rounds(self.max_rounds)
            .solution_set(labels, key.clone())
            .dependencies(edges, KeySpec::single(EDGE_SOURCE, KeyType::Int64))
            .dependency_match(Arc::new(NeighborLabel))
            .update_reduce(Arc::new(MinComponent))
            .solution_update(Arc::new(UpdateComponentIfSmaller))
            .build()
    }
}

/// `(vertex, ..)` records to initial `(vertex, vertex)` labels.
pub fn initial_labels(vertices: &[Record]) -> Result<Vec<Record>> {
    vertices
        .iter()
        .map(|v| {
            let id = v.get_i64(VERTEX)?;
            Ok(Record::from_values([Value::Int64(id), Value::Int64(id)]))
        })
        .collect()
}

/// Label source built from a vertex source.
pub fn label_source(vertices: &dyn RecordSource) -> Result<Arc<dyn RecordSource>> {
    let labels = initial_labels(&vertices.read()?)?;
    Ok(Arc::new(MemorySource::new(
        format!("{}-labels", vertices.name()),
        labels,
    )))
}

/// Wraps an edge source and adds the reverse of every edge.
pub struct SymmetricEdges {
    inner: Arc<dyn RecordSource>,
}

impl SymmetricEdges {
    pub fn new(inner: Arc<dyn RecordSource>) -> Self {
        Self { inner }
    }
}

impl RecordSource for SymmetricEdges {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&self) -> Result<Vec<Record>> {
        let edges = self.inner.read()?;
        let mut out = Vec::with_capacity(edges.len() * 2);
        for e in edges {
            let source = e.get_i64(EDGE_SOURCE)?;
            let target = e.get_i64(EDGE_TARGET)?;
            out.push(Record::from_values([Value::Int64(source), Value::Int64(target)]));
            out.push(Record::from_values([Value::Int64(target), Value::Int64(source)]));
        }
        Ok(out)
    }
}

pub struct NeighborLabel;

impl DependencyMatch for NeighborLabel {
    fn name(&self) -> &str {
        "neighbor_label"
    }

    fn join(
        &self,
        active: &Record,
        edge: &Record,
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        out.collect(Record::from_values([
            Value::Int64(edge.get_i64(EDGE_TARGET)?),
            Value::Int64(active.get_i64(COMPONENT)?),
        ]));
        Ok(())
    }
}

pub struct MinComponent;

impl UpdateReduce for MinComponent {
    fn name(&self) -> &str {
        "min_component"
    }

    fn reduce(
        &self,
        group: &[Record],
        _ctx: &mut IterationContext<'_>,
        out: &mut Collector,
    ) -> Result<()> {
        let (first, rest) = group.split_first().ok_or_else(|| {
            DflError::Execution("min_component received an empty group".to_string())
        })?;
        let mut min = first.get_i64(COMPONENT)?;
        for r in rest {
            min = min.min(r.get_i64(COMPONENT)?);
        }
        out.collect(Record::from_values([
            Value::Int64(first.get_i64(VERTEX)?),
            Value::Int64(min),
        ]));
        Ok(())
    }
}

pub struct UpdateComponentIfSmaller;

impl SolutionSetUpdate for UpdateComponentIfSmaller {
    fn name(&self) -> &str {
        "update_component_if_smaller"
    }

    fn update(
        &self,
        candidate: &Record,
        current: &Record,
        _ctx: &mut IterationContext<'_>,
    ) -> Result<Option<Record>> {
        if candidate.get_i64(COMPONENT)? < current.get_i64(COMPONENT)? {
            Ok(Some(candidate.clone()))
        } else {
            Ok(None)
        }
    }
}
