//! Assembles and validates an [`IterationPlan`].
//!
//! Validation happens once, before anything runs:
//! - missing inputs, user functions or convergence criterion are
//!   configuration errors
//! - key specs that cannot be compared with each other, or a workset
//!   source that does not fit the iteration kind, are planning errors

use std::sync::Arc;

use dfl_common::{DflError, Result};
use dfl_execution::{
    AggregatorKind, AggregatorRegistration, ConvergenceRegistration, DependencyMatch,
    IdentityWorksetMap, KeySpec, SOLUTION_UPDATES_AGGREGATOR, SolutionSetUpdate, UpdateReduce,
    WORKSET_SIZE_AGGREGATOR, WorksetMap,
};
use dfl_shuffle::ShipStrategy;
use dfl_storage::RecordSource;

use crate::iteration_plan::{
    EdgeKind, InputKind, IterationInputs, IterationKind, IterationPlan, IterationUdfs, KeySpecs,
    NodeId, PlanEdge, PlanNode, SinkKind, TaskRole, WorksetSource,
};

/// Upper bound applied when no round cap is configured.
pub const DEFAULT_MAX_ROUNDS: u32 = 100;

pub struct DeltaIterationBuilder {
    name: String,
    kind: IterationKind,
    parallelism: u32,
    max_rounds: u32,
    solution: Option<(Arc<dyn RecordSource>, KeySpec)>,
    workset: Option<(Arc<dyn RecordSource>, KeySpec)>,
    dependencies: Option<(Arc<dyn RecordSource>, KeySpec)>,
    candidate_key: Option<KeySpec>,
    dependency_match: Option<Arc<dyn DependencyMatch>>,
    update_reduce: Option<Arc<dyn UpdateReduce>>,
    solution_update: Option<Arc<dyn SolutionSetUpdate>>,
    workset_map: Arc<dyn WorksetMap>,
    workset_source: Option<WorksetSource>,
    convergence: Option<ConvergenceRegistration>,
    aggregators: Vec<AggregatorRegistration>,
}

impl DeltaIterationBuilder {
    /// Delta (workset) iteration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, IterationKind::Delta)
    }

    /// Bulk iteration: the whole solution set is the workset of every round.
    pub fn bulk(name: impl Into<String>) -> Self {
        Self::with_kind(name, IterationKind::Bulk)
    }

    fn with_kind(name: impl Into<String>, kind: IterationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parallelism: 1,
            max_rounds: DEFAULT_MAX_ROUNDS,
            solution: None,
            workset: None,
            dependencies: None,
            candidate_key: None,
            dependency_match: None,
            update_reduce: None,
            solution_update: None,
            workset_map: Arc::new(IdentityWorksetMap),
            workset_source: None,
            convergence: None,
            aggregators: Vec::new(),
        }
    }

    pub fn parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn solution_set(mut self, source: Arc<dyn RecordSource>, key: KeySpec) -> Self {
        self.solution = Some((source, key));
        self
    }

    pub fn initial_workset(mut self, source: Arc<dyn RecordSource>, key: KeySpec) -> Self {
        self.workset = Some((source, key));
        self
    }

    pub fn dependencies(mut self, source: Arc<dyn RecordSource>, source_key: KeySpec) -> Self {
        self.dependencies = Some((source, source_key));
        self
    }

    /// Key of head output records; defaults to the solution key.
    pub fn candidate_key(mut self, key: KeySpec) -> Self {
        self.candidate_key = Some(key);
        self
    }

    pub fn dependency_match(mut self, udf: Arc<dyn DependencyMatch>) -> Self {
        self.dependency_match = Some(udf);
        self
    }

    pub fn update_reduce(mut self, udf: Arc<dyn UpdateReduce>) -> Self {
        self.update_reduce = Some(udf);
        self
    }

    pub fn solution_update(mut self, udf: Arc<dyn SolutionSetUpdate>) -> Self {
        self.solution_update = Some(udf);
        self
    }

    pub fn workset_map(mut self, udf: Arc<dyn WorksetMap>) -> Self {
        self.workset_map = udf;
        self
    }

    /// Defaults to `Changed` for delta and `SolutionSet` for bulk.
    pub fn workset_source(mut self, source: WorksetSource) -> Self {
        self.workset_source = Some(source);
        self
    }

    pub fn convergence(mut self, registration: ConvergenceRegistration) -> Self {
        self.convergence = Some(registration);
        self
    }

    /// Register an extra aggregator user functions can contribute to.
    pub fn aggregator(mut self, name: impl Into<String>, kind: AggregatorKind) -> Self {
        self.aggregators.push(AggregatorRegistration::new(name, kind));
        self
    }

    pub fn build(self) -> Result<IterationPlan> {
        let (solution, solution_key) = self
            .solution
            .ok_or_else(|| missing(&self.name, "initial solution set"))?;
        let (dependencies, dependency_key) = self
            .dependencies
            .ok_or_else(|| missing(&self.name, "dependency set"))?;
        let workset = match self.kind {
            IterationKind::Delta => Some(
                self.workset
                    .ok_or_else(|| missing(&self.name, "initial workset"))?,
            ),
            IterationKind::Bulk => {
                if self.workset.is_some() {
                    return Err(DflError::Planning(format!(
                        "bulk iteration '{}' takes its workset from the solution set",
                        self.name
                    )));
                }
                None
            }
        };
        let convergence = self
            .convergence
            .ok_or_else(|| missing(&self.name, "convergence criterion"))?;
        let dependency_match = self
            .dependency_match
            .ok_or_else(|| missing(&self.name, "dependency match function"))?;
        let update_reduce = self
            .update_reduce
            .ok_or_else(|| missing(&self.name, "update reduce function"))?;
        let solution_update = self
            .solution_update
            .ok_or_else(|| missing(&self.name, "solution set update function"))?;

        if self.parallelism == 0 {
            return Err(DflError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(DflError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        let workset_source = match (self.kind, self.workset_source) {
            (IterationKind::Delta, None) => WorksetSource::Changed,
            (IterationKind::Bulk, None | Some(WorksetSource::SolutionSet)) => {
                WorksetSource::SolutionSet
            }
            (IterationKind::Delta, Some(WorksetSource::SolutionSet)) => {
                return Err(DflError::Planning(
                    "the SolutionSet workset source requires a bulk iteration".to_string(),
                ));
            }
            (IterationKind::Bulk, Some(other)) => {
                return Err(DflError::Planning(format!(
                    "bulk iteration cannot use the {other:?} workset source"
                )));
            }
            (IterationKind::Delta, Some(source)) => source,
        };

        let keys = KeySpecs {
            workset: workset
                .as_ref()
                .map(|(_, k)| k.clone())
                .unwrap_or_else(|| solution_key.clone()),
            candidate: self
                .candidate_key
                .unwrap_or_else(|| solution_key.clone()),
            solution: solution_key,
            dependency_source: dependency_key,
        };
        validate_keys(&keys)?;

        let aggregators = merge_aggregators(&convergence, self.aggregators)?;
        let (nodes, edges) = build_graph(self.kind, workset_source);

        Ok(IterationPlan {
            name: self.name,
            kind: self.kind,
            parallelism: self.parallelism,
            max_rounds: self.max_rounds,
            nodes,
            edges,
            keys,
            workset_source,
            convergence,
            aggregators,
            udfs: IterationUdfs {
                dependency_match,
                update_reduce,
                solution_update,
                workset_map: self.workset_map,
            },
            inputs: IterationInputs {
                solution,
                workset: workset.map(|(s, _)| s),
                dependencies,
            },
        })
    }
}

fn missing(name: &str, what: &str) -> DflError {
    DflError::InvalidConfig(format!("iteration '{name}' has no {what}"))
}

fn validate_keys(keys: &KeySpecs) -> Result<()> {
    let pairs = [
        ("solution", &keys.solution, "workset", &keys.workset),
        (
            "workset",
            &keys.workset,
            "dependency source",
            &keys.dependency_source,
        ),
        ("candidate", &keys.candidate, "solution", &keys.solution),
    ];
    for (a_name, a, b_name, b) in pairs {
        if a.is_empty() {
            return Err(DflError::Planning(format!("{a_name} key must not be empty")));
        }
        if !a.same_types(b) {
            return Err(DflError::Planning(format!(
                "{a_name} key {a} is not comparable with {b_name} key {b}"
            )));
        }
    }
    Ok(())
}

fn merge_aggregators(
    convergence: &ConvergenceRegistration,
    extra: Vec<AggregatorRegistration>,
) -> Result<Vec<AggregatorRegistration>> {
    let mut all = vec![
        AggregatorRegistration::new(WORKSET_SIZE_AGGREGATOR, AggregatorKind::LongSum),
        AggregatorRegistration::new(SOLUTION_UPDATES_AGGREGATOR, AggregatorKind::LongSum),
    ];
    let requested = std::iter::once(AggregatorRegistration::new(
        convergence.aggregator.clone(),
        convergence.kind,
    ))
    .chain(extra);
    for reg in requested {
        match all.iter().find(|a| a.name == reg.name) {
            Some(existing) if existing.kind != reg.kind => {
                return Err(DflError::Planning(format!(
                    "aggregator '{}' registered as {:?} and {:?}",
                    reg.name, existing.kind, reg.kind
                )));
            }
            Some(_) => {}
            None => all.push(reg),
        }
    }
    Ok(all)
}

fn build_graph(kind: IterationKind, source: WorksetSource) -> (Vec<PlanNode>, Vec<PlanEdge>) {
    let mut g = GraphBuilder::default();
    let solution = g.node("solution-set", TaskRole::Source(InputKind::Solution));
    let workset = match kind {
        IterationKind::Delta => Some(g.node("initial-workset", TaskRole::Source(InputKind::Workset))),
        IterationKind::Bulk => None,
    };
    let dependencies = g.node("dependencies", TaskRole::Source(InputKind::Dependencies));
    let head = g.node("head", TaskRole::Head);
    let intermediate = g.node("intermediate", TaskRole::Intermediate);
    let solution_tail = g.node("solution-set-tail", TaskRole::SolutionSetTail);
    let workset_tail = g.node("workset-tail", TaskRole::WorksetTail);
    let sync = g.node("sync", TaskRole::Sync);
    let output = g.node("output", TaskRole::Sink(SinkKind::Output));
    let solution_discard = g.node("solution-set-discard", TaskRole::Sink(SinkKind::Discard));
    let workset_discard = g.node("workset-discard", TaskRole::Sink(SinkKind::Discard));

    g.edge(solution, head, ShipStrategy::PartitionHash, EdgeKind::Data);
    if let Some(workset) = workset {
        g.edge(workset, head, ShipStrategy::PartitionHash, EdgeKind::Data);
    }
    g.edge(dependencies, head, ShipStrategy::PartitionHash, EdgeKind::Data);
    g.edge(head, intermediate, ShipStrategy::PartitionHash, EdgeKind::Data);
    g.edge(intermediate, solution_tail, ShipStrategy::Forward, EdgeKind::Data);
    let workset_input = match source {
        WorksetSource::Aggregated => intermediate,
        WorksetSource::Changed | WorksetSource::SolutionSet => solution_tail,
    };
    g.edge(workset_input, workset_tail, ShipStrategy::Forward, EdgeKind::Data);
    g.edge(solution_tail, solution_discard, ShipStrategy::Forward, EdgeKind::Data);
    g.edge(workset_tail, workset_discard, ShipStrategy::Forward, EdgeKind::Data);
    g.edge(head, output, ShipStrategy::Forward, EdgeKind::Data);
    g.edge(solution_tail, sync, ShipStrategy::Forward, EdgeKind::Control);
    g.edge(workset_tail, sync, ShipStrategy::Forward, EdgeKind::Control);
    g.edge(workset_tail, head, ShipStrategy::Forward, EdgeKind::Feedback);
    g.edge(sync, head, ShipStrategy::Broadcast, EdgeKind::Feedback);
    (g.nodes, g.edges)
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<PlanNode>,
    edges: Vec<PlanEdge>,
}

impl GraphBuilder {
    fn node(&mut self, name: &str, role: TaskRole) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PlanNode {
            id,
            name: name.to_string(),
            role,
        });
        id
    }

    fn edge(&mut self, from: NodeId, to: NodeId, ship: ShipStrategy, kind: EdgeKind) {
        self.edges.push(PlanEdge {
            from,
            to,
            ship,
            kind,
        });
    }
}
