use std::fmt;
use std::sync::Arc;

use dfl_execution::{
    AggregatorRegistration, ConvergenceRegistration, DependencyMatch, KeySpec, SolutionSetUpdate,
    UpdateReduce, WorksetMap,
};
use dfl_shuffle::ShipStrategy;
use dfl_storage::RecordSource;
use serde::{Deserialize, Serialize};

/// Node index inside one [`IterationPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delta iterations recompute active keys only; bulk iterations feed the
/// whole solution set back every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationKind {
    Delta,
    Bulk,
}

/// What the workset tail turns into the next workset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorksetSource {
    /// Every record the intermediate role produced.
    Aggregated,
    /// Only records that changed a solution entry.
    Changed,
    /// The entire solution set (bulk iteration).
    SolutionSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    Solution,
    Workset,
    Dependencies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    /// Final solution set.
    Output,
    /// Structural sink for tail outputs.
    Discard,
}

/// Tagged task role of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskRole {
    Source(InputKind),
    Head,
    Intermediate,
    SolutionSetTail,
    WorksetTail,
    Sync,
    Sink(SinkKind),
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRole::Source(k) => write!(f, "Source({k:?})"),
            TaskRole::Head => f.write_str("Head"),
            TaskRole::Intermediate => f.write_str("Intermediate"),
            TaskRole::SolutionSetTail => f.write_str("SolutionSetTail"),
            TaskRole::WorksetTail => f.write_str("WorksetTail"),
            TaskRole::Sync => f.write_str("Sync"),
            TaskRole::Sink(k) => write!(f, "Sink({k:?})"),
        }
    }
}

/// Edges that cross a round boundary are `Feedback`; barrier reports are
/// `Control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Data,
    Feedback,
    Control,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub name: String,
    pub role: TaskRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub ship: ShipStrategy,
    pub kind: EdgeKind,
}

/// Key layouts of the records flowing through an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpecs {
    /// Key of solution set records.
    pub solution: KeySpec,
    /// Key of workset records.
    pub workset: KeySpec,
    /// Source key of dependency records.
    pub dependency_source: KeySpec,
    /// Key of head output, which is also the grouping key and the key of
    /// aggregated records.
    pub candidate: KeySpec,
}

/// User functions of an iteration.
#[derive(Clone)]
pub struct IterationUdfs {
    pub dependency_match: Arc<dyn DependencyMatch>,
    pub update_reduce: Arc<dyn UpdateReduce>,
    pub solution_update: Arc<dyn SolutionSetUpdate>,
    pub workset_map: Arc<dyn WorksetMap>,
}

impl fmt::Debug for IterationUdfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationUdfs")
            .field("dependency_match", &self.dependency_match.name())
            .field("update_reduce", &self.update_reduce.name())
            .field("solution_update", &self.solution_update.name())
            .field("workset_map", &self.workset_map.name())
            .finish()
    }
}

/// Static inputs, read once at INIT.
#[derive(Clone)]
pub struct IterationInputs {
    pub solution: Arc<dyn RecordSource>,
    /// Absent for bulk iterations, whose workset is the solution set.
    pub workset: Option<Arc<dyn RecordSource>>,
    pub dependencies: Arc<dyn RecordSource>,
}

impl fmt::Debug for IterationInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationInputs")
            .field("solution", &self.solution.name())
            .field("workset", &self.workset.as_ref().map(|w| w.name().to_string()))
            .field("dependencies", &self.dependencies.name())
            .finish()
    }
}

/// Validated iteration job: typed graph plus everything needed to run it.
#[derive(Debug, Clone)]
pub struct IterationPlan {
    pub name: String,
    pub kind: IterationKind,
    pub parallelism: u32,
    pub max_rounds: u32,
    pub nodes: Vec<PlanNode>,
    pub edges: Vec<PlanEdge>,
    pub keys: KeySpecs,
    pub workset_source: WorksetSource,
    pub convergence: ConvergenceRegistration,
    /// Every aggregator, built-ins included.
    pub aggregators: Vec<AggregatorRegistration>,
    pub udfs: IterationUdfs,
    pub inputs: IterationInputs,
}

impl IterationPlan {
    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id.0)
    }

    /// First node with `role`.
    pub fn node_with_role(&self, role: TaskRole) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.role == role)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &PlanEdge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &PlanEdge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Ship strategy of the data edge from the first `from` node to the
    /// first `to` node.
    pub fn ship_between(&self, from: TaskRole, to: TaskRole) -> Option<ShipStrategy> {
        let from = self.node_with_role(from)?.id;
        let to = self.node_with_role(to)?.id;
        self.edges
            .iter()
            .find(|e| e.from == from && e.to == to && e.kind == EdgeKind::Data)
            .map(|e| e.ship)
    }
}
