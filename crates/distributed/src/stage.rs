use std::collections::BTreeSet;

use dfl_common::{DflError, Result};
use dfl_planner::{EdgeKind, IterationPlan, NodeId, TaskRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub node: NodeId,
    pub name: String,
    pub role: TaskRole,
}

/// Order in which one partition runs the roles of a round.
///
/// Topological order of the plan graph with feedback edges removed; ties
/// are broken by node id so every partition runs the same sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSchedule {
    pub tasks: Vec<ScheduledTask>,
}

impl RoundSchedule {
    pub fn roles(&self) -> impl Iterator<Item = TaskRole> + '_ {
        self.tasks.iter().map(|t| t.role)
    }

    pub fn position(&self, role: TaskRole) -> Option<usize> {
        self.tasks.iter().position(|t| t.role == role)
    }
}

pub fn build_round_schedule(plan: &IterationPlan) -> Result<RoundSchedule> {
    let n = plan.nodes.len();
    let mut indegree = vec![0usize; n];
    for e in plan.edges.iter().filter(|e| e.kind != EdgeKind::Feedback) {
        check_node(plan, e.from)?;
        check_node(plan, e.to)?;
        indegree[e.to.0] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut tasks = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        let node = &plan.nodes[i];
        tasks.push(ScheduledTask {
            node: node.id,
            name: node.name.clone(),
            role: node.role,
        });
        for e in plan
            .outgoing(node.id)
            .filter(|e| e.kind != EdgeKind::Feedback)
        {
            indegree[e.to.0] -= 1;
            if indegree[e.to.0] == 0 {
                ready.insert(e.to.0);
            }
        }
    }
    if tasks.len() != n {
        return Err(DflError::Planning(format!(
            "iteration '{}' has a cycle outside its feedback edges",
            plan.name
        )));
    }

    // The barrier closes the round, so nothing may follow Sync.
    let sync = tasks
        .iter()
        .position(|t| t.role == TaskRole::Sync)
        .ok_or_else(|| DflError::Planning(format!("iteration '{}' has no sync node", plan.name)))?;
    let sync_task = tasks.remove(sync);
    tasks.push(sync_task);
    Ok(RoundSchedule { tasks })
}

fn check_node(plan: &IterationPlan, id: NodeId) -> Result<()> {
    if plan.node(id).is_none() {
        return Err(DflError::Planning(format!(
            "edge references unknown node {id} in iteration '{}'",
            plan.name
        )));
    }
    Ok(())
}
