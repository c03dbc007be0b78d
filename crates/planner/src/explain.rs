use crate::iteration_plan::{EdgeKind, IterationPlan};

/// Render an iteration plan as human-readable multiline text.
pub fn explain_iteration(plan: &IterationPlan) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "Iteration name={} kind={:?} parallelism={} max_rounds={}\n",
        plan.name, plan.kind, plan.parallelism, plan.max_rounds
    ));
    s.push_str(&format!("  solution_key={}\n", plan.keys.solution));
    s.push_str(&format!("  workset_key={}\n", plan.keys.workset));
    s.push_str(&format!(
        "  dependency_source_key={}\n",
        plan.keys.dependency_source
    ));
    s.push_str(&format!("  candidate_key={}\n", plan.keys.candidate));
    s.push_str(&format!("  workset_source={:?}\n", plan.workset_source));
    s.push_str(&format!(
        "  convergence={} on {} ({:?})\n",
        plan.convergence.criterion.name(),
        plan.convergence.aggregator,
        plan.convergence.kind
    ));
    s.push_str(&format!("  aggregators={}\n", plan.aggregators.len()));
    for a in &plan.aggregators {
        s.push_str(&format!("    {} := {:?}\n", a.name, a.kind));
    }
    s.push_str(&format!("  udfs={:?}\n", plan.udfs));
    s.push_str(&format!("  inputs={:?}\n", plan.inputs));
    s.push_str("Nodes\n");
    for n in &plan.nodes {
        s.push_str(&format!("  {} {} role={}\n", n.id, n.name, n.role));
    }
    s.push_str("Edges\n");
    for e in &plan.edges {
        let arrow = match e.kind {
            EdgeKind::Data => "->",
            EdgeKind::Feedback => "~>",
            EdgeKind::Control => "=>",
        };
        s.push_str(&format!(
            "  {} {arrow} {} ship={} kind={:?}\n",
            e.from, e.to, e.ship, e.kind
        ));
    }
    s
}
