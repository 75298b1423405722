//! Dependency resolution for a bring-up batch.
//!
//! Fixed-point passes over the batch in input order: a node resolves once
//! every dependency is in the resolved set, and nodes resolved earlier in a
//! pass count for later nodes in the same pass. A pass that resolves nothing
//! while nodes remain fails the whole batch.

use std::collections::{BTreeSet, HashMap, HashSet};

use conductor_types::error::ControlPlaneError;
use conductor_types::system::{SystemNode, SystemState};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use tracing::{debug, warn};

/// Resolve a batch, returning ids in resolution order.
///
/// On success every node is RESOLVED. On failure nothing is RESOLVED: nodes
/// that could not be resolved are marked ERROR and the rest keep their
/// state. A batch declaring the same id twice fails before any state change.
pub fn resolve(nodes: &mut [SystemNode]) -> Result<Vec<String>, ControlPlaneError> {
    let order = resolution_order(nodes)?;

    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let indices: Vec<usize> = order.iter().filter_map(|id| position.get(id.as_str()).copied()).collect();

    for i in indices {
        let node = &mut nodes[i];
        node.state = SystemState::Resolving;
        debug!(system = %node.id, "resolving system");
        node.state = SystemState::Resolved;
    }
    Ok(order)
}

/// Compute the resolution order without touching node state, except that
/// stuck nodes are marked ERROR on failure.
fn resolution_order(nodes: &mut [SystemNode]) -> Result<Vec<String>, ControlPlaneError> {
    let mut declared = HashSet::new();
    for node in nodes.iter() {
        if !declared.insert(node.id.as_str()) {
            return Err(ControlPlaneError::DuplicateSystemId(node.id.clone()));
        }
    }

    let mut resolved: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());

    while resolved.len() < nodes.len() {
        let mut progressed = false;
        for node in nodes.iter() {
            if resolved.contains(&node.id) {
                continue;
            }
            if node.dependencies.iter().all(|dep| resolved.contains(dep)) {
                resolved.insert(node.id.clone());
                order.push(node.id.clone());
                progressed = true;
            }
        }

        if !progressed {
            let stuck: Vec<String> = nodes
                .iter()
                .filter(|n| !resolved.contains(&n.id))
                .map(|n| n.id.clone())
                .collect();
            let missing = missing_dependencies(nodes);

            for cycle in find_cycles(nodes) {
                warn!(cycle = %cycle.join(" -> "), "dependency cycle in bring-up batch");
            }
            if !missing.is_empty() {
                warn!(missing = %missing.join(", "), "undeclared dependencies in bring-up batch");
            }

            for node in nodes.iter_mut().filter(|n| !resolved.contains(&n.id)) {
                node.state = SystemState::Error;
            }
            return Err(ControlPlaneError::CycleOrMissingDependency { stuck, missing });
        }
    }

    Ok(order)
}

/// Dependency ids referenced in the batch but not declared by any node, sorted.
pub fn missing_dependencies(nodes: &[SystemNode]) -> Vec<String> {
    let declared: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    nodes
        .iter()
        .flat_map(|n| n.dependencies.iter())
        .filter(|dep| !declared.contains(dep.as_str()))
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Dependency cycles among declared nodes, one id list per strongly
/// connected component (self-dependencies included).
pub fn find_cycles(nodes: &[SystemNode]) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for node in nodes {
        let from = indices[node.id.as_str()];
        for dep in &node.dependencies {
            if let Some(&to) = indices.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut ids: Vec<String> = scc.into_iter().map(|i| graph[i].to_string()).collect();
            ids.sort();
            ids
        })
        .collect();
    cycles.sort();
    cycles
}
