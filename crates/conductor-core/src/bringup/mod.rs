//! Bring-up: resolve a batch of declared systems, then merge their data.
//!
//! [`bring_up`] works on a copy of the batch and writes node states back
//! only once the outcome is known, so a failed batch never leaves a node
//! RESOLVED or MERGED.

pub mod merger;
pub mod resolver;

use std::collections::HashMap;

use conductor_types::error::ControlPlaneError;
use conductor_types::system::SystemNode;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use merger::{Namespace, merge};
pub use resolver::{find_cycles, missing_dependencies, resolve};

/// Outcome of a successful bring-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BringUpReport {
    /// System ids in resolution (and merge) order.
    pub order: Vec<String>,
    pub namespace: Namespace,
}

/// Resolve and merge a batch atomically.
///
/// On success every node ends MERGED. On a cycle or missing dependency the
/// stuck nodes end ERROR and all others keep their state.
pub fn bring_up(nodes: &mut [SystemNode]) -> Result<BringUpReport, ControlPlaneError> {
    let mut work = nodes.to_vec();
    let result = resolve(&mut work).and_then(|order| {
        let mut by_id: HashMap<String, SystemNode> =
            work.iter().map(|n| (n.id.clone(), n.clone())).collect();
        let mut ordered: Vec<SystemNode> = order.iter().filter_map(|id| by_id.remove(id)).collect();
        let namespace = merge(&mut ordered)?;
        Ok((order, ordered, namespace))
    });

    match result {
        Ok((order, merged, namespace)) => {
            let states: HashMap<&str, _> = merged.iter().map(|n| (n.id.as_str(), n.state)).collect();
            for node in nodes.iter_mut() {
                if let Some(&state) = states.get(node.id.as_str()) {
                    node.state = state;
                }
            }
            info!(systems = order.len(), keys = namespace.len(), "bring-up complete");
            Ok(BringUpReport { order, namespace })
        }
        Err(e) => {
            // The resolver marks stuck nodes; carry those marks back.
            for (node, worked) in nodes.iter_mut().zip(work.iter()) {
                node.state = worked.state;
            }
            Err(e)
        }
    }
}
