//! Fold resolved systems' data into one namespace.
//!
//! Keys are copied in processing order. When a key already exists and both
//! values are arrays, the arrays are concatenated; any other collision is
//! won by the later node (objects are replaced, not deep-merged).

use conductor_types::error::ControlPlaneError;
use conductor_types::system::{SystemNode, SystemState};
use serde_json::{Map, Value};
use tracing::debug;

/// Shared configuration namespace produced by a merge.
pub type Namespace = Map<String, Value>;

/// Merge every node, in slice order, into a fresh namespace.
///
/// All nodes must be RESOLVED; otherwise nothing is merged and the first
/// offending node is reported. Merged nodes end in MERGED.
pub fn merge(nodes: &mut [SystemNode]) -> Result<Namespace, ControlPlaneError> {
    if let Some(node) = nodes.iter().find(|n| n.state != SystemState::Resolved) {
        return Err(ControlPlaneError::MergeOfUnresolvedNode {
            id: node.id.clone(),
            state: node.state.to_string(),
        });
    }

    let mut namespace = Namespace::new();
    for node in nodes.iter_mut() {
        merge_data(&mut namespace, &node.data);
        node.state = SystemState::Merged;
        debug!(system = %node.id, keys = node.data.len(), "merged system");
    }
    Ok(namespace)
}

fn merge_data(namespace: &mut Namespace, data: &Map<String, Value>) {
    for (key, value) in data {
        if let (Some(Value::Array(existing)), Value::Array(incoming)) = (namespace.get_mut(key), value) {
            existing.extend(incoming.iter().cloned());
            continue;
        }
        namespace.insert(key.clone(), value.clone());
    }
}
