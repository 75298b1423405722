//! Declared "systems" for bring-up resolution and merge.
//!
//! A `SystemNode` is a unit of declared configuration with named
//! dependencies. It exists for one bring-up cycle only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bring-up state of a system node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    #[default]
    Unresolved,
    Resolving,
    Resolved,
    Merged,
    Error,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Unresolved => "unresolved",
            SystemState::Resolving => "resolving",
            SystemState::Resolved => "resolved",
            SystemState::Merged => "merged",
            SystemState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One declared system in a bring-up batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: SystemState,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl SystemNode {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            state: SystemState::Unresolved,
            data: serde_json::Map::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults_name_to_id() {
        let node = SystemNode::new("db").depends_on(["base"]).with_data("port", json!(5432));
        assert_eq!(node.name, "db");
        assert_eq!(node.state, SystemState::Unresolved);
        assert_eq!(node.dependencies, vec!["base"]);
        assert_eq!(node.data["port"], 5432);
    }

    #[test]
    fn test_deserialize_declaration_without_state() {
        let node: SystemNode = serde_json::from_str(
            r#"{"id": "cache", "name": "Cache", "dependencies": ["base"], "data": {"tags": ["x"]}}"#,
        )
        .unwrap();
        assert_eq!(node.state, SystemState::Unresolved);
        assert_eq!(node.data["tags"], json!(["x"]));
    }
}
