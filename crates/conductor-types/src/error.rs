use thiserror::Error;

use crate::agent::AgentStatus;

/// Errors returned by control-plane operations.
///
/// Expected conditions (not-found, duplicate, denied, rate limited) are
/// recoverable: the operation that returns them has not mutated any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("agent id '{0}' is already registered")]
    DuplicateAgentId(String),

    #[error("invalid status transition {from} -> {to}")]
    InvalidStatusTransition { from: AgentStatus, to: AgentStatus },

    #[error("agent '{agent_id}' is {status} and cannot receive requests")]
    AgentUnavailable { agent_id: String, status: AgentStatus },

    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),

    #[error("subscription id '{0}' already exists")]
    DuplicateSubscriptionId(String),

    #[error("no route for {method} {path}")]
    RouteNotFound { path: String, method: String },

    #[error("authentication required for {path}")]
    AuthenticationRequired { path: String },

    #[error("permission denied: {user_id} lacks {permission} on '{resource}' (policy '{policy}')")]
    PermissionDenied {
        user_id: String,
        resource: String,
        permission: String,
        policy: String,
    },

    #[error("rate limited: {user_id} exceeded {max_requests} requests per {window_secs}s on {path}")]
    RateLimited {
        user_id: String,
        path: String,
        max_requests: u32,
        window_secs: u64,
    },

    #[error("system id '{0}' declared more than once in bring-up batch")]
    DuplicateSystemId(String),

    #[error("cycle or missing dependency; stuck systems: [{}]", .stuck.join(", "))]
    CycleOrMissingDependency {
        /// Nodes that could not be resolved.
        stuck: Vec<String>,
        /// Dependency ids referenced but not declared in the batch.
        missing: Vec<String>,
    },

    #[error("cannot merge system '{id}' in state {state}")]
    MergeOfUnresolvedNode { id: String, state: String },
}

/// Errors from storage and secret ports (implemented in conductor-infra).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("read-only provider: {0}")]
    ReadOnly(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_stuck_ids() {
        let err = ControlPlaneError::CycleOrMissingDependency {
            stuck: vec!["a".to_string(), "b".to_string()],
            missing: vec![],
        };
        assert_eq!(
            err.to_string(),
            "cycle or missing dependency; stuck systems: [a, b]"
        );
    }

    #[test]
    fn test_transition_error_display() {
        let err = ControlPlaneError::InvalidStatusTransition {
            from: AgentStatus::Offline,
            to: AgentStatus::Active,
        };
        assert_eq!(err.to_string(), "invalid status transition offline -> active");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("bad json".to_string());
        assert_eq!(err.to_string(), "query error: bad json");
    }
}
