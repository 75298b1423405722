//! Role-based access control over named policies.
//!
//! A user holds a set of roles. A policy applies to the user when its role
//! set intersects theirs, and grants a permission on a resource when the
//! permission is in its set and one of its resource patterns matches.

use std::collections::BTreeSet;

use conductor_types::policy::{Permission, Policy, UserRoles};
use dashmap::DashMap;
use tracing::debug;

/// Policy table plus user role assignments.
#[derive(Default)]
pub struct PolicyEngine {
    policies: DashMap<String, Policy>,
    user_roles: DashMap<String, BTreeSet<String>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from configured policies and role assignments.
    pub fn with_config(policies: &[Policy], user_roles: &[UserRoles]) -> Self {
        let engine = Self::new();
        for policy in policies {
            engine.add_policy(policy.clone());
        }
        for assignment in user_roles {
            engine.assign_roles(&assignment.user_id, assignment.roles.iter().cloned());
        }
        engine
    }

    /// Insert or replace a policy by name. Returns the replaced policy.
    pub fn add_policy(&self, policy: Policy) -> Option<Policy> {
        debug!(policy = %policy.name, "policy added");
        self.policies.insert(policy.name.clone(), policy)
    }

    pub fn remove_policy(&self, name: &str) -> Option<Policy> {
        self.policies.remove(name).map(|(_, p)| p)
    }

    pub fn policy(&self, name: &str) -> Option<Policy> {
        self.policies.get(name).map(|p| p.value().clone())
    }

    /// All policies, sorted by name.
    pub fn policies(&self) -> Vec<Policy> {
        let mut policies: Vec<Policy> = self.policies.iter().map(|p| p.value().clone()).collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        policies
    }

    /// Add roles to a user (existing roles are kept).
    pub fn assign_roles<I, S>(&self, user_id: &str, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = self.user_roles.entry(user_id.to_string()).or_default();
        entry.extend(roles.into_iter().map(Into::into));
    }

    /// Drop every role of a user. Returns the roles removed.
    pub fn revoke_roles(&self, user_id: &str) -> Vec<String> {
        self.user_roles
            .remove(user_id)
            .map(|(_, roles)| roles.into_iter().collect())
            .unwrap_or_default()
    }

    /// The user's roles, sorted. Unknown users have none.
    pub fn roles_for(&self, user_id: &str) -> Vec<String> {
        self.user_roles
            .get(user_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff some policy applying to the user's roles grants `permission`
    /// on `resource`.
    pub fn check_permission(&self, user_id: &str, resource: &str, permission: Permission) -> bool {
        let roles = self.roles_for(user_id);
        self.policies
            .iter()
            .any(|p| p.applies_to(&roles) && p.covers(resource, permission))
    }

    /// Whether the named policy grants `permission` on `resource` to the user.
    ///
    /// `None` if no such policy exists.
    pub fn policy_grants(
        &self,
        policy_name: &str,
        user_id: &str,
        resource: &str,
        permission: Permission,
    ) -> Option<bool> {
        let roles = self.roles_for(user_id);
        self.policies
            .get(policy_name)
            .map(|p| p.applies_to(&roles) && p.covers(resource, permission))
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("policies", &self.policies.len())
            .field("users", &self.user_roles.len())
            .finish()
    }
}
