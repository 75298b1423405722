//! Access-policy and routing types.
//!
//! A `Policy` is a named grant of {roles} x {permissions} x {resource patterns}.
//! A `Route` maps a logical (path, method) pair to a target agent, gated by
//! required policies and an optional rate limit.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operation class a policy can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Execute => write!(f, "execute"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "execute" => Ok(Permission::Execute),
            "admin" => Ok(Permission::Admin),
            other => Err(format!("invalid permission: '{other}'")),
        }
    }
}

/// A resource pattern: either the wildcard `*` or an exact resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourcePattern {
    Any,
    Exact(String),
}

impl ResourcePattern {
    pub fn matches(&self, resource: &str) -> bool {
        match self {
            ResourcePattern::Any => true,
            ResourcePattern::Exact(name) => name == resource,
        }
    }
}

impl From<String> for ResourcePattern {
    fn from(value: String) -> Self {
        if value == "*" {
            ResourcePattern::Any
        } else {
            ResourcePattern::Exact(value)
        }
    }
}

impl From<&str> for ResourcePattern {
    fn from(value: &str) -> Self {
        ResourcePattern::from(value.to_string())
    }
}

impl From<ResourcePattern> for String {
    fn from(value: ResourcePattern) -> Self {
        match value {
            ResourcePattern::Any => "*".to_string(),
            ResourcePattern::Exact(name) => name,
        }
    }
}

/// A named, administratively defined access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<Permission>,
    pub resources: Vec<ResourcePattern>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            resources: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn with_resources<I, R>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourcePattern>,
    {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Whether any of `user_roles` is in this policy's role set.
    pub fn applies_to<'a>(&self, user_roles: impl IntoIterator<Item = &'a String>) -> bool {
        user_roles.into_iter().any(|role| self.roles.contains(role))
    }

    /// Whether this policy grants `permission` on `resource` (role check excluded).
    pub fn covers(&self, resource: &str, permission: Permission) -> bool {
        self.permissions.contains(&permission)
            && self.resources.iter().any(|pattern| pattern.matches(resource))
    }
}

/// Time-windowed request budget for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum requests per caller per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_secs: window.as_secs().max(1),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_permission() -> Permission {
    Permission::Execute
}

/// Mapping from a logical request path to a target agent.
///
/// One route per (path, method).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub method: String,
    pub target_agent_id: String,
    #[serde(default)]
    pub required_policies: Vec<String>,
    /// Permission each required policy must grant. Defaults to `execute`.
    #[serde(default = "default_permission")]
    pub required_permission: Permission,
    /// Resource checked against policy patterns. Defaults to `agents/<target>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

impl Route {
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        target_agent_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method: normalize_method(&method.into()),
            target_agent_id: target_agent_id.into(),
            required_policies: Vec::new(),
            required_permission: default_permission(),
            resource: None,
            rate_limit: None,
        }
    }

    pub fn with_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_policies = policies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.required_permission = permission;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// The resource name permission checks run against.
    pub fn resource_name(&self) -> String {
        self.resource
            .clone()
            .unwrap_or_else(|| format!("agents/{}", self.target_agent_id))
    }

    /// A route requires an authenticated caller iff it names any policy.
    pub fn requires_auth(&self) -> bool {
        !self.required_policies.is_empty()
    }
}

/// Methods compare case-insensitively; they are stored uppercase.
pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// A logical request submitted to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub path: String,
    pub method: String,
    pub user_id: Option<String>,
}

impl RouteRequest {
    pub fn new(path: impl Into<String>, method: impl Into<String>, user_id: Option<&str>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            user_id: user_id.map(str::to_string),
        }
    }
}

/// Successful routing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub agent_id: String,
    pub path: String,
    pub method: String,
}

/// Role assignment for one user (the `[[user_roles]]` config entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoles {
    pub user_id: String,
    pub roles: Vec<String>,
}
