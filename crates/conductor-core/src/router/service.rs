//! Policy router: resolves a logical request to a target agent.
//!
//! Checks run in a fixed order and stop at the first failure: route lookup,
//! authentication, every required policy, rate limit, target availability.
//! A rejected request consumes no rate-limit budget and publishes nothing.

use std::sync::Arc;

use conductor_types::error::ControlPlaneError;
use conductor_types::event::ControlEvent;
use conductor_types::policy::{Permission, Route, RouteDecision, RouteRequest, normalize_method};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::policy::PolicyEngine;
use super::rate_limit::RateLimiter;
use crate::event::EventBus;
use crate::registry::AgentRegistry;

/// Rate-limit key for requests without a user.
pub const ANONYMOUS_CALLER: &str = "anonymous";

pub struct PolicyRouter {
    /// (path, METHOD) -> route.
    routes: DashMap<(String, String), Route>,
    engine: PolicyEngine,
    limiter: RateLimiter,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
}

impl PolicyRouter {
    pub fn new(engine: PolicyEngine, registry: Arc<AgentRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            routes: DashMap::new(),
            engine,
            limiter: RateLimiter::new(),
            registry,
            bus,
        }
    }

    pub fn policies(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Install a route, replacing any route on the same (path, method).
    pub fn register_route(&self, mut route: Route) -> Option<Route> {
        route.method = normalize_method(&route.method);
        debug!(path = %route.path, method = %route.method, target = %route.target_agent_id, "route registered");
        self.routes
            .insert((route.path.clone(), route.method.clone()), route)
    }

    pub fn remove_route(&self, path: &str, method: &str) -> Option<Route> {
        self.routes
            .remove(&(path.to_string(), normalize_method(method)))
            .map(|(_, r)| r)
    }

    /// All routes, sorted by path then method.
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.routes.iter().map(|r| r.value().clone()).collect();
        routes.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
        routes
    }

    pub fn check_permission(&self, user_id: &str, resource: &str, permission: Permission) -> bool {
        self.engine.check_permission(user_id, resource, permission)
    }

    /// Route a request and announce the decision on the routing topic.
    pub fn route(&self, request: &RouteRequest) -> Result<RouteDecision, ControlPlaneError> {
        let method = normalize_method(&request.method);
        let route = self
            .routes
            .get(&(request.path.clone(), method.clone()))
            .map(|r| r.value().clone())
            .ok_or_else(|| ControlPlaneError::RouteNotFound {
                path: request.path.clone(),
                method: method.clone(),
            })?;

        let user_id = request.user_id.as_deref();
        if route.requires_auth() {
            let Some(user_id) = user_id else {
                return Err(ControlPlaneError::AuthenticationRequired {
                    path: route.path.clone(),
                });
            };
            self.authorize(&route, user_id)?;
        }

        let caller = user_id.unwrap_or(ANONYMOUS_CALLER);
        if let Some(limit) = &route.rate_limit {
            self.limiter.check(caller, &route.path, limit)?;
        }

        let target = self
            .registry
            .get(&route.target_agent_id)
            .ok_or_else(|| ControlPlaneError::AgentNotFound(route.target_agent_id.clone()))?;
        if !target.status.is_routable() {
            return Err(ControlPlaneError::AgentUnavailable {
                agent_id: target.id,
                status: target.status,
            });
        }

        if let Some(limit) = &route.rate_limit {
            self.limiter.acquire(caller, &route.path, limit)?;
        }

        let decision = RouteDecision {
            agent_id: target.id,
            path: route.path,
            method,
        };
        info!(
            path = %decision.path,
            method = %decision.method,
            user_id = caller,
            agent_id = %decision.agent_id,
            "request routed"
        );
        self.bus.publish_event(&ControlEvent::RequestRouted {
            path: decision.path.clone(),
            method: decision.method.clone(),
            user_id: request.user_id.clone(),
            agent_id: decision.agent_id.clone(),
        });
        Ok(decision)
    }

    /// Every required policy must grant the route's permission on its resource.
    fn authorize(&self, route: &Route, user_id: &str) -> Result<(), ControlPlaneError> {
        let resource = route.resource_name();
        for policy in &route.required_policies {
            match self
                .engine
                .policy_grants(policy, user_id, &resource, route.required_permission)
            {
                Some(true) => {}
                Some(false) => return Err(denied(user_id, &resource, route.required_permission, policy)),
                None => {
                    warn!(policy = %policy, path = %route.path, "route requires unknown policy");
                    return Err(denied(user_id, &resource, route.required_permission, policy));
                }
            }
        }
        Ok(())
    }
}

fn denied(user_id: &str, resource: &str, permission: Permission, policy: &str) -> ControlPlaneError {
    ControlPlaneError::PermissionDenied {
        user_id: user_id.to_string(),
        resource: resource.to_string(),
        permission: permission.to_string(),
        policy: policy.to_string(),
    }
}

impl std::fmt::Debug for PolicyRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRouter")
            .field("routes", &self.routes.len())
            .field("engine", &self.engine)
            .field("limiter", &self.limiter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::agent::{AgentRegistration, AgentStatus};
    use conductor_types::event::{Attributes, TOPIC_ROUTING};
    use conductor_types::policy::{Policy, RateLimit};
    use std::time::Duration;

    struct Fixture {
        router: PolicyRouter,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&bus), Duration::from_secs(60)));
        registry
            .register(AgentRegistration::new("x", "analyzer"))
            .unwrap();

        let engine = PolicyEngine::new();
        engine.add_policy(
            Policy::new("readers")
                .with_roles(["analyst"])
                .with_permissions([Permission::Read])
                .with_resources(["agents/x"]),
        );
        engine.add_policy(
            Policy::new("operators")
                .with_roles(["ops"])
                .with_permissions([Permission::Read, Permission::Execute])
                .with_resources(["*"]),
        );
        engine.assign_roles("bob", ["analyst"]);
        engine.assign_roles("alice", ["ops"]);

        let router = PolicyRouter::new(engine, Arc::clone(&registry), Arc::clone(&bus));
        Fixture { router, registry, bus }
    }

    #[test]
    fn test_route_not_found() {
        let f = fixture();
        let err = f.router.route(&RouteRequest::new("/nope", "GET", None)).unwrap_err();
        assert_eq!(
            err,
            ControlPlaneError::RouteNotFound {
                path: "/nope".to_string(),
                method: "GET".to_string(),
            }
        );
    }

    #[test]
    fn test_method_matching_is_case_insensitive() {
        let f = fixture();
        f.router.register_route(Route::new("/run", "post", "x"));
        let decision = f.router.route(&RouteRequest::new("/run", "POST", None)).unwrap();
        assert_eq!(decision.agent_id, "x");
        assert!(f.router.route(&RouteRequest::new("/run", "GET", None)).is_err());
    }

    #[test]
    fn test_authentication_required_without_user() {
        let f = fixture();
        f.router
            .register_route(Route::new("/run", "POST", "x").with_policies(["operators"]));
        assert_eq!(
            f.router.route(&RouteRequest::new("/run", "POST", None)).unwrap_err(),
            ControlPlaneError::AuthenticationRequired {
                path: "/run".to_string(),
            }
        );
    }

    #[test]
    fn test_read_only_user_denied_execute() {
        let f = fixture();
        f.router
            .register_route(Route::new("/run", "POST", "x").with_policies(["readers"]));

        let err = f
            .router
            .route(&RouteRequest::new("/run", "POST", Some("bob")))
            .unwrap_err();
        assert_eq!(
            err,
            ControlPlaneError::PermissionDenied {
                user_id: "bob".to_string(),
                resource: "agents/x".to_string(),
                permission: "execute".to_string(),
                policy: "readers".to_string(),
            }
        );
    }

    #[test]
    fn test_authorized_route_publishes_event() {
        let f = fixture();
        let mut rx = f
            .bus
            .subscribe_channel("watch", TOPIC_ROUTING, Attributes::new())
            .unwrap();
        f.router
            .register_route(Route::new("/run", "POST", "x").with_policies(["operators"]));

        let decision = f
            .router
            .route(&RouteRequest::new("/run", "POST", Some("alice")))
            .unwrap();
        assert_eq!(decision.agent_id, "x");

        let msg = rx.try_recv().unwrap();
        assert_eq!(
            ControlEvent::from_message(&msg),
            Some(ControlEvent::RequestRouted {
                path: "/run".to_string(),
                method: "POST".to_string(),
                user_id: Some("alice".to_string()),
                agent_id: "x".to_string(),
            })
        );
    }

    #[test]
    fn test_every_required_policy_must_grant() {
        let f = fixture();
        f.router.register_route(
            Route::new("/read", "GET", "x")
                .with_permission(Permission::Read)
                .with_policies(["readers", "operators"]),
        );
        // bob satisfies readers but not operators.
        assert!(matches!(
            f.router.route(&RouteRequest::new("/read", "GET", Some("bob"))),
            Err(ControlPlaneError::PermissionDenied { ref policy, .. }) if policy == "operators"
        ));
        f.router.policies().assign_roles("bob", ["ops"]);
        assert!(f.router.route(&RouteRequest::new("/read", "GET", Some("bob"))).is_ok());
    }

    #[test]
    fn test_unknown_policy_denies() {
        let f = fixture();
        f.router
            .register_route(Route::new("/run", "POST", "x").with_policies(["ghost"]));
        assert!(matches!(
            f.router.route(&RouteRequest::new("/run", "POST", Some("alice"))),
            Err(ControlPlaneError::PermissionDenied { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_trips_and_recovers() {
        let f = fixture();
        f.router.register_route(
            Route::new("/run", "POST", "x").with_rate_limit(RateLimit::new(2, Duration::from_secs(60))),
        );
        let request = RouteRequest::new("/run", "POST", Some("carol"));

        f.router.route(&request).unwrap();
        f.router.route(&request).unwrap();
        assert!(matches!(
            f.router.route(&request),
            Err(ControlPlaneError::RateLimited { .. })
        ));
        // Other callers have their own budget.
        assert!(f.router.route(&RouteRequest::new("/run", "POST", None)).is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(f.router.route(&request).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_consumes_no_budget() {
        let f = fixture();
        f.router.register_route(
            Route::new("/run", "POST", "x").with_rate_limit(RateLimit::new(1, Duration::from_secs(60))),
        );
        f.registry.update_status("x", AgentStatus::Unhealthy).unwrap();
        let request = RouteRequest::new("/run", "POST", Some("carol"));
        assert!(matches!(
            f.router.route(&request),
            Err(ControlPlaneError::AgentUnavailable { .. })
        ));

        f.registry.heartbeat("x", None).unwrap();
        assert!(f.router.route(&request).is_ok());
    }

    #[test]
    fn test_unregistered_target() {
        let f = fixture();
        f.router.register_route(Route::new("/run", "POST", "missing"));
        assert_eq!(
            f.router.route(&RouteRequest::new("/run", "POST", None)).unwrap_err(),
            ControlPlaneError::AgentNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_register_route_replaces_same_path_and_method() {
        let f = fixture();
        assert!(f.router.register_route(Route::new("/run", "POST", "x")).is_none());
        let replaced = f.router.register_route(Route::new("/run", "post", "y"));
        assert_eq!(replaced.unwrap().target_agent_id, "x");
        assert_eq!(f.router.routes().len(), 1);
        assert!(f.router.remove_route("/run", "Post").is_some());
        assert!(f.router.routes().is_empty());
    }
}
