//! Agent registry: lifecycle, heartbeats and the staleness sweep.
//!
//! Agents and health checks live in two `DashMap`s. Every operation mutates
//! one agent entry atomically (agent shard first, then health shard) and
//! publishes its event only after all map guards are released, so bus
//! handlers may call back into the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::agent::{Agent, AgentRegistration, AgentStatus, HealthCheck};
use conductor_types::config::RegistryConfig;
use conductor_types::error::{ControlPlaneError, RepositoryError};
use conductor_types::event::ControlEvent;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::event::EventBus;
use crate::storage::kv_store::KvStore;

/// Storage key of the agent snapshot.
pub const SNAPSHOT_KEY: &str = "registry/agents";

/// Heartbeat metadata key carrying the agent's measured response time.
pub const META_RESPONSE_TIME_MS: &str = "response_time_ms";

/// Owner of all agent state in one control-plane process.
pub struct AgentRegistry {
    agents: DashMap<String, Agent>,
    health: DashMap<String, HealthCheck>,
    bus: Arc<EventBus>,
    heartbeat_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(bus: Arc<EventBus>, heartbeat_timeout: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            health: DashMap::new(),
            bus,
            heartbeat_timeout,
        }
    }

    pub fn from_config(bus: Arc<EventBus>, config: &RegistryConfig) -> Self {
        Self::new(bus, config.heartbeat_timeout())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Register a new agent in ACTIVE status.
    ///
    /// Fails with `DuplicateAgentId` (leaving the existing agent untouched)
    /// if the id is already registered.
    pub fn register(&self, registration: AgentRegistration) -> Result<Agent, ControlPlaneError> {
        let agent = match self.agents.entry(registration.id.clone()) {
            Entry::Occupied(_) => {
                return Err(ControlPlaneError::DuplicateAgentId(registration.id));
            }
            Entry::Vacant(slot) => {
                let agent = Agent::from_registration(registration, AgentStatus::Active, Utc::now());
                slot.insert(agent.clone());
                agent
            }
        };

        info!(agent_id = %agent.id, agent_type = %agent.agent_type, "agent registered");
        self.bus.publish_event(&ControlEvent::AgentRegistered {
            agent_id: agent.id.clone(),
            agent_type: agent.agent_type.clone(),
            roles: agent.roles.clone(),
        });
        Ok(agent)
    }

    /// Remove an agent and its health check entirely.
    ///
    /// The same id can register again afterwards with fresh state.
    pub fn unregister(&self, id: &str) -> Result<Agent, ControlPlaneError> {
        let (_, agent) = self
            .agents
            .remove(id)
            .ok_or_else(|| ControlPlaneError::AgentNotFound(id.to_string()))?;
        self.health.remove(id);

        info!(agent_id = id, "agent unregistered");
        self.bus.publish_event(&ControlEvent::AgentUnregistered {
            agent_id: id.to_string(),
        });
        Ok(agent)
    }

    /// Record a liveness signal.
    ///
    /// Updates `last_heartbeat`, creates the health check on first use, marks
    /// it ACTIVE and merges `metadata` into it. An UNHEALTHY agent recovers to
    /// ACTIVE (publishing the status change). OFFLINE agents cannot heartbeat.
    pub fn heartbeat(
        &self,
        id: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<HealthCheck, ControlPlaneError> {
        let now = Utc::now();

        let (check, recovered) = {
            let mut agent = self
                .agents
                .get_mut(id)
                .ok_or_else(|| ControlPlaneError::AgentNotFound(id.to_string()))?;

            if agent.status.is_terminal() {
                return Err(ControlPlaneError::InvalidStatusTransition {
                    from: agent.status,
                    to: AgentStatus::Active,
                });
            }

            agent.last_heartbeat = now;
            let recovered = agent.status == AgentStatus::Unhealthy;
            if recovered {
                agent.status = AgentStatus::Active;
            }

            let mut check = self
                .health
                .entry(id.to_string())
                .or_insert_with(|| HealthCheck::new(id, AgentStatus::Active, now));
            check.status = AgentStatus::Active;
            check.last_heartbeat = now;
            if let Some(metadata) = metadata {
                if let Some(ms) = metadata.get(META_RESPONSE_TIME_MS).and_then(|v| v.as_u64()) {
                    check.response_time_ms = Some(ms);
                }
                check.metadata.extend(metadata);
            }

            (check.clone(), recovered)
        };

        debug!(agent_id = id, "heartbeat");
        if recovered {
            info!(agent_id = id, "agent recovered");
            self.bus.publish_event(&ControlEvent::AgentStatusChanged {
                agent_id: id.to_string(),
                old_status: AgentStatus::Unhealthy,
                new_status: AgentStatus::Active,
            });
        }
        Ok(check)
    }

    /// Move an agent to `status` along the lifecycle transition table.
    ///
    /// Setting the current status again is a no-op and publishes nothing.
    /// Returns the previous status.
    pub fn update_status(&self, id: &str, status: AgentStatus) -> Result<AgentStatus, ControlPlaneError> {
        let old = {
            let mut agent = self
                .agents
                .get_mut(id)
                .ok_or_else(|| ControlPlaneError::AgentNotFound(id.to_string()))?;

            let old = agent.status;
            if old == status {
                return Ok(old);
            }
            if !old.can_transition_to(status) {
                return Err(ControlPlaneError::InvalidStatusTransition { from: old, to: status });
            }
            agent.status = status;
            old
        };

        debug!(agent_id = id, %old, new = %status, "agent status changed");
        self.bus.publish_event(&ControlEvent::AgentStatusChanged {
            agent_id: id.to_string(),
            old_status: old,
            new_status: status,
        });
        Ok(old)
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.get(id).map(|a| a.value().clone())
    }

    pub fn health(&self, id: &str) -> Option<HealthCheck> {
        self.health.get(id).map(|h| h.value().clone())
    }

    /// Agents matching the optional type and status filters, sorted by id.
    pub fn list_agents(&self, agent_type: Option<&str>, status: Option<AgentStatus>) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| agent_type.is_none_or(|t| a.agent_type == t))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .map(|a| a.value().clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Demote every agent whose last heartbeat is older than the timeout.
    ///
    /// Scans a snapshot of ids, then mutates each agent on its own. Each
    /// stale agent's health-check `error_count` grows by one per sweep; the
    /// status event is published only when the agent actually moves to
    /// UNHEALTHY. Returns the ids demoted by this sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let Ok(timeout) = chrono::Duration::from_std(self.heartbeat_timeout) else {
            return Vec::new();
        };
        let threshold = now - timeout;

        let candidates: Vec<String> = self
            .agents
            .iter()
            .filter(|a| !a.status.is_terminal() && a.last_heartbeat < threshold)
            .map(|a| a.key().clone())
            .collect();

        let mut demoted = Vec::new();
        for id in candidates {
            let old = {
                let Some(mut agent) = self.agents.get_mut(&id) else {
                    continue;
                };
                // Re-check: the agent may have heartbeated since the snapshot.
                if agent.status.is_terminal() || agent.last_heartbeat >= threshold {
                    continue;
                }

                let old = agent.status;
                let demote = old.can_transition_to(AgentStatus::Unhealthy);
                if demote {
                    agent.status = AgentStatus::Unhealthy;
                }

                // The check mirrors the agent: a stale REGISTERING agent
                // counts errors but is not reported UNHEALTHY.
                let mut check = self
                    .health
                    .entry(id.clone())
                    .or_insert_with(|| HealthCheck::new(&id, old, agent.last_heartbeat));
                check.error_count += 1;
                check.status = agent.status;

                if !demote {
                    continue;
                }
                old
            };

            warn!(agent_id = %id, last_seen_before = %threshold, "agent missed heartbeat deadline");
            self.bus.publish_event(&ControlEvent::AgentStatusChanged {
                agent_id: id.clone(),
                old_status: old,
                new_status: AgentStatus::Unhealthy,
            });
            demoted.push(id);
        }
        demoted
    }

    /// Persist every agent as typed JSON under [`SNAPSHOT_KEY`].
    pub async fn save_snapshot<S: KvStore>(&self, store: &S) -> Result<usize, RepositoryError> {
        let agents = self.list_agents(None, None);
        let value = serde_json::to_value(&agents).map_err(|e| RepositoryError::Query(e.to_string()))?;
        store.set(SNAPSHOT_KEY, &value).await?;
        debug!(count = agents.len(), "saved registry snapshot");
        Ok(agents.len())
    }

    /// Load agents saved by [`save_snapshot`](Self::save_snapshot).
    ///
    /// OFFLINE agents and ids already registered are skipped. Restored agents
    /// keep their status and timestamps; no events are published. Returns the
    /// number of agents restored.
    pub async fn restore_snapshot<S: KvStore>(&self, store: &S) -> Result<usize, RepositoryError> {
        let Some(value) = store.get(SNAPSHOT_KEY).await? else {
            return Ok(0);
        };
        let agents: Vec<Agent> =
            serde_json::from_value(value).map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut restored = 0;
        for agent in agents {
            if agent.status.is_terminal() {
                continue;
            }
            if let Entry::Vacant(slot) = self.agents.entry(agent.id.clone()) {
                slot.insert(agent);
                restored += 1;
            }
        }
        info!(restored, "restored registry snapshot");
        Ok(restored)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.len())
            .field("health_checks", &self.health.len())
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::event::{Attributes, Message, TOPIC_AGENTS};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn registry() -> (AgentRegistry, UnboundedReceiver<Message>) {
        let bus = Arc::new(EventBus::default());
        let rx = bus
            .subscribe_channel("test-watch", TOPIC_AGENTS, Attributes::new())
            .unwrap();
        (AgentRegistry::new(bus, Duration::from_secs(60)), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.extend(ControlEvent::from_message(&msg));
        }
        events
    }

    fn crawler(id: &str) -> AgentRegistration {
        AgentRegistration::new(id, "crawler").with_roles(["worker"])
    }

    #[test]
    fn test_register_creates_active_agent_and_publishes() {
        let (registry, mut rx) = registry();
        let agent = registry.register(crawler("a")).unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert!(registry.health("a").is_none());

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![ControlEvent::AgentRegistered {
                agent_id: "a".to_string(),
                agent_type: "crawler".to_string(),
                roles: vec!["worker".to_string()],
            }]
        );
    }

    #[test]
    fn test_duplicate_register_fails_without_mutation() {
        let (registry, mut rx) = registry();
        let original = registry.register(crawler("a")).unwrap();
        drain(&mut rx);

        let err = registry
            .register(AgentRegistration::new("a", "analyzer"))
            .unwrap_err();
        assert_eq!(err, ControlPlaneError::DuplicateAgentId("a".to_string()));
        assert_eq!(registry.get("a").unwrap(), original);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_reregister_after_unregister_starts_fresh() {
        let (registry, _rx) = registry();
        registry.register(crawler("a")).unwrap();
        registry.heartbeat("a", None).unwrap();
        assert!(registry.health("a").is_some());

        registry.unregister("a").unwrap();
        assert!(registry.get("a").is_none());

        registry.register(crawler("a")).unwrap();
        assert!(registry.health("a").is_none());
    }

    #[test]
    fn test_unregister_unknown_agent() {
        let (registry, _rx) = registry();
        assert_eq!(
            registry.unregister("ghost").unwrap_err(),
            ControlPlaneError::AgentNotFound("ghost".to_string())
        );
    }

    #[test]
    fn test_heartbeat_creates_health_check_and_merges_metadata() {
        let (registry, _rx) = registry();
        registry.register(crawler("a")).unwrap();

        let mut meta = serde_json::Map::new();
        meta.insert("response_time_ms".to_string(), json!(42));
        meta.insert("queue".to_string(), json!(3));
        let check = registry.heartbeat("a", Some(meta)).unwrap();
        assert_eq!(check.status, AgentStatus::Active);
        assert_eq!(check.response_time_ms, Some(42));

        let mut more = serde_json::Map::new();
        more.insert("queue".to_string(), json!(0));
        let check = registry.heartbeat("a", Some(more)).unwrap();
        assert_eq!(check.metadata["queue"], json!(0));
        assert_eq!(check.response_time_ms, Some(42));
        assert_eq!(registry.get("a").unwrap().last_heartbeat, check.last_heartbeat);
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let (registry, _rx) = registry();
        assert!(matches!(
            registry.heartbeat("ghost", None),
            Err(ControlPlaneError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_update_status_publishes_old_and_new() {
        let (registry, mut rx) = registry();
        registry.register(crawler("a")).unwrap();
        drain(&mut rx);

        assert_eq!(registry.update_status("a", AgentStatus::Busy).unwrap(), AgentStatus::Active);
        // Self-transition is silent.
        registry.update_status("a", AgentStatus::Busy).unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![ControlEvent::AgentStatusChanged {
                agent_id: "a".to_string(),
                old_status: AgentStatus::Active,
                new_status: AgentStatus::Busy,
            }]
        );
    }

    #[test]
    fn test_offline_is_terminal() {
        let (registry, _rx) = registry();
        registry.register(crawler("a")).unwrap();
        registry.update_status("a", AgentStatus::Offline).unwrap();

        assert_eq!(
            registry.update_status("a", AgentStatus::Active).unwrap_err(),
            ControlPlaneError::InvalidStatusTransition {
                from: AgentStatus::Offline,
                to: AgentStatus::Active,
            }
        );
        assert!(matches!(
            registry.heartbeat("a", None),
            Err(ControlPlaneError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_list_agents_filters() {
        let (registry, _rx) = registry();
        registry.register(crawler("c1")).unwrap();
        registry.register(crawler("c2")).unwrap();
        registry.register(AgentRegistration::new("a1", "analyzer")).unwrap();
        registry.update_status("c2", AgentStatus::Idle).unwrap();

        assert_eq!(registry.list_agents(None, None).len(), 3);
        let crawlers: Vec<String> = registry
            .list_agents(Some("crawler"), None)
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(crawlers, vec!["c1", "c2"]);
        assert_eq!(registry.list_agents(Some("crawler"), Some(AgentStatus::Idle))[0].id, "c2");
        assert!(registry.list_agents(Some("analyzer"), Some(AgentStatus::Idle)).is_empty());
    }

    #[test]
    fn test_sweep_demotes_strictly_after_timeout() {
        let (registry, mut rx) = registry();
        let agent = registry.register(crawler("a")).unwrap();
        drain(&mut rx);
        let deadline = agent.last_heartbeat + chrono::Duration::seconds(60);

        assert!(registry.sweep(deadline).is_empty());
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Active);

        let demoted = registry.sweep(deadline + chrono::Duration::milliseconds(1));
        assert_eq!(demoted, vec!["a"]);
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Unhealthy);
        assert_eq!(registry.health("a").unwrap().error_count, 1);
        assert_eq!(
            drain(&mut rx),
            vec![ControlEvent::AgentStatusChanged {
                agent_id: "a".to_string(),
                old_status: AgentStatus::Active,
                new_status: AgentStatus::Unhealthy,
            }]
        );
    }

    #[test]
    fn test_repeated_sweeps_count_errors_but_publish_once() {
        let (registry, mut rx) = registry();
        let agent = registry.register(crawler("a")).unwrap();
        drain(&mut rx);
        let late = agent.last_heartbeat + chrono::Duration::seconds(120);

        registry.sweep(late);
        registry.sweep(late + chrono::Duration::seconds(30));
        assert_eq!(registry.health("a").unwrap().error_count, 2);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_sweep_skips_offline_agents() {
        let (registry, _rx) = registry();
        let agent = registry.register(crawler("a")).unwrap();
        registry.update_status("a", AgentStatus::Offline).unwrap();

        assert!(registry.sweep(agent.last_heartbeat + chrono::Duration::hours(1)).is_empty());
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Offline);
    }

    #[test]
    fn test_heartbeat_recovers_unhealthy_agent() {
        let (registry, mut rx) = registry();
        let agent = registry.register(crawler("a")).unwrap();
        registry.sweep(agent.last_heartbeat + chrono::Duration::seconds(61));
        drain(&mut rx);

        registry.heartbeat("a", None).unwrap();
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Active);
        assert_eq!(registry.health("a").unwrap().status, AgentStatus::Active);
        assert_eq!(
            drain(&mut rx),
            vec![ControlEvent::AgentStatusChanged {
                agent_id: "a".to_string(),
                old_status: AgentStatus::Unhealthy,
                new_status: AgentStatus::Active,
            }]
        );
    }

    #[test]
    fn test_handler_may_call_back_into_registry() {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&bus), Duration::from_secs(60)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = Arc::clone(&registry);
        let handler = crate::event::FnHandler::new(move |msg: &Message| {
            if let Some(ControlEvent::AgentRegistered { agent_id, .. }) = ControlEvent::from_message(msg) {
                let status = inner.get(&agent_id).map(|a| a.status);
                sink.lock().unwrap().push(status);
            }
            Ok(())
        });
        bus.subscribe("reentrant", TOPIC_AGENTS, Arc::new(handler), Attributes::new())
            .unwrap();

        registry.register(crawler("a")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(AgentStatus::Active)]);
    }

    // --- Snapshot ---

    #[derive(Default)]
    struct MapStore(Mutex<BTreeMap<String, serde_json::Value>>);

    impl KvStore for MapStore {
        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
            self.0.lock().unwrap().insert(key.to_string(), value.clone());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> Result<Vec<String>, RepositoryError> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_skips_offline() {
        let store = MapStore::default();
        let (source, _rx) = registry();
        source.register(crawler("a")).unwrap();
        source.register(crawler("b")).unwrap();
        source.update_status("a", AgentStatus::Busy).unwrap();
        source.update_status("b", AgentStatus::Offline).unwrap();
        assert_eq!(source.save_snapshot(&store).await.unwrap(), 2);

        let (target, _rx) = registry();
        assert_eq!(target.restore_snapshot(&store).await.unwrap(), 1);
        assert_eq!(target.get("a").unwrap().status, AgentStatus::Busy);
        assert!(target.get("b").is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_check_in_step_with_undemotable_agent() {
        let store = MapStore::default();
        let stale = Utc::now() - chrono::Duration::hours(1);
        let pending = Agent::from_registration(crawler("p"), AgentStatus::Registering, stale);
        store.set(SNAPSHOT_KEY, &json!([pending])).await.unwrap();

        let (registry, mut rx) = registry();
        assert_eq!(registry.restore_snapshot(&store).await.unwrap(), 1);

        assert!(registry.sweep(Utc::now()).is_empty());
        let check = registry.health("p").unwrap();
        assert_eq!(registry.get("p").unwrap().status, AgentStatus::Registering);
        assert_eq!(check.status, AgentStatus::Registering);
        assert_eq!(check.error_count, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_restore_from_empty_store() {
        let (registry, _rx) = registry();
        assert_eq!(registry.restore_snapshot(&MapStore::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_rejects_untyped_payload() {
        let store = MapStore::default();
        store.set(SNAPSHOT_KEY, &json!("__import__('os')")).await.unwrap();
        let (registry, _rx) = registry();
        assert!(matches!(
            registry.restore_snapshot(&store).await,
            Err(RepositoryError::Query(_))
        ));
    }
}
