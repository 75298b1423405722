//! Topic-based event bus with filtered push delivery and pull access.
//!
//! Each topic keeps an append-only message log (capped by retention) and an
//! ordered list of subscriptions. Publishing appends the message and delivers
//! it synchronously to every subscriber whose filter is a subset of the
//! message attributes.
//!
//! Delivery order: a topic has at most one active drainer. `publish` pushes
//! onto the topic's pending queue under the topic lock; whoever finds the
//! topic idle becomes the drainer and delivers queued messages one by one
//! with the lock released. Per-subscriber order therefore equals log order,
//! and a handler that publishes back into the same topic cannot deadlock.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use conductor_types::config::BusConfig;
use conductor_types::error::ControlPlaneError;
use conductor_types::event::{Attributes, ControlEvent, Message, SubscriptionInfo, TopicInfo};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::handler::{ChannelHandler, MessageHandler};

/// A registered interest in a topic.
struct Subscription {
    info: SubscriptionInfo,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct TopicState {
    log: VecDeque<Message>,
    pending: VecDeque<Message>,
    draining: bool,
    /// Subscription ids in subscribe order.
    subscribers: Vec<String>,
}

#[derive(Default)]
struct Topic {
    state: Mutex<TopicState>,
}

impl Topic {
    fn lock(&self) -> MutexGuard<'_, TopicState> {
        // Handlers never run under this lock, so poisoning only follows a
        // panic inside our own bookkeeping; the state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process publish/subscribe hub for the control plane.
pub struct EventBus {
    topics: DashMap<String, Arc<Topic>>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    /// 0 = unbounded.
    max_messages_per_topic: usize,
}

impl EventBus {
    /// Create a bus whose topic logs keep at most `max_messages_per_topic`
    /// messages (0 keeps everything).
    pub fn new(max_messages_per_topic: usize) -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            max_messages_per_topic,
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.max_messages_per_topic)
    }

    /// Get or create a topic, cloning the handle out of the map guard.
    fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic.value());
        }
        let entry = self.topics.entry(name.to_string()).or_insert_with(|| {
            debug!(topic = name, "created topic");
            Arc::new(Topic::default())
        });
        Arc::clone(entry.value())
    }

    /// Publish a message and deliver it to matching subscribers.
    ///
    /// Creates the topic if absent. Always returns the new message id;
    /// handler failures are logged per subscriber and never surface here.
    pub fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        attributes: Attributes,
    ) -> Uuid {
        let message = Message::new(topic, payload, attributes);
        let id = message.id;
        let handle = self.topic(topic);

        let should_drain = {
            let mut state = handle.lock();
            state.log.push_back(message.clone());
            if self.max_messages_per_topic > 0 {
                while state.log.len() > self.max_messages_per_topic {
                    state.log.pop_front();
                }
            }
            state.pending.push_back(message);
            !std::mem::replace(&mut state.draining, true)
        };

        if should_drain {
            self.drain(&handle);
        }

        debug!(topic, message_id = %id, "published message");
        id
    }

    /// Publish a control-plane event on its topic with its standard attributes.
    pub fn publish_event(&self, event: &ControlEvent) -> Uuid {
        let payload = serde_json::to_value(event).unwrap_or_else(|e| {
            warn!(error = %e, kind = event.kind(), "failed to serialize control event");
            serde_json::Value::Null
        });
        self.publish(event.topic(), payload, event.attributes())
    }

    /// Deliver pending messages until the queue is empty.
    fn drain(&self, topic: &Topic) {
        loop {
            let (message, subscriber_ids) = {
                let mut state = topic.lock();
                match state.pending.pop_front() {
                    Some(message) => (message, state.subscribers.clone()),
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            for subscription_id in subscriber_ids {
                // Unsubscribed since the snapshot was taken.
                let Some(subscription) = self
                    .subscriptions
                    .get(&subscription_id)
                    .map(|s| Arc::clone(s.value()))
                else {
                    continue;
                };

                if !message.matches(&subscription.info.filter) {
                    continue;
                }

                let outcome = catch_unwind(AssertUnwindSafe(|| subscription.handler.handle(&message)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        subscription_id = %subscription_id,
                        topic = %message.topic,
                        message_id = %message.id,
                        error = %e,
                        "subscriber handler failed"
                    ),
                    Err(_) => warn!(
                        subscription_id = %subscription_id,
                        topic = %message.topic,
                        message_id = %message.id,
                        "subscriber handler panicked"
                    ),
                }
            }
        }
    }

    /// Register a subscription. Creates the topic if absent.
    ///
    /// An empty `filter` receives every message on the topic.
    pub fn subscribe(
        &self,
        id: &str,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        filter: Attributes,
    ) -> Result<(), ControlPlaneError> {
        let info = SubscriptionInfo {
            id: id.to_string(),
            topic: topic.to_string(),
            filter,
            created_at: Utc::now(),
        };

        match self.subscriptions.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ControlPlaneError::DuplicateSubscriptionId(id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Subscription { info, handler }));
            }
        }

        self.topic(topic).lock().subscribers.push(id.to_string());
        debug!(subscription_id = id, topic, "subscribed");
        Ok(())
    }

    /// Subscribe with a channel handler and return its receiver.
    pub fn subscribe_channel(
        &self,
        id: &str,
        topic: &str,
        filter: Attributes,
    ) -> Result<mpsc::UnboundedReceiver<Message>, ControlPlaneError> {
        let (handler, receiver) = ChannelHandler::new();
        self.subscribe(id, topic, Arc::new(handler), filter)?;
        Ok(receiver)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: &str) -> Result<(), ControlPlaneError> {
        let (_, subscription) = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| ControlPlaneError::SubscriptionNotFound(id.to_string()))?;

        if let Some(topic) = self.topics.get(&subscription.info.topic).map(|t| Arc::clone(t.value())) {
            topic.lock().subscribers.retain(|s| s != id);
        }
        debug!(subscription_id = id, topic = %subscription.info.topic, "unsubscribed");
        Ok(())
    }

    /// The most recent `max` messages on the subscription's topic that match
    /// its filter, oldest first.
    pub fn pull(&self, subscription_id: &str, max: usize) -> Result<Vec<Message>, ControlPlaneError> {
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| ControlPlaneError::SubscriptionNotFound(subscription_id.to_string()))?;

        let topic = self.topic(&subscription.info.topic);
        let state = topic.lock();
        let mut recent: Vec<Message> = state
            .log
            .iter()
            .rev()
            .filter(|m| m.matches(&subscription.info.filter))
            .take(max)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    /// Snapshot of every topic with its log size and subscriber count.
    pub fn topics(&self) -> Vec<TopicInfo> {
        let handles: Vec<(String, Arc<Topic>)> = self
            .topics
            .iter()
            .map(|t| (t.key().clone(), Arc::clone(t.value())))
            .collect();

        let mut infos: Vec<TopicInfo> = handles
            .into_iter()
            .map(|(name, topic)| {
                let state = topic.lock();
                TopicInfo {
                    name,
                    message_count: state.log.len(),
                    subscriber_count: state.subscribers.len(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Metadata for every live subscription.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .subscriptions
            .iter()
            .map(|s| s.value().info.clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("max_messages_per_topic", &self.max_messages_per_topic)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::handler::{FnHandler, HandlerError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn recorder() -> (Arc<Mutex<Vec<Uuid>>>, Arc<dyn MessageHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler::new(move |msg: &Message| {
            sink.lock().unwrap().push(msg.id);
            Ok(())
        });
        (seen, Arc::new(handler))
    }

    #[test]
    fn publish_without_subscribers_retains_message_for_pull() {
        let bus = EventBus::default();
        let id = bus.publish("orders", json!({"n": 1}), Attributes::new());

        // A late subscriber can still pull the retained message.
        let (_, handler) = recorder();
        bus.subscribe("late", "orders", handler, Attributes::new()).unwrap();
        let pulled = bus.pull("late", 10).unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].id, id);
    }

    #[test]
    fn filtered_subscription_skips_non_matching_messages() {
        let bus = EventBus::default();
        let (seen, handler) = recorder();
        bus.subscribe("prod-only", "deploys", handler, attrs(&[("env", "prod")]))
            .unwrap();

        bus.publish("deploys", json!({}), attrs(&[("env", "dev")]));
        let prod = bus.publish("deploys", json!({}), attrs(&[("env", "prod"), ("region", "eu")]));

        assert_eq!(*seen.lock().unwrap(), vec![prod]);
    }

    #[test]
    fn failing_handler_does_not_block_other_subscribers() {
        let bus = EventBus::default();
        let failing = FnHandler::new(|_: &Message| Err(HandlerError::Failed("boom".to_string())));
        bus.subscribe("a-failing", "t", Arc::new(failing), Attributes::new())
            .unwrap();
        let (seen, handler) = recorder();
        bus.subscribe("b-ok", "t", handler, Attributes::new()).unwrap();

        let id = bus.publish("t", json!(1), Attributes::new());
        assert_eq!(*seen.lock().unwrap(), vec![id]);
    }

    #[test]
    fn panicking_handler_is_isolated_and_topic_keeps_flowing() {
        let bus = EventBus::default();
        let panicking = FnHandler::new(|_: &Message| -> Result<(), HandlerError> {
            panic!("handler bug")
        });
        bus.subscribe("panics", "t", Arc::new(panicking), Attributes::new())
            .unwrap();
        let (seen, handler) = recorder();
        bus.subscribe("ok", "t", handler, Attributes::new()).unwrap();

        let first = bus.publish("t", json!(1), Attributes::new());
        let second = bus.publish("t", json!(2), Attributes::new());
        assert_eq!(*seen.lock().unwrap(), vec![first, second]);
    }

    #[test]
    fn handler_publishing_to_same_topic_is_delivered_after_current() {
        let bus = Arc::new(EventBus::default());
        let (seen, handler) = recorder();
        bus.subscribe("observer", "t", handler, Attributes::new()).unwrap();

        let inner_bus = Arc::clone(&bus);
        let echo = FnHandler::new(move |msg: &Message| {
            if msg.attributes.get("echo").is_none() {
                inner_bus.publish("t", json!("echo"), attrs(&[("echo", "1")]));
            }
            Ok(())
        });
        bus.subscribe("echoer", "t", Arc::new(echo), Attributes::new())
            .unwrap();

        let original = bus.publish("t", json!("original"), Attributes::new());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], original);
    }

    #[test]
    fn concurrent_publishers_preserve_log_order_per_subscriber() {
        let bus = Arc::new(EventBus::new(0));
        let (seen, handler) = recorder();
        bus.subscribe("audit", "t", handler, Attributes::new()).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let bus = Arc::clone(&bus);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        bus.publish("t", json!({"w": w, "i": i}), Attributes::new());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let log: Vec<Uuid> = bus.pull("audit", 1000).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(log.len(), 200);
        assert_eq!(*seen.lock().unwrap(), log);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::default();
        let (seen, handler) = recorder();
        bus.subscribe("s", "t", handler, Attributes::new()).unwrap();
        bus.publish("t", json!(1), Attributes::new());

        bus.unsubscribe("s").unwrap();
        bus.publish("t", json!(2), Attributes::new());

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(
            bus.unsubscribe("s"),
            Err(ControlPlaneError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn duplicate_subscription_id_is_rejected() {
        let bus = EventBus::default();
        let (_, handler) = recorder();
        bus.subscribe("s", "t", Arc::clone(&handler), Attributes::new())
            .unwrap();
        let err = bus.subscribe("s", "other", handler, Attributes::new()).unwrap_err();
        assert_eq!(err, ControlPlaneError::DuplicateSubscriptionId("s".to_string()));
        assert_eq!(bus.subscriptions().len(), 1);
    }

    #[test]
    fn pull_returns_most_recent_oldest_first() {
        let bus = EventBus::default();
        let (_, handler) = recorder();
        bus.subscribe("s", "t", handler, Attributes::new()).unwrap();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| bus.publish("t", json!(i), Attributes::new()))
            .collect();

        let pulled: Vec<Uuid> = bus.pull("s", 2).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(pulled, ids[3..].to_vec());
    }

    #[test]
    fn pull_unknown_subscription_errors() {
        let bus = EventBus::default();
        assert!(matches!(
            bus.pull("ghost", 1),
            Err(ControlPlaneError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn retention_drops_oldest_messages() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.publish("t", json!(i), Attributes::new());
        }
        let (_, handler) = recorder();
        bus.subscribe("s", "t", handler, Attributes::new()).unwrap();

        let payloads: Vec<serde_json::Value> =
            bus.pull("s", 10).unwrap().into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn topics_are_created_on_subscribe_and_publish() {
        let bus = EventBus::default();
        let (_, handler) = recorder();
        bus.subscribe("s", "alpha", handler, Attributes::new()).unwrap();
        bus.publish("beta", json!(null), Attributes::new());

        let topics = bus.topics();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "alpha");
        assert_eq!(topics[0].subscriber_count, 1);
        assert_eq!(topics[1].message_count, 1);
    }

    #[tokio::test]
    async fn channel_subscription_receives_control_events() {
        let bus = EventBus::default();
        let mut rx = bus
            .subscribe_channel("watch", conductor_types::event::TOPIC_AGENTS, Attributes::new())
            .unwrap();

        let event = ControlEvent::AgentUnregistered {
            agent_id: "a".to_string(),
        };
        bus.publish_event(&event);

        let msg = rx.recv().await.unwrap();
        assert_eq!(ControlEvent::from_message(&msg), Some(event));
        assert_eq!(msg.attributes.get("event").unwrap(), "agent_unregistered");
    }

    #[test]
    fn counting_handler_sees_each_message_once() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handler = FnHandler::new(move |_: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.subscribe("c", "t", Arc::new(handler), Attributes::new())
            .unwrap();
        for _ in 0..3 {
            bus.publish("t", json!(null), Attributes::new());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::default();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("subscriptions"));
    }
}
