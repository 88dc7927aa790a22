/// Event fan-out: the in-process stand-in for the out-of-scope SSE/HTTP
/// transport. Out-of-process transport is out of scope here; this fixes the delivery
/// contract this module implements).
///
/// Delivery is best-effort, ordered per subscriber, using a bounded queue
/// per subscriber; on overflow the oldest undelivered event is dropped and
/// a `SystemEvent` fact is recorded.
use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::soil::{FactStore, FactType};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GardenEvent {
    pub kind: String,
    pub payload: JsonValue,
}

struct Subscriber {
    queue: Mutex<VecDeque<GardenEvent>>,
    kinds: Option<Vec<String>>,
}

/// Bound for each subscriber's queue. Exceeding it drops the oldest
/// undelivered event rather than blocking the publisher.
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<String, Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, optionally filtered to a set of event kinds.
    pub fn subscribe(&self, subscriber_id: impl Into<String>, kinds: Option<Vec<String>>) {
        self.subscribers.insert(
            subscriber_id.into(),
            Subscriber {
                queue: Mutex::new(VecDeque::new()),
                kinds,
            },
        );
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
    }

    /// Drain every event currently queued for a subscriber, oldest first.
    pub fn drain(&self, subscriber_id: &str) -> Vec<GardenEvent> {
        match self.subscribers.get(subscriber_id) {
            Some(entry) => entry.queue.lock().unwrap().drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Publish an event to every matching subscriber. Never blocks: a full
    /// queue makes room by popping its oldest entry before pushing the new
    /// one, and records a `SystemEvent` fact noting the drop.
    pub fn publish(&self, facts: &FactStore, event: GardenEvent) {
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if let Some(kinds) = &subscriber.kinds {
                if !kinds.iter().any(|k| k == &event.kind) {
                    continue;
                }
            }
            let mut queue = subscriber.queue.lock().unwrap();
            if queue.len() >= SUBSCRIBER_QUEUE_DEPTH {
                let dropped = queue.pop_front();
                drop(queue);
                if let Some(dropped) = dropped {
                    let _ = facts.add_fact(
                        FactType::SystemEvent,
                        serde_json::json!({
                            "kind": "subscriber_overflow",
                            "subscriber_id": entry.key(),
                            "dropped_event_kind": dropped.kind,
                        }),
                        None,
                    );
                }
                subscriber.queue.lock().unwrap().push_back(event.clone());
            } else {
                queue.push_back(event.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscriber_receives_matching_events_only() {
        let bus = EventBus::new();
        let facts = FactStore::new();
        bus.subscribe("sub1", Some(vec!["artifact_delta".to_string()]));

        bus.publish(
            &facts,
            GardenEvent {
                kind: "context_updated".to_string(),
                payload: json!({}),
            },
        );
        bus.publish(
            &facts,
            GardenEvent {
                kind: "artifact_delta".to_string(),
                payload: json!({"id": "core_a"}),
            },
        );

        let received = bus.drain("sub1");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, "artifact_delta");
    }

    #[test]
    fn overflow_drops_oldest_and_records_system_event() {
        let bus = EventBus::new();
        let facts = FactStore::new();
        bus.subscribers.insert(
            "sub1".to_string(),
            Subscriber {
                queue: Mutex::new(VecDeque::with_capacity(1)),
                kinds: None,
            },
        );

        // Fill a queue bounded (for this test) to depth 1 below, then push
        // past it by publishing at the real bound.
        for i in 0..SUBSCRIBER_QUEUE_DEPTH {
            bus.publish(
                &facts,
                GardenEvent {
                    kind: format!("evt{i}"),
                    payload: json!(null),
                },
            );
        }
        bus.publish(
            &facts,
            GardenEvent {
                kind: "overflow".to_string(),
                payload: json!(null),
            },
        );

        let system_events: Vec<_> = facts
            .list_facts(&crate::query::Filters::new())
            .into_iter()
            .filter(|f| f.fact_type == FactType::SystemEvent)
            .collect();
        assert_eq!(system_events.len(), 1);
        assert_eq!(system_events[0].data["dropped_event_kind"], json!("evt0"));

        let remaining = bus.drain("sub1");
        assert_eq!(remaining.len(), SUBSCRIBER_QUEUE_DEPTH);
        assert_eq!(remaining[0].kind, "evt1");
        assert_eq!(remaining.last().unwrap().kind, "overflow");
    }
}
