//! Publish/subscribe channel for synchronization notifications.
//!
//! Dependent UI layers subscribe to a [`NotificationBus`] and receive every
//! [`Notification`] published after they subscribed. Publishing never blocks
//! and never fails; slow subscribers lag and skip old notifications.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Named notification topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "property_synced")]
    PropertySynced,
    #[serde(rename = "images_synced")]
    ImagesSynced,
    #[serde(rename = "incident-related")]
    IncidentRelated,
    #[serde(rename = "emergency-incident")]
    EmergencyIncident,
    #[serde(rename = "system-health-update")]
    SystemHealthUpdate,
    #[serde(rename = "sync_completed")]
    SyncCompleted,
    #[serde(rename = "sync_error")]
    SyncError,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::PropertySynced => "property_synced",
            Topic::ImagesSynced => "images_synced",
            Topic::IncidentRelated => "incident-related",
            Topic::EmergencyIncident => "emergency-incident",
            Topic::SystemHealthUpdate => "system-health-update",
            Topic::SyncCompleted => "sync_completed",
            Topic::SyncError => "sync_error",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: Topic,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(topic: Topic, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic,
            payload,
            timestamp,
        }
    }

    /// The `action` tag of the payload (`created`, `updated`, ...), if any.
    pub fn action(&self) -> Option<&str> {
        self.payload.get("action").and_then(Value::as_str)
    }
}

/// Broadcast channel shared by the service, the handlers and subscribers.
#[derive(Clone, Debug)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, notification: Notification) -> usize {
        tracing::trace!(topic = %notification.topic, "publishing notification");
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn emit(&self, topic: Topic, payload: Value, timestamp: DateTime<Utc>) -> usize {
        self.publish(Notification::new(topic, payload, timestamp))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event ids whose emergency notification already went out.
///
/// A retried event must not alert twice. Holds the most recent `capacity`
/// ids; clones share the same ledger.
#[derive(Clone, Debug)]
pub struct AlertLedger {
    capacity: usize,
    seen: Arc<Mutex<(VecDeque<String>, HashSet<String>)>>,
}

impl AlertLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Arc::default(),
        }
    }

    /// Record `event_id`. Returns `true` only the first time it is seen.
    pub fn first_alert(&self, event_id: &str) -> bool {
        let mut guard = self.seen.lock().unwrap();
        let (order, ids) = &mut *guard;
        if !ids.insert(event_id.to_string()) {
            return false;
        }
        order.push_back(event_id.to_string());
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                ids.remove(&oldest);
            }
        }
        true
    }
}

impl Default for AlertLedger {
    fn default() -> Self {
        Self::new(1024)
    }
}
