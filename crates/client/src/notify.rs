//! Notification dispatch. Scheduling is immediate and fire-and-forget:
//! delivery failures are logged and dropped.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::{error, info};

use crate::zone::ZoneId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub metadata: NotificationMeta,
}

/// Routing data attached to every notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMeta {
    pub system_key: ZoneId,
    pub kind: String,
}

pub trait Notifier: Send + Sync {
    fn schedule(&self, notification: &Notification);
}

/// Writes notifications to the log. Used when no push transport is
/// configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn schedule(&self, n: &Notification) {
        info!(
            zone = %n.metadata.system_key,
            kind = %n.metadata.kind,
            title = %n.title,
            "notification: {}",
            n.body
        );
    }
}

/// Publishes notifications as JSON to `notify/<uid>` for a push relay.
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
}

pub fn notify_topic(uid: &str) -> String {
    format!("notify/{uid}")
}

impl MqttNotifier {
    pub fn new(client: AsyncClient, uid: &str) -> Self {
        Self {
            client,
            topic: notify_topic(uid),
        }
    }
}

impl Notifier for MqttNotifier {
    fn schedule(&self, n: &Notification) {
        let payload = match serde_json::to_vec(n) {
            Ok(p) => p,
            Err(e) => {
                error!(zone = %n.metadata.system_key, "notification encode failed: {e}");
                return;
            }
        };
        if let Err(e) = self
            .client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
        {
            error!(zone = %n.metadata.system_key, topic = %self.topic, "notification publish failed: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
