//! [`RemoteStore`] over an MQTT broker.
//!
//! Every leaf field is a retained topic equal to its store path
//! (`users/u1/system0/sprinklerStatus`) carrying the JSON-encoded value. An
//! empty retained payload deletes the leaf. The store keeps a local mirror
//! rebuilt from incoming publishes and hands subscribers full subtree
//! values, so consumers see the same wholesale-replace semantics as any
//! other backend.
//!
//! Writes are not applied to the mirror directly; they become visible when
//! the broker echoes them back on the subscription. After a reconnect the
//! mirror is rebuilt from scratch out of the fresh retained burst.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::store::{self, RemoteStore, StoreError, StoreEvent, Subscription};

/// Pause after a connection error before polling again.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Subscription filter covering `path` and everything below it.
pub(crate) fn subtree_filter(path: &str) -> String {
    format!("{path}/#")
}

pub(crate) fn encode_payload(value: &Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// `None` means delete. Payloads that are not JSON are kept as strings so a
/// hand-published `ON` still reads as `"ON"`.
pub(crate) fn decode_payload(payload: &[u8]) -> Option<Value> {
    if payload.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned())),
    )
}

pub fn options(cfg: &StoreConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(30));
    opts
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    path: Vec<String>,
    tx: mpsc::UnboundedSender<StoreEvent>,
    /// Set once the initial retained burst has had time to arrive.
    primed: bool,
}

#[derive(Default)]
struct Mirror {
    root: Value,
    subscribers: Vec<Subscriber>,
    filters: Vec<String>,
    next_id: u64,
}

impl Mirror {
    fn add(&mut self, path: Vec<String>, tx: mpsc::UnboundedSender<StoreEvent>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            path,
            tx,
            primed: false,
        });
        id
    }

    fn remember_filter(&mut self, filter: String) {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
    }

    /// Start delivering to subscriber `id`, beginning with the current value.
    fn prime(&mut self, id: u64) {
        let Mirror {
            root, subscribers, ..
        } = self;
        subscribers.retain_mut(|s| {
            if s.id != id {
                return true;
            }
            s.primed = true;
            let current = store::get_at(root, &s.path).cloned();
            s.tx.send(StoreEvent::Value(current)).is_ok()
        });
    }

    /// Forget everything learned from the previous connection. Retained
    /// leaves cleared while disconnected are never redelivered as empty
    /// publishes, so the tree is rebuilt from the fresh retained burst.
    /// Returns the ids of the subscribers to prime once it has settled.
    fn reset(&mut self) -> Vec<u64> {
        self.root = Value::Null;
        self.subscribers
            .iter_mut()
            .map(|s| {
                s.primed = false;
                s.id
            })
            .collect()
    }

    /// Fold one incoming publish into the tree and notify affected
    /// subscribers.
    fn apply(&mut self, topic: &str, payload: &[u8]) {
        let segs = match store::segments(topic) {
            Ok(s) => s,
            Err(e) => {
                warn!(topic, "ignoring publish: {e}");
                return;
            }
        };
        match decode_payload(payload) {
            Some(v) => store::set_at(&mut self.root, &segs, v),
            None => store::remove_at(&mut self.root, &segs),
        }

        let Mirror {
            root, subscribers, ..
        } = self;
        subscribers.retain(|s| {
            if !s.primed || !store::overlaps(&s.path, &segs) {
                return !s.tx.is_closed();
            }
            let current = store::get_at(root, &s.path).cloned();
            s.tx.send(StoreEvent::Value(current)).is_ok()
        });
    }

    fn broadcast_error(&mut self, msg: &str) {
        self.subscribers
            .retain(|s| s.tx.send(StoreEvent::Error(msg.to_string())).is_ok());
    }

    /// Topics of every leaf currently stored under `path`.
    fn leaves_under(&self, path: &str, segs: &[&str]) -> Vec<String> {
        store::get_at(&self.root, segs)
            .map(|v| store::leaves(path, v).into_iter().map(|(p, _)| p).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct MqttStore {
    client: AsyncClient,
    mirror: Arc<Mutex<Mirror>>,
    initial_sync: Duration,
}

impl MqttStore {
    /// Create the client and spawn the event-loop driver. The driver runs
    /// until `cancel` fires.
    pub fn start(options: MqttOptions, initial_sync: Duration, cancel: CancellationToken) -> Self {
        let (client, eventloop) = AsyncClient::new(options, 64);
        let mirror = Arc::new(Mutex::new(Mirror::default()));
        tokio::spawn(drive(
            eventloop,
            client.clone(),
            mirror.clone(),
            initial_sync,
            cancel,
        ));
        Self {
            client,
            mirror,
            initial_sync,
        }
    }

    /// Handle for publishing outside the store (notifications).
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| StoreError::Connection(format!("publish to '{topic}' failed: {e}")))
    }

    async fn clear(&self, topics: &[String]) -> Result<(), StoreError> {
        for topic in topics {
            self.publish(topic, Vec::new()).await?;
        }
        Ok(())
    }
}

impl RemoteStore for MqttStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let segs = store::segments(path)?;
        let filter = subtree_filter(path);
        self.client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| StoreError::Connection(format!("subscribe to '{filter}' failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut m = self.mirror.lock().await;
            m.remember_filter(filter);
            m.add(segs.iter().map(|s| s.to_string()).collect(), tx)
        };

        settle_then_prime(self.mirror.clone(), self.initial_sync, vec![id]);

        debug!(path, "mqtt subscription registered");
        Ok(rx)
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segs = store::segments(path)?;
        let fresh = store::leaves(path, &value);
        for (topic, _) in &fresh {
            store::segments(topic)?;
        }

        let stale: Vec<String> = {
            let m = self.mirror.lock().await;
            m.leaves_under(path, &segs)
        }
        .into_iter()
        .filter(|old| !fresh.iter().any(|(topic, _)| topic == old))
        .collect();

        self.clear(&stale).await?;
        for (topic, leaf) in &fresh {
            self.publish(topic, encode_payload(leaf)).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let segs = store::segments(path)?;
        let existing = self.mirror.lock().await.leaves_under(path, &segs);
        self.clear(&existing).await
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Let the retained burst arrive, then start delivering to `ids`.
fn settle_then_prime(mirror: Arc<Mutex<Mirror>>, settle: Duration, ids: Vec<u64>) {
    tokio::spawn(async move {
        sleep(settle).await;
        let mut m = mirror.lock().await;
        for id in ids {
            m.prime(id);
        }
    });
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    mirror: Arc<Mutex<Mirror>>,
    initial_sync: Duration,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ev = eventloop.poll() => ev,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                mirror.lock().await.apply(&p.topic, &p.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Sessions are clean, so subscriptions do not survive a
                // reconnect.
                let (filters, ids) = {
                    let mut m = mirror.lock().await;
                    (m.filters.clone(), m.reset())
                };
                for f in filters {
                    if let Err(e) = client.try_subscribe(f.as_str(), QoS::AtLeastOnce) {
                        warn!(filter = %f, "resubscribe failed: {e}");
                    }
                }
                settle_then_prime(mirror.clone(), initial_sync, ids);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                mirror
                    .lock()
                    .await
                    .broadcast_error(&format!("mqtt error: {e}"));
                sleep(RECONNECT_DELAY).await;
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!("mqtt disconnect on shutdown failed: {e}");
    }
    info!("mqtt driver stopped");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(m: &mut Mirror, path: &str) -> (u64, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = m.add(path.split('/').map(str::to_string).collect(), tx);
        (id, rx)
    }

    // -- payloads -----------------------------------------------------------

    #[test]
    fn payload_encoding() {
        assert_eq!(encode_payload(&json!("ON")), b"\"ON\"".to_vec());
        assert_eq!(encode_payload(&json!(42.5)), b"42.5".to_vec());
        assert_eq!(encode_payload(&json!(true)), b"true".to_vec());
    }

    #[test]
    fn payload_decoding() {
        assert_eq!(decode_payload(b""), None);
        assert_eq!(decode_payload(b"17"), Some(json!(17)));
        assert_eq!(decode_payload(b"\"OFF\""), Some(json!("OFF")));
        assert_eq!(decode_payload(b"ON"), Some(json!("ON")));
    }

    #[test]
    fn filter_covers_subtree() {
        assert_eq!(subtree_filter("users/u1"), "users/u1/#");
    }

    #[test]
    fn options_from_config() {
        let cfg = StoreConfig {
            host: "broker".into(),
            port: 1999,
            client_id: "c1".into(),
            ..StoreConfig::default()
        };
        let opts = options(&cfg);
        assert_eq!(opts.broker_address(), ("broker".to_string(), 1999));
        assert_eq!(opts.client_id(), "c1");
        assert_eq!(opts.keep_alive(), Duration::from_secs(30));
    }

    // -- mirror -------------------------------------------------------------

    #[test]
    fn unprimed_subscriber_waits_for_settle() {
        let mut m = Mirror::default();
        let (id, mut rx) = sub(&mut m, "users/u1");

        m.apply("users/u1/system0/humidity", b"40");
        m.apply("users/u1/system1/battery", b"90");
        assert!(rx.try_recv().is_err());

        m.prime(id);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Value(Some(json!({
                "system0": { "humidity": 40 },
                "system1": { "battery": 90 }
            })))
        );
    }

    #[test]
    fn prime_with_no_data_reports_absence() {
        let mut m = Mirror::default();
        let (id, mut rx) = sub(&mut m, "users/nobody");
        m.prime(id);
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Value(None));
    }

    #[test]
    fn primed_subscriber_gets_full_subtree_per_publish() {
        let mut m = Mirror::default();
        let (id, mut rx) = sub(&mut m, "users/u1");
        m.prime(id);
        rx.try_recv().unwrap();

        m.apply("users/u1/system0/sprinklerStatus", b"\"ON\"");
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Value(Some(json!({ "system0": { "sprinklerStatus": "ON" } })))
        );

        m.apply("users/u2/system0/sprinklerStatus", b"\"ON\"");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_payload_deletes_and_prunes() {
        let mut m = Mirror::default();
        let (id, mut rx) = sub(&mut m, "users/u1");
        m.apply("users/u1/system2/battery", b"5");
        m.prime(id);
        rx.try_recv().unwrap();

        m.apply("users/u1/system2/battery", b"");
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Value(None));
        assert_eq!(m.root, json!({}));
    }

    #[test]
    fn invalid_topic_is_ignored() {
        let mut m = Mirror::default();
        m.apply("users//x", b"1");
        assert_eq!(m.root, Value::Null);
    }

    #[test]
    fn errors_reach_every_subscriber() {
        let mut m = Mirror::default();
        let (_, mut a) = sub(&mut m, "users/u1");
        let (id, mut b) = sub(&mut m, "users/u2");
        m.prime(id);
        b.try_recv().unwrap();

        m.broadcast_error("mqtt error: refused");
        assert_eq!(a.try_recv().unwrap(), StoreEvent::Error("mqtt error: refused".into()));
        assert_eq!(b.try_recv().unwrap(), StoreEvent::Error("mqtt error: refused".into()));
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let mut m = Mirror::default();
        let (id, rx) = sub(&mut m, "users/u1");
        drop(rx);
        m.prime(id);
        assert!(m.subscribers.is_empty());
    }

    #[test]
    fn leaves_under_lists_topics() {
        let mut m = Mirror::default();
        m.apply("users/u1/system1/battery", b"5");
        m.apply("users/u1/system1/enable", b"true");
        m.apply("users/u1/system2/battery", b"7");

        let mut topics = m.leaves_under("users/u1/system1", &["users", "u1", "system1"]);
        topics.sort();
        assert_eq!(
            topics,
            vec!["users/u1/system1/battery", "users/u1/system1/enable"]
        );
        assert!(m
            .leaves_under("users/u1/system9", &["users", "u1", "system9"])
            .is_empty());
    }

    #[test]
    fn reconnect_drops_leaves_cleared_while_offline() {
        let mut m = Mirror::default();
        let (id, mut rx) = sub(&mut m, "users/u1");
        m.apply("users/u1/system1/battery", b"90");
        m.apply("users/u1/system2/battery", b"5");
        m.prime(id);
        rx.try_recv().unwrap();

        assert_eq!(m.reset(), vec![id]);
        m.apply("users/u1/system1/battery", b"88");
        assert!(rx.try_recv().is_err());

        m.prime(id);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Value(Some(json!({ "system1": { "battery": 88 } })))
        );
        assert!(m
            .leaves_under("users/u1/system2", &["users", "u1", "system2"])
            .is_empty());
    }

    #[test]
    fn filters_are_deduplicated() {
        let mut m = Mirror::default();
        m.remember_filter(subtree_filter("users/u1"));
        m.remember_filter(subtree_filter("users/u1"));
        assert_eq!(m.filters, vec!["users/u1/#"]);
    }

    #[tokio::test]
    async fn writes_validate_paths_before_publishing() {
        let cancel = CancellationToken::new();
        let store = MqttStore::start(
            MqttOptions::new("test-store", "127.0.0.1", 1883),
            Duration::from_millis(10),
            cancel.clone(),
        );
        assert!(matches!(
            store.set("users/u1/system0", json!({ "bad+key": 1 })).await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(store.remove("").await, Err(StoreError::InvalidPath(_))));
        cancel.cancel();
    }
}
