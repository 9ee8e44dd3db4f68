//! In-process realtime store. Behaves like the remote one (push on change,
//! wholesale values, delete-on-empty) and lets tests inject failures.

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::store::{self, RemoteStore, StoreError, StoreEvent, Subscription};

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    fail_writes: Option<String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            inner: Mutex::new(Inner {
                root,
                subscribers: Vec::new(),
                fail_writes: None,
            }),
        }
    }

    /// Make every subsequent `set`/`remove` fail with `reason` (or succeed
    /// again with `None`).
    pub async fn fail_writes(&self, reason: Option<String>) {
        self.inner.lock().await.fail_writes = reason;
    }

    /// Deliver a transport error to every live subscription.
    pub async fn inject_connection_error(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .subscribers
            .retain(|s| s.tx.send(StoreEvent::Error(reason.to_string())).is_ok());
    }

    /// Current value at `path`, bypassing subscriptions.
    pub async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segs = store::segments(path)?;
        let inner = self.inner.lock().await;
        Ok(store::get_at(&inner.root, &segs).cloned())
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segs = store::segments(path)?;
        let mut inner = self.inner.lock().await;
        if let Some(reason) = inner.fail_writes.clone() {
            return Err(StoreError::Rejected {
                path: path.to_string(),
                reason,
            });
        }

        store::set_at(&mut inner.root, &segs, value);
        debug!(path, "memory store write");

        let Inner {
            root, subscribers, ..
        } = &mut *inner;
        subscribers.retain(|s| {
            if !store::overlaps(&s.path, &segs) {
                return !s.tx.is_closed();
            }
            let current = store::get_at(root, &s.path).cloned();
            s.tx.send(StoreEvent::Value(current)).is_ok()
        });
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let segs = store::segments(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let current = store::get_at(&inner.root, &segs).cloned();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(StoreEvent::Value(current));
        inner.subscribers.push(Subscriber {
            path: segs.into_iter().map(str::to_string).collect(),
            tx,
        });
        Ok(rx)
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write(path, value).await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.write(path, Value::Null).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
