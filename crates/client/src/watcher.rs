//! Watches one user's record and turns store pushes into typed snapshots.
//!
//! Only the newest state matters, so emissions go through a `watch`
//! channel: a slow consumer skips intermediate snapshots instead of
//! queueing them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::store::{RemoteStore, StoreError, StoreEvent};
use crate::zone::UserGardenState;

pub type Snapshot = Arc<UserGardenState>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("no data available for this account")]
    NotFound,
}

pub type WatchItem = Result<Snapshot, WatchError>;

/// Live subscription to `users/{uid}`. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) stops the background task and
/// releases the store subscription.
pub struct StateWatcher {
    rx: watch::Receiver<Option<WatchItem>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl StateWatcher {
    pub async fn subscribe<S: RemoteStore>(store: &S, session: &Session) -> Result<Self, StoreError> {
        let mut sub = store.subscribe(&session.root_path()).await?;
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let uid = session.uid().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    ev = sub.recv() => {
                        let Some(ev) = ev else { break };
                        if tx.send(Some(to_item(&uid, ev))).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(uid = %uid, "state watcher stopped");
        });

        info!(uid = %session.uid(), "watching remote state");
        Ok(Self {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }

    /// True until the first emission of any kind arrives.
    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_none()
    }

    /// Most recent emission, if any.
    pub fn latest(&self) -> Option<WatchItem> {
        self.rx.borrow().clone()
    }

    /// Wait for the next emission. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<WatchItem> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(item) = self.rx.borrow_and_update().clone() {
                return Some(item);
            }
        }
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }

    pub fn into_stream(self) -> SnapshotStream {
        SnapshotStream {
            inner: WatchStream::from_changes(self.rx),
            _guard: self._guard,
        }
    }
}

fn to_item(uid: &str, ev: StoreEvent) -> WatchItem {
    match ev {
        StoreEvent::Value(Some(v)) => Ok(Arc::new(UserGardenState::from_value(&v))),
        StoreEvent::Value(None) => {
            warn!(uid, "no remote record for user");
            Err(WatchError::NotFound)
        }
        StoreEvent::Error(e) => {
            warn!(uid, "remote store error: {e}");
            Err(WatchError::Connection(e))
        }
    }
}

/// `Stream` view of a [`StateWatcher`]; owns the subscription.
pub struct SnapshotStream {
    inner: WatchStream<Option<WatchItem>>,
    _guard: DropGuard,
}

impl Stream for SnapshotStream {
    type Item = WatchItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Some(item)) => return Poll::Ready(Some(item)),
                Some(None) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
