//! Snapshot consumer: folds every watcher emission into [`SharedState`] and
//! runs the alert dispatcher over each good snapshot.
//!
//! Emissions are handled strictly one at a time, so the registry other
//! tasks read is always derived from a single complete snapshot.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerts::AlertDispatcher;
use crate::lifecycle::provision_account;
use crate::session::Session;
use crate::state::SharedState;
use crate::store::RemoteStore;
use crate::watcher::{StateWatcher, WatchError, WatchItem};

/// Seeds a missing account once, the first time the watcher reports
/// `NotFound`.
pub struct Seeder<S> {
    store: Arc<S>,
    session: Session,
    done: bool,
}

impl<S: RemoteStore> Seeder<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self {
            store,
            session,
            done: false,
        }
    }

    async fn seed(&mut self, shared: &SharedState) {
        if self.done {
            return;
        }
        self.done = true;
        match provision_account(&*self.store, &self.session).await {
            Ok(()) => {
                info!(uid = %self.session.uid(), "seeded default account record");
                shared
                    .write()
                    .await
                    .record_system("seeded default account record".into());
            }
            Err(e) => {
                error!(uid = %self.session.uid(), "account seeding failed: {e}");
                shared
                    .write()
                    .await
                    .record_error(format!("account seeding failed: {e}"));
            }
        }
    }
}

/// Run until the watcher ends or `cancel` fires. Intended to be
/// `tokio::spawn`-ed from main.
pub async fn run<S: RemoteStore>(
    mut watcher: StateWatcher,
    shared: SharedState,
    mut dispatcher: AlertDispatcher,
    mut seeder: Option<Seeder<S>>,
    cancel: CancellationToken,
) {
    info!(policy = ?dispatcher.policy(), "monitor started");

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = watcher.next() => match item {
                Some(item) => item,
                None => break,
            },
        };

        handle(&item, &shared, &mut dispatcher).await;

        if let (Err(WatchError::NotFound), Some(seeder)) = (&item, seeder.as_mut()) {
            seeder.seed(&shared).await;
        }
    }

    watcher.unsubscribe();
    info!("monitor stopped");
}

async fn handle(item: &WatchItem, shared: &SharedState, dispatcher: &mut AlertDispatcher) {
    match item {
        Ok(snap) => {
            let alerts = dispatcher.dispatch(snap);
            let mut st = shared.write().await;
            st.apply(item);
            for alert in &alerts {
                st.record_alert(alert);
            }
        }
        Err(e) => {
            warn!("snapshot unavailable: {e}");
            shared.write().await.apply(item);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertPolicy;
    use crate::memory::MemoryStore;
    use crate::notify::{Notification, Notifier};
    use crate::prefs::NotificationPreference;
    use crate::state::{ClientState, EventKind};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Notification>>,
    }

    impl Notifier for Recorder {
        fn schedule(&self, n: &Notification) {
            self.sent.lock().unwrap().push(n.clone());
        }
    }

    fn dispatcher(rec: Arc<Recorder>) -> AlertDispatcher {
        AlertDispatcher::new(rec, NotificationPreference::new(true), AlertPolicy::EverySnapshot)
    }

    async fn wait_for<F: Fn(&ClientState) -> bool>(shared: &SharedState, cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if cond(&*shared.read().await) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn snapshots_update_state_and_fire_alerts() {
        let store = Arc::new(MemoryStore::with_root(json!({
            "users": { "u1": { "system0": { "temperature": 20 }, "system1": { "battery": 80 } } }
        })));
        let session = Session::new("u1");
        let watcher = StateWatcher::subscribe(&*store, &session).await.unwrap();
        let shared: SharedState = Arc::new(RwLock::new(ClientState::new("u1")));
        let rec = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run::<MemoryStore>(
            watcher,
            shared.clone(),
            dispatcher(rec.clone()),
            None,
            cancel.clone(),
        ));

        wait_for(&shared, |st| st.registry.count() == 2).await;
        assert!(rec.sent.lock().unwrap().is_empty());

        store.set("users/u1/system1/battery", json!(5)).await.unwrap();
        wait_for(&shared, |st| st.events.iter().any(|e| e.kind == EventKind::Alert)).await;
        assert_eq!(rec.sent.lock().unwrap()[0].title, "Low Battery Alert");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn not_found_seeds_account_once() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("fresh");
        let watcher = StateWatcher::subscribe(&*store, &session).await.unwrap();
        let shared: SharedState = Arc::new(RwLock::new(ClientState::new("fresh")));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            watcher,
            shared.clone(),
            dispatcher(Arc::new(Recorder::default())),
            Some(Seeder::new(store.clone(), session)),
            cancel.clone(),
        ));

        wait_for(&shared, |st| st.registry.count() == 2 && st.error.is_none()).await;
        assert!(store.get("users/fresh/system1").await.unwrap().is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn not_found_without_seeder_stays_in_error() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("ghost");
        let watcher = StateWatcher::subscribe(&*store, &session).await.unwrap();
        let shared: SharedState = Arc::new(RwLock::new(ClientState::new("ghost")));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run::<MemoryStore>(
            watcher,
            shared.clone(),
            dispatcher(Arc::new(Recorder::default())),
            None,
            cancel.clone(),
        ));

        wait_for(&shared, |st| !st.loading).await;
        assert_eq!(shared.read().await.error, Some(WatchError::NotFound));
        assert_eq!(store.get("users").await.unwrap(), None);

        cancel.cancel();
        task.await.unwrap();
    }
}
