use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use terralife_client::alerts::AlertDispatcher;
use terralife_client::config::{self, Config, NotifyTransport, StoreBackend};
use terralife_client::db::Db;
use terralife_client::lifecycle::ZoneLifecycle;
use terralife_client::memory::MemoryStore;
use terralife_client::monitor::{self, Seeder};
use terralife_client::mqtt::{self, MqttStore};
use terralife_client::notify::{LogNotifier, MqttNotifier, Notifier};
use terralife_client::prefs::NotificationPreference;
use terralife_client::session::Session;
use terralife_client::state::ClientState;
use terralife_client::store::RemoteStore;
use terralife_client::watcher::StateWatcher;
use terralife_client::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").ok();
    let cfg = config::load(config_path.as_deref())?;
    let session = Session::new(cfg.session.uid.clone());

    // ── Local preferences ───────────────────────────────────────────
    let db = Db::connect(&cfg.preferences.db_url).await?;
    db.migrate().await?;
    let notifications = NotificationPreference::load(&db).await;

    info!(
        uid = %session.uid(),
        backend = ?cfg.store.backend,
        policy = ?cfg.notifications.policy,
        "client starting"
    );

    // ── Realtime store ──────────────────────────────────────────────
    let cancel = CancellationToken::new();
    match cfg.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
            run(cfg, session, store, notifier, db, notifications, cancel).await
        }
        StoreBackend::Mqtt => {
            let store = Arc::new(MqttStore::start(
                mqtt::options(&cfg.store),
                cfg.store.initial_sync(),
                cancel.clone(),
            ));
            let notifier: Arc<dyn Notifier> = match cfg.notifications.transport {
                NotifyTransport::Log => Arc::new(LogNotifier),
                NotifyTransport::Mqtt => Arc::new(MqttNotifier::new(store.client(), session.uid())),
            };
            run(cfg, session, store, notifier, db, notifications, cancel).await
        }
    }
}

async fn run<S: RemoteStore>(
    cfg: Config,
    session: Session,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    db: Db,
    notifications: NotificationPreference,
    cancel: CancellationToken,
) -> Result<()> {
    // ── Shared state (ephemeral, for the operator API) ──────────────
    let shared = Arc::new(RwLock::new(ClientState::new(session.uid())));
    shared
        .write()
        .await
        .record_system("client started".to_string());

    // ── Snapshot monitor ────────────────────────────────────────────
    let watcher = StateWatcher::subscribe(&*store, &session).await?;
    let dispatcher = AlertDispatcher::new(notifier, notifications.clone(), cfg.notifications.policy);
    let seeder = cfg
        .session
        .seed_defaults
        .then(|| Seeder::new(store.clone(), session.clone()));
    let monitor = tokio::spawn(monitor::run(
        watcher,
        Arc::clone(&shared),
        dispatcher,
        seeder,
        cancel.clone(),
    ));

    // ── Operator API ────────────────────────────────────────────────
    let app = AppState {
        shared,
        lifecycle: ZoneLifecycle::new(store, session),
        notifications,
        db,
    };
    let web = tokio::spawn(web::serve(app, cfg.web.port));

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            info!("shutdown requested");
        }
        r = web => {
            r??;
        }
    }

    cancel.cancel();
    monitor.await?;
    info!("client stopped");
    Ok(())
}
