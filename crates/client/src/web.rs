use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::Db;
use crate::lifecycle::{LifecycleError, ZoneLifecycle};
use crate::prefs::NotificationPreference;
use crate::state::SharedState;
use crate::store::RemoteStore;
use crate::watcher::Snapshot;
use crate::zone::{SprinklerStatus, ZoneId, ZoneIdError};

pub struct AppState<S> {
    pub shared: SharedState,
    pub lifecycle: ZoneLifecycle<S>,
    pub notifications: NotificationPreference,
    pub db: Db,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            lifecycle: self.lifecycle.clone(),
            notifications: self.notifications.clone(),
            db: self.db.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub enum ApiError {
    Lifecycle(LifecycleError),
    BadZoneId(ZoneIdError),
    NoSnapshot,
    Preference(anyhow::Error),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}

impl From<ZoneIdError> for ApiError {
    fn from(e: ZoneIdError) -> Self {
        Self::BadZoneId(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            Self::Lifecycle(e) => {
                let status = match e {
                    LifecycleError::ProtectedZone => StatusCode::FORBIDDEN,
                    LifecycleError::CapacityExceeded => StatusCode::CONFLICT,
                    LifecycleError::UnknownZone(_) => StatusCode::NOT_FOUND,
                    LifecycleError::Store(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            Self::BadZoneId(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::NoSnapshot => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no snapshot received yet".to_string(),
            ),
            Self::Preference(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router<S: RemoteStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/status", get(api_status::<S>))
        .route("/api/zones", post(add_zone::<S>))
        .route("/api/zones/{id}", delete(delete_zone::<S>))
        .route("/api/zones/{id}/name", put(rename_zone::<S>))
        .route("/api/zones/{id}/enable", post(toggle_enable::<S>))
        .route("/api/sprinkler", post(toggle_sprinkler::<S>))
        .route(
            "/api/notifications",
            get(get_notifications::<S>).put(set_notifications::<S>),
        )
        .with_state(state)
}

async fn api_status<S: RemoteStore>(State(app): State<AppState<S>>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status(app.notifications.get()))
}

#[derive(Serialize)]
struct ZoneCreated {
    zone_id: ZoneId,
}

async fn add_zone<S: RemoteStore>(
    State(app): State<AppState<S>>,
) -> Result<impl IntoResponse, ApiError> {
    let snap = current_snapshot(&app).await?;
    let result = app.lifecycle.add_zone(&snap).await;
    record(&app, "add zone", &result).await;
    let zone_id = result?;
    Ok((StatusCode::CREATED, Json(ZoneCreated { zone_id })))
}

#[derive(Deserialize)]
struct RenameBody {
    name: String,
}

async fn rename_zone<S: RemoteStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id: ZoneId = id.parse()?;
    let snap = current_snapshot(&app).await?;
    let result = app.lifecycle.rename_zone(&snap, id, &body.name).await;
    record(&app, &format!("rename {id}"), &result).await;
    Ok(Json(json!({ "renamed": result? })))
}

async fn toggle_enable<S: RemoteStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: ZoneId = id.parse()?;
    let snap = current_snapshot(&app).await?;
    let result = app.lifecycle.toggle_enable(&snap, id).await;
    record(&app, &format!("toggle enable {id}"), &result).await;
    Ok(Json(json!({ "enabled": result? })))
}

async fn delete_zone<S: RemoteStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ZoneId = id.parse()?;
    let result = app.lifecycle.delete_zone(id).await;
    record(&app, &format!("delete {id}"), &result).await;
    result?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SprinklerToggled {
    sprinkler_status: SprinklerStatus,
}

async fn toggle_sprinkler<S: RemoteStore>(
    State(app): State<AppState<S>>,
) -> Result<impl IntoResponse, ApiError> {
    let snap = current_snapshot(&app).await?;
    let result = app.lifecycle.toggle_sprinkler(&snap).await;
    record(&app, "toggle sprinkler", &result).await;
    Ok(Json(SprinklerToggled {
        sprinkler_status: result?,
    }))
}

#[derive(Serialize, Deserialize)]
struct NotificationsBody {
    enabled: bool,
}

async fn get_notifications<S: RemoteStore>(State(app): State<AppState<S>>) -> impl IntoResponse {
    Json(NotificationsBody {
        enabled: app.notifications.get(),
    })
}

async fn set_notifications<S: RemoteStore>(
    State(app): State<AppState<S>>,
    Json(body): Json<NotificationsBody>,
) -> Result<impl IntoResponse, ApiError> {
    app.notifications
        .set(&app.db, body.enabled)
        .await
        .map_err(ApiError::Preference)?;
    app.shared
        .write()
        .await
        .record_command(format!("notifications enabled: {}", body.enabled));
    Ok(Json(NotificationsBody {
        enabled: app.notifications.get(),
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn current_snapshot<S>(app: &AppState<S>) -> Result<Snapshot, ApiError> {
    app.shared
        .read()
        .await
        .snapshot
        .clone()
        .ok_or(ApiError::NoSnapshot)
}

async fn record<S, T: std::fmt::Debug>(
    app: &AppState<S>,
    what: &str,
    result: &Result<T, LifecycleError>,
) {
    let mut st = app.shared.write().await;
    match result {
        Ok(v) => st.record_command(format!("{what}: {v:?}")),
        Err(e) => {
            warn!(command = what, "command failed: {e}");
            st.record_error(format!("{what} failed: {e}"));
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<S: RemoteStore>(state: AppState<S>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("operator api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
