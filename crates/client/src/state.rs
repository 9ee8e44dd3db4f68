use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::alerts::AlertEvent;
use crate::registry::ZoneRegistry;
use crate::view::{zone_views, ZoneView};
use crate::watcher::{Snapshot, WatchError, WatchItem};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<ClientState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct ClientState {
    pub started_at: Instant,
    pub uid: String,
    /// True until the watcher's first emission.
    pub loading: bool,
    /// Banner shown while the last emission was an error. Cleared by the
    /// next good snapshot.
    pub error: Option<WatchError>,
    pub snapshot: Option<Snapshot>,
    pub registry: ZoneRegistry,
    pub events: VecDeque<ClientEvent>,
}

#[derive(Clone, Serialize)]
pub struct ClientEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Snapshot,
    Alert,
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub uid: String,
    pub loading: bool,
    pub error: Option<String>,
    pub variant_count: usize,
    pub notifications_enabled: bool,
    pub zones: Vec<ZoneView>,
    pub events: Vec<ClientEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ClientState {
    pub fn new(uid: &str) -> Self {
        Self {
            started_at: Instant::now(),
            uid: uid.to_string(),
            loading: true,
            error: None,
            snapshot: None,
            registry: ZoneRegistry::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Fold one watcher emission in. A snapshot replaces the registry
    /// wholesale. `NotFound` drops the previous snapshot; a connection
    /// error keeps it on display under the banner.
    pub fn apply(&mut self, item: &WatchItem) {
        self.loading = false;
        match item {
            Ok(snap) => {
                self.error = None;
                self.registry = ZoneRegistry::from_snapshot(snap);
                self.snapshot = Some(snap.clone());
                let detail = format!("{} zones", self.registry.count());
                self.push_event(EventKind::Snapshot, detail);
            }
            Err(e) => {
                if *e == WatchError::NotFound {
                    self.snapshot = None;
                    self.registry = ZoneRegistry::default();
                }
                self.error = Some(e.clone());
                self.push_event(EventKind::Error, e.to_string());
            }
        }
    }

    pub fn record_alert(&mut self, alert: &AlertEvent) {
        self.push_event(EventKind::Alert, format!("{}: {}", alert.zone_id, alert.message));
    }

    /// Record an operator command and its outcome.
    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, notifications_enabled: bool) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            uid: self.uid.clone(),
            loading: self.loading,
            error: self.error.as_ref().map(ToString::to_string),
            variant_count: self.registry.variant_count(),
            notifications_enabled,
            zones: self.snapshot.as_deref().map(zone_views).unwrap_or_default(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ClientEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
