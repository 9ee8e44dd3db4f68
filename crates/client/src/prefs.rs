//! The "notifications enabled" gate, persisted in a local key-value store.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Preference key. Values are the literal strings `"true"`/`"false"`.
pub const NOTIFICATIONS_ENABLED_KEY: &str = "notificationsEnabled";

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory copy of the preference, shared between the alert loop (which
/// reads it synchronously) and whoever toggles it.
#[derive(Debug, Clone)]
pub struct NotificationPreference {
    enabled: Arc<AtomicBool>,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NotificationPreference {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    /// Read the persisted value once. Unset means enabled; a store failure
    /// is logged and also falls back to enabled.
    pub async fn load<P: PreferenceStore>(store: &P) -> Self {
        let enabled = match store.get(NOTIFICATIONS_ENABLED_KEY).await {
            Ok(raw) => decode(raw.as_deref()),
            Err(e) => {
                warn!("failed to load notification preference: {e:#}");
                true
            }
        };
        info!(enabled, "notification preference loaded");
        Self::new(enabled)
    }

    pub fn get(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Takes effect immediately; the error only reports that persisting it
    /// failed.
    pub async fn set<P: PreferenceStore>(&self, store: &P, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::Relaxed);
        store
            .set(NOTIFICATIONS_ENABLED_KEY, encode(enabled))
            .await
            .context("failed to save notification preference")
    }
}

fn decode(raw: Option<&str>) -> bool {
    raw.map_or(true, |v| v == "true")
}

fn encode(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

// ===========================================================================
// Tests
// ===========================================================================
