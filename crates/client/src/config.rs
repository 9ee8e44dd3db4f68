//! TOML config file loading, environment overrides and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::alerts::AlertPolicy;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub preferences: PreferencesConfig,
    pub web: WebConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub uid: String,
    /// Write the default two-zone record when the account has none.
    pub seed_defaults: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Mqtt,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// How long a new subscription collects retained messages before its
    /// first emission.
    pub initial_sync_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mqtt,
            host: "localhost".into(),
            port: 1883,
            client_id: "terralife-client".into(),
            initial_sync_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn initial_sync(&self) -> Duration {
        Duration::from_millis(self.initial_sync_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    pub db_url: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite:terralife.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyTransport {
    #[default]
    Log,
    Mqtt,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub transport: NotifyTransport,
    pub policy: AlertPolicy,
}

/// Longest accepted settle window for a new subscription.
const MAX_INITIAL_SYNC_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `TERRALIFE_UID`, `MQTT_HOST`, `MQTT_PORT`, `DB_URL` and
    /// `WEB_PORT` on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uid) = lookup("TERRALIFE_UID") {
            self.session.uid = uid;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.store.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.store.port = port
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {port}"))?;
        }
        if let Some(url) = lookup("DB_URL") {
            self.preferences.db_url = url;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("WEB_PORT is not a port number: {port}"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_session(&mut errors);
        self.validate_store(&mut errors);
        self.validate_local(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_session(&self, errors: &mut Vec<String>) {
        let uid = &self.session.uid;
        if uid.trim().is_empty() {
            errors.push("session.uid is empty (set it or TERRALIFE_UID)".into());
        } else if uid.contains(['/', '+', '#']) {
            errors.push(format!(
                "session.uid '{uid}' must not contain '/', '+' or '#'"
            ));
        }
    }

    fn validate_store(&self, errors: &mut Vec<String>) {
        let s = &self.store;
        if s.backend == StoreBackend::Mqtt {
            if s.host.trim().is_empty() {
                errors.push("store.host is empty".into());
            }
            if s.port == 0 {
                errors.push("store.port must be non-zero".into());
            }
            if s.client_id.trim().is_empty() {
                errors.push("store.client_id is empty".into());
            }
        }
        if !(1..=MAX_INITIAL_SYNC_MS).contains(&s.initial_sync_ms) {
            errors.push(format!(
                "store.initial_sync_ms {} out of range [1, {MAX_INITIAL_SYNC_MS}]",
                s.initial_sync_ms
            ));
        }
        if self.notifications.transport == NotifyTransport::Mqtt && s.backend != StoreBackend::Mqtt
        {
            errors.push("notifications.transport = \"mqtt\" requires store.backend = \"mqtt\"".into());
        }
    }

    fn validate_local(&self, errors: &mut Vec<String>) {
        let url = &self.preferences.db_url;
        if !url.starts_with("sqlite:") {
            errors.push(format!(
                "preferences.db_url '{url}' must be a sqlite: connection string"
            ));
        }
        if self.web.port == 0 {
            errors.push("web.port must be non-zero".into());
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read when no explicit path is given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// An explicit path always wins. Otherwise `fallback` is used if it exists.
fn resolve_path(explicit: Option<&str>, fallback: &str) -> Option<String> {
    match explicit {
        Some(path) => Some(path.to_string()),
        None => Path::new(fallback).exists().then(|| fallback.to_string()),
    }
}

/// Read and parse a TOML config file (`path`, else `config.toml` when
/// present), or start from defaults. Environment overrides are applied
/// before validation.
pub fn load(path: Option<&str>) -> Result<Config> {
    let path = resolve_path(path, DEFAULT_CONFIG_PATH);
    let mut config = match path.as_deref() {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate().context("invalid config")?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
