//! Threshold alerts over a snapshot.
//!
//! [`evaluate`] is stateless: it looks at one snapshot and reports every
//! condition that currently holds. [`AlertDispatcher`] wraps it with the
//! notification gate, a firing policy and a [`Notifier`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::notify::{Notification, NotificationMeta, Notifier};
use crate::prefs::NotificationPreference;
use crate::registry::list_zone_ids;
use crate::zone::{UserGardenState, ZoneId};

/// Alert when the main zone is strictly hotter than this (°C).
pub const HIGH_TEMPERATURE_C: f64 = 36.0;
/// Alert when a reported battery level is strictly below this (%).
pub const LOW_BATTERY_PCT: f64 = 20.0;
/// Alert when a reported soil moisture is strictly below this (%).
pub const LOW_MOISTURE_PCT: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighTemperature,
    LowBattery,
    LowMoisture { sensor: u8 },
}

impl AlertKind {
    /// Short tag carried in notification metadata.
    pub fn tag(self) -> &'static str {
        match self {
            Self::HighTemperature => "temperature",
            Self::LowBattery => "battery",
            Self::LowMoisture { sensor: 1 } => "moisture1",
            Self::LowMoisture { .. } => "moisture2",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::HighTemperature => "High Temperature Alert",
            Self::LowBattery => "Low Battery Alert",
            Self::LowMoisture { .. } => "Low Soil Moisture Alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub zone_id: ZoneId,
    pub message: String,
}

impl AlertEvent {
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    pub fn to_notification(&self) -> Notification {
        Notification {
            title: self.title().to_string(),
            body: self.message.clone(),
            metadata: NotificationMeta {
                system_key: self.zone_id,
                kind: self.kind.tag().to_string(),
            },
        }
    }
}

/// Every threshold violation in `state`, main zone first, then sensor zones
/// in registry order (battery, moisture 1, moisture 2 per zone).
///
/// Sensor readings only alert when actually reported; a missing reading is
/// not treated as zero here. Disabled sensor zones are still evaluated.
pub fn evaluate(state: &UserGardenState, notifications_enabled: bool) -> Vec<AlertEvent> {
    if !notifications_enabled {
        return Vec::new();
    }

    let mut events = Vec::new();

    if let Some(main) = state.main() {
        if main.temperature > HIGH_TEMPERATURE_C {
            events.push(AlertEvent {
                kind: AlertKind::HighTemperature,
                zone_id: ZoneId::MAIN,
                message: format!(
                    "Temperature is {}°C - Your plants may be at risk!",
                    main.temperature
                ),
            });
        }
    }

    for id in list_zone_ids(state) {
        let Some(zone) = state.sensor(id) else { continue };
        let name = zone
            .system_name
            .clone()
            .unwrap_or_else(|| id.to_string());

        if let Some(battery) = zone.battery.filter(|b| *b < LOW_BATTERY_PCT) {
            events.push(AlertEvent {
                kind: AlertKind::LowBattery,
                zone_id: id,
                message: format!("{name} battery is at {battery}% - Please replace soon."),
            });
        }

        for (sensor, reading) in [(1u8, zone.soil_moisture1), (2, zone.soil_moisture2)] {
            if let Some(m) = reading.filter(|m| *m < LOW_MOISTURE_PCT) {
                events.push(AlertEvent {
                    kind: AlertKind::LowMoisture { sensor },
                    zone_id: id,
                    message: format!("{name} - Sensor {sensor} soil moisture is low ({m}%)."),
                });
            }
        }
    }

    events
}

/// When a condition that stays true keeps producing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertPolicy {
    /// Re-notify on every snapshot in which the condition holds.
    #[default]
    EverySnapshot,
    /// Notify once when a (zone, kind) condition becomes true; stay quiet
    /// until it clears and trips again.
    EdgeTriggered,
}

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    preference: NotificationPreference,
    policy: AlertPolicy,
    active: HashSet<(ZoneId, AlertKind)>,
}

impl AlertDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        preference: NotificationPreference,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            notifier,
            preference,
            policy,
            active: HashSet::new(),
        }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Evaluate `state` and schedule a notification for every event that
    /// passes the policy. Returns the events that were scheduled.
    pub fn dispatch(&mut self, state: &UserGardenState) -> Vec<AlertEvent> {
        let events = evaluate(state, self.preference.get());

        let events = match self.policy {
            AlertPolicy::EverySnapshot => events,
            AlertPolicy::EdgeTriggered => {
                let current: HashSet<_> = events.iter().map(|e| (e.zone_id, e.kind)).collect();
                let fresh: Vec<_> = events
                    .into_iter()
                    .filter(|e| !self.active.contains(&(e.zone_id, e.kind)))
                    .collect();
                self.active = current;
                fresh
            }
        };

        for event in &events {
            debug!(zone = %event.zone_id, kind = event.kind.tag(), "alert");
            self.notifier.schedule(&event.to_notification());
        }
        events
    }
}

// ===========================================================================
// Tests
// ===========================================================================
