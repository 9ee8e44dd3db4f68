//! Operator-facing rendering of a snapshot: display names, status labels
//! and the per-zone JSON shown by the status endpoint.

use serde::{Serialize, Serializer};

use crate::alerts::HIGH_TEMPERATURE_C;
use crate::registry::list_zone_ids;
use crate::zone::{SprinklerStatus, UserGardenState, ZoneId, ZoneRecord};

pub const NOT_AVAILABLE: &str = "Not available";

/// Serialized as its display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoistureStatus {
    Overwatered,
    WellWatered,
    Good,
    NeedsWater,
}

impl MoistureStatus {
    pub fn from_pct(pct: f64) -> Self {
        if pct > 90.0 {
            Self::Overwatered
        } else if pct > 70.0 {
            Self::WellWatered
        } else if pct > 40.0 {
            Self::Good
        } else {
            Self::NeedsWater
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Overwatered => "Overwatered",
            Self::WellWatered => "Well watered",
            Self::Good => "Good",
            Self::NeedsWater => "Needs water",
        }
    }
}

impl Serialize for MoistureStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    Full,
    Half,
    Low,
    Critical,
}

impl BatteryLevel {
    pub fn from_pct(pct: f64) -> Self {
        if pct >= 75.0 {
            Self::Full
        } else if pct >= 50.0 {
            Self::Half
        } else if pct >= 25.0 {
            Self::Low
        } else {
            Self::Critical
        }
    }
}

/// `systemName` if set, otherwise `Zone <slot>`.
pub fn display_name(id: ZoneId, record: &ZoneRecord) -> String {
    record
        .system_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Zone {}", id.slot()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneView {
    pub id: ZoneId,
    pub name: String,
    pub enabled: bool,
    pub last_updated: String,
    #[serde(flatten)]
    pub detail: ZoneDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneDetail {
    Main {
        humidity: f64,
        temperature: f64,
        high_temperature: bool,
        sprinkler_status: SprinklerStatus,
    },
    Sensor {
        battery: f64,
        battery_level: BatteryLevel,
        soil_moisture1: f64,
        moisture1_status: MoistureStatus,
        soil_moisture2: f64,
        moisture2_status: MoistureStatus,
    },
}

impl ZoneView {
    pub fn new(id: ZoneId, record: &ZoneRecord) -> Self {
        let detail = match record {
            ZoneRecord::Main(m) => ZoneDetail::Main {
                humidity: m.humidity,
                temperature: m.temperature,
                high_temperature: m.temperature > HIGH_TEMPERATURE_C,
                sprinkler_status: m.sprinkler_status,
            },
            ZoneRecord::Sensor(s) => ZoneDetail::Sensor {
                battery: s.battery_or_zero(),
                battery_level: BatteryLevel::from_pct(s.battery_or_zero()),
                soil_moisture1: s.moisture1_or_zero(),
                moisture1_status: MoistureStatus::from_pct(s.moisture1_or_zero()),
                soil_moisture2: s.moisture2_or_zero(),
                moisture2_status: MoistureStatus::from_pct(s.moisture2_or_zero()),
            },
        };
        Self {
            id,
            name: display_name(id, record),
            enabled: record.enabled(),
            last_updated: record.last_updated().unwrap_or(NOT_AVAILABLE).to_string(),
            detail,
        }
    }
}

/// Every zone in registry order.
pub fn zone_views(state: &UserGardenState) -> Vec<ZoneView> {
    list_zone_ids(state)
        .into_iter()
        .filter_map(|id| state.zone(id).map(|rec| ZoneView::new(id, rec)))
        .collect()
}
