//! Zone identifiers and the records stored under `users/{uid}/system{N}`.
//!
//! Records arrive from a schemaless store, so every field is parsed
//! leniently: numbers may be JSON numbers or numeric strings, anything
//! unusable is treated as missing, and missing fields fall back to the
//! defaults documented on each struct.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Every zone key is this prefix followed by its slot number.
pub const ZONE_PREFIX: &str = "system";

/// Registry capacity, main zone included.
pub const MAX_ZONES: usize = 16;

/// Highest slot a sensor zone may occupy.
pub const MAX_SENSOR_SLOT: u32 = 15;

/// Timestamp written into freshly created records until a controller
/// reports for the first time.
pub const PLACEHOLDER_TIMESTAMP: &str = "00:00:00 MM/DD/YYYY";

// ---------------------------------------------------------------------------
// ZoneId
// ---------------------------------------------------------------------------

/// `system<N>`. Slot 0 is the main controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneIdError {
    #[error("zone id '{0}' does not start with \"system\"")]
    MissingPrefix(String),
    #[error("zone id '{0}' must end in a non-negative integer without leading zeros")]
    BadSlot(String),
}

impl ZoneId {
    pub const MAIN: ZoneId = ZoneId(0);

    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    pub const fn slot(self) -> u32 {
        self.0
    }

    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ZONE_PREFIX}{}", self.0)
    }
}

impl FromStr for ZoneId {
    type Err = ZoneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(ZONE_PREFIX)
            .ok_or_else(|| ZoneIdError::MissingPrefix(s.to_string()))?;

        // "system01" would alias "system1", so only canonical numbers match.
        let canonical = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if !canonical {
            return Err(ZoneIdError::BadSlot(s.to_string()));
        }

        digits
            .parse::<u32>()
            .map(ZoneId)
            .map_err(|_| ZoneIdError::BadSlot(s.to_string()))
    }
}

impl Serialize for ZoneId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Sprinkler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SprinklerStatus {
    On,
    #[default]
    Off,
}

impl SprinklerStatus {
    /// Case-insensitive, whitespace-tolerant. Anything other than `ON` reads
    /// as `OFF`.
    pub fn parse_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("ON") {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl fmt::Display for SprinklerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// `system0`: the irrigation controller.
///
/// Defaults: `humidity`/`temperature` 0, `sprinklerStatus` OFF. An `enable`
/// field, if present, is ignored; the main zone is always enabled.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MainZone {
    #[serde(deserialize_with = "lenient::text")]
    pub system_name: Option<String>,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub humidity: f64,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub temperature: f64,
    #[serde(deserialize_with = "lenient::sprinkler")]
    pub sprinkler_status: SprinklerStatus,
    #[serde(deserialize_with = "lenient::text")]
    pub last_updated: Option<String>,
}

/// `system1..system15`: a battery-powered dual soil-moisture probe.
///
/// Readings stay optional so that "never reported" is distinguishable from a
/// reported zero; use the accessors for display values. `enable` defaults to
/// true and only an explicit `false` disables the zone.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SensorZone {
    #[serde(deserialize_with = "lenient::text")]
    pub system_name: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub battery: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub soil_moisture1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub soil_moisture2: Option<f64>,
    #[serde(deserialize_with = "lenient::flag")]
    pub enable: Option<bool>,
    #[serde(deserialize_with = "lenient::text")]
    pub last_updated: Option<String>,
}

impl SensorZone {
    pub fn enabled(&self) -> bool {
        self.enable != Some(false)
    }

    pub fn battery_or_zero(&self) -> f64 {
        self.battery.unwrap_or(0.0)
    }

    pub fn moisture1_or_zero(&self) -> f64 {
        self.soil_moisture1.unwrap_or(0.0)
    }

    pub fn moisture2_or_zero(&self) -> f64 {
        self.soil_moisture2.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneRecord {
    Main(MainZone),
    Sensor(SensorZone),
}

impl ZoneRecord {
    /// Interpret a raw record. The variant is chosen by id, never by shape.
    pub fn from_value(id: ZoneId, value: &Value) -> Self {
        if !value.is_object() {
            warn!(zone = %id, "zone record is not an object, using defaults");
        }

        if id.is_main() {
            Self::Main(serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(zone = %id, "unreadable main zone record: {e}");
                MainZone::default()
            }))
        } else {
            Self::Sensor(serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(zone = %id, "unreadable sensor zone record: {e}");
                SensorZone::default()
            }))
        }
    }

    pub fn system_name(&self) -> Option<&str> {
        match self {
            Self::Main(m) => m.system_name.as_deref(),
            Self::Sensor(s) => s.system_name.as_deref(),
        }
    }

    pub fn last_updated(&self) -> Option<&str> {
        match self {
            Self::Main(m) => m.last_updated.as_deref(),
            Self::Sensor(s) => s.last_updated.as_deref(),
        }
    }

    /// Effective enabled state. The main zone cannot be disabled.
    pub fn enabled(&self) -> bool {
        match self {
            Self::Main(_) => true,
            Self::Sensor(s) => s.enabled(),
        }
    }
}

// ---------------------------------------------------------------------------
// UserGardenState
// ---------------------------------------------------------------------------

/// One full snapshot of `users/{uid}`. Keys that are not zone ids are
/// dropped here so nothing downstream has to filter them again.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserGardenState {
    zones: HashMap<ZoneId, ZoneRecord>,
}

impl UserGardenState {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            warn!("user record is not an object, treating as empty");
            return Self::default();
        };

        let zones = obj
            .iter()
            .filter_map(|(key, raw)| {
                let id = key.parse::<ZoneId>().ok()?;
                Some((id, ZoneRecord::from_value(id, raw)))
            })
            .collect();

        Self { zones }
    }

    pub fn zone(&self, id: ZoneId) -> Option<&ZoneRecord> {
        self.zones.get(&id)
    }

    pub fn contains(&self, id: ZoneId) -> bool {
        self.zones.contains_key(&id)
    }

    pub fn main(&self) -> Option<&MainZone> {
        match self.zones.get(&ZoneId::MAIN) {
            Some(ZoneRecord::Main(m)) => Some(m),
            _ => None,
        }
    }

    pub fn sensor(&self, id: ZoneId) -> Option<&SensorZone> {
        match self.zones.get(&id) {
            Some(ZoneRecord::Sensor(s)) => Some(s),
            _ => None,
        }
    }

    /// Zone ids in no particular order. See `registry` for display order.
    pub fn ids(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.zones.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Lenient field readers
// ---------------------------------------------------------------------------

mod lenient {
    use super::SprinklerStatus;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_number(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub(super) fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(as_number(&Value::deserialize(d)?))
    }

    pub(super) fn number_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(as_number(&Value::deserialize(d)?).unwrap_or(0.0))
    }

    pub(super) fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub(super) fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Bool(b) => Some(b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        })
    }

    pub(super) fn sprinkler<'de, D: Deserializer<'de>>(d: D) -> Result<SprinklerStatus, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => SprinklerStatus::parse_lossy(&s),
            _ => SprinklerStatus::Off,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- ZoneId --------------------------------------------------------------

    #[test]
    fn zone_id_parses_canonical_ids() {
        assert_eq!("system0".parse::<ZoneId>(), Ok(ZoneId::MAIN));
        assert_eq!("system7".parse::<ZoneId>(), Ok(ZoneId::new(7)));
        assert_eq!("system15".parse::<ZoneId>(), Ok(ZoneId::new(15)));
    }

    #[test]
    fn zone_id_rejects_other_keys() {
        assert!(matches!(
            "notificationToken".parse::<ZoneId>(),
            Err(ZoneIdError::MissingPrefix(_))
        ));
        assert!(matches!("system".parse::<ZoneId>(), Err(ZoneIdError::BadSlot(_))));
        assert!(matches!("system-1".parse::<ZoneId>(), Err(ZoneIdError::BadSlot(_))));
        assert!(matches!("system1a".parse::<ZoneId>(), Err(ZoneIdError::BadSlot(_))));
        assert!(matches!("System1".parse::<ZoneId>(), Err(ZoneIdError::MissingPrefix(_))));
    }

    #[test]
    fn zone_id_rejects_leading_zeros() {
        assert!(matches!("system01".parse::<ZoneId>(), Err(ZoneIdError::BadSlot(_))));
        assert!(matches!("system00".parse::<ZoneId>(), Err(ZoneIdError::BadSlot(_))));
    }

    #[test]
    fn zone_id_display_round_trips() {
        let id = ZoneId::new(12);
        assert_eq!(id.to_string(), "system12");
        assert_eq!(id.to_string().parse::<ZoneId>(), Ok(id));
        assert!(ZoneId::MAIN.is_main());
        assert!(!id.is_main());
    }

    #[test]
    fn zone_id_serializes_as_key() {
        assert_eq!(serde_json::to_value(ZoneId::new(3)).unwrap(), json!("system3"));
    }

    // -- SprinklerStatus -----------------------------------------------------

    #[test]
    fn sprinkler_parse_is_lossy() {
        assert_eq!(SprinklerStatus::parse_lossy("ON"), SprinklerStatus::On);
        assert_eq!(SprinklerStatus::parse_lossy(" on\n"), SprinklerStatus::On);
        assert_eq!(SprinklerStatus::parse_lossy("OFF"), SprinklerStatus::Off);
        assert_eq!(SprinklerStatus::parse_lossy("TOGGLE"), SprinklerStatus::Off);
        assert_eq!(SprinklerStatus::parse_lossy(""), SprinklerStatus::Off);
    }

    #[test]
    fn sprinkler_toggles() {
        assert_eq!(SprinklerStatus::On.toggled(), SprinklerStatus::Off);
        assert_eq!(SprinklerStatus::Off.toggled(), SprinklerStatus::On);
        assert_eq!(SprinklerStatus::On.to_string(), "ON");
    }

    // -- Records -------------------------------------------------------------

    #[test]
    fn main_zone_full_record() {
        let rec = ZoneRecord::from_value(
            ZoneId::MAIN,
            &json!({
                "systemName": "Backyard",
                "humidity": 55,
                "temperature": -3.5,
                "sprinklerStatus": "ON",
                "lastUpdated": "12:00:00 06/01/2025",
                "enable": false
            }),
        );
        let ZoneRecord::Main(m) = &rec else {
            panic!("expected main zone, got {rec:?}");
        };
        assert_eq!(m.system_name.as_deref(), Some("Backyard"));
        assert_eq!(m.humidity, 55.0);
        assert_eq!(m.temperature, -3.5);
        assert_eq!(m.sprinkler_status, SprinklerStatus::On);
        assert_eq!(rec.last_updated(), Some("12:00:00 06/01/2025"));
        // enable=false is ignored for the main zone
        assert!(rec.enabled());
    }

    #[test]
    fn main_zone_missing_fields_default() {
        let rec = ZoneRecord::from_value(ZoneId::MAIN, &json!({}));
        assert_eq!(rec, ZoneRecord::Main(MainZone::default()));
        assert_eq!(rec.system_name(), None);
    }

    #[test]
    fn sensor_zone_missing_fields_default() {
        let rec = ZoneRecord::from_value(ZoneId::new(2), &json!({ "systemName": "Beds" }));
        let ZoneRecord::Sensor(s) = &rec else {
            panic!("expected sensor zone, got {rec:?}");
        };
        assert_eq!(s.battery, None);
        assert_eq!(s.battery_or_zero(), 0.0);
        assert_eq!(s.moisture1_or_zero(), 0.0);
        assert!(s.enabled());
    }

    #[test]
    fn sensor_zone_numeric_strings_accepted() {
        let rec = ZoneRecord::from_value(
            ZoneId::new(1),
            &json!({ "battery": "18", "soilMoisture1": " 41.5 ", "soilMoisture2": "wet" }),
        );
        let ZoneRecord::Sensor(s) = rec else {
            panic!("expected sensor zone");
        };
        assert_eq!(s.battery, Some(18.0));
        assert_eq!(s.soil_moisture1, Some(41.5));
        assert_eq!(s.soil_moisture2, None);
    }

    #[test]
    fn sensor_zone_only_explicit_false_disables() {
        for (raw, expected) in [
            (json!(false), false),
            (json!("false"), false),
            (json!(true), true),
            (json!(null), true),
            (json!(0), true),
        ] {
            let rec = ZoneRecord::from_value(ZoneId::new(4), &json!({ "enable": raw }));
            assert_eq!(rec.enabled(), expected, "enable={raw}");
        }
    }

    #[test]
    fn non_object_record_uses_defaults() {
        let rec = ZoneRecord::from_value(ZoneId::new(3), &json!("garbage"));
        assert_eq!(rec, ZoneRecord::Sensor(SensorZone::default()));
    }

    #[test]
    fn empty_name_is_treated_as_missing() {
        let rec = ZoneRecord::from_value(ZoneId::new(3), &json!({ "systemName": "" }));
        assert_eq!(rec.system_name(), None);
    }

    // -- UserGardenState -----------------------------------------------------

    #[test]
    fn garden_state_keeps_only_zone_keys() {
        let state = UserGardenState::from_value(&json!({
            "system0": { "temperature": 20 },
            "system1": { "battery": 90 },
            "system01": { "battery": 10 },
            "notificationToken": "ExponentPushToken[xyz]"
        }));
        assert_eq!(state.len(), 2);
        assert!(state.contains(ZoneId::MAIN));
        assert!(state.contains(ZoneId::new(1)));
        assert_eq!(state.main().map(|m| m.temperature), Some(20.0));
        assert_eq!(state.sensor(ZoneId::new(1)).and_then(|s| s.battery), Some(90.0));
        assert!(state.sensor(ZoneId::MAIN).is_none());
    }

    #[test]
    fn garden_state_non_object_is_empty() {
        assert!(UserGardenState::from_value(&json!(42)).is_empty());
        assert!(UserGardenState::from_value(&json!(null)).is_empty());
    }
}
