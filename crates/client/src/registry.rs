//! The ordered set of zone ids derived from a snapshot, and slot
//! allocation for new sensor zones.
//!
//! Ordering is plain string order of the ids, so `system10` sorts before
//! `system2` once more than nine sensor zones exist. Anything that shows
//! zones to the operator inherits that order.

use crate::zone::{UserGardenState, ZoneId, MAX_SENSOR_SLOT};

/// Zone ids of `state`, sorted by their string form.
pub fn list_zone_ids(state: &UserGardenState) -> Vec<ZoneId> {
    let mut ids: Vec<(String, ZoneId)> = state.ids().map(|id| (id.to_string(), id)).collect();
    ids.sort();
    ids.into_iter().map(|(_, id)| id).collect()
}

/// Smallest slot in `1..=15` not used by `existing`. When every slot is
/// taken this falls back to one past the highest slot in use, which lies
/// outside the sensor range; callers enforce the capacity limit.
pub fn next_free_slot(existing: &[ZoneId]) -> u32 {
    if let Some(free) = (1..=MAX_SENSOR_SLOT).find(|n| !existing.contains(&ZoneId::new(*n))) {
        return free;
    }
    existing
        .iter()
        .map(|id| id.slot())
        .max()
        .unwrap_or(0)
        .saturating_add(1)
}

/// Total zone count, main zone included.
pub fn count(state: &UserGardenState) -> usize {
    state.len()
}

/// The registry for one snapshot. Rebuilt from scratch on every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ZoneRegistry {
    ids: Vec<ZoneId>,
}

impl ZoneRegistry {
    pub fn from_snapshot(state: &UserGardenState) -> Self {
        Self {
            ids: list_zone_ids(state),
        }
    }

    pub fn ids(&self) -> &[ZoneId] {
        &self.ids
    }

    pub fn contains(&self, id: ZoneId) -> bool {
        self.ids.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Sensor zones only, as shown to the operator.
    pub fn variant_count(&self) -> usize {
        self.ids.len().saturating_sub(1)
    }

    pub fn next_free_slot(&self) -> u32 {
        next_free_slot(&self.ids)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn state_with(slots: &[u32]) -> UserGardenState {
        let obj: Map<String, Value> = slots
            .iter()
            .map(|n| (ZoneId::new(*n).to_string(), json!({})))
            .collect();
        UserGardenState::from_value(&Value::Object(obj))
    }

    fn ids(slots: &[u32]) -> Vec<ZoneId> {
        slots.iter().map(|n| ZoneId::new(*n)).collect()
    }

    // -- list_zone_ids --------------------------------------------------------

    #[test]
    fn list_filters_and_sorts() {
        let state = UserGardenState::from_value(&json!({
            "system3": {}, "system0": {}, "notificationToken": "t", "system1": {}
        }));
        assert_eq!(list_zone_ids(&state), ids(&[0, 1, 3]));
    }

    #[test]
    fn list_orders_by_string_form() {
        let state = state_with(&[0, 1, 2, 10, 11]);
        assert_eq!(list_zone_ids(&state), ids(&[0, 1, 10, 11, 2]));
    }

    #[test]
    fn list_ids_are_unique_and_well_formed() {
        let state = state_with(&[0, 4, 9, 12, 15]);
        let listed = list_zone_ids(&state);
        for (i, a) in listed.iter().enumerate() {
            assert!(a.to_string().parse::<ZoneId>().is_ok());
            assert!(listed[i + 1..].iter().all(|b| b != a));
        }
    }

    // -- next_free_slot -------------------------------------------------------

    #[test]
    fn next_slot_empty_is_one() {
        assert_eq!(next_free_slot(&[]), 1);
    }

    #[test]
    fn next_slot_fills_gap() {
        assert_eq!(next_free_slot(&ids(&[1, 3])), 2);
        assert_eq!(next_free_slot(&ids(&[0, 1, 3])), 2);
    }

    #[test]
    fn next_slot_ignores_main() {
        assert_eq!(next_free_slot(&ids(&[0])), 1);
    }

    #[test]
    fn next_slot_after_contiguous_run() {
        assert_eq!(next_free_slot(&ids(&[0, 1, 2, 3])), 4);
    }

    #[test]
    fn next_slot_full_range_falls_back_past_max() {
        let full: Vec<u32> = (0..=15).collect();
        assert_eq!(next_free_slot(&ids(&full)), 16);
    }

    #[test]
    fn next_slot_fallback_saturates() {
        let mut slots: Vec<u32> = (1..=15).collect();
        slots.push(u32::MAX);
        assert_eq!(next_free_slot(&ids(&slots)), u32::MAX);
    }

    // -- ZoneRegistry ---------------------------------------------------------

    #[test]
    fn registry_counts() {
        let reg = ZoneRegistry::from_snapshot(&state_with(&[0, 1, 2]));
        assert_eq!(reg.count(), 3);
        assert_eq!(reg.variant_count(), 2);
        assert_eq!(count(&state_with(&[0, 1, 2])), 3);
        assert!(reg.contains(ZoneId::new(2)));
        assert!(!reg.contains(ZoneId::new(5)));
        assert_eq!(reg.next_free_slot(), 3);
    }

    #[test]
    fn empty_registry_variant_count_saturates() {
        assert_eq!(ZoneRegistry::default().variant_count(), 0);
    }
}
