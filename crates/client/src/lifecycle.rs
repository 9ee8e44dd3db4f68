//! Zone create/rename/enable/delete and the sprinkler toggle.
//!
//! Every operation decides against the snapshot it is handed and then
//! issues plain writes. Nothing is applied locally: the change becomes
//! visible when the store pushes the next snapshot. Writes are not
//! transactional, so two `add_zone` calls racing on the same snapshot pick
//! the same slot and the later write wins.

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::ZoneRegistry;
use crate::session::Session;
use crate::store::{field_path, zone_path, RemoteStore, StoreError};
use crate::zone::{
    SprinklerStatus, UserGardenState, ZoneId, MAX_SENSOR_SLOT, MAX_ZONES, PLACEHOLDER_TIMESTAMP,
};

pub const MAIN_ZONE_NAME: &str = "TerraLife Main System";

/// Name given to a sensor zone when it is created.
pub fn default_sensor_name(slot: u32) -> String {
    format!("TerraLife Variant {slot}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("the main controller cannot be deleted or disabled")]
    ProtectedZone,
    #[error("zone limit reached: at most {} sensor zones", MAX_ZONES - 1)]
    CapacityExceeded,
    #[error("zone {0} does not exist")]
    UnknownZone(ZoneId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ZoneLifecycle<S> {
    store: Arc<S>,
    session: Session,
}

impl<S> Clone for ZoneLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            session: self.session.clone(),
        }
    }
}

impl<S: RemoteStore> ZoneLifecycle<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Create a sensor zone in the lowest free slot. Refused before any
    /// write when the registry is full or no slot in `1..=15` is free.
    pub async fn add_zone(&self, state: &UserGardenState) -> Result<ZoneId, LifecycleError> {
        let registry = ZoneRegistry::from_snapshot(state);
        if registry.count() >= MAX_ZONES {
            return Err(LifecycleError::CapacityExceeded);
        }
        let slot = registry.next_free_slot();
        if slot > MAX_SENSOR_SLOT {
            return Err(LifecycleError::CapacityExceeded);
        }

        let id = ZoneId::new(slot);
        let record = json!({
            "systemName": default_sensor_name(slot),
            "battery": 0,
            "soilMoisture1": 0,
            "soilMoisture2": 0,
            "enable": true,
            "lastUpdated": PLACEHOLDER_TIMESTAMP,
        });
        self.write(zone_path(self.session.uid(), id), record).await?;
        info!(zone = %id, "zone added");
        Ok(id)
    }

    /// Set `systemName` to `name` exactly as given. An empty name is
    /// ignored; returns whether a write was issued.
    pub async fn rename_zone(
        &self,
        state: &UserGardenState,
        id: ZoneId,
        name: &str,
    ) -> Result<bool, LifecycleError> {
        if name.is_empty() {
            return Ok(false);
        }
        if !state.contains(id) {
            return Err(LifecycleError::UnknownZone(id));
        }

        self.write(field_path(self.session.uid(), id, "systemName"), json!(name))
            .await?;
        info!(zone = %id, name, "zone renamed");
        Ok(true)
    }

    /// Flip `enable` on a sensor zone and return the new value.
    pub async fn toggle_enable(
        &self,
        state: &UserGardenState,
        id: ZoneId,
    ) -> Result<bool, LifecycleError> {
        if id.is_main() {
            return Err(LifecycleError::ProtectedZone);
        }
        let zone = state.sensor(id).ok_or(LifecycleError::UnknownZone(id))?;
        let enabled = !zone.enabled();

        self.write(field_path(self.session.uid(), id, "enable"), json!(enabled))
            .await?;
        info!(zone = %id, enabled, "zone enable toggled");
        Ok(enabled)
    }

    /// Remove a sensor zone's record. The main zone is refused with no
    /// write.
    pub async fn delete_zone(&self, id: ZoneId) -> Result<(), LifecycleError> {
        if id.is_main() {
            return Err(LifecycleError::ProtectedZone);
        }

        let path = zone_path(self.session.uid(), id);
        if let Err(e) = self.store.remove(&path).await {
            warn!(zone = %id, "delete failed: {e}");
            return Err(e.into());
        }
        info!(zone = %id, "zone deleted");
        Ok(())
    }

    /// Flip the main zone's sprinkler between ON and OFF and return the new
    /// status. A missing main zone counts as OFF.
    pub async fn toggle_sprinkler(
        &self,
        state: &UserGardenState,
    ) -> Result<SprinklerStatus, LifecycleError> {
        let current = state.main().map(|m| m.sprinkler_status).unwrap_or_default();
        let next = current.toggled();

        self.write(
            field_path(self.session.uid(), ZoneId::MAIN, "sprinklerStatus"),
            json!(next.as_str()),
        )
        .await?;
        info!(status = %next, "sprinkler toggled");
        Ok(next)
    }

    async fn write(&self, path: String, value: serde_json::Value) -> Result<(), LifecycleError> {
        self.store.set(&path, value).await.map_err(|e| {
            warn!(path = %path, "write failed: {e}");
            LifecycleError::from(e)
        })
    }
}

/// Seed a new account with the main controller and one sensor zone.
pub async fn provision_account<S: RemoteStore>(
    store: &S,
    session: &Session,
) -> Result<(), StoreError> {
    let uid = session.uid();
    store
        .set(
            &zone_path(uid, ZoneId::MAIN),
            json!({
                "systemName": MAIN_ZONE_NAME,
                "humidity": 0,
                "sprinklerStatus": SprinklerStatus::Off.as_str(),
                "temperature": 0,
                "lastUpdated": PLACEHOLDER_TIMESTAMP,
            }),
        )
        .await?;
    store
        .set(
            &zone_path(uid, ZoneId::new(1)),
            json!({
                "systemName": default_sensor_name(1),
                "battery": 0,
                "soilMoisture1": 0,
                "soilMoisture2": 0,
                "lastUpdated": PLACEHOLDER_TIMESTAMP,
                "enable": true,
            }),
        )
        .await?;
    info!(uid, "account provisioned");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
