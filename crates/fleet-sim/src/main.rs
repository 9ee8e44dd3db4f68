mod sim;

use anyhow::{bail, Result};
use std::{env, time::Duration};
use time::{macros::format_description, OffsetDateTime};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{FleetSim, Scenario};
use terralife_client::config::StoreConfig;
use terralife_client::mqtt::{self, MqttStore};
use terralife_client::store::RemoteStore;
use terralife_client::zone::PLACEHOLDER_TIMESTAMP;

/// `HH:MM:SS MM/DD/YYYY`, the format controllers stamp readings with.
fn format_last_updated(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[hour]:[minute]:[second] [month]/[day]/[year]"
    ))
    .unwrap_or_else(|_| PLACEHOLDER_TIMESTAMP.to_string())
}

/// Parse `SIM_ZONES` ("1,2,5") into sensor slots. Blank entries are skipped.
fn parse_slots(raw: &str) -> Result<Vec<u32>> {
    let mut slots = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let slot: u32 = part.parse()?;
        if slot == 0 {
            bail!("slot 0 is the main zone, list sensor slots only");
        }
        slots.push(slot);
    }
    Ok(slots)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let Ok(uid) = env::var("TERRALIFE_UID") else {
        bail!("TERRALIFE_UID must be set");
    };
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let slots = parse_slots(&env::var("SIM_ZONES").unwrap_or_else(|_| "1".to_string()))?;
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 30);
    // 600 = 10-minute "day" for fast iteration; 86400 for real time
    let diurnal_period_s: f64 = env_or("DIURNAL_PERIOD_S", 600.0);

    let store_cfg = StoreConfig {
        host: env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env_or("MQTT_PORT", 1883),
        client_id: format!("terralife-fleet-sim-{uid}"),
        ..StoreConfig::default()
    };

    let cancel = CancellationToken::new();
    let store = MqttStore::start(
        mqtt::options(&store_cfg),
        store_cfg.initial_sync(),
        cancel.clone(),
    );

    info!(
        %uid,
        %scenario,
        ?slots,
        sample_every_s,
        host = %store_cfg.host,
        "fleet-sim starting"
    );

    let mut sim = FleetSim::new(scenario, &slots, diurnal_period_s);
    let started = std::time::Instant::now();

    loop {
        let telemetry = sim.tick(started.elapsed().as_secs_f64());
        let stamp = format_last_updated(OffsetDateTime::now_utc());

        let mut failed = 0usize;
        for (path, value) in telemetry.writes(&uid, &stamp) {
            if let Err(e) = store.set(&path, value).await {
                warn!(%path, error = %e, "telemetry write failed");
                failed += 1;
            }
        }

        info!(
            temperature = telemetry.main.temperature,
            humidity = telemetry.main.humidity,
            sensors = telemetry.sensors.len(),
            failed,
            "published"
        );

        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r?;
                break;
            }
            _ = sleep(Duration::from_secs(sample_every_s)) => {}
        }
    }

    cancel.cancel();
    info!("fleet-sim stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
