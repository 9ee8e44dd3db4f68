//! Stateful telemetry simulator for a TerraLife fleet.
//!
//! Models what the controllers would report:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) cycle on temperature and humidity
//! - Gradual soil drying drift
//! - Slow battery drain on sensor zones
//! - Occasional spikes (sensor flakiness)

use serde_json::{json, Value};
use std::fmt;
use terralife_client::store::field_path;
use terralife_client::zone::ZoneId;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Soil dries steadily; moisture alerts start after a while.
    Drying,
    /// Everything near comfortable mid-range values. No alerts expected.
    Stable,
    /// Afternoon temperatures regularly cross the high-temperature line.
    Hot,
    /// Noisy probes with frequent spikes and fast battery drain.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "hot" => Self::Hot,
            "flaky" => Self::Flaky,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Hot => write!(f, "hot"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Random walk
// ---------------------------------------------------------------------------

/// One bounded quantity that evolves a step per tick.
#[derive(Debug, Clone)]
struct Walk {
    value: f64,
    center: f64,
    drift: f64,
    sigma: f64,
    mean_reversion: f64,
    min: f64,
    max: f64,
}

impl Walk {
    fn step(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.value);
        let walk = gaussian(0.0, self.sigma);
        self.value = (self.value + self.drift + pull + walk).clamp(self.min, self.max);
        self.value
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MainReading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub zone: ZoneId,
    pub battery: f64,
    pub soil_moisture1: f64,
    pub soil_moisture2: f64,
}

/// One tick's worth of telemetry for the whole fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub main: MainReading,
    pub sensors: Vec<SensorReading>,
}

impl Telemetry {
    /// Field-level writes for `uid`. Only telemetry fields are touched, so
    /// operator-owned fields (name, enable, sprinkler) are never overwritten.
    pub fn writes(&self, uid: &str, last_updated: &str) -> Vec<(String, Value)> {
        let mut out = vec![
            (
                field_path(uid, ZoneId::MAIN, "temperature"),
                json!(self.main.temperature),
            ),
            (
                field_path(uid, ZoneId::MAIN, "humidity"),
                json!(self.main.humidity),
            ),
            (
                field_path(uid, ZoneId::MAIN, "lastUpdated"),
                json!(last_updated),
            ),
        ];
        for s in &self.sensors {
            out.push((field_path(uid, s.zone, "battery"), json!(s.battery)));
            out.push((field_path(uid, s.zone, "soilMoisture1"), json!(s.soil_moisture1)));
            out.push((field_path(uid, s.zone, "soilMoisture2"), json!(s.soil_moisture2)));
            out.push((field_path(uid, s.zone, "lastUpdated"), json!(last_updated)));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

struct SensorSim {
    zone: ZoneId,
    battery: f64,
    drain: f64,
    probes: [Walk; 2],
}

pub struct FleetSim {
    temperature: Walk,
    humidity: Walk,
    sensors: Vec<SensorSim>,
    spike_prob: f64,
    spike_sigma: f64,
    diurnal_period_s: f64,
    temp_amplitude: f64,
}

impl FleetSim {
    /// `slots` are the sensor zones to report for. `diurnal_period_s`
    /// controls the day/night cycle length: 600 for fast iteration, 86400
    /// for real time.
    pub fn new(scenario: Scenario, slots: &[u32], diurnal_period_s: f64) -> Self {
        // (temp center, temp amplitude, moisture start, moisture drift,
        //  moisture sigma, spike prob, drain per tick)
        let (temp_center, temp_amplitude, m_start, m_drift, m_sigma, spike_prob, drain) =
            match scenario {
                Scenario::Drying => (26.0, 5.0, 65.0, -0.4, 0.8, 0.02, 0.02),
                Scenario::Stable => (22.0, 3.0, 60.0, 0.0, 0.3, 0.005, 0.005),
                Scenario::Hot => (33.0, 6.0, 55.0, -0.2, 0.6, 0.02, 0.02),
                Scenario::Flaky => (24.0, 4.0, 55.0, -0.1, 2.5, 0.10, 0.3),
            };

        let probe = |start: f64| Walk {
            value: (start + gaussian(0.0, 3.0)).clamp(0.0, 100.0),
            center: start,
            drift: m_drift,
            sigma: m_sigma,
            // Drying needs room to drift, so it barely reverts.
            mean_reversion: if m_drift < 0.0 { 0.002 } else { 0.05 },
            min: 0.0,
            max: 100.0,
        };

        let sensors = slots
            .iter()
            .map(|&slot| SensorSim {
                zone: ZoneId::new(slot),
                battery: (95.0 + gaussian(0.0, 2.0)).clamp(0.0, 100.0),
                drain,
                probes: [probe(m_start), probe(m_start)],
            })
            .collect();

        Self {
            temperature: Walk {
                value: temp_center,
                center: temp_center,
                drift: 0.0,
                sigma: 0.2,
                mean_reversion: 0.1,
                min: -20.0,
                max: 60.0,
            },
            humidity: Walk {
                value: 50.0,
                center: 50.0,
                drift: 0.0,
                sigma: 0.8,
                mean_reversion: 0.05,
                min: 0.0,
                max: 100.0,
            },
            sensors,
            spike_prob,
            spike_sigma: 15.0,
            diurnal_period_s,
            temp_amplitude,
        }
    }

    /// Advance one tick. `now_s` drives the diurnal phase.
    pub fn tick(&mut self, now_s: f64) -> Telemetry {
        let phase = (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin();

        // Hotter afternoons are drier.
        let temperature = self.temperature.step() + self.temp_amplitude * phase;
        let humidity = (self.humidity.step() - 10.0 * phase).clamp(0.0, 100.0);

        let spike_prob = self.spike_prob;
        let spike_sigma = self.spike_sigma;
        let sensors = self
            .sensors
            .iter_mut()
            .map(|s| {
                s.battery = (s.battery - s.drain).max(0.0);
                let mut probe = |i: usize| {
                    let spike = if fastrand::f64() < spike_prob {
                        gaussian(0.0, spike_sigma)
                    } else {
                        0.0
                    };
                    (s.probes[i].step() + spike).clamp(0.0, 100.0).round()
                };
                let soil_moisture1 = probe(0);
                let soil_moisture2 = probe(1);
                SensorReading {
                    zone: s.zone,
                    battery: s.battery.round(),
                    soil_moisture1,
                    soil_moisture2,
                }
            })
            .collect();

        Telemetry {
            main: MainReading {
                temperature: (temperature * 10.0).round() / 10.0,
                humidity: humidity.round(),
            },
            sensors,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
