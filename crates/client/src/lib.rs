//! Client for the TerraLife soil-irrigation sensor network.
//!
//! Controllers publish telemetry into a shared realtime store. This crate
//! watches one operator's record, derives the zone registry from each
//! snapshot, raises threshold alerts and performs zone lifecycle commands.

pub mod alerts;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod memory;
pub mod monitor;
pub mod mqtt;
pub mod notify;
pub mod prefs;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
pub mod view;
pub mod watcher;
pub mod web;
pub mod zone;
