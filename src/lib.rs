//! Sensor SNMP bridge library.
//!
//! Mirrors the BMC's hardware sensors, as published on D-Bus by the platform
//! sensor services, into a registry kept current by a change watcher, and
//! serves that registry as five read-only SNMP tables.

pub mod bus;
pub mod config;
pub mod error;
pub mod sensors;
pub mod simulation;
pub mod snmp;
pub mod watcher;

pub use error::{BridgeError, Result};
