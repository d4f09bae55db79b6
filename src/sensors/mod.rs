//! Sensor state mirrored from the platform sensor services.
//!
//! A [`Sensor`] is the in-memory copy of one `xyz.openbmc_project.Sensor.Value`
//! object. Sensors live in a [`SensorRegistry`], grouped by [`SensorCategory`],
//! which is written by the change watcher and read by the SNMP tables.

pub mod registry;

pub use registry::{SensorRegistry, SharedRegistry};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

/// Sensor categories, one per SNMP table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Tachometer,
    Temperature,
    Voltage,
    Current,
    Power,
}

impl SensorCategory {
    /// Number of categories.
    pub const COUNT: usize = 5;

    /// Sub-namespace of the sensors root that holds this category.
    pub fn dbus_namespace(self) -> &'static str {
        match self {
            SensorCategory::Tachometer => "fan_tach",
            SensorCategory::Temperature => "temperature",
            SensorCategory::Voltage => "voltage",
            SensorCategory::Current => "current",
            SensorCategory::Power => "power",
        }
    }

    /// Reverse of [`SensorCategory::dbus_namespace`].
    pub fn from_dbus_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "fan_tach" => Some(SensorCategory::Tachometer),
            "temperature" => Some(SensorCategory::Temperature),
            "voltage" => Some(SensorCategory::Voltage),
            "current" => Some(SensorCategory::Current),
            "power" => Some(SensorCategory::Power),
            _ => None,
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// Sensor state as reported in the `state` column.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, FromRepr, Serialize, Deserialize,
)]
#[repr(i64)]
pub enum SensorState {
    Unavailable = 0,
    #[default]
    Normal = 1,
    WarningLow = 2,
    WarningHigh = 3,
    CriticalLow = 4,
    CriticalHigh = 5,
}

impl SensorState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// One sensor row.
///
/// Thresholds are `None` until the producing service publishes them; the
/// table reports unset thresholds as `0` and they never raise an alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub current_value: i64,
    pub warning_low: Option<i64>,
    pub warning_high: Option<i64>,
    pub critical_low: Option<i64>,
    pub critical_high: Option<i64>,
    pub state: SensorState,
    pub enabled: bool,
    /// Decimal exponent applied to raw bus values (`raw * 10^scale`).
    ///
    /// Read once from `Sensor.Value` when the sensor is first tracked. A
    /// later `Scale` in `PropertiesChanged` or a merged announcement is not
    /// applied; values and thresholds keep decoding with this exponent.
    pub scale: i32,
}

impl Sensor {
    /// Create an enabled sensor with no value and no thresholds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_value: 0,
            warning_low: None,
            warning_high: None,
            critical_low: None,
            critical_high: None,
            state: SensorState::Normal,
            enabled: true,
            scale: 0,
        }
    }

    /// Classify the current value against the thresholds.
    ///
    /// Critical limits take precedence over warning limits.
    pub fn evaluate_state(&self) -> SensorState {
        if !self.enabled {
            return SensorState::Unavailable;
        }

        let value = self.current_value;
        if self.critical_low.is_some_and(|low| value <= low) {
            SensorState::CriticalLow
        } else if self.critical_high.is_some_and(|high| value >= high) {
            SensorState::CriticalHigh
        } else if self.warning_low.is_some_and(|low| value <= low) {
            SensorState::WarningLow
        } else if self.warning_high.is_some_and(|high| value >= high) {
            SensorState::WarningHigh
        } else {
            SensorState::Normal
        }
    }

    /// Re-derive `state`. Returns the previous state if it changed.
    pub fn refresh_state(&mut self) -> Option<SensorState> {
        let next = self.evaluate_state();
        if next == self.state {
            return None;
        }
        Some(std::mem::replace(&mut self.state, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_namespace_round_trip() {
        for category in SensorCategory::iter() {
            assert_eq!(
                SensorCategory::from_dbus_namespace(category.dbus_namespace()),
                Some(category)
            );
        }
        assert_eq!(SensorCategory::from_dbus_namespace("tachometer"), None);
        assert_eq!(SensorCategory::from_dbus_namespace(""), None);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(SensorCategory::Tachometer.to_string(), "tachometer");
        assert_eq!(SensorCategory::Voltage.to_string(), "voltage");
    }

    #[test]
    fn test_state_without_thresholds_is_normal() {
        let mut sensor = Sensor::new("cpu0");
        sensor.current_value = 1_000_000;
        assert_eq!(sensor.evaluate_state(), SensorState::Normal);
    }

    #[test]
    fn test_state_thresholds() {
        let mut sensor = Sensor::new("cpu0");
        sensor.warning_low = Some(10);
        sensor.warning_high = Some(80);
        sensor.critical_low = Some(5);
        sensor.critical_high = Some(95);

        sensor.current_value = 50;
        assert_eq!(sensor.evaluate_state(), SensorState::Normal);
        sensor.current_value = 80;
        assert_eq!(sensor.evaluate_state(), SensorState::WarningHigh);
        sensor.current_value = 100;
        assert_eq!(sensor.evaluate_state(), SensorState::CriticalHigh);
        sensor.current_value = 7;
        assert_eq!(sensor.evaluate_state(), SensorState::WarningLow);
        sensor.current_value = 5;
        assert_eq!(sensor.evaluate_state(), SensorState::CriticalLow);
    }

    #[test]
    fn test_disabled_sensor_is_unavailable() {
        let mut sensor = Sensor::new("psu1");
        sensor.enabled = false;
        assert_eq!(sensor.refresh_state(), Some(SensorState::Normal));
        assert_eq!(sensor.state, SensorState::Unavailable);
        assert_eq!(sensor.refresh_state(), None);
    }

    #[test]
    fn test_state_repr() {
        assert_eq!(SensorState::from_repr(4), Some(SensorState::CriticalLow));
        assert_eq!(SensorState::CriticalHigh.as_i64(), 5);
        assert_eq!(SensorState::from_repr(6), None);
    }
}
