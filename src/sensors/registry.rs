//! Ordered per-category sensor collections.

use super::{Sensor, SensorCategory};
use parking_lot::RwLock;
use std::sync::Arc;

/// Registry shared between the change watcher (writer) and the SNMP tables
/// (readers).
///
/// Every mutation for one bus signal happens under a single write guard, and
/// every table callback holds a read guard for its whole duration, so a reader
/// never sees a half-applied update.
pub type SharedRegistry = Arc<RwLock<SensorRegistry>>;

/// Sensors grouped by category, each group kept in insertion order.
///
/// Names are unique within a category. Removing a sensor keeps the relative
/// order of the remaining ones.
#[derive(Debug, Default, Clone)]
pub struct SensorRegistry {
    categories: [Vec<Sensor>; SensorCategory::COUNT],
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry wrapped for sharing.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// All sensors of a category, in scan order.
    pub fn sensors(&self, category: SensorCategory) -> &[Sensor] {
        &self.categories[category.slot()]
    }

    pub fn get(&self, category: SensorCategory, name: &str) -> Option<&Sensor> {
        self.sensors(category).iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, category: SensorCategory, name: &str) -> Option<&mut Sensor> {
        self.categories[category.slot()]
            .iter_mut()
            .find(|s| s.name == name)
    }

    pub fn contains(&self, category: SensorCategory, name: &str) -> bool {
        self.get(category, name).is_some()
    }

    /// Append a sensor. Returns `false` and leaves the registry untouched if a
    /// sensor with the same name already exists in that category.
    pub fn insert(&mut self, category: SensorCategory, sensor: Sensor) -> bool {
        if self.contains(category, &sensor.name) {
            return false;
        }
        self.categories[category.slot()].push(sensor);
        true
    }

    pub fn remove(&mut self, category: SensorCategory, name: &str) -> Option<Sensor> {
        let sensors = &mut self.categories[category.slot()];
        let pos = sensors.iter().position(|s| s.name == name)?;
        Some(sensors.remove(pos))
    }

    /// Show or hide a sensor from table iteration without dropping it.
    ///
    /// Returns `false` if the sensor does not exist.
    pub fn set_enabled(&mut self, category: SensorCategory, name: &str, enabled: bool) -> bool {
        match self.get_mut(category, name) {
            Some(sensor) => {
                sensor.enabled = enabled;
                sensor.refresh_state();
                true
            }
            None => false,
        }
    }

    pub fn len(&self, category: SensorCategory) -> usize {
        self.sensors(category).len()
    }

    /// Total number of sensors across all categories.
    pub fn total(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
