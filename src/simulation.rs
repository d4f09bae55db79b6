//! Simulated sensor services for development without a BMC.
//!
//! Populates a [`MemoryBus`] with a handful of sensors in every category plus
//! the host power object, then nudges their values periodically so the
//! watcher has something to react to.

use crate::bus::{
    CRITICAL_INTERFACE, InterfaceMap, MemoryBus, PropValue, PropertyMap, SENSOR_VALUE_INTERFACE,
    WARNING_INTERFACE,
};
use crate::config::Config;
use crate::sensors::SensorCategory;
use crate::watcher::path::sensor_object_path;
use log::{debug, info};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

/// A simulated sensor: name, category, starting value, scale and thresholds
/// (warning low/high, critical low/high) in raw units.
struct DemoSensor {
    name: &'static str,
    category: SensorCategory,
    value: f64,
    scale: i64,
    thresholds: [f64; 4],
}

const DEMO_SENSORS: &[DemoSensor] = &[
    DemoSensor {
        name: "fan0",
        category: SensorCategory::Tachometer,
        value: 7200.0,
        scale: 0,
        thresholds: [1500.0, 12000.0, 1000.0, 15000.0],
    },
    DemoSensor {
        name: "fan1",
        category: SensorCategory::Tachometer,
        value: 6900.0,
        scale: 0,
        thresholds: [1500.0, 12000.0, 1000.0, 15000.0],
    },
    DemoSensor {
        name: "cpu0_temp",
        category: SensorCategory::Temperature,
        value: 45.0,
        scale: 0,
        thresholds: [5.0, 85.0, 0.0, 95.0],
    },
    DemoSensor {
        name: "p12v",
        category: SensorCategory::Voltage,
        value: 12.05,
        scale: 3,
        thresholds: [11.4, 12.6, 10.8, 13.2],
    },
    DemoSensor {
        name: "psu0_iout",
        category: SensorCategory::Current,
        value: 14.2,
        scale: 3,
        thresholds: [0.0, 40.0, 0.0, 50.0],
    },
    DemoSensor {
        name: "total_power",
        category: SensorCategory::Power,
        value: 320.0,
        scale: 0,
        thresholds: [0.0, 900.0, 0.0, 1100.0],
    },
];

fn props(entries: &[(&str, PropValue)]) -> PropertyMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn demo_interfaces(sensor: &DemoSensor) -> InterfaceMap {
    let [warn_low, warn_high, crit_low, crit_high] = sensor.thresholds;
    let mut interfaces = InterfaceMap::new();
    interfaces.insert(
        SENSOR_VALUE_INTERFACE.to_string(),
        props(&[
            ("Value", PropValue::Double(sensor.value)),
            ("Scale", PropValue::Int(sensor.scale)),
        ]),
    );
    interfaces.insert(
        WARNING_INTERFACE.to_string(),
        props(&[
            ("WarningLow", PropValue::Double(warn_low)),
            ("WarningHigh", PropValue::Double(warn_high)),
        ]),
    );
    interfaces.insert(
        CRITICAL_INTERFACE.to_string(),
        props(&[
            ("CriticalLow", PropValue::Double(crit_low)),
            ("CriticalHigh", PropValue::Double(crit_high)),
        ]),
    );
    interfaces
}

/// Create the demo sensors and the power object on `bus`.
pub fn seed(bus: &MemoryBus, config: &Config) {
    let mut power = InterfaceMap::new();
    power.insert(
        config.power.interface.clone(),
        props(&[(config.power.property.as_str(), PropValue::Int(1))]),
    );
    bus.add_object(&config.power.path, power);

    for sensor in DEMO_SENSORS {
        let path = sensor_object_path(&config.bus.sensors_root, sensor.category, sensor.name);
        bus.add_object(&path, demo_interfaces(sensor));
    }
    info!(
        "[Sim] Seeded {} sensors under {}",
        DEMO_SENSORS.len(),
        config.bus.sensors_root
    );
}

/// Spawn a task that drifts every demo sensor's value by up to ±5% each
/// `period`.
pub fn run_sensor_simulation(bus: MemoryBus, config: &Config, period: Duration) -> JoinHandle<()> {
    let root = config.bus.sensors_root.clone();
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for sensor in DEMO_SENSORS {
                let drift: f64 = rand::thread_rng().gen_range(-0.05..=0.05);
                let value = (sensor.value * (1.0 + drift)).max(0.0);
                let path = sensor_object_path(&root, sensor.category, sensor.name);
                bus.set_property(&path, SENSOR_VALUE_INTERFACE, "Value", PropValue::Double(value));
            }
            debug!("[Sim] Drifted {} sensor values", DEMO_SENSORS.len());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SensorBus;
    use strum::IntoEnumIterator;

    #[tokio::test]
    async fn test_seed_creates_every_category() {
        let bus = MemoryBus::new();
        let config = Config::default();
        seed(&bus, &config);

        assert!(bus.object(&config.power.path).await.unwrap().is_some());
        let objects = bus.sensor_objects(&config.bus.sensors_root).await.unwrap();
        assert_eq!(objects.len(), DEMO_SENSORS.len());
        for category in SensorCategory::iter() {
            let namespace = format!("{}/{}", config.bus.sensors_root, category.dbus_namespace());
            let found = bus.sensor_objects(&namespace).await.unwrap();
            assert!(!found.is_empty(), "{}", category);
        }
    }

    #[tokio::test]
    async fn test_power_object_readable() {
        let bus = MemoryBus::new();
        let config = Config::default();
        seed(&bus, &config);

        let value = bus
            .get_property(&config.power.path, &config.power.interface, &config.power.property)
            .await
            .unwrap();
        assert_eq!(value, PropValue::Int(1));
    }
}
