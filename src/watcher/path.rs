//! Sensor object path decoding.

use crate::sensors::SensorCategory;

/// Split a sensor object path into its name and category.
///
/// Accepts `.../sensors/<category>/<name>` where `<category>` is one of the
/// category sub-namespaces (see [`SensorCategory::dbus_namespace`]) and
/// `<name>` is a single non-empty segment. Returns `None` for anything else.
pub fn split_object_path(path: &str) -> Option<(String, SensorCategory)> {
    let mut segments = path.strip_prefix('/')?.rsplit('/');

    let name = segments.next().filter(|s| !s.is_empty())?;
    let category = segments.next().and_then(SensorCategory::from_dbus_namespace)?;
    if segments.next() != Some("sensors") {
        return None;
    }

    Some((name.to_string(), category))
}

/// Object path for a sensor under `root`.
pub fn sensor_object_path(root: &str, category: SensorCategory, name: &str) -> String {
    format!(
        "{}/{}/{}",
        root.trim_end_matches('/'),
        category.dbus_namespace(),
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_root() {
        assert_eq!(
            split_object_path("/xyz/sensors/voltage/psu1"),
            Some(("psu1".to_string(), SensorCategory::Voltage))
        );
    }

    #[test]
    fn test_split_openbmc_root() {
        assert_eq!(
            split_object_path("/xyz/openbmc_project/sensors/fan_tach/fan0_0"),
            Some(("fan0_0".to_string(), SensorCategory::Tachometer))
        );
        assert_eq!(
            split_object_path("/xyz/openbmc_project/sensors/temperature/cpu0"),
            Some(("cpu0".to_string(), SensorCategory::Temperature))
        );
    }

    #[test]
    fn test_split_rejects_foreign_paths() {
        for path in [
            "",
            "/",
            "xyz/sensors/voltage/psu1",
            "/xyz/inventory/voltage/psu1",
            "/xyz/sensors/humidity/h0",
            "/xyz/sensors/voltage",
            "/xyz/sensors/voltage/",
            "/xyz/sensors/voltage/psu1/extra",
            "/xyz/openbmc_project/state/host0",
        ] {
            assert_eq!(split_object_path(path), None, "path {:?}", path);
        }
    }

    #[test]
    fn test_sensor_object_path() {
        assert_eq!(
            sensor_object_path("/xyz/sensors/", SensorCategory::Tachometer, "fan1"),
            "/xyz/sensors/fan_tach/fan1"
        );
    }
}
