use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use strum::Display;

/// Default D-Bus namespace holding the sensor objects.
pub const DEFAULT_SENSORS_ROOT: &str = "/xyz/openbmc_project/sensors";

/// Load `KEY=VALUE` lines from `path` into the process environment.
///
/// Variables already present in the environment win. Blank lines and `#`
/// comments are skipped; surrounding single or double quotes are stripped.
/// Returns how many variables were set.
pub fn load_dotenv_from(path: &Path) -> usize {
    let Ok(content) = fs::read_to_string(path) else {
        return 0;
    };

    let mut applied = 0;
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = unquote(value.trim());

        if std::env::var_os(key).is_none() {
            // SAFETY: called first thing in main, before any task is spawned
            unsafe { std::env::set_var(key, value) };
            applied += 1;
        }
    }
    applied
}

/// Load `.env` from the working directory, if present.
pub fn load_dotenv() -> usize {
    load_dotenv_from(Path::new(".env"))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(BusKind::System),
            "session" => Some(BusKind::Session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bus: BusConfig,
    pub power: PowerConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub kind: BusKind,
    /// Namespace enumerated and watched for sensor objects.
    pub sensors_root: String,
}

/// Location of the host power state property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    pub path: String,
    pub interface: String,
    pub property: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between debug walks of all tables; 0 disables them.
    pub walk_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig {
                kind: BusKind::System,
                sensors_root: DEFAULT_SENSORS_ROOT.to_string(),
            },
            power: PowerConfig {
                path: "/org/openbmc/control/power0".to_string(),
                interface: "org.openbmc.control.Power".to_string(),
                property: "pgood".to_string(),
            },
            agent: AgentConfig {
                walk_interval_secs: 0,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overridden by `lookup`.
    ///
    /// Unparseable values are ignored and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(kind) = lookup("SENSOR_BUS").as_deref().and_then(BusKind::parse) {
            config.bus.kind = kind;
        }
        if let Some(root) = lookup("SENSORS_ROOT") {
            config.bus.sensors_root = root.trim_end_matches('/').to_string();
        }

        if let Some(path) = lookup("POWER_OBJECT_PATH") {
            config.power.path = path;
        }
        if let Some(interface) = lookup("POWER_INTERFACE") {
            config.power.interface = interface;
        }
        if let Some(property) = lookup("POWER_PROPERTY") {
            config.power.property = property;
        }

        if let Some(secs) = lookup("WALK_INTERVAL_SECS")
            && let Ok(s) = secs.parse()
        {
            config.agent.walk_interval_secs = s;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.bus.kind, BusKind::System);
        assert_eq!(config.bus.sensors_root, DEFAULT_SENSORS_ROOT);
        assert_eq!(config.power.property, "pgood");
        assert_eq!(config.agent.walk_interval_secs, 0);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SENSOR_BUS", "Session"),
            ("SENSORS_ROOT", "/xyz/sensors/"),
            ("POWER_PROPERTY", "CurrentHostState"),
            ("WALK_INTERVAL_SECS", "15"),
        ]));
        assert_eq!(config.bus.kind, BusKind::Session);
        assert_eq!(config.bus.sensors_root, "/xyz/sensors");
        assert_eq!(config.power.property, "CurrentHostState");
        assert_eq!(config.agent.walk_interval_secs, 15);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("SENSOR_BUS", "usb"),
            ("WALK_INTERVAL_SECS", "soon"),
        ]));
        assert_eq!(config.bus.kind, BusKind::System);
        assert_eq!(config.agent.walk_interval_secs, 0);
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"a b\""), "a b");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_missing_dotenv_applies_nothing() {
        assert_eq!(load_dotenv_from(Path::new("/nonexistent/.env")), 0);
    }
}
