//! The five sensor tables and their registration at startup and shutdown.

use super::agent::{Access, Agent, IndexKind, TableRegistration};
use super::oid::Oid;
use super::table::{SensorColumn, SensorTable};
use crate::error::{BridgeError, Result};
use crate::sensors::{SensorCategory, SharedRegistry};
use log::{error, info, warn};
use std::sync::Arc;

/// Private enterprise arc under which the tables live.
const ENTERPRISE_ARCS: [u32; 8] = [1, 3, 6, 1, 4, 1, 49769, 1];

/// Static description of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub category: SensorCategory,
    /// Last sub-identifier below the enterprise arcs.
    pub arc: u32,
}

impl TableSpec {
    pub fn oid(&self) -> Oid {
        Oid::from(&ENTERPRISE_ARCS[..]).child(&[self.arc])
    }
}

pub const SENSOR_TABLES: [TableSpec; SensorCategory::COUNT] = [
    TableSpec {
        name: "yadroTachSensorsTable",
        category: SensorCategory::Tachometer,
        arc: 4,
    },
    TableSpec {
        name: "yadroTempSensorsTable",
        category: SensorCategory::Temperature,
        arc: 2,
    },
    TableSpec {
        name: "yadroVoltSensorsTable",
        category: SensorCategory::Voltage,
        arc: 3,
    },
    TableSpec {
        name: "yadroCurrSensorsTable",
        category: SensorCategory::Current,
        arc: 5,
    },
    TableSpec {
        name: "yadroPowerSensorsTable",
        category: SensorCategory::Power,
        arc: 6,
    },
];

/// OID covering all five tables.
pub fn sensor_tables_root() -> Oid {
    Oid::from(&ENTERPRISE_ARCS[..])
}

/// Register every sensor table with `agent`.
///
/// All or nothing: on a failure the tables registered by this call are
/// unregistered again before the error is returned.
pub fn register_sensor_tables(agent: &Agent, registry: &SharedRegistry) -> Result<()> {
    for (registered, spec) in SENSOR_TABLES.iter().enumerate() {
        let result = agent.register(TableRegistration {
            name: spec.name.to_string(),
            oid: spec.oid(),
            access: Access::ReadOnly,
            index: IndexKind::OctetString,
            min_column: SensorColumn::MIN,
            max_column: SensorColumn::MAX,
            table: Arc::new(SensorTable::new(spec.category, registry.clone())),
        });
        if let Err(e) = result {
            error!("[Agent] Failed to register {}: {}", spec.name, e);
            for done in &SENSOR_TABLES[..registered] {
                if let Err(e) = agent.unregister(&done.oid()) {
                    warn!("[Agent] Failed to roll back {}: {}", done.name, e);
                }
            }
            return Err(e);
        }
    }
    info!("[Agent] Registered {} sensor tables", SENSOR_TABLES.len());
    Ok(())
}

/// Unregister every sensor table. Each one is attempted even when an earlier
/// one fails; all failures are reported together.
pub fn unregister_sensor_tables(agent: &Agent) -> Result<()> {
    let mut failed = Vec::new();
    for spec in &SENSOR_TABLES {
        if let Err(e) = agent.unregister(&spec.oid()) {
            error!("[Agent] Failed to unregister {}: {}", spec.name, e);
            failed.push(spec.name);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::UnregisterFailed(failed.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Sensor, SensorRegistry};
    use crate::snmp::oid::encode_string_index;
    use crate::snmp::table::CellValue;

    #[test]
    fn test_table_oids() {
        let oids: Vec<String> = SENSOR_TABLES.iter().map(|t| t.oid().to_string()).collect();
        assert_eq!(
            oids,
            [
                "1.3.6.1.4.1.49769.1.4",
                "1.3.6.1.4.1.49769.1.2",
                "1.3.6.1.4.1.49769.1.3",
                "1.3.6.1.4.1.49769.1.5",
                "1.3.6.1.4.1.49769.1.6",
            ]
        );
    }

    #[test]
    fn test_register_and_unregister_all() {
        let agent = Agent::new();
        let registry = SensorRegistry::shared();
        register_sensor_tables(&agent, &registry).unwrap();
        assert_eq!(agent.registered().len(), 5);

        unregister_sensor_tables(&agent).unwrap();
        assert!(agent.registered().is_empty());
    }

    #[test]
    fn test_register_twice_fails() {
        let agent = Agent::new();
        let registry = SensorRegistry::shared();
        register_sensor_tables(&agent, &registry).unwrap();
        assert!(matches!(
            register_sensor_tables(&agent, &registry),
            Err(BridgeError::TableAlreadyRegistered(_))
        ));
        assert_eq!(agent.registered().len(), 5);
    }

    #[test]
    fn test_failed_registration_rolls_back() {
        let agent = Agent::new();
        let registry = SensorRegistry::shared();
        let temp = SENSOR_TABLES[1];
        agent
            .register(TableRegistration {
                name: "otherTable".to_string(),
                oid: temp.oid(),
                access: Access::ReadOnly,
                index: IndexKind::OctetString,
                min_column: SensorColumn::MIN,
                max_column: SensorColumn::MAX,
                table: Arc::new(SensorTable::new(temp.category, registry.clone())),
            })
            .unwrap();

        assert!(matches!(
            register_sensor_tables(&agent, &registry),
            Err(BridgeError::TableAlreadyRegistered(_))
        ));
        assert_eq!(
            agent.registered(),
            vec![("otherTable".to_string(), temp.oid())]
        );
        assert!(!agent.is_registered(&SENSOR_TABLES[0].oid()));
    }

    #[test]
    fn test_unregister_continues_after_failure() {
        let agent = Agent::new();
        let registry = SensorRegistry::shared();
        register_sensor_tables(&agent, &registry).unwrap();
        agent.unregister(&SENSOR_TABLES[1].oid()).unwrap();

        let err = unregister_sensor_tables(&agent).unwrap_err();
        match err {
            BridgeError::UnregisterFailed(names) => assert_eq!(names, "yadroTempSensorsTable"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(agent.registered().is_empty());
    }

    #[test]
    fn test_tables_read_their_own_category() {
        let agent = Agent::new();
        let registry = SensorRegistry::shared();
        {
            let mut reg = registry.write();
            let mut fan = Sensor::new("fan0");
            fan.current_value = 7200;
            reg.insert(SensorCategory::Tachometer, fan);
            let mut psu = Sensor::new("psu0");
            psu.current_value = 350;
            reg.insert(SensorCategory::Power, psu);
        }
        register_sensor_tables(&agent, &registry).unwrap();

        let fan_value = SENSOR_TABLES[0]
            .oid()
            .child(&[1, SensorColumn::Value as u32])
            .child(&encode_string_index("fan0"));
        assert_eq!(agent.get(&fan_value), CellValue::Integer(7200));

        let walked = agent.walk(&sensor_tables_root());
        assert_eq!(walked.len(), 12);
        // Tachometer (arc 4) sorts before power (arc 6).
        assert_eq!(walked[0].oid, fan_value);
        assert_eq!(walked[6].value, CellValue::Integer(350));
    }
}
