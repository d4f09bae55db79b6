//! In-process table registry answering GET and GETNEXT.
//!
//! This is the polling-engine side of the table contract: tables register
//! under an OID with their column range and iterator, and the agent resolves
//! instance OIDs of the form `<table>.1.<column>.<index>` by iterating rows.
//! PDU encoding and transport are left to whatever front end drives it.

use super::oid::{Oid, decode_string_index, encode_string_index};
use super::table::{CellValue, SensorTable};
use crate::error::{BridgeError, Result};
use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sub-identifier of the table entry below the table OID.
pub const ENTRY_ARC: u32 = 1;

/// Access capability of a registered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
}

/// Index syntax of a registered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// A single variable-length OCTET STRING.
    OctetString,
}

/// Everything the agent needs to serve a table.
#[derive(Clone)]
pub struct TableRegistration {
    pub name: String,
    pub oid: Oid,
    pub access: Access,
    pub index: IndexKind,
    pub min_column: u32,
    pub max_column: u32,
    pub table: Arc<SensorTable>,
}

impl TableRegistration {
    fn column_oid(&self, column: u32) -> Oid {
        self.oid.child(&[ENTRY_ARC, column])
    }

    fn has_column(&self, column: u32) -> bool {
        (self.min_column..=self.max_column).contains(&column)
    }
}

/// A variable binding in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarBind {
    pub oid: Oid,
    pub value: CellValue,
}

/// Registered tables keyed by OID.
#[derive(Default)]
pub struct Agent {
    tables: RwLock<BTreeMap<Oid, TableRegistration>>,
}

impl Agent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Fails if the OID is taken or overlaps another table.
    pub fn register(&self, registration: TableRegistration) -> Result<()> {
        let mut tables = self.tables.write();
        let overlaps = tables
            .keys()
            .any(|oid| oid.starts_with(&registration.oid) || registration.oid.starts_with(oid));
        if overlaps {
            return Err(BridgeError::TableAlreadyRegistered(
                registration.oid.to_string(),
            ));
        }

        debug!(
            "[Agent] Registered {} at {} (columns {}..={})",
            registration.name, registration.oid, registration.min_column, registration.max_column
        );
        tables.insert(registration.oid.clone(), registration);
        Ok(())
    }

    /// Remove the table registered at exactly `oid`.
    pub fn unregister(&self, oid: &Oid) -> Result<TableRegistration> {
        let registration = self
            .tables
            .write()
            .remove(oid)
            .ok_or_else(|| BridgeError::TableNotRegistered(oid.to_string()))?;
        info!("[Agent] Dropped {}", registration.name);
        Ok(registration)
    }

    /// Names and OIDs of all registered tables, in OID order.
    pub fn registered(&self) -> Vec<(String, Oid)> {
        self.tables
            .read()
            .values()
            .map(|r| (r.name.clone(), r.oid.clone()))
            .collect()
    }

    pub fn is_registered(&self, oid: &Oid) -> bool {
        self.tables.read().contains_key(oid)
    }

    /// Resolve one instance OID.
    pub fn get(&self, oid: &Oid) -> CellValue {
        let tables = self.tables.read();
        let Some(registration) = tables.values().find(|r| oid.starts_with(&r.oid)) else {
            return CellValue::NoSuchObject;
        };
        let Some(suffix) = oid.suffix_after(&registration.oid) else {
            return CellValue::NoSuchObject;
        };

        let [ENTRY_ARC, column, index @ ..] = suffix else {
            return CellValue::NoSuchObject;
        };
        if !registration.has_column(*column) {
            return CellValue::NoSuchObject;
        }
        let Some(name) = decode_string_index(index) else {
            return CellValue::NoSuchInstance;
        };

        let table = &registration.table;
        let context = table
            .rows()
            .into_iter()
            .find(|row| row.index == name)
            .map(|row| row.context);
        table.get_cell(context.as_ref(), *column)
    }

    /// Resolve several OIDs; each one is answered independently.
    pub fn get_many(&self, oids: &[Oid]) -> Vec<VarBind> {
        oids.iter()
            .map(|oid| VarBind {
                oid: oid.clone(),
                value: self.get(oid),
            })
            .collect()
    }

    /// The first readable instance strictly after `oid`.
    pub fn get_next(&self, oid: &Oid) -> Option<VarBind> {
        let tables = self.tables.read();
        for registration in tables.values() {
            let table = &registration.table;

            let mut rows: Vec<_> = table
                .rows()
                .into_iter()
                .map(|row| (encode_string_index(&row.index), row.context))
                .collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));

            for column in registration.min_column..=registration.max_column {
                let column_oid = registration.column_oid(column);
                for (index, context) in &rows {
                    let candidate = column_oid.child(index);
                    if candidate <= *oid {
                        continue;
                    }
                    let value = table.get_cell(Some(context), column);
                    if value.is_value() {
                        return Some(VarBind {
                            oid: candidate,
                            value,
                        });
                    }
                }
            }
        }
        None
    }

    /// Every readable instance under `prefix`, in GETNEXT order.
    pub fn walk(&self, prefix: &Oid) -> Vec<VarBind> {
        let mut out = Vec::new();
        let mut cursor = prefix.clone();
        while let Some(varbind) = self.get_next(&cursor) {
            if !varbind.oid.starts_with(prefix) {
                break;
            }
            cursor = varbind.oid.clone();
            out.push(varbind);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Sensor, SensorCategory, SensorRegistry, SharedRegistry};
    use crate::snmp::table::SensorColumn;

    fn table_oid() -> Oid {
        "1.3.6.1.4.1.49769.1.2".parse().unwrap()
    }

    fn registration(oid: Oid, registry: SharedRegistry) -> TableRegistration {
        TableRegistration {
            name: "testTable".to_string(),
            oid,
            access: Access::ReadOnly,
            index: IndexKind::OctetString,
            min_column: SensorColumn::MIN,
            max_column: SensorColumn::MAX,
            table: Arc::new(SensorTable::new(SensorCategory::Temperature, registry)),
        }
    }

    fn populated() -> (Agent, SharedRegistry) {
        let registry = SensorRegistry::shared();
        {
            let mut reg = registry.write();
            // Inserted out of index order on purpose.
            let mut long = Sensor::new("cpu10");
            long.current_value = 50;
            reg.insert(SensorCategory::Temperature, long);
            let mut short = Sensor::new("cpu1");
            short.current_value = 40;
            reg.insert(SensorCategory::Temperature, short);
        }
        let agent = Agent::new();
        agent
            .register(registration(table_oid(), registry.clone()))
            .unwrap();
        (agent, registry)
    }

    fn cell(column: u32, name: &str) -> Oid {
        table_oid().child(&[ENTRY_ARC, column]).child(&encode_string_index(name))
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (agent, registry) = populated();
        let err = agent
            .register(registration(table_oid(), registry.clone()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::TableAlreadyRegistered(_)));

        let nested = table_oid().child(&[1]);
        assert!(agent.register(registration(nested, registry)).is_err());
        assert_eq!(agent.registered().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let (agent, _registry) = populated();
        assert!(agent.unregister(&table_oid()).is_ok());
        assert!(!agent.is_registered(&table_oid()));
        assert!(matches!(
            agent.unregister(&table_oid()),
            Err(BridgeError::TableNotRegistered(_))
        ));
        assert_eq!(
            agent.get(&cell(SensorColumn::Value as u32, "cpu1")),
            CellValue::NoSuchObject
        );
    }

    #[test]
    fn test_get() {
        let (agent, _registry) = populated();
        assert_eq!(agent.get(&cell(2, "cpu1")), CellValue::Integer(40));
        assert_eq!(agent.get(&cell(2, "cpu10")), CellValue::Integer(50));
        assert_eq!(agent.get(&cell(7, "cpu10")), CellValue::Integer(1));
        assert_eq!(agent.get(&cell(2, "cpu2")), CellValue::NoSuchInstance);
        assert_eq!(agent.get(&cell(1, "cpu1")), CellValue::NoSuchObject);
        assert_eq!(agent.get(&cell(8, "cpu1")), CellValue::NoSuchObject);
        assert_eq!(agent.get(&table_oid()), CellValue::NoSuchObject);
        assert_eq!(
            agent.get(&"1.3.6.1.2.1.1.1.0".parse().unwrap()),
            CellValue::NoSuchObject
        );
    }

    #[test]
    fn test_get_many_continues_past_errors() {
        let (agent, _registry) = populated();
        let values: Vec<_> = agent
            .get_many(&[cell(2, "ghost"), cell(99, "cpu1"), cell(3, "cpu1")])
            .into_iter()
            .map(|vb| vb.value)
            .collect();
        assert_eq!(
            values,
            vec![
                CellValue::NoSuchInstance,
                CellValue::NoSuchObject,
                CellValue::Integer(0)
            ]
        );
    }

    #[test]
    fn test_walk_orders_by_column_then_index() {
        let (agent, _registry) = populated();
        let walked = agent.walk(&table_oid());

        assert_eq!(walked.len(), 12);
        // "cpu1" encodes shorter, so it sorts before "cpu10".
        assert_eq!(walked[0].oid, cell(2, "cpu1"));
        assert_eq!(walked[0].value, CellValue::Integer(40));
        assert_eq!(walked[1].oid, cell(2, "cpu10"));
        assert_eq!(walked[2].oid, cell(3, "cpu1"));
        assert_eq!(walked[11].oid, cell(7, "cpu10"));
        assert!(walked.windows(2).all(|w| w[0].oid < w[1].oid));
    }

    #[test]
    fn test_get_next_skips_disabled_and_ends() {
        let (agent, registry) = populated();
        registry
            .write()
            .set_enabled(SensorCategory::Temperature, "cpu1", false);

        let first = agent.get_next(&table_oid()).unwrap();
        assert_eq!(first.oid, cell(2, "cpu10"));
        assert!(agent.get_next(&cell(7, "cpu10")).is_none());
    }
}
