//! SNMP side of the bridge: OIDs, the per-category tables and the agent
//! that serves them.

pub mod agent;
pub mod oid;
pub mod table;
pub mod tables;

pub use agent::{Access, Agent, IndexKind, TableRegistration, VarBind};
pub use oid::Oid;
pub use table::{CellRequest, CellValue, Cursor, RowContext, SensorColumn, SensorTable, TableRow};
pub use tables::{SENSOR_TABLES, TableSpec, register_sensor_tables, sensor_tables_root, unregister_sensor_tables};
