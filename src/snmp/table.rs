//! Read-only SNMP table over one sensor category.
//!
//! Rows are iterated the way an iterator-based table helper expects: the
//! engine asks for the first row, then for the row after a [`Cursor`] it was
//! handed back, until the table is exhausted. Each row carries its index
//! (the sensor name) and a [`RowContext`] the engine later passes back when
//! it fetches column values.

use crate::sensors::{Sensor, SensorCategory, SharedRegistry};
use serde::Serialize;
use strum::FromRepr;

/// Column IDs of a sensor table entry.
///
/// Column 1 is the sensor name, used only as the index and not readable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum SensorColumn {
    Value = 2,
    WarningLow = 3,
    WarningHigh = 4,
    CriticalLow = 5,
    CriticalHigh = 6,
    State = 7,
}

impl SensorColumn {
    pub const MIN: u32 = SensorColumn::Value as u32;
    pub const MAX: u32 = SensorColumn::State as u32;

    /// Read this column from a sensor. Unset thresholds read as 0.
    pub fn read(self, sensor: &Sensor) -> i64 {
        match self {
            SensorColumn::Value => sensor.current_value,
            SensorColumn::WarningLow => sensor.warning_low.unwrap_or(0),
            SensorColumn::WarningHigh => sensor.warning_high.unwrap_or(0),
            SensorColumn::CriticalLow => sensor.critical_low.unwrap_or(0),
            SensorColumn::CriticalHigh => sensor.critical_high.unwrap_or(0),
            SensorColumn::State => sensor.state.as_i64(),
        }
    }
}

/// Iteration position. Passed by value between `get_first`/`get_next` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    index: usize,
}

impl Cursor {
    pub fn position(&self) -> usize {
        self.index
    }
}

/// Identifies the sensor behind a row. Resolved again on every fetch, so a
/// row removed after iteration reads as "no such instance".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowContext {
    pub category: SensorCategory,
    pub name: String,
}

/// One row produced by iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Index value (the sensor name).
    pub index: String,
    pub context: RowContext,
    /// Where to continue iteration from.
    pub next: Cursor,
}

/// Result of fetching one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Integer(i64),
    NoSuchObject,
    NoSuchInstance,
}

impl CellValue {
    pub fn is_value(&self) -> bool {
        matches!(self, CellValue::Integer(_))
    }
}

/// One cell of a GET batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRequest {
    pub context: Option<RowContext>,
    pub column: u32,
}

/// A sensor category exposed as a table.
pub struct SensorTable {
    category: SensorCategory,
    registry: SharedRegistry,
}

impl SensorTable {
    pub fn new(category: SensorCategory, registry: SharedRegistry) -> Self {
        Self { category, registry }
    }

    pub fn category(&self) -> SensorCategory {
        self.category
    }

    /// First enabled row, if any.
    pub fn get_first(&self) -> Option<TableRow> {
        self.get_next(Cursor::default())
    }

    /// First enabled row at or after `cursor`, or `None` at end of table.
    pub fn get_next(&self, cursor: Cursor) -> Option<TableRow> {
        let registry = self.registry.read();
        let (position, sensor) = registry
            .sensors(self.category)
            .iter()
            .enumerate()
            .skip(cursor.index)
            .find(|(_, sensor)| sensor.enabled)?;

        Some(TableRow {
            index: sensor.name.clone(),
            context: RowContext {
                category: self.category,
                name: sensor.name.clone(),
            },
            next: Cursor {
                index: position + 1,
            },
        })
    }

    /// All enabled rows, in iteration order.
    pub fn rows(&self) -> Vec<TableRow> {
        let mut rows = Vec::new();
        let mut row = self.get_first();
        while let Some(current) = row {
            row = self.get_next(current.next);
            rows.push(current);
        }
        rows
    }

    /// Answer a batch of cell reads.
    ///
    /// Each cell is answered on its own: a missing or stale row gives
    /// `NoSuchInstance`, an unknown column `NoSuchObject`, and neither stops
    /// the rest of the batch. The whole batch sees one registry snapshot.
    pub fn handle_get(&self, requests: &[CellRequest]) -> Vec<CellValue> {
        let registry = self.registry.read();
        requests
            .iter()
            .map(|request| {
                let sensor = request
                    .context
                    .as_ref()
                    .filter(|ctx| ctx.category == self.category)
                    .and_then(|ctx| registry.get(ctx.category, &ctx.name));
                cell_value(sensor, request.column)
            })
            .collect()
    }

    /// Read a single cell.
    pub fn get_cell(&self, context: Option<&RowContext>, column: u32) -> CellValue {
        let request = CellRequest {
            context: context.cloned(),
            column,
        };
        self.handle_get(std::slice::from_ref(&request))
            .pop()
            .unwrap_or(CellValue::NoSuchInstance)
    }
}

fn cell_value(sensor: Option<&Sensor>, column: u32) -> CellValue {
    let Some(sensor) = sensor.filter(|s| s.enabled) else {
        return CellValue::NoSuchInstance;
    };
    match SensorColumn::from_repr(column) {
        Some(column) => CellValue::Integer(column.read(sensor)),
        None => CellValue::NoSuchObject,
    }
}
