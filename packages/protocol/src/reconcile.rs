use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Cell, CellStatus};

/// Voltage bands used to grade a cell, tuned for a nominal 3.0–4.2 V lithium chemistry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    /// Below this the input is treated as disconnected.
    pub absent_below: f64,
    /// Lower bound of the healthy band (inclusive).
    pub good_min: f64,
    /// Upper bound of the healthy band (inclusive); above it the cell is overcharged.
    pub good_max: f64,
    /// Anything between `absent_below` and this value is a deeply discharged cell.
    pub low_warning_below: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            absent_below: 0.1,
            good_min: 3.0,
            good_max: 4.3,
            low_warning_below: 2.5,
        }
    }
}

impl StatusThresholds {
    /// Grade `voltage` by magnitude, so a reversed lead grades the same as a normal one.
    pub fn classify(&self, voltage: f64) -> CellStatus {
        let v = voltage.abs();
        if v < self.absent_below {
            CellStatus::Danger
        } else if (self.good_min..=self.good_max).contains(&v) {
            CellStatus::Good
        } else if v > self.good_max || (v > self.absent_below && v < self.low_warning_below) {
            CellStatus::Warning
        } else {
            // 2.5..3.0 V and the exact lower threshold are tolerated
            CellStatus::Good
        }
    }
}

/// Grade a cell voltage with the default thresholds.
pub fn classify(voltage: f64) -> CellStatus {
    StatusThresholds::default().classify(voltage)
}

/// Entry from the `Cel <k>: <v>V` section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionCell {
    pub voltage: f64,
    pub status: CellStatus,
}

/// Cell as seen from a module pin, before reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeCell {
    pub number: u32,
    pub voltage: f64,
    pub raw: i32,
    pub module_id: u32,
    pub pin: String,
}

/// Merge the per-pin cumulative readings with the direct per-cell section.
///
/// `cumulative` must already be sorted ascending by number. With a non-empty section every
/// cell takes its value from there (missing entries become 0 V / danger). With an empty
/// section each cell is derived as the difference to the previous pin, which only holds when
/// pins really measure a cumulative stack in ascending order.
pub fn reconcile(
    section: &BTreeMap<u32, SectionCell>,
    cumulative: &[CumulativeCell],
    thresholds: &StatusThresholds,
) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(cumulative.len());

    if !section.is_empty() {
        for pin_cell in cumulative {
            let (individual_voltage, status) = match section.get(&pin_cell.number) {
                Some(entry) => (entry.voltage, entry.status),
                None => (0.0, CellStatus::Danger),
            };
            cells.push(to_cell(pin_cell, individual_voltage, status));
        }
        return cells;
    }

    let mut previous: Option<f64> = None;
    for pin_cell in cumulative {
        let individual_voltage = match previous {
            Some(below) => pin_cell.voltage - below,
            None => pin_cell.voltage,
        };
        previous = Some(pin_cell.voltage);
        cells.push(to_cell(
            pin_cell,
            individual_voltage,
            thresholds.classify(individual_voltage),
        ));
    }
    cells
}

fn to_cell(pin_cell: &CumulativeCell, individual_voltage: f64, status: CellStatus) -> Cell {
    Cell {
        number: pin_cell.number,
        cumulative_voltage: pin_cell.voltage,
        individual_voltage,
        raw: pin_cell.raw,
        module_id: pin_cell.module_id,
        pin: pin_cell.pin.clone(),
        status,
    }
}
