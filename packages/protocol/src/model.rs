use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Voltage at or below which a cell is treated as physically absent by anything that renders
/// per-cell data.
pub const PRESENCE_THRESHOLD_V: f64 = 0.1;

/// Health classification of a single cell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CellStatus {
    Good,
    Warning,
    Danger,
}

/// One parsed snapshot of the battery pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Capture time on this side of the link; the instrument does not send a clock.
    pub timestamp: DateTime<Utc>,
    pub cell_count: u32,
    pub total_voltage: f64,
    pub cells: Vec<Cell>,
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    /// 1-based cell number.
    pub number: u32,
    /// Pin voltage relative to pack ground.
    pub cumulative_voltage: f64,
    pub individual_voltage: f64,
    pub raw: i32,
    pub module_id: u32,
    pub pin: String,
    pub status: CellStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: u32,
    /// Bus address without the `0x` prefix, as written by the firmware.
    pub address: String,
    pub pins: Vec<Pin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub label: String,
    pub cell_label: String,
    pub cell_number: u32,
    pub raw: i32,
    pub voltage: f64,
}

impl Reading {
    /// An empty reading stamped with `timestamp`.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cell_count: 0,
            total_voltage: 0.0,
            cells: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Cells a display or chart should show. Anything at or below 0.1 V is a disconnected
    /// input, not a real cell.
    pub fn present_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells
            .iter()
            .filter(|cell| cell.individual_voltage > PRESENCE_THRESHOLD_V)
    }

    pub fn cell(&self, number: u32) -> Option<&Cell> {
        self.cells
            .binary_search_by_key(&number, |cell| cell.number)
            .ok()
            .map(|idx| &self.cells[idx])
    }

    /// Serialize to the JSON document form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a reading back from its JSON document form.
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(number: u32, individual_voltage: f64) -> Cell {
        Cell {
            number,
            cumulative_voltage: individual_voltage,
            individual_voltage,
            raw: 0,
            module_id: 1,
            pin: format!("A{}", number - 1),
            status: CellStatus::Good,
        }
    }

    #[test]
    fn test_present_cells_filters_disconnected() {
        let mut reading = Reading::empty(Utc::now());
        reading.cells = vec![cell(1, 3.9), cell(2, 0.0), cell(3, 0.1), cell(4, 0.11)];

        let present: Vec<u32> = reading.present_cells().map(|c| c.number).collect();
        assert_eq!(present, vec![1, 4]);
        assert_eq!(reading.cells.len(), 4);
    }

    #[test]
    fn test_cell_lookup() {
        let mut reading = Reading::empty(Utc::now());
        reading.cells = vec![cell(1, 3.9), cell(3, 3.8)];

        assert_eq!(reading.cell(3).map(|c| c.individual_voltage), Some(3.8));
        assert!(reading.cell(2).is_none());
    }

    #[test]
    fn test_status_text_form() {
        assert_eq!(CellStatus::Danger.to_string(), "danger");
        assert_eq!("warning".parse::<CellStatus>().unwrap(), CellStatus::Warning);
        assert_eq!(
            serde_json::to_string(&CellStatus::Good).unwrap(),
            "\"good\""
        );
    }

    #[test]
    fn test_json_document_uses_camel_case() {
        let mut reading = Reading::empty(Utc::now());
        reading.cells = vec![cell(1, 3.9)];
        let json = reading.to_json().unwrap();

        assert!(json.contains("\"totalVoltage\""));
        assert!(json.contains("\"individualVoltage\""));
        assert_eq!(Reading::from_json(&json).unwrap(), reading);
    }
}
