//! Text-to-structure parsing of one instrument record.
//!
//! A record looks like:
//!
//! ```text
//! BATERIA TOTAL (2S): 7.95V
//! Cel 1: 3.96V
//! Cel 2: 3.99V
//! Módulo 1 (0x48):
//!   A0 (1S): RAW=22645  Tensão=3.963V
//!   A1 (2S): RAW=22723  Tensão=7.953V
//! ```
//!
//! Every line shape has its own pure function so it can be checked in isolation. The record
//! parser itself never fails: unknown lines are skipped and missing fields default to zero.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::{
    model::{Module, Pin, Reading},
    reconcile::{reconcile, CumulativeCell, SectionCell, StatusThresholds},
};

static TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^BATERIA\s+TOTAL\s*\(\s*(\d+)\s*S\s*\)\s*:\s*([-+]?\d+(?:\.\d+)?)\s*V")
        .expect("valid total regex")
});
static CELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Cel\s+(\d+)\s*:\s*([-+]?\d+(?:\.\d+)?)\s*V").expect("valid cell regex")
});
static MODULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^M[óo]dulo\s+(\d+)\s*\(\s*0[xX]([0-9A-Fa-f]+)\s*\)").expect("valid module regex")
});
static PIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z]+\d+)\s*\(\s*((\d+)\s*S)\s*\)\s*:\s*RAW\s*=\s*([-+]?\d+)\s+Tens[ãa]o\s*=\s*([-+]?\d+(?:\.\d+)?)\s*V",
    )
    .expect("valid pin regex")
});

/// `BATERIA TOTAL (<N>S): <v>V` → (cell count, total voltage).
pub fn parse_total_line(line: &str) -> Option<(u32, f64)> {
    let caps = TOTAL_RE.captures(line.trim())?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// `Cel <k>: <v>V` → (cell number, voltage).
pub fn parse_cell_line(line: &str) -> Option<(u32, f64)> {
    let caps = CELL_RE.captures(line.trim())?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// `Módulo <id> (0x<hex>):` → (module id, hex address without prefix).
pub fn parse_module_header(line: &str) -> Option<(u32, String)> {
    let caps = MODULE_RE.captures(line.trim())?;
    Some((caps[1].parse().ok()?, caps[2].to_string()))
}

/// `A<n> (<k>S): RAW=<int>  Tensão=<v>V` → pin data.
pub fn parse_pin_line(line: &str) -> Option<Pin> {
    let caps = PIN_RE.captures(line.trim())?;
    Some(Pin {
        label: caps[1].to_string(),
        cell_label: caps[2].split_whitespace().collect(),
        cell_number: caps[3].parse().ok()?,
        raw: caps[4].parse().ok()?,
        voltage: caps[5].parse().ok()?,
    })
}

/// Parses records into reconciled [`Reading`]s using a fixed set of status thresholds.
#[derive(Debug, Clone, Default)]
pub struct RecordParser {
    thresholds: StatusThresholds,
}

impl RecordParser {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &StatusThresholds {
        &self.thresholds
    }

    /// Parse a record captured now.
    pub fn parse(&self, record: &str) -> Reading {
        self.parse_at(record, Utc::now())
    }

    /// Parse a record captured at `timestamp`.
    pub fn parse_at(&self, record: &str, timestamp: DateTime<Utc>) -> Reading {
        let mut reading = Reading::empty(timestamp);
        let mut total_seen = false;
        let mut section: BTreeMap<u32, SectionCell> = BTreeMap::new();
        // keyed by cell number: sorted, one pin per cell, last pin wins
        let mut cumulative: BTreeMap<u32, CumulativeCell> = BTreeMap::new();
        let mut current: Option<Module> = None;

        for line in record.trim().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !total_seen {
                if let Some((cell_count, total_voltage)) = parse_total_line(line) {
                    reading.cell_count = cell_count;
                    reading.total_voltage = total_voltage;
                    total_seen = true;
                    continue;
                }
            }

            if let Some((number, voltage)) = parse_cell_line(line) {
                section.insert(
                    number,
                    SectionCell {
                        voltage,
                        status: self.thresholds.classify(voltage),
                    },
                );
                continue;
            }

            if let Some((id, address)) = parse_module_header(line) {
                if let Some(done) = current.take() {
                    reading.modules.push(done);
                }
                current = Some(Module {
                    id,
                    address,
                    pins: Vec::new(),
                });
                continue;
            }

            if let Some(pin) = parse_pin_line(line) {
                let Some(module) = current.as_mut() else {
                    log::debug!("Pin line outside of any module ignored: {line}");
                    continue;
                };
                if let Some(previous) = cumulative.insert(
                    pin.cell_number,
                    CumulativeCell {
                        number: pin.cell_number,
                        voltage: pin.voltage,
                        raw: pin.raw,
                        module_id: module.id,
                        pin: pin.label.clone(),
                    },
                ) {
                    log::debug!(
                        "Cell {} reported by both {} and {}, keeping the later pin",
                        pin.cell_number,
                        previous.pin,
                        pin.label
                    );
                }
                module.pins.push(pin);
            }
        }

        if let Some(done) = current.take() {
            reading.modules.push(done);
        }

        let cumulative: Vec<CumulativeCell> = cumulative.into_values().collect();
        reading.cells = reconcile(&section, &cumulative, &self.thresholds);
        reading
    }
}

/// Parse a record with the default thresholds.
pub fn parse(record: &str) -> Reading {
    RecordParser::default().parse(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CellStatus;

    const EXAMPLE: &str = "BATERIA TOTAL (2S): 7.95V\nCel 1: 3.96V\nCel 2: 3.99V\nMódulo 1 (0x48):\n  A0 (1S): RAW=22645  Tensão=3.963V\n  A1 (2S): RAW=22723  Tensão=7.953V";

    #[test]
    fn test_parse_total_line() {
        assert_eq!(parse_total_line("BATERIA TOTAL (2S): 7.95V"), Some((2, 7.95)));
        assert_eq!(parse_total_line("  BATERIA TOTAL (16S): 61.2V "), Some((16, 61.2)));
        assert_eq!(parse_total_line("BATERIA TOTAL: 7.95V"), None);
    }

    #[test]
    fn test_parse_cell_line() {
        assert_eq!(parse_cell_line("Cel 1: 3.96V"), Some((1, 3.96)));
        assert_eq!(parse_cell_line("Cel 12: -0.001V"), Some((12, -0.001)));
        assert_eq!(parse_cell_line("Cel x: 3.96V"), None);
        assert_eq!(parse_cell_line("A0 (1S): RAW=1  Tensão=3.9V"), None);
    }

    #[test]
    fn test_parse_module_header() {
        assert_eq!(
            parse_module_header("Módulo 1 (0x48):"),
            Some((1, "48".to_string()))
        );
        assert_eq!(
            parse_module_header("Módulo 2 (0x4a):"),
            Some((2, "4a".to_string()))
        );
        assert_eq!(parse_module_header("Módulo 2 (48):"), None);
    }

    #[test]
    fn test_parse_pin_line() {
        let pin = parse_pin_line("  A0 (1S): RAW=22645  Tensão=3.963V").unwrap();
        assert_eq!(pin.label, "A0");
        assert_eq!(pin.cell_label, "1S");
        assert_eq!(pin.cell_number, 1);
        assert_eq!(pin.raw, 22645);
        assert_eq!(pin.voltage, 3.963);

        let negative = parse_pin_line("A3 (4S): RAW=-1  Tensão=-0.001V").unwrap();
        assert_eq!(negative.raw, -1);
        assert_eq!(negative.voltage, -0.001);

        assert!(parse_pin_line("A0 (1S): RAW=abc  Tensão=3.9V").is_none());
    }

    #[test]
    fn test_end_to_end_example() {
        let reading = parse(EXAMPLE);

        assert_eq!(reading.cell_count, 2);
        assert_eq!(reading.total_voltage, 7.95);
        assert_eq!(reading.cells.len(), 2);
        assert_eq!(reading.cells[0].number, 1);
        assert_eq!(reading.cells[0].individual_voltage, 3.96);
        assert_eq!(reading.cells[0].status, CellStatus::Good);
        assert_eq!(reading.cells[1].number, 2);
        assert_eq!(reading.cells[1].individual_voltage, 3.99);
        assert_eq!(reading.cells[1].status, CellStatus::Good);

        assert_eq!(reading.modules.len(), 1);
        assert_eq!(reading.modules[0].id, 1);
        assert_eq!(reading.modules[0].address, "48");
        let labels: Vec<&str> = reading.modules[0]
            .pins
            .iter()
            .map(|p| p.label.as_str())
            .collect();
        assert_eq!(labels, vec!["A0", "A1"]);
    }

    #[test]
    fn test_total_parse_is_total() {
        let reading = parse("garbage\nnothing useful here");
        assert_eq!(reading.cell_count, 0);
        assert_eq!(reading.total_voltage, 0.0);
        assert!(reading.cells.is_empty());
        assert!(reading.modules.is_empty());

        let empty = parse("");
        assert!(empty.cells.is_empty());
    }

    #[test]
    fn test_out_of_order_cells_are_sorted_and_unique() {
        let record = "BATERIA TOTAL (3S): 11.8V\n\
                      Módulo 2 (0x49):\n  A0 (3S): RAW=1  Tensão=11.8V\n\
                      Módulo 1 (0x48):\n  A1 (2S): RAW=1  Tensão=7.9V\n  A0 (1S): RAW=1  Tensão=3.9V\n\
                        A2 (2S): RAW=2  Tensão=7.95V";
        let reading = parse(record);

        let numbers: Vec<u32> = reading.cells.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(reading.cells[1].cumulative_voltage, 7.95);
        assert_eq!(reading.cells[1].pin, "A2");
        assert_eq!(reading.cells[2].module_id, 2);
        assert_eq!(reading.modules.len(), 2);
        assert_eq!(reading.modules[1].pins.len(), 3);
    }

    #[test]
    fn test_later_cell_line_overwrites() {
        let record = "Cel 1: 3.5V\nCel 1: 3.9V\nMódulo 1 (0x48):\n  A0 (1S): RAW=1  Tensão=3.9V";
        let reading = parse(record);
        assert_eq!(reading.cells[0].individual_voltage, 3.9);
    }

    #[test]
    fn test_only_first_total_line_counts() {
        let reading = parse("BATERIA TOTAL (2S): 7.95V\nBATERIA TOTAL (4S): 15.9V");
        assert_eq!(reading.cell_count, 2);
        assert_eq!(reading.total_voltage, 7.95);
    }

    #[test]
    fn test_pin_without_module_is_ignored() {
        let record = "A0 (1S): RAW=22645  Tensão=3.963V\nMódulo 1 (0x48):\n  A1 (2S): RAW=22723  Tensão=7.953V";
        let reading = parse(record);

        assert_eq!(reading.cells.len(), 1);
        assert_eq!(reading.cells[0].number, 2);
        assert_eq!(reading.modules[0].pins.len(), 1);
    }

    #[test]
    fn test_fallback_without_cell_section() {
        let record = "BATERIA TOTAL (2S): 7.95V\nMódulo 1 (0x48):\n  A0 (1S): RAW=22645  Tensão=3.963V\n  A1 (2S): RAW=22723  Tensão=7.953V";
        let reading = parse(record);

        assert_eq!(reading.cells[0].individual_voltage, reading.cells[0].cumulative_voltage);
        let expected = reading.cells[1].cumulative_voltage - reading.cells[0].cumulative_voltage;
        assert_eq!(reading.cells[1].individual_voltage, expected);
    }

    #[test]
    fn test_disconnected_cell_stays_in_reading() {
        let record = "Cel 1: 3.96V\nCel 2: 0.0V\nMódulo 1 (0x48):\n  A0 (1S): RAW=22645  Tensão=3.963V\n  A1 (2S): RAW=-1  Tensão=-0.001V";
        let reading = parse(record);

        assert_eq!(reading.cells.len(), 2);
        assert_eq!(reading.cells[1].individual_voltage, 0.0);
        assert_eq!(reading.cells[1].status, CellStatus::Danger);
        assert_eq!(reading.present_cells().count(), 1);
    }

    #[test]
    fn test_parser_uses_its_thresholds() {
        let parser = RecordParser::new(StatusThresholds {
            good_max: 3.95,
            ..Default::default()
        });
        let reading = parser.parse(EXAMPLE);
        assert_eq!(reading.cells[0].status, CellStatus::Warning);
    }
}
