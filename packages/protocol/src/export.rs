use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Reading;

pub const CSV_HEADER: [&str; 8] = [
    "Timestamp",
    "Cell",
    "Cumulative Voltage (V)",
    "Individual Voltage (V)",
    "RAW",
    "Module",
    "Pin",
    "Status",
];

/// Statistics over the cells of one reading that carry a positive voltage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub spread: f64,
}

/// Structural check: a finite total and cells in strictly ascending order.
/// Value ranges are not checked.
pub fn validate(reading: &Reading) -> bool {
    reading.total_voltage.is_finite()
        && reading
            .cells
            .windows(2)
            .all(|pair| pair[0].number < pair[1].number)
}

/// Structural check of a reading in its JSON document form.
pub fn validate_document(document: &Value) -> bool {
    document.get("totalVoltage").is_some_and(Value::is_number)
        && document.get("cells").is_some_and(Value::is_array)
        && document.get("modules").is_some_and(Value::is_array)
}

pub fn summarize(reading: &Reading) -> Summary {
    let voltages: Vec<f64> = reading
        .cells
        .iter()
        .map(|cell| cell.individual_voltage)
        .filter(|v| *v > 0.0)
        .collect();

    if voltages.is_empty() {
        return Summary::default();
    }

    let min = voltages.iter().copied().fold(f64::INFINITY, f64::min);
    let max = voltages.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let average = voltages.iter().sum::<f64>() / voltages.len() as f64;
    Summary {
        count: voltages.len(),
        min,
        max,
        average,
        spread: max - min,
    }
}

/// One CSV row per cell of `reading`.
pub fn csv_rows(reading: &Reading) -> Vec<[String; 8]> {
    let timestamp = reading.timestamp.to_rfc3339();
    reading
        .cells
        .iter()
        .map(|cell| {
            [
                timestamp.clone(),
                cell.number.to_string(),
                format!("{:.3}", cell.cumulative_voltage),
                format!("{:.3}", cell.individual_voltage),
                cell.raw.to_string(),
                cell.module_id.to_string(),
                cell.pin.clone(),
                cell.status.to_string(),
            ]
        })
        .collect()
}

/// Render any number of readings as one CSV table.
pub fn write_csv<'a, W, I>(writer: W, readings: I) -> Result<(), csv::Error>
where
    W: std::io::Write,
    I: IntoIterator<Item = &'a Reading>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for reading in readings {
        for row in csv_rows(reading) {
            wtr.write_record(&row)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv(reading: &Reading) -> Result<String, csv::Error> {
    let mut out = Vec::new();
    write_csv(&mut out, [reading])?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    const EXAMPLE: &str = "BATERIA TOTAL (2S): 7.95V\nCel 1: 3.96V\nCel 2: 3.99V\nMódulo 1 (0x48):\n  A0 (1S): RAW=22645  Tensão=3.963V\n  A1 (2S): RAW=22723  Tensão=7.953V";

    #[test]
    fn test_validate_parsed_reading() {
        let reading = parse(EXAMPLE);
        assert!(validate(&reading));

        let mut broken = reading.clone();
        broken.total_voltage = f64::NAN;
        assert!(!validate(&broken));

        let mut unsorted = reading;
        unsorted.cells.reverse();
        assert!(!validate(&unsorted));
    }

    #[test]
    fn test_validate_document() {
        let reading = parse(EXAMPLE);
        let doc = serde_json::to_value(&reading).unwrap();
        assert!(validate_document(&doc));

        assert!(!validate_document(&json!({"totalVoltage": "7.95", "cells": [], "modules": []})));
        assert!(!validate_document(&json!({"totalVoltage": 7.95, "cells": {}, "modules": []})));
        assert!(!validate_document(&json!({"totalVoltage": 7.95, "cells": []})));
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&parse(EXAMPLE));
        assert_eq!(summary.count, 2);
        assert_eq!(summary.min, 3.96);
        assert_eq!(summary.max, 3.99);
        assert!((summary.average - 3.975).abs() < 1e-9);
        assert!((summary.spread - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_ignores_dead_cells() {
        let record = "Cel 1: 3.9V\nCel 2: 0.0V\nMódulo 1 (0x48):\n  A0 (1S): RAW=1  Tensão=3.9V\n  A1 (2S): RAW=-1  Tensão=-0.001V";
        let summary = summarize(&parse(record));
        assert_eq!(summary.count, 1);
        assert_eq!(summary.spread, 0.0);

        assert_eq!(summarize(&parse("nothing")), Summary::default());
    }

    #[test]
    fn test_csv_layout() {
        let csv = to_csv(&parse(EXAMPLE)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Timestamp,Cell,Cumulative Voltage (V),Individual Voltage (V),RAW,Module,Pin,Status"
        );
        assert!(lines[1].ends_with(",1,3.963,3.960,22645,1,A0,good"));
        assert!(lines[2].ends_with(",2,7.953,3.990,22723,1,A1,good"));
    }

    #[test]
    fn test_json_document_keeps_every_field() {
        let reading = parse(EXAMPLE);
        let doc = serde_json::to_value(&reading).unwrap();

        for key in ["timestamp", "cellCount", "totalVoltage", "cells", "modules"] {
            assert!(doc.get(key).is_some(), "missing {key}");
        }
        let cell = &doc["cells"][0];
        for key in [
            "number",
            "cumulativeVoltage",
            "individualVoltage",
            "raw",
            "moduleId",
            "pin",
            "status",
        ] {
            assert!(cell.get(key).is_some(), "missing cell.{key}");
        }
        assert_eq!(doc["modules"][0]["pins"][1]["cellLabel"], "2S");
    }
}
