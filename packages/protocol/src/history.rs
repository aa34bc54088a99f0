use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::{export, model::Reading};

pub const DEFAULT_WINDOW_SIZE: usize = 50;

pub const TOTAL_SERIES: &str = "Total";

/// Readings captured during a run, for export on exit. A bounded history keeps only the most
/// recent `limit` readings.
#[derive(Debug, Clone, Default)]
pub struct ReadingHistory {
    limit: Option<usize>,
    readings: VecDeque<Reading>,
}

impl ReadingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            readings: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn push(&mut self, reading: Reading) {
        if self.limit.is_some_and(|limit| self.readings.len() >= limit) {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Oldest first.
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        export::write_csv(writer, self.readings.iter())
    }

    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut out = Vec::new();
        self.write_csv(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.readings)
    }
}

/// One sample of the rolling window: a timestamp and the value of each named series.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<(String, f64)>,
}

/// Rolling window of named series, the shape a live chart consumes.
///
/// Series appear the first time they are seen; a sample missing a series leaves that column
/// empty in [`TimeSeriesWindow::export_table`].
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    capacity: usize,
    series: Vec<String>,
    samples: VecDeque<Sample>,
}

impl Default for TimeSeriesWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl TimeSeriesWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            series: Vec::new(),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Push one sample; the oldest one drops out once the window is full.
    pub fn update(&mut self, timestamp: DateTime<Utc>, values: Vec<(String, f64)>) {
        for (name, _) in &values {
            if !self.series.iter().any(|s| s == name) {
                self.series.push(name.clone());
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { timestamp, values });
    }

    /// Feed a reading: the pack total plus every present cell.
    pub fn push_reading(&mut self, reading: &Reading) {
        let mut values = vec![(TOTAL_SERIES.to_string(), reading.total_voltage)];
        values.extend(
            reading
                .present_cells()
                .map(|cell| (format!("Cell {}", cell.number), cell.individual_voltage)),
        );
        self.update(reading.timestamp, values);
    }

    pub fn series(&self) -> &[String] {
        &self.series
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Header row (`Timestamp` plus series names) followed by one row per sample.
    pub fn export_table(&self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.samples.len() + 1);
        let mut header = vec!["Timestamp".to_string()];
        header.extend(self.series.iter().cloned());
        table.push(header);

        for sample in &self.samples {
            let mut row = vec![sample.timestamp.to_rfc3339()];
            for name in &self.series {
                let cell = sample
                    .values
                    .iter()
                    .find(|(series, _)| series == name)
                    .map(|(_, v)| format!("{v:.3}"))
                    .unwrap_or_default();
                row.push(cell);
            }
            table.push(row);
        }
        table
    }
}
