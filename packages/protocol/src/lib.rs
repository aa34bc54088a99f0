//! Instrument record handling for cellscope: framing of the raw text stream, parsing of the
//! battery report format, cell reconciliation and export helpers.
//!
//! Nothing in here performs I/O; the connection lifecycle lives in the `cellscope` crate.

pub mod export;
pub mod framer;
pub mod history;
pub mod model;
pub mod parser;
pub mod reconcile;

pub use export::{summarize, validate, validate_document, Summary};
pub use framer::{RecordFramer, Utf8StreamDecoder, DEFAULT_BUFFER_CAP, RECORD_SEPARATOR};
pub use history::{ReadingHistory, Sample, TimeSeriesWindow, DEFAULT_WINDOW_SIZE, TOTAL_SERIES};
pub use model::{Cell, CellStatus, Module, Pin, Reading, PRESENCE_THRESHOLD_V};
pub use parser::{parse, RecordParser};
pub use reconcile::{classify, StatusThresholds};
