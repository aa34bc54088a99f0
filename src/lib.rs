//! cellscope: live monitor for a serial battery cell-voltage instrument.
//!
//! The instrument prints a text report per measurement cycle. This crate reassembles those
//! reports from the byte stream, turns them into structured [`protocol::Reading`]s and manages
//! the device connection around it. Parsing, reconciliation and export live in the
//! `cellscope_protocol` package, re-exported here as [`protocol`].

pub mod config;
pub mod session;
pub mod transport;

#[doc(hidden)]
pub mod actions;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;

pub use cellscope_protocol as protocol;
pub use config::SessionConfig;
pub use session::{ConnectionSession, ConnectionState, SessionError, SessionEvent};
