//! Device transport seam.
//!
//! The session only talks to a device through these traits: a [`DeviceTransport`] hands out
//! a [`DeviceHandle`], the handle is opened with fixed framing parameters and then yields at
//! most one [`HandleReader`] and one [`HandleWriter`] at a time.

pub mod memory;
pub mod ports;
pub mod serial;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serialport::{DataBits, FlowControl, Parity, StopBits};

pub use memory::{MemoryFeed, MemoryStats, MemoryTransport};
pub use serial::SerialTransport;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("serial transport is not available on this system")]
    Unavailable,
    #[error("no device selected: {0}")]
    NoDevice(String),
    #[error("device is not open")]
    NotOpen,
    #[error("device is already open")]
    AlreadyOpen,
    #[error("{0} is already bound to this device")]
    Locked(&'static str),
    #[error("stream aborted")]
    Aborted,
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Errors a stream produces when it is torn down underneath a pending operation.
    pub fn is_teardown_class(&self) -> bool {
        match self {
            TransportError::Aborted | TransportError::NotOpen | TransportError::Disconnected(_) => {
                true
            }
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Line settings used to open the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    #[serde(with = "parity_serde")]
    pub parity: Parity,
    #[serde(with = "flow_control_serde")]
    pub flow_control: FlowControl,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self::with_baud_rate(DEFAULT_BAUD_RATE)
    }
}

impl SerialParams {
    /// 8N1 without flow control, the only framing the instrument speaks.
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }

    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = b.baud_rate(self.baud_rate).data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(self.parity).flow_control(self.flow_control)
    }
}

mod parity_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use serialport::Parity;

    pub fn serialize<S: Serializer>(parity: &Parity, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match parity {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Parity, D::Error> {
        match String::deserialize(d)?.to_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            other => Err(serde::de::Error::custom(format!("unknown parity '{other}'"))),
        }
    }
}

mod flow_control_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use serialport::FlowControl;

    pub fn serialize<S: Serializer>(flow: &FlowControl, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match flow {
            FlowControl::None => "none",
            FlowControl::Software => "software",
            FlowControl::Hardware => "hardware",
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FlowControl, D::Error> {
        match String::deserialize(d)?.to_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "software" => Ok(FlowControl::Software),
            "hardware" => Ok(FlowControl::Hardware),
            other => Err(serde::de::Error::custom(format!(
                "unknown flow control '{other}'"
            ))),
        }
    }
}

/// Source of device handles (a serial port enumerator, an in-memory fake, ...).
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Whether this kind of transport exists at all on the running system.
    fn is_available(&self) -> bool;

    /// Pick a device. Selection may involve the user (a configured or prompted port name).
    async fn request_handle(&self) -> Result<Box<dyn DeviceHandle>, TransportError>;
}

#[async_trait]
pub trait DeviceHandle: Send {
    fn name(&self) -> String;

    async fn open(&mut self, params: &SerialParams) -> Result<(), TransportError>;

    /// Bind the reading side. Fails with [`TransportError::Locked`] while another reader is
    /// still bound.
    fn reader(&mut self) -> Result<Box<dyn HandleReader>, TransportError>;

    /// Bind the writing side. Same exclusivity rule as [`DeviceHandle::reader`].
    fn writer(&mut self) -> Result<Box<dyn HandleWriter>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait HandleReader: Send {
    /// Wait for the next payload. `Ok(None)` is a clean end of stream; an empty payload just
    /// means nothing arrived this time.
    async fn read(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the reader's lock on the handle. Safe to call more than once.
    async fn cancel(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait HandleWriter: Send {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Release the writer's lock on the handle. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Exclusive binding of one side (reader or writer) of a handle.
///
/// Released explicitly or on drop, whichever comes first.
#[derive(Debug)]
pub struct StreamLock {
    flag: Arc<AtomicBool>,
    held: bool,
}

impl StreamLock {
    pub fn acquire(flag: &Arc<AtomicBool>, side: &'static str) -> Result<Self, TransportError> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::Locked(side));
        }
        Ok(Self {
            flag: Arc::clone(flag),
            held: true,
        })
    }

    /// Returns `false` when the lock had already been released.
    pub fn release(&mut self) -> bool {
        if !self.held {
            return false;
        }
        self.held = false;
        self.flag.store(false, Ordering::Release);
        true
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for StreamLock {
    fn drop(&mut self) {
        self.release();
    }
}
