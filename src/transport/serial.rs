use async_trait::async_trait;
use std::{
    io::{Read, Write},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use serialport::SerialPort;

use super::{
    ports::available_ports_sorted, DeviceHandle, DeviceTransport, HandleReader, HandleWriter,
    SerialParams, StreamLock, TransportError,
};

/// How long one blocking read may wait before handing control back to the read loop.
const READ_POLL: Duration = Duration::from_millis(50);

type BoxedPort = Box<dyn SerialPort>;

/// Serial ports through the `serialport` crate.
#[derive(Debug, Clone, Default)]
pub struct SerialTransport {
    port_name: Option<String>,
}

impl SerialTransport {
    /// `port_name` is the user's choice; without one the only connected port is used.
    pub fn new(port_name: Option<String>) -> Self {
        Self { port_name }
    }

    fn select_port(&self) -> Result<String, TransportError> {
        if let Some(name) = &self.port_name {
            return Ok(name.clone());
        }
        let ports = available_ports_sorted();
        match ports.as_slice() {
            [] => Err(TransportError::NoDevice("no serial ports found".to_string())),
            [only] => Ok(only.port_name.clone()),
            many => Err(TransportError::NoDevice(format!(
                "several ports available, pick one with --port: {}",
                many.iter()
                    .map(|p| p.port_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[async_trait]
impl DeviceTransport for SerialTransport {
    fn is_available(&self) -> bool {
        serialport::available_ports().is_ok()
    }

    async fn request_handle(&self) -> Result<Box<dyn DeviceHandle>, TransportError> {
        let name = self.select_port()?;
        log::info!("Selected serial port {name}");
        Ok(Box::new(SerialHandle::new(name)))
    }
}

pub struct SerialHandle {
    name: String,
    port: Option<BoxedPort>,
    reader_flag: Arc<AtomicBool>,
    writer_flag: Arc<AtomicBool>,
}

impl SerialHandle {
    fn new(name: String) -> Self {
        Self {
            name,
            port: None,
            reader_flag: Arc::new(AtomicBool::new(false)),
            writer_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    fn clone_port(&self) -> Result<BoxedPort, TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::NotOpen)?;
        Ok(port.try_clone()?)
    }
}

#[async_trait]
impl DeviceHandle for SerialHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open(&mut self, params: &SerialParams) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let builder = params.apply_builder(serialport::new(self.name.clone(), params.baud_rate));
        let builder = builder.timeout(READ_POLL);
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|err| TransportError::Io(std::io::Error::other(err)))??;
        log::info!("Opened {} at {} baud", self.name, params.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn reader(&mut self) -> Result<Box<dyn HandleReader>, TransportError> {
        let lock = StreamLock::acquire(&self.reader_flag, "reader")?;
        let port = self.clone_port()?;
        Ok(Box::new(SerialReader {
            port: Some(port),
            lock,
        }))
    }

    fn writer(&mut self) -> Result<Box<dyn HandleWriter>, TransportError> {
        let lock = StreamLock::acquire(&self.writer_flag, "writer")?;
        let port = self.clone_port()?;
        Ok(Box::new(SerialWriter {
            port: Some(port),
            lock,
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.port.take() {
            Some(port) => {
                drop(port);
                log::info!("Closed {}", self.name);
            }
            None => log::debug!("{} already closed", self.name),
        }
        Ok(())
    }
}

struct SerialReader {
    // taken out while a blocking read is in flight
    port: Option<BoxedPort>,
    lock: StreamLock,
}

#[async_trait]
impl HandleReader for SerialReader {
    async fn read(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.lock.is_held() {
            return Err(TransportError::Aborted);
        }
        let mut port = self.port.take().ok_or(TransportError::Aborted)?;
        let (port, result) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; 1024];
            let result = port.read(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            });
            (port, result)
        })
        .await
        .map_err(|err| TransportError::Io(std::io::Error::other(err)))?;
        self.port = Some(port);

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(Some(Vec::new())),
            Err(err) => Err(err.into()),
        }
    }

    async fn cancel(&mut self) -> Result<(), TransportError> {
        self.port = None;
        self.lock.release();
        Ok(())
    }
}

struct SerialWriter {
    port: Option<BoxedPort>,
    lock: StreamLock,
}

#[async_trait]
impl HandleWriter for SerialWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.lock.is_held() {
            return Err(TransportError::Aborted);
        }
        let mut port = self.port.take().ok_or(TransportError::Aborted)?;
        let data = data.to_vec();
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&data).and_then(|_| port.flush());
            (port, result)
        })
        .await
        .map_err(|err| TransportError::Io(std::io::Error::other(err)))?;
        self.port = Some(port);
        Ok(result?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.lock.release();
        if let Some(mut port) = self.port.take() {
            port.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_port_wins() {
        let transport = SerialTransport::new(Some("/dev/ttyUSB7".to_string()));
        assert_eq!(transport.select_port().unwrap(), "/dev/ttyUSB7");
    }

    #[tokio::test]
    async fn test_unopened_handle_refuses_streams() {
        let mut handle = SerialHandle::new("/dev/null-port".to_string());
        assert!(matches!(handle.reader(), Err(TransportError::NotOpen)));
        assert!(matches!(handle.writer(), Err(TransportError::NotOpen)));
        // the failed reader bind must not leave the lock taken
        assert!(matches!(handle.reader(), Err(TransportError::NotOpen)));
        handle.close().await.unwrap();
    }
}
