//! In-process transport fed through a channel.
//!
//! Used to replay captured instrument output without hardware, and by the lifecycle tests to
//! script stream contents, end-of-stream and failures.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    DeviceHandle, DeviceTransport, HandleReader, HandleWriter, SerialParams, StreamLock,
    TransportError,
};

#[derive(Debug)]
enum FeedItem {
    Data(Bytes),
    End,
    Fail(String),
    Abort,
}

/// Counters of everything the session did to the fake device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub handles_requested: usize,
    pub opens: usize,
    pub closes: usize,
    pub readers_bound: usize,
    pub writers_bound: usize,
    pub reader_cancels: usize,
    pub writer_closes: usize,
    /// Handle `close` calls, including failed ones.
    pub close_attempts: usize,
    /// Reader `cancel` calls, including failed ones.
    pub cancel_attempts: usize,
}

#[derive(Default)]
struct Counters {
    handles_requested: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    readers_bound: AtomicUsize,
    writers_bound: AtomicUsize,
    reader_cancels: AtomicUsize,
    writer_closes: AtomicUsize,
    close_attempts: AtomicUsize,
    cancel_attempts: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    fail_open: AtomicBool,
    fail_cancel: AtomicBool,
    fail_close: AtomicBool,
    open_delay: Mutex<Duration>,
    write_delay: Mutex<Duration>,
}

struct MemoryShared {
    rx: flume::Receiver<FeedItem>,
    counters: Counters,
    written: Mutex<Vec<u8>>,
    device_open: AtomicBool,
    faults: Faults,
    reader_flag: Arc<AtomicBool>,
    writer_flag: Arc<AtomicBool>,
}

/// Fake device transport whose incoming stream is driven by a [`MemoryFeed`].
#[derive(Clone)]
pub struct MemoryTransport {
    available: bool,
    shared: Arc<MemoryShared>,
}

/// Producer side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryFeed {
    tx: flume::Sender<FeedItem>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryFeed) {
        let (tx, rx) = flume::unbounded();
        let transport = Self {
            available: true,
            shared: Arc::new(MemoryShared {
                rx,
                counters: Counters::default(),
                written: Mutex::new(Vec::new()),
                device_open: AtomicBool::new(false),
                faults: Faults::default(),
                reader_flag: Arc::new(AtomicBool::new(false)),
                writer_flag: Arc::new(AtomicBool::new(false)),
            }),
        };
        (transport, MemoryFeed { tx })
    }

    /// Pretend the platform has no such transport.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Make the next `open` calls fail until switched off again.
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.faults.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make reader `cancel` fail. The reader lock is then only released when the reader drops.
    pub fn set_fail_cancel(&self, fail: bool) {
        self.shared.faults.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Make handle `close` fail, leaving the device marked open.
    pub fn set_fail_close(&self, fail: bool) {
        self.shared.faults.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delay applied inside `request_handle`, standing in for a slow port picker.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.shared.faults.open_delay.lock() = delay;
    }

    /// Delay applied to every write before the bytes are accepted.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.shared.faults.write_delay.lock() = delay;
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.shared.counters;
        MemoryStats {
            handles_requested: c.handles_requested.load(Ordering::SeqCst),
            opens: c.opens.load(Ordering::SeqCst),
            closes: c.closes.load(Ordering::SeqCst),
            readers_bound: c.readers_bound.load(Ordering::SeqCst),
            writers_bound: c.writers_bound.load(Ordering::SeqCst),
            reader_cancels: c.reader_cancels.load(Ordering::SeqCst),
            writer_closes: c.writer_closes.load(Ordering::SeqCst),
            close_attempts: c.close_attempts.load(Ordering::SeqCst),
            cancel_attempts: c.cancel_attempts.load(Ordering::SeqCst),
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.shared.written.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.device_open.load(Ordering::SeqCst)
    }

    pub fn is_reader_bound(&self) -> bool {
        self.shared.reader_flag.load(Ordering::SeqCst)
    }

    pub fn is_writer_bound(&self) -> bool {
        self.shared.writer_flag.load(Ordering::SeqCst)
    }
}

impl MemoryFeed {
    /// Queue a chunk. Returns `false` once the transport is gone.
    pub fn send(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(FeedItem::Data(chunk.into())).is_ok()
    }

    pub fn send_str(&self, chunk: &str) -> bool {
        self.send(Bytes::copy_from_slice(chunk.as_bytes()))
    }

    /// Signal a clean end of stream to the current reader.
    pub fn end(&self) -> bool {
        self.tx.send(FeedItem::End).is_ok()
    }

    /// Make the current reader fail with an I/O error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.send(FeedItem::Fail(message.into())).is_ok()
    }

    /// Make the current reader fail the way a stream torn down underneath it does.
    pub fn abort(&self) -> bool {
        self.tx.send(FeedItem::Abort).is_ok()
    }

    /// Stream `data` in `chunk_size` pieces, `delay` apart, then end the stream.
    pub async fn replay(&self, data: Bytes, chunk_size: usize, delay: Duration) {
        let chunk_size = chunk_size.max(1);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            if !self.send(data.slice(offset..end)) {
                log::debug!("Replay target dropped after {offset} bytes");
                return;
            }
            offset = end;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        self.end();
    }
}

#[async_trait]
impl DeviceTransport for MemoryTransport {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn request_handle(&self) -> Result<Box<dyn DeviceHandle>, TransportError> {
        self.shared
            .counters
            .handles_requested
            .fetch_add(1, Ordering::SeqCst);
        let delay = *self.shared.faults.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(MemoryHandle {
            shared: Arc::clone(&self.shared),
            open: false,
        }))
    }
}

struct MemoryHandle {
    shared: Arc<MemoryShared>,
    open: bool,
}

#[async_trait]
impl DeviceHandle for MemoryHandle {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn open(&mut self, _params: &SerialParams) -> Result<(), TransportError> {
        if self.shared.faults.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "simulated open failure",
            )));
        }
        if self
            .shared
            .device_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransportError::AlreadyOpen);
        }
        self.open = true;
        self.shared.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reader(&mut self) -> Result<Box<dyn HandleReader>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let lock = StreamLock::acquire(&self.shared.reader_flag, "reader")?;
        self.shared
            .counters
            .readers_bound
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryReader {
            shared: Arc::clone(&self.shared),
            lock,
        }))
    }

    fn writer(&mut self) -> Result<Box<dyn HandleWriter>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let lock = StreamLock::acquire(&self.shared.writer_flag, "writer")?;
        self.shared
            .counters
            .writers_bound
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            shared: Arc::clone(&self.shared),
            lock,
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.shared
            .counters
            .close_attempts
            .fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::other(
                "simulated close failure",
            )));
        }
        self.open = false;
        self.shared.device_open.store(false, Ordering::SeqCst);
        self.shared.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryReader {
    shared: Arc<MemoryShared>,
    lock: StreamLock,
}

#[async_trait]
impl HandleReader for MemoryReader {
    async fn read(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.lock.is_held() {
            return Err(TransportError::Aborted);
        }
        match self.shared.rx.recv_async().await {
            Ok(FeedItem::Data(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(FeedItem::End) | Err(_) => Ok(None),
            Ok(FeedItem::Fail(message)) => Err(TransportError::Io(std::io::Error::other(message))),
            Ok(FeedItem::Abort) => Err(TransportError::Aborted),
        }
    }

    async fn cancel(&mut self) -> Result<(), TransportError> {
        self.shared
            .counters
            .cancel_attempts
            .fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.fail_cancel.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected(
                "simulated cancel failure".to_string(),
            ));
        }
        if self.lock.release() {
            self.shared
                .counters
                .reader_cancels
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryWriter {
    shared: Arc<MemoryShared>,
    lock: StreamLock,
}

#[async_trait]
impl HandleWriter for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.lock.is_held() {
            return Err(TransportError::Aborted);
        }
        let delay = *self.shared.faults.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.shared.written.lock().extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.lock.release() {
            self.shared
                .counters
                .writer_closes
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
