//! Connection lifecycle.
//!
//! A [`ConnectionSession`] owns the device handle and its single reader and writer, runs the
//! read loop as a tokio task and publishes [`SessionEvent`]s on a flume channel. States move
//! `idle → connecting → connected → disconnecting → idle`; `error` is entered from
//! `connecting` or `connected` and always ends in `idle` once cleanup ran.

mod cleanup;
mod error;
mod read_loop;
mod state;

pub use error::SessionError;
pub use state::{ConnectionState, SessionEvent};

use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::watch;

use cellscope_protocol::{validate, RecordFramer, RecordParser, Utf8StreamDecoder};

use crate::{
    config::SessionConfig,
    transport::{DeviceTransport, TransportError},
};
use cleanup::{ReadLoop, Resources};

struct StreamState {
    decoder: Utf8StreamDecoder,
    framer: RecordFramer,
}

struct Shared {
    transport: Arc<dyn DeviceTransport>,
    config: SessionConfig,
    parser: RecordParser,
    state: Mutex<ConnectionState>,
    connecting: AtomicBool,
    disconnecting: AtomicBool,
    // bumped on every successful connect, lets a stale recovery task know it is stale
    generation: AtomicU64,
    resources: tokio::sync::Mutex<Resources>,
    stream: Mutex<StreamState>,
    events: flume::Sender<SessionEvent>,
}

/// One device connection. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionSession {
    shared: Arc<Shared>,
}

impl ConnectionSession {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        config: SessionConfig,
    ) -> (Self, flume::Receiver<SessionEvent>) {
        let (events, rx) = flume::unbounded();
        let shared = Shared {
            transport,
            parser: RecordParser::new(config.thresholds),
            stream: Mutex::new(StreamState {
                decoder: Utf8StreamDecoder::new(),
                framer: RecordFramer::new(config.buffer_cap),
            }),
            config,
            state: Mutex::new(ConnectionState::Idle),
            connecting: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            resources: tokio::sync::Mutex::new(Resources::default()),
            events,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_disconnecting(&self) -> bool {
        self.shared.disconnecting.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Bytes of the partial record currently waiting for its separator.
    pub fn buffered_len(&self) -> usize {
        self.shared.stream.lock().framer.buffered_len()
    }

    /// Acquire the device and start reading.
    ///
    /// A no-op when already connected. Rejected with [`SessionError::Busy`] while another
    /// connect or a disconnect is running. On failure the session passes through `error`,
    /// releases whatever it had acquired and settles in `idle`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if !self.shared.transport.is_available() {
            log::warn!("Connect refused: transport unavailable");
            return Err(SessionError::TransportUnsupported);
        }
        if self.is_disconnecting() {
            log::warn!("Connect ignored: disconnect in progress");
            return Err(SessionError::Busy(ConnectionState::Disconnecting));
        }
        if self
            .shared
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Connect ignored: already connecting");
            return Err(SessionError::Busy(ConnectionState::Connecting));
        }

        let result = self.establish().await;
        self.shared.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn establish(&self) -> Result<(), SessionError> {
        let mut res = self.shared.resources.lock().await;
        if self.state() == ConnectionState::Connected {
            log::debug!("Already connected");
            return Ok(());
        }
        if !res.is_empty() {
            log::info!("Releasing resources left over from a previous connection");
            res.release_all(self.shared.config.settle_delay()).await;
            self.reset_stream();
        }

        self.set_state(ConnectionState::Connecting, None);
        match self.acquire(&mut res).await {
            Ok(()) => Ok(()),
            Err(err) => {
                log::error!("{err}");
                self.set_state(ConnectionState::Error, Some(err.to_string()));
                res.release_all(self.shared.config.settle_delay()).await;
                self.reset_stream();
                self.set_state(ConnectionState::Idle, None);
                Err(err)
            }
        }
    }

    async fn acquire(&self, res: &mut Resources) -> Result<(), SessionError> {
        let params = self.shared.config.serial_params();
        let handle = res
            .handle
            .insert(self.shared.transport.request_handle().await?);
        let name = handle.name();
        handle.open(&params).await?;
        res.reader = Some(handle.reader()?);
        res.writer = Some(handle.writer()?);
        let reader = res.reader.take().ok_or(TransportError::NotOpen)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        self.set_state(
            ConnectionState::Connected,
            Some(format!("connected to {name} at {} baud", params.baud_rate)),
        );
        let task = tokio::spawn(read_loop::run(self.clone(), reader, stop_rx, generation));
        res.read_loop = Some(ReadLoop { stop_tx, task });
        Ok(())
    }

    /// Stop reading and release the device. Safe from any state; a call made while another
    /// disconnect is running returns without doing anything.
    pub async fn disconnect(&self) {
        if !self.teardown(None).await {
            log::debug!("Disconnect already in progress");
        }
    }

    /// Runs the cleanup sequence and lands in `idle`. With `expected` set, only tears down if
    /// that connection is still the current one.
    async fn teardown(&self, expected: Option<u64>) -> bool {
        if self
            .shared
            .disconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let mut res = self.shared.resources.lock().await;
        if let Some(generation) = expected {
            if generation != self.shared.generation.load(Ordering::SeqCst) {
                log::debug!("Skipping recovery of connection #{generation}, already replaced");
                self.shared.disconnecting.store(false, Ordering::SeqCst);
                return false;
            }
        }

        log::info!("Disconnecting");
        *self.shared.state.lock() = ConnectionState::Disconnecting;
        let failures = res.release_all(self.shared.config.settle_delay()).await;
        drop(res);
        self.reset_stream();
        if failures > 0 {
            log::warn!("Disconnect finished with {failures} failed cleanup step(s)");
        }

        self.set_state(ConnectionState::Idle, None);
        self.shared.disconnecting.store(false, Ordering::SeqCst);
        true
    }

    /// Tear down after the read loop ended on its own. Spawned because the loop itself is
    /// joined during teardown.
    fn recover(&self, generation: u64) {
        let session = self.clone();
        tokio::spawn(async move {
            session.teardown(Some(generation)).await;
        });
    }

    /// The stream is gone but teardown has not run yet: stop reporting `connected` so writes
    /// are refused and a new `connect()` cleans up instead of short-circuiting.
    fn mark_link_down(&self) {
        let mut state = self.shared.state.lock();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Disconnecting;
        }
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let state = self.state();
        if state != ConnectionState::Connected || self.is_disconnecting() {
            return Err(SessionError::WriteRejected(format!("session is {state}")));
        }
        let mut res = self.shared.resources.lock().await;
        let writer = res
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::WriteRejected("no writer bound".to_string()))?;
        writer
            .write(data)
            .await
            .map_err(|err| SessionError::WriteRejected(err.to_string()))
    }

    fn ingest(&self, bytes: &[u8]) {
        let records = {
            let mut stream = self.shared.stream.lock();
            let text = stream.decoder.decode(bytes);
            stream.framer.feed(&text)
        };

        for record in records {
            let reading = self.shared.parser.parse(&record);
            if !validate(&reading) {
                log::warn!("Dropping malformed record ({} bytes)", record.len());
                continue;
            }
            log::debug!(
                "Reading: {} cells, total {:.3} V",
                reading.cells.len(),
                reading.total_voltage
            );
            if self.shared.events.send(SessionEvent::Reading(reading)).is_err() {
                log::debug!("No event consumer left, reading dropped");
            }
        }
    }

    fn reset_stream(&self) {
        let mut stream = self.shared.stream.lock();
        stream.framer.reset();
        stream.decoder.reset();
    }

    fn set_state(&self, state: ConnectionState, message: Option<String>) {
        let previous = std::mem::replace(&mut *self.shared.state.lock(), state);
        match &message {
            Some(message) => log::info!("Session {previous} -> {state}: {message}"),
            None => log::info!("Session {previous} -> {state}"),
        }
        let _ = self
            .shared
            .events
            .send(SessionEvent::StateChanged { state, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    fn session_on(
        transport: &MemoryTransport,
    ) -> (ConnectionSession, flume::Receiver<SessionEvent>) {
        let config = SessionConfig::default().with_settle_delay(Duration::ZERO);
        ConnectionSession::new(Arc::new(transport.clone()), config)
    }

    async fn wait_for_loop_exit(session: &ConnectionSession) {
        for _ in 0..200 {
            let finished = session
                .shared
                .resources
                .lock()
                .await
                .read_loop
                .as_ref()
                .is_some_and(|read_loop| read_loop.task.is_finished());
            if finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("read loop did not exit");
    }

    /// Ends the read loop with `end_stream` while automatic recovery is held off, leaving the
    /// resources of the dead connection behind.
    async fn leave_stale_connection(session: &ConnectionSession, end_stream: impl FnOnce()) {
        session.shared.disconnecting.store(true, Ordering::SeqCst);
        end_stream();
        wait_for_loop_exit(session).await;
        // the spawned recovery sees the flag and gives up
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.shared.disconnecting.store(false, Ordering::SeqCst);
        assert!(!session.shared.resources.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_releases_stale_resources() {
        let (transport, feed) = MemoryTransport::new();
        let (session, events) = session_on(&transport);
        session.connect().await.unwrap();

        leave_stale_connection(&session, || {
            feed.fail("line noise");
        })
        .await;
        assert_eq!(session.state(), ConnectionState::Error);
        assert!(transport.is_open());

        // a second open only succeeds once the old handle was closed
        session.connect().await.unwrap();
        assert!(session.is_connected());
        let stats = transport.stats();
        assert_eq!(stats.opens, 2);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.reader_cancels, 1);
        assert_eq!(stats.writer_closes, 1);

        let states: Vec<ConnectionState> = events.try_iter().filter_map(|e| e.state()).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Error,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        session.disconnect().await;
        assert_eq!(transport.stats().closes, 2);
    }

    #[tokio::test]
    async fn test_ended_stream_is_not_reported_connected() {
        let (transport, feed) = MemoryTransport::new();
        let (session, _events) = session_on(&transport);
        session.connect().await.unwrap();

        leave_stale_connection(&session, || {
            feed.end();
        })
        .await;
        assert_eq!(session.state(), ConnectionState::Disconnecting);
        assert!(!session.is_connected());
        assert!(matches!(
            session.write(b"r").await,
            Err(SessionError::WriteRejected(_))
        ));

        session.connect().await.unwrap();
        assert_eq!(transport.stats().opens, 2);
        assert!(session.is_connected());
        session.disconnect().await;
    }
}
