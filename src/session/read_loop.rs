use tokio::sync::watch;

use crate::transport::HandleReader;

use super::{ConnectionSession, ConnectionState, SessionError};

enum LoopExit {
    Stopped,
    EndOfStream,
    Failed(SessionError),
}

/// Body of the read task. Returns the reader so cleanup can cancel it.
pub(crate) async fn run(
    session: ConnectionSession,
    mut reader: Box<dyn HandleReader>,
    mut stop_rx: watch::Receiver<bool>,
    generation: u64,
) -> Box<dyn HandleReader> {
    let exit = loop {
        if *stop_rx.borrow() {
            break LoopExit::Stopped;
        }
        let result = tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break LoopExit::Stopped;
                }
                continue;
            }
            result = reader.read() => result,
        };

        match result {
            Ok(Some(bytes)) if bytes.is_empty() => {}
            Ok(Some(bytes)) => session.ingest(&bytes),
            Ok(None) => break LoopExit::EndOfStream,
            Err(err) if err.is_teardown_class() && session.is_disconnecting() => {
                log::debug!("{}", SessionError::ExpectedTeardownError(err));
                break LoopExit::Stopped;
            }
            Err(err) => break LoopExit::Failed(SessionError::ReadFailure(err)),
        }
    };

    match exit {
        LoopExit::Stopped => log::debug!("Read loop stopped"),
        LoopExit::EndOfStream => {
            log::info!("Device stream ended");
            session.mark_link_down();
            session.recover(generation);
        }
        LoopExit::Failed(err) => {
            log::error!("{err}");
            session.set_state(ConnectionState::Error, Some(err.to_string()));
            session.recover(generation);
        }
    }
    reader
}
