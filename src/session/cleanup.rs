use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};

use crate::transport::{DeviceHandle, HandleReader, HandleWriter};

use super::SessionError;

/// The running read loop: a stop switch and the task, which hands the reader back when joined.
pub(crate) struct ReadLoop {
    pub stop_tx: watch::Sender<bool>,
    pub task: JoinHandle<Box<dyn HandleReader>>,
}

/// Everything a connection holds on the device. Owned by the session only.
#[derive(Default)]
pub(crate) struct Resources {
    pub handle: Option<Box<dyn DeviceHandle>>,
    pub reader: Option<Box<dyn HandleReader>>,
    pub writer: Option<Box<dyn HandleWriter>>,
    pub read_loop: Option<ReadLoop>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
            && self.reader.is_none()
            && self.writer.is_none()
            && self.read_loop.is_none()
    }

    /// Release everything in order. Every step runs even when an earlier one failed; failures
    /// are logged and counted.
    pub async fn release_all(&mut self, settle_delay: Duration) -> usize {
        let mut failures = 0;

        if let Some(ReadLoop { stop_tx, task }) = self.read_loop.take() {
            // the loop may have exited on its own already
            let _ = stop_tx.send(true);
            match task.await {
                Ok(reader) => self.reader = Some(reader),
                Err(err) => failures += step_failed("join read loop", err),
            }
        }

        if let Some(mut reader) = self.reader.take() {
            if let Err(err) = reader.cancel().await {
                failures += step_failed("cancel reader", err);
            }
        }

        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.close().await {
                failures += step_failed("close writer", err);
            }
        }

        if let Some(mut handle) = self.handle.take() {
            let name = handle.name();
            match handle.close().await {
                Ok(()) => log::debug!("Handle {name} closed"),
                Err(err) => failures += step_failed("close handle", err),
            }
            if !settle_delay.is_zero() {
                tokio::time::sleep(settle_delay).await;
            }
        }

        failures
    }
}

fn step_failed(step: &'static str, reason: impl std::fmt::Display) -> usize {
    let err = SessionError::CleanupStepFailure {
        step,
        reason: reason.to_string(),
    };
    log::warn!("{err}");
    1
}
