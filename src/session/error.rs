use crate::transport::TransportError;

use super::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no serial transport is available on this system")]
    TransportUnsupported,
    #[error("failed to acquire the device: {0}")]
    AcquisitionFailed(#[from] TransportError),
    #[error("read failed: {0}")]
    ReadFailure(#[source] TransportError),
    #[error("stream closed during disconnect: {0}")]
    ExpectedTeardownError(#[source] TransportError),
    #[error("cleanup step '{step}' failed: {reason}")]
    CleanupStepFailure { step: &'static str, reason: String },
    #[error("write rejected: {0}")]
    WriteRejected(String),
    #[error("session is busy ({0})")]
    Busy(ConnectionState),
}
