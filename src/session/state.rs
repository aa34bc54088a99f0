use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use cellscope_protocol::Reading;

/// Lifecycle of one connection session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

/// What a session publishes to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        state: ConnectionState,
        /// Set for `Error`, and for transitions worth explaining to the user.
        message: Option<String>,
    },
    Reading(Reading),
}

impl SessionEvent {
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            SessionEvent::StateChanged { state, .. } => Some(*state),
            SessionEvent::Reading(_) => None,
        }
    }
}
