use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CommandKind, MessageId};

/// Failures the dispatch loop can hit. None of them are fatal: each one
/// degrades to a cancelled response for the affected message.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {reason}")]
    Protocol {
        id: Option<MessageId>,
        reason: String,
    },

    #[error("unknown file `{0}`")]
    UnknownFile(String),

    #[error("{command} failed: {message}")]
    Feature {
        command: CommandKind,
        message: String,
    },

    #[error("{command} did not finish within {deadline:?}")]
    Timeout {
        command: CommandKind,
        deadline: Duration,
    },
}

impl ServerError {
    pub fn protocol(id: Option<MessageId>, reason: impl Into<String>) -> Self {
        ServerError::Protocol {
            id,
            reason: reason.into(),
        }
    }

    pub fn feature(command: CommandKind, err: &anyhow::Error) -> Self {
        ServerError::Feature {
            command,
            message: format!("{err:#}"),
        }
    }

    /// Id of the message this error can still be answered for.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            ServerError::Protocol { id, .. } => *id,
            _ => None,
        }
    }
}
