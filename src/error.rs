//! Harness error types.

use std::time::Duration;

use thiserror::Error;

use crate::dialect::Dialect;
use crate::node::NodeId;

/// Crate-wide result alias.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Errors raised while driving DUTs.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The channel to a DUT could not be established.
    #[error("node {node}: failed to open transport: {reason}")]
    TransportOpen {
        /// Node whose transport failed.
        node: NodeId,
        /// Description of the failure.
        reason: String,
    },

    /// No terminating `Done` arrived before the deadline.
    #[error("no response to '{command}' within {timeout:?}")]
    ResponseTimeout {
        /// The command that went unanswered.
        command: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Bytes arrived but matched none of the expected patterns.
    #[error("unexpected response to '{command}': {received:?}")]
    ProtocolMismatch {
        /// The command being answered.
        command: String,
        /// The unmatched text.
        received: String,
    },

    /// A scenario observed something other than what it expected.
    #[error("assertion failed: {message}")]
    Assertion {
        /// What was expected and what was observed.
        message: String,
        /// Rendering of the most recent protocol exchange, if any.
        last_exchange: Option<String>,
    },

    /// Read or write on the channel failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the channel, or it was already closed locally.
    #[error("transport closed")]
    Closed,

    /// The selected dialect has no command for the operation.
    #[error("'{operation}' is not available in the {dialect} dialect")]
    Unsupported {
        /// Operation that was requested.
        operation: &'static str,
        /// Dialect in use.
        dialect: Dialect,
    },

    /// A scenario referred to a node it never created.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A token could not be parsed into the expected value type.
    #[error("invalid {what}: {value:?}")]
    InvalidValue {
        /// Kind of value being parsed.
        what: &'static str,
        /// The offending text.
        value: String,
    },
}

impl HarnessError {
    pub(crate) fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            what,
            value: value.into(),
        }
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
            last_exchange: None,
        }
    }

    /// Returns true for the missing-sentinel signal scenarios may expect.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ResponseTimeout { .. })
    }

    /// Returns true if this error must abort the scenario.
    ///
    /// Timeouts and assertion failures leave the DUTs usable; everything
    /// else means the harness lost track of at least one of them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::TransportOpen { .. }
            | Self::ProtocolMismatch { .. }
            | Self::Io(_)
            | Self::Closed
            | Self::UnknownNode(_) => true,

            Self::ResponseTimeout { .. }
            | Self::Assertion { .. }
            | Self::Unsupported { .. }
            | Self::InvalidValue { .. } => false,
        }
    }
}
