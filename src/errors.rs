use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;
use tracing::error;

use crate::operation::OperationKind;

// -----------------------------------------------------------------------------
// ----- EngineError -----------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: OperationKind,
        after: Duration,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("{operation} failed: {source}")]
    Transport {
        operation: OperationKind,
        source: io::Error,
    },

    #[error("bind to {addr} failed: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("{operation} cancelled")]
    Cancelled { operation: OperationKind },

    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("datagram of {size} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("message flags not supported for this operation")]
    UnsupportedFlags,

    #[error("connection is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Internal logic bug. Never retried.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

// -----------------------------------------------------------------------------
// ----- EngineError: Static ---------------------------------------------------

impl EngineError {
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("protocol violation: {message}");
        EngineError::ProtocolViolation(message)
    }

    pub(crate) fn transport(operation: OperationKind) -> impl FnOnce(io::Error) -> Self {
        move |source| EngineError::Transport { operation, source }
    }
}

// -----------------------------------------------------------------------------
// ----- EngineError: Public ---------------------------------------------------

impl EngineError {
    /// Logic bugs abort the offending session loudly; everything else is
    /// recovered at the connection boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ProtocolViolation(_))
    }

    /// A timeout leaves the half usable as long as nothing moved. A cancelled
    /// half is closed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
