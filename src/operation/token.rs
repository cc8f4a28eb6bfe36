use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::EngineError;
use crate::pool::BufferLease;

// -----------------------------------------------------------------------------
// ----- OperationKind ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Accept,
    Connect,
    Disconnect,
    Send,
    Receive,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Accept => "accept",
            OperationKind::Connect => "connect",
            OperationKind::Disconnect => "disconnect",
            OperationKind::Send => "send",
            OperationKind::Receive => "receive",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Signals ---------------------------------------------------------------

/// What the bridge needs to know about a pending operation, detached from the
/// token so the I/O future can borrow the token's buffer at the same time.
#[derive(Debug, Clone)]
pub struct Signals {
    pub kind: OperationKind,
    pub cancel: Option<CancellationToken>,
    pub deadline: Option<Duration>,
}

impl Signals {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            cancel: None,
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- OperationToken --------------------------------------------------------

/// Per-operation state, rented from the token pool. Holds at most one buffer
/// lease; clearing the token (on return to the pool) releases it.
#[derive(Debug, Default)]
pub struct OperationToken {
    kind: Option<OperationKind>,
    cancel: Option<CancellationToken>,
    deadline: Option<Duration>,
    lease: Option<BufferLease>,
}

// -----------------------------------------------------------------------------
// ----- OperationToken: Public ------------------------------------------------

impl OperationToken {
    pub fn arm(
        &mut self,
        kind: OperationKind,
        deadline: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) {
        debug_assert!(self.kind.is_none(), "token armed twice");

        self.kind = Some(kind);
        self.deadline = deadline;
        self.cancel = cancel;
    }

    pub fn kind(&self) -> Option<OperationKind> {
        self.kind
    }

    pub fn signals(&self) -> Result<Signals, EngineError> {
        let kind = self
            .kind
            .ok_or_else(|| EngineError::protocol_violation("signals requested from unarmed token"))?;

        Ok(Signals {
            kind,
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        })
    }

    pub fn attach(&mut self, lease: BufferLease) -> Result<(), EngineError> {
        if self.lease.is_some() {
            return Err(EngineError::protocol_violation(
                "token already carries a buffer lease",
            ));
        }

        self.lease = Some(lease);
        Ok(())
    }

    pub fn lease(&self) -> Result<&BufferLease, EngineError> {
        self.lease
            .as_ref()
            .ok_or_else(|| EngineError::protocol_violation("token carries no buffer lease"))
    }

    pub fn lease_mut(&mut self) -> Result<&mut BufferLease, EngineError> {
        self.lease
            .as_mut()
            .ok_or_else(|| EngineError::protocol_violation("token carries no buffer lease"))
    }

    pub fn detach(&mut self) -> Option<BufferLease> {
        self.lease.take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Back to the idle state. Releases the attached lease, if any.
    pub fn clear(&mut self) {
        self.kind = None;
        self.cancel = None;
        self.deadline = None;
        self.lease = None;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
