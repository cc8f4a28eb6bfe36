use std::net::SocketAddr;
use std::ops::Range;

use bytes::Bytes;

use crate::errors::EngineError;
use crate::pool::BufferLease;

// -----------------------------------------------------------------------------
// ----- TransmissionState -----------------------------------------------------

/// Progress of one logical transfer that the socket may split into several
/// physical ones. Only ever moves toward `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionState {
    expected: usize,
    transferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Partial { remaining: usize },
    Complete,
}

impl TransmissionState {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            transferred: 0,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn transferred(&self) -> usize {
        self.transferred
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.expected
    }

    /// Record `n` more bytes. Zero means the peer is gone.
    pub fn advance(&mut self, n: usize) -> Result<Progress, EngineError> {
        if n == 0 {
            return Err(EngineError::ConnectionClosed);
        }

        if n > self.remaining() {
            return Err(EngineError::protocol_violation(format!(
                "transfer of {n} bytes overruns the {} remaining",
                self.remaining()
            )));
        }

        self.transferred += n;

        if self.is_complete() {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Partial {
                remaining: self.remaining(),
            })
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TransmissionResult ----------------------------------------------------

/// Terminal value of a send or receive. The view borrows the operation's
/// buffer lease, which goes back to the pool when the result is dropped.
#[derive(Debug)]
pub struct TransmissionResult {
    lease: BufferLease,
    view: Range<usize>,
    transferred: usize,
    remote: SocketAddr,
}

impl TransmissionResult {
    pub(crate) fn new(
        lease: BufferLease,
        view: Range<usize>,
        transferred: usize,
        remote: SocketAddr,
    ) -> Self {
        debug_assert!(view.end <= lease.len(), "view past end of buffer");

        Self {
            lease,
            view,
            transferred,
            remote,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.lease[self.view.clone()]
    }

    /// Bytes moved on the wire, framing included.
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Copy the payload out and give the buffer back.
    pub fn into_bytes(self) -> Bytes {
        Bytes::copy_from_slice(self.payload())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    #[test]
    fn advances_to_completion() {
        let mut state = TransmissionState::new(10);
        assert_eq!(state.advance(3).unwrap(), Progress::Partial { remaining: 7 });
        assert_eq!(state.advance(6).unwrap(), Progress::Partial { remaining: 1 });
        assert_eq!(state.advance(1).unwrap(), Progress::Complete);
        assert_eq!(state.transferred(), 10);
    }

    #[test]
    fn zero_byte_transfer_means_closed() {
        let mut state = TransmissionState::new(4);
        state.advance(2).unwrap();
        let err = state.advance(0).unwrap_err();
        assert!(matches!(err, EngineError::ConnectionClosed));
        assert_eq!(state.transferred(), 2);
    }

    #[test]
    fn overrun_is_rejected() {
        let mut state = TransmissionState::new(4);
        let err = state.advance(5).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(state.transferred(), 0);
    }

    #[test]
    fn result_view_and_lease_return() {
        let pool = BufferPool::new(16, 1024, 4);
        let mut lease = pool.rent(8);
        lease.extend_from_slice(b"\0\0\0\x02hi");

        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let result = TransmissionResult::new(lease, 4..6, 6, remote);
        assert_eq!(result.payload(), b"hi");
        assert_eq!(result.transferred(), 6);

        let bytes = result.into_bytes();
        assert_eq!(&bytes[..], b"hi");
        assert_eq!(pool.stats().outstanding, 0);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
