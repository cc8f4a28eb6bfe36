use std::net::SocketAddr;

use super::header::{HEADER_LEN, encode_frame};
use crate::errors::EngineError;
use crate::operation::{Progress, TransmissionResult, TransmissionState};
use crate::pool::BufferLease;

// -----------------------------------------------------------------------------
// ----- FrameWriter -----------------------------------------------------------

/// One outgoing frame serialized into a single leased buffer, plus how much
/// of it the socket has accepted so far.
#[derive(Debug)]
pub struct FrameWriter {
    buffer: BufferLease,
    progress: TransmissionState,
}

// -----------------------------------------------------------------------------
// ----- FrameWriter: Static ---------------------------------------------------

impl FrameWriter {
    pub fn encode(
        mut buffer: BufferLease,
        payload: &[u8],
        max_payload: usize,
    ) -> Result<Self, EngineError> {
        if payload.len() > max_payload {
            return Err(EngineError::FrameTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }

        buffer.clear();
        let header = encode_frame(payload, &mut buffer)?;

        Ok(Self {
            buffer,
            progress: TransmissionState::new(header.frame_len()),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- FrameWriter: Public ---------------------------------------------------

impl FrameWriter {
    pub fn frame_len(&self) -> usize {
        self.progress.expected()
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn sent(&self) -> usize {
        self.progress.transferred()
    }

    /// What the next send should push.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.progress.transferred()..]
    }

    pub fn advance(&mut self, n: usize) -> Result<Progress, EngineError> {
        self.progress.advance(n)
    }

    pub fn into_result(self, remote: SocketAddr) -> Result<TransmissionResult, EngineError> {
        if !self.is_complete() {
            return Err(EngineError::protocol_violation(format!(
                "frame released after {} of {} bytes",
                self.progress.transferred(),
                self.progress.expected()
            )));
        }

        let end = self.buffer.len();
        Ok(TransmissionResult::new(
            self.buffer,
            HEADER_LEN..end,
            end,
            remote,
        ))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
