//! stream/io.rs
//!
//! Drivers that pump bytes between a stream half and a framing state machine,
//! one bridged socket call at a time. Generic over the half so the same loop
//! runs on TCP and on in-memory pipes.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::TransportContext;
use crate::errors::EngineError;
use crate::framing::{FrameReader, FrameWriter, ReadState};
use crate::operation::{OperationKind, TransmissionResult, TransmissionState, start};

// -----------------------------------------------------------------------------
// ----- Framed ----------------------------------------------------------------

/// Receive until `frame` holds one complete frame. The deadline covers the
/// whole frame, not each individual read. EOF between frames is
/// `ConnectionClosed`; EOF inside one is a malformed frame.
pub(crate) async fn fill_frame<R>(
    ctx: &TransportContext,
    io: &mut R,
    frame: &mut FrameReader,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<(), EngineError>
where
    R: AsyncRead + Unpin,
{
    let token = ctx.rent_token(OperationKind::Receive, deadline, Some(cancel.clone()));

    let signals = token.signals()?;
    let budget = Budget::new(deadline);

    while frame.wants_bytes() {
        let signals = signals.clone().with_deadline(budget.left());
        let done = start(signals, io.read(frame.unfilled()))
            .await
            .map_err(|err| budget.restamp(err))?;

        let buffered = frame.buffered();
        frame.advance(done.value).map_err(|err| match err {
            EngineError::ConnectionClosed if buffered > 0 => {
                EngineError::MalformedFrame("connection closed mid-frame")
            }
            err => err,
        })?;
    }

    match frame.state() {
        ReadState::Dispatch(_) => Ok(()),
        state => Err(EngineError::protocol_violation(format!(
            "frame fill stopped while {}",
            state.name()
        ))),
    }
}

/// Send the rest of `frame`, continuing after partial sends, then flush.
pub(crate) async fn push_frame<W>(
    ctx: &TransportContext,
    io: &mut W,
    frame: &mut FrameWriter,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let token = ctx.rent_token(OperationKind::Send, deadline, Some(cancel.clone()));

    let signals = token.signals()?;
    let budget = Budget::new(deadline);

    while !frame.is_complete() {
        let signals = signals.clone().with_deadline(budget.left());
        let done = start(signals, io.write(frame.pending()))
            .await
            .map_err(|err| budget.restamp(err))?;
        frame.advance(done.value)?;
    }

    start(signals.with_deadline(budget.left()), io.flush())
        .await
        .map_err(|err| budget.restamp(err))?;
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Raw -------------------------------------------------------------------

/// One receive of up to `max_len` bytes into a leased buffer.
pub(crate) async fn receive_some<R>(
    ctx: &TransportContext,
    io: &mut R,
    max_len: usize,
    remote: SocketAddr,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<TransmissionResult, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut token = ctx.rent_token(OperationKind::Receive, deadline, Some(cancel.clone()));
    token.attach(ctx.buffers().rent_filled(max_len))?;

    let signals = token.signals()?;
    let done = start(signals, io.read(&mut token.lease_mut()?[..])).await?;

    if done.value == 0 && max_len > 0 {
        return Err(EngineError::ConnectionClosed);
    }

    let lease = token
        .detach()
        .ok_or_else(|| EngineError::protocol_violation("receive lost its buffer"))?;

    Ok(TransmissionResult::new(lease, 0..done.value, done.value, remote))
}

/// Copy `payload` into a leased buffer and send all of it.
pub(crate) async fn send_all<W>(
    ctx: &TransportContext,
    io: &mut W,
    payload: &[u8],
    remote: SocketAddr,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<TransmissionResult, EngineError>
where
    W: AsyncWrite + Unpin,
{
    let mut token = ctx.rent_token(OperationKind::Send, deadline, Some(cancel.clone()));
    let mut lease = ctx.rent_buffer(payload.len());
    lease.extend_from_slice(payload);
    token.attach(lease)?;

    let signals = token.signals()?;
    let budget = Budget::new(deadline);
    let mut progress = TransmissionState::new(payload.len());

    while !progress.is_complete() {
        let signals = signals.clone().with_deadline(budget.left());
        let pending = &token.lease()?[progress.transferred()..];
        let done = start(signals, io.write(pending))
            .await
            .map_err(|err| budget.restamp(err))?;
        progress.advance(done.value)?;
    }

    start(signals.with_deadline(budget.left()), io.flush())
        .await
        .map_err(|err| budget.restamp(err))?;

    let lease = token
        .detach()
        .ok_or_else(|| EngineError::protocol_violation("send lost its buffer"))?;

    Ok(TransmissionResult::new(lease, 0..payload.len(), payload.len(), remote))
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// One deadline shared by every socket call of a multi-call operation.
struct Budget {
    total: Option<Duration>,
    until: Option<Instant>,
}

impl Budget {
    fn new(total: Option<Duration>) -> Self {
        Self {
            total,
            until: total.map(|after| Instant::now() + after),
        }
    }

    /// Zero once spent; the bridge still polls the call once before timing out.
    fn left(&self) -> Option<Duration> {
        self.until
            .map(|until| until.saturating_duration_since(Instant::now()))
    }

    /// Report timeouts against the whole budget, not the last slice of it.
    fn restamp(&self, err: EngineError) -> EngineError {
        match (err, self.total) {
            (EngineError::Timeout { operation, .. }, Some(after)) => {
                EngineError::Timeout { operation, after }
            }
            (err, _) => err,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
