//! stream/session.rs
//!
//! Server side of one accepted connection: receive a frame, hand it to the
//! handler, send back whatever it returns, rearm, repeat. The frame buffer is
//! rented once when the session starts and goes back when it ends.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::io;
use crate::context::TransportContext;
use crate::errors::EngineError;
use crate::framing::{FrameReader, FrameWriter, HEADER_LEN, RequestHandler};

// -----------------------------------------------------------------------------
// ----- SessionEnd ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side with no partial frame pending.
    PeerClosed,
    /// Shut down from our side.
    Cancelled,
}

// -----------------------------------------------------------------------------
// ----- StreamSession ---------------------------------------------------------

pub struct StreamSession<R, W> {
    ctx: Arc<TransportContext>,
    reader: R,
    writer: W,
    remote: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    cancel: CancellationToken,
    frame: FrameReader,
    frames: u64,
}

// -----------------------------------------------------------------------------
// ----- StreamSession: Static -------------------------------------------------

impl<R, W> StreamSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        ctx: Arc<TransportContext>,
        reader: R,
        writer: W,
        remote: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let config = ctx.config();
        let frame = FrameReader::new(
            ctx.rent_buffer(config.buffer_capacity),
            config.max_frame_size,
        );

        Self {
            ctx,
            reader,
            writer,
            remote,
            handler,
            cancel,
            frame,
            frames: 0,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSession: Public -------------------------------------------------

impl<R, W> StreamSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub async fn run(mut self) -> Result<SessionEnd, EngineError> {
        let outcome = self.serve().await;
        self.frame.close();

        // Best effort; the peer may already be gone.
        let grace = self.ctx.config().operation_timeout;
        let _ = time::timeout(grace, self.writer.shutdown()).await;

        debug!(
            "session with {} ended after {} frames: {outcome:?}",
            self.remote, self.frames
        );
        outcome
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSession: Private ------------------------------------------------

impl<R, W> StreamSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn serve(&mut self) -> Result<SessionEnd, EngineError> {
        let idle = self.ctx.config().idle_timeout;

        loop {
            let filled =
                io::fill_frame(&self.ctx, &mut self.reader, &mut self.frame, &self.cancel, idle)
                    .await;
            if let Some(end) = ended(filled)? {
                return Ok(end);
            }

            let response = self.dispatch()?;
            self.frame.rearm()?;

            if let Some(response) = response {
                let sent = self.respond(&response).await;
                if let Some(end) = ended(sent)? {
                    return Ok(end);
                }
            }
        }
    }

    fn dispatch(&mut self) -> Result<Option<Bytes>, EngineError> {
        let (header, payload) = self
            .frame
            .frame()
            .ok_or_else(|| EngineError::protocol_violation("dispatch without a complete frame"))?;

        self.frames += 1;
        trace!("frame {} from {}: {} bytes", self.frames, self.remote, payload.len());
        Ok(self.handler.handle(self.remote, header, payload))
    }

    async fn respond(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let config = self.ctx.config();
        let mut frame = FrameWriter::encode(
            self.ctx.rent_buffer(HEADER_LEN + payload.len()),
            payload,
            config.max_frame_size,
        )?;

        let deadline = Some(config.operation_timeout);
        io::push_frame(&self.ctx, &mut self.writer, &mut frame, &self.cancel, deadline).await
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// `Ok(None)` keeps the loop going; clean endings become `Ok(Some(_))`.
fn ended(outcome: Result<(), EngineError>) -> Result<Option<SessionEnd>, EngineError> {
    match outcome {
        Ok(()) => Ok(None),
        Err(EngineError::ConnectionClosed) => Ok(Some(SessionEnd::PeerClosed)),
        Err(EngineError::Cancelled { .. }) => Ok(Some(SessionEnd::Cancelled)),
        Err(err) => Err(err),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
