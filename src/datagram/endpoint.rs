//! datagram/endpoint.rs
//!
//! Each datagram carries exactly one frame. Sends are all-or-nothing and
//! checked against the size limit before anything is rented or sent.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::TransportContext;
use crate::errors::EngineError;
use crate::framing::{HEADER_LEN, decode_frame, encode_frame};
use crate::operation::{OperationKind, OperationToken, TransmissionResult, start};
use crate::pool::Lease;

// -----------------------------------------------------------------------------
// ----- MessageFlags ----------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// Receive without removing the datagram from the socket queue.
    pub peek: bool,
}

impl MessageFlags {
    pub const NONE: Self = Self { peek: false };
    pub const PEEK: Self = Self { peek: true };
}

// -----------------------------------------------------------------------------
// ----- DatagramEndpoint ------------------------------------------------------

pub struct DatagramEndpoint {
    ctx: Arc<TransportContext>,
    socket: UdpSocket,
    local: SocketAddr,
    cancel: CancellationToken,
}

// -----------------------------------------------------------------------------
// ----- DatagramEndpoint: Static ----------------------------------------------

impl DatagramEndpoint {
    pub async fn bind(ctx: Arc<TransportContext>, local: SocketAddr) -> Result<Self, EngineError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| EngineError::Bind { addr: local, source })?;
        let local = socket
            .local_addr()
            .map_err(|source| EngineError::Bind { addr: local, source })?;

        debug!("datagram socket bound to {local}");

        Ok(Self {
            ctx,
            socket,
            local,
            cancel: CancellationToken::new(),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramEndpoint: Public ----------------------------------------------

impl DatagramEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn context(&self) -> &Arc<TransportContext> {
        &self.ctx
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort every pending send and receive on this endpoint.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub async fn send_to(
        &self,
        remote: SocketAddr,
        payload: &[u8],
        flags: MessageFlags,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        if flags.peek {
            return Err(EngineError::UnsupportedFlags);
        }

        let size = HEADER_LEN + payload.len();
        let max = self.ctx.config().max_datagram_size;
        if size > max {
            return Err(EngineError::DatagramTooLarge { size, max });
        }

        let mut token = self
            .ctx
            .rent_token(OperationKind::Send, timeout, Some(self.cancel.clone()));
        let mut lease = self.ctx.rent_buffer(size);
        encode_frame(payload, &mut lease)?;
        token.attach(lease)?;

        let signals = token.signals()?;
        let sent = start(signals, self.socket.send_to(&token.lease()?[..], remote))
            .await?
            .value;

        if sent != size {
            return Err(EngineError::Transport {
                operation: OperationKind::Send,
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("datagram truncated to {sent} of {size} bytes"),
                ),
            });
        }

        let lease = token
            .detach()
            .ok_or_else(|| EngineError::protocol_violation("datagram send lost its buffer"))?;

        Ok(TransmissionResult::new(lease, HEADER_LEN..size, size, remote))
    }

    /// Receive one datagram and validate its frame. Safe to call from many
    /// tasks at once; each call gets its own token and buffer.
    pub async fn receive_from(
        &self,
        flags: MessageFlags,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        let token = self.arm_receive(timeout)?;
        self.receive_armed(token, flags).await
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramEndpoint: Internal --------------------------------------------

impl DatagramEndpoint {
    /// Rent and fill everything a receive needs without touching the socket,
    /// so the caller can count it as outstanding before it is polled.
    pub(crate) fn arm_receive(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Lease<OperationToken>, EngineError> {
        let max = self.ctx.config().max_datagram_size;

        let mut token = self
            .ctx
            .rent_token(OperationKind::Receive, timeout, Some(self.cancel.clone()));
        // One spare byte tells an oversize datagram from one that fits exactly.
        token.attach(self.ctx.buffers().rent_filled(max + 1))?;
        Ok(token)
    }

    pub(crate) async fn receive_armed(
        &self,
        mut token: Lease<OperationToken>,
        flags: MessageFlags,
    ) -> Result<TransmissionResult, EngineError> {
        let max = self.ctx.config().max_datagram_size;

        let signals = token.signals()?;
        let buf = token.lease_mut()?;
        let (len, remote) = if flags.peek {
            start(signals, self.socket.peek_from(&mut buf[..])).await?.value
        } else {
            start(signals, self.socket.recv_from(&mut buf[..])).await?.value
        };

        if len > max {
            return Err(EngineError::DatagramTooLarge { size: len, max });
        }
        decode_frame(&buf[..len])?;

        let lease = token
            .detach()
            .ok_or_else(|| EngineError::protocol_violation("datagram receive lost its buffer"))?;

        Ok(TransmissionResult::new(lease, HEADER_LEN..len, len, remote))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
