//! stream/connection.rs
//!
//! A stream socket walks Unbound → Bound → Listening | Connected → Closed.
//! Once connected it splits into a receiver and a sender so one task can read
//! while another writes. Each half tracks whether it is still usable: a
//! timeout that lands before any byte of the current frame moved leaves it
//! open, any other failure closes it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::io;
use super::listener::StreamListener;
use crate::context::TransportContext;
use crate::errors::EngineError;
use crate::framing::{FrameReader, FrameWriter, HEADER_LEN};
use crate::operation::{OperationKind, TransmissionResult, start};

// -----------------------------------------------------------------------------
// ----- StreamReceiver --------------------------------------------------------

pub struct StreamReceiver<R = OwnedReadHalf> {
    ctx: Arc<TransportContext>,
    io: R,
    remote: SocketAddr,
    cancel: CancellationToken,
    open: bool,
}

impl<R> StreamReceiver<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        ctx: Arc<TransportContext>,
        io: R,
        remote: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            io,
            remote,
            cancel,
            open: true,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// A single receive of up to `max_len` raw bytes, no framing.
    pub async fn receive(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        self.ensure_open()?;

        let outcome = io::receive_some(
            &self.ctx,
            &mut self.io,
            max_len,
            self.remote,
            &self.cancel,
            timeout,
        )
        .await;

        self.settle(outcome, 0)
    }

    /// Receive exactly one frame and return its payload.
    pub async fn receive_frame(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        self.ensure_open()?;

        let config = self.ctx.config();
        let mut frame = FrameReader::new(
            self.ctx.rent_buffer(config.buffer_capacity),
            config.max_frame_size,
        );

        let filled =
            io::fill_frame(&self.ctx, &mut self.io, &mut frame, &self.cancel, timeout).await;
        if let Err(err) = filled {
            let buffered = frame.buffered();
            return self.settle(Err(err), buffered);
        }

        let (header, lease) = frame.into_frame()?;
        Ok(TransmissionResult::new(
            lease,
            HEADER_LEN..header.frame_len(),
            header.frame_len(),
            self.remote,
        ))
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.open {
            return Ok(());
        }
        Err(EngineError::InvalidState {
            expected: "connected",
            actual: "closed",
        })
    }

    fn settle<T>(
        &mut self,
        outcome: Result<T, EngineError>,
        moved: usize,
    ) -> Result<T, EngineError> {
        outcome.inspect_err(|err| {
            if !survives(err, moved) {
                debug!("receiver for {} closed: {err}", self.remote);
                self.open = false;
            }
        })
    }
}

// -----------------------------------------------------------------------------
// ----- StreamSender ----------------------------------------------------------

pub struct StreamSender<W = OwnedWriteHalf> {
    ctx: Arc<TransportContext>,
    io: W,
    remote: SocketAddr,
    cancel: CancellationToken,
    open: bool,
}

impl<W> StreamSender<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        ctx: Arc<TransportContext>,
        io: W,
        remote: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            io,
            remote,
            cancel,
            open: true,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send `payload` as raw bytes, no framing.
    pub async fn send(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        self.ensure_open()?;

        let outcome = io::send_all(
            &self.ctx,
            &mut self.io,
            payload,
            self.remote,
            &self.cancel,
            timeout,
        )
        .await;

        // Raw sends do not report partial progress, so any failure closes.
        outcome.inspect_err(|err| {
            debug!("sender for {} closed: {err}", self.remote);
            self.open = false;
        })
    }

    /// Send `payload` as one frame.
    pub async fn send_frame(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        self.ensure_open()?;

        let config = self.ctx.config();
        let mut frame = FrameWriter::encode(
            self.ctx.rent_buffer(HEADER_LEN + payload.len()),
            payload,
            config.max_frame_size,
        )?;

        let pushed =
            io::push_frame(&self.ctx, &mut self.io, &mut frame, &self.cancel, timeout).await;
        if let Err(err) = pushed {
            if !survives(&err, frame.sent()) {
                debug!("sender for {} closed: {err}", self.remote);
                self.open = false;
            }
            return Err(err);
        }

        frame.into_result(self.remote)
    }

    /// Graceful close of the write direction.
    pub async fn shutdown(&mut self, timeout: Option<Duration>) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.open = false;

        let token = self
            .ctx
            .rent_token(OperationKind::Disconnect, timeout, Some(self.cancel.clone()));
        start(token.signals()?, self.io.shutdown()).await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.open {
            return Ok(());
        }
        Err(EngineError::InvalidState {
            expected: "connected",
            actual: "closed",
        })
    }
}

// -----------------------------------------------------------------------------
// ----- StreamConnection ------------------------------------------------------

enum ConnectionState {
    Unbound,
    Bound(TcpSocket, SocketAddr),
    Connected {
        receiver: StreamReceiver,
        sender: StreamSender,
        local: SocketAddr,
    },
    Closed,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Bound(..) => "bound",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Closed => "closed",
        }
    }
}

pub struct StreamConnection {
    ctx: Arc<TransportContext>,
    state: ConnectionState,
    cancel: CancellationToken,
}

// -----------------------------------------------------------------------------
// ----- StreamConnection: Static ----------------------------------------------

impl StreamConnection {
    pub fn new(ctx: Arc<TransportContext>) -> Self {
        Self {
            ctx,
            state: ConnectionState::Unbound,
            cancel: CancellationToken::new(),
        }
    }

    /// Wrap a stream produced by accept.
    pub(crate) fn accepted(
        ctx: Arc<TransportContext>,
        stream: TcpStream,
        remote: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        let local = stream
            .local_addr()
            .map_err(EngineError::transport(OperationKind::Accept))?;

        let mut conn = Self {
            ctx,
            state: ConnectionState::Closed,
            cancel,
        };
        conn.establish(stream, remote, local);
        Ok(conn)
    }
}

// -----------------------------------------------------------------------------
// ----- StreamConnection: Public ----------------------------------------------

impl StreamConnection {
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ConnectionState::Bound(_, local) => Some(*local),
            ConnectionState::Connected { local, .. } => Some(*local),
            _ => None,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ConnectionState::Connected { receiver, .. } => Some(receiver.remote_addr()),
            _ => None,
        }
    }

    /// Cancelling this token aborts whatever the connection has in flight and
    /// closes it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind completes synchronously, so it takes no deadline.
    pub fn bind(&mut self, local: SocketAddr) -> Result<(), EngineError> {
        self.expect_state("unbound", |s| matches!(s, ConnectionState::Unbound))?;

        let socket = new_socket(local).map_err(|source| EngineError::Bind { addr: local, source })?;
        // Restarting a listener must not trip over TIME_WAIT.
        socket
            .set_reuseaddr(true)
            .map_err(|source| EngineError::Bind { addr: local, source })?;
        socket
            .bind(local)
            .map_err(|source| EngineError::Bind { addr: local, source })?;

        let bound = socket
            .local_addr()
            .map_err(|source| EngineError::Bind { addr: local, source })?;

        debug!("stream socket bound to {bound}");
        self.state = ConnectionState::Bound(socket, bound);
        Ok(())
    }

    /// Bound → Listening, with the configured backlog.
    pub fn listen(mut self) -> Result<StreamListener, EngineError> {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        let ConnectionState::Bound(socket, local) = state else {
            self.state = state;
            return Err(EngineError::InvalidState {
                expected: "bound",
                actual: self.state.name(),
            });
        };

        let listener = socket
            .listen(self.ctx.config().backlog)
            .map_err(|source| EngineError::Bind { addr: local, source })?;

        Ok(StreamListener::new(
            self.ctx.clone(),
            listener,
            local,
            self.cancel.clone(),
        ))
    }

    pub async fn connect(
        &mut self,
        remote: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        let (socket, fresh) = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Unbound => match new_socket(remote) {
                Ok(socket) => (socket, true),
                Err(e) => {
                    self.state = ConnectionState::Unbound;
                    return Err(EngineError::transport(OperationKind::Connect)(e));
                }
            },
            ConnectionState::Bound(socket, _) => (socket, false),
            other => {
                let actual = other.name();
                self.state = other;
                return Err(EngineError::InvalidState {
                    expected: "unbound or bound",
                    actual,
                });
            }
        };

        let token = self
            .ctx
            .rent_token(OperationKind::Connect, timeout, Some(self.cancel.clone()));
        let connected = start(token.signals()?, socket.connect(remote)).await;

        // A failed connect consumes the socket. An unbound connection can
        // simply try again; a bound one lost its address and is done.
        let stream = match connected {
            Ok(done) => done.value,
            Err(err) => {
                if fresh {
                    self.state = ConnectionState::Unbound;
                }
                return Err(err);
            }
        };

        let local = stream
            .local_addr()
            .map_err(EngineError::transport(OperationKind::Connect))?;
        self.establish(stream, remote, local);
        debug!("connected {local} -> {remote}");
        Ok(())
    }

    /// Graceful shutdown of the write side, then close.
    pub async fn disconnect(&mut self, timeout: Option<Duration>) -> Result<(), EngineError> {
        let outcome = self.sender()?.shutdown(timeout).await;
        self.state = ConnectionState::Closed;
        outcome
    }

    /// Cancel anything in flight and drop the socket.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.state = ConnectionState::Closed;
    }

    pub async fn send(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        let outcome = self.sender()?.send(payload, timeout).await;
        self.reconcile();
        outcome
    }

    pub async fn send_frame(
        &mut self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        let outcome = self.sender()?.send_frame(payload, timeout).await;
        self.reconcile();
        outcome
    }

    pub async fn receive(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        let outcome = self.receiver()?.receive(max_len, timeout).await;
        self.reconcile();
        outcome
    }

    pub async fn receive_frame(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<TransmissionResult, EngineError> {
        let outcome = self.receiver()?.receive_frame(timeout).await;
        self.reconcile();
        outcome
    }

    /// Hand both halves out so reads and writes can run on separate tasks.
    pub fn into_split(mut self) -> Result<(StreamReceiver, StreamSender), EngineError> {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Connected {
                receiver, sender, ..
            } => Ok((receiver, sender)),
            other => Err(EngineError::InvalidState {
                expected: "connected",
                actual: other.name(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- StreamConnection: Private ---------------------------------------------

impl StreamConnection {
    fn establish(&mut self, stream: TcpStream, remote: SocketAddr, local: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("set_nodelay on {remote} failed: {e}");
        }

        let (read, write) = stream.into_split();
        self.state = ConnectionState::Connected {
            receiver: StreamReceiver::new(self.ctx.clone(), read, remote, self.cancel.clone()),
            sender: StreamSender::new(self.ctx.clone(), write, remote, self.cancel.clone()),
            local,
        };
    }

    fn expect_state(
        &self,
        expected: &'static str,
        ok: impl FnOnce(&ConnectionState) -> bool,
    ) -> Result<(), EngineError> {
        if ok(&self.state) {
            return Ok(());
        }
        Err(EngineError::InvalidState {
            expected,
            actual: self.state.name(),
        })
    }

    fn receiver(&mut self) -> Result<&mut StreamReceiver, EngineError> {
        match &mut self.state {
            ConnectionState::Connected { receiver, .. } => Ok(receiver),
            other => Err(EngineError::InvalidState {
                expected: "connected",
                actual: other.name(),
            }),
        }
    }

    fn sender(&mut self) -> Result<&mut StreamSender, EngineError> {
        match &mut self.state {
            ConnectionState::Connected { sender, .. } => Ok(sender),
            other => Err(EngineError::InvalidState {
                expected: "connected",
                actual: other.name(),
            }),
        }
    }

    /// A connection is only as open as its least open half.
    fn reconcile(&mut self) {
        let ConnectionState::Connected {
            receiver, sender, ..
        } = &self.state
        else {
            return;
        };

        if !receiver.is_open() || !sender.is_open() || self.cancel.is_cancelled() {
            debug!("connection to {} closed", receiver.remote_addr());
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        // `listen` and `into_split` leave Closed behind; the token lives on
        // in what they handed out.
        if !matches!(self.state, ConnectionState::Closed) {
            self.cancel.cancel();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn new_socket(addr: SocketAddr) -> std::io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

/// Whether a failed transfer leaves the half usable.
fn survives(err: &EngineError, moved: usize) -> bool {
    err.is_recoverable() && moved == 0
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    fn remote() -> SocketAddr {
        "127.0.0.1:7".parse().unwrap()
    }

    fn pipe(
        ctx: &Arc<TransportContext>,
    ) -> (StreamReceiver<DuplexStream>, StreamSender<DuplexStream>) {
        let (a, b) = duplex(1024);
        let cancel = CancellationToken::new();
        (
            StreamReceiver::new(ctx.clone(), a, remote(), cancel.clone()),
            StreamSender::new(ctx.clone(), b, remote(), cancel),
        )
    }

    #[tokio::test]
    async fn frames_cross_a_pipe() {
        let ctx = TransportContext::new(EngineConfig::default());
        let (mut rx, mut tx) = pipe(&ctx);

        let sent = tx.send_frame(b"over the pipe", None).await.unwrap();
        assert_eq!(sent.transferred(), HEADER_LEN + 13);
        assert_eq!(sent.payload(), b"over the pipe");

        let got = rx.receive_frame(None).await.unwrap();
        assert_eq!(got.payload(), b"over the pipe");
        assert_eq!(got.remote(), remote());
    }

    #[tokio::test]
    async fn quiet_timeout_keeps_receiver_open() {
        let ctx = TransportContext::new(EngineConfig::default());
        let (mut rx, mut tx) = pipe(&ctx);

        let err = rx
            .receive_frame(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(rx.is_open());

        tx.send_frame(b"late", None).await.unwrap();
        let got = rx.receive_frame(None).await.unwrap();
        assert_eq!(got.payload(), b"late");
    }

    #[tokio::test]
    async fn timeout_mid_frame_closes_receiver() {
        let ctx = TransportContext::new(EngineConfig::default());
        let (a, mut b) = duplex(64);
        let mut rx = StreamReceiver::new(ctx.clone(), a, remote(), CancellationToken::new());

        // Header promises ten bytes, only two arrive.
        b.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();

        let err = rx
            .receive_frame(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(!rx.is_open());
        assert!(matches!(
            rx.receive_frame(None).await,
            Err(EngineError::InvalidState { .. })
        ));
        assert_eq!(ctx.buffer_stats().outstanding, 0);
    }

    #[tokio::test]
    async fn cancelled_receive_closes_receiver() {
        let ctx = TransportContext::new(EngineConfig::default());
        let (a, _b) = duplex(64);
        let cancel = CancellationToken::new();
        let mut rx = StreamReceiver::new(ctx.clone(), a, remote(), cancel.clone());

        cancel.cancel();
        let err = rx.receive_frame(None).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(!err.is_recoverable());
        assert!(!rx.is_open());
    }

    #[tokio::test]
    async fn oversize_header_is_rejected() {
        let config = EngineConfig {
            max_frame_size: 8,
            ..EngineConfig::default()
        };
        let ctx = TransportContext::new(config);
        let (a, mut b) = duplex(64);
        let mut rx = StreamReceiver::new(ctx.clone(), a, remote(), CancellationToken::new());

        b.write_all(&[0, 0, 0, 9]).await.unwrap();
        let err = rx.receive_frame(None).await.unwrap_err();
        assert!(matches!(err, EngineError::FrameTooLarge { len: 9, max: 8 }));
        assert!(!rx.is_open());
    }

    #[tokio::test]
    async fn shutdown_reaches_the_peer() {
        let ctx = TransportContext::new(EngineConfig::default());
        let (a, mut b) = duplex(64);
        let mut tx = StreamSender::new(ctx.clone(), a, remote(), CancellationToken::new());

        tx.send(b"bye", None).await.unwrap();
        tx.shutdown(None).await.unwrap();
        assert!(!tx.is_open());

        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"bye");
    }

    #[tokio::test]
    async fn operations_check_connection_state() {
        let ctx = TransportContext::new(EngineConfig::default());
        let mut conn = StreamConnection::new(ctx);
        assert_eq!(conn.state_name(), "unbound");

        assert!(matches!(
            conn.send_frame(b"x", None).await,
            Err(EngineError::InvalidState {
                expected: "connected",
                actual: "unbound"
            })
        ));
        assert!(matches!(
            conn.disconnect(None).await,
            Err(EngineError::InvalidState { .. })
        ));

        conn.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(conn.state_name(), "bound");
        assert_ne!(conn.local_addr().unwrap().port(), 0);
        assert!(matches!(
            conn.bind("127.0.0.1:0".parse().unwrap()),
            Err(EngineError::InvalidState { .. })
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
