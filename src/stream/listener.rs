//! stream/listener.rs
//!
//! Listening socket plus the accept loop. Every accept is reissued as soon as
//! the previous one completes, before the accepted connection does any work,
//! so a slow client never holds up the next one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::StreamConnection;
use super::session::StreamSession;
use crate::context::TransportContext;
use crate::errors::EngineError;
use crate::framing::RequestHandler;
use crate::operation::{OperationKind, start};

// -----------------------------------------------------------------------------
// ----- StreamListener --------------------------------------------------------

pub struct StreamListener {
    ctx: Arc<TransportContext>,
    listener: TcpListener,
    local: SocketAddr,
    cancel: CancellationToken,
}

// -----------------------------------------------------------------------------
// ----- StreamListener: Static ------------------------------------------------

impl StreamListener {
    /// Unbound → Bound → Listening in one step.
    pub fn bind(ctx: Arc<TransportContext>, local: SocketAddr) -> Result<Self, EngineError> {
        let mut conn = StreamConnection::new(ctx);
        conn.bind(local)?;
        conn.listen()
    }

    pub(crate) fn new(
        ctx: Arc<TransportContext>,
        listener: TcpListener,
        local: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            listener,
            local,
            cancel,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- StreamListener: Public ------------------------------------------------

impl StreamListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Cancels pending `accept` calls. `serve` follows its own shutdown token.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept one connection and hand it back already connected.
    pub async fn accept(&self, timeout: Option<Duration>) -> Result<StreamConnection, EngineError> {
        let (stream, remote) = self.accept_raw(&self.cancel, timeout).await?;
        debug!("accepted {remote} on {}", self.local);
        StreamConnection::accepted(self.ctx.clone(), stream, remote, self.cancel.child_token())
    }

    /// Accept until `shutdown` fires, running a framed session per client.
    /// Sessions get child tokens, so shutdown reaches them too.
    pub async fn serve(
        self,
        handler: Arc<dyn RequestHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let limit = self
            .ctx
            .config()
            .max_connections
            .map(|n| Arc::new(Semaphore::new(n)));

        info!("accepting stream connections on {}", self.local);

        loop {
            let permit = match &limit {
                Some(limit) => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    permit = limit.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            let (stream, remote) = match self.accept_raw(&shutdown, None).await {
                Ok(accepted) => accepted,
                Err(EngineError::Cancelled { .. }) => break,
                Err(err) if err.is_fatal() => {
                    error!("accept loop on {} stopped: {err}", self.local);
                    return Err(err);
                }
                Err(err) => {
                    warn!("accept on {} failed: {err}", self.local);
                    continue;
                }
            };

            self.spawn_session(stream, remote, handler.clone(), shutdown.child_token(), permit);
        }

        info!("stopped accepting on {}", self.local);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- StreamListener: Private -----------------------------------------------

impl StreamListener {
    async fn accept_raw(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<(TcpStream, SocketAddr), EngineError> {
        let token = self
            .ctx
            .rent_token(OperationKind::Accept, timeout, Some(cancel.clone()));

        Ok(start(token.signals()?, self.listener.accept()).await?.value)
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        cancel: CancellationToken,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("set_nodelay on {remote} failed: {e}");
        }

        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let (reader, writer) = stream.into_split();
            let session = StreamSession::new(ctx, reader, writer, remote, handler, cancel);

            match session.run().await {
                Ok(end) => debug!("client {remote} done: {end:?}"),
                Err(err) if err.is_fatal() => {
                    error!("client {remote}: {err}");
                    if cfg!(debug_assertions) {
                        panic!("serving {remote} hit {err}");
                    }
                }
                Err(err) => warn!("client {remote} error: {err}"),
            }
        });
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
