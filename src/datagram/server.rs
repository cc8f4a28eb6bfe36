//! datagram/server.rs
//!
//! Keeps a fixed number of receives outstanding on one endpoint. When one
//! completes its replacement is issued before the handler runs, so the
//! socket always has the same number of readers waiting.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::endpoint::{DatagramEndpoint, MessageFlags};
use crate::errors::EngineError;
use crate::framing::{PacketHeader, RequestHandler};
use crate::operation::TransmissionResult;

// -----------------------------------------------------------------------------
// ----- DatagramServer --------------------------------------------------------

pub struct DatagramServer {
    endpoint: Arc<DatagramEndpoint>,
    handler: Arc<dyn RequestHandler>,
    concurrency: usize,
}

// -----------------------------------------------------------------------------
// ----- DatagramServer: Static ------------------------------------------------

impl DatagramServer {
    pub fn new(endpoint: Arc<DatagramEndpoint>, handler: Arc<dyn RequestHandler>) -> Self {
        let concurrency = endpoint.context().config().concurrent_receives;
        Self {
            endpoint,
            handler,
            concurrency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramServer: Public ------------------------------------------------

impl DatagramServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), EngineError> {
        let mut inflight = JoinSet::new();
        for _ in 0..self.concurrency {
            self.issue_receive(&mut inflight);
        }

        info!(
            "serving datagrams on {} with {} receives outstanding",
            self.local_addr(),
            self.concurrency
        );

        loop {
            let joined = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                joined = inflight.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };
            self.issue_receive(&mut inflight);

            match joined {
                Ok(Ok(datagram)) => self.process(datagram).await,
                Ok(Err(EngineError::Cancelled { .. })) => break,
                Ok(Err(err)) if err.is_fatal() => {
                    error!("datagram loop on {} stopped: {err}", self.local_addr());
                    return Err(err);
                }
                Ok(Err(err)) => warn!("datagram receive on {} failed: {err}", self.local_addr()),
                Err(e) => error!("datagram receive task failed: {e}"),
            }
        }

        inflight.shutdown().await;
        info!("stopped serving datagrams on {}", self.local_addr());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- DatagramServer: Private -----------------------------------------------

impl DatagramServer {
    /// The token is rented here rather than inside the task, so it counts
    /// as outstanding from the moment the receive is issued.
    fn issue_receive(&self, inflight: &mut JoinSet<Result<TransmissionResult, EngineError>>) {
        let token = match self.endpoint.arm_receive(None) {
            Ok(token) => token,
            Err(err) => {
                warn!("could not issue datagram receive on {}: {err}", self.local_addr());
                return;
            }
        };

        let endpoint = self.endpoint.clone();
        inflight.spawn(async move { endpoint.receive_armed(token, MessageFlags::NONE).await });
    }

    async fn process(&self, datagram: TransmissionResult) {
        let remote = datagram.remote();
        let header = match PacketHeader::for_payload(datagram.payload().len()) {
            Ok(header) => header,
            Err(err) => {
                warn!("dropping datagram from {remote}: {err}");
                return;
            }
        };

        let response = self.handler.handle(remote, header, datagram.payload());
        drop(datagram);

        let Some(response) = response else {
            return;
        };

        let timeout = Some(self.endpoint.context().config().operation_timeout);
        match self
            .endpoint
            .send_to(remote, &response, MessageFlags::NONE, timeout)
            .await
        {
            Ok(sent) => debug!("replied {} bytes to {remote}", sent.transferred()),
            Err(err) => warn!("reply to {remote} failed: {err}"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::TransportContext;
    use crate::framing::EchoHandler;
    use std::time::Duration;

    #[tokio::test]
    async fn echoes_and_stops_on_shutdown() {
        let ctx = TransportContext::new(EngineConfig::default());
        let any = "127.0.0.1:0".parse().unwrap();
        let server_end = Arc::new(DatagramEndpoint::bind(ctx.clone(), any).await.unwrap());
        let client = DatagramEndpoint::bind(ctx.clone(), any).await.unwrap();

        let server = DatagramServer::new(server_end.clone(), Arc::new(EchoHandler))
            .with_concurrency(2);
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));

        client
            .send_to(addr, b"marco", MessageFlags::NONE, None)
            .await
            .unwrap();
        let reply = client
            .receive_from(MessageFlags::NONE, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reply.payload(), b"marco");
        assert_eq!(reply.remote(), addr);
        drop(reply);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(ctx.buffer_stats().outstanding, 0);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
