use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use framewire::{
    Config, DatagramEndpoint, DatagramServer, EchoHandler, EngineError, RequestHandler,
    StreamListener, TransportContext, TransportKind,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "framewire";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    setup().await;
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter =
        EnvFilter::try_new(config.log_level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> Result<(), EngineError> {
    let config = Config::snapshot();
    let ctx = TransportContext::new(config.engine.clone());
    let handler: Arc<dyn RequestHandler> = Arc::new(EchoHandler);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("cannot listen for shutdown signal: {e}");
        }
        info!("{APP_NAME} shutting down");
        on_signal.cancel();
    });

    info!(
        "{APP_NAME} serving {:?} echo on {}",
        config.transport, config.listen_addr
    );

    match config.transport {
        TransportKind::Stream => {
            let listener = StreamListener::bind(ctx, config.listen_addr)?;
            listener.serve(handler, shutdown).await
        }
        TransportKind::Datagram => {
            let endpoint = DatagramEndpoint::bind(ctx, config.listen_addr).await?;
            DatagramServer::new(Arc::new(endpoint), handler)
                .serve(shutdown)
                .await
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
