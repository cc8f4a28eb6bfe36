use std::{net::SocketAddr, sync::OnceLock};

use super::{
    cli::CliConfig,
    engine::EngineConfig,
    types::{LogLevel, TransportKind},
};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

/// Set once at startup and read-only afterwards.
static ROOT_CONFIG: OnceLock<Config> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub transport: TransportKind,
    pub log_level: LogLevel,
    pub engine: EngineConfig,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Init: panic on any error. Do not continue with a bad state.
    pub async fn init() {
        let cli = CliConfig::from_args();
        let next = Self::load(cli).await;

        if ROOT_CONFIG.set(next).is_err() {
            panic!("Config::init called twice");
        }
    }

    pub fn snapshot() -> Config {
        Self::handle().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    async fn load(cli: CliConfig) -> Config {
        let mut engine = match &cli.config_file_location {
            Some(path) => EngineConfig::from_file(path)
                .await
                .unwrap_or_else(|e| panic!("failed to load engine config from {:?}: {e}", path)),
            None => EngineConfig::default(),
        };

        if let Some(timeout) = cli.operation_timeout {
            engine.operation_timeout = timeout;
        }

        engine
            .validate()
            .unwrap_or_else(|e| panic!("invalid engine config: {e}"));

        Config {
            listen_addr: cli.listen_addr,
            transport: cli.transport,
            log_level: cli.log_level,
            engine,
        }
    }

    fn handle() -> &'static Config {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
