use clap::Parser;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use super::types::{LogLevel, TransportKind};

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub transport: TransportKind,
    pub config_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
    pub operation_timeout: Option<Duration>,
}

impl CliConfig {
    pub fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| panic!("Invalid CLI/ENV: {e}"));
        Self::from(args)
    }
}

impl From<Args> for CliConfig {
    fn from(args: Args) -> Self {
        Self {
            listen_addr: SocketAddr::from((args.host, args.port)),
            transport: args.transport,
            config_file_location: args.config_file,
            log_level: args.log_level,
            operation_timeout: args.operation_timeout,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "framewire", version, about = "Framed socket echo host")]
pub struct Args {
    // IPv4 or IPv6 literal (e.g., 0.0.0.0, 127.0.0.1, ::, ::1).
    #[arg(long = "host", short = 'H', env = "FRAMEWIRE_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    // Required via CLI or ENV.
    #[arg(long = "port", short = 'p', env = "FRAMEWIRE_PORT")]
    port: u16,

    #[arg(long = "transport", env = "FRAMEWIRE_TRANSPORT", default_value = "stream")]
    transport: TransportKind,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // Optional engine tuning file; built-in defaults otherwise.
    #[arg(long = "config", env = "FRAMEWIRE_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    // Overrides `operation_timeout` from the config file, e.g. "750ms".
    #[arg(long = "operation-timeout", value_parser = humantime::parse_duration)]
    operation_timeout: Option<Duration>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
