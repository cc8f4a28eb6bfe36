pub mod cli;
pub mod config;
pub mod engine;
pub mod types;

pub use config::Config;
pub use engine::{ConfigError, EngineConfig};
pub use types::{LogLevel, TransportKind};
