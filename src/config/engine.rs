use serde::{Deserialize, Deserializer};
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

use crate::framing::HEADER_LEN;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;
const DEFAULT_MAX_RETAINED_BUFFER: usize = 64 * 1024;
const DEFAULT_MAX_IDLE: usize = 1024;
const DEFAULT_BACKLOG: u32 = 1024;
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65_507; // largest IPv4 UDP payload
const DEFAULT_CONCURRENT_RECEIVES: usize = 8;
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- EngineConfig ----------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Initial capacity of every pooled buffer.
    pub buffer_capacity: usize,
    /// Buffers that grew past this are dropped on return.
    pub max_retained_buffer: usize,
    pub max_idle_buffers: usize,
    pub max_idle_tokens: usize,

    pub backlog: u32,
    pub max_connections: Option<usize>,

    /// Largest stream frame payload accepted from a peer.
    pub max_frame_size: usize,
    /// Largest framed datagram, header included.
    pub max_datagram_size: usize,
    pub concurrent_receives: usize,

    #[serde(deserialize_with = "deserialize_duration")]
    pub operation_timeout: Duration,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub idle_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_retained_buffer: DEFAULT_MAX_RETAINED_BUFFER,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            max_idle_tokens: DEFAULT_MAX_IDLE,
            backlog: DEFAULT_BACKLOG,
            max_connections: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            concurrent_receives: DEFAULT_CONCURRENT_RECEIVES,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            idle_timeout: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- EngineConfig: Static --------------------------------------------------

impl EngineConfig {
    pub async fn from_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<EngineConfig, ConfigError> {
        let cfg: EngineConfig = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;
        cfg.validate()?;
        Ok(cfg)
    }
}

// -----------------------------------------------------------------------------
// ----- EngineConfig: Public --------------------------------------------------

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("buffer_capacity", self.buffer_capacity),
            ("max_frame_size", self.max_frame_size),
            ("concurrent_receives", self.concurrent_receives),
            ("backlog", self.backlog as usize),
        ];

        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.max_datagram_size <= HEADER_LEN {
            return Err(ConfigError::Invalid {
                field: "max_datagram_size",
                reason: format!("must exceed the {HEADER_LEN} byte frame header"),
            });
        }

        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_connections",
                reason: "must be greater than zero when set".into(),
            });
        }

        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "operation_timeout",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Durations ---------------------------------------------------

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
