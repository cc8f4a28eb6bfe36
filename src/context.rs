use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::operation::{OperationKind, OperationToken};
use crate::pool::{BufferLease, BufferPool, Lease, Pool, PoolStats};

// -----------------------------------------------------------------------------
// ----- TransportContext ------------------------------------------------------

/// Shared by every connection and endpoint built from it. The two pools are
/// the only state mutated from many tasks at once.
pub struct TransportContext {
    config: EngineConfig,
    buffers: BufferPool,
    tokens: Pool<OperationToken>,
}

// -----------------------------------------------------------------------------
// ----- TransportContext: Static ----------------------------------------------

impl TransportContext {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let buffers = BufferPool::new(
            config.buffer_capacity,
            config.max_retained_buffer,
            config.max_idle_buffers,
        );

        let tokens = Pool::builder(OperationToken::default)
            .reset(OperationToken::clear)
            .max_idle(config.max_idle_tokens)
            .build();

        Arc::new(Self {
            config,
            buffers,
            tokens,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- TransportContext: Public ----------------------------------------------

impl TransportContext {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn rent_buffer(&self, min_capacity: usize) -> BufferLease {
        self.buffers.rent(min_capacity)
    }

    pub fn rent_token(
        &self,
        kind: OperationKind,
        deadline: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Lease<OperationToken> {
        let mut token = self.tokens.rent();
        token.arm(kind, deadline, cancel);
        token
    }

    pub fn buffer_stats(&self) -> PoolStats {
        self.buffers.stats()
    }

    pub fn token_stats(&self) -> PoolStats {
        self.tokens.stats()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
