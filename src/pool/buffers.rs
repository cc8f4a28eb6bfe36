//! pool/buffers.rs
//!
//! Byte-buffer flavor of [`Pool`]. Buffers come back cleared; anything that
//! grew past `max_retained` while leased is dropped instead of kept around.

use bytes::BytesMut;

use super::{Lease, Pool, PoolStats};

// -----------------------------------------------------------------------------
// ----- BufferPool ------------------------------------------------------------

pub type BufferLease = Lease<BytesMut>;

#[derive(Clone)]
pub struct BufferPool {
    pool: Pool<BytesMut>,
}

impl BufferPool {
    pub fn new(capacity: usize, max_retained: usize, max_idle: usize) -> Self {
        let pool = Pool::builder(move || BytesMut::with_capacity(capacity))
            .reset(|buf: &mut BytesMut| buf.clear())
            .reuse_if(move |buf: &BytesMut| buf.capacity() <= max_retained)
            .max_idle(max_idle)
            .build();

        Self { pool }
    }
}

// -----------------------------------------------------------------------------
// ----- BufferPool: Public ----------------------------------------------------

impl BufferPool {
    /// Empty buffer with at least `min_capacity` bytes of room.
    pub fn rent(&self, min_capacity: usize) -> BufferLease {
        let mut lease = self.pool.rent();
        lease.reserve(min_capacity);
        lease
    }

    /// Zero-filled buffer of exactly `len` bytes, ready to be read into.
    pub fn rent_filled(&self, len: usize) -> BufferLease {
        let mut lease = self.rent(len);
        lease.resize(len, 0);
        lease
    }

    pub fn shrink(&self) -> usize {
        self.pool.shrink()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
