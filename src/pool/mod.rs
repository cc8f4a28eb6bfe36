// pool/mod.rs
//! Object recycling for the hot path: operation tokens and byte buffers are
//! rented here and come back through their lease.

pub mod buffers;
pub mod lease;
pub mod pool;

pub use buffers::{BufferLease, BufferPool};
pub use lease::Lease;
pub use pool::{Pool, PoolBuilder, PoolStats};
