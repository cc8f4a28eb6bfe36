// datagram/mod.rs
//! Connectionless transport: one frame per datagram.

pub mod endpoint;
pub mod server;

pub use endpoint::{DatagramEndpoint, MessageFlags};
pub use server::DatagramServer;
