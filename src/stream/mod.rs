// stream/mod.rs
//! Connection-oriented transport: connections, the accept loop, and the
//! per-client framed session.

pub mod connection;
mod io;
pub mod listener;
pub mod session;

pub use connection::{StreamConnection, StreamReceiver, StreamSender};
pub use listener::StreamListener;
pub use session::{SessionEnd, StreamSession};
