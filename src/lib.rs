pub mod config;
pub mod context;
pub mod datagram;
pub mod errors;
pub mod framing;
pub mod operation;
pub mod pool;
pub mod stream;

pub use config::{Config, EngineConfig, TransportKind};
pub use context::TransportContext;
pub use datagram::{DatagramEndpoint, DatagramServer, MessageFlags};
pub use errors::EngineError;
pub use framing::{EchoHandler, HandlerRegistry, PacketHeader, RequestHandler};
pub use operation::{OperationKind, TransmissionResult};
pub use stream::{StreamConnection, StreamListener, StreamReceiver, StreamSender};
