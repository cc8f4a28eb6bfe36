// framing/mod.rs
//! Length-prefixed framing: header codec, the read/write state machines, and
//! the request handler seam. Nothing here performs I/O.

pub mod handler;
pub mod header;
pub mod reader;
pub mod writer;

pub use handler::{EchoHandler, HandlerRegistry, RequestHandler};
pub use header::{HEADER_LEN, PacketHeader, decode_frame, encode_frame};
pub use reader::{FrameReader, ReadState};
pub use writer::FrameWriter;
