//! framing/handler.rs
//!
//! The one seam between the transport and whatever sits above it. Handlers
//! run synchronously on the task that completed the receive, so they must
//! not block; a slow handler stalls that connection's next read.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use tracing::warn;

use super::header::PacketHeader;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const TYPE_ID_LEN: usize = 2;

// -----------------------------------------------------------------------------
// ----- RequestHandler --------------------------------------------------------

pub trait RequestHandler: Send + Sync + 'static {
    /// Called once per complete frame. `Some` is framed and sent back.
    fn handle(&self, remote: SocketAddr, header: PacketHeader, payload: &[u8]) -> Option<Bytes>;
}

impl<F> RequestHandler for F
where
    F: Fn(SocketAddr, PacketHeader, &[u8]) -> Option<Bytes> + Send + Sync + 'static,
{
    fn handle(&self, remote: SocketAddr, header: PacketHeader, payload: &[u8]) -> Option<Bytes> {
        self(remote, header, payload)
    }
}

// -----------------------------------------------------------------------------
// ----- EchoHandler -----------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, _remote: SocketAddr, _header: PacketHeader, payload: &[u8]) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(payload))
    }
}

// -----------------------------------------------------------------------------
// ----- HandlerRegistry -------------------------------------------------------

/// Typed dispatch: the first two payload bytes (big-endian) name the message
/// type, the rest goes to every handler registered for it. The first response
/// wins and is sent back under the same type id.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: RwLock<HashMap<u16, Vec<Arc<dyn RequestHandler>>>>,
}

// -----------------------------------------------------------------------------
// ----- HandlerRegistry: Public -----------------------------------------------

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, type_id: u16, handler: Arc<dyn RequestHandler>) {
        self.by_type.write().entry(type_id).or_default().push(handler);
    }

    /// Removes this exact handler instance. Returns whether it was registered.
    pub fn deregister_handler(&self, type_id: u16, handler: &Arc<dyn RequestHandler>) -> bool {
        let mut by_type = self.by_type.write();
        let Some(handlers) = by_type.get_mut(&type_id) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            by_type.remove(&type_id);
        }

        removed
    }

    pub fn handler_count(&self, type_id: u16) -> usize {
        self.by_type.read().get(&type_id).map_or(0, Vec::len)
    }

    pub fn encode(type_id: u16, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(TYPE_ID_LEN + body.len());
        buf.put_u16(type_id);
        buf.extend_from_slice(body);
        buf.freeze()
    }
}

impl RequestHandler for HandlerRegistry {
    fn handle(&self, remote: SocketAddr, header: PacketHeader, payload: &[u8]) -> Option<Bytes> {
        let Some((raw_id, body)) = payload.split_first_chunk::<TYPE_ID_LEN>() else {
            warn!("frame from {remote} too short to carry a type id");
            return None;
        };
        let type_id = u16::from_be_bytes(*raw_id);

        // Clone out so handlers may (de)register while we dispatch.
        let handlers = self.by_type.read().get(&type_id).cloned();
        let Some(handlers) = handlers else {
            warn!("no handler registered for type {type_id} (from {remote})");
            return None;
        };

        handlers
            .iter()
            .filter_map(|h| h.handle(remote, header, body))
            .next()
            .map(|response| Self::encode(type_id, &response))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
