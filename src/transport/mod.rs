//! Packet transport: wire framing and the single-connection TCP server.

pub mod framing;
pub mod server;

pub use framing::{DISPLAY_MAGIC, Frame, FrameDecoder, TOUCH_MAGIC, encode_frame};
pub use server::{DEFAULT_PORT, INBOUND_QUEUE_DEPTH, Server, ServerChannels};

/// One transport message: an owned byte payload, alive from receipt until
/// the engine has fully consumed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet(pub Vec<u8>);

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
