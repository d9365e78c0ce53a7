//! Error types for the virtual display engine.
//!
//! The protocol is deliberately forgiving: disconnects, frame desync,
//! missing companion packets and unknown opcodes are all *events* that are
//! logged and recovered from, never surfaced as errors. What remains here
//! are the genuinely fatal or caller-visible failures: listener setup,
//! truncated display lists, and channel teardown during shutdown.

use std::net::SocketAddr;
use thiserror::Error;

use crate::display_list::DecodeError;

/// Result type alias for engine operations.
pub type Result<T, E = ScreenError> = std::result::Result<T, E>;

/// Main error type for the virtual display engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ScreenError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("display list decode failed")]
    Decode(#[from] DecodeError),

    #[error("{side} channel closed")]
    ChannelClosed { side: &'static str },
}

impl ScreenError {
    /// Helper constructor for listener setup failures.
    pub fn bind_failed(addr: SocketAddr, source: std::io::Error) -> Self {
        ScreenError::Bind { addr, source }
    }

    /// True when the error simply reflects engine/server shutdown rather
    /// than a protocol or I/O fault.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ScreenError::ChannelClosed { .. })
    }
}
