//! Virtual display protocol engine.
//!
//! `vscreen` stands in for an embedded hardware display controller: a
//! remote device (real or simulated firmware) streams compact binary
//! display lists over a single TCP connection, and the engine decodes
//! them, mutates an in-memory framebuffer exactly as the controller's GRAM
//! would, presents the result through an abstract [`Renderer`], and
//! forwards pointer/touch input back to the device.
//!
//! # Architecture
//!
//! - **Transport** frames byte packets over TCP, one client at a time,
//!   with a bounded inbound queue as the backpressure boundary.
//! - **DisplayList** turns packet bytes into typed commands.
//! - **AddressWindow** mimics the controller's auto-incrementing write
//!   cursor over a rectangular window.
//! - **Framebuffer** owns the pixels: set, alpha fill, overlap-safe copy,
//!   in-place cyclic scroll.
//! - **Engine** orchestrates decode → window → framebuffer on a single
//!   task and drives the render/input loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use vscreen::{EngineConfig, VirtualScreen};
//! use vscreen::renderer::Headless;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> vscreen::Result<()> {
//!     let mut renderer = Headless::new();
//!     VirtualScreen::serve("127.0.0.1:7780".parse().unwrap(), EngineConfig::default(), &mut renderer)
//!         .await
//! }
//! ```

pub mod address_window;
pub mod display_list;
mod error;
pub mod engine;
pub mod framebuffer;
pub mod geom;
pub mod renderer;
pub mod transport;

pub use address_window::AddressWindow;
pub use display_list::{Command, DecodeError, DisplayList, DisplayListBuilder, ScreenCommand};
pub use engine::{Engine, EngineConfig};
pub use error::{Result, ScreenError};
pub use framebuffer::Framebuffer;
pub use geom::{Point, Rect};
pub use renderer::{Renderer, WindowEvent};
pub use transport::{DEFAULT_PORT, Packet, Server, ServerChannels};

use std::net::SocketAddr;
use tracing::info;

/// Unified entry point: bind the transport, build the engine, run it.
///
/// Most embedders want nothing more than this; anyone composing their own
/// loop can use [`Server::bind`] and [`Engine::new`] directly.
pub struct VirtualScreen;

impl VirtualScreen {
    /// Serve one virtual display on `addr` until the renderer reports a
    /// close request or the server is cancelled.
    pub async fn serve<R: Renderer>(
        addr: SocketAddr,
        config: EngineConfig,
        renderer: &mut R,
    ) -> Result<()> {
        let channels = Server::bind(addr).await?;
        info!(addr = %channels.local_addr, "virtual screen ready");
        Engine::new(channels, config).run(renderer).await
    }
}
