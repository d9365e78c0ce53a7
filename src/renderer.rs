//! Presentation and input capability consumed by the engine.
//!
//! The engine never talks to a window system directly; it drives whatever
//! implements [`Renderer`]. A production build wraps an SDL or similar
//! window behind this trait, translating window coordinates to framebuffer
//! coordinates before reporting pointer events. [`Headless`] records calls
//! and replays queued events, which is all the test suites need.

use crate::framebuffer::Framebuffer;
use crate::geom::Rect;

/// Events a renderer reports back to the engine each poll.
///
/// Pointer coordinates are in framebuffer space; the renderer owns the
/// window-to-framebuffer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The user asked the window to close; the engine shuts down.
    CloseRequested,
    /// Pointer moved or its button state changed.
    Pointer { buttons: u32, x: u16, y: u16 },
}

/// Opaque presentation capability: a resizable surface the engine blits
/// the framebuffer to, plus an event poll.
pub trait Renderer {
    /// The framebuffer was recreated at new dimensions.
    fn resize(&mut self, width: u32, height: u32);

    /// Present `area` of the framebuffer.
    fn blit(&mut self, framebuffer: &Framebuffer, area: Rect);

    /// Drain pending window events.
    fn poll_events(&mut self) -> Vec<WindowEvent>;
}

/// Renderer that records presentation calls and replays scripted events.
///
/// Used by the test suites and by headless deployments that only need the
/// protocol side of the engine.
#[derive(Debug, Default)]
pub struct Headless {
    size: (u32, u32),
    blits: Vec<Rect>,
    queued: Vec<WindowEvent>,
}

impl Headless {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `poll_events` call.
    pub fn push_event(&mut self, event: WindowEvent) {
        self.queued.push(event);
    }

    /// Dimensions from the last `resize` call.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Areas blitted so far, in order.
    pub fn blits(&self) -> &[Rect] {
        &self.blits
    }
}

impl Renderer for Headless {
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn blit(&mut self, _framebuffer: &Framebuffer, area: Rect) {
        self.blits.push(area);
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        std::mem::take(&mut self.queued)
    }
}
