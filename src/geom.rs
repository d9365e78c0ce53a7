//! Plain geometry types shared by the decoder, framebuffer and engine.

/// An absolute pixel position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle, origin plus extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// True when `(x, y)` lies inside; edges are half-open.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// Intersect with a `width` x `height` buffer anchored at the origin.
    ///
    /// An origin outside the buffer yields an empty rectangle.
    pub fn clamped(&self, width: u32, height: u32) -> Rect {
        if self.x >= width || self.y >= height {
            return Rect::new(self.x.min(width), self.y.min(height), 0, 0);
        }
        Rect::new(self.x, self.y, self.w.min(width - self.x), self.h.min(height - self.y))
    }
}
