//! The in-memory pixel store and its compositing operations.
//!
//! Pixels are `0x00RRGGBB` words in row-major order. All operations are
//! bounds-checked against the buffer: out-of-range accesses are silent
//! no-ops (reads return black), matching how the real controller ignores
//! writes outside GRAM.
//!
//! ## Scroll algorithm
//!
//! `scroll` shifts content within a rectangle, wrapping or filling per
//! axis. The vertical rotation is performed in place with the classic
//! cyclic-rotation walk: starting from row `shift_y - 1` (or its mirror
//! for negative shifts) the walk steps by `shift_y` rows modulo the area
//! height, carrying a single row buffer through read-then-overwrite pairs.
//! Whenever `(i + 1) * shift_y` lands on a multiple of the height the walk
//! has closed a cycle and nudges one row over to start the next, so the
//! whole rotation finishes in one pass with O(1) extra row storage no
//! matter what `gcd(shift_y, height)` is. Each carried row receives its
//! horizontal wrap-or-fill shift before being written to its destination.

use tracing::trace;

use crate::geom::{Point, Rect};

/// Pack RGB channels into a `0x00RRGGBB` pixel.
pub fn make_color(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Alpha-composite `src` (`0xAARRGGBB`) over `dst` (`0x00RRGGBB`).
///
/// Each channel becomes `alpha*src/255 + (255-alpha)*dst/255`; an alpha of
/// 255 is an exact opaque overwrite.
pub fn blend(dst: u32, src: u32) -> u32 {
    let alpha = src >> 24;
    let channel = |shift: u32| {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        (alpha * s / 0xFF) + ((0xFF - alpha) * d / 0xFF)
    };
    (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

/// Row-major `0x00RRGGBB` pixel store, exclusively owned by the engine.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Framebuffer {
    /// Create a black framebuffer of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![0; width as usize * height as usize] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Full bounds of the buffer.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Raw pixel words, row-major; renderers blit from this.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Read one pixel; out-of-range reads return black.
    pub fn get(&self, x: u32, y: u32) -> u32 {
        if x < self.width && y < self.height { self.pixels[self.index(x, y)] } else { 0 }
    }

    pub fn get_at(&self, p: Point) -> u32 {
        self.get(p.x, p.y)
    }

    /// Write one pixel; out-of-range writes are dropped.
    pub fn set(&mut self, x: u32, y: u32, rgb: u32) {
        if x < self.width && y < self.height {
            let index = self.index(x, y);
            self.pixels[index] = rgb;
        }
    }

    pub fn set_at(&mut self, p: Point, rgb: u32) {
        self.set(p.x, p.y, rgb);
    }

    /// Alpha-composite `argb` over every pixel of `rect`.
    pub fn fill(&mut self, rect: Rect, argb: u32) {
        let rect = rect.clamped(self.width, self.height);
        trace!(?rect, argb = format_args!("{argb:#010x}"), "fill");
        for y in rect.y..rect.y + rect.h {
            let row = self.index(rect.x, y);
            for pixel in &mut self.pixels[row..row + rect.w as usize] {
                *pixel = blend(*pixel, argb);
            }
        }
    }

    /// Copy `src` to `(dst_x, dst_y)`, safely for overlapping regions.
    ///
    /// Rows are copied bottom-to-top when the destination lies below the
    /// source so no row is read after being overwritten; each row moves as
    /// one atomic range copy, which also makes horizontal self-overlap
    /// within a row correct.
    pub fn copy(&mut self, src: Rect, dst_x: u32, dst_y: u32) {
        if src.x >= self.width || dst_x >= self.width || src.y >= self.height
            || dst_y >= self.height
        {
            return;
        }
        let w = src.w.min(self.width - src.x.max(dst_x)) as usize;
        let h = src.h.min(self.height - src.y).min(self.height - dst_y);
        trace!(?src, dst_x, dst_y, w, h, "copy");
        if w == 0 || h == 0 {
            return;
        }

        let mut copy_line = |this: &mut Self, y: u32| {
            let from = this.index(src.x, src.y + y);
            let to = this.index(dst_x, dst_y + y);
            this.pixels.copy_within(from..from + w, to);
        };
        if src.y < dst_y {
            for y in (0..h).rev() {
                copy_line(self, y);
            }
        } else {
            for y in 0..h {
                copy_line(self, y);
            }
        }
    }

    /// Shift content within `area` by `(shift_x, shift_y)`.
    ///
    /// Positive shifts move content toward higher x/y. On a wrapping axis
    /// content leaving one edge re-enters at the other; on a non-wrapping
    /// axis vacated rows/columns are filled with `fill` and pushed-off
    /// content is discarded.
    pub fn scroll(
        &mut self,
        area: Rect,
        shift_x: i32,
        shift_y: i32,
        wrap_x: bool,
        wrap_y: bool,
        fill: u32,
    ) {
        let area = area.clamped(self.width, self.height);
        if area.is_empty() {
            return;
        }
        let w = area.w as i32;
        let h = area.h as i32;
        let fill = fill & 0x00FF_FFFF;
        trace!(?area, shift_x, shift_y, wrap_x, wrap_y, "scroll");

        // Normalize the shifts: wrapping axes reduce modulo the extent,
        // non-wrapping shifts of at least the extent blank the whole area.
        let cx = if wrap_x { shift_x.rem_euclid(w) } else { shift_x };
        let cy = if wrap_y { shift_y.rem_euclid(h) } else { shift_y };
        if !wrap_y && cy.unsigned_abs() >= h as u32 {
            self.fill(area, 0xFF00_0000 | fill);
            return;
        }
        if !wrap_x && cx.unsigned_abs() >= w as u32 && cy == 0 {
            self.fill(area, 0xFF00_0000 | fill);
            return;
        }

        if cy == 0 {
            // Pure horizontal shift: each row rotates or fills in place.
            if cx == 0 {
                return;
            }
            let mut line = vec![0u32; w as usize];
            for y in 0..h {
                self.read_row(&area, y, &mut line);
                let shifted = shift_line(&line, cx, wrap_x, fill);
                self.write_row(&area, y, &shifted);
            }
            return;
        }

        // Destination rows left vacant by a non-wrapping vertical shift.
        let fill_rows = if wrap_y { 0..0 } else if cy > 0 { 0..cy } else { (h + cy)..h };

        // The cyclic-rotation walk. `line` carries the row displaced by the
        // previous write; `y` is the next row to be displaced.
        let mut y = if cy < 0 { h + cy - 1 } else { cy - 1 };
        let mut line = vec![0u32; w as usize];
        let mut next = vec![0u32; w as usize];
        self.read_row(&area, y, &mut line);
        for i in 0..h {
            let mut yd = y + cy;
            if yd < 0 {
                yd += h;
            } else if yd >= h {
                yd -= h;
            }

            // The product exceeds 32 bits on tall areas (u16-sized heights
            // with near-full-period shifts).
            if (i64::from(i + 1) * i64::from(cy)) % i64::from(h) == 0 {
                // Cycle closed; nudge over to start the next one.
                y += if cy > 0 { 1 } else { -1 };
            } else {
                y += cy;
            }
            if y < 0 {
                y += h;
            } else if y >= h {
                y -= h;
            }
            self.read_row(&area, y, &mut next);

            if fill_rows.contains(&yd) {
                self.fill_row(&area, yd, fill);
            } else {
                let shifted = shift_line(&line, cx, wrap_x, fill);
                self.write_row(&area, yd, &shifted);
            }
            std::mem::swap(&mut line, &mut next);
        }
    }

    fn row_start(&self, area: &Rect, y: i32) -> usize {
        self.index(area.x, area.y + y as u32)
    }

    fn read_row(&self, area: &Rect, y: i32, buf: &mut [u32]) {
        let start = self.row_start(area, y);
        buf.copy_from_slice(&self.pixels[start..start + area.w as usize]);
    }

    fn write_row(&mut self, area: &Rect, y: i32, buf: &[u32]) {
        let start = self.row_start(area, y);
        self.pixels[start..start + area.w as usize].copy_from_slice(buf);
    }

    fn fill_row(&mut self, area: &Rect, y: i32, color: u32) {
        let start = self.row_start(area, y);
        self.pixels[start..start + area.w as usize].fill(color);
    }
}

/// Rotate or shift one row horizontally. `cx` must already be normalized
/// (non-negative when wrapping).
fn shift_line(line: &[u32], cx: i32, wrap_x: bool, fill: u32) -> Vec<u32> {
    let w = line.len();
    let mut out = Vec::with_capacity(w);
    if cx == 0 {
        out.extend_from_slice(line);
    } else if cx < 0 {
        let k = (cx.unsigned_abs() as usize).min(w);
        out.extend_from_slice(&line[k..]);
        if wrap_x {
            out.extend_from_slice(&line[..k]);
        } else {
            out.resize(w, fill);
        }
    } else {
        let k = (cx as usize).min(w);
        if wrap_x {
            out.extend_from_slice(&line[w - k..]);
        } else {
            out.resize(k, fill);
        }
        out.extend_from_slice(&line[..w - k]);
    }
    out
}
