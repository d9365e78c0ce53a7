//! Hardware-style GRAM address window.
//!
//! Real display controllers expose an auto-incrementing write/read cursor
//! confined to a configured rectangular region: every pixel transfer lands
//! at the cursor and advances it in row-major order, and transfers beyond
//! the window's capacity are silently discarded. This module mimics that
//! contract exactly; running out of capacity is *not* an error.

use crate::geom::{Point, Rect};

/// Auto-incrementing cursor over a rectangular framebuffer region.
///
/// `bounds` shrinks from the top as rows are consumed; `reset()` restores
/// the most recently configured window.
#[derive(Debug, Clone, Default)]
pub struct AddressWindow {
    initial: Rect,
    bounds: Rect,
    column: u32,
}

impl AddressWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the horizontal extent and remember it for `reset()`.
    pub fn set_column(&mut self, x: u32, width: u32) {
        self.bounds.x = x;
        self.bounds.w = width;
        self.initial.x = x;
        self.initial.w = width;
        self.column = 0;
    }

    /// Configure the vertical extent and remember it for `reset()`.
    pub fn set_row(&mut self, y: u32, height: u32) {
        self.bounds.y = y;
        self.bounds.h = height;
        self.initial.y = y;
        self.initial.h = height;
        self.column = 0;
    }

    /// Restore the configured window and rewind the cursor to its origin.
    pub fn reset(&mut self) {
        self.bounds = self.initial;
        self.column = 0;
    }

    /// Absolute position of the cursor.
    pub fn pos(&self) -> Point {
        Point::new(self.bounds.x + self.column, self.bounds.y)
    }

    /// Advance the cursor one cell; at the end of a row the row is
    /// consumed and the cursor wraps to the start of the next.
    pub fn step(&mut self) {
        if !self.has_capacity() {
            return;
        }
        self.column += 1;
        if self.column < self.bounds.w {
            return;
        }
        self.column = 0;
        self.bounds.y += 1;
        self.bounds.h -= 1;
    }

    /// True while unconsumed cells remain.
    pub fn has_capacity(&self) -> bool {
        self.bounds.h > 0 && self.bounds.w > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(x: u32, y: u32, w: u32, h: u32) -> AddressWindow {
        let mut addr = AddressWindow::new();
        addr.set_column(x, w);
        addr.set_row(y, h);
        addr
    }

    #[test]
    fn enumerates_cells_in_row_major_order() {
        let mut addr = window(2, 1, 3, 2);
        let mut visited = Vec::new();
        while addr.has_capacity() {
            visited.push((addr.pos().x, addr.pos().y));
            addr.step();
        }
        assert_eq!(visited, vec![(2, 1), (3, 1), (4, 1), (2, 2), (3, 2), (4, 2)]);
    }

    #[test]
    fn step_is_noop_once_exhausted() {
        let mut addr = window(0, 0, 2, 1);
        addr.step();
        addr.step();
        assert!(!addr.has_capacity());
        let pos = addr.pos();
        addr.step();
        assert_eq!(addr.pos(), pos);
    }

    #[test]
    fn reset_restores_initial_window() {
        let mut addr = window(5, 7, 4, 3);
        for _ in 0..9 {
            addr.step();
        }
        addr.reset();
        assert_eq!(addr.pos(), Point::new(5, 7));
        assert!(addr.has_capacity());
    }

    // Pins the corrected contract: one source revision assigned the row
    // start twice and never stored the height, silently breaking writes
    // taller than one row.
    #[test]
    fn set_row_records_height() {
        let mut addr = AddressWindow::new();
        addr.set_column(0, 2);
        addr.set_row(3, 5);
        let mut rows = 0;
        while addr.has_capacity() {
            addr.step();
            addr.step();
            rows += 1;
        }
        assert_eq!(rows, 5);
        addr.reset();
        assert_eq!(addr.pos(), Point::new(0, 3));
    }

    #[test]
    fn zero_width_window_has_no_capacity() {
        let mut addr = AddressWindow::new();
        addr.set_column(0, 0);
        addr.set_row(0, 4);
        assert!(!addr.has_capacity());
        addr.step();
        assert_eq!(addr.pos(), Point::new(0, 0));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn full_walk_visits_each_cell_exactly_once(
                x in 0u32..100,
                y in 0u32..100,
                w in 1u32..24,
                h in 1u32..24,
            ) {
                let mut addr = window(x, y, w, h);
                let mut seen = std::collections::HashSet::new();
                for _ in 0..w * h {
                    prop_assert!(addr.has_capacity());
                    let pos = addr.pos();
                    prop_assert!(Rect::new(x, y, w, h).contains(pos.x, pos.y));
                    prop_assert!(seen.insert((pos.x, pos.y)));
                    addr.step();
                }
                prop_assert!(!addr.has_capacity());
                prop_assert_eq!(seen.len() as u32, w * h);
            }
        }
    }
}
