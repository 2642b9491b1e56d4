use crate::{Region, page_size};

/// A pure geometric `[ofs, ofs+size)` range in bytes, used to work out where
/// a [`Region`] should be placed before it is actually mapped.
///
/// All operations are pure; a `Window` never touches the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub ofs: usize,
    pub size: usize,
}

impl Window {
    #[inline]
    pub fn new(ofs: usize, size: usize) -> Self {
        Self { ofs, size }
    }

    /// Window spanning exactly the range currently mapped by `region`.
    #[inline]
    pub fn from_region(region: &Region) -> Self {
        Self::new(region.ofs_begin(), region.size())
    }

    #[inline]
    pub fn ofs_end(&self) -> usize {
        self.ofs + self.size
    }

    /// Grows `self.ofs` downward to meet `left.ofs_end()`, without letting the
    /// window's final size exceed `max_size`. The range originally covered by
    /// `self` always remains covered. No-op if `self` already starts at or
    /// before `left.ofs_end()`.
    pub fn extend_left_to(&mut self, left: Window, max_size: usize) {
        if self.ofs <= left.ofs_end() {
            return;
        }
        let end = self.ofs_end();
        let new_ofs = left.ofs_end().max(end.saturating_sub(max_size));
        self.ofs = new_ofs;
        self.size = end - new_ofs;
    }

    /// Grows `self.size` upward to meet `right.ofs`, without letting the
    /// window's final size exceed `max_size`. Symmetric to
    /// [`Window::extend_left_to`].
    pub fn extend_right_to(&mut self, right: Window, max_size: usize) {
        let end = self.ofs_end();
        if end >= right.ofs {
            return;
        }
        let new_end = right.ofs.min(self.ofs + max_size);
        self.size = new_end - self.ofs;
    }

    /// Rounds `ofs` down and `size` up to a multiple of the system page size.
    /// Idempotent.
    pub fn align(&mut self) {
        let page = page_size();
        let end = self.ofs_end();
        let new_ofs = self.ofs & !(page - 1);
        let new_end = end.div_ceil(page) * page;
        self.ofs = new_ofs;
        self.size = new_end - new_ofs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_left_no_op_when_already_covered() {
        let left = Window::new(0, 1);
        let mut center = Window::new(1, 1);
        center.extend_left_to(left, 100);
        assert_eq!(center, Window::new(1, 1));
    }

    #[test]
    fn extend_right_no_op_when_already_covered() {
        let mut left = Window::new(0, 1);
        let center = Window::new(1, 1);
        left.extend_right_to(center, 100);
        assert_eq!(left, Window::new(0, 1));
    }

    #[test]
    fn extend_left_actual() {
        let center = Window::new(1, 1);
        let mut center2 = Window::new(10, 5);
        let end_before = center2.ofs_end();
        center2.extend_left_to(center, 100);
        assert_eq!(center2.ofs, center.ofs_end());
        assert_eq!(center2.ofs_end(), end_before);
    }

    #[test]
    fn extend_right_respects_max_size() {
        let mut center = Window::new(1, 1);
        let right = Window::new(8000, 50);
        center.extend_right_to(right, 100);
        assert_eq!(center, Window::new(1, 100));
        center.extend_right_to(right, 100);
        assert_eq!(center, Window::new(1, 100));
    }

    #[test]
    fn extend_right_unbounded_reaches_neighbour() {
        let mut center = Window::new(1, 100);
        let right = Window::new(8000, 50);
        center.extend_right_to(right, usize::MAX);
        assert_eq!(center.ofs_end(), right.ofs);
        assert_eq!(center.ofs, 1);
    }

    #[test]
    fn extend_left_unbounded_reaches_neighbour() {
        let center2 = Window::new(2, 13);
        let mut right = Window::new(8000, 50);
        right.extend_left_to(center2, 100);
        assert_eq!(right.size, 100);
        right.extend_left_to(center2, usize::MAX);
        assert_eq!(right.ofs, center2.ofs_end());
    }

    #[test]
    fn align_rounds_to_page_multiples() {
        let mut w = Window::new(1, 7999);
        w.align();
        let page = page_size();
        assert_eq!(w.ofs, 0);
        assert_eq!(w.size, page * 2);
    }

    #[test]
    fn align_is_idempotent() {
        let mut w = Window::new(123, 5000);
        w.align();
        let aligned = w;
        w.align();
        assert_eq!(w, aligned);
    }
}
