use super::Size;

/// Axis-aligned rectangle in physical pixels (top-left origin).
///
/// Used for the render viewport inside the window and for the per-pass
/// viewport handed to compositors.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl RenderRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle at the origin covering `size`.
    #[inline]
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[inline]
    pub const fn size(self) -> Size {
        Size::new(self.width, self.height)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Left half of a side-by-side stereo layout, moved to the origin.
    #[inline]
    pub const fn half_width_at_origin(self) -> Self {
        Self::new(0, 0, self.width / 2, self.height)
    }

    /// Clamps the rectangle to `[0, bounds)`, returning `None` when nothing
    /// of it remains visible.
    pub fn clamp_to(self, bounds: Size) -> Option<Self> {
        let x0 = i64::from(self.x).max(0);
        let y0 = i64::from(self.y).max(0);
        let x1 = (i64::from(self.x) + i64::from(self.width)).min(i64::from(bounds.width));
        let y1 = (i64::from(self.y) + i64::from(self.height)).min(i64::from(bounds.height));

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
