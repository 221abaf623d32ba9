//! Damage rectangles reported by the virtual display.

use log::warn;

/// The EVDI library never reports more than this many rectangles per grab.
pub const MAX_RECTS: usize = 16;

/// A damaged region in framebuffer pixel coordinates.
///
/// The upper-left corner `(x1, y1)` is inclusive and the lower-right corner
/// `(x2, y2)` is exclusive, matching both the DRM clip rects EVDI reports and
/// the VNC server's `mark modified` convention. Layout matches `struct evdi_rect`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x1: i32,
    /// Top edge (inclusive).
    pub y1: i32,
    /// Right edge (exclusive).
    pub x2: i32,
    /// Bottom edge (exclusive).
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    /// True when the rectangle covers no pixels (including inverted corners).
    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Clip to a `width` x `height` framebuffer, or `None` if nothing remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        let clipped = Rect {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// Fixed-capacity set of damage rectangles filled by a single grab.
#[derive(Clone, Debug)]
pub struct RectSet {
    rects: [Rect; MAX_RECTS],
    len: usize,
}

impl RectSet {
    pub const fn new() -> Self {
        Self {
            rects: [Rect::new(0, 0, 0, 0); MAX_RECTS],
            len: 0,
        }
    }

    /// Storage for the device to write into. Call [`RectSet::set_reported`]
    /// afterwards with the count the device returned.
    pub fn storage_mut(&mut self) -> &mut [Rect; MAX_RECTS] {
        &mut self.rects
    }

    /// Record how many rectangles the device claims it wrote.
    ///
    /// Counts above [`MAX_RECTS`] are clamped and negative counts are treated
    /// as empty, so iteration never reads past the storage.
    pub fn set_reported(&mut self, count: i32) {
        let count = usize::try_from(count).unwrap_or(0);
        if count > MAX_RECTS {
            warn!(
                "Device reported {} damage rects, clamping to {}",
                count, MAX_RECTS
            );
        }
        self.len = count.min(MAX_RECTS);
    }

    /// Append a rectangle. Returns `false` when the set is already full.
    pub fn push(&mut self, rect: Rect) -> bool {
        if self.len == MAX_RECTS {
            return false;
        }
        self.rects[self.len] = rect;
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rect> {
        self.rects[..self.len].iter()
    }
}

impl Default for RectSet {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a RectSet {
    type Item = &'a Rect;
    type IntoIter = std::slice::Iter<'a, Rect>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
