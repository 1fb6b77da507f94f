//! Integer pixel geometry.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A point in pixel coordinates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(C)]
pub struct IPoint {
    pub x: u32,
    pub y: u32,
}

impl IPoint {
    pub const ZERO: Self = Self::new(0, 0);

    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Width and height in pixels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(C)]
pub struct ISize {
    pub width: u32,
    pub height: u32,
}

impl ISize {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Half size, rounded up. Used for 4:2:0 chroma planes.
    #[inline]
    pub fn half_rounded_up(self) -> Self {
        Self::new(self.width.div_ceil(2), self.height.div_ceil(2))
    }
}

/// Axis-aligned integer rectangle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(C)]
pub struct IRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl IRect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering `size`.
    #[inline]
    pub const fn from_size(size: ISize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[inline]
    pub fn origin(self) -> IPoint {
        IPoint::new(self.x, self.y)
    }

    #[inline]
    pub fn size(self) -> ISize {
        ISize::new(self.width, self.height)
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(self) -> u64 {
        self.y as u64 + self.height as u64
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size().is_empty()
    }

    /// Check if `other` lies entirely inside this rectangle.
    pub fn contains_rect(self, other: Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Compute intersection with another rectangle.
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if (x1 as u64) < x2 && (y1 as u64) < y2 {
            Some(Self::new(x1, y1, (x2 - x1 as u64) as u32, (y2 - y1 as u64) as u32))
        } else {
            None
        }
    }

    /// Translate the rectangle to a new origin, keeping its size.
    #[inline]
    pub fn with_origin(self, origin: IPoint) -> Self {
        Self::new(origin.x, origin.y, self.width, self.height)
    }
}
