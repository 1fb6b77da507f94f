//! Pixel layouts and CPU-side pixel conversion.
//!
//! These are the formats textures, transfer buffers and readback results are
//! described in. Conversion helpers here back both the headless backend and
//! the readback pipeline's transfer-time conversion step.

use serde::{Deserialize, Serialize};

use crate::color::{premultiply, unpremultiply, ColorSpace};
use crate::error::{Result, TesselError};
use crate::geometry::{IRect, ISize};

/// Pixel color type (memory layout of one pixel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorType {
    /// 8-bit RGBA (32 bits per pixel)
    #[default]
    Rgba8888,
    /// 8-bit BGRA (32 bits per pixel)
    Bgra8888,
    /// 8-bit alpha only
    Alpha8,
    /// 8-bit grayscale
    Gray8,
    /// 32-bit RGBA float (128 bits per pixel)
    RgbaF32,
}

impl ColorType {
    pub const ALL: [ColorType; 5] = [
        Self::Rgba8888,
        Self::Bgra8888,
        Self::Alpha8,
        Self::Gray8,
        Self::RgbaF32,
    ];

    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 | Self::Bgra8888 => 4,
            Self::Alpha8 | Self::Gray8 => 1,
            Self::RgbaF32 => 16,
        }
    }

    /// Decode one pixel to RGBA floats (in whatever alpha type the data uses).
    pub fn load(self, px: &[u8]) -> [f32; 4] {
        let unorm = |v: u8| v as f32 / 255.0;
        match self {
            Self::Rgba8888 => [unorm(px[0]), unorm(px[1]), unorm(px[2]), unorm(px[3])],
            Self::Bgra8888 => [unorm(px[2]), unorm(px[1]), unorm(px[0]), unorm(px[3])],
            Self::Alpha8 => [0.0, 0.0, 0.0, unorm(px[0])],
            Self::Gray8 => {
                let g = unorm(px[0]);
                [g, g, g, 1.0]
            }
            Self::RgbaF32 => bytemuck::pod_read_unaligned::<[f32; 4]>(&px[..16]),
        }
    }

    /// Encode RGBA floats into one pixel.
    pub fn store(self, c: [f32; 4], out: &mut [u8]) {
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        match self {
            Self::Rgba8888 => {
                out[0] = unorm(c[0]);
                out[1] = unorm(c[1]);
                out[2] = unorm(c[2]);
                out[3] = unorm(c[3]);
            }
            Self::Bgra8888 => {
                out[0] = unorm(c[2]);
                out[1] = unorm(c[1]);
                out[2] = unorm(c[0]);
                out[3] = unorm(c[3]);
            }
            Self::Alpha8 => out[0] = unorm(c[3]),
            Self::Gray8 => out[0] = unorm(luminance(c)),
            Self::RgbaF32 => out[..16].copy_from_slice(bytemuck::cast_slice::<f32, u8>(c.as_slice())),
        }
    }

    /// Shader-side channel layout tag: 0 = rgba, 1 = alpha in red, 2 = gray in red.
    pub fn shader_swizzle(self) -> u32 {
        match self {
            Self::Rgba8888 | Self::Bgra8888 | Self::RgbaF32 => 0,
            Self::Alpha8 => 1,
            Self::Gray8 => 2,
        }
    }
}

/// Rec. 709 luma of an RGB color.
#[inline]
pub fn luminance(c: [f32; 4]) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

/// How the alpha channel relates to the color channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlphaType {
    /// Alpha is always 1.
    Opaque,
    /// Color channels are multiplied by alpha.
    #[default]
    Premul,
    /// Color channels are independent of alpha.
    Unpremul,
}

impl AlphaType {
    /// Bring a loaded pixel into premultiplied form.
    pub fn to_premul(self, c: [f32; 4]) -> [f32; 4] {
        match self {
            Self::Opaque => [c[0], c[1], c[2], 1.0],
            Self::Premul => c,
            Self::Unpremul => premultiply(c),
        }
    }

    /// Bring a premultiplied pixel into this alpha type.
    pub fn from_premul(self, c: [f32; 4]) -> [f32; 4] {
        match self {
            Self::Opaque => {
                let u = unpremultiply(c);
                [u[0], u[1], u[2], 1.0]
            }
            Self::Premul => c,
            Self::Unpremul => unpremultiply(c),
        }
    }

    /// Data in `self` can be handed out as `dst` without touching color values.
    pub fn is_compatible_with(self, dst: AlphaType) -> bool {
        self == dst || self == Self::Opaque
    }

    pub fn shader_tag(self) -> u32 {
        match self {
            Self::Opaque => 0,
            Self::Premul => 1,
            Self::Unpremul => 2,
        }
    }
}

/// Color type, alpha type and color space of some pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ColorInfo {
    pub color_type: ColorType,
    pub alpha_type: AlphaType,
    pub color_space: ColorSpace,
}

impl ColorInfo {
    pub const fn new(color_type: ColorType, alpha_type: AlphaType, color_space: ColorSpace) -> Self {
        Self {
            color_type,
            alpha_type,
            color_space,
        }
    }

    pub fn with_color_type(self, color_type: ColorType) -> Self {
        Self { color_type, ..self }
    }

    pub fn with_alpha_type(self, alpha_type: AlphaType) -> Self {
        Self { alpha_type, ..self }
    }
}

/// Dimensions plus color information of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub color: ColorInfo,
}

impl ImageInfo {
    pub fn new(
        width: u32,
        height: u32,
        color_type: ColorType,
        alpha_type: AlphaType,
        color_space: ColorSpace,
    ) -> Self {
        Self {
            width,
            height,
            color: ColorInfo::new(color_type, alpha_type, color_space),
        }
    }

    /// 8-bit RGBA, premultiplied, sRGB.
    pub fn rgba8_premul(width: u32, height: u32) -> Self {
        Self::new(width, height, ColorType::Rgba8888, AlphaType::Premul, ColorSpace::Srgb)
    }

    #[inline]
    pub fn dimensions(&self) -> ISize {
        ISize::new(self.width, self.height)
    }

    #[inline]
    pub fn bounds(&self) -> IRect {
        IRect::from_size(self.dimensions())
    }

    #[inline]
    pub fn color_type(&self) -> ColorType {
        self.color.color_type
    }

    #[inline]
    pub fn alpha_type(&self) -> AlphaType {
        self.color.alpha_type
    }

    #[inline]
    pub fn color_space(&self) -> ColorSpace {
        self.color.color_space
    }

    pub fn with_color_type(self, color_type: ColorType) -> Self {
        Self {
            color: self.color.with_color_type(color_type),
            ..self
        }
    }

    pub fn with_alpha_type(self, alpha_type: AlphaType) -> Self {
        Self {
            color: self.color.with_alpha_type(alpha_type),
            ..self
        }
    }

    /// Tightly packed row size.
    pub fn min_row_bytes(&self) -> usize {
        self.width as usize * self.color_type().bytes_per_pixel()
    }

    /// Bytes needed to hold the image with the given row stride.
    pub fn compute_byte_size(&self, row_bytes: usize) -> usize {
        if self.height == 0 {
            return 0;
        }
        row_bytes * (self.height as usize - 1) + self.min_row_bytes()
    }

    /// Check that `pixels` with `row_bytes` stride can hold this image.
    pub fn validate_pixels(&self, pixels: &[u8], row_bytes: usize) -> Result<()> {
        if self.dimensions().is_empty() {
            return Err(TesselError::InvalidArgument(format!(
                "image dimensions {}x{} are empty",
                self.width, self.height
            )));
        }
        if row_bytes < self.min_row_bytes() {
            return Err(TesselError::InvalidArgument(format!(
                "row bytes {} smaller than minimum {}",
                row_bytes,
                self.min_row_bytes()
            )));
        }
        if pixels.len() < self.compute_byte_size(row_bytes) {
            return Err(TesselError::InvalidArgument(format!(
                "pixel buffer of {} bytes too small for {}x{} image",
                pixels.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Round `value` up to a multiple of `alignment` (which must be non-zero).
#[inline]
pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Convert a block of pixels between color types, keeping alpha type and color space.
///
/// Rows are read with `src_row_bytes` stride and written with `dst_row_bytes`.
#[allow(clippy::too_many_arguments)]
pub fn convert_pixels(
    size: ISize,
    src_type: ColorType,
    src: &[u8],
    src_row_bytes: usize,
    dst_type: ColorType,
    dst: &mut [u8],
    dst_row_bytes: usize,
) {
    let src_bpp = src_type.bytes_per_pixel();
    let dst_bpp = dst_type.bytes_per_pixel();
    for y in 0..size.height as usize {
        let src_row = &src[y * src_row_bytes..];
        let dst_row = &mut dst[y * dst_row_bytes..];
        if src_type == dst_type {
            let n = size.width as usize * src_bpp;
            dst_row[..n].copy_from_slice(&src_row[..n]);
            continue;
        }
        for x in 0..size.width as usize {
            let c = src_type.load(&src_row[x * src_bpp..]);
            dst_type.store(c, &mut dst_row[x * dst_bpp..]);
        }
    }
}
