//! Color types, color spaces and YUV matrices.
#![allow(clippy::excessive_precision)]

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// RGBA color with 32-bit float components, unpremultiplied.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Create a new color from RGBA components.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create a color from RGB with alpha = 1.0.
    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn from_array(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }

    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);
}

/// Premultiply an RGBA quadruple.
#[inline]
pub fn premultiply(c: [f32; 4]) -> [f32; 4] {
    [c[0] * c[3], c[1] * c[3], c[2] * c[3], c[3]]
}

/// Undo premultiplication. Fully transparent pixels become transparent black.
#[inline]
pub fn unpremultiply(c: [f32; 4]) -> [f32; 4] {
    if c[3] <= 0.0 {
        return [0.0; 4];
    }
    let inv = 1.0 / c[3];
    [c[0] * inv, c[1] * inv, c[2] * inv, c[3]]
}

/// Transfer function (gamma/OETF/EOTF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferFunction {
    /// Linear (gamma 1.0)
    Linear,
    /// sRGB transfer function
    #[default]
    Srgb,
}

impl TransferFunction {
    /// Apply the transfer function (linear to encoded).
    pub fn apply(self, linear: f32) -> f32 {
        match self {
            Self::Linear => linear,
            Self::Srgb => {
                let sign = linear.signum();
                let v = linear.abs();
                if v <= 0.0031308 {
                    sign * v * 12.92
                } else {
                    sign * (1.055 * v.powf(1.0 / 2.4) - 0.055)
                }
            }
        }
    }

    /// Invert the transfer function (encoded to linear).
    pub fn invert(self, encoded: f32) -> f32 {
        match self {
            Self::Linear => encoded,
            Self::Srgb => {
                let sign = encoded.signum();
                let v = encoded.abs();
                if v <= 0.04045 {
                    sign * v / 12.92
                } else {
                    sign * ((v + 0.055) / 1.055).powf(2.4)
                }
            }
        }
    }

    /// Shader-side tag for this curve.
    pub fn shader_tag(self) -> u32 {
        match self {
            Self::Linear => 0,
            Self::Srgb => 1,
        }
    }
}

/// Color spaces an image or readback destination can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ColorSpace {
    /// sRGB primaries, sRGB curve.
    #[default]
    Srgb,
    /// sRGB primaries, linear light.
    SrgbLinear,
    /// Display P3 primaries, sRGB curve.
    DisplayP3,
}

impl ColorSpace {
    pub fn transfer_function(self) -> TransferFunction {
        match self {
            Self::Srgb | Self::DisplayP3 => TransferFunction::Srgb,
            Self::SrgbLinear => TransferFunction::Linear,
        }
    }

    /// RGB-to-XYZ (D65) matrix for this space's primaries.
    pub fn to_xyz(self) -> Mat3 {
        // Rows as printed; glam is column-major so build from the transpose.
        let rows = match self {
            Self::Srgb | Self::SrgbLinear => [
                [0.4124564, 0.3575761, 0.1804375],
                [0.2126729, 0.7151522, 0.0721750],
                [0.0193339, 0.1191920, 0.9503041],
            ],
            Self::DisplayP3 => [
                [0.4865709, 0.2656677, 0.1982173],
                [0.2289746, 0.6917385, 0.0792869],
                [0.0000000, 0.0451134, 1.0439444],
            ],
        };
        Mat3::from_cols_array_2d(&rows).transpose()
    }

    /// Whether both spaces share primaries.
    pub fn same_gamut(self, other: Self) -> bool {
        let gamut = |cs: Self| match cs {
            Self::Srgb | Self::SrgbLinear => 0,
            Self::DisplayP3 => 1,
        };
        gamut(self) == gamut(other)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Srgb => "sRGB",
            Self::SrgbLinear => "sRGB (linear)",
            Self::DisplayP3 => "Display P3",
        }
    }
}

/// Converts unpremultiplied colors from one color space to another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSpaceXform {
    src_tf: TransferFunction,
    dst_tf: TransferFunction,
    gamut: Option<Mat3>,
}

impl ColorSpaceXform {
    pub fn new(src: ColorSpace, dst: ColorSpace) -> Self {
        let gamut = if src.same_gamut(dst) {
            None
        } else {
            Some(dst.to_xyz().inverse() * src.to_xyz())
        };
        Self {
            src_tf: src.transfer_function(),
            dst_tf: dst.transfer_function(),
            gamut,
        }
    }

    /// Xform whose source is already linear light (e.g. after linear filtering).
    pub fn from_linear(src: ColorSpace, dst: ColorSpace) -> Self {
        Self {
            src_tf: TransferFunction::Linear,
            ..Self::new(src, dst)
        }
    }

    pub fn is_identity(&self) -> bool {
        self.src_tf == self.dst_tf && self.gamut.is_none()
    }

    /// Row-major 3x3 gamut matrix, identity if primaries match.
    pub fn gamut_rows(&self) -> [[f32; 3]; 3] {
        let m = self.gamut.unwrap_or(Mat3::IDENTITY).transpose();
        m.to_cols_array_2d()
    }

    pub fn dst_transfer(&self) -> TransferFunction {
        self.dst_tf
    }

    /// Apply to an unpremultiplied color; alpha passes through.
    pub fn apply(&self, c: [f32; 4]) -> [f32; 4] {
        if self.is_identity() {
            return c;
        }
        let mut rgb = Vec3::new(
            self.src_tf.invert(c[0]),
            self.src_tf.invert(c[1]),
            self.src_tf.invert(c[2]),
        );
        if let Some(m) = self.gamut {
            rgb = m * rgb;
        }
        [
            self.dst_tf.apply(rgb.x),
            self.dst_tf.apply(rgb.y),
            self.dst_tf.apply(rgb.z),
            c[3],
        ]
    }
}

/// RGB to YCbCr conversion standards for planar readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum YuvColorSpace {
    /// BT.601 full range.
    Jpeg,
    /// BT.601 limited range.
    #[default]
    Rec601,
    /// BT.709 limited range.
    Rec709,
    /// BT.709 full range.
    Rec709Full,
    /// BT.2020 limited range.
    Bt2020,
    /// Y = G, U = B, V = R.
    Identity,
}

impl YuvColorSpace {
    fn coefficients(self) -> Option<(f32, f32, bool)> {
        // (Kr, Kb, limited range)
        match self {
            Self::Jpeg => Some((0.299, 0.114, false)),
            Self::Rec601 => Some((0.299, 0.114, true)),
            Self::Rec709 => Some((0.2126, 0.0722, true)),
            Self::Rec709Full => Some((0.2126, 0.0722, false)),
            Self::Bt2020 => Some((0.2627, 0.0593, true)),
            Self::Identity => None,
        }
    }

    /// Rows for Y, U and V: `[wr, wg, wb, bias]` applied to encoded RGB.
    pub fn rgb_to_yuv_rows(self) -> [[f32; 4]; 3] {
        let Some((kr, kb, limited)) = self.coefficients() else {
            return [
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
            ];
        };
        let kg = 1.0 - kr - kb;
        let cb = [-kr / (2.0 * (1.0 - kb)), -kg / (2.0 * (1.0 - kb)), 0.5];
        let cr = [0.5, -kg / (2.0 * (1.0 - kr)), -kb / (2.0 * (1.0 - kr))];

        let (y_scale, y_bias, c_scale) = if limited {
            (219.0 / 255.0, 16.0 / 255.0, 224.0 / 255.0)
        } else {
            (1.0, 0.0, 1.0)
        };
        let c_bias = 128.0 / 255.0;

        [
            [kr * y_scale, kg * y_scale, kb * y_scale, y_bias],
            [cb[0] * c_scale, cb[1] * c_scale, cb[2] * c_scale, c_bias],
            [cr[0] * c_scale, cr[1] * c_scale, cr[2] * c_scale, c_bias],
        ]
    }
}
