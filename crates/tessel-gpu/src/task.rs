//! Units of GPU work.
//!
//! Recorders and the readback pipeline express everything they want the
//! device to do as a list of [`Task`]s. A task holds proxies of every resource
//! it touches, which keeps those resources alive and unpurgeable until the
//! submission carrying the task has finished.

use std::sync::Arc;

use tessel_core::{Color, ColorInfo, IPoint, IRect};

use crate::resource::{BufferProxy, TextureProxy};

/// Texture sampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Collapse a color into one channel: `v = dot(weights, rgba) + bias`.
///
/// Used to draw a single Y, U, V or A plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneTransform {
    pub weights: [f32; 4],
    pub bias: f32,
}

impl PlaneTransform {
    pub fn from_row(row: [f32; 4]) -> Self {
        Self {
            weights: [row[0], row[1], row[2], 0.0],
            bias: row[3],
        }
    }

    pub const ALPHA: Self = Self {
        weights: [0.0, 0.0, 0.0, 1.0],
        bias: 0.0,
    };

    pub fn apply(&self, c: [f32; 4]) -> f32 {
        self.weights[0] * c[0] + self.weights[1] * c[1] + self.weights[2] * c[2] + self.weights[3] * c[3] + self.bias
    }
}

/// Draw `src_rect` of `src` stretched over the whole of `dst`, converting
/// between the two color descriptions on the way.
#[derive(Debug, Clone)]
pub struct ResampleTask {
    pub src: TextureProxy,
    pub src_rect: IRect,
    pub src_color: ColorInfo,
    pub dst: TextureProxy,
    pub dst_color: ColorInfo,
    pub filter: FilterMode,
    /// Filter in linear light instead of the source encoding.
    pub linear_blend: bool,
    /// Write one plane value into every channel instead of a color.
    pub plane: Option<PlaneTransform>,
}

/// One unit of GPU work.
#[derive(Debug, Clone)]
pub enum Task {
    /// Fill the whole target. `color` is already in the target's alpha type.
    Clear { target: TextureProxy, color: Color },
    /// Fill `rect` of the target. `color` is already in the target's alpha type.
    FillRect {
        target: TextureProxy,
        rect: IRect,
        color: Color,
    },
    /// Write CPU pixels, already in the target's color type, into `rect`.
    Upload {
        target: TextureProxy,
        rect: IRect,
        data: Arc<[u8]>,
        row_bytes: usize,
    },
    CopyTexture {
        src: TextureProxy,
        src_rect: IRect,
        dst: TextureProxy,
        dst_point: IPoint,
    },
    Resample(ResampleTask),
    /// Copy `src_rect` into a transfer buffer with `row_bytes` stride.
    CopyTextureToBuffer {
        src: TextureProxy,
        src_rect: IRect,
        dst: BufferProxy,
        row_bytes: usize,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "clear",
            Self::FillRect { .. } => "fill_rect",
            Self::Upload { .. } => "upload",
            Self::CopyTexture { .. } => "copy_texture",
            Self::Resample(_) => "resample",
            Self::CopyTextureToBuffer { .. } => "copy_texture_to_buffer",
        }
    }
}
