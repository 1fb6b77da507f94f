//! Tessel Core - foundation types for the Tessel GPU context
//!
//! This crate provides the types shared by every layer of the GPU context:
//! - Error taxonomy (TesselError, Result)
//! - Integer pixel geometry (IPoint, ISize, IRect)
//! - Pixel layouts and CPU conversion (ColorType, AlphaType, ImageInfo)
//! - Color spaces and YUV matrices

pub mod color;
pub mod error;
pub mod geometry;
pub mod pixel;

pub use color::{Color, ColorSpace, ColorSpaceXform, TransferFunction, YuvColorSpace};
pub use error::{Result, TesselError};
pub use geometry::{IPoint, IRect, ISize};
pub use pixel::{align_to, convert_pixels, AlphaType, ColorInfo, ColorType, ImageInfo};

/// Default memory budgets.
pub mod memory_budget {
    /// Default GPU resource cache budget.
    pub const GPU_CACHE_BUDGET: usize = 256 * 1024 * 1024; // 256 MB

    /// Default upper bound on a single transfer buffer.
    pub const MAX_TRANSFER_BUFFER: u64 = 256 * 1024 * 1024; // 256 MB
}
