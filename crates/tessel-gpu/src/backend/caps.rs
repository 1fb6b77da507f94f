//! Device capabilities.

use serde::{Deserialize, Serialize};
use tessel_core::{align_to, memory_budget, ColorType};

/// Immutable capabilities of one device connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caps {
    /// Largest texture edge in pixels.
    pub max_texture_size: u32,
    pub supports_protected_content: bool,
    /// Row stride alignment required for texture-to-buffer transfers.
    pub buffer_row_alignment: u32,
    pub max_buffer_size: u64,
    /// Color types a texture can be transferred out of.
    pub readable_color_types: Vec<ColorType>,
    /// Color types a texture can be rendered into.
    pub renderable_color_types: Vec<ColorType>,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            supports_protected_content: false,
            buffer_row_alignment: 4,
            max_buffer_size: memory_budget::MAX_TRANSFER_BUFFER,
            readable_color_types: ColorType::ALL.to_vec(),
            renderable_color_types: ColorType::ALL.to_vec(),
        }
    }
}

impl Caps {
    pub fn is_readable(&self, color_type: ColorType) -> bool {
        self.readable_color_types.contains(&color_type)
    }

    pub fn is_renderable(&self, color_type: ColorType) -> bool {
        self.renderable_color_types.contains(&color_type)
    }

    /// Row stride of a transfer buffer holding `width` pixels of `color_type`.
    pub fn aligned_row_bytes(&self, width: u32, color_type: ColorType) -> usize {
        let tight = width as usize * color_type.bytes_per_pixel();
        align_to(tight, self.buffer_row_alignment.max(1) as usize)
    }
}
