//! Device connection abstraction.
//!
//! A [`Backend`] owns the native device. It creates and destroys textures and
//! buffers, executes submitted task lists in order, reports how far the device
//! has progressed, and maps transfer buffers for CPU reads. Everything above
//! this trait is backend-agnostic.

pub mod caps;
pub mod headless;
pub mod webgpu;

pub use caps::Caps;
pub use headless::{HeadlessBackend, HeadlessOptions};
pub use webgpu::{WgpuBackend, WgpuOptions};

use serde::{Deserialize, Serialize};
use tessel_core::{ColorType, Result};

use crate::task::Task;

/// Which native API a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendApi {
    /// CPU emulation, no device required.
    Headless,
    Wgpu,
}

/// Monotonic id of one backend submission. `SubmissionId::NONE` precedes all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionId(pub u64);

impl SubmissionId {
    pub const NONE: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Backend handle of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Backend handle of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// What a texture may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureUsage {
    pub sampled: bool,
    pub render_target: bool,
    pub copy_src: bool,
    pub copy_dst: bool,
}

impl TextureUsage {
    /// Sampled, renderable and copyable in both directions.
    pub const ALL: Self = Self {
        sampled: true,
        render_target: true,
        copy_src: true,
        copy_dst: true,
    };
}

/// Creation parameters of a texture. Doubles as its cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub color_type: ColorType,
    pub usage: TextureUsage,
    pub protected: bool,
}

impl TextureInfo {
    pub fn new(width: u32, height: u32, color_type: ColorType) -> Self {
        Self {
            width,
            height,
            color_type,
            usage: TextureUsage::ALL,
            protected: false,
        }
    }

    /// Backing store size.
    pub fn bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.color_type.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// GPU writes, CPU maps for reading.
    TransferRead,
}

/// Creation parameters of a buffer. Doubles as its cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn transfer_read(size: u64) -> Self {
        Self {
            size,
            usage: BufferUsage::TransferRead,
        }
    }
}

/// CPU mapping progress of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Unmapped,
    /// Map requested, device has not confirmed yet.
    Pending,
    Mapped,
    Failed,
}

/// A device connection.
///
/// Implementations are shared between a context and its recorders, so all
/// methods take `&self` and synchronize internally.
pub trait Backend: Send + Sync {
    fn api(&self) -> BackendApi;

    fn caps(&self) -> Caps;

    /// One-time setup that may fail after the device has been opened.
    fn finish_initialization(&self) -> Result<()>;

    fn create_texture(&self, info: &TextureInfo, label: &str) -> Result<TextureId>;

    fn destroy_texture(&self, id: TextureId);

    fn create_buffer(&self, desc: &BufferDesc, label: &str) -> Result<BufferId>;

    fn destroy_buffer(&self, id: BufferId);

    /// Execute `tasks` in order as one submission.
    fn submit(&self, tasks: &[Task]) -> Result<SubmissionId>;

    /// Advance completion tracking and return the highest submission known
    /// to be finished. With `wait` set, block until all submitted work is done.
    fn poll(&self, wait: bool) -> Result<SubmissionId>;

    /// Request a CPU read mapping. Progress is observed through [`Backend::map_state`].
    fn map_async(&self, buffer: BufferId) -> Result<()>;

    fn map_state(&self, buffer: BufferId) -> MapState;

    /// Hand the mapped contents of `buffers` to `reader`, in order.
    ///
    /// The slices are only valid for the duration of the call.
    fn read_mapped(&self, buffers: &[BufferId], reader: &mut dyn FnMut(&[&[u8]])) -> Result<()>;

    fn unmap(&self, buffer: BufferId);

    fn is_device_lost(&self) -> bool;
}
