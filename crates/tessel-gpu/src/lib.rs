//! Tessel GPU - device-level context orchestration
//!
//! A [`Context`] owns one device connection. Work is recorded on
//! [`Recorder`]s, snapped into [`Recording`]s, inserted into the context and
//! submitted. Completion callbacks and asynchronous pixel readbacks are
//! delivered when the context is polled.
//!
//! Two backends are provided: [`HeadlessBackend`] emulates a device on the
//! CPU and [`WgpuBackend`] drives real hardware through wgpu.

pub mod backend;
pub mod context;
pub mod context_id;
pub mod mapped_buffer;
pub mod memory_dump;
pub mod options;
pub mod queue;
pub mod readback;
pub mod recorder;
pub mod recording;
pub mod resource;
pub mod resource_cache;
pub mod shared_context;
pub mod single_owner;
pub mod task;
pub mod texture;

pub use backend::{
    Backend, BackendApi, Caps, HeadlessBackend, HeadlessOptions, TextureInfo, TextureUsage, WgpuBackend,
    WgpuOptions,
};
pub use context::{Context, SyncToCpu};
pub use context_id::{ContextId, DeviceId, RecorderId};
pub use memory_dump::{MemoryDump, MemoryDumpEntry};
pub use options::{ContextOptions, RecorderOptions};
pub use readback::{AsyncReadResult, ReadPlane, ReadbackSource, RescaleGamma, RescaleMode};
pub use recorder::Recorder;
pub use recording::{CallbackResult, FinishedProc, InsertRecordingInfo, Recording};
pub use texture::{BackendTexture, Image, Surface};

pub use tessel_core;
