//! CPU emulation of a device.
//!
//! Textures and buffers live in host memory and tasks run on the calling
//! thread at submit time. Completion is reported after a configurable number
//! of polls so asynchronous code paths behave as they do on real hardware.
//! Device loss, initialization failure and map failure can be injected.

mod raster;

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessel_core::{IRect, Result, TesselError};
use tracing::{debug, trace};

use super::{
    Backend, BackendApi, BufferDesc, BufferId, Caps, MapState, SubmissionId, TextureId, TextureInfo,
};
use crate::task::Task;

/// Configuration of a [`HeadlessBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessOptions {
    pub caps: Caps,
    /// Polls needed before a submission reports completion. Zero completes at submit.
    pub completion_latency: u32,
    /// Make one-time initialization fail.
    pub fail_initialization: bool,
    /// Make every buffer map request fail.
    pub fail_buffer_maps: bool,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            caps: Caps::default(),
            completion_latency: 1,
            fail_initialization: false,
            fail_buffer_maps: false,
        }
    }
}

struct HeadlessTexture {
    info: TextureInfo,
    data: Vec<u8>,
}

struct HeadlessBuffer {
    data: Vec<u8>,
    map_state: MapState,
}

struct PendingSubmission {
    id: SubmissionId,
    remaining_polls: u32,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    textures: HashMap<TextureId, HeadlessTexture>,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    pending: VecDeque<PendingSubmission>,
    last_submitted: SubmissionId,
    completed: SubmissionId,
    device_lost: bool,
}

impl HeadlessState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn texture(&self, id: TextureId) -> Result<&HeadlessTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| TesselError::Gpu(format!("unknown texture {}", id.0)))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut HeadlessTexture> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| TesselError::Gpu(format!("unknown texture {}", id.0)))
    }

    fn execute(&mut self, task: &Task) -> Result<()> {
        trace!(task = task.name(), "headless execute");
        match task {
            Task::Clear { target, color } => {
                let tex = self.texture_mut(target.id())?;
                let bounds = IRect::new(0, 0, tex.info.width, tex.info.height);
                raster::fill(&mut tex.data, &tex.info, bounds, color.to_array());
            }
            Task::FillRect { target, rect, color } => {
                let tex = self.texture_mut(target.id())?;
                raster::fill(&mut tex.data, &tex.info, *rect, color.to_array());
            }
            Task::Upload {
                target,
                rect,
                data,
                row_bytes,
            } => {
                let tex = self.texture_mut(target.id())?;
                raster::write_rows(&mut tex.data, &tex.info, rect.origin(), data, *row_bytes, rect.size());
            }
            Task::CopyTexture {
                src,
                src_rect,
                dst,
                dst_point,
            } => {
                let src = self.texture(src.id())?;
                let row_bytes = src_rect.width as usize * src.info.color_type.bytes_per_pixel();
                let mut rows = vec![0u8; row_bytes * src_rect.height as usize];
                raster::read_rows(&src.data, &src.info, *src_rect, &mut rows, row_bytes);
                let dst = self.texture_mut(dst.id())?;
                raster::write_rows(&mut dst.data, &dst.info, *dst_point, &rows, row_bytes, src_rect.size());
            }
            Task::Resample(resample) => {
                let src = self.texture(resample.src.id())?;
                let (src_info, src_data) = (src.info, src.data.clone());
                let dst = self.texture_mut(resample.dst.id())?;
                raster::resample(&src_data, &src_info, resample, &mut dst.data, &dst.info);
            }
            Task::CopyTextureToBuffer {
                src,
                src_rect,
                dst,
                row_bytes,
            } => {
                if src_rect.is_empty() {
                    return Ok(());
                }
                let src = self.texture(src.id())?;
                let (src_info, src_data) = (src.info, src.data.clone());
                let buffer = self
                    .buffers
                    .get_mut(&dst.id())
                    .ok_or_else(|| TesselError::Gpu(format!("unknown buffer {}", dst.id().0)))?;
                let needed = *row_bytes * (src_rect.height as usize - 1)
                    + src_rect.width as usize * src_info.color_type.bytes_per_pixel();
                if buffer.data.len() < needed {
                    return Err(TesselError::Gpu(format!(
                        "buffer of {} bytes too small for {needed}",
                        buffer.data.len()
                    )));
                }
                raster::read_rows(&src_data, &src_info, *src_rect, &mut buffer.data, *row_bytes);
            }
        }
        Ok(())
    }
}

/// Device emulated on the CPU.
pub struct HeadlessBackend {
    options: HeadlessOptions,
    state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    pub fn new(options: HeadlessOptions) -> Self {
        Self {
            options,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    pub fn options(&self) -> &HeadlessOptions {
        &self.options
    }

    /// Simulate an unrecoverable device failure.
    pub fn lose_device(&self) {
        let mut state = self.state.lock();
        state.device_lost = true;
        state.pending.clear();
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn has_texture(&self, id: TextureId) -> bool {
        self.state.lock().textures.contains_key(&id)
    }

    /// Copy of a texture's pixels, tightly packed.
    pub fn texture_pixels(&self, id: TextureId) -> Option<Vec<u8>> {
        self.state.lock().textures.get(&id).map(|t| t.data.clone())
    }

    /// Number of submissions made so far.
    pub fn submission_count(&self) -> u64 {
        self.state.lock().last_submitted.0
    }

    fn check_alive(state: &HeadlessState) -> Result<()> {
        if state.device_lost {
            Err(TesselError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl Backend for HeadlessBackend {
    fn api(&self) -> BackendApi {
        BackendApi::Headless
    }

    fn caps(&self) -> Caps {
        self.options.caps.clone()
    }

    fn finish_initialization(&self) -> Result<()> {
        if self.options.fail_initialization {
            return Err(TesselError::Initialization(
                "headless backend configured to fail initialization".to_string(),
            ));
        }
        Ok(())
    }

    fn create_texture(&self, info: &TextureInfo, label: &str) -> Result<TextureId> {
        let mut state = self.state.lock();
        Self::check_alive(&state)?;
        let id = TextureId(state.handle());
        trace!(texture = id.0, label, width = info.width, height = info.height, "headless texture");
        state.textures.insert(
            id,
            HeadlessTexture {
                info: *info,
                data: vec![0; info.bytes()],
            },
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) {
        self.state.lock().textures.remove(&id);
    }

    fn create_buffer(&self, desc: &BufferDesc, label: &str) -> Result<BufferId> {
        let mut state = self.state.lock();
        Self::check_alive(&state)?;
        let id = BufferId(state.handle());
        trace!(buffer = id.0, label, size = desc.size, "headless buffer");
        state.buffers.insert(
            id,
            HeadlessBuffer {
                data: vec![0; desc.size as usize],
                map_state: MapState::Unmapped,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        self.state.lock().buffers.remove(&id);
    }

    fn submit(&self, tasks: &[Task]) -> Result<SubmissionId> {
        let mut state = self.state.lock();
        Self::check_alive(&state)?;
        for task in tasks {
            state.execute(task)?;
        }
        let id = state.last_submitted.next();
        state.last_submitted = id;
        if self.options.completion_latency == 0 {
            state.completed = id;
        } else {
            state.pending.push_back(PendingSubmission {
                id,
                remaining_polls: self.options.completion_latency,
            });
        }
        debug!(submission = id.0, tasks = tasks.len(), "headless submit");
        Ok(id)
    }

    fn poll(&self, wait: bool) -> Result<SubmissionId> {
        let mut state = self.state.lock();
        Self::check_alive(&state)?;
        if wait {
            state.pending.clear();
            state.completed = state.last_submitted;
            return Ok(state.completed);
        }
        for pending in state.pending.iter_mut() {
            pending.remaining_polls = pending.remaining_polls.saturating_sub(1);
        }
        while let Some(front) = state.pending.front() {
            if front.remaining_polls > 0 {
                break;
            }
            let id = front.id;
            state.pending.pop_front();
            state.completed = id;
        }
        Ok(state.completed)
    }

    fn map_async(&self, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_alive(&state)?;
        let fail = self.options.fail_buffer_maps;
        let buffer = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| TesselError::Gpu(format!("unknown buffer {}", buffer.0)))?;
        buffer.map_state = if fail { MapState::Failed } else { MapState::Mapped };
        Ok(())
    }

    fn map_state(&self, buffer: BufferId) -> MapState {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map_or(MapState::Failed, |b| b.map_state)
    }

    fn read_mapped(&self, buffers: &[BufferId], reader: &mut dyn FnMut(&[&[u8]])) -> Result<()> {
        // Copy out so the reader runs without the state lock held.
        let copies = {
            let state = self.state.lock();
            buffers
                .iter()
                .map(|id| match state.buffers.get(id) {
                    Some(b) if b.map_state == MapState::Mapped => Ok(b.data.clone()),
                    _ => Err(TesselError::Readback(format!("buffer {} is not mapped", id.0))),
                })
                .collect::<Result<Vec<_>>>()?
        };
        let slices: Vec<&[u8]> = copies.iter().map(Vec::as_slice).collect();
        reader(&slices);
        Ok(())
    }

    fn unmap(&self, buffer: BufferId) {
        if let Some(b) = self.state.lock().buffers.get_mut(&buffer) {
            b.map_state = MapState::Unmapped;
        }
    }

    fn is_device_lost(&self) -> bool {
        self.state.lock().device_lost
    }
}
