//! wgpu device connection.
//!
//! Every submission is encoded into one command buffer. Draw tasks share a
//! single fullscreen shader (`resample.wgsl`) that fills, resamples with a
//! color conversion, or extracts one YUV plane. Completion is tracked with
//! `on_submitted_work_done` and advanced by polling the device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessel_core::{align_to, ColorSpaceXform, ColorType, IRect, Result, TesselError};
use tracing::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

use super::{
    Backend, BackendApi, BufferDesc, BufferId, Caps, MapState, SubmissionId, TextureId, TextureInfo,
};
use crate::task::{FilterMode, ResampleTask, Task};

/// Adapter preference, mirrored from `wgpu::PowerPreference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

/// Configuration of a [`WgpuBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WgpuOptions {
    pub power_preference: PowerPreference,
    /// Upper bound on texture edges, further limited by the adapter.
    pub max_texture_dimension: u32,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            max_texture_dimension: 8192,
            force_fallback_adapter: false,
        }
    }
}

const RENDER_FORMATS: [wgpu::TextureFormat; 4] = [
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Bgra8Unorm,
    wgpu::TextureFormat::R8Unorm,
    wgpu::TextureFormat::Rgba32Float,
];

fn texture_format(color_type: ColorType) -> wgpu::TextureFormat {
    match color_type {
        ColorType::Rgba8888 => wgpu::TextureFormat::Rgba8Unorm,
        ColorType::Bgra8888 => wgpu::TextureFormat::Bgra8Unorm,
        ColorType::Alpha8 | ColorType::Gray8 => wgpu::TextureFormat::R8Unorm,
        ColorType::RgbaF32 => wgpu::TextureFormat::Rgba32Float,
    }
}

fn texture_usages(info: &TextureInfo) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if info.usage.sampled {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if info.usage.render_target {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if info.usage.copy_src {
        usages |= wgpu::TextureUsages::COPY_SRC;
    }
    if info.usage.copy_dst {
        usages |= wgpu::TextureUsages::COPY_DST;
    }
    usages
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Uniform block of `resample.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniforms {
    src_rect: Vec4,
    dst: Vec4,
    fill_color: Vec4,
    plane_weights: Vec4,
    plane_bias_alpha: Vec4,
    formats: Vec4,
    gamut_r: Vec4,
    gamut_g: Vec4,
    gamut_b: Vec4,
}

impl DrawUniforms {
    const MODE_FILL: f32 = 0.0;
    const MODE_RESAMPLE: f32 = 1.0;
    const MODE_PLANE: f32 = 2.0;

    fn fill(target: &TextureInfo, color: [f32; 4]) -> Self {
        Self {
            src_rect: Vec4::ZERO,
            dst: Vec4::new(target.width as f32, target.height as f32, 0.0, Self::MODE_FILL),
            fill_color: Vec4::from_array(color),
            plane_weights: Vec4::ZERO,
            plane_bias_alpha: Vec4::ZERO,
            formats: Vec4::new(0.0, target.color_type.shader_swizzle() as f32, 0.0, 0.0),
            gamut_r: Vec4::X,
            gamut_g: Vec4::Y,
            gamut_b: Vec4::Z,
        }
    }

    fn resample(task: &ResampleTask, src: &TextureInfo, dst: &TextureInfo) -> Self {
        let src_space = task.src_color.color_space;
        let dst_space = task.dst_color.color_space;
        let xform = if task.linear_blend {
            ColorSpaceXform::from_linear(src_space, dst_space)
        } else {
            ColorSpaceXform::new(src_space, dst_space)
        };
        let rows = xform.gamut_rows();
        let filter = match task.filter {
            FilterMode::Nearest => 0.0,
            FilterMode::Linear => 1.0,
        };
        let (mode, weights, bias) = match task.plane {
            Some(plane) => (Self::MODE_PLANE, Vec4::from_array(plane.weights), plane.bias),
            None => (Self::MODE_RESAMPLE, Vec4::ZERO, 0.0),
        };
        let rect = task.src_rect;
        Self {
            src_rect: Vec4::new(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32),
            dst: Vec4::new(dst.width as f32, dst.height as f32, filter, mode),
            fill_color: Vec4::ZERO,
            plane_weights: weights,
            plane_bias_alpha: Vec4::new(
                bias,
                task.src_color.alpha_type.shader_tag() as f32,
                task.dst_color.alpha_type.shader_tag() as f32,
                if task.linear_blend { 1.0 } else { 0.0 },
            ),
            formats: Vec4::new(
                src.color_type.shader_swizzle() as f32,
                dst.color_type.shader_swizzle() as f32,
                src_space.transfer_function().shader_tag() as f32,
                xform.dst_transfer().shader_tag() as f32,
            ),
            gamut_r: Vec4::new(rows[0][0], rows[0][1], rows[0][2], 0.0),
            gamut_g: Vec4::new(rows[1][0], rows[1][1], rows[1][2], 0.0),
            gamut_b: Vec4::new(rows[2][0], rows[2][1], rows[2][2], 0.0),
        }
    }
}

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    info: TextureInfo,
}

struct WgpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    map_state: Arc<Mutex<MapState>>,
}

#[derive(Default)]
struct WgpuState {
    next_handle: u64,
    textures: HashMap<TextureId, WgpuTexture>,
    buffers: HashMap<BufferId, WgpuBuffer>,
    last_submitted: SubmissionId,
}

impl WgpuState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn texture(&self, id: TextureId) -> Result<&WgpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| TesselError::Gpu(format!("unknown texture {}", id.0)))
    }

    fn buffer(&self, id: BufferId) -> Result<&WgpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| TesselError::Gpu(format!("unknown buffer {}", id.0)))
    }
}

/// Device connection through wgpu.
pub struct WgpuBackend {
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: Caps,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    /// Bound as the source of fill draws.
    placeholder_view: wgpu::TextureView,
    state: Mutex<WgpuState>,
    completed: Arc<AtomicU64>,
    device_lost: Arc<AtomicBool>,
}

impl WgpuBackend {
    /// Open an adapter and device.
    pub async fn new(options: WgpuOptions) -> Result<Self> {
        #[cfg(target_os = "macos")]
        let backends = wgpu::Backends::METAL;
        #[cfg(not(target_os = "macos"))]
        let backends = wgpu::Backends::VULKAN | wgpu::Backends::DX12 | wgpu::Backends::GL;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: match options.power_preference {
                    PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
                    PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
                },
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .ok_or_else(|| TesselError::Initialization("no suitable GPU adapter found".to_string()))?;

        let adapter_info = adapter.get_info();
        info!("Using GPU adapter: {:?}", adapter_info);

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Tessel Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: options
                            .max_texture_dimension
                            .min(adapter_limits.max_texture_dimension_2d),
                        max_buffer_size: adapter_limits.max_buffer_size,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(|e| TesselError::Initialization(format!("failed to create device: {e}")))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let lost = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "wgpu device lost");
            lost.store(true, Ordering::Release);
        });
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            warn!(error = %err, "uncaptured wgpu error");
        }));

        let limits = device.limits();
        let caps = Caps {
            max_texture_size: limits.max_texture_dimension_2d,
            supports_protected_content: false,
            buffer_row_alignment: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
            max_buffer_size: limits.max_buffer_size,
            readable_color_types: ColorType::ALL.to_vec(),
            renderable_color_types: ColorType::ALL.to_vec(),
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("resample bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let pipelines = create_pipelines(&device, &bind_group_layout);

        let placeholder = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fill placeholder"),
            size: extent(1, 1),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            adapter_info,
            device,
            queue,
            caps,
            bind_group_layout,
            pipelines,
            placeholder_view,
            state: Mutex::new(WgpuState::default()),
            completed: Arc::new(AtomicU64::new(0)),
            device_lost,
        })
    }

    /// Open an adapter and device (blocking version).
    pub fn new_blocking(options: WgpuOptions) -> Result<Self> {
        pollster::block_on(Self::new(options))
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_device_lost() {
            Err(TesselError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Run `create` inside an out-of-memory error scope.
    fn with_oom_scope<T>(&self, what: &str, create: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(TesselError::OutOfMemory(format!("{what}: {err}"))),
            None => Ok(value),
        }
    }

    fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &WgpuTexture,
        source: &wgpu::TextureView,
        uniforms: &DrawUniforms,
        scissor: IRect,
    ) -> Result<()> {
        let format = texture_format(target.info.color_type);
        let pipeline = self
            .pipelines
            .get(&format)
            .ok_or_else(|| TesselError::Unsupported(format!("no pipeline for {format:?}")))?;
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("draw uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tessel draw"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn encode(&self, state: &WgpuState, encoder: &mut wgpu::CommandEncoder, task: &Task) -> Result<()> {
        trace!(task = task.name(), "wgpu encode");
        match task {
            Task::Clear { target, color } => {
                let tex = state.texture(target.id())?;
                let bounds = IRect::new(0, 0, tex.info.width, tex.info.height);
                let uniforms = DrawUniforms::fill(&tex.info, color.to_array());
                self.draw(encoder, tex, &self.placeholder_view, &uniforms, bounds)?;
            }
            Task::FillRect { target, rect, color } => {
                let tex = state.texture(target.id())?;
                let uniforms = DrawUniforms::fill(&tex.info, color.to_array());
                self.draw(encoder, tex, &self.placeholder_view, &uniforms, *rect)?;
            }
            Task::Upload {
                target,
                rect,
                data,
                row_bytes,
            } => {
                let tex = state.texture(target.id())?;
                let row_len = rect.width as usize * tex.info.color_type.bytes_per_pixel();
                let padded = align_to(row_len, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
                let mut staging = vec![0u8; padded * rect.height as usize];
                for (row, out) in staging.chunks_exact_mut(padded).enumerate() {
                    let start = row * row_bytes;
                    out[..row_len].copy_from_slice(&data[start..start + row_len]);
                }
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("upload staging"),
                    contents: &staging,
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
                encoder.copy_buffer_to_texture(
                    wgpu::ImageCopyBuffer {
                        buffer: &buffer,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(padded as u32),
                            rows_per_image: Some(rect.height),
                        },
                    },
                    wgpu::ImageCopyTexture {
                        texture: &tex.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: rect.x,
                            y: rect.y,
                            z: 0,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    extent(rect.width, rect.height),
                );
            }
            Task::CopyTexture {
                src,
                src_rect,
                dst,
                dst_point,
            } => {
                let src = state.texture(src.id())?;
                let dst = state.texture(dst.id())?;
                encoder.copy_texture_to_texture(
                    wgpu::ImageCopyTexture {
                        texture: &src.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: src_rect.x,
                            y: src_rect.y,
                            z: 0,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyTexture {
                        texture: &dst.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: dst_point.x,
                            y: dst_point.y,
                            z: 0,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    extent(src_rect.width, src_rect.height),
                );
            }
            Task::Resample(resample) => {
                let src = state.texture(resample.src.id())?;
                let dst = state.texture(resample.dst.id())?;
                let uniforms = DrawUniforms::resample(resample, &src.info, &dst.info);
                let bounds = IRect::new(0, 0, dst.info.width, dst.info.height);
                self.draw(encoder, dst, &src.view, &uniforms, bounds)?;
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
                let src = state.texture(src.id())?;
                let buffer = state.buffer(dst.id())?;
                encoder.copy_texture_to_buffer(
                    wgpu::ImageCopyTexture {
                        texture: &src.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: src_rect.x,
                            y: src_rect.y,
                            z: 0,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyBuffer {
                        buffer: &buffer.buffer,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(*row_bytes as u32),
                            rows_per_image: Some(src_rect.height),
                        },
                    },
                    extent(src_rect.width, src_rect.height),
                );
            }
        }
        Ok(())
    }
}

fn create_pipelines(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> HashMap<wgpu::TextureFormat, wgpu::RenderPipeline> {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("resample shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("resample.wgsl").into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("resample pipeline layout"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    RENDER_FORMATS
        .iter()
        .map(|&format| {
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("resample pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            (format, pipeline)
        })
        .collect()
}

impl Backend for WgpuBackend {
    fn api(&self) -> BackendApi {
        BackendApi::Wgpu
    }

    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn finish_initialization(&self) -> Result<()> {
        if self.is_device_lost() {
            return Err(TesselError::Initialization(
                "device lost before initialization finished".to_string(),
            ));
        }
        debug!(adapter = %self.adapter_info.name, "wgpu backend ready");
        Ok(())
    }

    fn create_texture(&self, info: &TextureInfo, label: &str) -> Result<TextureId> {
        self.check_alive()?;
        if info.protected {
            return Err(TesselError::Unsupported(
                "protected textures are not available through wgpu".to_string(),
            ));
        }
        let texture = self.with_oom_scope(label, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(info.width, info.height),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(info.color_type),
                usage: texture_usages(info),
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut state = self.state.lock();
        let id = TextureId(state.handle());
        trace!(texture = id.0, label, width = info.width, height = info.height, "wgpu texture");
        state.textures.insert(
            id,
            WgpuTexture {
                texture,
                view,
                info: *info,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) {
        if let Some(tex) = self.state.lock().textures.remove(&id) {
            tex.texture.destroy();
        }
    }

    fn create_buffer(&self, desc: &BufferDesc, label: &str) -> Result<BufferId> {
        self.check_alive()?;
        let buffer = self.with_oom_scope(label, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: desc.size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })?;
        let mut state = self.state.lock();
        let id = BufferId(state.handle());
        trace!(buffer = id.0, label, size = desc.size, "wgpu buffer");
        state.buffers.insert(
            id,
            WgpuBuffer {
                buffer: Arc::new(buffer),
                map_state: Arc::new(Mutex::new(MapState::Unmapped)),
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        if let Some(buffer) = self.state.lock().buffers.remove(&id) {
            buffer.buffer.destroy();
        }
    }

    fn submit(&self, tasks: &[Task]) -> Result<SubmissionId> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessel submission"),
            });
        for task in tasks {
            self.encode(&state, &mut encoder, task)?;
        }
        self.queue.submit(Some(encoder.finish()));

        let id = state.last_submitted.next();
        state.last_submitted = id;
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(id.0, Ordering::AcqRel);
        });
        debug!(submission = id.0, tasks = tasks.len(), "wgpu submit");
        Ok(id)
    }

    fn poll(&self, wait: bool) -> Result<SubmissionId> {
        self.check_alive()?;
        let maintain = if wait {
            wgpu::Maintain::Wait
        } else {
            wgpu::Maintain::Poll
        };
        let _ = self.device.poll(maintain);
        self.check_alive()?;
        Ok(SubmissionId(self.completed.load(Ordering::Acquire)))
    }

    fn map_async(&self, buffer: BufferId) -> Result<()> {
        self.check_alive()?;
        let state = self.state.lock();
        let entry = state.buffer(buffer)?;
        *entry.map_state.lock() = MapState::Pending;
        let map_state = Arc::clone(&entry.map_state);
        entry.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            *map_state.lock() = match result {
                Ok(()) => MapState::Mapped,
                Err(err) => {
                    warn!(buffer = buffer.0, error = %err, "buffer map failed");
                    MapState::Failed
                }
            };
        });
        Ok(())
    }

    fn map_state(&self, buffer: BufferId) -> MapState {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map_or(MapState::Failed, |b| *b.map_state.lock())
    }

    fn read_mapped(&self, buffers: &[BufferId], reader: &mut dyn FnMut(&[&[u8]])) -> Result<()> {
        // The reader runs without the state lock held.
        let handles = {
            let state = self.state.lock();
            buffers
                .iter()
                .map(|id| {
                    let entry = state.buffer(*id)?;
                    if *entry.map_state.lock() != MapState::Mapped {
                        return Err(TesselError::Readback(format!("buffer {} is not mapped", id.0)));
                    }
                    Ok(Arc::clone(&entry.buffer))
                })
                .collect::<Result<Vec<_>>>()?
        };
        let views: Vec<wgpu::BufferView<'_>> = handles.iter().map(|b| b.slice(..).get_mapped_range()).collect();
        let slices: Vec<&[u8]> = views.iter().map(|v| &v[..]).collect();
        reader(&slices);
        Ok(())
    }

    fn unmap(&self, buffer: BufferId) {
        let state = self.state.lock();
        if let Some(entry) = state.buffers.get(&buffer) {
            let mut map_state = entry.map_state.lock();
            if *map_state == MapState::Mapped {
                entry.buffer.unmap();
            }
            *map_state = MapState::Unmapped;
        }
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }
}
