//! Asynchronous pixel readback.
//!
//! A readback runs in three stages:
//!
//! 1. Preparation. If the source can be copied out as is, nothing is drawn.
//!    Otherwise the caller's recorder, or a transient one, draws the
//!    requested rescale, color conversion or YUV planes into intermediate
//!    textures.
//! 2. Transfer. Each plane is copied into a CPU-mappable buffer, producing
//!    one [`PixelTransferResult`] per plane.
//! 3. Finalization. The work is submitted and the buffers are handed to the
//!    [`MappedBufferManager`](crate::mapped_buffer::MappedBufferManager). Once
//!    they are mapped the per-plane conversions run and the callback sees
//!    the pixels.
//!
//! The callback runs exactly once. Precondition failures reach it before
//! the readback call returns; everything else is delivered from a later poll.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tessel_core::{
    convert_pixels, AlphaType, ColorInfo, ColorSpace, ColorType, IRect, ISize, ImageInfo, Result,
    TesselError, YuvColorSpace,
};
use tracing::{debug, warn};

use crate::backend::{BufferDesc, TextureInfo};
use crate::context::Context;
use crate::context_id::DeviceId;
use crate::options::RecorderOptions;
use crate::recorder::Recorder;
use crate::resource::{BufferProxy, TextureProxy};
use crate::task::{FilterMode, PlaneTransform, ResampleTask, Task};
use crate::texture::{Image, Surface};

/// Which encoding rescale filtering happens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RescaleGamma {
    /// Filter the encoded values of the source color space.
    #[default]
    Src,
    /// Filter in linear light.
    Linear,
}

/// How the source is resampled to the destination size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RescaleMode {
    Nearest,
    /// One bilinear pass.
    Linear,
    /// Bilinear passes that at most halve or double each axis.
    #[default]
    RepeatedLinear,
}

/// What a readback reads from.
#[derive(Debug, Clone, Copy)]
pub enum ReadbackSource<'a> {
    Image(&'a Image),
    Surface(&'a Surface),
}

impl<'a> From<&'a Image> for ReadbackSource<'a> {
    fn from(image: &'a Image) -> Self {
        Self::Image(image)
    }
}

impl<'a> From<&'a Surface> for ReadbackSource<'a> {
    fn from(surface: &'a Surface) -> Self {
        Self::Surface(surface)
    }
}

impl ReadbackSource<'_> {
    fn texture(&self) -> &TextureProxy {
        match self {
            Self::Image(image) => &image.texture,
            Self::Surface(surface) => &surface.texture,
        }
    }

    fn info(&self) -> &ImageInfo {
        match self {
            Self::Image(image) => &image.info,
            Self::Surface(surface) => &surface.info,
        }
    }

    fn device_id(&self) -> DeviceId {
        match self {
            Self::Image(image) => image.device_id,
            Self::Surface(surface) => surface.device_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Surface(_) => "surface",
        }
    }
}

/// One plane of a finished readback. Borrowed from mapped memory, so it is
/// only valid inside the callback.
#[derive(Debug, Clone, Copy)]
pub struct ReadPlane<'a> {
    data: &'a [u8],
    row_bytes: usize,
    size: ISize,
}

impl<'a> ReadPlane<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn size(&self) -> ISize {
        self.size
    }

    /// Row `y`, without stride padding.
    pub fn row(&self, y: u32, bytes_per_pixel: usize) -> &'a [u8] {
        let start = y as usize * self.row_bytes;
        &self.data[start..start + self.size.width as usize * bytes_per_pixel]
    }
}

/// Pixels handed to a readback callback: one plane for RGBA reads, three
/// or four for YUV(A) reads.
#[derive(Debug)]
pub struct AsyncReadResult<'a> {
    planes: SmallVec<[ReadPlane<'a>; 4]>,
}

impl<'a> AsyncReadResult<'a> {
    pub fn count(&self) -> usize {
        self.planes.len()
    }

    pub fn planes(&self) -> &[ReadPlane<'a>] {
        &self.planes
    }

    pub fn data(&self, plane: usize) -> &'a [u8] {
        self.planes[plane].data
    }

    pub fn row_bytes(&self, plane: usize) -> usize {
        self.planes[plane].row_bytes
    }

    pub fn size(&self, plane: usize) -> ISize {
        self.planes[plane].size
    }
}

type ReadbackCallback = Box<dyn for<'a> FnOnce(Result<AsyncReadResult<'a>>) + Send + 'static>;

/// Rewrites mapped transfer rows into the requested color type.
pub(crate) struct PixelConverter {
    size: ISize,
    dst_row_bytes: usize,
    convert: Box<dyn Fn(&[u8], &mut [u8]) + Send>,
}

impl PixelConverter {
    fn new(size: ISize, src_type: ColorType, src_row_bytes: usize, dst_type: ColorType) -> Self {
        let dst_row_bytes = size.width as usize * dst_type.bytes_per_pixel();
        Self {
            size,
            dst_row_bytes,
            convert: Box::new(move |src, dst| {
                convert_pixels(size, src_type, src, src_row_bytes, dst_type, dst, dst_row_bytes)
            }),
        }
    }

    fn run(&self, src: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; self.dst_row_bytes * self.size.height as usize];
        (self.convert)(src, &mut out);
        out
    }
}

/// Outcome of the transfer stage for one plane.
pub(crate) struct PixelTransferResult {
    /// `None` means the readback as a whole has failed.
    transfer_buffer: Option<BufferProxy>,
    size: ISize,
    row_bytes: usize,
    /// `None` means the mapped bytes are already in the requested layout.
    converter: Option<PixelConverter>,
}

enum ReadbackPlan {
    Rgba {
        dst_info: ImageInfo,
    },
    Yuv {
        yuv_color_space: YuvColorSpace,
        dst_color_space: ColorSpace,
        dst_size: ISize,
        with_alpha: bool,
    },
}

impl ReadbackPlan {
    fn dst_size(&self) -> ISize {
        match self {
            Self::Rgba { dst_info } => dst_info.dimensions(),
            Self::Yuv { dst_size, .. } => *dst_size,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Rgba { .. } => "readback",
            Self::Yuv { .. } => "yuv readback",
        }
    }
}

/// Output of the preparation and transfer stages.
struct PreparedReadback {
    results: Vec<PixelTransferResult>,
    transfers: Vec<Task>,
}

struct PlaneDraw {
    size: ISize,
    filter: FilterMode,
    transform: PlaneTransform,
}

impl Context {
    /// Read `src_rect` of `src` back as `dst_info`, rescaling and converting
    /// as needed.
    ///
    /// The callback receives one plane laid out as `dst_info`.
    pub fn async_rescale_and_read_pixels<'s, F>(
        &mut self,
        src: impl Into<ReadbackSource<'s>>,
        dst_info: ImageInfo,
        src_rect: IRect,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: F,
    ) where
        F: FnOnce(Result<AsyncReadResult<'_>>) + Send + 'static,
    {
        self.read_pixels_impl(
            src.into(),
            ReadbackPlan::Rgba { dst_info },
            src_rect,
            gamma,
            mode,
            None,
            Box::new(callback),
        );
    }

    /// Like [`Context::async_rescale_and_read_pixels`], recording into
    /// `recorder` instead of a transient recorder.
    ///
    /// Everything `recorder` holds when this is called is snapped into the
    /// readback's recording and submitted ahead of the transfer, so earlier
    /// draws into the source are visible in the result. On failure the
    /// recorder is left as it was.
    #[allow(clippy::too_many_arguments)]
    pub fn async_rescale_and_read_pixels_with_recorder<'s, F>(
        &mut self,
        recorder: &mut Recorder,
        src: impl Into<ReadbackSource<'s>>,
        dst_info: ImageInfo,
        src_rect: IRect,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: F,
    ) where
        F: FnOnce(Result<AsyncReadResult<'_>>) + Send + 'static,
    {
        self.read_pixels_impl(
            src.into(),
            ReadbackPlan::Rgba { dst_info },
            src_rect,
            gamma,
            mode,
            Some(recorder),
            Box::new(callback),
        );
    }

    /// Read `src_rect` of `src` back as Y, U and V planes.
    ///
    /// Y is `dst_size`; U and V are half of it, rounded up. Every plane has
    /// one byte per pixel.
    #[allow(clippy::too_many_arguments)]
    pub fn async_rescale_and_read_pixels_yuv420<'s, F>(
        &mut self,
        src: impl Into<ReadbackSource<'s>>,
        yuv_color_space: YuvColorSpace,
        dst_color_space: ColorSpace,
        src_rect: IRect,
        dst_size: ISize,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: F,
    ) where
        F: FnOnce(Result<AsyncReadResult<'_>>) + Send + 'static,
    {
        let plan = ReadbackPlan::Yuv {
            yuv_color_space,
            dst_color_space,
            dst_size,
            with_alpha: false,
        };
        self.read_pixels_impl(src.into(), plan, src_rect, gamma, mode, None, Box::new(callback));
    }

    /// Like [`Context::async_rescale_and_read_pixels_yuv420`] plus a
    /// full-size alpha plane.
    #[allow(clippy::too_many_arguments)]
    pub fn async_rescale_and_read_pixels_yuva420<'s, F>(
        &mut self,
        src: impl Into<ReadbackSource<'s>>,
        yuv_color_space: YuvColorSpace,
        dst_color_space: ColorSpace,
        src_rect: IRect,
        dst_size: ISize,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: F,
    ) where
        F: FnOnce(Result<AsyncReadResult<'_>>) + Send + 'static,
    {
        let plan = ReadbackPlan::Yuv {
            yuv_color_space,
            dst_color_space,
            dst_size,
            with_alpha: true,
        };
        self.read_pixels_impl(src.into(), plan, src_rect, gamma, mode, None, Box::new(callback));
    }

    #[allow(clippy::too_many_arguments)]
    fn read_pixels_impl(
        &mut self,
        source: ReadbackSource<'_>,
        plan: ReadbackPlan,
        src_rect: IRect,
        gamma: RescaleGamma,
        mode: RescaleMode,
        mut recorder: Option<&mut Recorder>,
        callback: ReadbackCallback,
    ) {
        let _guard = self.single_owner.enter();
        if let Err(err) = self.check_readback(&source, src_rect, plan.dst_size(), recorder.as_deref()) {
            warn!(context = %self.context_id, source = source.kind(), error = %err, "readback rejected");
            callback(Err(err));
            return;
        }

        let direct = match &plan {
            ReadbackPlan::Rgba { dst_info } => self.is_direct_transfer(&source, src_rect, dst_info),
            ReadbackPlan::Yuv { .. } => false,
        };
        // Tasks recorded before this call belong to the caller.
        let mark = recorder.as_deref().map_or(0, Recorder::pending_task_count);
        let mut transient = None;
        let prepared = match plan {
            ReadbackPlan::Rgba { dst_info } if direct => {
                debug!(context = %self.context_id, "direct readback");
                Ok(self.prepare_direct(&source, src_rect, dst_info))
            }
            plan => {
                let draws = match recorder.as_deref_mut() {
                    Some(recorder) => Ok(recorder),
                    None => match self.make_recorder(RecorderOptions {
                        label: Some(plan.label().to_string()),
                    }) {
                        Ok(made) => Ok(transient.insert(made)),
                        Err(err) => Err(err),
                    },
                };
                draws.and_then(|draws| match plan {
                    ReadbackPlan::Rgba { dst_info } => {
                        self.prepare_rgba(draws, &source, src_rect, dst_info, gamma, mode)
                    }
                    ReadbackPlan::Yuv {
                        yuv_color_space,
                        dst_color_space,
                        dst_size,
                        with_alpha,
                    } => self.prepare_yuv(
                        draws,
                        &source,
                        src_rect,
                        yuv_color_space,
                        dst_color_space,
                        dst_size,
                        with_alpha,
                        gamma,
                        mode,
                    ),
                })
            }
        };

        let recorder = recorder.or(transient.as_mut());
        match prepared {
            Ok(prepared) => self.finalize_readback(prepared, recorder, mark, callback),
            Err(err) => {
                if let Some(recorder) = recorder {
                    recorder.truncate_tasks(mark);
                }
                warn!(context = %self.context_id, error = %err, "readback preparation failed");
                callback(Err(err));
            }
        }
    }

    fn check_readback(
        &self,
        source: &ReadbackSource<'_>,
        src_rect: IRect,
        dst_size: ISize,
        recorder: Option<&Recorder>,
    ) -> Result<()> {
        self.shared.check_alive()?;
        if let Some(recorder) = recorder {
            if recorder.device_id() != self.shared.device_id() {
                return Err(TesselError::ForeignDevice(format!(
                    "recorder from {} used with {}",
                    recorder.device_id(),
                    self.context_id
                )));
            }
        }
        if source.device_id() != self.shared.device_id() {
            return Err(TesselError::ForeignDevice(format!(
                "{} from {} read through {}",
                source.kind(),
                source.device_id(),
                self.context_id
            )));
        }
        if src_rect.is_empty() || !source.info().bounds().contains_rect(src_rect) {
            return Err(TesselError::InvalidArgument(format!(
                "source rect {src_rect:?} is empty or outside the {}",
                source.kind()
            )));
        }
        if dst_size.is_empty() {
            return Err(TesselError::InvalidArgument(
                "readback destination is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Texture color type for drawing a result that is read back as `wanted`.
    ///
    /// Falls back to RGBA8888; fails if neither can be rendered and read.
    fn intermediate_color_type(&self, wanted: ColorType) -> Result<ColorType> {
        let caps = self.shared.caps();
        [wanted, ColorType::Rgba8888]
            .into_iter()
            .find(|&ct| caps.is_renderable(ct) && caps.is_readable(ct))
            .ok_or_else(|| {
                TesselError::Unsupported(format!(
                    "no renderable and readable color type to read back {wanted:?}"
                ))
            })
    }

    /// The source can be copied out without drawing.
    fn is_direct_transfer(&self, source: &ReadbackSource<'_>, src_rect: IRect, dst_info: &ImageInfo) -> bool {
        let src_info = source.info();
        src_rect.size() == dst_info.dimensions()
            && src_info.color_space() == dst_info.color_space()
            && src_info.alpha_type().is_compatible_with(dst_info.alpha_type())
            && self.shared.caps().is_readable(src_info.color_type())
    }

    fn prepare_direct(&self, source: &ReadbackSource<'_>, src_rect: IRect, dst_info: ImageInfo) -> PreparedReadback {
        let mut transfers = Vec::new();
        let result = self.transfer_pixels(
            source.texture(),
            source.info().color_type(),
            src_rect,
            dst_info.color_type(),
            &mut transfers,
        );
        PreparedReadback {
            results: vec![result],
            transfers,
        }
    }

    fn prepare_rgba(
        &self,
        recorder: &mut Recorder,
        source: &ReadbackSource<'_>,
        src_rect: IRect,
        dst_info: ImageInfo,
        gamma: RescaleGamma,
        mode: RescaleMode,
    ) -> Result<PreparedReadback> {
        let texture_type = self.intermediate_color_type(dst_info.color_type())?;
        let rescaled = rescale(
            recorder,
            source.texture(),
            source.info().color,
            src_rect,
            dst_info.color.with_color_type(texture_type),
            dst_info.dimensions(),
            gamma,
            mode,
        )?;
        let mut transfers = Vec::new();
        let result = self.transfer_pixels(
            &rescaled,
            texture_type,
            IRect::from_size(dst_info.dimensions()),
            dst_info.color_type(),
            &mut transfers,
        );
        Ok(PreparedReadback {
            results: vec![result],
            transfers,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare_yuv(
        &self,
        recorder: &mut Recorder,
        source: &ReadbackSource<'_>,
        src_rect: IRect,
        yuv_color_space: YuvColorSpace,
        dst_color_space: ColorSpace,
        dst_size: ISize,
        with_alpha: bool,
        gamma: RescaleGamma,
        mode: RescaleMode,
    ) -> Result<PreparedReadback> {
        let src_info = *source.info();
        let plane_type = self.intermediate_color_type(ColorType::Alpha8)?;

        // Planes are drawn from an image already at destination size and
        // color space, so each plane draw only applies its matrix row.
        let (plane_src, plane_rect, plane_color) =
            if src_rect.size() == dst_size && src_info.color_space() == dst_color_space {
                (source.texture().clone(), src_rect, src_info.color)
            } else {
                let color = ColorInfo::new(ColorType::Rgba8888, AlphaType::Premul, dst_color_space);
                let rescaled = rescale(
                    recorder,
                    source.texture(),
                    src_info.color,
                    src_rect,
                    color,
                    dst_size,
                    gamma,
                    mode,
                )?;
                (rescaled, IRect::from_size(dst_size), color)
            };

        let rows = yuv_color_space.rgb_to_yuv_rows();
        let chroma_size = dst_size.half_rounded_up();
        let mut draws = vec![
            PlaneDraw {
                size: dst_size,
                filter: FilterMode::Nearest,
                transform: PlaneTransform::from_row(rows[0]),
            },
            PlaneDraw {
                size: chroma_size,
                filter: FilterMode::Linear,
                transform: PlaneTransform::from_row(rows[1]),
            },
            PlaneDraw {
                size: chroma_size,
                filter: FilterMode::Linear,
                transform: PlaneTransform::from_row(rows[2]),
            },
        ];
        if with_alpha {
            draws.push(PlaneDraw {
                size: dst_size,
                filter: FilterMode::Nearest,
                transform: PlaneTransform::ALPHA,
            });
        }

        let mut results = Vec::with_capacity(draws.len());
        let mut transfers = Vec::with_capacity(draws.len());
        for draw in draws {
            let target = recorder.create_scratch_texture(
                &TextureInfo::new(draw.size.width, draw.size.height, plane_type),
                "yuv plane",
            )?;
            recorder.add_task(Task::Resample(ResampleTask {
                src: plane_src.clone(),
                src_rect: plane_rect,
                src_color: plane_color,
                dst: target.clone(),
                dst_color: plane_color.with_color_type(plane_type),
                filter: draw.filter,
                linear_blend: false,
                plane: Some(draw.transform),
            }));
            results.push(self.transfer_pixels(
                &target,
                plane_type,
                IRect::from_size(draw.size),
                ColorType::Alpha8,
                &mut transfers,
            ));
        }
        Ok(PreparedReadback { results, transfers })
    }

    /// Copy `rect` of `src` into a new transfer buffer.
    ///
    /// The copy task is appended to `transfers`. An unreadable color type or
    /// a failed allocation yields a result without a buffer.
    fn transfer_pixels(
        &self,
        src: &TextureProxy,
        src_type: ColorType,
        rect: IRect,
        dst_type: ColorType,
        transfers: &mut Vec<Task>,
    ) -> PixelTransferResult {
        let caps = self.shared.caps();
        let size = rect.size();
        let row_bytes = caps.aligned_row_bytes(size.width, src_type);
        let converter =
            (src_type != dst_type).then(|| PixelConverter::new(size, src_type, row_bytes, dst_type));
        let mut result = PixelTransferResult {
            transfer_buffer: None,
            size,
            row_bytes,
            converter,
        };

        if !caps.is_readable(src_type) {
            warn!(color_type = ?src_type, "color type cannot be transferred");
            return result;
        }
        let desc = BufferDesc::transfer_read((row_bytes * size.height as usize) as u64);
        match self.resources.lock().find_or_create_buffer(&desc, "readback") {
            Ok(buffer) => {
                transfers.push(Task::CopyTextureToBuffer {
                    src: src.clone(),
                    src_rect: rect,
                    dst: buffer.clone(),
                    row_bytes,
                });
                result.transfer_buffer = Some(buffer);
            }
            Err(err) => warn!(error = %err, bytes = desc.size, "transfer buffer allocation failed"),
        }
        result
    }

    /// Queue the transfers and submit. Draws and transfers go through
    /// `recorder` when there is one; tasks it held before `mark` belong to the
    /// caller.
    fn finalize_readback(
        &mut self,
        prepared: PreparedReadback,
        recorder: Option<&mut Recorder>,
        mark: usize,
        callback: ReadbackCallback,
    ) {
        let PreparedReadback { results, transfers } = prepared;

        if results.iter().any(|r| r.transfer_buffer.is_none()) {
            // Nothing recorded for this readback is submitted.
            if let Some(recorder) = recorder {
                recorder.truncate_tasks(mark);
            }
            callback(Err(TesselError::Readback(
                "no transfer buffer for readback".to_string(),
            )));
            return;
        }

        match recorder {
            Some(recorder) => {
                for task in transfers {
                    recorder.add_task(task);
                }
                let recording = recorder.snap();
                if let Err(err) = self.insert_recording(recording.into()) {
                    callback(Err(err));
                    return;
                }
            }
            None => {
                for task in transfers {
                    self.queue.add_task(task);
                }
            }
        }

        if let Err(err) = self.queue.submit_to_gpu() {
            if self.shared.is_device_lost() {
                self.fail_all_work(&TesselError::DeviceLost);
            }
            callback(Err(err));
            return;
        }

        let submission = self.queue.last_submitted();
        let buffers: Vec<BufferProxy> = results
            .iter()
            .filter_map(|r| r.transfer_buffer.clone())
            .collect();
        debug!(
            context = %self.context_id,
            submission = submission.0,
            planes = buffers.len(),
            "readback submitted"
        );
        self.mapped_buffers.register(
            submission,
            buffers,
            Box::new(move |mapped: Result<&[&[u8]]>| deliver_planes(&results, mapped, callback)),
        );
    }
}

/// Draw `src_rect` of `src` at `dst_size` in `dst_color`, in one or more passes.
#[allow(clippy::too_many_arguments)]
fn rescale(
    recorder: &mut Recorder,
    src: &TextureProxy,
    src_color: ColorInfo,
    src_rect: IRect,
    dst_color: ColorInfo,
    dst_size: ISize,
    gamma: RescaleGamma,
    mode: RescaleMode,
) -> Result<TextureProxy> {
    let filter = match mode {
        RescaleMode::Nearest => FilterMode::Nearest,
        RescaleMode::Linear | RescaleMode::RepeatedLinear => FilterMode::Linear,
    };
    let steps = rescale_steps(src_rect.size(), dst_size, mode);
    let mut current = src.clone();
    let mut current_rect = src_rect;
    let mut current_color = src_color;
    for (i, size) in steps.iter().enumerate() {
        // Intermediate passes stay in the source color space.
        let color = if i + 1 == steps.len() {
            dst_color
        } else {
            ColorInfo::new(dst_color.color_type, AlphaType::Premul, src_color.color_space)
        };
        let target = recorder.create_scratch_texture(
            &TextureInfo::new(size.width, size.height, color.color_type),
            "rescale",
        )?;
        recorder.add_task(Task::Resample(ResampleTask {
            src: current,
            src_rect: current_rect,
            src_color: current_color,
            dst: target.clone(),
            dst_color: color,
            filter,
            linear_blend: gamma == RescaleGamma::Linear,
            plane: None,
        }));
        current = target;
        current_rect = IRect::from_size(*size);
        current_color = color;
    }
    Ok(current)
}

/// Sizes of successive rescale passes. The last one is always `dst`.
fn rescale_steps(src: ISize, dst: ISize, mode: RescaleMode) -> Vec<ISize> {
    if mode != RescaleMode::RepeatedLinear {
        return vec![dst];
    }
    fn step(current: u32, target: u32) -> u32 {
        if current > target {
            (current / 2).max(target)
        } else {
            current.saturating_mul(2).min(target)
        }
    }
    let mut steps = Vec::new();
    let mut current = src;
    loop {
        let next = ISize::new(step(current.width, dst.width), step(current.height, dst.height));
        steps.push(next);
        if next == dst {
            return steps;
        }
        current = next;
    }
}

fn deliver_planes(results: &[PixelTransferResult], mapped: Result<&[&[u8]]>, callback: ReadbackCallback) {
    let mapped = match mapped {
        Ok(mapped) => mapped,
        Err(err) => {
            warn!(error = %err, "readback failed");
            callback(Err(err));
            return;
        }
    };
    let converted: Vec<Option<Vec<u8>>> = results
        .iter()
        .zip(mapped)
        .map(|(result, data)| result.converter.as_ref().map(|c| c.run(data)))
        .collect();
    let planes = results
        .iter()
        .zip(mapped)
        .zip(&converted)
        .map(|((result, data), converted)| match (converted, &result.converter) {
            (Some(pixels), Some(converter)) => ReadPlane {
                data: pixels.as_slice(),
                row_bytes: converter.dst_row_bytes,
                size: result.size,
            },
            _ => {
                let len = result.row_bytes * result.size.height as usize;
                ReadPlane {
                    data: data.get(..len).unwrap_or(*data),
                    row_bytes: result.row_bytes,
                    size: result.size,
                }
            }
        })
        .collect();
    callback(Ok(AsyncReadResult { planes }));
}
