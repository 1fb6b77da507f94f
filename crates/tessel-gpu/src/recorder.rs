//! Recording sessions.
//!
//! A [`Recorder`] accumulates tasks and freezes them into [`Recording`]s. It
//! never talks to the device queue itself; nothing it records reaches the GPU
//! until the recording is inserted into the context and submitted. Dropping a
//! recorder with unsnapped work has no device-side effect.

use std::sync::Arc;

use parking_lot::Mutex;
use tessel_core::{AlphaType, Color, IPoint, IRect, ImageInfo, Result, TesselError};
use tracing::debug;

use crate::backend::TextureInfo;
use crate::context_id::{ContextId, DeviceId, RecorderId};
use crate::options::RecorderOptions;
use crate::recording::Recording;
use crate::resource::TextureProxy;
use crate::resource_cache::ResourceCache;
use crate::shared_context::SharedContext;
use crate::single_owner::SingleOwner;
use crate::task::Task;
use crate::texture::{BackendTexture, Image, Surface};

/// Single-threaded builder of [`Recording`]s.
///
/// A recorder may be moved to another thread; distinct recorders of one
/// context may record concurrently.
pub struct Recorder {
    shared: Arc<SharedContext>,
    resources: Arc<Mutex<ResourceCache>>,
    context_id: ContextId,
    id: RecorderId,
    options: RecorderOptions,
    tasks: Vec<Task>,
    single_owner: SingleOwner,
}

impl Recorder {
    pub(crate) fn new(
        shared: Arc<SharedContext>,
        resources: Arc<Mutex<ResourceCache>>,
        context_id: ContextId,
        options: RecorderOptions,
    ) -> Result<Self> {
        let id = RecorderId::next()?;
        debug!(recorder = id.raw(), context = %context_id, label = ?options.label, "recorder created");
        Ok(Self {
            shared,
            resources,
            context_id,
            id,
            options,
            tasks: Vec::new(),
            single_owner: SingleOwner::new(),
        })
    }

    pub fn id(&self) -> RecorderId {
        self.id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.shared.device_id()
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    /// Number of tasks recorded since the last snap.
    pub fn pending_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Freeze everything recorded so far. The recorder stays usable.
    pub fn snap(&mut self) -> Recording {
        let _guard = self.single_owner.enter();
        let tasks = std::mem::take(&mut self.tasks);
        debug!(recorder = self.id.raw(), tasks = tasks.len(), "snapped recording");
        Recording {
            device_id: self.shared.device_id(),
            context_id: self.context_id,
            recorder_id: self.id,
            tasks,
        }
    }

    /// Allocate a budgeted render target.
    pub fn make_surface(&mut self, info: ImageInfo) -> Result<Surface> {
        let _guard = self.single_owner.enter();
        if !self.shared.caps().is_renderable(info.color_type()) {
            return Err(TesselError::Unsupported(format!(
                "{:?} is not renderable",
                info.color_type()
            )));
        }
        let texture = self.create_scratch_texture(
            &TextureInfo::new(info.width, info.height, info.color_type()),
            self.options.label.as_deref().unwrap_or("surface"),
        )?;
        Ok(Surface {
            texture,
            info,
            device_id: self.shared.device_id(),
        })
    }

    /// Upload CPU pixels, laid out as `info` with `row_bytes` stride, into a new image.
    pub fn make_image_from_pixels(&mut self, info: ImageInfo, pixels: &[u8], row_bytes: usize) -> Result<Image> {
        let _guard = self.single_owner.enter();
        info.validate_pixels(pixels, row_bytes)?;
        let texture = self.create_scratch_texture(
            &TextureInfo::new(info.width, info.height, info.color_type()),
            "image",
        )?;

        let tight = info.min_row_bytes();
        let mut data = Vec::with_capacity(tight * info.height as usize);
        for row in pixels.chunks(row_bytes).take(info.height as usize) {
            data.extend_from_slice(&row[..tight]);
        }

        self.tasks.push(Task::Upload {
            target: texture.clone(),
            rect: info.bounds(),
            data: data.into(),
            row_bytes: tight,
        });
        Ok(Image {
            texture,
            info,
            device_id: self.shared.device_id(),
        })
    }

    /// Fill the whole surface with an unpremultiplied color.
    pub fn clear(&mut self, surface: &Surface, color: Color) -> Result<()> {
        let _guard = self.single_owner.enter();
        self.check_device(surface.device_id)?;
        self.tasks.push(Task::Clear {
            target: surface.texture.clone(),
            color: encode_color(color, surface.info.alpha_type()),
        });
        Ok(())
    }

    /// Fill `rect`, clipped to the surface, with an unpremultiplied color.
    pub fn fill_rect(&mut self, surface: &Surface, rect: IRect, color: Color) -> Result<()> {
        let _guard = self.single_owner.enter();
        self.check_device(surface.device_id)?;
        let Some(rect) = rect.intersection(surface.info.bounds()) else {
            return Ok(());
        };
        self.tasks.push(Task::FillRect {
            target: surface.texture.clone(),
            rect,
            color: encode_color(color, surface.info.alpha_type()),
        });
        Ok(())
    }

    /// Copy `src_rect` of `image` to `dst_point` of `surface` without conversion.
    pub fn copy_image_to_surface(
        &mut self,
        image: &Image,
        src_rect: IRect,
        surface: &Surface,
        dst_point: IPoint,
    ) -> Result<()> {
        let _guard = self.single_owner.enter();
        self.check_device(image.device_id)?;
        self.check_device(surface.device_id)?;
        if image.info.color_type() != surface.info.color_type() {
            return Err(TesselError::Unsupported(format!(
                "copy from {:?} to {:?}",
                image.info.color_type(),
                surface.info.color_type()
            )));
        }
        if src_rect.is_empty() || !image.info.bounds().contains_rect(src_rect) {
            return Err(TesselError::InvalidArgument(format!(
                "source rect {src_rect:?} outside image bounds"
            )));
        }
        if !surface.info.bounds().contains_rect(src_rect.with_origin(dst_point)) {
            return Err(TesselError::InvalidArgument(format!(
                "destination {dst_point:?} leaves surface bounds"
            )));
        }
        self.tasks.push(Task::CopyTexture {
            src: image.texture.clone(),
            src_rect,
            dst: surface.texture.clone(),
            dst_point,
        });
        Ok(())
    }

    /// Create an unbudgeted texture owned by the caller.
    pub fn create_backend_texture(&mut self, info: TextureInfo) -> Result<BackendTexture> {
        let _guard = self.single_owner.enter();
        self.validate_texture(&info)?;
        let id = self
            .shared
            .backend()
            .create_texture(&info, self.options.label.as_deref().unwrap_or("backend texture"))?;
        Ok(BackendTexture {
            api: self.shared.api(),
            device_id: self.shared.device_id(),
            id: Some(id),
            info,
        })
    }

    pub(crate) fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Drop tasks recorded after the first `len`.
    pub(crate) fn truncate_tasks(&mut self, len: usize) {
        self.tasks.truncate(len);
    }

    /// Budgeted texture from the shared resource cache.
    pub(crate) fn create_scratch_texture(&self, info: &TextureInfo, label: &str) -> Result<TextureProxy> {
        self.validate_texture(info)?;
        self.resources.lock().find_or_create_texture(info, label)
    }

    fn validate_texture(&self, info: &TextureInfo) -> Result<()> {
        self.shared.check_alive()?;
        let max = self.shared.caps().max_texture_size;
        if info.width == 0 || info.height == 0 || info.width > max || info.height > max {
            return Err(TesselError::InvalidArgument(format!(
                "texture size {}x{} outside 1..={max}",
                info.width, info.height
            )));
        }
        if info.protected && !self.shared.caps().supports_protected_content {
            return Err(TesselError::Unsupported(
                "protected textures are not supported by this device".to_string(),
            ));
        }
        Ok(())
    }

    fn check_device(&self, device_id: DeviceId) -> Result<()> {
        if device_id != self.shared.device_id() {
            return Err(TesselError::ForeignDevice(format!(
                "resource from {device_id} used with {}",
                self.shared.device_id()
            )));
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!(recorder = self.id.raw(), tasks = self.tasks.len(), "recorder dropped with unsnapped work");
        }
    }
}

/// Bring an unpremultiplied color into the target alpha type.
fn encode_color(color: Color, alpha_type: AlphaType) -> Color {
    Color::from_array(alpha_type.from_premul(AlphaType::Unpremul.to_premul(color.to_array())))
}
