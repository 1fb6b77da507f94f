//! Texture-backed images, surfaces and client-owned backend textures.

use tessel_core::{ImageInfo, ISize};

use crate::backend::{BackendApi, TextureId, TextureInfo};
use crate::context_id::DeviceId;
use crate::resource::TextureProxy;

/// Immutable pixels resident on one device.
#[derive(Debug, Clone)]
pub struct Image {
    pub(crate) texture: TextureProxy,
    pub(crate) info: ImageInfo,
    pub(crate) device_id: DeviceId,
}

impl Image {
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn dimensions(&self) -> ISize {
        self.info.dimensions()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture.id()
    }
}

/// A render target drawn into through a [`Recorder`](crate::Recorder).
#[derive(Debug, Clone)]
pub struct Surface {
    pub(crate) texture: TextureProxy,
    pub(crate) info: ImageInfo,
    pub(crate) device_id: DeviceId,
}

impl Surface {
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn dimensions(&self) -> ISize {
        self.info.dimensions()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture.id()
    }

    /// An image sharing this surface's texture.
    ///
    /// Draws recorded into the surface later are visible through the image
    /// once they have been submitted.
    pub fn as_image(&self) -> Image {
        Image {
            texture: self.texture.clone(),
            info: self.info,
            device_id: self.device_id,
        }
    }
}

/// A texture owned by the client rather than the resource cache.
///
/// It is not budgeted and lives until
/// [`Context::delete_backend_texture`](crate::Context::delete_backend_texture).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTexture {
    pub(crate) api: BackendApi,
    pub(crate) device_id: DeviceId,
    pub(crate) id: Option<TextureId>,
    pub(crate) info: TextureInfo,
}

impl BackendTexture {
    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    pub fn api(&self) -> BackendApi {
        self.api
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        self.id
    }

    pub(crate) fn invalidate(&mut self) {
        self.id = None;
    }
}
