//! Reference-counted backend GPU objects.

use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, BufferDesc, BufferId, TextureId, TextureInfo};

/// Backend handle of a cached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Texture(TextureId),
    Buffer(BufferId),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Texture(id) => write!(f, "texture:{}", id.0),
            Self::Buffer(id) => write!(f, "buffer:{}", id.0),
        }
    }
}

/// A backend object that is destroyed when the last reference goes away.
pub struct GpuResource {
    id: ResourceId,
    bytes: usize,
    label: String,
    backend: Arc<dyn Backend>,
}

impl GpuResource {
    pub(crate) fn new(id: ResourceId, bytes: usize, label: String, backend: Arc<dyn Backend>) -> Self {
        Self {
            id,
            bytes,
            label,
            backend,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for GpuResource {
    fn drop(&mut self) {
        match self.id {
            ResourceId::Texture(id) => self.backend.destroy_texture(id),
            ResourceId::Buffer(id) => self.backend.destroy_buffer(id),
        }
    }
}

impl fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResource")
            .field("id", &self.id)
            .field("bytes", &self.bytes)
            .field("label", &self.label)
            .finish()
    }
}

/// Shared handle to a cached texture.
///
/// While any proxy is alive (held by an image, a surface or an in-flight
/// task) the cache cannot purge the texture.
#[derive(Debug, Clone)]
pub struct TextureProxy {
    resource: Arc<GpuResource>,
    texture_id: TextureId,
    info: TextureInfo,
}

impl TextureProxy {
    pub(crate) fn new(resource: Arc<GpuResource>, texture_id: TextureId, info: TextureInfo) -> Self {
        Self {
            resource,
            texture_id,
            info,
        }
    }

    pub fn id(&self) -> TextureId {
        self.texture_id
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }
}

/// Shared handle to a cached buffer.
#[derive(Debug, Clone)]
pub struct BufferProxy {
    resource: Arc<GpuResource>,
    buffer_id: BufferId,
    desc: BufferDesc,
}

impl BufferProxy {
    pub(crate) fn new(resource: Arc<GpuResource>, buffer_id: BufferId, desc: BufferDesc) -> Self {
        Self {
            resource,
            buffer_id,
            desc,
        }
    }

    pub fn id(&self) -> BufferId {
        self.buffer_id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }
}
