//! Budgeted cache of backend textures and buffers.
//!
//! Every texture and transfer buffer a context or recorder allocates comes
//! from here. Entries are kept in least-recently-used order and are reused
//! by exact key. An entry is free when the cache holds its only reference;
//! only free entries are ever purged, so anything still referenced by an
//! image, a surface or unfinished GPU work survives every purge.

use std::sync::Arc;
use std::time::Instant;

use tessel_core::{Result, TesselError};
use tracing::debug;

use crate::backend::{Backend, BufferDesc, TextureInfo};
use crate::memory_dump::MemoryDump;
use crate::resource::{BufferProxy, GpuResource, ResourceId, TextureProxy};

/// Lookup key of a cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Texture(TextureInfo),
    Buffer(BufferDesc),
}

struct CacheEntry {
    resource: Arc<GpuResource>,
    key: ResourceKey,
    last_access: Instant,
}

impl CacheEntry {
    fn is_free(&self) -> bool {
        Arc::strong_count(&self.resource) == 1
    }
}

/// LRU resource cache with a byte budget.
pub struct ResourceCache {
    backend: Arc<dyn Backend>,
    /// Front is least recently used.
    entries: Vec<CacheEntry>,
    total_bytes: usize,
    max_bytes: usize,
    max_buffer_size: u64,
}

impl ResourceCache {
    /// Create a cache allocating from `backend` with the given byte budget.
    pub fn new(backend: Arc<dyn Backend>, max_bytes: usize) -> Self {
        let max_buffer_size = backend.caps().max_buffer_size;
        Self {
            backend,
            entries: Vec::new(),
            total_bytes: 0,
            max_bytes,
            max_buffer_size,
        }
    }

    /// Reuse a free texture with exactly this `info` or allocate a new one.
    pub fn find_or_create_texture(&mut self, info: &TextureInfo, label: &str) -> Result<TextureProxy> {
        let key = ResourceKey::Texture(*info);
        let resource = match self.take_free(&key) {
            Some(resource) => resource,
            None => {
                let bytes = info.bytes();
                self.purge_as_needed(bytes);
                let id = self.backend.create_texture(info, label)?;
                self.insert(ResourceId::Texture(id), key, bytes, label)
            }
        };
        match resource.id() {
            ResourceId::Texture(id) => Ok(TextureProxy::new(resource, id, *info)),
            ResourceId::Buffer(_) => Err(TesselError::Gpu(
                "texture cache key resolved to a buffer".to_string(),
            )),
        }
    }

    /// Reuse a free buffer with exactly this `desc` or allocate a new one.
    pub fn find_or_create_buffer(&mut self, desc: &BufferDesc, label: &str) -> Result<BufferProxy> {
        if desc.size == 0 || desc.size > self.max_buffer_size {
            return Err(TesselError::OutOfMemory(format!(
                "buffer of {} bytes outside 1..={}",
                desc.size, self.max_buffer_size
            )));
        }
        let key = ResourceKey::Buffer(*desc);
        let resource = match self.take_free(&key) {
            Some(resource) => resource,
            None => {
                let bytes = desc.size as usize;
                self.purge_as_needed(bytes);
                let id = self.backend.create_buffer(desc, label)?;
                self.insert(ResourceId::Buffer(id), key, bytes, label)
            }
        };
        match resource.id() {
            ResourceId::Buffer(id) => Ok(BufferProxy::new(resource, id, *desc)),
            ResourceId::Texture(_) => Err(TesselError::Gpu(
                "buffer cache key resolved to a texture".to_string(),
            )),
        }
    }

    fn take_free(&mut self, key: &ResourceKey) -> Option<Arc<GpuResource>> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.key == *key && e.is_free())?;
        let mut entry = self.entries.remove(idx);
        entry.last_access = Instant::now();
        let resource = Arc::clone(&entry.resource);
        self.entries.push(entry);
        Some(resource)
    }

    fn insert(&mut self, id: ResourceId, key: ResourceKey, bytes: usize, label: &str) -> Arc<GpuResource> {
        let resource = Arc::new(GpuResource::new(
            id,
            bytes,
            label.to_string(),
            Arc::clone(&self.backend),
        ));
        self.entries.push(CacheEntry {
            resource: Arc::clone(&resource),
            key,
            last_access: Instant::now(),
        });
        self.total_bytes += bytes;
        debug!(resource = %id, bytes, total = self.total_bytes, "allocated GPU resource");
        resource
    }

    /// Evict least-recently-used free entries until `incoming` more bytes fit
    /// the budget or nothing free is left. Returns the number of bytes freed.
    pub fn purge_as_needed(&mut self, incoming: usize) -> usize {
        let mut freed = 0;
        while self.total_bytes + incoming > self.max_bytes {
            let Some(idx) = self.entries.iter().position(CacheEntry::is_free) else {
                break;
            };
            freed += self.remove_at(idx);
        }
        if freed > 0 {
            debug!(freed, total = self.total_bytes, "purged over-budget resources");
        }
        freed
    }

    /// Drop every free entry. Returns the number of bytes freed.
    pub fn purge_unlocked_resources(&mut self) -> usize {
        self.purge_where(|_| true)
    }

    /// Drop free entries last used before `cutoff`. Returns the number of bytes freed.
    pub fn purge_resources_not_used_since(&mut self, cutoff: Instant) -> usize {
        self.purge_where(|e| e.last_access < cutoff)
    }

    fn purge_where(&mut self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
        let before = self.total_bytes;
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.is_free() && pred(&entry) {
                self.total_bytes -= entry.resource.bytes();
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        let freed = before - self.total_bytes;
        if freed > 0 {
            debug!(freed, total = self.total_bytes, "purged GPU resources");
        }
        freed
    }

    fn remove_at(&mut self, idx: usize) -> usize {
        let entry = self.entries.remove(idx);
        let bytes = entry.resource.bytes();
        self.total_bytes -= bytes;
        bytes
    }

    /// Bytes held by all cached entries, referenced or not.
    pub fn budgeted_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bytes held by entries that are still referenced outside the cache.
    pub fn locked_bytes(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.is_free())
            .map(|e| e.resource.bytes())
            .sum()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn resource_count(&self) -> usize {
        self.entries.len()
    }

    /// Report every entry to `dump`.
    pub fn dump(&self, dump: &mut dyn MemoryDump) {
        for entry in &self.entries {
            let resource = &entry.resource;
            let name = format!("tessel/gpu_resources/{}", resource.label());
            dump.dump_resource(&name, resource.bytes(), &resource.id().to_string());
        }
    }
}
