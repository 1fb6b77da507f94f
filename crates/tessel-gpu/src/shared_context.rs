//! State shared by a context and all of its recorders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessel_core::{Result, TesselError};
use tracing::warn;

use crate::backend::{Backend, BackendApi, Caps};
use crate::context_id::DeviceId;

/// One device connection: capabilities, backend handle and the sticky
/// device-lost flag.
pub struct SharedContext {
    device_id: DeviceId,
    backend: Arc<dyn Backend>,
    caps: Caps,
    device_lost: AtomicBool,
}

impl SharedContext {
    pub fn new(backend: Arc<dyn Backend>) -> Result<Arc<Self>> {
        let caps = backend.caps();
        Ok(Arc::new(Self {
            device_id: DeviceId::next()?,
            backend,
            caps,
            device_lost: AtomicBool::new(false),
        }))
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn api(&self) -> BackendApi {
        self.backend.api()
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Once lost, always lost.
    pub fn is_device_lost(&self) -> bool {
        if self.device_lost.load(Ordering::Acquire) {
            return true;
        }
        if self.backend.is_device_lost() {
            self.mark_device_lost();
            return true;
        }
        false
    }

    pub fn mark_device_lost(&self) {
        if !self.device_lost.swap(true, Ordering::AcqRel) {
            warn!(device = %self.device_id, api = ?self.api(), "GPU device lost");
        }
    }

    /// `Err(DeviceLost)` once the device is gone.
    pub fn check_alive(&self) -> Result<()> {
        if self.is_device_lost() {
            Err(TesselError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("device_id", &self.device_id)
            .field("api", &self.api())
            .field("device_lost", &self.device_lost.load(Ordering::Relaxed))
            .finish()
    }
}
